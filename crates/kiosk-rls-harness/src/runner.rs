//! Policy matrix runner
//!
//! Walks the fixed phase sequence
//! `Init -> Authenticated -> (NonStaffDenied(r) -> StaffAllowed(r))* -> RpcWorkflow -> Done`
//! one awaited operation at a time. Later checks reuse row ids produced by
//! earlier inserts, so nothing here runs concurrently. A failing check never
//! stops the run; only a check whose prerequisite insert yielded no row is
//! skipped.

use crate::backend::{DataApi, Filter, RowId, Select};
use crate::console::Console;
use crate::expect::Recorder;
use crate::identity::Sessions;
use crate::resources::{
    check_in_args, check_in_athlete, check_in_log_id, ResourceKind, ResourceProfile,
    ScenarioContext, CHECK_IN_PROCEDURE, OWNER_COLUMN,
};
use crate::tally::Tally;
use std::fmt;

/// Runner state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Nothing has happened yet
    Init,
    /// Both identities are signed in
    Authenticated,
    /// Non-staff checks against one resource
    NonStaffDenied(ResourceKind),
    /// Staff checks against one resource
    StaffAllowed(ResourceKind),
    /// Check-in procedure workflow
    RpcWorkflow,
    /// Run complete
    Done,
}

impl Phase {
    /// The only phase allowed to follow this one
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Init => Some(Phase::Authenticated),
            Phase::Authenticated => Some(Phase::NonStaffDenied(ResourceKind::ALL[0])),
            Phase::NonStaffDenied(kind) => Some(Phase::StaffAllowed(kind)),
            Phase::StaffAllowed(kind) => {
                let position = ResourceKind::ALL.iter().position(|k| *k == kind);
                match position.and_then(|i| ResourceKind::ALL.get(i + 1)) {
                    Some(next) => Some(Phase::NonStaffDenied(*next)),
                    None => Some(Phase::RpcWorkflow),
                }
            }
            Phase::RpcWorkflow => Some(Phase::Done),
            Phase::Done => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Init => f.write_str("init"),
            Phase::Authenticated => f.write_str("authenticated"),
            Phase::NonStaffDenied(kind) => write!(f, "non-staff denied checks ({})", kind),
            Phase::StaffAllowed(kind) => write!(f, "staff allowed checks ({})", kind),
            Phase::RpcWorkflow => f.write_str("rpc workflow"),
            Phase::Done => f.write_str("done"),
        }
    }
}

/// Lookup fields and timezone for the check-in procedure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckIn {
    /// National id
    pub dni: Option<String>,
    /// Phone number
    pub phone: Option<String>,
    /// IANA timezone name
    pub timezone: String,
}

/// One pass over the whole matrix with a fixed pair of sessions
pub struct PolicyMatrix<'a, S: DataApi, C: Console + ?Sized> {
    sessions: &'a Sessions<S>,
    ctx: ScenarioContext,
    check_in: CheckIn,
    recorder: Recorder<'a, C>,
    phase: Phase,
}

impl<'a, S: DataApi, C: Console + ?Sized> PolicyMatrix<'a, S, C> {
    /// Prepare a run over already-authenticated sessions
    pub fn new(
        sessions: &'a Sessions<S>,
        ctx: ScenarioContext,
        check_in: CheckIn,
        console: &'a C,
    ) -> Self {
        Self {
            sessions,
            ctx,
            check_in,
            recorder: Recorder::new(console),
            phase: Phase::Init,
        }
    }

    /// Execute every phase in order and hand back the tally
    pub async fn run(mut self) -> Tally {
        self.advance(Phase::Authenticated);

        for kind in ResourceKind::ALL {
            let profile = ResourceProfile::new(kind, &self.ctx);

            self.advance(Phase::NonStaffDenied(kind));
            let own_row = self.non_staff_checks(&profile).await;

            self.advance(Phase::StaffAllowed(kind));
            self.staff_checks(&profile).await;
            if !kind.keeps_self_limiting_row() {
                self.remove_non_staff_row(&profile, own_row).await;
            }
        }

        self.advance(Phase::RpcWorkflow);
        self.check_in_workflow().await;

        self.advance(Phase::Done);
        self.recorder.into_tally()
    }

    fn advance(&mut self, to: Phase) {
        debug_assert_eq!(
            self.phase.next(),
            Some(to),
            "illegal phase transition from {} to {}",
            self.phase,
            to
        );
        tracing::debug!("Phase {} -> {}", self.phase, to);
        self.phase = to;
        self.recorder.set_phase(to);
    }

    /// Returns the id of the self-limiting row non-staff managed to insert
    async fn non_staff_checks(&mut self, profile: &ResourceProfile) -> Option<RowId> {
        let session = &self.sessions.non_staff;
        let table = profile.table.as_str();
        self.recorder
            .section(format!("{} / non-staff (expect denied)", table));

        let read_any = Select::from(table).limit(1);
        self.recorder
            .expect_blocked_or_empty(
                &format!("{}: non-staff select is blocked or empty", table),
                session.select(&read_any),
            )
            .await;

        self.recorder
            .expect_error(
                &format!("{}: non-staff cannot insert privileged row", table),
                session.insert(table, &profile.privileged_insert),
            )
            .await;

        let own_row = self
            .recorder
            .expect_success(
                &format!("{}: non-staff can insert self-limiting row", table),
                session.insert(table, &profile.self_limiting_insert),
            )
            .await
            .and_then(|payload| RowId::from_payload(&payload));

        let update_own = format!("{}: non-staff cannot update its own row", table);
        match &own_row {
            Some(id) => {
                let filters = [Filter::id(id)];
                self.recorder
                    .expect_blocked_or_empty(
                        &update_own,
                        session.update(table, &filters, &profile.non_staff_patch),
                    )
                    .await;
            }
            None => self
                .recorder
                .skip(&update_own, "self-limiting insert returned no row id"),
        }

        let athlete_rows = [Filter::eq(OWNER_COLUMN, self.ctx.athlete_id.as_str())];
        self.recorder
            .expect_blocked_or_empty(
                &format!("{}: non-staff cannot update athlete rows", table),
                session.update(table, &athlete_rows, &profile.non_staff_patch),
            )
            .await;

        let delete_own = format!("{}: non-staff cannot delete its own row", table);
        match &own_row {
            Some(id) => {
                let filters = [Filter::id(id)];
                self.recorder
                    .expect_blocked_or_empty(&delete_own, session.delete(table, &filters))
                    .await;
            }
            None => self
                .recorder
                .skip(&delete_own, "self-limiting insert returned no row id"),
        }
        own_row
    }

    async fn staff_checks(&mut self, profile: &ResourceProfile) {
        let session = &self.sessions.staff;
        let table = profile.table.as_str();
        self.recorder
            .section(format!("{} / staff (expect allowed)", table));

        let read_athlete = Select::from(table)
            .eq(OWNER_COLUMN, self.ctx.athlete_id.as_str())
            .order_desc(profile.kind.order_column())
            .limit(1);
        self.recorder
            .expect_success(
                &format!("{}: staff can select", table),
                session.select(&read_athlete),
            )
            .await;

        let created = self
            .recorder
            .expect_success(
                &format!("{}: staff can insert", table),
                session.insert(table, &profile.staff_insert),
            )
            .await
            .and_then(|payload| RowId::from_payload(&payload));

        let update_label = format!("{}: staff can update its row", table);
        let delete_label = format!("{}: staff can delete its row", table);
        let Some(id) = created else {
            self.recorder
                .skip(&update_label, "staff insert returned no row id");
            self.recorder
                .skip(&delete_label, "staff insert returned no row id");
            return;
        };

        let filters = [Filter::id(&id)];
        self.recorder
            .expect_rows(
                &update_label,
                session.update(table, &filters, &profile.staff_patch),
            )
            .await;
        self.recorder
            .expect_rows(&delete_label, session.delete(table, &filters))
            .await;
    }

    async fn remove_non_staff_row(&self, profile: &ResourceProfile, own_row: Option<RowId>) {
        let Some(id) = own_row else {
            return;
        };
        let filters = [Filter::id(&id)];
        match self.sessions.staff.delete(&profile.table, &filters).await {
            Ok(_) => tracing::debug!("Removed non-staff row {} from {}", id, profile.table),
            Err(err) => tracing::warn!(
                "Could not remove non-staff row {} from {}: {}",
                id,
                profile.table,
                err
            ),
        }
    }

    fn newest_access_log(&self, athlete_id: &str) -> Select {
        Select::from(ResourceKind::AccessLog.table(&self.ctx.tables))
            .eq(OWNER_COLUMN, athlete_id)
            .order_desc(ResourceKind::AccessLog.order_column())
            .limit(1)
    }

    async fn check_in_workflow(&mut self) {
        let sessions = self.sessions;
        self.recorder.section(format!("{} workflow", CHECK_IN_PROCEDURE));

        let dni = self.check_in.dni.as_deref();
        let phone = self.check_in.phone.as_deref();
        if dni.is_none() && phone.is_none() {
            tracing::warn!("No DNI or phone configured; check-in lookup fields will be null");
            self.recorder
                .note("note: no DNI or phone configured, calling check-in with null lookup fields");
        }

        // Newest log before the call; the read-back must find a different one
        let baseline = match sessions
            .staff
            .select(&self.newest_access_log(&self.ctx.athlete_id))
            .await
        {
            Ok(payload) => RowId::from_payload(&payload),
            Err(err) => {
                tracing::warn!("Could not read access log baseline: {}", err);
                None
            }
        };

        let args = check_in_args(dni, phone, &self.ctx.now_iso(), &self.check_in.timezone);
        let payload = self
            .recorder
            .expect_success(
                &format!("{}: non-staff can check in", CHECK_IN_PROCEDURE),
                sessions.non_staff.rpc(CHECK_IN_PROCEDURE, &args),
            )
            .await;

        let athlete_id = match payload.as_ref().and_then(check_in_athlete) {
            Some(id) => id,
            None => {
                self.recorder.note(&format!(
                    "note: check-in returned no athlete id, falling back to {}",
                    self.ctx.athlete_id
                ));
                self.ctx.athlete_id.clone()
            }
        };
        let previous = baseline.filter(|_| athlete_id == self.ctx.athlete_id);

        let mut read_back = self.newest_access_log(&athlete_id);
        if let Some(log_id) = payload.as_ref().and_then(check_in_log_id) {
            read_back = read_back.eq("id", log_id.as_str());
        }
        self.recorder
            .expect_new_row(
                &format!("{}: staff sees the resulting access log", CHECK_IN_PROCEDURE),
                sessions.staff.select(&read_back),
                previous.as_ref(),
                ResourceKind::AccessLog.order_column(),
                self.ctx.now,
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_visit_every_resource_in_order() {
        let mut phase = Phase::Init;
        let mut visited = vec![phase];
        while let Some(next) = phase.next() {
            visited.push(next);
            phase = next;
        }
        assert_eq!(
            visited,
            vec![
                Phase::Init,
                Phase::Authenticated,
                Phase::NonStaffDenied(ResourceKind::AccessLog),
                Phase::StaffAllowed(ResourceKind::AccessLog),
                Phase::NonStaffDenied(ResourceKind::MonthlyCounter),
                Phase::StaffAllowed(ResourceKind::MonthlyCounter),
                Phase::NonStaffDenied(ResourceKind::SlotAssignment),
                Phase::StaffAllowed(ResourceKind::SlotAssignment),
                Phase::RpcWorkflow,
                Phase::Done,
            ]
        );
    }

    #[test]
    fn phase_names_are_readable() {
        assert_eq!(
            Phase::NonStaffDenied(ResourceKind::MonthlyCounter).to_string(),
            "non-staff denied checks (monthly counter)"
        );
        assert_eq!(Phase::RpcWorkflow.to_string(), "rpc workflow");
    }
}

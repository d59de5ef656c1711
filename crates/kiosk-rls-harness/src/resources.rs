//! Protected resources and the payloads used against them
//!
//! Every protected collection gets the same treatment from the runner; what
//! differs is which field combination would fabricate an authorized outcome
//! (privileged) and which only records a negative one (self-limiting).

use crate::backend::{first_row, scalar_to_string, RowId};
use crate::config::TableNames;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use std::fmt;

/// Column every protected row uses to reference its athlete
pub const OWNER_COLUMN: &str = "athlete_id";

/// Name of the kiosk check-in procedure
pub const CHECK_IN_PROCEDURE: &str = "kiosk_check_in";

/// Field of the check-in payload naming the access log it wrote
pub const CHECK_IN_LOG_FIELD: &str = "access_log_id";

// Counter periods are fixed and far in the past so harness rows never share a
// period with a real counter or with each other.
const PRIVILEGED_PERIOD: &str = "1999-11-01";
const SELF_LIMITING_PERIOD: &str = "1999-12-01";
const STAFF_PERIOD: &str = "2000-01-01";

/// Protected collection class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Kiosk access-log entries
    AccessLog,
    /// Monthly visit counters
    MonthlyCounter,
    /// Weekly-schedule slot assignments
    SlotAssignment,
}

impl ResourceKind {
    /// Every resource, in run order
    pub const ALL: [ResourceKind; 3] = [
        ResourceKind::AccessLog,
        ResourceKind::MonthlyCounter,
        ResourceKind::SlotAssignment,
    ];

    /// Configured collection name
    pub fn table(self, tables: &TableNames) -> &str {
        match self {
            ResourceKind::AccessLog => &tables.access_logs,
            ResourceKind::MonthlyCounter => &tables.monthly_counters,
            ResourceKind::SlotAssignment => &tables.slot_assignments,
        }
    }

    /// Whether the row non-staff inserts for itself stays behind after a run
    ///
    /// Denied access-log entries are kept as evidence; other self-limiting
    /// rows are removed by staff so repeated runs start from the same state.
    pub fn keeps_self_limiting_row(self) -> bool {
        matches!(self, ResourceKind::AccessLog)
    }

    /// Column reads are ordered by, newest first
    pub fn order_column(self) -> &'static str {
        match self {
            ResourceKind::AccessLog => "checked_in_at",
            ResourceKind::MonthlyCounter => "period_start",
            ResourceKind::SlotAssignment => "starts_on",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::AccessLog => f.write_str("access log"),
            ResourceKind::MonthlyCounter => f.write_str("monthly counter"),
            ResourceKind::SlotAssignment => f.write_str("slot assignment"),
        }
    }
}

/// Fixture values shared by every payload of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioContext {
    /// Athlete every row is written for
    pub athlete_id: String,
    /// Weekly schedule slot assignments point at
    pub weekly_schedule_id: String,
    /// Run timestamp
    pub now: DateTime<Utc>,
    /// Collection names
    pub tables: TableNames,
}

impl ScenarioContext {
    /// RFC 3339 timestamp of the run
    pub fn now_iso(&self) -> String {
        self.now.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    fn today(&self) -> String {
        self.now.date_naive().to_string()
    }

}

/// Collection plus every payload the runner sends to it
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceProfile {
    /// Resource class
    pub kind: ResourceKind,
    /// Collection name
    pub table: String,
    /// Insert a non-staff identity must not be able to make
    pub privileged_insert: Value,
    /// Insert a non-staff identity is allowed to make
    pub self_limiting_insert: Value,
    /// Patch a non-staff identity must not be able to apply
    pub non_staff_patch: Value,
    /// Row staff creates for the lifecycle round-trip
    pub staff_insert: Value,
    /// Patch staff applies to its own row
    pub staff_patch: Value,
}

impl ResourceProfile {
    /// Build the profile for `kind`
    pub fn new(kind: ResourceKind, ctx: &ScenarioContext) -> Self {
        let athlete = ctx.athlete_id.as_str();
        let table = kind.table(&ctx.tables).to_string();
        match kind {
            ResourceKind::AccessLog => Self {
                kind,
                table,
                privileged_insert: json!({
                    "athlete_id": athlete,
                    "access_granted": true,
                    "reason_code": "OK",
                    "checked_in_at": ctx.now_iso(),
                }),
                self_limiting_insert: json!({
                    "athlete_id": athlete,
                    "access_granted": false,
                    "reason_code": "PAYMENT_BLOCKED",
                    "rejection_reason": "rls harness denied",
                }),
                non_staff_patch: json!({ "rejection_reason": "should fail" }),
                staff_insert: json!({
                    "athlete_id": athlete,
                    "access_granted": false,
                    "reason_code": "MANUAL_REVIEW",
                    "rejection_reason": "rls harness staff row",
                    "checked_in_at": ctx.now_iso(),
                }),
                staff_patch: json!({ "rejection_reason": "rls harness staff update" }),
            },
            ResourceKind::MonthlyCounter => Self {
                kind,
                table,
                privileged_insert: json!({
                    "athlete_id": athlete,
                    "period_start": PRIVILEGED_PERIOD,
                    "visits_allowed": 999,
                    "visits_used": 0,
                    "is_blocked": false,
                }),
                self_limiting_insert: json!({
                    "athlete_id": athlete,
                    "period_start": SELF_LIMITING_PERIOD,
                    "visits_allowed": 0,
                    "visits_used": 0,
                    "is_blocked": true,
                }),
                non_staff_patch: json!({ "visits_allowed": 999, "is_blocked": false }),
                staff_insert: json!({
                    "athlete_id": athlete,
                    "period_start": STAFF_PERIOD,
                    "visits_allowed": 0,
                    "visits_used": 0,
                    "is_blocked": true,
                }),
                staff_patch: json!({ "visits_used": 1 }),
            },
            ResourceKind::SlotAssignment => Self {
                kind,
                table,
                privileged_insert: json!({
                    "athlete_id": athlete,
                    "weekly_schedule_id": ctx.weekly_schedule_id,
                    "is_active": true,
                    "starts_on": ctx.today(),
                }),
                self_limiting_insert: json!({
                    "athlete_id": athlete,
                    "weekly_schedule_id": ctx.weekly_schedule_id,
                    "is_active": false,
                    "starts_on": ctx.today(),
                    "ends_on": ctx.today(),
                }),
                non_staff_patch: json!({ "is_active": true, "ends_on": null }),
                staff_insert: json!({
                    "athlete_id": athlete,
                    "weekly_schedule_id": ctx.weekly_schedule_id,
                    "is_active": false,
                    "starts_on": ctx.today(),
                    "ends_on": ctx.today(),
                }),
                staff_patch: json!({ "is_active": true }),
            },
        }
    }
}

/// Arguments for the kiosk check-in procedure
///
/// Absent lookup fields are sent as explicit nulls.
pub fn check_in_args(
    dni: Option<&str>,
    phone: Option<&str>,
    now_iso: &str,
    timezone: &str,
) -> Value {
    json!({
        "p_dni": dni,
        "p_phone": phone,
        "p_now": now_iso,
        "p_timezone": timezone,
    })
}

/// Athlete id reported by the check-in procedure
///
/// Accepts a bare object or a single-row array.
pub fn check_in_athlete(payload: &Value) -> Option<String> {
    first_row(payload)
        .and_then(|row| row.get(OWNER_COLUMN))
        .and_then(scalar_to_string)
}

/// Access log the check-in procedure reports having written
pub fn check_in_log_id(payload: &Value) -> Option<RowId> {
    first_row(payload)
        .and_then(|row| row.get(CHECK_IN_LOG_FIELD))
        .and_then(scalar_to_string)
        .map(RowId::new)
}

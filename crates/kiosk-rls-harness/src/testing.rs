//! # In-memory backend for harness tests
//!
//! [`MemoryBackend`] behaves like a correctly configured RLS backend: staff
//! sees and changes everything, non-staff reads nothing, may only insert rows
//! matching a per-table self-service rule, and has its updates and deletes
//! filtered to zero rows. [`Fault`]s break individual policies so tests can
//! prove the harness notices.
//!
//! ```rust,ignore
//! let backend = MemoryBackend::standard().with_fault(Fault::LeakReads("access_logs".into()));
//! let config = testing::config();
//! let report = Harness::new(&backend, &config, &console).run(1, testing::fixed_clock).await?;
//! assert_eq!(report.exit_code(), 1);
//! ```

use crate::backend::{scalar_to_string, Backend, BackendError, DataApi, Filter, OpResult, Select};
use crate::config::{Fixtures, HarnessConfig, TableNames, DEFAULT_TIMEZONE};
use crate::identity::{Credentials, Role};
use crate::resources::{CHECK_IN_PROCEDURE, OWNER_COLUMN};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Staff account registered by [`MemoryBackend::standard`]
pub const STAFF_EMAIL: &str = "staff@gym.test";
/// Non-staff account registered by [`MemoryBackend::standard`]
pub const NON_STAFF_EMAIL: &str = "kiosk@gym.test";
/// Password of both standard accounts
pub const PASSWORD: &str = "correct-horse";
/// Athlete used by [`config`]
pub const ATHLETE_ID: &str = "athlete-0001";
/// Weekly schedule used by [`config`]
pub const WEEKLY_SCHEDULE_ID: &str = "schedule-0001";

/// A deliberately broken policy
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Fault {
    /// Non-staff can read every row of the table
    LeakReads(String),
    /// Non-staff inserts bypass the self-service rule
    AcceptPrivilegedInsert(String),
    /// Non-staff self-service inserts are rejected too
    RejectSelfServiceInsert(String),
    /// Non-staff updates and deletes go through
    AllowNonStaffWrites(String),
    /// Every staff operation on the table is denied
    DenyStaff(String),
    /// Inserts succeed but return no representation
    OmitInsertedRows(String),
    /// Every staff request fails below the API layer
    StaffTransportDown,
    /// The check-in procedure refuses the athlete
    CheckInDenied,
    /// The check-in procedure reports success without writing a log
    CheckInWithoutSideEffect,
}

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<String, (String, Role)>,
    tables: HashMap<String, Vec<Value>>,
    self_service: HashMap<String, (String, Value)>,
    faults: HashSet<Fault>,
    access_log_table: String,
    check_in_athlete: Option<String>,
    next_id: u64,
    calls: Vec<String>,
}

/// In-memory RLS backend
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

impl MemoryBackend {
    /// Empty backend with the self-service rules for the default tables
    pub fn new() -> Self {
        let tables = TableNames::default();
        let backend = Self::default();
        {
            let mut state = backend.lock();
            state.access_log_table = tables.access_logs.clone();
            state
                .self_service
                .insert(tables.access_logs, ("access_granted".to_string(), json!(false)));
            state
                .self_service
                .insert(tables.monthly_counters, ("is_blocked".to_string(), json!(true)));
            state
                .self_service
                .insert(tables.slot_assignments, ("is_active".to_string(), json!(false)));
        }
        backend
    }

    /// Backend with the standard staff and non-staff accounts
    pub fn standard() -> Self {
        Self::new()
            .with_account(STAFF_EMAIL, PASSWORD, Role::Staff)
            .with_account(NON_STAFF_EMAIL, PASSWORD, Role::NonStaff)
            .with_check_in_athlete(ATHLETE_ID)
    }

    /// Register an account
    pub fn with_account(self, email: &str, password: &str, role: Role) -> Self {
        self.lock()
            .accounts
            .insert(email.to_string(), (password.to_string(), role));
        self
    }

    /// Break a policy
    pub fn with_fault(self, fault: Fault) -> Self {
        self.lock().faults.insert(fault);
        self
    }

    /// Athlete the check-in procedure resolves lookups to
    pub fn with_check_in_athlete(self, athlete_id: &str) -> Self {
        self.lock().check_in_athlete = Some(athlete_id.to_string());
        self
    }

    /// Insert a row directly, bypassing policies
    pub fn seed(self, table: &str, row: Value) -> Self {
        {
            let mut state = self.lock();
            let row = state.with_id(row);
            state.tables.entry(table.to_string()).or_default().push(row);
        }
        self
    }

    /// Current rows of `table`
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    /// Every call made so far, as `role op target`
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    type Session = MemorySession;

    async fn sign_in(&self, credentials: &Credentials) -> Result<MemorySession, BackendError> {
        let state = self.lock();
        match state.accounts.get(&credentials.email) {
            Some((password, role)) if *password == credentials.password => Ok(MemorySession {
                role: *role,
                state: self.state.clone(),
            }),
            _ => Err(BackendError::api(400, "Invalid login credentials")),
        }
    }
}

/// Session handed out by [`MemoryBackend`]
#[derive(Debug, Clone)]
pub struct MemorySession {
    role: Role,
    state: Arc<Mutex<State>>,
}

impl MemorySession {
    fn lock(&self, op: &str, target: &str) -> MutexGuard<'_, State> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.calls.push(format!("{} {} {}", self.role, op, target));
        state
    }

    fn staff_gate(&self, state: &State, table: &str) -> Result<(), BackendError> {
        if self.role != Role::Staff {
            return Ok(());
        }
        if state.faults.contains(&Fault::StaffTransportDown) {
            return Err(BackendError::transport("connection refused"));
        }
        if state.faults.contains(&Fault::DenyStaff(table.to_string())) {
            return Err(BackendError::api(
                403,
                format!("permission denied for table {}", table),
            ));
        }
        Ok(())
    }
}

fn rls_violation(table: &str) -> BackendError {
    BackendError::api(
        403,
        format!(
            "new row violates row-level security policy for table \"{}\"",
            table
        ),
    )
}

fn row_matches(row: &Value, filters: &[Filter]) -> bool {
    filters.iter().all(|f| {
        row.get(&f.column)
            .and_then(scalar_to_string)
            .is_some_and(|v| v == f.value)
    })
}

fn compare(a: &Value, b: &Value, column: &str) -> Ordering {
    let key = |row: &Value| row.get(column).and_then(scalar_to_string);
    key(a).cmp(&key(b))
}

impl State {
    fn with_id(&mut self, row: Value) -> Value {
        let mut row = match row {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if !row.contains_key("id") {
            self.next_id += 1;
            row.insert("id".to_string(), json!(format!("row-{:04}", self.next_id)));
        }
        Value::Object(row)
    }

    fn may_self_serve(&self, table: &str, row: &Value) -> bool {
        if self.faults.contains(&Fault::AcceptPrivilegedInsert(table.to_string())) {
            return true;
        }
        if self.faults.contains(&Fault::RejectSelfServiceInsert(table.to_string())) {
            return false;
        }
        self.self_service
            .get(table)
            .is_some_and(|(field, allowed)| row.get(field) == Some(allowed))
    }

    fn insert_row(&mut self, table: &str, row: Value) -> Value {
        let row = self.with_id(row);
        self.tables
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        if self.faults.contains(&Fault::OmitInsertedRows(table.to_string())) {
            json!([])
        } else {
            json!([row])
        }
    }
}

#[async_trait]
impl DataApi for MemorySession {
    async fn select(&self, query: &Select) -> OpResult {
        let state = self.lock("select", &query.table);
        self.staff_gate(&state, &query.table)?;

        let leaks = state.faults.contains(&Fault::LeakReads(query.table.clone()));
        if self.role == Role::NonStaff && !leaks {
            return Ok(json!([]));
        }

        let mut rows: Vec<Value> = state
            .tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row_matches(row, &query.filters))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ordering = compare(a, b, &order.column);
                if order.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(Value::Array(rows))
    }

    async fn insert(&self, table: &str, row: &Value) -> OpResult {
        let mut state = self.lock("insert", table);
        self.staff_gate(&state, table)?;

        if self.role == Role::NonStaff && !state.may_self_serve(table, row) {
            return Err(rls_violation(table));
        }
        Ok(state.insert_row(table, row.clone()))
    }

    async fn update(&self, table: &str, filters: &[Filter], patch: &Value) -> OpResult {
        let mut state = self.lock("update", table);
        self.staff_gate(&state, table)?;

        let writable = self.role == Role::Staff
            || state.faults.contains(&Fault::AllowNonStaffWrites(table.to_string()));
        if !writable {
            return Ok(json!([]));
        }

        let mut updated = Vec::new();
        if let Some(rows) = state.tables.get_mut(table) {
            for row in rows.iter_mut().filter(|row| row_matches(row, filters)) {
                if let (Value::Object(target), Value::Object(changes)) = (&mut *row, patch) {
                    for (key, value) in changes {
                        target.insert(key.clone(), value.clone());
                    }
                }
                updated.push(row.clone());
            }
        }
        Ok(Value::Array(updated))
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> OpResult {
        let mut state = self.lock("delete", table);
        self.staff_gate(&state, table)?;

        let writable = self.role == Role::Staff
            || state.faults.contains(&Fault::AllowNonStaffWrites(table.to_string()));
        if !writable {
            return Ok(json!([]));
        }

        let deleted = match state.tables.get_mut(table) {
            Some(rows) => {
                let (gone, kept): (Vec<Value>, Vec<Value>) =
                    rows.drain(..).partition(|row| row_matches(row, filters));
                *rows = kept;
                gone
            }
            None => Vec::new(),
        };
        Ok(Value::Array(deleted))
    }

    async fn rpc(&self, function: &str, args: &Value) -> OpResult {
        let mut state = self.lock("rpc", function);
        if function != CHECK_IN_PROCEDURE {
            return Err(BackendError::api(
                404,
                format!("Could not find the function public.{}", function),
            ));
        }
        if state.faults.contains(&Fault::CheckInDenied) {
            return Err(BackendError::api(400, "athlete is not allowed to check in"));
        }
        let Some(athlete_id) = state.check_in_athlete.clone() else {
            return Err(BackendError::api(404, "athlete not found"));
        };

        let mut log_id = Value::Null;
        if !state.faults.contains(&Fault::CheckInWithoutSideEffect) {
            let table = state.access_log_table.clone();
            let row = state.with_id(json!({
                OWNER_COLUMN: athlete_id,
                "access_granted": true,
                "reason_code": "OK",
                "checked_in_at": args.get("p_now").cloned().unwrap_or(Value::Null),
                "timezone": args.get("p_timezone").cloned().unwrap_or(Value::Null),
            }));
            log_id = row.get("id").cloned().unwrap_or(Value::Null);
            state.tables.entry(table).or_default().push(row);
        }

        Ok(json!({
            OWNER_COLUMN: athlete_id,
            "access_granted": true,
            "access_log_id": log_id,
        }))
    }
}

/// Configuration pointing at the standard accounts and fixtures
pub fn config() -> HarnessConfig {
    HarnessConfig {
        backend_url: "http://memory.invalid".to_string(),
        api_key: "anon".to_string(),
        staff: Credentials::new(STAFF_EMAIL, PASSWORD),
        non_staff: Credentials::new(NON_STAFF_EMAIL, PASSWORD),
        fixtures: Fixtures {
            athlete_id: ATHLETE_ID.to_string(),
            weekly_schedule_id: WEEKLY_SCHEDULE_ID.to_string(),
            dni: Some("40123456".to_string()),
            phone: None,
        },
        timezone: DEFAULT_TIMEZONE.to_string(),
        tables: TableNames::default(),
    }
}

/// Deterministic run timestamp
pub fn fixed_clock() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

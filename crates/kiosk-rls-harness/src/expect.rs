//! Expectation primitives
//!
//! Each primitive awaits exactly one backend operation, classifies its
//! [`OpResult`], prints one check line, and folds the verdict into the run's
//! [`Tally`]. Nothing escapes a primitive: a backend error is data here.
//!
//! Classification is split from recording so the predicates can be tested
//! without a console or a backend.

use crate::backend::{first_row, row_count, BackendError, OpResult, RowId};
use crate::console::Console;
use crate::runner::Phase;
use crate::tally::{CheckRecord, Tally};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;

/// Result of evaluating one expectation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// The backend behaved as the policy requires
    Pass,
    /// The backend contradicted the policy
    Fail,
    /// A must-succeed operation hit a transport fault; nothing was learned
    /// about the policy
    Inconclusive,
    /// Not executed because a prerequisite step produced no row
    Skipped,
}

impl Verdict {
    /// Marker printed at the start of a check line
    pub fn marker(self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
            Verdict::Inconclusive => "INCONCLUSIVE",
            Verdict::Skipped => "SKIP",
        }
    }

    /// Whether this verdict makes the run unsuccessful
    pub fn is_failure(self) -> bool {
        matches!(self, Verdict::Fail | Verdict::Inconclusive)
    }
}

/// Verdict plus the diagnostic shown next to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Classification
    pub verdict: Verdict,
    /// Error message or description of the observed condition
    pub detail: String,
}

impl Outcome {
    fn new(verdict: Verdict, detail: impl Into<String>) -> Self {
        Self {
            verdict,
            detail: detail.into(),
        }
    }
}

/// PASS on any error or an empty row set
///
/// A filtered-to-nothing result and an explicit denial are equally good proof
/// of isolation, so both pass.
pub fn classify_blocked_or_empty(result: &OpResult) -> Outcome {
    match result {
        Err(err) if err.is_transport() => {
            Outcome::new(Verdict::Pass, format!("blocked (transport): {}", err))
        }
        Err(err) => Outcome::new(Verdict::Pass, format!("blocked: {}", err)),
        Ok(payload) => match row_count(payload) {
            Some(0) => Outcome::new(Verdict::Pass, "empty result"),
            Some(n) => Outcome::new(
                Verdict::Fail,
                format!("expected blocked or empty, got {} row(s)", n),
            ),
            None => Outcome::new(
                Verdict::Fail,
                "expected blocked or empty, got a non-empty payload",
            ),
        },
    }
}

/// PASS only on an explicit error
pub fn classify_error(result: &OpResult) -> Outcome {
    match result {
        Err(err) => Outcome::new(Verdict::Pass, err.to_string()),
        Ok(payload) => {
            let detail = match row_count(payload) {
                Some(n) => format!("expected an error, operation succeeded with {} row(s)", n),
                None => "expected an error, operation succeeded".to_string(),
            };
            Outcome::new(Verdict::Fail, detail)
        }
    }
}

/// PASS on any success; transport faults are inconclusive
pub fn classify_success(result: &OpResult) -> Outcome {
    match result {
        Ok(payload) => match row_count(payload) {
            Some(n) => Outcome::new(Verdict::Pass, format!("ok, {} row(s)", n)),
            None => Outcome::new(Verdict::Pass, "ok"),
        },
        Err(err) => failed_call(err),
    }
}

/// PASS on a success carrying at least one row
pub fn classify_rows(result: &OpResult) -> Outcome {
    match result {
        Ok(payload) => match row_count(payload) {
            Some(0) => Outcome::new(Verdict::Fail, "expected at least one row, got none"),
            Some(n) => Outcome::new(Verdict::Pass, format!("{} row(s)", n)),
            None => Outcome::new(Verdict::Pass, "ok, single object"),
        },
        Err(err) => failed_call(err),
    }
}

/// PASS when the first row was created by the call under test
///
/// The row must differ from `previous`, the newest row seen before the call,
/// and its `time_column` must not predate `not_before`. Timestamps that are
/// missing or not RFC 3339 are not compared.
pub fn classify_new_row(
    result: &OpResult,
    previous: Option<&RowId>,
    time_column: &str,
    not_before: DateTime<Utc>,
) -> Outcome {
    let payload = match result {
        Ok(payload) => payload,
        Err(err) => return failed_call(err),
    };
    let Some(row) = first_row(payload) else {
        return Outcome::new(Verdict::Fail, "expected a new row, got none");
    };

    let id = RowId::from_payload(payload);
    if let (Some(id), Some(previous)) = (&id, previous) {
        if id == previous {
            return Outcome::new(
                Verdict::Fail,
                format!("newest row {} already existed before the call", id),
            );
        }
    }

    let stamp = row
        .get(time_column)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc));
    if let Some(stamp) = stamp {
        if stamp < not_before {
            return Outcome::new(
                Verdict::Fail,
                format!(
                    "newest row has {} {}, before the call at {}",
                    time_column, stamp, not_before
                ),
            );
        }
    }

    match id {
        Some(id) => Outcome::new(Verdict::Pass, format!("new row {}", id)),
        None => Outcome::new(Verdict::Pass, "new row"),
    }
}

fn failed_call(err: &BackendError) -> Outcome {
    if err.is_transport() {
        Outcome::new(Verdict::Inconclusive, err.to_string())
    } else {
        Outcome::new(Verdict::Fail, err.to_string())
    }
}

/// Evaluates expectations and records their verdicts
pub struct Recorder<'a, C: Console + ?Sized> {
    console: &'a C,
    tally: Tally,
    phase: Phase,
    section: String,
}

impl<'a, C: Console + ?Sized> Recorder<'a, C> {
    /// Start recording into an empty tally
    pub fn new(console: &'a C) -> Self {
        Self {
            console,
            tally: Tally::default(),
            phase: Phase::Init,
            section: String::new(),
        }
    }

    /// Attribute subsequent checks to `phase`
    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    /// Start a new section of output
    pub fn section(&mut self, title: impl Into<String>) {
        self.section = title.into();
        self.console.section(&self.section);
    }

    /// Print a free-form line without recording a verdict
    pub fn note(&self, text: &str) {
        self.console.line(text);
    }

    /// Run `op`, expecting an error or an empty row set
    pub async fn expect_blocked_or_empty<F>(&mut self, label: &str, op: F) -> Verdict
    where
        F: Future<Output = OpResult>,
    {
        let result = op.await;
        self.record(label, classify_blocked_or_empty(&result))
    }

    /// Run `op`, expecting an explicit error
    pub async fn expect_error<F>(&mut self, label: &str, op: F) -> Verdict
    where
        F: Future<Output = OpResult>,
    {
        let result = op.await;
        self.record(label, classify_error(&result))
    }

    /// Run `op`, expecting success; the payload is handed back on PASS
    pub async fn expect_success<F>(&mut self, label: &str, op: F) -> Option<Value>
    where
        F: Future<Output = OpResult>,
    {
        let result = op.await;
        let verdict = self.record(label, classify_success(&result));
        match (verdict, result) {
            (Verdict::Pass, Ok(payload)) => Some(payload),
            _ => None,
        }
    }

    /// Run `op`, expecting success with at least one row
    pub async fn expect_rows<F>(&mut self, label: &str, op: F) -> Option<Value>
    where
        F: Future<Output = OpResult>,
    {
        let result = op.await;
        let verdict = self.record(label, classify_rows(&result));
        match (verdict, result) {
            (Verdict::Pass, Ok(payload)) => Some(payload),
            _ => None,
        }
    }

    /// Run `op`, expecting a row that did not exist before `not_before`
    pub async fn expect_new_row<F>(
        &mut self,
        label: &str,
        op: F,
        previous: Option<&RowId>,
        time_column: &str,
        not_before: DateTime<Utc>,
    ) -> Verdict
    where
        F: Future<Output = OpResult>,
    {
        let result = op.await;
        self.record(
            label,
            classify_new_row(&result, previous, time_column, not_before),
        )
    }

    /// Record a check that could not run
    pub fn skip(&mut self, label: &str, reason: &str) {
        self.record(label, Outcome::new(Verdict::Skipped, reason));
    }

    /// Record an already-classified outcome
    pub fn record(&mut self, label: &str, outcome: Outcome) -> Verdict {
        let verdict = outcome.verdict;
        self.console
            .line(&format!("{} {} | {}", verdict.marker(), label, outcome.detail));
        if verdict == Verdict::Fail {
            tracing::debug!("Check failed: {} ({})", label, outcome.detail);
        } else if verdict == Verdict::Inconclusive {
            tracing::warn!("Check inconclusive: {} ({})", label, outcome.detail);
        }
        self.tally.record(CheckRecord {
            phase: self.phase.to_string(),
            section: self.section.clone(),
            label: label.to_string(),
            verdict,
            detail: outcome.detail,
        });
        verdict
    }

    /// Current tally
    pub fn tally(&self) -> &Tally {
        &self.tally
    }

    /// Finish recording
    pub fn into_tally(self) -> Tally {
        self.tally
    }
}

//! Result aggregation
//!
//! A [`Tally`] is owned by one run and folded check by check; it is never
//! shared or reset. [`RunReport`] collects the tallies of every repetition plus
//! the cross-run stability checks and decides the process exit status.

use crate::error::{HarnessError, HarnessResult};
use crate::expect::Verdict;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// One evaluated check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckRecord {
    /// Runner phase the check ran in
    pub phase: String,
    /// Output section (resource and identity)
    pub section: String,
    /// Check label
    pub label: String,
    /// Classification
    pub verdict: Verdict,
    /// Diagnostic detail
    pub detail: String,
}

/// Verdict counts and records for a single run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    records: Vec<CheckRecord>,
    passed: usize,
    failed: usize,
    inconclusive: usize,
    skipped: usize,
}

impl Tally {
    /// Fold one record in
    pub fn record(&mut self, record: CheckRecord) {
        match record.verdict {
            Verdict::Pass => self.passed += 1,
            Verdict::Fail => self.failed += 1,
            Verdict::Inconclusive => self.inconclusive += 1,
            Verdict::Skipped => self.skipped += 1,
        }
        self.records.push(record);
    }

    /// Every record in execution order
    pub fn records(&self) -> &[CheckRecord] {
        &self.records
    }

    /// Number of passing checks
    pub fn passed(&self) -> usize {
        self.passed
    }

    /// Number of failing checks
    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Number of inconclusive checks
    pub fn inconclusive(&self) -> usize {
        self.inconclusive
    }

    /// Number of skipped checks
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Checks that make the run unsuccessful
    pub fn failure_count(&self) -> usize {
        self.failed + self.inconclusive
    }

    /// Verdict per label, for comparing runs
    pub fn classification(&self) -> BTreeMap<&str, Verdict> {
        self.records
            .iter()
            .map(|r| (r.label.as_str(), r.verdict))
            .collect()
    }

    /// Human-readable one-line summary
    pub fn summary(&self) -> String {
        let total = self.records.len();
        let mut line = format!(
            "{} checks: {} passed, {} failed",
            total, self.passed, self.failed
        );
        if self.inconclusive > 0 {
            line.push_str(&format!(", {} inconclusive", self.inconclusive));
        }
        if self.skipped > 0 {
            line.push_str(&format!(", {} skipped", self.skipped));
        }
        line
    }
}

/// Outcome of the whole invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// One tally per repetition
    pub runs: Vec<Tally>,
    /// Cross-run classification checks (empty for a single run)
    pub stability: Tally,
}

impl RunReport {
    /// Failures across every run and the stability checks
    pub fn failure_count(&self) -> usize {
        self.runs.iter().map(Tally::failure_count).sum::<usize>() + self.stability.failure_count()
    }

    /// Process exit status: 0 iff nothing failed
    pub fn exit_code(&self) -> u8 {
        if self.failure_count() == 0 {
            0
        } else {
            1
        }
    }

    /// Final summary line
    pub fn summary(&self) -> String {
        let failures = self.failure_count();
        let status = if failures == 0 {
            "All RLS checks passed".to_string()
        } else {
            format!("{} RLS check(s) failed", failures)
        };
        match self.runs.as_slice() {
            [single] => format!("{} ({})", status, single.summary()),
            runs => format!("{} across {} runs", status, runs.len()),
        }
    }

    /// Write the report as pretty JSON
    pub fn write_json(&self, path: &Path) -> HarnessResult<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| HarnessError::report(path, e))?;
        std::fs::write(path, json).map_err(|e| HarnessError::report(path, e))
    }
}

/// Compare per-label classifications across runs
///
/// Any label whose verdict differs between the first run and a later one
/// yields a failing record.
pub fn compare_runs(runs: &[Tally]) -> Tally {
    let mut stability = Tally::default();
    let Some((baseline, rest)) = runs.split_first() else {
        return stability;
    };
    let expected = baseline.classification();

    for (index, run) in rest.iter().enumerate() {
        let observed = run.classification();
        for (label, verdict) in &expected {
            let (result, detail) = match observed.get(label) {
                Some(other) if other == verdict => continue,
                Some(other) => (
                    Verdict::Fail,
                    format!(
                        "run 1 was {}, run {} was {}",
                        verdict.marker(),
                        index + 2,
                        other.marker()
                    ),
                ),
                None => (
                    Verdict::Fail,
                    format!("check missing from run {}", index + 2),
                ),
            };
            stability.record(CheckRecord {
                phase: "stability".to_string(),
                section: "stability".to_string(),
                label: format!("stable classification: {}", label),
                verdict: result,
                detail,
            });
        }
    }

    if stability.records().is_empty() {
        stability.record(CheckRecord {
            phase: "stability".to_string(),
            section: "stability".to_string(),
            label: "stable classification across runs".to_string(),
            verdict: Verdict::Pass,
            detail: format!("{} runs agree on {} checks", runs.len(), expected.len()),
        });
    }
    stability
}

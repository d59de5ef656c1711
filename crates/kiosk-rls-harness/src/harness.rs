//! Run orchestration
//!
//! Provision both identities, run the matrix, repeat if asked, and fold the
//! tallies into a [`RunReport`].

use crate::backend::Backend;
use crate::config::HarnessConfig;
use crate::console::Console;
use crate::error::HarnessResult;
use crate::identity::provision;
use crate::resources::ScenarioContext;
use crate::runner::{CheckIn, PolicyMatrix};
use crate::tally::{compare_runs, RunReport, Tally};
use chrono::{DateTime, Utc};

/// Drives one or more passes of the policy matrix against a backend
pub struct Harness<'a, B: Backend, C: Console + ?Sized> {
    backend: &'a B,
    config: &'a HarnessConfig,
    console: &'a C,
}

impl<'a, B: Backend, C: Console + ?Sized> Harness<'a, B, C> {
    /// Create a harness
    pub fn new(backend: &'a B, config: &'a HarnessConfig, console: &'a C) -> Self {
        Self {
            backend,
            config,
            console,
        }
    }

    /// Sign in fresh sessions and run the matrix once
    ///
    /// Only a sign-in failure is returned as an error; check failures live in
    /// the tally.
    pub async fn run_once(&self, now: DateTime<Utc>) -> HarnessResult<Tally> {
        let sessions = provision(self.backend, &self.config.staff, &self.config.non_staff).await?;

        let ctx = ScenarioContext {
            athlete_id: self.config.fixtures.athlete_id.clone(),
            weekly_schedule_id: self.config.fixtures.weekly_schedule_id.clone(),
            now,
            tables: self.config.tables.clone(),
        };
        let check_in = CheckIn {
            dni: self.config.fixtures.dni.clone(),
            phone: self.config.fixtures.phone.clone(),
            timezone: self.config.timezone.clone(),
        };

        let tally = PolicyMatrix::new(&sessions, ctx, check_in, self.console)
            .run()
            .await;
        tracing::info!("Run finished: {}", tally.summary());
        Ok(tally)
    }

    /// Run the matrix `repeat` times, each with fresh sessions
    ///
    /// With more than one run the per-check classifications are compared and
    /// any divergence is reported as a failure.
    pub async fn run<F>(&self, repeat: usize, clock: F) -> HarnessResult<RunReport>
    where
        F: Fn() -> DateTime<Utc>,
    {
        let repeat = repeat.max(1);
        let mut report = RunReport::default();

        for index in 0..repeat {
            if repeat > 1 {
                self.console.section(&format!("run {} of {}", index + 1, repeat));
            }
            report.runs.push(self.run_once(clock()).await?);
        }

        if repeat > 1 {
            self.console.section("stability");
            let stability = compare_runs(&report.runs);
            for record in stability.records() {
                self.console.line(&format!(
                    "{} {} | {}",
                    record.verdict.marker(),
                    record.label,
                    record.detail
                ));
            }
            report.stability = stability;
        }

        self.console.line("");
        self.console.line(&report.summary());
        Ok(report)
    }
}

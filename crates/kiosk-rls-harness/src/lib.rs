//! # Kiosk RLS Harness
//!
//! Verifies the row-level security contract of the gym backend from the
//! outside. Two identities are signed in (staff and the non-staff kiosk
//! account) and a fixed, ordered matrix of reads and writes is issued against
//! every protected collection:
//!
//! - non-staff reads are blocked or come back empty
//! - non-staff may insert rows that only record a negative outcome, never rows
//!   that grant access
//! - non-staff updates and deletes never touch a row, including its own
//! - staff can read, insert, update, and delete, proven by a full round-trip
//!
//! The run closes with the kiosk check-in workflow: the non-staff identity
//! calls the `kiosk_check_in` procedure and staff must see the resulting
//! access log.
//!
//! Every check is evaluated, even after a failure. The process exits with 0
//! only when nothing failed.
//!
//! ## Layout
//!
//! - [`backend`]: the [`backend::Backend`]/[`backend::DataApi`] seam and its REST implementation
//! - [`identity`]: sign-in of both identities
//! - [`expect`]: expectation primitives and verdicts
//! - [`runner`]: the phase-ordered policy matrix
//! - [`tally`]: aggregation, stability comparison, exit status
//! - [`harness`]: orchestration of one or more runs
//! - `testing`: an in-memory RLS backend for tests (`testing` feature)

pub mod backend;
pub mod config;
pub mod console;
pub mod error;
pub mod expect;
pub mod harness;
pub mod identity;
pub mod resources;
pub mod runner;
pub mod tally;

// In-memory backend for deterministic harness tests
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backend::{Backend, BackendError, DataApi, OpResult, RestBackend};
pub use config::{ConfigError, HarnessConfig, RawConfig};
pub use console::{CapturedConsole, Console, StdoutConsole};
pub use error::{HarnessError, HarnessResult, ReportError};
pub use expect::Verdict;
pub use harness::Harness;
pub use identity::{Credentials, Role};
pub use tally::{CheckRecord, RunReport, Tally};

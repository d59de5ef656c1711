//! Error types for the harness
//!
//! Only two error paths end a run early: configuration problems and a failed
//! sign-in. Everything that happens once both sessions exist is folded into
//! check verdicts instead of being returned as an error.

use crate::backend::BackendError;
use crate::config::ConfigError;
use crate::identity::Role;
use std::path::Path;

/// Fatal errors that abort the harness before or outside the check matrix
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Required configuration is missing or malformed
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// One of the two identities could not sign in
    #[error("{role} sign-in failed: {source}")]
    Authentication {
        /// Which identity failed
        role: Role,
        /// Backend error returned by the auth endpoint
        #[source]
        source: BackendError,
    },

    /// The run report could not be written
    #[error("Failed to write report {path}: {source}")]
    Report {
        /// Report destination
        path: String,
        /// Serialization or I/O failure
        #[source]
        source: ReportError,
    },
}

/// Why a run report could not be produced
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// The report could not be rendered as JSON
    #[error("serialization failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// The rendered report could not be stored
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Create an authentication error for the given identity
    pub fn authentication(role: Role, source: BackendError) -> Self {
        Self::Authentication { role, source }
    }

    /// Create a report error for the given destination
    pub fn report(path: &Path, source: impl Into<ReportError>) -> Self {
        Self::Report {
            path: path.display().to_string(),
            source: source.into(),
        }
    }
}

/// Result type for fatal harness operations
pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

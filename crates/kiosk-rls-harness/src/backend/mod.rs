//! Backend seam
//!
//! The harness only ever talks to the data store through [`Backend`] (sign-in)
//! and [`DataApi`] (one authenticated session). Every operation resolves to an
//! [`OpResult`]: the backend's JSON payload, or a [`BackendError`]. Transport
//! failures are folded into the same tagged result at the adapter so the
//! expectation primitives never deal with panics or client-specific errors.

pub mod rest;

use crate::identity::Credentials;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

pub use rest::{RestBackend, RestSession};

/// Normalized outcome of a single backend call
pub type OpResult = Result<Value, BackendError>;

/// Error surfaced by the backend or the transport underneath it
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The backend answered with a non-success status
    #[error("HTTP {status}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Message extracted from the response body
        message: String,
    },

    /// The request never produced a response (DNS, TLS, connection reset)
    #[error("Transport error: {message}")]
    Transport {
        /// Error message describing the transport failure
        message: String,
    },

    /// The response could not be decoded
    #[error("Decode error: {message}")]
    Decode {
        /// Error message describing the decoding failure
        message: String,
    },
}

impl BackendError {
    /// Create an API error
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Whether the failure happened below the authorization layer
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

/// Equality filter on a single column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    /// Column name
    pub column: String,
    /// Value the column must equal
    pub value: String,
}

impl Filter {
    /// `column = value`
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Filter on the `id` primary key
    pub fn id(id: &RowId) -> Self {
        Self::eq("id", id.as_str())
    }
}

/// Descending or ascending ordering on one column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    /// Column name
    pub column: String,
    /// Sort newest/highest first
    pub descending: bool,
}

/// A read against one collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Select {
    /// Collection name
    pub table: String,
    /// Equality filters, all of which must hold
    pub filters: Vec<Filter>,
    /// Optional ordering
    pub order: Option<Order>,
    /// Optional row limit
    pub limit: Option<usize>,
}

impl Select {
    /// Select every visible row of `table`
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    /// Add an equality filter
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push(Filter::eq(column, value));
        self
    }

    /// Order by `column` descending
    pub fn order_desc(mut self, column: impl Into<String>) -> Self {
        self.order = Some(Order {
            column: column.into(),
            descending: true,
        });
        self
    }

    /// Return at most `limit` rows
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Primary key of a row as returned by the backend
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowId(String);

impl RowId {
    /// Wrap a raw identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extract the `id` of the first row of a payload
    ///
    /// Accepts either a row array (table writes) or a bare object.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        first_row(payload)
            .and_then(|row| row.get("id"))
            .and_then(scalar_to_string)
            .map(Self)
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// First object in a payload: the first array element, or the payload itself
pub fn first_row(payload: &Value) -> Option<&Value> {
    match payload {
        Value::Array(rows) => rows.first(),
        Value::Object(_) => Some(payload),
        _ => None,
    }
}

/// Number of rows a payload carries, if it is a row set
///
/// `null` (an empty body) counts as zero rows.
pub fn row_count(payload: &Value) -> Option<usize> {
    match payload {
        Value::Array(rows) => Some(rows.len()),
        Value::Null => Some(0),
        _ => None,
    }
}

/// Render a JSON scalar the way it would appear in a filter
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// One authenticated session against the data API
#[async_trait]
pub trait DataApi: Send + Sync {
    /// Read rows
    async fn select(&self, query: &Select) -> OpResult;

    /// Insert one row, returning the inserted representation
    async fn insert(&self, table: &str, row: &Value) -> OpResult;

    /// Patch every row matching `filters`, returning the updated rows
    async fn update(&self, table: &str, filters: &[Filter], patch: &Value) -> OpResult;

    /// Delete every row matching `filters`, returning the deleted rows
    async fn delete(&self, table: &str, filters: &[Filter]) -> OpResult;

    /// Invoke a remote procedure
    async fn rpc(&self, function: &str, args: &Value) -> OpResult;
}

/// Sign-in entry point producing sessions
#[async_trait]
pub trait Backend: Send + Sync {
    /// Session type handed out after a successful sign-in
    type Session: DataApi;

    /// Authenticate with email and password
    async fn sign_in(&self, credentials: &Credentials) -> Result<Self::Session, BackendError>;
}

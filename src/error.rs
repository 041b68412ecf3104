//! Engine Error Types
//!
//! Two error families: [`QueryError`] for everything a caller can trigger
//! through the query interface, [`StorageError`] for ingest-time failures.
//! Violated internal invariants are not errors; they panic with file/line.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced to the query caller.
///
/// Each variant maps to a wire-level error kind via [`QueryError::kind`];
/// the `Display` implementation carries the user-facing message.
#[derive(Error, Debug)]
pub enum QueryError {
    /// Request is structurally valid but semantically unusable
    #[error("{0}")]
    BadRequest(String),

    /// Malformed query JSON (unknown field, type mismatch, missing field)
    #[error("{0}")]
    QueryParse(String),

    /// Filter or action references a column the schema does not declare
    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    /// Filter or action references an undeclared sequence
    #[error("unknown sequence '{0}'")]
    UnknownSequence(String),

    /// Regex in a search filter failed to compile
    #[error("invalid regex '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },

    /// Position or numeric value outside the permitted range
    #[error("{0}")]
    OutOfRange(String),

    /// Query exceeded its wall-clock deadline
    #[error("query exceeded the deadline of {0:?}")]
    Timeout(Duration),

    /// Unexpected engine-side failure (e.g. corrupted blob column)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Wire-level error kinds, as emitted in error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    QueryParse,
    UnknownColumn,
    UnknownSequence,
    InvalidRegex,
    OutOfRange,
    Timeout,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "BadRequest",
            ErrorKind::QueryParse => "QueryParse",
            ErrorKind::UnknownColumn => "UnknownColumn",
            ErrorKind::UnknownSequence => "UnknownSequence",
            ErrorKind::InvalidRegex => "InvalidRegex",
            ErrorKind::OutOfRange => "OutOfRange",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Internal => "Internal",
        }
    }
}

impl QueryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::BadRequest(_) => ErrorKind::BadRequest,
            QueryError::QueryParse(_) => ErrorKind::QueryParse,
            QueryError::UnknownColumn(_) => ErrorKind::UnknownColumn,
            QueryError::UnknownSequence(_) => ErrorKind::UnknownSequence,
            QueryError::InvalidRegex { .. } => ErrorKind::InvalidRegex,
            QueryError::OutOfRange(_) => ErrorKind::OutOfRange,
            QueryError::Timeout(_) => ErrorKind::Timeout,
            QueryError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller is at fault (4xx-equivalent) or the engine (5xx).
    pub fn is_client_error(&self) -> bool {
        !matches!(self, QueryError::Timeout(_) | QueryError::Internal(_))
    }

    /// Serialize into the `{kind, message}` error response body.
    pub fn to_response_json(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": self.kind().as_str(),
            "message": self.to_string(),
        })
    }
}

/// Errors raised while bulk-building a table.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Record value does not match the declared column type
    #[error("column '{column}' expects {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// Record targets a column the schema does not declare
    #[error("schema does not declare column '{0}'")]
    UndeclaredColumn(String),

    /// Record targets a sequence the schema does not declare
    #[error("schema does not declare sequence '{0}'")]
    UndeclaredSequence(String),

    /// Aligned sequence length differs from the reference length
    #[error("sequence '{sequence}' has length {actual}, reference has length {expected}")]
    LengthMismatch {
        sequence: String,
        expected: usize,
        actual: usize,
    },

    /// Sequence contains a character outside its alphabet
    #[error("sequence '{sequence}' contains illegal character '{character}'")]
    IllegalCharacter { sequence: String, character: char },

    /// Insertion entry is not of the form `position:symbols`
    #[error("malformed insertion entry '{0}'")]
    MalformedInsertion(String),

    /// Date string failed to parse as `YYYY-MM-DD`
    #[error("invalid date '{0}'")]
    InvalidDate(String),

    /// Lineage value does not resolve against the lineage tree
    #[error("unknown lineage '{0}'")]
    UnknownLineage(String),

    /// Schema declares a lineage column but no lineage tree was provided
    #[error("schema declares lineage column '{0}' but no lineage tree was loaded")]
    MissingLineageTree(String),

    /// Schema references a sequence with no reference genome entry
    #[error("no reference declared for sequence '{0}'")]
    MissingReference(String),

    /// I/O error while reading a definition file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while reading the reference genome file
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

//! Error types for the Ferry engine.

use crate::{conflict::Conflict, CollectionName, RecordKey, Seq};
use serde::Serialize;
use thiserror::Error;

/// Broad classification of an [`Error`], used to decide propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Durable medium failed or is corrupted.
    Storage,
    /// Operation queue capacity exceeded.
    FullQueue,
    /// Version mismatch on push or ambiguous merge on pull.
    Conflict,
    /// Network or remote unavailable.
    Transport,
    /// Malformed endpoint or schema, unregistered collection.
    Configuration,
    /// Caller supplied an invalid mutation.
    Validation,
    /// Attempt cancelled between steps.
    Cancelled,
}

/// All possible errors from the Ferry engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    // Taxonomy errors
    #[error("storage error: {0}")]
    Storage(String),

    #[error("operation queue is full (capacity {capacity})")]
    FullQueue { capacity: usize },

    #[error("conflict on {}/{} (operation {})", .0.collection, .0.key, .0.seq)]
    Conflict(Box<Conflict>),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("collection not registered: {0}")]
    UnregisteredCollection(CollectionName),

    // Validation errors
    #[error("record not found: {0}")]
    RecordNotFound(RecordKey),

    #[error("record already exists: {0}")]
    RecordAlreadyExists(RecordKey),

    #[error("operation on deleted record: {0}")]
    OperationOnDeleted(RecordKey),

    #[error("operation not found: {0}")]
    OperationNotFound(Seq),

    #[error("operation {seq} is {status}, expected {expected}")]
    InvalidStatus {
        seq: Seq,
        status: String,
        expected: String,
    },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("sync attempt cancelled")]
    Cancelled,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Storage(_) => ErrorKind::Storage,
            Error::FullQueue { .. } => ErrorKind::FullQueue,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Transport(_) => ErrorKind::Transport,
            Error::Configuration(_) | Error::UnregisteredCollection(_) => {
                ErrorKind::Configuration
            }
            Error::Cancelled => ErrorKind::Cancelled,
            Error::RecordNotFound(_)
            | Error::RecordAlreadyExists(_)
            | Error::OperationOnDeleted(_)
            | Error::OperationNotFound(_)
            | Error::InvalidStatus { .. }
            | Error::InvalidPayload(_)
            | Error::MissingRequiredField(_)
            | Error::TypeMismatch { .. } => ErrorKind::Validation,
        }
    }

    /// Only transport failures are safe to retry wholesale.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// The conflict detail, if this is a conflict error.
    pub fn conflict(&self) -> Option<&Conflict> {
        match self {
            Error::Conflict(conflict) => Some(conflict),
            _ => None,
        }
    }
}

impl From<Conflict> for Error {
    fn from(conflict: Conflict) -> Self {
        Error::Conflict(Box::new(conflict))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::UnregisteredCollection("todos".into());
        assert_eq!(err.to_string(), "collection not registered: todos");

        let err = Error::FullQueue { capacity: 8 };
        assert_eq!(err.to_string(), "operation queue is full (capacity 8)");

        let err = Error::TypeMismatch {
            field: "complete".into(),
            expected: "bool".into(),
            got: "string".into(),
        };
        assert_eq!(
            err.to_string(),
            "type mismatch for field 'complete': expected bool, got string"
        );
    }

    #[test]
    fn classification() {
        assert_eq!(Error::Storage("disk".into()).kind(), ErrorKind::Storage);
        assert_eq!(
            Error::UnregisteredCollection("x".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            Error::RecordNotFound("1".into()).kind(),
            ErrorKind::Validation
        );

        assert!(Error::Transport("timeout".into()).is_retryable());
        assert!(!Error::Storage("disk".into()).is_retryable());
        assert!(!Error::Configuration("bad url".into()).is_retryable());
    }
}

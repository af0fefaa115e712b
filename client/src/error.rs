//! Mapping of IO-layer failures onto the engine's error taxonomy.

use ferry_engine::Error;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classify a database failure. Every sqlx error is a storage failure.
pub(crate) fn storage(err: sqlx::Error) -> Error {
    Error::Storage(err.to_string())
}

/// Classify an HTTP failure.
///
/// Builder and URL problems are configuration mistakes and must not be
/// retried; everything else is a transport failure.
pub(crate) fn transport(err: reqwest::Error) -> Error {
    if err.is_builder() {
        Error::Configuration(err.to_string())
    } else {
        Error::Transport(err.to_string())
    }
}

/// A persisted row that no longer decodes is corruption, not a caller error.
pub(crate) fn corrupt(what: &str, err: serde_json::Error) -> Error {
    Error::Storage(format!("corrupt {what}: {err}"))
}

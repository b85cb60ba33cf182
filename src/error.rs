//! Application-wide error types.
//!
//! One enum covers the whole service; the api layer owns the mapping from
//! variant to HTTP status (see [`crate::api`]).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed or out-of-range request parameters. Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing or wrong `X-API-Key` on a protected route.
    #[error("auth error: {0}")]
    Auth(String),

    /// Ingest hit an existing document id with `upsert=false`.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Delete or lookup on an id the index does not hold.
    #[error("not found: {0}")]
    NotFound(String),

    /// The embedding backend could not produce a result.
    #[error("embedding backend unavailable: {0}")]
    ModelUnavailable(String),

    /// A snapshot on disk was malformed; in-memory state is left untouched.
    #[error("corrupt state: {0}")]
    CorruptState(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

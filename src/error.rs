use std::io;
use thiserror::Error;

/// Crate-wide error type. Every fallible public operation returns [`Result`]
/// with this error, except the two outcomes the spec treats as ordinary
/// control flow (not-found, missing id) — dispatch reports those as
/// `Ok(false)` / `Ok(None)`, never as an error.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("filter is not a valid predicate document")]
    FilterInvalid,

    #[error("no matching record")]
    NotFound,

    #[error("record has no id")]
    MissingId,

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

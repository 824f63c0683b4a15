//! Error taxonomy for the hub.
//!
//! Validation errors are caused by the device, storage/query errors by the
//! infrastructure, delivery errors by a single viewer. Only the first two ever
//! reach a caller of `submit`.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("payload must be a JSON object")]
    NotAnObject,

    #[error("missing sensor field '{0}'")]
    MissingField(&'static str),

    #[error("sensor field '{0}' is not a number")]
    NotNumeric(&'static str),

    #[error("sensor field '{field}' = {value} is outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode reading: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("corrupt record at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("storage operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Failure delivering to one subscriber. Logged, never propagated.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("subscriber queue full, reading dropped")]
    QueueFull,

    #[error("subscriber disconnected")]
    Disconnected,

    #[error("send to subscriber timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to encode live event: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("subscriber limit of {0} reached")]
    LimitReached(usize),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("history query failed: {0}")]
    Storage(#[from] StorageError),
}

/// Why a submitted reading was not accepted.
#[derive(Debug, Error)]
pub enum Rejection {
    #[error("{0}")]
    BadRequest(#[from] ValidationError),

    #[error("internal error: {0}")]
    InternalError(#[from] StorageError),
}

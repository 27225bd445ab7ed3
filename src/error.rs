//! Error vocabulary for the monitor.
//!
//! Only `FetchError` ends a poll cycle early. Strategy errors are absorbed by
//! the extractor cascade and notification errors are logged by the pipeline.

use thiserror::Error;

/// A single failed HTTP attempt.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// All retries for a URL were exhausted.
#[derive(Debug, Error)]
#[error("GET {url} failed after {attempts} attempt(s)")]
pub struct FetchError {
    pub url: String,
    pub attempts: u32,
    #[source]
    pub last: AttemptError,
}

/// Why a single extraction strategy rejected a document.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("no candidate data found")]
    NotFound,

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` has unexpected shape: {message}")]
    Shape { field: &'static str, message: String },

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("secondary request failed: {0}")]
    Fetch(#[from] FetchError),
}

impl StrategyError {
    pub fn shape(field: &'static str, message: impl Into<String>) -> Self {
        Self::Shape {
            field,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("booking window starts {start} after it ends {end}")]
    InvertedWindow {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid mail address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("could not build message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// Failure of a whole poll cycle.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("poll cycle panicked: {0}")]
    Panicked(String),
}

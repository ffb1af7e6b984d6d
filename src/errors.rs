//! Error taxonomy shared by every component.
//!
//! The engine never lets callers guess whether an error is retryable —
//! every fallible operation returns (or is mapped into) one of the three
//! variants below, and the Retry & Backoff Policy and Flow Scheduler switch
//! on the variant instead of inspecting error messages.

use thiserror::Error;

/// Engine-wide error type.
///
/// `Terminal` and `Retryable` carry a human-readable reason (surfaced to
/// `Task.last_error` on final failure). `Cancelled` has no reason: it means
/// the scheduler's cancel signal fired during this attempt. `Internal`
/// marks a consistency violation the engine cannot reason its way out of
/// (e.g. an idempotent upsert race that still finds zero rows after a
/// unique-constraint conflict) and is always terminal.
#[derive(Debug, Error, Clone)]
pub enum EngineError {
    #[error("{reason}")]
    Terminal { reason: String },

    #[error("{reason}")]
    Retryable { reason: String },

    #[error("cancelled")]
    Cancelled,

    #[error("internal consistency error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn terminal(reason: impl Into<String>) -> Self {
        EngineError::Terminal { reason: reason.into() }
    }

    pub fn retryable(reason: impl Into<String>) -> Self {
        EngineError::Retryable { reason: reason.into() }
    }

    /// Whether the Retry & Backoff Policy should ever consider retrying this
    /// error, independent of the attempts-made counter.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Retryable { .. })
    }

    pub fn reason(&self) -> String {
        match self {
            EngineError::Terminal { reason } | EngineError::Retryable { reason } => reason.clone(),
            EngineError::Cancelled => "cancelled".to_string(),
            EngineError::Internal(reason) => reason.clone(),
        }
    }
}

impl From<reqwest::Error> for EngineError {
    /// Transport-level failures (connect/timeout/decode) are retryable;
    /// an HTTP status in the 4xx range is classified terminal.
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            if status.is_client_error() {
                return EngineError::terminal(format!("provider rejected request: {err}"));
            }
        }
        EngineError::retryable(format!("transport error: {err}"))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            NotFound => EngineError::terminal(format!("not found: {err}")),
            PermissionDenied => EngineError::terminal(format!("permission denied: {err}")),
            _ => EngineError::retryable(format!("io error: {err}")),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::terminal(format!("invalid payload: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

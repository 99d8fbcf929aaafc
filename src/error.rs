use thiserror::Error;

/// Path tracker error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("Session already running")]
    AlreadyRunning,

    #[error("Session not running")]
    NotRunning,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Summary handoff error: {0}")]
    Handoff(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Feed error: {0}")]
    Feed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;

impl From<rusqlite::Error> for TrackerError {
    fn from(err: rusqlite::Error) -> Self {
        TrackerError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(err: serde_json::Error) -> Self {
        TrackerError::Handoff(err.to_string())
    }
}

impl From<tokio::task::JoinError> for TrackerError {
    fn from(err: tokio::task::JoinError) -> Self {
        TrackerError::Internal(format!("Background task failed: {}", err))
    }
}

/// Lock poisoning is reported as an internal error rather than a panic
pub(crate) fn lock_poisoned(what: &str) -> TrackerError {
    TrackerError::Internal(format!("Failed to acquire {} lock", what))
}

impl TrackerError {
    /// Whether the caller can reasonably retry (storage hiccups), as opposed
    /// to a programming error in the command sequence.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TrackerError::Storage(_) | TrackerError::Feed(_))
    }
}

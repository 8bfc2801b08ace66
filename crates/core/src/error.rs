//! Error types for adbwire-core

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// `FAIL` answer to a daemon service request
    #[error("Daemon request failed: {0}")]
    DaemonFail(String),

    /// `FAIL` answer to a sync sub-operation
    #[error("Sync request failed: {0}")]
    SyncFail(String),

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl CoreError {
    /// Timeout error for an elapsed `Duration`
    pub fn timeout(after: std::time::Duration) -> Self {
        CoreError::Timeout(after.as_millis() as u64)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CoreError::Timeout(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoreError::Cancelled(_))
    }

    /// Errors raised before any I/O takes place
    pub fn is_validation(&self) -> bool {
        matches!(self, CoreError::InvalidArgument(_))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, CoreError>;

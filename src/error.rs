//! Error types for SeenDB.
//!
//! All errors are strongly typed using thiserror. Domain outcomes such as an
//! ambiguous or never-seen name are *not* errors; they are variants of
//! [`QueryStatus`](crate::service::QueryStatus).

use thiserror::Error;

use crate::remote::LookupError;
use crate::storage::StorageError;

/// Configuration errors raised by `validate()` or while loading a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Field '{field}' is invalid: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },

    #[error("Failed to read config file '{path}': {message}")]
    Read {
        path: String,
        message: String,
    },

    #[error("Failed to parse config: {message}")]
    Parse {
        message: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors raised by the asynchronous runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Queue full on path '{path}' (capacity {capacity})")]
    QueueFull {
        path: String,
        capacity: usize,
    },

    #[error("Worker pool '{path}' disconnected")]
    Disconnected {
        path: String,
    },

    #[error("Timed out after {duration_ms}ms waiting for a result")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Failed to spawn worker thread '{name}': {message}")]
    Spawn {
        name: String,
        message: String,
    },
}

/// Top-level error type for SeenDB.
#[derive(Debug, Error)]
pub enum SeenError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Remote lookup failed: {0}")]
    RemoteLookup(#[from] LookupError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl SeenError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a storage error.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => matches!(e, StorageError::Unavailable(_)),
            Self::RemoteLookup(e) => matches!(
                e,
                LookupError::Transport { .. } | LookupError::Timeout { .. }
            ),
            Self::Runtime(e) => matches!(e, RuntimeError::QueueFull { .. } | RuntimeError::Timeout { .. }),
            Self::Config(_) | Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for SeenDB operations.
pub type SeenResult<T> = Result<T, SeenError>;

//! Error types shared by the transfer, storage and queue layers

use crate::db::DownloadStatus;
use thiserror::Error;

/// Failure reported by a single transfer attempt.
///
/// The executor only classifies; whether a failure is retried is decided by
/// the queue manager through [`crate::download::RetryPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// Network or server-side failure that may succeed on retry
    #[error("{0}")]
    Transient(String),

    /// Protocol or client error that will not succeed on retry
    #[error("{0}")]
    Terminal(String),

    /// Local disk failure (full disk, permission denied, ...)
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<reqwest::Error> for TransferError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() || err.is_redirect() {
            return Self::Terminal(err.to_string());
        }
        if let Some(status) = err.status() {
            return crate::download::classify_status(status.as_u16(), err.to_string());
        }
        // Timeouts, resets, refused connections and truncated bodies
        Self::Transient(err.to_string())
    }
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Errors raised by a [`crate::db::Store`] implementation
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store cannot be reached or refused the write
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A persisted record could not be decoded
    #[error("corrupt record {id}: {message}")]
    Corrupt { id: String, message: String },

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Errors returned by [`crate::download::DownloadManager`] operations
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("download not found: {0}")]
    NotFound(String),

    #[error("cannot {action} a download that is {status}")]
    InvalidState {
        action: &'static str,
        status: DownloadStatus,
    },

    /// A settings value was rejected before being applied
    #[error("invalid setting: {0}")]
    Configuration(String),

    #[error("manager is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type Result<T> = std::result::Result<T, ManagerError>;

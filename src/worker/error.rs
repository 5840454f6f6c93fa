//! Worker-specific error types.

use std::io;
use thiserror::Error;

use super::protocol::ErrorInfo;
use crate::config::{SettingsError, StoragePathError};

/// Result type for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors that can occur during worker communication.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Failed to spawn the worker thread.
    #[error("failed to spawn worker: {0}")]
    SpawnFailed(#[source] io::Error),

    /// The transport no longer accepts requests.
    #[error("worker transport is closed")]
    TransportClosed,

    /// Response channel was closed before a reply arrived.
    #[error("response channel closed unexpectedly")]
    ChannelClosed,

    /// The worker stopped emitting responses.
    #[error("worker exited unexpectedly")]
    WorkerExited,

    /// The worker reported that the operation failed.
    #[error("worker error: {message} (code: {code})")]
    Execution {
        /// Error code from worker.
        code: String,
        /// Error message from worker.
        message: String,
    },

    /// A reply of the wrong kind arrived for a request.
    #[error("protocol error: expected {expected} response, received {received}")]
    UnexpectedResponse {
        expected: &'static str,
        received: &'static str,
    },

    /// The client has been destroyed.
    #[error("worker client has been destroyed")]
    Destroyed,

    /// The database path cannot be decomposed into directories and a file name.
    #[error("invalid database path: {0}")]
    InvalidDatabasePath(#[from] StoragePathError),

    /// A correlation key collided with a pending request.
    #[error("correlation key already pending: {0}")]
    DuplicateQueryKey(String),

    /// Settings could not be resolved.
    #[error("invalid settings: {0}")]
    Settings(#[from] SettingsError),

    /// Failed to read a database image from disk.
    #[error("failed to read database file: {0}")]
    ReadFailed(#[source] io::Error),
}

impl WorkerError {
    /// Create an execution error from a worker error value.
    pub fn execution(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Check if this error indicates the worker has exited.
    pub fn is_worker_exited(&self) -> bool {
        matches!(
            self,
            Self::WorkerExited | Self::ChannelClosed | Self::TransportClosed
        )
    }

    /// Check if this error was reported by the worker itself.
    pub fn is_execution(&self) -> bool {
        matches!(self, Self::Execution { .. })
    }
}

impl From<ErrorInfo> for WorkerError {
    fn from(info: ErrorInfo) -> Self {
        Self::Execution {
            code: info.code,
            message: info.message,
        }
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for WorkerError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Self::ChannelClosed
    }
}

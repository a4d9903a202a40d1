//! Error types for bridge operations.

use std::fmt;

use thiserror::Error;

/// Errors surfaced to a script at the suspension point of an operation.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Underlying socket I/O failure.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    /// Malformed frame or message from the transport.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Operation not permitted in the current state.
    #[error("state error: {0}")]
    State(#[from] StateError),
    /// The worker pool refused the operation.
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),
    /// The owning execution context was cancelled.
    #[error("execution context cancelled")]
    Cancelled,
    /// The scheduled operation panicked on its worker.
    #[error("operation panicked: {0}")]
    Panicked(String),
}

/// Misuse of a connection, guard, or deferred handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StateError {
    /// Read or write attempted on a closing or closed connection.
    #[error("connection closed")]
    ConnectionClosed,
    /// `close()` called on a connection that is already closing or closed.
    #[error("connection already closed")]
    AlreadyClosed,
    /// A second read was issued before the first completed.
    #[error("read already in progress")]
    ReadInProgress,
    /// A second write was issued before the first completed.
    #[error("write already in progress")]
    WriteInProgress,
    /// More releases than successful acquires on a resource guard.
    #[error("resource guard released more times than acquired")]
    GuardOverRelease,
    /// The deferred result was already handed to the script.
    #[error("deferred result already consumed")]
    AlreadyConsumed,
    /// A context waited on a deferred result created by another context.
    #[error("deferred result belongs to another execution context")]
    ForeignDeferred,
}

/// Errors that can occur when using an `AsyncPool`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The job queue is full; no more work can be accepted right now.
    QueueFull,

    /// The pool has been shut down.
    PoolShutdown,

    /// Configuration validation failed.
    InvalidConfig(String),

    /// Internal error (thread spawn failure, channel closed, etc.).
    Internal(String),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "job queue is full"),
            Self::PoolShutdown => write!(f, "pool has been shut down"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for PoolError {}

impl BridgeError {
    /// Shorthand for a protocol error with a message.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// True if this error means the operation hit a connection/guard state violation.
    #[must_use]
    pub const fn is_state(&self) -> bool {
        matches!(self, Self::State(_))
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_error_display() {
        assert_eq!(PoolError::QueueFull.to_string(), "job queue is full");
        assert_eq!(PoolError::PoolShutdown.to_string(), "pool has been shut down");
        assert_eq!(
            PoolError::InvalidConfig("worker_count must be greater than 0".into()).to_string(),
            "invalid configuration: worker_count must be greater than 0"
        );
    }

    #[test]
    fn test_state_error_wraps() {
        let err: BridgeError = StateError::AlreadyClosed.into();
        assert!(err.is_state());
        assert_eq!(err.to_string(), "state error: connection already closed");
    }

    #[test]
    fn test_transport_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer reset");
        let err: BridgeError = io.into();
        assert!(matches!(err, BridgeError::Transport(_)));
        assert!(!err.is_state());
    }
}

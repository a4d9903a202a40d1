//! Tests for error types

use distress_bridge::core::{BridgeError, PoolError, StateError};

#[test]
fn test_state_error_messages() {
    assert_eq!(StateError::ConnectionClosed.to_string(), "connection closed");
    assert_eq!(StateError::ReadInProgress.to_string(), "read already in progress");
    assert_eq!(StateError::WriteInProgress.to_string(), "write already in progress");
    assert_eq!(
        StateError::GuardOverRelease.to_string(),
        "resource guard released more times than acquired"
    );
}

#[test]
fn test_pool_error_wraps_into_bridge_error() {
    let err: BridgeError = PoolError::QueueFull.into();
    assert_eq!(err.to_string(), "pool error: job queue is full");
    assert!(!err.is_state());
}

#[test]
fn test_protocol_and_cancel_messages() {
    assert_eq!(
        BridgeError::protocol("bad opcode").to_string(),
        "protocol error: bad opcode"
    );
    assert_eq!(BridgeError::Cancelled.to_string(), "execution context cancelled");
}

#[test]
fn test_bridge_error_converts_to_anyhow() {
    let err: anyhow::Error = BridgeError::from(StateError::AlreadyClosed).into();
    assert!(err.to_string().contains("already closed"));
}

//! Tests for utility functions

use distress_bridge::util::{init_tracing, init_tracing_with};

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
    init_tracing_with("debug");
    tracing::info!("logging initialised");
}

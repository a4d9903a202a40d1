//! Tests for runtime builders

use distress_bridge::builders::{build_guards, RuntimeBuilder};
use distress_bridge::config::{BridgeConfig, GuardConfig, TelemetrySinkConfig};
use distress_bridge::core::PoolError;
use distress_bridge::infra::InMemoryTelemetrySink;

#[test]
fn test_build_guards_rejects_zero_capacity() {
    let mut cfg = BridgeConfig::default();
    cfg.guards.insert("websocket".into(), GuardConfig { capacity: 0 });
    assert!(matches!(build_guards(&cfg), Err(PoolError::InvalidConfig(_))));
}

#[test]
fn test_builder_applies_overrides() {
    let runtime = RuntimeBuilder::new(BridgeConfig::default())
        .with_worker_count(3)
        .with_guard("websocket", 10)
        .with_guard("tcp", 2)
        .with_sink(InMemoryTelemetrySink::new(16))
        .build()
        .unwrap();
    assert_eq!(runtime.stats().worker_count, 3);
    assert_eq!(runtime.guard("websocket").unwrap().capacity(), 10);
    assert_eq!(runtime.guard("tcp").unwrap().capacity(), 2);
    let mut names: Vec<&str> = runtime.guard_names().collect();
    names.sort_unstable();
    assert_eq!(names, vec!["tcp", "websocket"]);
    runtime.shutdown();
}

#[test]
fn test_builder_with_disabled_telemetry() {
    let mut cfg = BridgeConfig::default();
    cfg.pool.worker_count = 1;
    cfg.telemetry.sink = TelemetrySinkConfig::Disabled;
    let runtime = RuntimeBuilder::new(cfg).build().unwrap();
    let ctx = runtime.new_context();
    ctx.telemetry().emit(distress_bridge::core::Sample::new("websocket"));
    assert_eq!(runtime.telemetry().emitted(), 0);
    drop(ctx);
    runtime.shutdown();
}

#[test]
fn test_builder_rejects_invalid_guard() {
    let err = RuntimeBuilder::new(BridgeConfig::default())
        .with_guard("websocket", 0)
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("websocket"));
}

//! Tests for configuration parsing and validation

use distress_bridge::config::{
    AsyncPoolConfig, BridgeConfig, GuardConfig, TelemetryConfig, TelemetrySinkConfig,
};

#[test]
fn test_pool_config_builder() {
    let cfg = AsyncPoolConfig::new()
        .with_worker_count(8)
        .with_max_queue_depth(64)
        .with_thread_name_prefix("io");
    assert_eq!(cfg.worker_count, 8);
    assert_eq!(cfg.max_queue_depth, 64);
    assert_eq!(cfg.thread_name_prefix, "io");
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_pool_config_invalid_values() {
    assert!(AsyncPoolConfig::new().with_worker_count(0).validate().is_err());
    assert!(AsyncPoolConfig::new().with_max_queue_depth(0).validate().is_err());
    assert!(AsyncPoolConfig::new()
        .with_thread_stack_size(1024)
        .validate()
        .is_err());
}

#[test]
fn test_guard_config_validation() {
    assert!(GuardConfig { capacity: 1 }.validate().is_ok());
    assert!(GuardConfig { capacity: 0 }.validate().is_err());
}

#[test]
fn test_bridge_config_from_json() {
    let json = r#"{
        "pool": { "worker_count": 4, "max_queue_depth": 128 },
        "guards": {
            "websocket": { "capacity": 200 },
            "tcp": { "capacity": 50 }
        },
        "telemetry": { "buffer_size": 512, "sink": { "memory": { "max_samples": 100 } } }
    }"#;
    let cfg = BridgeConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.pool.worker_count, 4);
    assert_eq!(cfg.pool.max_queue_depth, 128);
    assert_eq!(cfg.pool.thread_name_prefix, "distress-io");
    assert_eq!(cfg.guards["websocket"].capacity, 200);
    assert_eq!(cfg.telemetry.buffer_size, 512);
    assert_eq!(
        cfg.telemetry.sink,
        TelemetrySinkConfig::Memory { max_samples: 100 }
    );
}

#[test]
fn test_bridge_config_defaults_when_sections_missing() {
    let cfg = BridgeConfig::from_json_str("{}").unwrap();
    assert_eq!(cfg.telemetry, TelemetryConfig::default());
    assert_eq!(cfg.telemetry.sink, TelemetrySinkConfig::Tracing);
    assert!(cfg.guards.is_empty());
}

#[test]
fn test_bridge_config_rejects_invalid() {
    let err = BridgeConfig::from_json_str(r#"{"pool": {"worker_count": 0}}"#).unwrap_err();
    assert!(err.contains("worker_count"));

    let err = BridgeConfig::from_json_str(r#"{"telemetry": {"buffer_size": 0}}"#).unwrap_err();
    assert!(err.contains("buffer_size"));

    assert!(BridgeConfig::from_json_str("not json").is_err());
}

#[test]
fn test_sink_config_spelling() {
    let cfg: TelemetrySinkConfig = serde_json::from_str(r#""json_stdout""#).unwrap();
    assert_eq!(cfg, TelemetrySinkConfig::JsonStdout);
    let cfg: TelemetrySinkConfig = serde_json::from_str(r#""disabled""#).unwrap();
    assert_eq!(cfg, TelemetrySinkConfig::Disabled);
}

#[test]
fn test_env_style_overrides() {
    let mut cfg = BridgeConfig::default();
    cfg.apply_overrides(|key| match key {
        "DISTRESS_WORKER_COUNT" => Some("6".into()),
        "DISTRESS_MAX_QUEUE_DEPTH" => Some("32".into()),
        _ => None,
    })
    .unwrap();
    assert_eq!(cfg.pool.worker_count, 6);
    assert_eq!(cfg.pool.max_queue_depth, 32);
    assert!(cfg.validate().is_ok());
}

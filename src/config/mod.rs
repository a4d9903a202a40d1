//! Configuration models for the pool, guards, and telemetry.

pub mod bridge;
pub mod pool;

pub use bridge::{BridgeConfig, TelemetryConfig, TelemetrySinkConfig};
pub use pool::{AsyncPoolConfig, GuardConfig};

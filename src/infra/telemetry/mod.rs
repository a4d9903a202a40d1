//! Telemetry sink backends.

pub mod json;
pub mod log;
pub mod memory;

pub use json::JsonLinesTelemetrySink;
pub use log::TracingTelemetrySink;
pub use memory::InMemoryTelemetrySink;

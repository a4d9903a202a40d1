//! Infrastructure adapters: telemetry sinks and in-memory transports.

pub mod telemetry;
pub mod transport;

pub use telemetry::{InMemoryTelemetrySink, JsonLinesTelemetrySink, TracingTelemetrySink};
pub use transport::{ScriptHandle, ScriptedTransport};

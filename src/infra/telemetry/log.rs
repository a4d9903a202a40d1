//! Sink that turns each sample into a structured `tracing` event.

use tracing::info;

use crate::core::{Sample, TelemetrySink};

/// Logs samples at `info` under the `distress::telemetry` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetrySink;

impl TracingTelemetrySink {
    /// Create the sink.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl TelemetrySink for TracingTelemetrySink {
    fn record(&mut self, sample: Sample) {
        let tags = serde_json::to_string(&sample.tags).unwrap_or_default();
        let fields = serde_json::to_string(&sample.fields).unwrap_or_default();
        info!(
            target: "distress::telemetry",
            name = %sample.name,
            tags = %tags,
            fields = %fields,
            "sample"
        );
    }
}

//! Fire-and-forget telemetry samples.
//!
//! Emitting never blocks and never fails the calling operation. Samples travel
//! over a bounded channel to a drain thread that feeds the configured sink;
//! when the channel is full the sample is dropped and counted.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::PoolError;

/// Numeric sample field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Integer value (byte counts, message counts).
    Int(i64),
    /// Floating point value (durations, ratios).
    Float(f64),
}

/// One immutable observability data point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Measurement name, e.g. the protocol of the connection.
    pub name: String,
    /// Dimensions.
    pub tags: BTreeMap<String, String>,
    /// Values.
    pub fields: BTreeMap<String, FieldValue>,
}

impl Sample {
    /// Start a sample with no tags or fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
        }
    }

    /// Add a tag.
    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add an integer field.
    #[must_use]
    pub fn int_field(mut self, key: impl Into<String>, value: i64) -> Self {
        self.fields.insert(key.into(), FieldValue::Int(value));
        self
    }

    /// Add a float field.
    #[must_use]
    pub fn float_field(mut self, key: impl Into<String>, value: f64) -> Self {
        self.fields.insert(key.into(), FieldValue::Float(value));
        self
    }

    /// Look up a field.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<FieldValue> {
        self.fields.get(key).copied()
    }
}

/// Downstream consumer of samples. Owns aggregation and export.
pub trait TelemetrySink: Send {
    /// Record one sample.
    fn record(&mut self, sample: Sample);

    /// Flush buffered output, if any.
    fn flush(&mut self) {}
}

#[derive(Debug, Default)]
struct EmitterCounters {
    emitted: AtomicU64,
    dropped: AtomicU64,
}

/// Cheap, cloneable handle used by operations to emit samples.
#[derive(Debug, Clone)]
pub struct TelemetryEmitter {
    tx: Option<Sender<Sample>>,
    counters: Arc<EmitterCounters>,
}

impl TelemetryEmitter {
    /// An emitter that discards every sample.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            tx: None,
            counters: Arc::new(EmitterCounters::default()),
        }
    }

    /// Hand a sample to the sink without blocking. Drops it if the sink is behind.
    pub fn emit(&self, sample: Sample) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        match tx.try_send(sample) {
            Ok(()) => {
                self.counters.emitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Samples accepted into the pipeline.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.counters.emitted.load(Ordering::Relaxed)
    }

    /// Samples lost to backpressure or a stopped pipeline.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }
}

/// Drain thread moving samples from emitters into a sink.
pub struct TelemetryPipeline {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TelemetryPipeline {
    /// Start draining into `sink`. At most `buffer` samples wait in between.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` for a zero buffer and
    /// `PoolError::Internal` if the drain thread cannot be spawned.
    pub fn start(
        mut sink: Box<dyn TelemetrySink>,
        buffer: usize,
    ) -> Result<(Self, TelemetryEmitter), PoolError> {
        if buffer == 0 {
            return Err(PoolError::InvalidConfig(
                "telemetry buffer must be greater than 0".into(),
            ));
        }
        let (tx, rx) = bounded::<Sample>(buffer);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("distress-telemetry".into())
            .spawn(move || drain(sink.as_mut(), &rx, &stop_rx))
            .map_err(|e| PoolError::Internal(format!("failed to spawn telemetry thread: {e}")))?;

        let emitter = TelemetryEmitter {
            tx: Some(tx),
            counters: Arc::new(EmitterCounters::default()),
        };
        Ok((
            Self {
                stop_tx: Some(stop_tx),
                handle: Some(handle),
            },
            emitter,
        ))
    }

    /// Record what is already buffered, flush the sink, and stop the drain thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("telemetry drain thread panicked");
            }
        }
    }
}

impl Drop for TelemetryPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for TelemetryPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryPipeline")
            .field("running", &self.handle.is_some())
            .finish()
    }
}

fn drain(sink: &mut dyn TelemetrySink, rx: &Receiver<Sample>, stop_rx: &Receiver<()>) {
    debug!("telemetry drain started");
    loop {
        select! {
            recv(rx) -> sample => match sample {
                Ok(sample) => sink.record(sample),
                Err(_) => break,
            },
            recv(stop_rx) -> _ => {
                for sample in rx.try_iter() {
                    sink.record(sample);
                }
                break;
            }
        }
    }
    sink.flush();
    debug!("telemetry drain stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Clone, Default)]
    struct VecSink(Arc<Mutex<Vec<Sample>>>);

    impl TelemetrySink for VecSink {
        fn record(&mut self, sample: Sample) {
            self.0.lock().push(sample);
        }
    }

    #[test]
    fn test_sample_builder() {
        let sample = Sample::new("websocket")
            .tag("addr", "ws://localhost:9000")
            .int_field("read", 42)
            .float_field("latency_ms", 1.5);
        assert_eq!(sample.tags["addr"], "ws://localhost:9000");
        assert_eq!(sample.field("read"), Some(FieldValue::Int(42)));
        assert_eq!(sample.field("latency_ms"), Some(FieldValue::Float(1.5)));
    }

    #[test]
    fn test_sample_serializes_flat_fields() {
        let sample = Sample::new("websocket").int_field("write", 3);
        let json = serde_json::to_string(&sample).unwrap();
        assert_eq!(json, r#"{"name":"websocket","tags":{},"fields":{"write":3}}"#);
    }

    #[test]
    fn test_disabled_emitter_discards() {
        let emitter = TelemetryEmitter::disabled();
        emitter.emit(Sample::new("x"));
        assert_eq!(emitter.emitted(), 0);
        assert_eq!(emitter.dropped(), 0);
    }

    #[test]
    fn test_pipeline_delivers_and_flushes_on_shutdown() {
        let sink = VecSink::default();
        let (pipeline, emitter) = TelemetryPipeline::start(Box::new(sink.clone()), 16).unwrap();
        for i in 0..5 {
            emitter.emit(Sample::new("s").int_field("i", i));
        }
        pipeline.shutdown();
        assert_eq!(sink.0.lock().len(), 5);
        assert_eq!(emitter.emitted(), 5);

        // Pipeline gone: emitting is still harmless.
        emitter.emit(Sample::new("late"));
        assert_eq!(emitter.dropped(), 1);
    }

    #[test]
    fn test_zero_buffer_rejected() {
        assert!(TelemetryPipeline::start(Box::new(VecSink::default()), 0).is_err());
    }
}

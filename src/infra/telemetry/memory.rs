//! In-memory telemetry sink for tests and development.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::{Sample, TelemetrySink};

/// Bounded ring buffer of samples. Clones share the buffer, so a test can keep
/// one handle while the pipeline owns another.
#[derive(Debug, Clone)]
pub struct InMemoryTelemetrySink {
    samples: Arc<Mutex<VecDeque<Sample>>>,
    max_samples: usize,
}

impl InMemoryTelemetrySink {
    /// Keep at most `max_samples`, evicting the oldest.
    #[must_use]
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Arc::new(Mutex::new(VecDeque::with_capacity(max_samples.min(1024)))),
            max_samples,
        }
    }

    /// Snapshot of stored samples, oldest first.
    #[must_use]
    pub fn samples(&self) -> Vec<Sample> {
        self.samples.lock().iter().cloned().collect()
    }

    /// Stored samples named `name`.
    #[must_use]
    pub fn samples_named(&self, name: &str) -> Vec<Sample> {
        self.samples
            .lock()
            .iter()
            .filter(|s| s.name == name)
            .cloned()
            .collect()
    }

    /// Number of stored samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    /// True when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    /// Drop everything stored.
    pub fn clear(&self) {
        self.samples.lock().clear();
    }
}

impl TelemetrySink for InMemoryTelemetrySink {
    fn record(&mut self, sample: Sample) {
        if self.max_samples == 0 {
            return;
        }
        let mut samples = self.samples.lock();
        if samples.len() >= self.max_samples {
            samples.pop_front();
        }
        samples.push_back(sample);
    }
}

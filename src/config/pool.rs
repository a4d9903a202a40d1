//! Worker pool and resource guard configuration structures.

use serde::{Deserialize, Serialize};

/// Default stack size for worker threads (2 MiB).
const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;

/// Default job queue depth.
const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// Configuration for an `AsyncPool`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsyncPoolConfig {
    /// Number of worker threads, i.e. the maximum number of concurrently running operations.
    pub worker_count: usize,
    /// Maximum jobs waiting for a free worker before submissions are rejected.
    pub max_queue_depth: usize,
    /// Stack size for each worker thread in bytes.
    pub thread_stack_size: usize,
    /// Prefix for worker thread names.
    pub thread_name_prefix: String,
}

impl Default for AsyncPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get().max(1),
            max_queue_depth: DEFAULT_QUEUE_DEPTH,
            thread_stack_size: DEFAULT_STACK_SIZE,
            thread_name_prefix: "distress-io".into(),
        }
    }
}

impl AsyncPoolConfig {
    /// Create a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads.
    #[must_use]
    pub const fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the maximum queue depth.
    #[must_use]
    pub const fn with_max_queue_depth(mut self, max_queue_depth: usize) -> Self {
        self.max_queue_depth = max_queue_depth;
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, thread_stack_size: usize) -> Self {
        self.thread_stack_size = thread_stack_size;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Validate pool configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        Ok(())
    }
}

/// Capacity of one resource guard (e.g. one connection class).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Maximum concurrently held slots.
    pub capacity: usize,
}

impl GuardConfig {
    /// Validate guard configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("capacity must be greater than 0".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let cfg = AsyncPoolConfig::default();
        assert!(cfg.worker_count >= 1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_builder_setters() {
        let cfg = AsyncPoolConfig::new()
            .with_worker_count(3)
            .with_max_queue_depth(7)
            .with_thread_name_prefix("io");
        assert_eq!(cfg.worker_count, 3);
        assert_eq!(cfg.max_queue_depth, 7);
        assert_eq!(cfg.thread_name_prefix, "io");
    }

    #[test]
    fn test_invalid_values() {
        assert!(AsyncPoolConfig::new().with_worker_count(0).validate().is_err());
        assert!(AsyncPoolConfig::new().with_max_queue_depth(0).validate().is_err());
        assert!(AsyncPoolConfig::new().with_thread_stack_size(1024).validate().is_err());
        assert!(GuardConfig { capacity: 0 }.validate().is_err());
        assert!(GuardConfig { capacity: 1 }.validate().is_ok());
    }
}

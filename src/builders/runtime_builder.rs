//! Build a [`ScenarioRuntime`] from a [`BridgeConfig`].

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::config::{BridgeConfig, GuardConfig, TelemetrySinkConfig};
use crate::core::{AsyncPool, PoolError, ResourceGuard, TelemetryEmitter, TelemetryPipeline, TelemetrySink};
use crate::infra::{InMemoryTelemetrySink, JsonLinesTelemetrySink, TracingTelemetrySink};
use crate::runtime::ScenarioRuntime;

/// Create one guard per configured connection class.
pub fn build_guards(cfg: &BridgeConfig) -> Result<HashMap<String, Arc<ResourceGuard>>, PoolError> {
    cfg.guards
        .iter()
        .map(|(name, guard_cfg)| {
            ResourceGuard::new(name.clone(), guard_cfg.capacity).map(|guard| (name.clone(), guard))
        })
        .collect()
}

/// Instantiate the configured sink. `None` means telemetry is disabled.
#[must_use]
pub fn build_sink(cfg: &TelemetrySinkConfig) -> Option<Box<dyn TelemetrySink>> {
    match cfg {
        TelemetrySinkConfig::Tracing => Some(Box::new(TracingTelemetrySink::new())),
        TelemetrySinkConfig::Memory { max_samples } => {
            Some(Box::new(InMemoryTelemetrySink::new(*max_samples)))
        }
        TelemetrySinkConfig::JsonStdout => Some(Box::new(JsonLinesTelemetrySink::stdout())),
        TelemetrySinkConfig::Disabled => None,
    }
}

/// Fluent construction of a [`ScenarioRuntime`].
///
/// ```rust,ignore
/// let sink = InMemoryTelemetrySink::new(1024);
/// let runtime = RuntimeBuilder::new(BridgeConfig::default())
///     .with_guard("websocket", 100)
///     .with_sink(sink.clone())
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    config: BridgeConfig,
    sink: Option<Box<dyn TelemetrySink>>,
}

impl RuntimeBuilder {
    /// Start from `config`.
    #[must_use]
    pub fn new(config: BridgeConfig) -> Self {
        Self { config, sink: None }
    }

    /// Add or replace a guard.
    #[must_use]
    pub fn with_guard(mut self, name: impl Into<String>, capacity: usize) -> Self {
        self.config.guards.insert(name.into(), GuardConfig { capacity });
        self
    }

    /// Set the worker count.
    #[must_use]
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.config.pool.worker_count = worker_count;
        self
    }

    /// Use `sink` instead of the one named in the configuration.
    #[must_use]
    pub fn with_sink(mut self, sink: impl TelemetrySink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Validate the configuration, spawn the pool and telemetry drain, create guards.
    ///
    /// # Errors
    ///
    /// `PoolError::InvalidConfig` for a bad configuration, `PoolError::Internal`
    /// if a thread cannot be spawned.
    pub fn build(self) -> Result<ScenarioRuntime, PoolError> {
        let Self { config, sink } = self;
        config.validate().map_err(PoolError::InvalidConfig)?;

        let guards = build_guards(&config)?;
        let sink = sink.or_else(|| build_sink(&config.telemetry.sink));
        let (pipeline, emitter) = match sink {
            Some(sink) => {
                let (pipeline, emitter) = TelemetryPipeline::start(sink, config.telemetry.buffer_size)?;
                (Some(pipeline), emitter)
            }
            None => (None, TelemetryEmitter::disabled()),
        };
        let pool = Arc::new(AsyncPool::new(config.pool.clone())?);

        info!(
            workers = config.pool.worker_count,
            guards = guards.len(),
            telemetry = pipeline.is_some(),
            "scenario runtime built"
        );
        Ok(ScenarioRuntime::from_parts(pool, guards, emitter, pipeline))
    }
}

impl std::fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("config", &self.config)
            .field("custom_sink", &self.sink.is_some())
            .finish()
    }
}

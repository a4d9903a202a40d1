//! Root bridge configuration: pool, guards, and telemetry.

use std::collections::HashMap;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::pool::{AsyncPoolConfig, GuardConfig};
use crate::core::AppResult;

/// Path to a JSON configuration file.
pub const CONFIG_PATH_VAR: &str = "DISTRESS_CONFIG";
/// Overrides `pool.worker_count`.
pub const WORKER_COUNT_VAR: &str = "DISTRESS_WORKER_COUNT";
/// Overrides `pool.max_queue_depth`.
pub const MAX_QUEUE_DEPTH_VAR: &str = "DISTRESS_MAX_QUEUE_DEPTH";
/// Overrides `telemetry.buffer_size`.
pub const TELEMETRY_BUFFER_VAR: &str = "DISTRESS_TELEMETRY_BUFFER";

/// Telemetry sink selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetrySinkConfig {
    /// Emit samples as `tracing` events.
    Tracing,
    /// Keep the most recent samples in memory.
    Memory {
        /// Ring buffer size.
        max_samples: usize,
    },
    /// Write one JSON object per line to stdout.
    JsonStdout,
    /// Drop every sample.
    Disabled,
}

/// Telemetry pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Samples buffered between emitters and the sink before new ones are dropped.
    pub buffer_size: usize,
    /// Sink selection.
    pub sink: TelemetrySinkConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            buffer_size: 4096,
            sink: TelemetrySinkConfig::Tracing,
        }
    }
}

/// Root configuration for a scenario runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Shared worker pool.
    #[serde(default)]
    pub pool: AsyncPoolConfig,
    /// Named resource guards, one per connection class.
    #[serde(default)]
    pub guards: HashMap<String, GuardConfig>,
    /// Telemetry pipeline.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl BridgeConfig {
    /// Validate the pool, every guard, and the telemetry settings.
    pub fn validate(&self) -> Result<(), String> {
        self.pool
            .validate()
            .map_err(|e| format!("pool invalid: {e}"))?;
        for (name, guard) in &self.guards {
            guard
                .validate()
                .map_err(|e| format!("guard `{name}` invalid: {e}"))?;
        }
        if self.telemetry.buffer_size == 0 {
            return Err("telemetry buffer_size must be greater than 0".into());
        }
        if let TelemetrySinkConfig::Memory { max_samples: 0 } = self.telemetry.sink {
            return Err("telemetry memory sink needs max_samples > 0".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from the process environment (and a `.env` file if present).
    ///
    /// `DISTRESS_CONFIG` names a JSON file used as the base; the remaining
    /// `DISTRESS_*` variables override individual values.
    pub fn from_env() -> AppResult<Self> {
        // A missing .env file is the common case.
        let _ = dotenvy::dotenv();

        let mut cfg = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config file `{path}`"))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("parsing config file `{path}`"))?
            }
            Err(_) => Self::default(),
        };
        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        cfg.validate().map_err(anyhow::Error::msg)?;
        Ok(cfg)
    }

    /// Apply `DISTRESS_*` overrides resolved through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> AppResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(n) = parse_var(&lookup, WORKER_COUNT_VAR)? {
            self.pool.worker_count = n;
        }
        if let Some(n) = parse_var(&lookup, MAX_QUEUE_DEPTH_VAR)? {
            self.pool.max_queue_depth = n;
        }
        if let Some(n) = parse_var(&lookup, TELEMETRY_BUFFER_VAR)? {
            self.telemetry.buffer_size = n;
        }
        Ok(())
    }
}

fn parse_var<F>(lookup: &F, key: &str) -> AppResult<Option<usize>>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<usize>()
                .with_context(|| format!("{key} must be a non-negative integer, got `{raw}`"))
        })
        .transpose()
}

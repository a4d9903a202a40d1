//! Scenario runtime: the shared pool, guards, and telemetry that contexts run against.

pub mod scenario;

pub use scenario::{ScenarioRuntime, ScenarioTask};

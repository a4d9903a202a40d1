//! Builders that turn configuration into a running scenario runtime.

pub mod runtime_builder;

pub use runtime_builder::{build_guards, build_sink, RuntimeBuilder};

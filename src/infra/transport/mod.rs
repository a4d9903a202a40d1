//! Transport backends.

pub mod memory;

pub use memory::{ScriptHandle, ScriptedTransport};

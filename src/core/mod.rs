//! Core bridge abstractions: pool, guards, deferred results, contexts, connections.

pub mod async_pool;
pub mod connection;
pub mod context;
pub mod deferred;
pub mod error;
pub mod guard;
pub mod telemetry;
pub mod transport;

pub use async_pool::{AsyncPool, Job, PoolStats};
pub use connection::{Connection, ConnectionOps, ConnectionState};
pub use context::{CancelHandle, ContextId, ExecutionContext};
pub use deferred::{DeferredResult, DeferredStatus, OperationId};
pub use error::{AppResult, BridgeError, PoolError, StateError};
pub use guard::{GuardSlot, ResourceGuard};
pub use telemetry::{FieldValue, Sample, TelemetryEmitter, TelemetryPipeline, TelemetrySink};
pub use transport::{Frame, MessageReader, MessageWriter, OpCode, Transport};

//! Completion handles for operations running on the `AsyncPool`.
//!
//! A `DeferredResult` is created `Pending` by its execution context. The worker
//! that runs the operation never touches it directly: it packages the outcome
//! into a [`Resumption`] and sends it back to the context, whose run-loop
//! settles the handle. Settling happens exactly once, through a [`Settler`]
//! that is consumed in the process.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::context::ContextId;
use crate::core::{BridgeError, StateError};

/// Identifier of one scheduled operation, unique within its context.
pub type OperationId = u64;

/// Observable state of a deferred result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredStatus {
    /// Operation still running or its resumption not yet processed.
    Pending,
    /// Finished with a value.
    Completed,
    /// Finished with an error.
    Failed,
    /// The terminal state was already handed to the script.
    Consumed,
}

enum Slot<T> {
    Pending,
    Completed(T),
    Failed(BridgeError),
    Consumed,
}

/// Handle to one outstanding operation and its eventual value or error.
///
/// Not `Clone`: only the owning execution context consumes the terminal state.
/// Waiting on it from any other context fails with `StateError::ForeignDeferred`.
#[must_use = "a deferred result must be waited on to observe its outcome"]
pub struct DeferredResult<T> {
    id: OperationId,
    owner: ContextId,
    slot: Arc<Mutex<Slot<T>>>,
}

impl<T> DeferredResult<T> {
    pub(crate) fn pending(id: OperationId, owner: ContextId) -> Self {
        Self {
            id,
            owner,
            slot: Arc::new(Mutex::new(Slot::Pending)),
        }
    }

    /// A result that failed before anything was scheduled.
    pub(crate) fn failed(id: OperationId, owner: ContextId, err: BridgeError) -> Self {
        Self {
            id,
            owner,
            slot: Arc::new(Mutex::new(Slot::Failed(err))),
        }
    }

    pub(crate) fn settler(&self) -> Settler<T> {
        Settler {
            id: self.id,
            slot: Arc::clone(&self.slot),
        }
    }

    /// Operation identifier.
    #[must_use]
    pub const fn id(&self) -> OperationId {
        self.id
    }

    /// The execution context that created this result.
    #[must_use]
    pub const fn owner(&self) -> ContextId {
        self.owner
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> DeferredStatus {
        match *self.slot.lock() {
            Slot::Pending => DeferredStatus::Pending,
            Slot::Completed(_) => DeferredStatus::Completed,
            Slot::Failed(_) => DeferredStatus::Failed,
            Slot::Consumed => DeferredStatus::Consumed,
        }
    }

    /// True until the operation's resumption has been processed.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status() == DeferredStatus::Pending
    }

    /// Take the terminal state on behalf of context `by`, leaving `Consumed` behind.
    ///
    /// Returns `None` while pending. Any context other than the owner gets
    /// `StateError::ForeignDeferred` and the state is left untouched.
    pub(crate) fn take(&self, by: ContextId) -> Option<Result<T, BridgeError>> {
        if by != self.owner {
            return Some(Err(StateError::ForeignDeferred.into()));
        }
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Consumed) {
            Slot::Pending => {
                *slot = Slot::Pending;
                None
            }
            Slot::Completed(value) => Some(Ok(value)),
            Slot::Failed(err) => Some(Err(err)),
            Slot::Consumed => Some(Err(StateError::AlreadyConsumed.into())),
        }
    }
}

impl<T> fmt::Debug for DeferredResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredResult")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("status", &self.status())
            .finish()
    }
}

/// One-shot writer for a deferred result's terminal state.
pub(crate) struct Settler<T> {
    id: OperationId,
    slot: Arc<Mutex<Slot<T>>>,
}

impl<T> Settler<T> {
    pub(crate) fn settle(self, outcome: Result<T, BridgeError>) {
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Pending) {
            *slot = match outcome {
                Ok(value) => Slot::Completed(value),
                Err(err) => Slot::Failed(err),
            };
        } else {
            tracing::warn!(op = self.id, "deferred result settled after leaving Pending");
        }
    }
}

/// Message from a worker (or a canceller) to an execution context's run-loop.
pub(crate) enum Resumption {
    /// An operation finished; `apply` settles its deferred result and runs any
    /// continuation on the context thread.
    Settle {
        op: OperationId,
        apply: Box<dyn FnOnce() + Send + 'static>,
    },
    /// Wake a blocked run-loop so it re-checks cancellation.
    Wake,
}

impl fmt::Debug for Resumption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Settle { op, .. } => f.debug_struct("Settle").field("op", op).finish(),
            Self::Wake => f.write_str("Wake"),
        }
    }
}

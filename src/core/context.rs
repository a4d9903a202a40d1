//! Execution context: the single logical thread of one running script.
//!
//! Every blocking call a script makes becomes a job on the shared
//! [`AsyncPool`] plus a [`DeferredResult`]. When the job finishes, the worker
//! sends a resumption back over the context's channel. The context's run-loop
//! (`wait`, `run_once`, `poll`, `run_until_idle`) applies resumptions one at a
//! time on the thread driving the script, so script-visible state is never
//! touched from two places at once. `ExecutionContext` is `Send` but not
//! `Sync`, which keeps it on one thread at a time.
//!
//! # Example
//!
//! ```rust,ignore
//! let ctx = ExecutionContext::new(pool, TelemetryEmitter::disabled());
//! let answer = ctx.schedule(|| Ok(6 * 7));
//! assert_eq!(ctx.wait(answer)?, 42);
//! ```

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::async_pool::{AsyncPool, Job};
use crate::core::deferred::{DeferredResult, OperationId, Resumption, Settler};
use crate::core::telemetry::TelemetryEmitter;
use crate::core::{BridgeError, PoolError};

/// Identifier of an execution context.
pub type ContextId = Uuid;

/// Something a context must clean up if the script exits without doing so.
pub(crate) trait ContextResource: Send + Sync {
    /// Run the resource's close path. Called once the owning context is gone.
    fn abandon(self: Arc<Self>, pool: &AsyncPool);
}

/// Resources opened through one context.
#[derive(Clone, Default)]
pub(crate) struct ResourceTracker {
    entries: Arc<Mutex<Vec<Weak<dyn ContextResource>>>>,
}

impl ResourceTracker {
    pub(crate) fn track(&self, resource: Weak<dyn ContextResource>) {
        let mut entries = self.entries.lock();
        entries.retain(|w| w.strong_count() > 0);
        entries.push(resource);
    }

    fn drain(&self) -> Vec<Arc<dyn ContextResource>> {
        self.entries
            .lock()
            .drain(..)
            .filter_map(|w| w.upgrade())
            .collect()
    }

    fn live(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}

/// Cancels an execution context from any thread (script timeout or abort).
#[derive(Debug, Clone)]
pub struct CancelHandle {
    context: ContextId,
    cancelled: Arc<AtomicBool>,
    wake_tx: Sender<Resumption>,
}

impl CancelHandle {
    /// Cancel the context. Blocked waits return `BridgeError::Cancelled`.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            info!(context = %self.context, "execution context cancelled");
            let _ = self.wake_tx.send(Resumption::Wake);
        }
    }

    /// True once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// The single logical thread of one running script.
pub struct ExecutionContext {
    id: ContextId,
    pool: Arc<AsyncPool>,
    telemetry: TelemetryEmitter,
    resumption_tx: Sender<Resumption>,
    resumption_rx: Receiver<Resumption>,
    cancelled: Arc<AtomicBool>,
    next_op: Cell<OperationId>,
    outstanding: Cell<usize>,
    resources: ResourceTracker,
}

impl ExecutionContext {
    /// Create a context issuing its operations on `pool`.
    #[must_use]
    pub fn new(pool: Arc<AsyncPool>, telemetry: TelemetryEmitter) -> Self {
        let (resumption_tx, resumption_rx) = unbounded();
        let id = Uuid::new_v4();
        debug!(context = %id, "execution context created");
        Self {
            id,
            pool,
            telemetry,
            resumption_tx,
            resumption_rx,
            cancelled: Arc::new(AtomicBool::new(false)),
            next_op: Cell::new(0),
            outstanding: Cell::new(0),
            resources: ResourceTracker::default(),
        }
    }

    /// Context identifier.
    #[must_use]
    pub const fn id(&self) -> ContextId {
        self.id
    }

    /// The pool operations run on.
    #[must_use]
    pub const fn pool(&self) -> &Arc<AsyncPool> {
        &self.pool
    }

    /// Telemetry emitter handed to operations.
    #[must_use]
    pub const fn telemetry(&self) -> &TelemetryEmitter {
        &self.telemetry
    }

    /// Operations scheduled whose resumption has not been processed yet.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.get()
    }

    /// Connections opened through this context that are still alive.
    #[must_use]
    pub fn open_resources(&self) -> usize {
        self.resources.live()
    }

    pub(crate) const fn resources(&self) -> &ResourceTracker {
        &self.resources
    }

    /// Handle that can cancel this context from another thread.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            context: self.id,
            cancelled: Arc::clone(&self.cancelled),
            wake_tx: self.resumption_tx.clone(),
        }
    }

    /// Cancel this context.
    pub fn cancel(&self) {
        self.cancel_handle().cancel();
    }

    /// True once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn next_id(&self) -> OperationId {
        let id = self.next_op.get();
        self.next_op.set(id + 1);
        id
    }

    /// A result that already failed, for operations rejected before scheduling.
    pub fn fail<T>(&self, err: impl Into<BridgeError>) -> DeferredResult<T> {
        DeferredResult::failed(self.next_id(), self.id, err.into())
    }

    /// Run `op` on the pool and return a handle to its value.
    ///
    /// Returns immediately. The value reaches the script through the run-loop.
    pub fn schedule<T, F>(&self, op: F) -> DeferredResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, BridgeError> + Send + 'static,
    {
        self.submit(op, |settler: Settler<T>, outcome: Result<T, BridgeError>| -> Box<dyn FnOnce() + Send> {
            Box::new(move || settler.settle(outcome))
        })
    }

    /// Run `op` on the pool for its side effect only.
    ///
    /// The context is told whether it succeeded; no value is delivered.
    pub fn defer<F>(&self, op: F) -> DeferredResult<()>
    where
        F: FnOnce() -> Result<(), BridgeError> + Send + 'static,
    {
        self.schedule(op)
    }

    /// Run `op` on the pool, then run `continuation` with its value on the
    /// context thread during the run-loop.
    ///
    /// Exactly one of {continuation runs, failure is recorded} happens.
    pub fn schedule_then<T, F, C>(&self, op: F, continuation: C) -> DeferredResult<()>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, BridgeError> + Send + 'static,
        C: FnOnce(T) + Send + 'static,
    {
        self.submit(op, move |settler: Settler<()>, outcome| -> Box<dyn FnOnce() + Send> {
            Box::new(move || match outcome {
                Ok(value) => {
                    continuation(value);
                    settler.settle(Ok(()));
                }
                Err(err) => settler.settle(Err(err)),
            })
        })
    }

    fn submit<T, U, F, A>(&self, op: F, on_done: A) -> DeferredResult<U>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnOnce() -> Result<T, BridgeError> + Send + 'static,
        A: FnOnce(Settler<U>, Result<T, BridgeError>) -> Box<dyn FnOnce() + Send> + Send + 'static,
    {
        let id = self.next_id();
        if self.is_cancelled() {
            return DeferredResult::failed(id, self.id, BridgeError::Cancelled);
        }

        let deferred = DeferredResult::pending(id, self.id);
        let settler = deferred.settler();
        let tx = self.resumption_tx.clone();
        let context = self.id;

        let job: Job = Box::new(move || {
            let outcome = run_caught(op);
            let apply = on_done(settler, outcome);
            // The context may be gone; the work itself is done either way.
            if tx.send(Resumption::Settle { op: id, apply }).is_err() {
                debug!(%context, op = id, "context terminated, resumption discarded");
            }
        });

        match self.pool.submit(job) {
            Ok(()) => {
                self.outstanding.set(self.outstanding.get() + 1);
                debug!(context = %self.id, op = id, "operation scheduled");
                deferred
            }
            Err(err) => {
                debug!(context = %self.id, op = id, error = %err, "operation rejected by pool");
                DeferredResult::failed(id, self.id, err.into())
            }
        }
    }

    /// Drive the run-loop until `deferred` settles and hand its outcome to the script.
    ///
    /// # Errors
    ///
    /// The operation's own error, `BridgeError::Cancelled` if the context is
    /// cancelled first, `StateError::AlreadyConsumed`, or
    /// `StateError::ForeignDeferred` if another context created `deferred`.
    pub fn wait<T>(&self, deferred: DeferredResult<T>) -> Result<T, BridgeError> {
        loop {
            if let Some(outcome) = deferred.take(self.id) {
                return outcome;
            }
            if self.is_cancelled() {
                return Err(BridgeError::Cancelled);
            }
            let resumption = self.resumption_rx.recv().map_err(|_| {
                BridgeError::Pool(PoolError::Internal("resumption channel closed".into()))
            })?;
            self.dispatch(resumption);
        }
    }

    /// Like `wait`, but gives up after `timeout`, leaving `deferred` pending.
    ///
    /// Returns `None` on timeout. A result created by another context fails
    /// at once with `StateError::ForeignDeferred`.
    pub fn wait_timeout<T>(
        &self,
        deferred: &DeferredResult<T>,
        timeout: Duration,
    ) -> Option<Result<T, BridgeError>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(outcome) = deferred.take(self.id) {
                return Some(outcome);
            }
            if self.is_cancelled() {
                return Some(Err(BridgeError::Cancelled));
            }
            match self.resumption_rx.recv_deadline(deadline) {
                Ok(resumption) => self.dispatch(resumption),
                Err(RecvTimeoutError::Timeout) => return None,
                Err(RecvTimeoutError::Disconnected) => {
                    return Some(Err(BridgeError::Pool(PoolError::Internal(
                        "resumption channel closed".into(),
                    ))));
                }
            }
        }
    }

    /// Block for one resumption and apply it.
    ///
    /// # Errors
    ///
    /// `BridgeError::Cancelled` if the context is cancelled.
    pub fn run_once(&self) -> Result<(), BridgeError> {
        if self.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }
        let resumption = self
            .resumption_rx
            .recv()
            .map_err(|_| BridgeError::Pool(PoolError::Internal("resumption channel closed".into())))?;
        self.dispatch(resumption);
        if self.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }
        Ok(())
    }

    /// Apply every resumption that is already available without blocking.
    ///
    /// Returns the number processed.
    pub fn poll(&self) -> usize {
        let mut processed = 0;
        while let Ok(resumption) = self.resumption_rx.try_recv() {
            self.dispatch(resumption);
            processed += 1;
        }
        processed
    }

    /// Drive the run-loop until every scheduled operation has resumed.
    ///
    /// # Errors
    ///
    /// `BridgeError::Cancelled` if the context is cancelled.
    pub fn run_until_idle(&self) -> Result<(), BridgeError> {
        while self.outstanding.get() > 0 {
            self.run_once()?;
        }
        Ok(())
    }

    fn dispatch(&self, resumption: Resumption) {
        match resumption {
            Resumption::Settle { op, apply } => {
                self.outstanding.set(self.outstanding.get().saturating_sub(1));
                if self.is_cancelled() {
                    debug!(context = %self.id, op, "resumption discarded after cancellation");
                } else {
                    apply();
                }
            }
            Resumption::Wake => {}
        }
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::Release);
        let left_open = self.resources.drain();
        if !left_open.is_empty() {
            info!(
                context = %self.id,
                count = left_open.len(),
                "closing resources left open by script"
            );
        }
        for resource in left_open {
            resource.abandon(&self.pool);
        }
        debug!(
            context = %self.id,
            outstanding = self.outstanding.get(),
            "execution context terminated"
        );
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("outstanding", &self.outstanding.get())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

fn run_caught<T>(op: impl FnOnce() -> Result<T, BridgeError>) -> Result<T, BridgeError> {
    panic::catch_unwind(AssertUnwindSafe(op))
        .unwrap_or_else(|payload| Err(BridgeError::Panicked(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into())
}

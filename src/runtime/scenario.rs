//! Runtime shared by every script of a scenario.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{info, warn};

use crate::core::{
    AsyncPool, BridgeError, CancelHandle, ContextId, ExecutionContext, PoolError, PoolStats,
    ResourceGuard, TelemetryEmitter, TelemetryPipeline,
};

/// Pool, named guards, and telemetry pipeline. Mints execution contexts.
pub struct ScenarioRuntime {
    pool: Arc<AsyncPool>,
    guards: HashMap<String, Arc<ResourceGuard>>,
    emitter: TelemetryEmitter,
    pipeline: Option<TelemetryPipeline>,
}

impl ScenarioRuntime {
    pub(crate) fn from_parts(
        pool: Arc<AsyncPool>,
        guards: HashMap<String, Arc<ResourceGuard>>,
        emitter: TelemetryEmitter,
        pipeline: Option<TelemetryPipeline>,
    ) -> Self {
        Self {
            pool,
            guards,
            emitter,
            pipeline,
        }
    }

    /// A fresh context for one script.
    #[must_use]
    pub fn new_context(&self) -> ExecutionContext {
        ExecutionContext::new(Arc::clone(&self.pool), self.emitter.clone())
    }

    /// Guard for a connection class.
    #[must_use]
    pub fn guard(&self, name: &str) -> Option<&Arc<ResourceGuard>> {
        self.guards.get(name)
    }

    /// Guard for a connection class, or an error naming the missing class.
    ///
    /// # Errors
    ///
    /// `PoolError::InvalidConfig` if no guard of that name was configured.
    pub fn require_guard(&self, name: &str) -> Result<&Arc<ResourceGuard>, PoolError> {
        self.guard(name)
            .ok_or_else(|| PoolError::InvalidConfig(format!("no guard named `{name}`")))
    }

    /// Names of all configured guards.
    pub fn guard_names(&self) -> impl Iterator<Item = &str> {
        self.guards.keys().map(String::as_str)
    }

    /// The shared pool.
    #[must_use]
    pub const fn pool(&self) -> &Arc<AsyncPool> {
        &self.pool
    }

    /// Pool statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// The emitter handed to every context.
    #[must_use]
    pub const fn telemetry(&self) -> &TelemetryEmitter {
        &self.emitter
    }

    /// Run `script` on its own thread with a fresh context.
    ///
    /// The context is dropped on that thread when the script returns, so any
    /// connection it left open is closed and its slot released.
    ///
    /// # Errors
    ///
    /// `PoolError::Internal` if the script thread cannot be spawned.
    pub fn spawn<F, R>(&self, name: &str, script: F) -> Result<ScenarioTask<R>, PoolError>
    where
        F: FnOnce(&ExecutionContext) -> Result<R, BridgeError> + Send + 'static,
        R: Send + 'static,
    {
        let ctx = self.new_context();
        let context = ctx.id();
        let cancel = ctx.cancel_handle();
        let handle = thread::Builder::new()
            .name(format!("script-{name}"))
            .spawn(move || {
                let result = script(&ctx);
                drop(ctx);
                result
            })
            .map_err(|e| PoolError::Internal(format!("failed to spawn script thread: {e}")))?;
        info!(%context, script = name, "script started");
        Ok(ScenarioTask {
            context,
            cancel,
            handle,
        })
    }

    /// Stop accepting work, finish queued jobs, and flush telemetry.
    pub fn shutdown(mut self) {
        self.pool.shutdown();
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.shutdown();
        }
        info!(
            telemetry_dropped = self.emitter.dropped(),
            "scenario runtime shut down"
        );
    }
}

impl fmt::Debug for ScenarioRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScenarioRuntime")
            .field("pool", &self.pool)
            .field("guards", &self.guards.keys().collect::<Vec<_>>())
            .field("telemetry", &self.pipeline.is_some())
            .finish()
    }
}

/// A script running on its own thread.
#[derive(Debug)]
pub struct ScenarioTask<R> {
    context: ContextId,
    cancel: CancelHandle,
    handle: JoinHandle<Result<R, BridgeError>>,
}

impl<R> ScenarioTask<R> {
    /// Identifier of the script's context.
    #[must_use]
    pub const fn context(&self) -> ContextId {
        self.context
    }

    /// Abort the script. Its pending wait returns `BridgeError::Cancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A handle that can cancel the script from elsewhere.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// True once the script thread has returned.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the script and return its result.
    ///
    /// # Errors
    ///
    /// The script's own error, or `BridgeError::Panicked` if it panicked.
    pub fn join(self) -> Result<R, BridgeError> {
        let context = self.context;
        self.handle.join().unwrap_or_else(|_| {
            warn!(%context, "script panicked");
            Err(BridgeError::Panicked("script thread panicked".into()))
        })
    }
}

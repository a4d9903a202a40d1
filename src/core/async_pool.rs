//! Bounded worker pool executing blocking operations on dedicated OS threads.
//!
//! The pool owns `worker_count` threads that block on a shared job queue. At
//! most `worker_count` jobs run at once; everything else waits in the queue.
//!
//! # Design Principles
//!
//! - **Never blocks the submitter**: `submit` enqueues or fails immediately
//! - **No polling**: Workers block on channel recv
//! - **Run to completion**: Jobs already queued when the pool shuts down still
//!   run; only new submissions are refused
//! - **Panic isolation**: A panicking job is counted as failed and the worker
//!   keeps serving the queue

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::AsyncPoolConfig;
use crate::core::PoolError;

/// A unit of blocking work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of worker threads.
    pub worker_count: usize,

    /// Currently executing jobs.
    pub active_jobs: u64,

    /// Highest number of simultaneously executing jobs observed.
    pub peak_active_jobs: u64,

    /// Jobs waiting in the queue.
    pub queued_jobs: u64,

    /// Total jobs completed without panicking.
    pub completed_jobs: u64,

    /// Total jobs that panicked.
    pub failed_jobs: u64,

    /// Total jobs accepted.
    pub submitted_jobs: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
struct PoolCounters {
    active_jobs: AtomicU64,
    peak_active_jobs: AtomicU64,
    queued_jobs: AtomicU64,
    completed_jobs: AtomicU64,
    failed_jobs: AtomicU64,
    submitted_jobs: AtomicU64,
}

impl PoolCounters {
    fn snapshot(&self, worker_count: usize) -> PoolStats {
        PoolStats {
            worker_count,
            active_jobs: self.active_jobs.load(Ordering::Relaxed),
            peak_active_jobs: self.peak_active_jobs.load(Ordering::Relaxed),
            queued_jobs: self.queued_jobs.load(Ordering::Relaxed),
            completed_jobs: self.completed_jobs.load(Ordering::Relaxed),
            failed_jobs: self.failed_jobs.load(Ordering::Relaxed),
            submitted_jobs: self.submitted_jobs.load(Ordering::Relaxed),
        }
    }

    fn job_started(&self) {
        self.queued_jobs.fetch_sub(1, Ordering::Relaxed);
        let active = self.active_jobs.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_active_jobs.fetch_max(active, Ordering::AcqRel);
    }
}

/// Worker pool with dedicated OS threads for blocking I/O.
///
/// Constructed explicitly and shared by `Arc`; there is no process-wide pool.
pub struct AsyncPool {
    /// Pool configuration.
    config: AsyncPoolConfig,

    /// Job sender (to workers). Option allows clean shutdown by dropping.
    job_tx: Mutex<Option<Sender<Job>>>,

    /// Pool statistics counters.
    counters: Arc<PoolCounters>,

    /// Shutdown flag.
    shutdown: AtomicBool,

    /// Worker thread handles.
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl AsyncPool {
    /// Create a new pool and spawn `config.worker_count` worker threads.
    ///
    /// # Errors
    ///
    /// - `PoolError::InvalidConfig` if the configuration is invalid
    /// - `PoolError::Internal` if a worker thread cannot be spawned
    pub fn new(config: AsyncPoolConfig) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        let (job_tx, job_rx) = bounded::<Job>(config.max_queue_depth);
        let counters = Arc::new(PoolCounters::default());

        let mut workers = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            match spawn_worker(worker_id, &config, job_rx.clone(), Arc::clone(&counters)) {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Dropping the sender lets the already spawned workers exit.
                    drop(job_tx);
                    return Err(PoolError::Internal(format!(
                        "failed to spawn worker {worker_id}: {e}"
                    )));
                }
            }
        }

        info!(
            worker_count = config.worker_count,
            max_queue_depth = config.max_queue_depth,
            "AsyncPool initialized"
        );

        Ok(Self {
            config,
            job_tx: Mutex::new(Some(job_tx)),
            counters,
            shutdown: AtomicBool::new(false),
            workers: Mutex::new(workers),
        })
    }

    /// Submit a job without blocking.
    ///
    /// # Errors
    ///
    /// - `PoolError::QueueFull` if the job queue is full
    /// - `PoolError::PoolShutdown` if the pool has been shut down
    pub fn submit(&self, job: Job) -> Result<(), PoolError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::PoolShutdown);
        }

        let job_tx = self.job_tx.lock();
        let Some(job_tx) = job_tx.as_ref() else {
            return Err(PoolError::PoolShutdown);
        };

        // Count before sending so a fast worker never sees queued_jobs at zero.
        self.counters.queued_jobs.fetch_add(1, Ordering::Relaxed);
        match job_tx.try_send(job) {
            Ok(()) => {
                self.counters.submitted_jobs.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.counters.queued_jobs.fetch_sub(1, Ordering::Relaxed);
                warn!(
                    max_queue_depth = self.config.max_queue_depth,
                    "AsyncPool queue is full"
                );
                Err(PoolError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.counters.queued_jobs.fetch_sub(1, Ordering::Relaxed);
                Err(PoolError::PoolShutdown)
            }
        }
    }

    /// Number of worker threads (the concurrency capacity).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.config.worker_count
    }

    /// True once `shutdown` has been called or the pool was dropped.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot(self.config.worker_count)
    }

    /// Shut down the pool gracefully.
    ///
    /// New submissions are refused. Jobs already queued still run. Each worker
    /// is given two seconds to exit before it is detached.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("Shutting down AsyncPool");

        // Drop the sender so workers exit once the queue is drained.
        self.job_tx.lock().take();

        let mut workers = self.workers.lock();
        let worker_count = workers.len();

        for (idx, worker) in workers.drain(..).enumerate() {
            let (tx, rx) = std::sync::mpsc::channel();
            let join_thread = thread::spawn(move || {
                let result = worker.join();
                let _ = tx.send(result.is_ok());
            });

            match rx.recv_timeout(Duration::from_secs(2)) {
                Ok(true) => debug!(worker_id = idx, "Worker joined"),
                Ok(false) => warn!(worker_id = idx, "Worker panicked"),
                Err(_) => {
                    warn!(worker_id = idx, "Worker did not exit within timeout - detaching");
                    continue;
                }
            }
            let _ = join_thread.join();
        }

        info!(worker_count, "AsyncPool shut down");
    }
}

impl Drop for AsyncPool {
    fn drop(&mut self) {
        // Signal shutdown but don't join; queued jobs still drain on the workers.
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            self.job_tx.lock().take();
            debug!("AsyncPool dropped without explicit shutdown - workers will be detached");
        }
    }
}

impl std::fmt::Debug for AsyncPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncPool")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Spawn a worker thread.
fn spawn_worker(
    worker_id: usize,
    config: &AsyncPoolConfig,
    job_rx: Receiver<Job>,
    counters: Arc<PoolCounters>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("{}-{worker_id}", config.thread_name_prefix))
        .stack_size(config.thread_stack_size)
        .spawn(move || {
            debug!(worker_id, "Worker thread started");

            // recv keeps yielding queued jobs after the sender is dropped and
            // only errors once the queue is empty.
            while let Ok(job) = job_rx.recv() {
                counters.job_started();

                let outcome = panic::catch_unwind(AssertUnwindSafe(job));

                counters.active_jobs.fetch_sub(1, Ordering::AcqRel);
                if outcome.is_ok() {
                    counters.completed_jobs.fetch_add(1, Ordering::Relaxed);
                } else {
                    counters.failed_jobs.fetch_add(1, Ordering::Relaxed);
                    warn!(worker_id, "Job panicked");
                }
            }

            debug!(worker_id, "Worker thread exiting");
        })
}

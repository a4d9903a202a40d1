//! Bounded, fair counting semaphore limiting concurrently active resources.
//!
//! Waiters are served strictly in arrival order. A release with waiters queued
//! hands the slot directly to the oldest waiter, so `held` never dips and no
//! later arrival can barge in between. Blocking threads and async tasks share
//! one queue.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::core::{BridgeError, PoolError, StateError};

/// Parked thread waiting for a slot.
#[derive(Default)]
struct ThreadWaiter {
    /// Set under the state lock when the slot is handed over.
    granted: AtomicBool,
    condvar: Condvar,
}

enum Wake {
    Thread(Arc<ThreadWaiter>),
    #[cfg(feature = "tokio-runtime")]
    Task(tokio::sync::oneshot::Sender<()>),
}

struct Waiter {
    ticket: u64,
    wake: Wake,
}

struct GuardState {
    held: usize,
    waiters: VecDeque<Waiter>,
    next_ticket: u64,
}

impl GuardState {
    fn enqueue(&mut self, wake: Wake) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.waiters.push_back(Waiter { ticket, wake });
        ticket
    }

    /// Remove a waiter that gave up. Returns false if it was already granted.
    fn withdraw(&mut self, ticket: u64) -> bool {
        match self.waiters.iter().position(|w| w.ticket == ticket) {
            Some(idx) => {
                self.waiters.remove(idx);
                true
            }
            None => false,
        }
    }
}

/// Fair counting semaphore with an explicit FIFO wait queue.
///
/// Invariant: `0 <= held <= capacity`.
pub struct ResourceGuard {
    name: String,
    capacity: usize,
    state: Mutex<GuardState>,
}

impl ResourceGuard {
    /// Create a guard with `capacity` slots.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` if `capacity` is zero.
    pub fn new(name: impl Into<String>, capacity: usize) -> Result<Arc<Self>, PoolError> {
        let name = name.into();
        if capacity == 0 {
            return Err(PoolError::InvalidConfig(format!(
                "guard `{name}` capacity must be greater than 0"
            )));
        }
        Ok(Arc::new(Self {
            name,
            capacity,
            state: Mutex::new(GuardState {
                held: 0,
                waiters: VecDeque::new(),
                next_ticket: 0,
            }),
        }))
    }

    /// Guard name (connection class).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum concurrently held slots.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held.
    #[must_use]
    pub fn held(&self) -> usize {
        self.state.lock().held
    }

    /// Slots free right now.
    #[must_use]
    pub fn available(&self) -> usize {
        self.capacity - self.held()
    }

    /// Number of queued waiters.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Take a slot, blocking the calling thread until one is granted.
    pub fn acquire(self: &Arc<Self>) -> GuardSlot {
        loop {
            if let Some(slot) = self.acquire_until(None) {
                return slot;
            }
        }
    }

    /// Take a slot, giving up after `timeout`.
    pub fn acquire_timeout(self: &Arc<Self>, timeout: Duration) -> Option<GuardSlot> {
        self.acquire_until(Some(Instant::now() + timeout))
    }

    /// Take a slot only if one is free and nobody is queued ahead.
    pub fn try_acquire(self: &Arc<Self>) -> Option<GuardSlot> {
        let mut state = self.state.lock();
        self.take_free(&mut state)
    }

    fn take_free(self: &Arc<Self>, state: &mut GuardState) -> Option<GuardSlot> {
        if state.held < self.capacity && state.waiters.is_empty() {
            state.held += 1;
            Some(GuardSlot::new(Arc::clone(self)))
        } else {
            None
        }
    }

    fn acquire_until(self: &Arc<Self>, deadline: Option<Instant>) -> Option<GuardSlot> {
        let mut state = self.state.lock();
        if let Some(slot) = self.take_free(&mut state) {
            return Some(slot);
        }

        let waiter = Arc::new(ThreadWaiter::default());
        let ticket = state.enqueue(Wake::Thread(Arc::clone(&waiter)));
        debug!(guard = %self.name, ticket, "waiting for slot");

        loop {
            if waiter.granted.load(Ordering::Acquire) {
                return Some(GuardSlot::new(Arc::clone(self)));
            }
            match deadline {
                None => waiter.condvar.wait(&mut state),
                Some(deadline) => {
                    if waiter.condvar.wait_until(&mut state, deadline).timed_out() {
                        if waiter.granted.load(Ordering::Acquire) {
                            return Some(GuardSlot::new(Arc::clone(self)));
                        }
                        state.withdraw(ticket);
                        return None;
                    }
                }
            }
        }
    }

    /// Take a slot from an async task.
    ///
    /// Dropping the returned future while it is still queued withdraws the
    /// waiter; dropping it after the slot was granted hands the slot on.
    #[cfg(feature = "tokio-runtime")]
    pub async fn acquire_async(self: &Arc<Self>) -> GuardSlot {
        let (ticket, rx) = {
            let mut state = self.state.lock();
            if let Some(slot) = self.take_free(&mut state) {
                return slot;
            }
            let (tx, rx) = tokio::sync::oneshot::channel();
            (state.enqueue(Wake::Task(tx)), rx)
        };

        let mut pending = PendingAcquire {
            guard: Arc::clone(self),
            ticket,
            rx,
            armed: true,
        };
        // The sender lives in the queue, which `pending` keeps alive, and is
        // only consumed by a successful hand-over.
        let _ = (&mut pending.rx).await;
        pending.armed = false;
        GuardSlot::new(Arc::clone(self))
    }

    /// Return one slot.
    ///
    /// If waiters are queued the slot moves to the oldest one; otherwise the
    /// held count drops by one.
    ///
    /// # Errors
    ///
    /// Returns `StateError::GuardOverRelease` if nothing is held.
    pub fn release(&self) -> Result<(), BridgeError> {
        let mut state = self.state.lock();
        if state.held == 0 {
            error!(guard = %self.name, "release without matching acquire");
            return Err(StateError::GuardOverRelease.into());
        }

        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.wake {
                Wake::Thread(thread) => {
                    thread.granted.store(true, Ordering::Release);
                    thread.condvar.notify_one();
                    debug!(guard = %self.name, ticket = waiter.ticket, "slot handed over");
                    return Ok(());
                }
                #[cfg(feature = "tokio-runtime")]
                Wake::Task(tx) => {
                    if tx.send(()).is_ok() {
                        debug!(guard = %self.name, ticket = waiter.ticket, "slot handed over");
                        return Ok(());
                    }
                }
            }
        }

        state.held -= 1;
        Ok(())
    }
}

impl fmt::Debug for ResourceGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ResourceGuard")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("held", &state.held)
            .field("waiting", &state.waiters.len())
            .finish()
    }
}

/// Cleans up an async acquire whose future was dropped.
#[cfg(feature = "tokio-runtime")]
struct PendingAcquire {
    guard: Arc<ResourceGuard>,
    ticket: u64,
    /// Dropped after `drop` runs, so a hand-over racing with cancellation
    /// always lands and is returned below.
    rx: tokio::sync::oneshot::Receiver<()>,
    armed: bool,
}

#[cfg(feature = "tokio-runtime")]
impl Drop for PendingAcquire {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let granted = !self.guard.state.lock().withdraw(self.ticket);
        if granted {
            let _ = self.guard.release();
        }
    }
}

/// One held slot of a `ResourceGuard`.
///
/// The slot is returned exactly once: explicitly through `release`, or when
/// the value is dropped.
#[must_use = "dropping a GuardSlot releases it immediately"]
pub struct GuardSlot {
    guard: Arc<ResourceGuard>,
    armed: bool,
}

impl GuardSlot {
    const fn new(guard: Arc<ResourceGuard>) -> Self {
        Self { guard, armed: true }
    }

    /// The guard this slot belongs to.
    #[must_use]
    pub const fn guard(&self) -> &Arc<ResourceGuard> {
        &self.guard
    }

    /// Return the slot now.
    pub fn release(mut self) -> Result<(), BridgeError> {
        self.armed = false;
        self.guard.release()
    }

    /// Stop tracking the slot; the caller becomes responsible for a matching
    /// `ResourceGuard::release`.
    pub fn detach(mut self) -> Arc<ResourceGuard> {
        self.armed = false;
        Arc::clone(&self.guard)
    }
}

impl Drop for GuardSlot {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.guard.release();
        }
    }
}

impl fmt::Debug for GuardSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardSlot")
            .field("guard", &self.guard.name())
            .field("armed", &self.armed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(ResourceGuard::new("ws", 0).is_err());
    }

    #[test]
    fn test_acquire_release_counts() {
        let guard = ResourceGuard::new("ws", 2).unwrap();
        let a = guard.acquire();
        let b = guard.acquire();
        assert_eq!(guard.held(), 2);
        assert!(guard.try_acquire().is_none());
        a.release().unwrap();
        assert_eq!(guard.available(), 1);
        drop(b);
        assert_eq!(guard.held(), 0);
    }

    #[test]
    fn test_over_release_detected() {
        let guard = ResourceGuard::new("ws", 1).unwrap();
        let slot = guard.acquire();
        slot.release().unwrap();
        let err = guard.release().unwrap_err();
        assert!(matches!(err, BridgeError::State(StateError::GuardOverRelease)));
        assert_eq!(guard.held(), 0);
    }

    #[test]
    fn test_timeout_withdraws_waiter() {
        let guard = ResourceGuard::new("ws", 1).unwrap();
        let _held = guard.acquire();
        assert!(guard.acquire_timeout(Duration::from_millis(20)).is_none());
        assert_eq!(guard.waiting(), 0);
        assert_eq!(guard.held(), 1);
    }

    #[test]
    fn test_detach_then_manual_release() {
        let guard = ResourceGuard::new("ws", 1).unwrap();
        let owner = guard.acquire().detach();
        assert_eq!(guard.held(), 1);
        owner.release().unwrap();
        assert_eq!(guard.held(), 0);
    }
}

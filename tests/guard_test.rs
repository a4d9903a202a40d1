//! Integration tests for ResourceGuard
//!
//! - Bounded admission under contention
//! - Strict FIFO hand-over between waiters
//! - Over-release detection
//! - Async acquisition sharing the queue with blocking threads

use distress_bridge::core::{BridgeError, ResourceGuard, StateError};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// ============================================================================
// HELPERS
// ============================================================================

fn wait_for(what: &str, pred: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !pred() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

// ============================================================================
// BLOCKING ACQUISITION
// ============================================================================

#[test]
fn test_bounded_admission_under_contention() {
    let guard = ResourceGuard::new("websocket", 3).unwrap();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..12)
        .map(|_| {
            let guard = Arc::clone(&guard);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            thread::spawn(move || {
                let slot = guard.acquire();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                assert!(guard.held() <= guard.capacity());
                let pause = rand::rng().random_range(1..8);
                thread::sleep(Duration::from_millis(pause));
                active.fetch_sub(1, Ordering::SeqCst);
                slot.release().unwrap();
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(guard.held(), 0);
    assert_eq!(guard.waiting(), 0);
}

#[test]
fn test_waiters_served_in_arrival_order() {
    let guard = ResourceGuard::new("websocket", 1).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));
    let held = guard.acquire();

    let mut handles = Vec::new();
    for (queued, name) in ["A", "B", "C"].into_iter().enumerate() {
        let guard_clone = Arc::clone(&guard);
        let order = Arc::clone(&order);
        handles.push(thread::spawn(move || {
            let slot = guard_clone.acquire();
            order.lock().push(name);
            slot.release().unwrap();
        }));
        wait_for("waiter to queue", || guard.waiting() == queued + 1);
    }

    held.release().unwrap();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(*order.lock(), vec!["A", "B", "C"]);
    assert_eq!(guard.held(), 0);
}

#[test]
fn test_release_hands_over_without_dipping() {
    let guard = ResourceGuard::new("websocket", 1).unwrap();
    let held = guard.acquire();

    let guard_clone = Arc::clone(&guard);
    let waiter = thread::spawn(move || guard_clone.acquire());
    wait_for("waiter to queue", || guard.waiting() == 1);

    held.release().unwrap();
    // The slot moved straight to the waiter; nobody can take it in between.
    assert_eq!(guard.held(), 1);
    assert!(guard.try_acquire().is_none());

    let slot = waiter.join().unwrap();
    drop(slot);
    assert_eq!(guard.held(), 0);
}

#[test]
fn test_try_acquire_does_not_barge() {
    let guard = ResourceGuard::new("websocket", 1).unwrap();
    let held = guard.acquire();
    let guard_clone = Arc::clone(&guard);
    let waiter = thread::spawn(move || guard_clone.acquire_timeout(Duration::from_secs(5)));
    wait_for("waiter to queue", || guard.waiting() == 1);

    held.release().unwrap();
    assert!(guard.try_acquire().is_none());
    assert!(waiter.join().unwrap().is_some());
}

#[test]
fn test_over_release_is_an_error() {
    let guard = ResourceGuard::new("websocket", 2).unwrap();
    let owner = guard.acquire().detach();
    owner.release().unwrap();
    match guard.release() {
        Err(BridgeError::State(StateError::GuardOverRelease)) => {}
        other => panic!("expected over-release error, got {other:?}"),
    }
    assert_eq!(guard.held(), 0);
}

// ============================================================================
// ASYNC ACQUISITION
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_acquire_waits_for_release() {
    let guard = ResourceGuard::new("websocket", 1).unwrap();
    let held = guard.acquire();

    let guard_clone = Arc::clone(&guard);
    let task = tokio::spawn(async move { guard_clone.acquire_async().await });
    while guard.waiting() == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(!task.is_finished());

    held.release().unwrap();
    let slot = task.await.unwrap();
    assert_eq!(guard.held(), 1);
    drop(slot);
    assert_eq!(guard.held(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_async_acquire_leaves_queue() {
    let guard = ResourceGuard::new("websocket", 1).unwrap();
    let held = guard.acquire();

    let timed_out =
        tokio::time::timeout(Duration::from_millis(20), guard.acquire_async()).await;
    assert!(timed_out.is_err());
    assert_eq!(guard.waiting(), 0);

    held.release().unwrap();
    assert_eq!(guard.held(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_async_tasks_share_capacity() {
    let guard = ResourceGuard::new("websocket", 2).unwrap();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let tasks = (0..8).map(|_| {
        let guard = Arc::clone(&guard);
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        tokio::spawn(async move {
            let slot = guard.acquire_async().await;
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            active.fetch_sub(1, Ordering::SeqCst);
            drop(slot);
        })
    });

    for result in futures::future::join_all(tasks).await {
        result.unwrap();
    }
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(guard.held(), 0);
}

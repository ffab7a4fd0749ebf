//! Shared cancellation token for coordinating background task shutdown.
//!
//! A node needs:
//! - An `AtomicBool` to track online status
//! - A `watch` channel to signal long-running loops to stop
//! - Storage for `JoinHandle`s so we can await graceful shutdown
//! - A count of short-lived in-flight tasks, which may be started from
//!   threads outside the runtime, so teardown can wait for them to drain
//!
//! [`ShutdownToken`] bundles these together.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::runtime::Handle;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;

/// Counter of in-flight tasks plus a wakeup for waiters.
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    /// Set once teardown begins waiting; no new tasks are admitted after.
    sealed: AtomicBool,
    idle: Notify,
}

/// Marks one in-flight task. Dropping it completes the task.
#[must_use = "the task is considered finished as soon as the guard is dropped"]
pub struct TaskGuard {
    in_flight: Arc<InFlight>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if self.in_flight.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.in_flight.idle.notify_waiters();
        }
    }
}

/// A cancellation token that coordinates shutdown of background tasks.
///
/// Typical usage:
///
/// 1. Create with [`ShutdownToken::new()`].
/// 2. Long-running loops hold a [`subscribe()`](Self::subscribe) receiver
///    and check it in `tokio::select!`; register their handles with
///    [`add_task()`](Self::add_task).
/// 3. Short-lived work started from any thread goes through
///    [`spawn_tracked()`](Self::spawn_tracked) or
///    [`begin_task()`](Self::begin_task).
/// 4. When stopping, call [`signal_stop()`](Self::signal_stop), then
///    [`join_all()`](Self::join_all) and [`seal_and_wait()`](Self::seal_and_wait).
pub struct ShutdownToken {
    /// Sender side of the watch channel; sending `true` signals shutdown.
    stop_tx: watch::Sender<bool>,
    /// Receiver side, cloned for each subscriber.
    stop_rx: watch::Receiver<bool>,
    /// Whether the owner is currently online.
    online: AtomicBool,
    /// Long-running task handles to await on shutdown.
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    in_flight: Arc<InFlight>,
}

impl ShutdownToken {
    /// Create a new shutdown token in the "not online" state.
    pub fn new() -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);

        Self {
            stop_tx,
            stop_rx,
            online: AtomicBool::new(false),
            task_handles: Mutex::new(Vec::new()),
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// Get a new subscription to the stop signal.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.stop_rx.clone()
    }

    /// Check whether the stop signal has been sent.
    pub fn is_stopped(&self) -> bool {
        *self.stop_rx.borrow()
    }

    // -- Online state --

    /// Set the online flag.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Whether the owner is currently online.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    // -- Long-running tasks --

    /// Register an additional background task handle.
    pub async fn add_task(&self, handle: JoinHandle<()>) {
        self.task_handles.lock().await.push(handle);
    }

    // -- In-flight tasks --

    /// Mark the start of a tracked task.
    ///
    /// Returns `None` once [`seal_and_wait()`](Self::seal_and_wait) has begun.
    pub fn begin_task(&self) -> Option<TaskGuard> {
        self.in_flight.count.fetch_add(1, Ordering::SeqCst);
        let guard = TaskGuard {
            in_flight: Arc::clone(&self.in_flight),
        };
        if self.in_flight.sealed.load(Ordering::SeqCst) {
            // Dropping the guard undoes the increment and wakes the waiter.
            drop(guard);
            return None;
        }
        Some(guard)
    }

    /// Spawn `fut` on `runtime` as a tracked task.
    ///
    /// Safe to call from threads outside the runtime. Returns `false` if the
    /// token is sealed and the future was dropped unstarted.
    pub fn spawn_tracked<F>(&self, runtime: &Handle, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Some(guard) = self.begin_task() else {
            return false;
        };
        runtime.spawn(async move {
            let _guard = guard;
            fut.await;
        });
        true
    }

    /// Number of tracked tasks still running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::SeqCst)
    }

    /// Wait until no tracked task is running. New tasks are still admitted.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.in_flight.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    // -- Shutdown sequence --

    /// Send the stop signal to all subscribers.
    ///
    /// This is idempotent: calling it multiple times is harmless.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Await all registered long-running tasks, draining the handle list.
    ///
    /// Any `JoinError`s (panics, cancellations) are silently ignored.
    pub async fn join_all(&self) {
        let handles: Vec<JoinHandle<()>> = self.task_handles.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Stop admitting tracked tasks and wait for those already running.
    pub async fn seal_and_wait(&self) {
        self.in_flight.sealed.store(true, Ordering::SeqCst);
        self.wait_idle().await;
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

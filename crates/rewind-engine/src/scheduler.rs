//! Periodic task scheduling for replay sessions.
//!
//! [`TaskRegistry`] tracks the tokio tasks a session spawns and stops them
//! all on shutdown. [`ReadinessLatch`] holds a session's tick loop back until
//! every viewer can observe the replay.
//!
//! Task handles are stored behind a `parking_lot::Mutex`. The lock is only
//! held to push or drain handles, never across an `.await`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

// ---------------------------------------------------------------------------
// TaskRegistry
// ---------------------------------------------------------------------------

/// Spawned periodic tasks with cooperative shutdown.
#[derive(Debug)]
pub struct TaskRegistry {
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Run `f` every `interval` until it returns `false` or the registry
    /// shuts down. The first call happens immediately.
    ///
    /// Must be called from within a tokio runtime. Does nothing once the
    /// registry has shut down.
    pub fn spawn_interval_until<F, Fut>(&self, interval: Duration, f: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.spawn_gated_interval(ReadinessLatch::new(0), interval, f);
    }

    /// Like [`spawn_interval_until`](Self::spawn_interval_until), but wait
    /// for `latch` to open before the first call.
    pub fn spawn_gated_interval<F, Fut>(&self, latch: ReadinessLatch, interval: Duration, mut f: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        if self.is_shut_down() {
            return;
        }
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.changed() => return,
                _ = latch.wait() => {}
            }
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        if !f().await {
                            break;
                        }
                    }
                }
            }
        });
        self.handles.lock().push(handle);
    }

    /// Signal shutdown and abort every task.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Number of tasks spawned and not yet finished.
    pub fn active_tasks(&self) -> usize {
        self.handles
            .lock()
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// ReadinessLatch
// ---------------------------------------------------------------------------

/// A countdown latch. [`wait`](Self::wait) resolves once the count reaches
/// zero; a latch created with zero is open from the start.
#[derive(Debug, Clone)]
pub struct ReadinessLatch {
    count: Arc<watch::Sender<usize>>,
}

impl ReadinessLatch {
    pub fn new(count: usize) -> Self {
        let (count, _) = watch::channel(count);
        Self {
            count: Arc::new(count),
        }
    }

    /// Decrement the count, saturating at zero. Returns the new count.
    pub fn count_down(&self) -> usize {
        self.count.send_modify(|count| *count = count.saturating_sub(1));
        *self.count.borrow()
    }

    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.count() == 0
    }

    /// Wait until the count reaches zero.
    pub async fn wait(&self) {
        let mut rx = self.count.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

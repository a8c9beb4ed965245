//! Running a session on tokio.
//!
//! [`SessionHandle::launch`] initializes a [`ReplaySession`], puts it behind
//! an `Arc<parking_lot::Mutex<_>>` and spawns two periodic tasks:
//!
//! - the **tick loop**, which waits on the session's [`ReadinessLatch`] and
//!   then calls [`ReplaySession::tick`] every `tick_interval` while the
//!   session stays initialized;
//! - the **status loop**, which every `status_interval` renders the latest
//!   published [`StatusSnapshot`] to all viewers. It never touches the
//!   session itself.
//!
//! Control calls on the handle take the same lock as the tick loop, so they
//! are serialized with ticks and teardown. The lock is never held across an
//! `.await`.

use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::watch;

use crate::collab::ViewerId;
use crate::scheduler::{ReadinessLatch, TaskRegistry};
use crate::session::{ReplaySession, TickReport};
use crate::status::{display_status, StatusSnapshot};
use crate::PlaybackError;

/// Shared handle to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session: Arc<Mutex<ReplaySession>>,
    tasks: Arc<TaskRegistry>,
    latch: ReadinessLatch,
    /// Initial viewers that have not reported ready yet.
    awaiting: Arc<Mutex<BTreeSet<ViewerId>>>,
    status_rx: watch::Receiver<StatusSnapshot>,
}

impl SessionHandle {
    /// Initialize `session` and start its tick and status loops.
    ///
    /// Must be called from within a tokio runtime.
    pub fn launch(mut session: ReplaySession) -> Result<Self, PlaybackError> {
        session.init()?;

        let tasks = Arc::new(TaskRegistry::new());
        session.attach_tasks(Arc::clone(&tasks));

        let readiness = session.readiness_count();
        let latch = ReadinessLatch::new(readiness);
        let awaiting: BTreeSet<ViewerId> = if readiness > 0 {
            session.viewers().iter().copied().collect()
        } else {
            BTreeSet::new()
        };

        let tick_interval = session.config().tick_interval;
        let status_interval = session.config().status_interval;
        let initialized = session.initialized_flag();
        let channel = session.channel();
        let status_rx = session.subscribe_status();
        let session = Arc::new(Mutex::new(session));

        {
            let session = Arc::clone(&session);
            tasks.spawn_gated_interval(latch.clone(), tick_interval, move || {
                let keep_going = initialized.load(Ordering::SeqCst) && {
                    let mut session = session.lock();
                    session.tick(false, false);
                    session.is_initialized()
                };
                std::future::ready(keep_going)
            });
        }

        {
            let status_rx = status_rx.clone();
            tasks.spawn_interval_until(status_interval, move || {
                let snapshot = status_rx.borrow().clone();
                if snapshot.is_displayed() {
                    display_status(channel.as_ref(), &snapshot);
                }
                std::future::ready(!snapshot.closed)
            });
        }

        tracing::debug!(readiness, ?tick_interval, ?status_interval, "replay session launched");

        Ok(Self {
            session,
            tasks,
            latch,
            awaiting: Arc::new(Mutex::new(awaiting)),
            status_rx,
        })
    }

    /// Report that an initial viewer can observe the replay. Returns `false`
    /// if the viewer was not being waited for.
    pub fn viewer_ready(&self, viewer: ViewerId) -> bool {
        if !self.awaiting.lock().remove(&viewer) {
            return false;
        }
        let remaining = self.latch.count_down();
        tracing::debug!(%viewer, remaining, "viewer ready");
        true
    }

    /// Lock the session. Do not hold the guard across an `.await`.
    pub fn lock(&self) -> MutexGuard<'_, ReplaySession> {
        self.session.lock()
    }

    /// Run `f` with the session locked.
    pub fn with<R>(&self, f: impl FnOnce(&mut ReplaySession) -> R) -> R {
        f(&mut self.session.lock())
    }

    /// Viewers join through [`SessionManager::add_viewer`](crate::manager::SessionManager::add_viewer),
    /// which keeps a viewer to one session at a time.
    pub(crate) fn add_viewer(&self, viewer: ViewerId) -> Result<bool, PlaybackError> {
        self.with(|s| s.add_viewer(viewer))
    }

    /// Remove a viewer; the session tears down when the last one leaves.
    pub fn remove_viewer(&self, viewer: ViewerId) -> bool {
        let removed = self.with(|s| s.remove_viewer(viewer));
        // A viewer leaving before it was ready must not stall the others.
        if removed {
            self.viewer_ready(viewer);
        }
        removed
    }

    pub fn set_speed(&self, speed: f64) -> Result<(), PlaybackError> {
        self.with(|s| s.set_speed(speed))
    }

    pub fn set_paused(&self, paused: bool) -> Result<(), PlaybackError> {
        self.with(|s| s.set_paused(paused))
    }

    pub fn toggle_paused(&self) -> Result<bool, PlaybackError> {
        self.with(|s| s.toggle_paused())
    }

    pub fn set_step_duration(&self, step: Duration) -> Result<(), PlaybackError> {
        self.with(|s| s.set_step_duration(step))
    }

    pub fn seek_to(&self, target: Duration) -> Result<TickReport, PlaybackError> {
        self.with(|s| s.seek_to(target))
    }

    pub fn step_forward(&self) -> Result<TickReport, PlaybackError> {
        self.with(|s| s.step_forward())
    }

    pub fn step_backward(&self) -> Result<TickReport, PlaybackError> {
        self.with(|s| s.step_backward())
    }

    pub fn restart(&self) -> Result<TickReport, PlaybackError> {
        self.with(|s| s.restart())
    }

    /// The latest published status.
    pub fn status(&self) -> StatusSnapshot {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_rx.clone()
    }

    /// Whether the session is still running.
    pub fn is_active(&self) -> bool {
        !self.status_rx.borrow().closed
    }

    /// Tear the session down.
    pub fn shutdown(&self) {
        self.with(|s| s.un_init());
    }

    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.tasks
    }

    pub fn latch(&self) -> &ReadinessLatch {
        &self.latch
    }
}

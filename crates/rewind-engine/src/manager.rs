//! Session bookkeeping across viewers.
//!
//! The [`SessionManager`] builds the [`ActionRegistry`] once, launches
//! sessions, and remembers which viewer is watching which session so a
//! viewer never watches two replays at once.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use rewind_model::replay::Replay;

use crate::collab::{ViewerChannel, ViewerId, WorldContext};
use crate::config::SessionConfig;
use crate::dispatch::ActionRegistry;
use crate::runtime::SessionHandle;
use crate::session::ReplaySession;
use crate::PlaybackError;

/// Identifier of a session launched by a [`SessionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Sessions {
    next_id: u64,
    running: HashMap<SessionId, SessionHandle>,
    watching: HashMap<ViewerId, SessionId>,
}

impl Sessions {
    /// Forget sessions that tore themselves down, and viewers that left a
    /// session through its handle.
    fn prune(&mut self) {
        let closed: Vec<SessionId> = self
            .running
            .iter()
            .filter(|(_, handle)| !handle.is_active())
            .map(|(&id, _)| id)
            .collect();
        for id in closed {
            self.forget(id);
        }
        let running = &self.running;
        self.watching.retain(|viewer, id| {
            running
                .get(id)
                .is_some_and(|handle| handle.lock().viewers().contains(viewer))
        });
    }

    fn forget(&mut self, id: SessionId) -> Option<SessionHandle> {
        self.watching.retain(|_, session| *session != id);
        self.running.remove(&id)
    }
}

/// Launches replay sessions and tracks their viewers.
pub struct SessionManager {
    registry: Arc<ActionRegistry>,
    world: Arc<dyn WorldContext>,
    channel: Arc<dyn ViewerChannel>,
    config: SessionConfig,
    sessions: Mutex<Sessions>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("sessions", &self.sessions.lock().running.len())
            .finish()
    }
}

impl SessionManager {
    /// A manager using the built-in action handlers.
    pub fn new(
        world: Arc<dyn WorldContext>,
        channel: Arc<dyn ViewerChannel>,
        config: SessionConfig,
    ) -> Self {
        Self::with_registry(ActionRegistry::new(), world, channel, config)
    }

    pub fn with_registry(
        registry: ActionRegistry,
        world: Arc<dyn WorldContext>,
        channel: Arc<dyn ViewerChannel>,
        config: SessionConfig,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            world,
            channel,
            config,
            sessions: Mutex::new(Sessions::default()),
        }
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    /// Launch a session of `replay` for `viewers`.
    ///
    /// Fails with [`PlaybackError::ViewerBusy`] if any viewer is already
    /// watching a running session. Must be called from within a tokio
    /// runtime.
    pub fn start_session(
        &self,
        replay: Arc<Replay>,
        viewers: Vec<ViewerId>,
    ) -> Result<(SessionId, SessionHandle), PlaybackError> {
        let mut sessions = self.sessions.lock();
        sessions.prune();
        if let Some(&viewer) = viewers.iter().find(|v| sessions.watching.contains_key(*v)) {
            return Err(PlaybackError::ViewerBusy { viewer });
        }

        let session = ReplaySession::new(
            replay,
            viewers.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.world),
            Arc::clone(&self.channel),
            self.config.clone(),
        )?;
        let handle = SessionHandle::launch(session)?;

        sessions.next_id += 1;
        let id = SessionId(sessions.next_id);
        for viewer in viewers {
            sessions.watching.insert(viewer, id);
        }
        sessions.running.insert(id, handle.clone());
        tracing::info!(session = %id, "started replay session");
        Ok((id, handle))
    }

    pub fn session(&self, id: SessionId) -> Option<SessionHandle> {
        let mut sessions = self.sessions.lock();
        sessions.prune();
        sessions.running.get(&id).cloned()
    }

    /// The session `viewer` is watching, if any.
    pub fn session_for_viewer(&self, viewer: ViewerId) -> Option<(SessionId, SessionHandle)> {
        let mut sessions = self.sessions.lock();
        sessions.prune();
        let id = *sessions.watching.get(&viewer)?;
        sessions.running.get(&id).map(|handle| (id, handle.clone()))
    }

    /// Add a viewer to a running session.
    pub fn add_viewer(&self, id: SessionId, viewer: ViewerId) -> Result<(), PlaybackError> {
        let mut sessions = self.sessions.lock();
        sessions.prune();
        if sessions.watching.contains_key(&viewer) {
            return Err(PlaybackError::ViewerBusy { viewer });
        }
        let handle = sessions
            .running
            .get(&id)
            .ok_or(PlaybackError::SessionClosed)?;
        handle.add_viewer(viewer)?;
        sessions.watching.insert(viewer, id);
        Ok(())
    }

    /// Take `viewer` out of whatever session they watch. Returns `false` if
    /// they were not watching anything.
    pub fn remove_viewer(&self, viewer: ViewerId) -> bool {
        let mut sessions = self.sessions.lock();
        let Some(id) = sessions.watching.remove(&viewer) else {
            return false;
        };
        if let Some(handle) = sessions.running.get(&id) {
            handle.remove_viewer(viewer);
        }
        sessions.prune();
        true
    }

    /// Tear a session down. Returns `false` if it was not running.
    pub fn stop_session(&self, id: SessionId) -> bool {
        let handle = self.sessions.lock().forget(id);
        match handle {
            Some(handle) => {
                handle.shutdown();
                true
            }
            None => false,
        }
    }

    /// Number of running sessions.
    pub fn active_sessions(&self) -> usize {
        let mut sessions = self.sessions.lock();
        sessions.prune();
        sessions.running.len()
    }

    /// Tear every session down.
    pub fn shutdown_all(&self) {
        let handles: Vec<SessionHandle> = {
            let mut sessions = self.sessions.lock();
            sessions.watching.clear();
            sessions.running.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            handle.shutdown();
        }
    }
}

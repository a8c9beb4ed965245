//! The replay session tick engine.
//!
//! A [`ReplaySession`] owns the replay clock of one group of viewers watching
//! one replay. Every [`tick`](ReplaySession::tick) turns the wall-clock time
//! elapsed since the previous tick into replay time (scaled by the playback
//! speed) and then does one of three things:
//!
//! - **time step**: reconcile the world directly to the new replay time
//!   through the [time-step resolver](crate::timestep) and rebuild the
//!   pending queue;
//! - **paused**: remember the wall-clock time and do nothing else;
//! - **playback**: dispatch every pending action the new replay time has
//!   passed, in timestamp order.
//!
//! Any dispatch failure is fatal to the session: it is paused, every viewer
//! is told, and the session is torn down.
//!
//! The session is synchronous. [`SessionHandle`](crate::runtime::SessionHandle)
//! drives it from a periodic task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use rewind_model::replay::Replay;

use crate::collab::{ContextId, ViewerChannel, ViewerId, WorldContext};
use crate::config::SessionConfig;
use crate::dispatch::{ActionRegistry, PlaybackContext};
use crate::entities::EntityManager;
use crate::queue::PendingActions;
use crate::scheduler::TaskRegistry;
use crate::status::{display_status, StatusSnapshot};
use crate::timestep::{apply_time_step, plan_time_step_from};
use crate::PlaybackError;

// ---------------------------------------------------------------------------
// SessionState / TickOutcome / TickReport
// ---------------------------------------------------------------------------

/// Lifecycle state of a session, derived from its flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, [`init`](ReplaySession::init) not called yet.
    Initializing,
    Playing,
    Paused,
    /// A time step is being applied.
    Seeking,
    /// Replay time sits at the end of the replay.
    Ended,
    TornDown,
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The session is not initialized or has been torn down.
    Inactive,
    Paused,
    Advanced,
    /// Playback reached the end of the replay and paused.
    ReachedEnd,
    TimeStep,
    /// A dispatch failed and the session was torn down.
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub outcome: TickOutcome,
    /// Actions (or time-step effects) applied during the tick.
    pub actions_dispatched: usize,
    /// Replay time after the tick.
    pub time: Duration,
}

// ---------------------------------------------------------------------------
// ReplaySession
// ---------------------------------------------------------------------------

/// Playback state of one replay for one group of viewers.
pub struct ReplaySession {
    replay: Arc<Replay>,
    registry: Arc<ActionRegistry>,
    world: Arc<dyn WorldContext>,
    channel: Arc<dyn ViewerChannel>,
    config: SessionConfig,

    context: ContextId,
    owns_context: bool,
    entities: EntityManager,
    queue: PendingActions,
    viewers: Vec<ViewerId>,
    previous_contexts: HashMap<ViewerId, ContextId>,

    time: Duration,
    last_replay_time: Duration,
    last_tick_time: Option<Instant>,
    /// Whether the actions stamped exactly `last_replay_time` were applied.
    applied_at_time: bool,
    paused: bool,
    speed: f64,
    step_duration: Duration,

    has_spawned_entities: bool,
    seeking: bool,
    initialized: Arc<AtomicBool>,
    torn_down: bool,
    last_failure: Option<PlaybackError>,

    status_tx: watch::Sender<StatusSnapshot>,
    tasks: Option<Arc<TaskRegistry>>,
}

impl std::fmt::Debug for ReplaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplaySession")
            .field("replay", &self.replay.id_hex())
            .field("state", &self.state())
            .field("time", &self.time)
            .field("speed", &self.speed)
            .field("viewers", &self.viewers)
            .finish()
    }
}

impl ReplaySession {
    /// Create a session for `viewers`.
    ///
    /// A replay that needs a dedicated context gets a fresh one from the
    /// world; otherwise the session plays in the first viewer's current
    /// context (or a fresh one if they are nowhere).
    ///
    /// Fails with [`PlaybackError::InvalidConfig`] if `config` does not pass
    /// [`SessionConfig::validate`].
    pub fn new(
        replay: Arc<Replay>,
        viewers: Vec<ViewerId>,
        registry: Arc<ActionRegistry>,
        world: Arc<dyn WorldContext>,
        channel: Arc<dyn ViewerChannel>,
        config: SessionConfig,
    ) -> Result<Self, PlaybackError> {
        config.validate()?;

        let mut unique: Vec<ViewerId> = Vec::with_capacity(viewers.len());
        for viewer in viewers {
            if !unique.contains(&viewer) {
                unique.push(viewer);
            }
        }
        let first = *unique.first().ok_or(PlaybackError::NoViewers)?;

        let (context, owns_context) = match world.current_context(first) {
            Some(context) if !replay.requires_dedicated_context() => (context, false),
            _ => (world.create_context()?, true),
        };

        let mut queue = PendingActions::new();
        queue.reset(&replay, Duration::ZERO);

        let speed = config.initial_speed;
        let (status_tx, _) = watch::channel(StatusSnapshot {
            time: Duration::ZERO,
            duration: replay.duration(),
            paused: true,
            speed,
            viewers: unique.clone(),
            started: false,
            closed: false,
        });

        tracing::debug!(
            replay = %replay.id_hex(),
            %context,
            owns_context,
            viewers = unique.len(),
            "created replay session"
        );

        Ok(Self {
            entities: EntityManager::new(world.clone(), context),
            step_duration: config.step_duration,
            replay,
            registry,
            world,
            channel,
            config,
            context,
            owns_context,
            queue,
            viewers: unique,
            previous_contexts: HashMap::new(),
            time: Duration::ZERO,
            last_replay_time: Duration::ZERO,
            last_tick_time: None,
            applied_at_time: false,
            paused: true,
            speed,
            has_spawned_entities: false,
            seeking: false,
            initialized: Arc::new(AtomicBool::new(false)),
            torn_down: false,
            last_failure: None,
            status_tx,
            tasks: None,
        })
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Attach every viewer and mark the session initialized. Starts paused.
    ///
    /// Per-viewer failures are logged and skipped. Calling `init` on an
    /// initialized session does nothing.
    pub fn init(&mut self) -> Result<(), PlaybackError> {
        if self.torn_down {
            return Err(PlaybackError::SessionClosed);
        }
        if self.is_initialized() {
            return Ok(());
        }
        self.paused = true;
        for viewer in self.viewers.clone() {
            self.attach_viewer(viewer);
        }
        self.initialized.store(true, Ordering::SeqCst);
        tracing::info!(
            replay = %self.replay.id_hex(),
            context = %self.context,
            viewers = self.viewers.len(),
            "replay session initialized"
        );
        self.publish();
        Ok(())
    }

    /// Tear the session down: stop its tasks, despawn every entity, detach
    /// every viewer and release a dedicated context. Later calls do nothing.
    pub fn un_init(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.paused = true;
        let was_initialized = self.initialized.swap(false, Ordering::SeqCst);

        if let Some(tasks) = &self.tasks {
            tasks.shutdown();
        }
        self.entities.remove_all_entities();
        for viewer in std::mem::take(&mut self.viewers) {
            if was_initialized {
                self.detach_viewer(viewer);
            }
        }
        self.queue.clear();
        if self.owns_context {
            if let Err(error) = self.world.release_context(self.context) {
                tracing::warn!(context = %self.context, %error, "failed to release context");
            }
        }
        self.publish();
        tracing::info!(replay = %self.replay.id_hex(), "replay session torn down");
    }

    /// Register the task registry running this session, so teardown can stop
    /// it.
    pub fn attach_tasks(&mut self, tasks: Arc<TaskRegistry>) {
        if self.torn_down {
            tasks.shutdown();
        }
        self.tasks = Some(tasks);
    }

    // -----------------------------------------------------------------------
    // Ticking
    // -----------------------------------------------------------------------

    /// Tick against the current wall-clock time.
    pub fn tick(&mut self, force_tick: bool, is_time_step: bool) -> TickReport {
        self.tick_at(Instant::now(), force_tick, is_time_step)
    }

    /// Tick as if the wall clock read `now`.
    ///
    /// `force_tick` plays even while paused. `is_time_step` reconciles the
    /// world from the previous replay time to the current one through the
    /// time-step resolver instead of playing actions one by one.
    pub fn tick_at(&mut self, now: Instant, force_tick: bool, is_time_step: bool) -> TickReport {
        if self.torn_down || !self.is_initialized() {
            return self.report(TickOutcome::Inactive, 0);
        }

        if !self.has_spawned_entities {
            if let Err(error) = self.spawn_start_entities() {
                return self.abort(error, 0);
            }
            self.has_spawned_entities = true;
            self.broadcast_status();
        }

        let elapsed = self
            .last_tick_time
            .map_or(Duration::ZERO, |last| now.saturating_duration_since(last));
        self.last_tick_time = Some(now);

        let report = if is_time_step {
            self.time_step(elapsed)
        } else if self.paused && !force_tick {
            self.report(TickOutcome::Paused, 0)
        } else {
            self.play(elapsed)
        };

        if report.outcome != TickOutcome::Aborted {
            self.last_replay_time = self.time;
            self.publish();
        }
        report
    }

    fn spawn_start_entities(&mut self) -> Result<(), PlaybackError> {
        let replay = Arc::clone(&self.replay);
        for definition in replay.spawn_on_start_entities() {
            self.entities.spawn_entity(definition, None, None)?;
        }
        Ok(())
    }

    fn scaled(&self, elapsed: Duration) -> Duration {
        if self.speed == 1.0 {
            return elapsed;
        }
        Duration::try_from_secs_f64(elapsed.as_secs_f64() * self.speed).unwrap_or(Duration::MAX)
    }

    fn time_step(&mut self, elapsed: Duration) -> TickReport {
        let from = self.last_replay_time;
        let to = self
            .time
            .saturating_add(self.scaled(elapsed))
            .min(self.replay.duration());
        let effects = plan_time_step_from(&self.replay, from, to, self.applied_at_time);
        tracing::debug!(?from, ?to, effects = effects.len(), "applying time step");

        self.seeking = true;
        let result = self.with_context(|registry, ctx| apply_time_step(registry, ctx, &effects));
        self.seeking = false;
        let applied = match result {
            Ok(applied) => applied,
            Err(error) => return self.abort(error, 0),
        };

        self.time = to;
        self.queue.reset(&self.replay, to);
        self.applied_at_time = true;
        if self.has_ended() && !self.paused {
            self.paused = true;
            tracing::info!(replay = %self.replay.id_hex(), "replay reached its end");
        }
        self.report(TickOutcome::TimeStep, applied)
    }

    fn play(&mut self, elapsed: Duration) -> TickReport {
        let duration = self.replay.duration();
        let target = self.time.saturating_add(self.scaled(elapsed));
        if target <= self.time {
            return self.report(TickOutcome::Advanced, 0);
        }

        // Once the end is reached everything left is due, including actions
        // stamped exactly at the end.
        let horizon = if target >= duration {
            Duration::MAX
        } else {
            target
        };
        // A time step leaves the actions it landed on queued but already
        // applied.
        let applied_at = self.applied_at_time.then_some(self.time);
        let mut dispatched = 0;
        while let Some(action) = self.queue.pop_before(horizon) {
            if Some(action.timestamp) == applied_at {
                continue;
            }
            self.time = action.timestamp.min(duration);
            if let Err(error) = self.with_context(|registry, ctx| registry.dispatch(&action, ctx)) {
                return self.abort(error, dispatched);
            }
            dispatched += 1;
        }

        if target >= duration {
            self.time = duration;
            self.applied_at_time = true;
            if !self.paused {
                tracing::info!(replay = %self.replay.id_hex(), "replay reached its end");
            }
            self.paused = true;
            self.broadcast_status();
            return self.report(TickOutcome::ReachedEnd, dispatched);
        }

        self.time = target;
        self.applied_at_time = self.queue.peek().map_or(true, |next| next.timestamp != target);
        self.report(TickOutcome::Advanced, dispatched)
    }

    fn with_context<R>(
        &mut self,
        f: impl FnOnce(&ActionRegistry, &mut PlaybackContext<'_>) -> R,
    ) -> R {
        let mut ctx = PlaybackContext {
            replay: &self.replay,
            entities: &mut self.entities,
            world: self.world.as_ref(),
            channel: self.channel.as_ref(),
            context: self.context,
            viewers: &self.viewers,
        };
        f(&self.registry, &mut ctx)
    }

    fn abort(&mut self, error: PlaybackError, dispatched: usize) -> TickReport {
        tracing::error!(
            replay = %self.replay.id_hex(),
            time = ?self.time,
            %error,
            "replay playback failed"
        );
        self.paused = true;
        for &viewer in &self.viewers {
            if let Err(error) = self.channel.notify(viewer, &self.config.failure_message) {
                tracing::warn!(%viewer, %error, "failed to report playback failure");
            }
        }
        self.last_failure = Some(error);
        self.un_init();
        self.report(TickOutcome::Aborted, dispatched)
    }

    fn report(&self, outcome: TickOutcome, actions_dispatched: usize) -> TickReport {
        TickReport {
            outcome,
            actions_dispatched,
            time: self.time,
        }
    }

    // -----------------------------------------------------------------------
    // Seeking
    // -----------------------------------------------------------------------

    /// Jump to `target` (clamped to the replay), reconciling the world.
    pub fn seek_to(&mut self, target: Duration) -> Result<TickReport, PlaybackError> {
        self.seek_at(Instant::now(), target)
    }

    /// [`seek_to`](Self::seek_to) as if the wall clock read `now`.
    pub fn seek_at(&mut self, now: Instant, target: Duration) -> Result<TickReport, PlaybackError> {
        self.ensure_running()?;
        self.last_replay_time = self.time;
        self.time = target.min(self.replay.duration());
        self.last_tick_time = Some(now);
        tracing::debug!(from = ?self.last_replay_time, to = ?self.time, "seeking");

        let report = self.tick_at(now, true, true);
        if report.outcome != TickOutcome::Aborted {
            self.broadcast_status();
        }
        Ok(report)
    }

    /// Seek forward by the step duration.
    pub fn step_forward(&mut self) -> Result<TickReport, PlaybackError> {
        self.seek_to(self.time.saturating_add(self.step_duration))
    }

    /// Seek backward by the step duration.
    pub fn step_backward(&mut self) -> Result<TickReport, PlaybackError> {
        self.seek_to(self.time.saturating_sub(self.step_duration))
    }

    pub fn restart(&mut self) -> Result<TickReport, PlaybackError> {
        self.seek_to(Duration::ZERO)
    }

    // -----------------------------------------------------------------------
    // Controls
    // -----------------------------------------------------------------------

    /// Change the playback speed. Must be finite and non-negative.
    pub fn set_speed(&mut self, speed: f64) -> Result<(), PlaybackError> {
        if !(speed.is_finite() && speed >= 0.0) {
            return Err(PlaybackError::InvalidSpeed { speed });
        }
        self.ensure_open()?;
        self.speed = speed;
        self.broadcast_status();
        Ok(())
    }

    /// Pause or resume. Resuming an ended replay restarts it.
    pub fn set_paused(&mut self, paused: bool) -> Result<(), PlaybackError> {
        self.ensure_open()?;
        if !paused && self.has_ended() && self.is_initialized() {
            self.restart()?;
        }
        self.paused = paused;
        self.broadcast_status();
        Ok(())
    }

    /// Flip the pause flag, returning the new value.
    pub fn toggle_paused(&mut self) -> Result<bool, PlaybackError> {
        let paused = !self.paused;
        self.set_paused(paused)?;
        Ok(paused)
    }

    pub fn set_step_duration(&mut self, step: Duration) -> Result<(), PlaybackError> {
        self.ensure_open()?;
        self.step_duration = step;
        self.broadcast_status();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Viewers
    // -----------------------------------------------------------------------

    /// Add a viewer. Returns `false` if they were already watching.
    pub fn add_viewer(&mut self, viewer: ViewerId) -> Result<bool, PlaybackError> {
        self.ensure_open()?;
        if self.viewers.contains(&viewer) {
            return Ok(false);
        }
        self.viewers.push(viewer);
        if self.is_initialized() {
            self.attach_viewer(viewer);
        }
        self.broadcast_status();
        tracing::debug!(%viewer, "viewer joined replay");
        Ok(true)
    }

    /// Remove a viewer, tearing the session down if they were the last one.
    /// Returns `false` if they were not watching.
    pub fn remove_viewer(&mut self, viewer: ViewerId) -> bool {
        let Some(index) = self.viewers.iter().position(|&v| v == viewer) else {
            return false;
        };
        self.viewers.remove(index);
        if self.is_initialized() {
            self.detach_viewer(viewer);
        }
        tracing::debug!(%viewer, remaining = self.viewers.len(), "viewer left replay");
        if self.viewers.is_empty() {
            self.un_init();
        } else {
            self.publish();
        }
        true
    }

    fn attach_viewer(&mut self, viewer: ViewerId) {
        if let Err(error) = self.channel.add_to_group(viewer) {
            tracing::warn!(%viewer, %error, "failed to add viewer to group");
        }
        let current = self.world.current_context(viewer);
        if current != Some(self.context) {
            match self.world.relocate_viewer(viewer, self.context) {
                Ok(()) => {
                    if let Some(previous) = current {
                        self.previous_contexts.insert(viewer, previous);
                    }
                }
                Err(error) => {
                    tracing::warn!(%viewer, %error, "failed to move viewer into replay");
                }
            }
        }
        self.entities.add_entity_viewer(viewer);
    }

    fn detach_viewer(&mut self, viewer: ViewerId) {
        self.entities.remove_entity_viewer(viewer);
        if let Err(error) = self.channel.clear_display(viewer) {
            tracing::warn!(%viewer, %error, "failed to clear status display");
        }
        if let Err(error) = self.channel.remove_from_group(viewer) {
            tracing::warn!(%viewer, %error, "failed to remove viewer from group");
        }
        if let Some(previous) = self.previous_contexts.remove(&viewer) {
            if let Err(error) = self.world.relocate_viewer(viewer, previous) {
                tracing::warn!(%viewer, %error, "failed to return viewer to previous context");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            time: self.time,
            duration: self.replay.duration(),
            paused: self.paused,
            speed: self.speed,
            viewers: self.viewers.clone(),
            started: self.has_spawned_entities,
            closed: self.torn_down,
        }
    }

    /// Receive every snapshot the session publishes.
    pub fn subscribe_status(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_tx.subscribe()
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status());
    }

    /// Publish and immediately show the status to every viewer.
    fn broadcast_status(&self) {
        let snapshot = self.status();
        if snapshot.is_displayed() {
            display_status(self.channel.as_ref(), &snapshot);
        }
        self.status_tx.send_replace(snapshot);
    }

    pub fn state(&self) -> SessionState {
        if self.torn_down {
            SessionState::TornDown
        } else if !self.is_initialized() {
            SessionState::Initializing
        } else if self.seeking {
            SessionState::Seeking
        } else if self.has_ended() {
            SessionState::Ended
        } else if self.paused {
            SessionState::Paused
        } else {
            SessionState::Playing
        }
    }

    fn ensure_open(&self) -> Result<(), PlaybackError> {
        if self.torn_down {
            Err(PlaybackError::SessionClosed)
        } else {
            Ok(())
        }
    }

    fn ensure_running(&self) -> Result<(), PlaybackError> {
        self.ensure_open()?;
        if self.is_initialized() {
            Ok(())
        } else {
            Err(PlaybackError::NotInitialized)
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn replay(&self) -> &Arc<Replay> {
        &self.replay
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn channel(&self) -> Arc<dyn ViewerChannel> {
        Arc::clone(&self.channel)
    }

    pub fn time(&self) -> Duration {
        self.time
    }

    pub fn duration(&self) -> Duration {
        self.replay.duration()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn step_duration(&self) -> Duration {
        self.step_duration
    }

    pub fn viewers(&self) -> &[ViewerId] {
        &self.viewers
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    /// Whether the session created its context and releases it on teardown.
    pub fn owns_context(&self) -> bool {
        self.owns_context
    }

    pub fn entities(&self) -> &EntityManager {
        &self.entities
    }

    pub fn pending(&self) -> &PendingActions {
        &self.queue
    }

    pub fn has_ended(&self) -> bool {
        self.time >= self.replay.duration()
    }

    pub fn has_spawned_entities(&self) -> bool {
        self.has_spawned_entities
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Shared initialized flag, cleared on teardown.
    pub fn initialized_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.initialized)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// How many viewers must report ready before ticking starts.
    pub fn readiness_count(&self) -> usize {
        if self.replay.requires_dedicated_context() {
            self.viewers.len()
        } else {
            0
        }
    }

    /// The error that aborted the session, if any.
    pub fn last_failure(&self) -> Option<&PlaybackError> {
        self.last_failure.as_ref()
    }
}

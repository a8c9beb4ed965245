//! The immutable [`Replay`] and its [`ReplayBuilder`].
//!
//! A replay is built once from a recorded source and never mutated
//! afterwards. Playback sessions share it through an `Arc<Replay>`.
//!
//! Actions are kept sorted by ascending timestamp (stable, so actions that
//! share a timestamp keep their recorded order). The range helpers on
//! [`Replay`] rely on that ordering to answer "which actions lie between two
//! replay times" with a binary search.
//!
//! # Building
//!
//! ```
//! use std::time::Duration;
//! use rewind_model::prelude::*;
//!
//! let mut builder = ReplayBuilder::new();
//! builder.entity(
//!     RecordableEntity::new(RecordedEntityId(1), "arrow"),
//! );
//! builder.record(
//!     Duration::from_secs(2),
//!     EntitySpawn::new(RecordedEntityId(1), Some(RecordablePosition::new(0.0, 70.0, 0.0))),
//! );
//! builder.record(Duration::from_secs(1), ViewerMessage::new("fire!"));
//!
//! let replay = builder.finish().unwrap();
//! // Sorted, and the duration defaults to the last timestamp.
//! assert_eq!(replay.actions()[0].kind.name(), "viewer_message");
//! assert_eq!(replay.duration(), Duration::from_secs(2));
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::action::RecordableAction;
use crate::entity::{RecordableEntity, RecordedEntityId};
use crate::ModelError;

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

/// A complete recorded session: entity definitions, ordered actions and the
/// total recorded duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replay {
    /// Identifier of the recording.
    id: u128,
    /// Unix time in milliseconds at which recording started. Informational.
    #[serde(default)]
    recorded_at: u64,
    /// Total length of the recording.
    duration: Duration,
    /// Whether the recording carries its own world chunks, which requires a
    /// dedicated rendering context per playback session.
    #[serde(default)]
    has_chunks: bool,
    /// Entity definitions keyed by recorded identity.
    entities: BTreeMap<RecordedEntityId, RecordableEntity>,
    /// Actions sorted by ascending timestamp.
    actions: Vec<RecordableAction>,
    /// Free-form annotations (server name, map, ...).
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

impl Replay {
    /// Build a validated replay.
    ///
    /// Actions are stable-sorted by timestamp. Fails if an action lies past
    /// `duration`, refers to an undefined entity, if an entity is defined
    /// twice, or if a spawn-on-start entity has no spawn position.
    pub fn new(
        id: u128,
        duration: Duration,
        has_chunks: bool,
        entities: Vec<RecordableEntity>,
        actions: Vec<RecordableAction>,
    ) -> Result<Self, ModelError> {
        let mut by_id = BTreeMap::new();
        for entity in entities {
            if entity.spawn_on_start && entity.spawn_position.is_none() {
                return Err(ModelError::MissingSpawnPosition { entity: entity.id });
            }
            let id = entity.id;
            if by_id.insert(id, entity).is_some() {
                return Err(ModelError::DuplicateEntity { entity: id });
            }
        }

        let replay = Self::from_parts_unchecked(id, duration, has_chunks, by_id, actions);
        replay.validate()?;
        Ok(replay)
    }

    /// Assemble a replay without validating it. Actions are still sorted.
    ///
    /// Playback of an unchecked replay may fail at dispatch time; the engine
    /// treats such failures as fatal to the session.
    pub fn from_parts_unchecked(
        id: u128,
        duration: Duration,
        has_chunks: bool,
        entities: BTreeMap<RecordedEntityId, RecordableEntity>,
        mut actions: Vec<RecordableAction>,
    ) -> Self {
        actions.sort_by_key(|a| a.timestamp);
        Self {
            id,
            recorded_at: 0,
            duration,
            has_chunks,
            entities,
            actions,
            metadata: BTreeMap::new(),
        }
    }

    /// Parse a replay fixture from JSON and validate it.
    pub fn from_json_str(json: &str) -> Result<Self, ModelError> {
        let mut replay: Replay = serde_json::from_str(json)?;
        replay.actions.sort_by_key(|a| a.timestamp);
        for entity in replay.entities.values() {
            if entity.spawn_on_start && entity.spawn_position.is_none() {
                return Err(ModelError::MissingSpawnPosition { entity: entity.id });
            }
        }
        replay.validate()?;
        Ok(replay)
    }

    /// Serialize to a JSON fixture.
    pub fn to_json_string(&self) -> Result<String, ModelError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn validate(&self) -> Result<(), ModelError> {
        for action in &self.actions {
            if action.timestamp > self.duration {
                return Err(ModelError::ActionPastEnd {
                    kind: action.kind.name(),
                    timestamp: action.timestamp,
                    duration: self.duration,
                });
            }
            if let Some(entity) = action.entity() {
                if !self.entities.contains_key(&entity) {
                    return Err(ModelError::UnknownEntity {
                        kind: action.kind.name(),
                        entity,
                        timestamp: action.timestamp,
                    });
                }
            }
        }
        Ok(())
    }

    // -- accessors ----------------------------------------------------------

    pub fn id(&self) -> u128 {
        self.id
    }

    /// The id as a 32-digit lowercase hex string.
    pub fn id_hex(&self) -> String {
        format!("{:032x}", self.id)
    }

    pub fn recorded_at(&self) -> u64 {
        self.recorded_at
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Whether playback needs a rendering context of its own.
    pub fn requires_dedicated_context(&self) -> bool {
        self.has_chunks
    }

    /// All actions, sorted by ascending timestamp.
    pub fn actions(&self) -> &[RecordableAction] {
        &self.actions
    }

    pub fn entity(&self, id: RecordedEntityId) -> Option<&RecordableEntity> {
        self.entities.get(&id)
    }

    /// All entity definitions in identity order.
    pub fn entities(&self) -> impl Iterator<Item = &RecordableEntity> {
        self.entities.values()
    }

    /// Entities that must be present before the first action plays.
    pub fn spawn_on_start_entities(&self) -> impl Iterator<Item = &RecordableEntity> {
        self.entities.values().filter(|e| e.spawn_on_start)
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    // -- range queries ------------------------------------------------------

    /// Actions with `timestamp >= from`, ascending.
    pub fn actions_from(&self, from: Duration) -> &[RecordableAction] {
        let start = self.actions.partition_point(|a| a.timestamp < from);
        &self.actions[start..]
    }

    /// Actions with `after < timestamp <= until`, ascending.
    ///
    /// Empty when `until <= after`.
    pub fn actions_between(&self, after: Duration, until: Duration) -> &[RecordableAction] {
        if until <= after {
            return &[];
        }
        let start = self.actions.partition_point(|a| a.timestamp <= after);
        let end = self.actions.partition_point(|a| a.timestamp <= until);
        &self.actions[start..end]
    }
}

// ---------------------------------------------------------------------------
// ReplayBuilder
// ---------------------------------------------------------------------------

/// Incrementally assembles a [`Replay`].
///
/// Actions may be recorded in any order; [`finish`](Self::finish) sorts and
/// validates them. When no explicit duration is set, the replay lasts until
/// its last action.
#[derive(Debug, Default)]
pub struct ReplayBuilder {
    id: u128,
    recorded_at: u64,
    duration: Option<Duration>,
    has_chunks: bool,
    entities: Vec<RecordableEntity>,
    actions: Vec<RecordableAction>,
    metadata: BTreeMap<String, String>,
}

impl ReplayBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&mut self, id: u128) -> &mut Self {
        self.id = id;
        self
    }

    pub fn recorded_at(&mut self, unix_millis: u64) -> &mut Self {
        self.recorded_at = unix_millis;
        self
    }

    /// Set the total duration explicitly.
    pub fn duration(&mut self, duration: Duration) -> &mut Self {
        self.duration = Some(duration);
        self
    }

    pub fn has_chunks(&mut self, has_chunks: bool) -> &mut Self {
        self.has_chunks = has_chunks;
        self
    }

    pub fn metadata(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Add an entity definition.
    pub fn entity(&mut self, entity: RecordableEntity) -> &mut Self {
        self.entities.push(entity);
        self
    }

    /// Record one action.
    pub fn record(
        &mut self,
        timestamp: Duration,
        kind: impl Into<crate::action::ActionKind>,
    ) -> &mut Self {
        self.actions.push(RecordableAction::new(timestamp, kind));
        self
    }

    /// Number of actions recorded so far.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Validate and produce the [`Replay`].
    pub fn finish(self) -> Result<Replay, ModelError> {
        let last = self
            .actions
            .iter()
            .map(|a| a.timestamp)
            .max()
            .unwrap_or_default();
        let duration = self.duration.unwrap_or(last);

        let mut replay = Replay::new(
            self.id,
            duration,
            self.has_chunks,
            self.entities,
            self.actions,
        )?;
        replay.recorded_at = self.recorded_at;
        replay.metadata = self.metadata;

        tracing::debug!(
            replay = %replay.id_hex(),
            actions = replay.actions.len(),
            entities = replay.entities.len(),
            duration = ?replay.duration,
            "replay assembled"
        );
        Ok(replay)
    }
}

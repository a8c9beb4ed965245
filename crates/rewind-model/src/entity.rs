//! Recorded entity definitions.
//!
//! A [`RecordableEntity`] describes an entity as it existed in the recording:
//! its identity, its type, and optionally where it should appear when the
//! replay starts. The live, rendered counterpart is created by the playback
//! engine from this definition.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::position::{RecordablePosition, RecordableVector};

// ---------------------------------------------------------------------------
// RecordedEntityId
// ---------------------------------------------------------------------------

/// Identity of an entity within one recording.
///
/// Stable for the lifetime of the replay; unrelated to any handle the
/// playback world assigns to the live entity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordedEntityId(pub u32);

impl fmt::Debug for RecordedEntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordedEntityId({})", self.0)
    }
}

impl fmt::Display for RecordedEntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// EntitySpawnPosition
// ---------------------------------------------------------------------------

/// Where and how fast an entity was moving when the recording started.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntitySpawnPosition {
    pub position: RecordablePosition,
    #[serde(default)]
    pub velocity: RecordableVector,
}

// ---------------------------------------------------------------------------
// RecordableEntity
// ---------------------------------------------------------------------------

/// Definition of one recorded entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordableEntity {
    /// Identity used by actions to refer to this entity.
    pub id: RecordedEntityId,
    /// Entity type name as understood by the playback world (e.g. `"zombie"`).
    pub entity_type: String,
    /// Spawn position used at replay start, or when a spawn action carries
    /// no explicit position.
    #[serde(default)]
    pub spawn_position: Option<EntitySpawnPosition>,
    /// Whether the entity existed when recording began and must be spawned
    /// before any action is played.
    #[serde(default)]
    pub spawn_on_start: bool,
    /// Type-specific appearance data (skin, equipment, ...), passed through
    /// to the playback world untouched.
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl RecordableEntity {
    /// A definition with no spawn position that does not spawn on start.
    pub fn new(id: RecordedEntityId, entity_type: impl Into<String>) -> Self {
        Self {
            id,
            entity_type: entity_type.into(),
            spawn_position: None,
            spawn_on_start: false,
            data: None,
        }
    }

    /// Set the spawn position and velocity.
    pub fn with_spawn(mut self, position: RecordablePosition, velocity: RecordableVector) -> Self {
        self.spawn_position = Some(EntitySpawnPosition { position, velocity });
        self
    }

    /// Mark the entity as present from the start of the replay.
    pub fn spawn_on_start(mut self) -> Self {
        self.spawn_on_start = true;
        self
    }

    /// Attach opaque appearance data.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

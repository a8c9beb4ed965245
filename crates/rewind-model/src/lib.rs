//! Rewind Model -- Immutable data model for recorded world sessions.
//!
//! A [`Replay`](replay::Replay) is an ordered, read-only collection of
//! [`RecordableAction`](action::RecordableAction)s together with the
//! [`RecordableEntity`](entity::RecordableEntity) definitions those actions
//! refer to and the total recorded duration. Every action knows how to undo
//! itself (see [`RecordableAction::reversed_actions`](action::RecordableAction::reversed_actions)),
//! which is what lets a playback engine seek backwards.
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//! use rewind_model::prelude::*;
//!
//! let zombie = RecordableEntity::new(RecordedEntityId(1), "zombie")
//!     .with_spawn(RecordablePosition::new(0.0, 64.0, 0.0), RecordableVector::ZERO)
//!     .spawn_on_start();
//!
//! let mut builder = ReplayBuilder::new();
//! builder.entity(zombie);
//! builder.record(
//!     Duration::from_secs(10),
//!     EntityMove::new(
//!         RecordedEntityId(1),
//!         Some(RecordablePosition::new(0.0, 64.0, 0.0)),
//!         RecordablePosition::new(5.0, 64.0, 0.0),
//!     ),
//! );
//! builder.duration(Duration::from_secs(30));
//! let replay = builder.finish().unwrap();
//!
//! assert_eq!(replay.actions().len(), 1);
//! assert!(replay.actions()[0].is_reversible());
//! ```

#![deny(unsafe_code)]

pub mod action;
pub mod entity;
pub mod position;
pub mod replay;

use std::time::Duration;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced while constructing or loading a [`Replay`](replay::Replay).
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// An action is timestamped after the end of the recording.
    #[error("action '{kind}' at {timestamp:?} is past the end of the replay ({duration:?})")]
    ActionPastEnd {
        kind: &'static str,
        timestamp: Duration,
        duration: Duration,
    },

    /// An action refers to an entity that has no definition in the replay.
    #[error("action '{kind}' at {timestamp:?} refers to undefined entity {entity}")]
    UnknownEntity {
        kind: &'static str,
        entity: entity::RecordedEntityId,
        timestamp: Duration,
    },

    /// Two entity definitions share the same identity.
    #[error("entity {entity} is defined more than once")]
    DuplicateEntity { entity: entity::RecordedEntityId },

    /// A spawn-on-start entity has no spawn position to appear at.
    #[error("entity {entity} spawns on start but has no spawn position")]
    MissingSpawnPosition { entity: entity::RecordedEntityId },

    /// The serialized replay could not be parsed.
    #[error("failed to parse replay: {0}")]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::action::{
        ActionKind, BlockChange, EntityMove, EntityRemove, EntitySpawn, EntityState,
        EntityVelocity, RecordableAction, ViewerMessage,
    };
    pub use crate::entity::{EntitySpawnPosition, RecordableEntity, RecordedEntityId};
    pub use crate::position::{BlockPosition, RecordablePosition, RecordableVector};
    pub use crate::replay::{Replay, ReplayBuilder};
    pub use crate::ModelError;
}

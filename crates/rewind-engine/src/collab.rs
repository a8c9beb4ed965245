//! Interfaces to the systems a replay session plays into.
//!
//! The engine never owns the world it renders into or the connections of the
//! people watching. It talks to them through two traits:
//!
//! - [`WorldContext`] creates and releases rendering contexts, moves viewers
//!   between them, and renders entities and blocks.
//! - [`ViewerChannel`] delivers messages and status text to viewers and
//!   manages the viewer group used to tell spectators apart.
//!
//! Both are shared between a session's tick loop and its status loop, so
//! implementations take `&self` and must be `Send + Sync`.

use serde::{Deserialize, Serialize};
use std::fmt;

use rewind_model::entity::RecordableEntity;
use rewind_model::position::{BlockPosition, RecordablePosition, RecordableVector};

use crate::live::LiveEntityId;

/// Name of the group every replay viewer is added to.
pub const VIEWER_GROUP: &str = "ReplayViewers";

/// Display prefix of members of [`VIEWER_GROUP`].
pub const VIEWER_PREFIX: &str = "[Viewer] ";

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// An observer of one or more replay sessions. Owned by the surrounding
/// system; the engine only refers to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ViewerId(pub u64);

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "viewer-{}", self.0)
    }
}

/// A rendering context (world instance) viewers can be placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextId(pub u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "context-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// CollaboratorError
// ---------------------------------------------------------------------------

/// Failures reported by a [`WorldContext`] or [`ViewerChannel`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("{0} does not exist")]
    UnknownContext(ContextId),

    #[error("{0} is not connected")]
    ViewerOffline(ViewerId),

    #[error("live entity {0} does not exist")]
    UnknownLiveEntity(LiveEntityId),

    #[error("{operation} failed: {reason}")]
    Failed {
        operation: &'static str,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// WorldContext
// ---------------------------------------------------------------------------

/// The world a replay is rendered into.
pub trait WorldContext: Send + Sync {
    /// Create a fresh rendering context exclusive to one session.
    fn create_context(&self) -> Result<ContextId, CollaboratorError>;

    /// Release a context created by [`create_context`](Self::create_context).
    fn release_context(&self, context: ContextId) -> Result<(), CollaboratorError>;

    /// Move a viewer into a context.
    fn relocate_viewer(&self, viewer: ViewerId, context: ContextId)
        -> Result<(), CollaboratorError>;

    /// The context a viewer is currently in, if any.
    fn current_context(&self, viewer: ViewerId) -> Option<ContextId>;

    /// Render a new entity from its recorded definition. The entity starts
    /// hidden from every viewer.
    fn spawn_entity(
        &self,
        context: ContextId,
        definition: &RecordableEntity,
        position: RecordablePosition,
        velocity: RecordableVector,
    ) -> Result<LiveEntityId, CollaboratorError>;

    fn despawn_entity(&self, entity: LiveEntityId) -> Result<(), CollaboratorError>;

    fn move_entity(
        &self,
        entity: LiveEntityId,
        position: RecordablePosition,
    ) -> Result<(), CollaboratorError>;

    fn set_entity_velocity(
        &self,
        entity: LiveEntityId,
        velocity: RecordableVector,
    ) -> Result<(), CollaboratorError>;

    /// Set (or, with `Null`, clear) a keyed piece of entity state.
    fn set_entity_state(
        &self,
        entity: LiveEntityId,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), CollaboratorError>;

    fn set_block(
        &self,
        context: ContextId,
        position: BlockPosition,
        block: &str,
    ) -> Result<(), CollaboratorError>;

    /// Make an entity visible to one viewer.
    fn show_entity(&self, entity: LiveEntityId, viewer: ViewerId)
        -> Result<(), CollaboratorError>;

    /// Hide an entity from one viewer.
    fn hide_entity(&self, entity: LiveEntityId, viewer: ViewerId)
        -> Result<(), CollaboratorError>;
}

// ---------------------------------------------------------------------------
// ViewerChannel
// ---------------------------------------------------------------------------

/// Delivery of text to viewers and viewer grouping.
pub trait ViewerChannel: Send + Sync {
    /// Send a one-off chat message.
    fn notify(&self, viewer: ViewerId, message: &str) -> Result<(), CollaboratorError>;

    /// Replace the persistent status display (action bar).
    fn set_display(&self, viewer: ViewerId, text: &str) -> Result<(), CollaboratorError>;

    fn clear_display(&self, viewer: ViewerId) -> Result<(), CollaboratorError> {
        self.set_display(viewer, "")
    }

    /// Add a viewer to [`VIEWER_GROUP`].
    fn add_to_group(&self, viewer: ViewerId) -> Result<(), CollaboratorError>;

    fn remove_from_group(&self, viewer: ViewerId) -> Result<(), CollaboratorError>;
}

//! Action dispatch.
//!
//! Every recorded action kind has exactly one handler. Handlers live in an
//! [`ActionHandlers`] table with one typed field per kind, and
//! [`ActionRegistry::dispatch`] selects the field with an exhaustive match,
//! so a kind without a handler is a compile error rather than a runtime
//! lookup failure.
//!
//! The registry is a plain value. The session manager builds one and shares
//! it between all sessions through an `Arc`.

use rewind_model::action::{
    ActionKind, BlockChange, EntityMove, EntityRemove, EntitySpawn, EntityState, EntityVelocity,
    RecordableAction, ViewerMessage,
};
use rewind_model::replay::Replay;

use crate::collab::{ContextId, ViewerChannel, ViewerId, WorldContext};
use crate::entities::EntityManager;
use crate::PlaybackError;

// ---------------------------------------------------------------------------
// PlaybackContext
// ---------------------------------------------------------------------------

/// The session state a handler may touch while applying one action.
pub struct PlaybackContext<'a> {
    pub replay: &'a Replay,
    pub entities: &'a mut EntityManager,
    pub world: &'a dyn WorldContext,
    pub channel: &'a dyn ViewerChannel,
    /// Rendering context the replay plays in.
    pub context: ContextId,
    /// Everybody currently watching.
    pub viewers: &'a [ViewerId],
}

// ---------------------------------------------------------------------------
// HandlerFn / ActionHandlers
// ---------------------------------------------------------------------------

/// A handler applying one concrete action kind.
///
/// Handlers must not block. They may only act through the
/// [`PlaybackContext`]: entity lifecycle calls, world mutation and viewer
/// notification.
pub type HandlerFn<A> = fn(&A, &mut PlaybackContext<'_>) -> Result<(), PlaybackError>;

/// One handler per action kind.
///
/// Override a single kind with struct update syntax:
///
/// ```
/// use rewind_engine::prelude::*;
///
/// fn quiet(_: &ViewerMessage, _: &mut PlaybackContext<'_>) -> Result<(), PlaybackError> {
///     Ok(())
/// }
///
/// let registry = ActionRegistry::with_handlers(ActionHandlers {
///     viewer_message: quiet,
///     ..ActionHandlers::default()
/// });
/// # let _ = registry;
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ActionHandlers {
    pub entity_spawn: HandlerFn<EntitySpawn>,
    pub entity_remove: HandlerFn<EntityRemove>,
    pub entity_move: HandlerFn<EntityMove>,
    pub entity_velocity: HandlerFn<EntityVelocity>,
    pub entity_state: HandlerFn<EntityState>,
    pub block_change: HandlerFn<BlockChange>,
    pub viewer_message: HandlerFn<ViewerMessage>,
}

impl Default for ActionHandlers {
    fn default() -> Self {
        Self {
            entity_spawn: builtin::entity_spawn,
            entity_remove: builtin::entity_remove,
            entity_move: builtin::entity_move,
            entity_velocity: builtin::entity_velocity,
            entity_state: builtin::entity_state,
            block_change: builtin::block_change,
            viewer_message: builtin::viewer_message,
        }
    }
}

// ---------------------------------------------------------------------------
// ActionRegistry
// ---------------------------------------------------------------------------

/// Resolves an action to its handler and runs it.
#[derive(Debug, Clone, Default)]
pub struct ActionRegistry {
    handlers: ActionHandlers,
}

impl ActionRegistry {
    /// A registry with the built-in handlers.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handlers(handlers: ActionHandlers) -> Self {
        Self { handlers }
    }

    pub fn handlers(&self) -> &ActionHandlers {
        &self.handlers
    }

    /// Apply one action.
    pub fn dispatch(
        &self,
        action: &RecordableAction,
        ctx: &mut PlaybackContext<'_>,
    ) -> Result<(), PlaybackError> {
        tracing::debug!(
            kind = action.kind.name(),
            timestamp = ?action.timestamp,
            "dispatching action"
        );
        let h = &self.handlers;
        match &action.kind {
            ActionKind::EntitySpawn(a) => (h.entity_spawn)(a, ctx),
            ActionKind::EntityRemove(a) => (h.entity_remove)(a, ctx),
            ActionKind::EntityMove(a) => (h.entity_move)(a, ctx),
            ActionKind::EntityVelocity(a) => (h.entity_velocity)(a, ctx),
            ActionKind::EntityState(a) => (h.entity_state)(a, ctx),
            ActionKind::BlockChange(a) => (h.block_change)(a, ctx),
            ActionKind::ViewerMessage(a) => (h.viewer_message)(a, ctx),
        }
    }
}

// ---------------------------------------------------------------------------
// Built-in handlers
// ---------------------------------------------------------------------------

/// The handlers [`ActionHandlers::default`] installs. Public so overrides can
/// wrap them.
pub mod builtin {
    use super::*;
    use crate::live::LiveEntityId;
    use rewind_model::entity::RecordedEntityId;

    fn live_instances(
        ctx: &PlaybackContext<'_>,
        action: &'static str,
        entity: RecordedEntityId,
    ) -> Result<Vec<LiveEntityId>, PlaybackError> {
        let instances = ctx.entities.instances(entity);
        if instances.is_empty() {
            return Err(PlaybackError::EntityNotLive { action, entity });
        }
        Ok(instances)
    }

    /// Spawns the entity unless it is already live, so a recorded spawn of an
    /// entity that is present from the start never renders a second copy.
    pub fn entity_spawn(
        action: &EntitySpawn,
        ctx: &mut PlaybackContext<'_>,
    ) -> Result<(), PlaybackError> {
        if ctx.entities.is_present(action.entity) {
            tracing::debug!(entity = %action.entity, "entity already live, spawn skipped");
            return Ok(());
        }
        let definition = ctx
            .replay
            .entity(action.entity)
            .ok_or(PlaybackError::UnknownEntity {
                entity: action.entity,
            })?;
        ctx.entities
            .spawn_entity(definition, action.position, action.velocity)?;
        Ok(())
    }

    pub fn entity_remove(
        action: &EntityRemove,
        ctx: &mut PlaybackContext<'_>,
    ) -> Result<(), PlaybackError> {
        if ctx.entities.remove_entity(action.entity)? == 0 {
            tracing::debug!(entity = %action.entity, "entity not live, remove skipped");
        }
        Ok(())
    }

    pub fn entity_move(
        action: &EntityMove,
        ctx: &mut PlaybackContext<'_>,
    ) -> Result<(), PlaybackError> {
        for id in live_instances(ctx, "entity_move", action.entity)? {
            ctx.world.move_entity(id, action.position)?;
        }
        Ok(())
    }

    pub fn entity_velocity(
        action: &EntityVelocity,
        ctx: &mut PlaybackContext<'_>,
    ) -> Result<(), PlaybackError> {
        for id in live_instances(ctx, "entity_velocity", action.entity)? {
            ctx.world.set_entity_velocity(id, action.velocity)?;
        }
        Ok(())
    }

    pub fn entity_state(
        action: &EntityState,
        ctx: &mut PlaybackContext<'_>,
    ) -> Result<(), PlaybackError> {
        for id in live_instances(ctx, "entity_state", action.entity)? {
            ctx.world.set_entity_state(id, &action.key, &action.value)?;
        }
        Ok(())
    }

    pub fn block_change(
        action: &BlockChange,
        ctx: &mut PlaybackContext<'_>,
    ) -> Result<(), PlaybackError> {
        ctx.world
            .set_block(ctx.context, action.position, &action.block)?;
        Ok(())
    }

    /// Best effort: a viewer that cannot be reached is logged and skipped.
    pub fn viewer_message(
        action: &ViewerMessage,
        ctx: &mut PlaybackContext<'_>,
    ) -> Result<(), PlaybackError> {
        for &viewer in ctx.viewers {
            if let Err(error) = ctx.channel.notify(viewer, &action.text) {
                tracing::warn!(%viewer, %error, "failed to deliver replay message");
            }
        }
        Ok(())
    }
}

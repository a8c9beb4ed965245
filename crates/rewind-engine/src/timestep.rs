//! Time-step resolution: moving the live world between two replay times.
//!
//! A time step is planned first and applied second. Planning is a pure
//! function of the replay and the two times; applying walks the plan through
//! the [`ActionRegistry`].
//!
//! Going forward, every action in `(from, to]` is replayed in ascending
//! order. Going backward, every action in `(to, from]` is undone in
//! descending order (equal timestamps in reverse recorded order) by playing
//! its reversed actions.
//!
//! Entity presence is structural rather than reversed. Crossing a spawn
//! backward despawns the entity. Crossing a removal backward respawns it the
//! way it was when it was removed: position, velocity and state are rebuilt
//! from the actions since its last spawn, so the removal does not need to
//! carry them.

use std::collections::BTreeMap;
use std::time::Duration;

use rewind_model::action::{ActionKind, EntityRemove, EntitySpawn, RecordableAction};
use rewind_model::entity::RecordedEntityId;
use rewind_model::position::{RecordablePosition, RecordableVector};
use rewind_model::replay::Replay;

use crate::dispatch::{ActionRegistry, PlaybackContext};
use crate::PlaybackError;

/// One step of a time-step plan.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeStepEffect {
    /// Dispatch an action (a recorded one, or a reversal).
    Apply(RecordableAction),
    /// Remove every live instance of an entity.
    Despawn(RecordedEntityId),
    /// Bring back an entity a removal took away.
    Respawn(Respawn),
}

/// An entity as it was right before it was removed.
#[derive(Debug, Clone, PartialEq)]
pub struct Respawn {
    pub entity: RecordedEntityId,
    /// `None` falls back to the definition's spawn position.
    pub position: Option<RecordablePosition>,
    pub velocity: Option<RecordableVector>,
    pub state: BTreeMap<String, serde_json::Value>,
}

/// Rebuild the entity removed by the action at `index`, or `None` if it was
/// not live when the removal played.
fn respawn_for(replay: &Replay, index: usize, remove: &EntityRemove) -> Option<Respawn> {
    let actions = replay.actions();
    let entity = remove.entity;

    let mut spawned: Option<(usize, &EntitySpawn)> = None;
    for (i, action) in actions[..index].iter().enumerate().rev() {
        match &action.kind {
            ActionKind::EntitySpawn(spawn) if spawn.entity == entity => {
                spawned = Some((i, spawn));
                break;
            }
            ActionKind::EntityRemove(earlier) if earlier.entity == entity => return None,
            _ => {}
        }
    }

    let (from, mut position, mut velocity) = match spawned {
        Some((i, spawn)) => (i + 1, spawn.position, spawn.velocity),
        None if replay.entity(entity).is_some_and(|d| d.spawn_on_start) => (0, None, None),
        None => return None,
    };
    let mut state = BTreeMap::new();
    for action in &actions[from..index] {
        match &action.kind {
            ActionKind::EntityMove(a) if a.entity == entity => position = Some(a.position),
            ActionKind::EntityVelocity(a) if a.entity == entity => velocity = Some(a.velocity),
            ActionKind::EntityState(a) if a.entity == entity => {
                if a.value.is_null() {
                    state.remove(&a.key);
                } else {
                    state.insert(a.key.clone(), a.value.clone());
                }
            }
            _ => {}
        }
    }

    Some(Respawn {
        entity,
        position: remove.last_position.or(position),
        velocity,
        state,
    })
}

/// Plan the effects that move the world from `from` to `to`.
///
/// Assumes the actions at exactly `from` have been applied.
pub fn plan_time_step(replay: &Replay, from: Duration, to: Duration) -> Vec<TimeStepEffect> {
    plan_time_step_from(replay, from, to, true)
}

/// Like [`plan_time_step`], with explicit knowledge of whether the actions
/// stamped exactly `from` have been applied.
///
/// Normal playback stops short of actions at the current time, so after a
/// playback tick they are still pending. A forward step then has to include
/// them and a backward step must not undo them.
pub fn plan_time_step_from(
    replay: &Replay,
    from: Duration,
    to: Duration,
    applied_at_from: bool,
) -> Vec<TimeStepEffect> {
    let actions = replay.actions();
    let up_to = |t: Duration, inclusive: bool| {
        if inclusive {
            actions.partition_point(|a| a.timestamp <= t)
        } else {
            actions.partition_point(|a| a.timestamp < t)
        }
    };

    if to >= from {
        let start = up_to(from, applied_at_from);
        let end = up_to(to, true);
        if start >= end {
            return Vec::new();
        }
        actions[start..end]
            .iter()
            .cloned()
            .map(TimeStepEffect::Apply)
            .collect()
    } else {
        let start = up_to(to, true);
        let end = up_to(from, applied_at_from);
        if start >= end {
            return Vec::new();
        }
        let mut effects = Vec::new();
        for index in (start..end).rev() {
            let action = &actions[index];
            match &action.kind {
                ActionKind::EntitySpawn(spawn) => {
                    effects.push(TimeStepEffect::Despawn(spawn.entity));
                }
                ActionKind::EntityRemove(remove) => {
                    effects.extend(respawn_for(replay, index, remove).map(TimeStepEffect::Respawn));
                }
                _ => effects.extend(
                    action
                        .reversed_actions()
                        .into_iter()
                        .map(TimeStepEffect::Apply),
                ),
            }
        }
        effects
    }
}

/// Apply a planned time step. Returns the number of effects applied.
///
/// Stops at the first failing effect.
pub fn apply_time_step(
    registry: &ActionRegistry,
    ctx: &mut PlaybackContext<'_>,
    effects: &[TimeStepEffect],
) -> Result<usize, PlaybackError> {
    for effect in effects {
        match effect {
            TimeStepEffect::Apply(action) => registry.dispatch(action, ctx)?,
            TimeStepEffect::Despawn(entity) => {
                ctx.entities.remove_entity(*entity)?;
            }
            TimeStepEffect::Respawn(respawn) => apply_respawn(ctx, respawn)?,
        }
    }
    Ok(effects.len())
}

fn apply_respawn(ctx: &mut PlaybackContext<'_>, respawn: &Respawn) -> Result<(), PlaybackError> {
    if ctx.entities.is_present(respawn.entity) {
        tracing::debug!(entity = %respawn.entity, "entity already live, respawn skipped");
        return Ok(());
    }
    let replay = ctx.replay;
    let definition = replay
        .entity(respawn.entity)
        .ok_or(PlaybackError::UnknownEntity {
            entity: respawn.entity,
        })?;
    let live = ctx
        .entities
        .spawn_entity(definition, respawn.position, respawn.velocity)?;
    for (key, value) in &respawn.state {
        ctx.world.set_entity_state(live, key, value)?;
    }
    Ok(())
}

/// Plan and apply a time step from `from` to `to`.
pub fn perform_time_step(
    registry: &ActionRegistry,
    ctx: &mut PlaybackContext<'_>,
    from: Duration,
    to: Duration,
) -> Result<usize, PlaybackError> {
    let effects = plan_time_step(ctx.replay, from, to);
    tracing::debug!(?from, ?to, effects = effects.len(), "performing time step");
    apply_time_step(registry, ctx, &effects)
}

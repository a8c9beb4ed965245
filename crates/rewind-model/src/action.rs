//! Recorded actions and their reversal.
//!
//! A [`RecordableAction`] is one discrete event at a timestamp measured from
//! the start of the recording. The set of event kinds is closed
//! ([`ActionKind`]), so a playback engine can match on it exhaustively.
//!
//! # Reversal
//!
//! [`RecordableAction::reversed_actions`] returns the actions that undo an
//! action's effect when applied right after it. Both it and
//! [`RecordableAction::is_reversible`] are pure functions of the action's own
//! data. Spawns are reversible but have no reversed actions: undoing a spawn
//! means despawning, which the engine derives structurally from entity
//! presence rather than from a recorded counter-action.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::entity::RecordedEntityId;
use crate::position::{BlockPosition, RecordablePosition, RecordableVector};

// ---------------------------------------------------------------------------
// Concrete action kinds
// ---------------------------------------------------------------------------

/// An entity appears in the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySpawn {
    pub entity: RecordedEntityId,
    /// Where the entity appears. Falls back to the entity definition's spawn
    /// position when absent.
    #[serde(default)]
    pub position: Option<RecordablePosition>,
    #[serde(default)]
    pub velocity: Option<RecordableVector>,
}

/// An entity leaves the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRemove {
    pub entity: RecordedEntityId,
    /// Where the entity was when it was removed. Required to undo the removal.
    #[serde(default)]
    pub last_position: Option<RecordablePosition>,
}

/// An entity moves to a new position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMove {
    pub entity: RecordedEntityId,
    #[serde(default)]
    pub previous: Option<RecordablePosition>,
    pub position: RecordablePosition,
}

/// An entity's velocity changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityVelocity {
    pub entity: RecordedEntityId,
    #[serde(default)]
    pub previous: Option<RecordableVector>,
    pub velocity: RecordableVector,
}

/// A keyed piece of entity state changes (pose, equipment slot, metadata).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity: RecordedEntityId,
    pub key: String,
    /// The value before the change. `None` means the key was unset.
    #[serde(default)]
    pub previous: Option<serde_json::Value>,
    pub value: serde_json::Value,
}

/// A world block changes state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockChange {
    pub position: BlockPosition,
    pub previous: String,
    pub block: String,
}

/// A message shown to everybody watching the replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerMessage {
    pub text: String,
}

impl EntitySpawn {
    pub fn new(entity: RecordedEntityId, position: Option<RecordablePosition>) -> Self {
        Self {
            entity,
            position,
            velocity: None,
        }
    }
}

impl EntityRemove {
    pub fn new(entity: RecordedEntityId, last_position: Option<RecordablePosition>) -> Self {
        Self {
            entity,
            last_position,
        }
    }
}

impl EntityMove {
    pub fn new(
        entity: RecordedEntityId,
        previous: Option<RecordablePosition>,
        position: RecordablePosition,
    ) -> Self {
        Self {
            entity,
            previous,
            position,
        }
    }
}

impl EntityVelocity {
    pub fn new(
        entity: RecordedEntityId,
        previous: Option<RecordableVector>,
        velocity: RecordableVector,
    ) -> Self {
        Self {
            entity,
            previous,
            velocity,
        }
    }
}

impl EntityState {
    pub fn new(
        entity: RecordedEntityId,
        key: impl Into<String>,
        previous: Option<serde_json::Value>,
        value: serde_json::Value,
    ) -> Self {
        Self {
            entity,
            key: key.into(),
            previous,
            value,
        }
    }
}

impl BlockChange {
    pub fn new(
        position: BlockPosition,
        previous: impl Into<String>,
        block: impl Into<String>,
    ) -> Self {
        Self {
            position,
            previous: previous.into(),
            block: block.into(),
        }
    }
}

impl ViewerMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

// ---------------------------------------------------------------------------
// ActionKind
// ---------------------------------------------------------------------------

/// The closed set of recordable event kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    EntitySpawn(EntitySpawn),
    EntityRemove(EntityRemove),
    EntityMove(EntityMove),
    EntityVelocity(EntityVelocity),
    EntityState(EntityState),
    BlockChange(BlockChange),
    ViewerMessage(ViewerMessage),
}

macro_rules! impl_from_kind {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for ActionKind {
                fn from(action: $variant) -> Self {
                    ActionKind::$variant(action)
                }
            }
        )*
    };
}

impl_from_kind!(
    EntitySpawn,
    EntityRemove,
    EntityMove,
    EntityVelocity,
    EntityState,
    BlockChange,
    ViewerMessage,
);

impl ActionKind {
    /// Stable kind name, used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::EntitySpawn(_) => "entity_spawn",
            ActionKind::EntityRemove(_) => "entity_remove",
            ActionKind::EntityMove(_) => "entity_move",
            ActionKind::EntityVelocity(_) => "entity_velocity",
            ActionKind::EntityState(_) => "entity_state",
            ActionKind::BlockChange(_) => "block_change",
            ActionKind::ViewerMessage(_) => "viewer_message",
        }
    }

    /// The entity this action concerns, if any.
    pub fn entity(&self) -> Option<RecordedEntityId> {
        match self {
            ActionKind::EntitySpawn(a) => Some(a.entity),
            ActionKind::EntityRemove(a) => Some(a.entity),
            ActionKind::EntityMove(a) => Some(a.entity),
            ActionKind::EntityVelocity(a) => Some(a.entity),
            ActionKind::EntityState(a) => Some(a.entity),
            ActionKind::BlockChange(_) | ActionKind::ViewerMessage(_) => None,
        }
    }

    /// Whether the effect of this action can be undone.
    pub fn is_reversible(&self) -> bool {
        match self {
            ActionKind::EntitySpawn(_) => true,
            ActionKind::EntityRemove(a) => a.last_position.is_some(),
            ActionKind::EntityMove(a) => a.previous.is_some(),
            ActionKind::EntityVelocity(a) => a.previous.is_some(),
            ActionKind::EntityState(_) => true,
            ActionKind::BlockChange(_) => true,
            ActionKind::ViewerMessage(_) => false,
        }
    }

    /// The kinds that undo this one, in application order.
    pub fn reversed(&self) -> Vec<ActionKind> {
        match self {
            // Despawning is structural; see the module docs.
            ActionKind::EntitySpawn(_) => Vec::new(),
            ActionKind::EntityRemove(a) => match a.last_position {
                Some(position) => vec![EntitySpawn::new(a.entity, Some(position)).into()],
                None => Vec::new(),
            },
            ActionKind::EntityMove(a) => match a.previous {
                Some(previous) => vec![EntityMove::new(a.entity, Some(a.position), previous).into()],
                None => Vec::new(),
            },
            ActionKind::EntityVelocity(a) => match a.previous {
                Some(previous) => {
                    vec![EntityVelocity::new(a.entity, Some(a.velocity), previous).into()]
                }
                None => Vec::new(),
            },
            ActionKind::EntityState(a) => vec![EntityState::new(
                a.entity,
                a.key.clone(),
                Some(a.value.clone()),
                a.previous.clone().unwrap_or(serde_json::Value::Null),
            )
            .into()],
            ActionKind::BlockChange(a) => vec![BlockChange::new(
                a.position,
                a.block.clone(),
                a.previous.clone(),
            )
            .into()],
            ActionKind::ViewerMessage(_) => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordableAction
// ---------------------------------------------------------------------------

/// A single timestamped recorded event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordableAction {
    /// Offset from the start of the recording.
    pub timestamp: Duration,
    #[serde(flatten)]
    pub kind: ActionKind,
}

impl RecordableAction {
    pub fn new(timestamp: Duration, kind: impl Into<ActionKind>) -> Self {
        Self {
            timestamp,
            kind: kind.into(),
        }
    }

    /// The entity this action concerns, if any.
    pub fn entity(&self) -> Option<RecordedEntityId> {
        self.kind.entity()
    }

    /// Whether the effect of this action can be undone.
    pub fn is_reversible(&self) -> bool {
        self.kind.is_reversible()
    }

    /// The actions that undo this one, stamped with this action's timestamp.
    ///
    /// Empty when the action is not reversible, or when its reversal is
    /// structural (spawns).
    pub fn reversed_actions(&self) -> Vec<RecordableAction> {
        self.kind
            .reversed()
            .into_iter()
            .map(|kind| RecordableAction {
                timestamp: self.timestamp,
                kind,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const E: RecordedEntityId = RecordedEntityId(1);

    fn at(secs: u64, kind: impl Into<ActionKind>) -> RecordableAction {
        RecordableAction::new(Duration::from_secs(secs), kind)
    }

    #[test]
    fn spawn_is_reversible_but_structural() {
        let a = at(1, EntitySpawn::new(E, Some(RecordablePosition::new(0.0, 0.0, 0.0))));
        assert!(a.is_reversible());
        assert!(a.reversed_actions().is_empty());
    }

    #[test]
    fn move_reverses_to_previous_position() {
        let from = RecordablePosition::new(0.0, 64.0, 0.0);
        let to = RecordablePosition::new(3.0, 64.0, 1.0);
        let a = at(4, EntityMove::new(E, Some(from), to));

        let reversed = a.reversed_actions();
        assert_eq!(reversed.len(), 1);
        assert_eq!(reversed[0].timestamp, Duration::from_secs(4));
        assert_eq!(
            reversed[0].kind,
            ActionKind::EntityMove(EntityMove::new(E, Some(to), from))
        );
    }

    #[test]
    fn move_without_previous_is_irreversible() {
        let a = at(4, EntityMove::new(E, None, RecordablePosition::new(1.0, 1.0, 1.0)));
        assert!(!a.is_reversible());
        assert!(a.reversed_actions().is_empty());
    }

    #[test]
    fn remove_reverses_to_spawn_at_last_position() {
        let last = RecordablePosition::new(9.0, 70.0, -2.0);
        let a = at(8, EntityRemove::new(E, Some(last)));
        assert!(a.is_reversible());
        assert_eq!(
            a.reversed_actions()[0].kind,
            ActionKind::EntitySpawn(EntitySpawn::new(E, Some(last)))
        );
    }

    #[test]
    fn state_without_previous_reverses_to_null() {
        let a = at(
            2,
            EntityState::new(E, "sneaking", None, serde_json::json!(true)),
        );
        let reversed = a.reversed_actions();
        assert_eq!(
            reversed[0].kind,
            ActionKind::EntityState(EntityState::new(
                E,
                "sneaking",
                Some(serde_json::json!(true)),
                serde_json::Value::Null
            ))
        );
    }

    #[test]
    fn block_change_reverses_block_states() {
        let pos = BlockPosition::new(1, 2, 3);
        let a = at(5, BlockChange::new(pos, "air", "stone"));
        assert_eq!(
            a.reversed_actions()[0].kind,
            ActionKind::BlockChange(BlockChange::new(pos, "stone", "air"))
        );
    }

    #[test]
    fn double_reversal_restores_original_kind() {
        let kinds: Vec<ActionKind> = vec![
            EntityMove::new(
                E,
                Some(RecordablePosition::new(0.0, 0.0, 0.0)),
                RecordablePosition::new(1.0, 0.0, 0.0),
            )
            .into(),
            EntityVelocity::new(
                E,
                Some(RecordableVector::ZERO),
                RecordableVector::new(0.5, 0.0, 0.0),
            )
            .into(),
            EntityState::new(E, "pose", Some(serde_json::json!("standing")), serde_json::json!("sleeping")).into(),
            BlockChange::new(BlockPosition::new(0, 0, 0), "air", "dirt").into(),
        ];

        for kind in kinds {
            let back = kind.reversed().remove(0).reversed().remove(0);
            assert_eq!(back, kind, "{} did not round-trip", kind.name());
        }
    }

    #[test]
    fn viewer_message_has_no_entity_and_no_reversal() {
        let a = at(0, ViewerMessage::new("round 2"));
        assert_eq!(a.entity(), None);
        assert!(!a.is_reversible());
        assert!(a.reversed_actions().is_empty());
    }

    #[test]
    fn json_uses_flat_type_tag() {
        let a = at(3, ViewerMessage::new("hello"));
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["type"], "viewer_message");
        assert_eq!(json["text"], "hello");

        let back: RecordableAction = serde_json::from_value(json).unwrap();
        assert_eq!(back, a);
    }
}

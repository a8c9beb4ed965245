//! Headless in-memory collaborators.
//!
//! [`MemoryWorld`] and [`MemoryViewers`] implement [`WorldContext`] and
//! [`ViewerChannel`] without a rendering server. They keep the resulting
//! world state (live entities, blocks, viewer placement, status displays) in
//! memory and log every call as an event, which makes them suitable for
//! tests and for offline tooling that inspects what a replay would render.
//!
//! Viewers can be marked as disconnected; every per-viewer call on a
//! disconnected viewer then fails with [`CollaboratorError::ViewerOffline`].

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use parking_lot::Mutex;

use rewind_model::entity::{RecordableEntity, RecordedEntityId};
use rewind_model::position::{BlockPosition, RecordablePosition, RecordableVector};

use crate::collab::{
    CollaboratorError, ContextId, ViewerChannel, ViewerId, WorldContext, VIEWER_PREFIX,
};
use crate::live::{LiveEntityAllocator, LiveEntityId};

// ---------------------------------------------------------------------------
// MemoryEntity / WorldEvent
// ---------------------------------------------------------------------------

/// A live entity as stored by [`MemoryWorld`].
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryEntity {
    pub id: LiveEntityId,
    pub recorded: RecordedEntityId,
    pub entity_type: String,
    pub context: ContextId,
    pub position: RecordablePosition,
    pub velocity: RecordableVector,
    pub state: BTreeMap<String, serde_json::Value>,
    pub visible_to: BTreeSet<ViewerId>,
}

/// One call made against a [`MemoryWorld`].
#[derive(Debug, Clone, PartialEq)]
pub enum WorldEvent {
    ContextCreated(ContextId),
    ContextReleased(ContextId),
    ViewerRelocated {
        viewer: ViewerId,
        context: ContextId,
    },
    Spawned {
        entity: LiveEntityId,
        recorded: RecordedEntityId,
    },
    Despawned {
        entity: LiveEntityId,
        recorded: RecordedEntityId,
    },
    Moved {
        entity: LiveEntityId,
        position: RecordablePosition,
    },
    VelocitySet {
        entity: LiveEntityId,
        velocity: RecordableVector,
    },
    StateSet {
        entity: LiveEntityId,
        key: String,
        value: serde_json::Value,
    },
    BlockSet {
        context: ContextId,
        position: BlockPosition,
        block: String,
    },
    Shown {
        entity: LiveEntityId,
        viewer: ViewerId,
    },
    Hidden {
        entity: LiveEntityId,
        viewer: ViewerId,
    },
}

// ---------------------------------------------------------------------------
// MemoryWorld
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct WorldInner {
    allocator: LiveEntityAllocator,
    next_context: u64,
    contexts: BTreeSet<ContextId>,
    viewer_contexts: HashMap<ViewerId, ContextId>,
    entities: BTreeMap<LiveEntityId, MemoryEntity>,
    blocks: BTreeMap<(ContextId, BlockPosition), String>,
    offline: HashSet<ViewerId>,
    events: Vec<WorldEvent>,
}

impl WorldInner {
    fn entity_mut(&mut self, id: LiveEntityId) -> Result<&mut MemoryEntity, CollaboratorError> {
        self.entities
            .get_mut(&id)
            .ok_or(CollaboratorError::UnknownLiveEntity(id))
    }

    fn check_online(&self, viewer: ViewerId) -> Result<(), CollaboratorError> {
        if self.offline.contains(&viewer) {
            Err(CollaboratorError::ViewerOffline(viewer))
        } else {
            Ok(())
        }
    }
}

/// An in-memory [`WorldContext`].
#[derive(Debug, Default)]
pub struct MemoryWorld {
    inner: Mutex<WorldInner>,
}

impl MemoryWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a viewer into a context without logging a relocation, as if they
    /// had joined the server there.
    pub fn place_viewer(&self, viewer: ViewerId, context: ContextId) {
        self.inner.lock().viewer_contexts.insert(viewer, context);
    }

    /// Make every later per-viewer call for `viewer` fail.
    pub fn disconnect_viewer(&self, viewer: ViewerId) {
        self.inner.lock().offline.insert(viewer);
    }

    pub fn context_exists(&self, context: ContextId) -> bool {
        self.inner.lock().contexts.contains(&context)
    }

    /// Number of contexts created and not yet released.
    pub fn context_count(&self) -> usize {
        self.inner.lock().contexts.len()
    }

    pub fn entity_count(&self) -> usize {
        self.inner.lock().entities.len()
    }

    pub fn entities(&self) -> Vec<MemoryEntity> {
        self.inner.lock().entities.values().cloned().collect()
    }

    /// Every live instance of a recorded entity.
    pub fn instances_of(&self, recorded: RecordedEntityId) -> Vec<MemoryEntity> {
        self.inner
            .lock()
            .entities
            .values()
            .filter(|e| e.recorded == recorded)
            .cloned()
            .collect()
    }

    /// The first live instance of a recorded entity.
    pub fn entity_for(&self, recorded: RecordedEntityId) -> Option<MemoryEntity> {
        self.instances_of(recorded).into_iter().next()
    }

    /// Recorded identities with at least one live instance.
    pub fn present_entities(&self) -> BTreeSet<RecordedEntityId> {
        self.inner
            .lock()
            .entities
            .values()
            .map(|e| e.recorded)
            .collect()
    }

    pub fn block_at(&self, context: ContextId, position: BlockPosition) -> Option<String> {
        self.inner.lock().blocks.get(&(context, position)).cloned()
    }

    pub fn events(&self) -> Vec<WorldEvent> {
        self.inner.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.inner.lock().events.clear();
    }
}

impl WorldContext for MemoryWorld {
    fn create_context(&self) -> Result<ContextId, CollaboratorError> {
        let mut inner = self.inner.lock();
        inner.next_context += 1;
        let context = ContextId(inner.next_context);
        inner.contexts.insert(context);
        inner.events.push(WorldEvent::ContextCreated(context));
        Ok(context)
    }

    fn release_context(&self, context: ContextId) -> Result<(), CollaboratorError> {
        let mut inner = self.inner.lock();
        if !inner.contexts.remove(&context) {
            return Err(CollaboratorError::UnknownContext(context));
        }
        inner.blocks.retain(|(c, _), _| *c != context);
        inner.events.push(WorldEvent::ContextReleased(context));
        Ok(())
    }

    fn relocate_viewer(
        &self,
        viewer: ViewerId,
        context: ContextId,
    ) -> Result<(), CollaboratorError> {
        let mut inner = self.inner.lock();
        inner.check_online(viewer)?;
        inner.viewer_contexts.insert(viewer, context);
        inner
            .events
            .push(WorldEvent::ViewerRelocated { viewer, context });
        Ok(())
    }

    fn current_context(&self, viewer: ViewerId) -> Option<ContextId> {
        self.inner.lock().viewer_contexts.get(&viewer).copied()
    }

    fn spawn_entity(
        &self,
        context: ContextId,
        definition: &RecordableEntity,
        position: RecordablePosition,
        velocity: RecordableVector,
    ) -> Result<LiveEntityId, CollaboratorError> {
        let mut inner = self.inner.lock();
        let id = inner.allocator.allocate();
        inner.entities.insert(
            id,
            MemoryEntity {
                id,
                recorded: definition.id,
                entity_type: definition.entity_type.clone(),
                context,
                position,
                velocity,
                state: BTreeMap::new(),
                visible_to: BTreeSet::new(),
            },
        );
        inner.events.push(WorldEvent::Spawned {
            entity: id,
            recorded: definition.id,
        });
        Ok(id)
    }

    fn despawn_entity(&self, entity: LiveEntityId) -> Result<(), CollaboratorError> {
        let mut inner = self.inner.lock();
        let removed = inner
            .entities
            .remove(&entity)
            .ok_or(CollaboratorError::UnknownLiveEntity(entity))?;
        inner.allocator.release(entity);
        inner.events.push(WorldEvent::Despawned {
            entity,
            recorded: removed.recorded,
        });
        Ok(())
    }

    fn move_entity(
        &self,
        entity: LiveEntityId,
        position: RecordablePosition,
    ) -> Result<(), CollaboratorError> {
        let mut inner = self.inner.lock();
        inner.entity_mut(entity)?.position = position;
        inner.events.push(WorldEvent::Moved { entity, position });
        Ok(())
    }

    fn set_entity_velocity(
        &self,
        entity: LiveEntityId,
        velocity: RecordableVector,
    ) -> Result<(), CollaboratorError> {
        let mut inner = self.inner.lock();
        inner.entity_mut(entity)?.velocity = velocity;
        inner
            .events
            .push(WorldEvent::VelocitySet { entity, velocity });
        Ok(())
    }

    fn set_entity_state(
        &self,
        entity: LiveEntityId,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), CollaboratorError> {
        let mut inner = self.inner.lock();
        let state = &mut inner.entity_mut(entity)?.state;
        if value.is_null() {
            state.remove(key);
        } else {
            state.insert(key.to_owned(), value.clone());
        }
        inner.events.push(WorldEvent::StateSet {
            entity,
            key: key.to_owned(),
            value: value.clone(),
        });
        Ok(())
    }

    fn set_block(
        &self,
        context: ContextId,
        position: BlockPosition,
        block: &str,
    ) -> Result<(), CollaboratorError> {
        let mut inner = self.inner.lock();
        inner.blocks.insert((context, position), block.to_owned());
        inner.events.push(WorldEvent::BlockSet {
            context,
            position,
            block: block.to_owned(),
        });
        Ok(())
    }

    fn show_entity(&self, entity: LiveEntityId, viewer: ViewerId) -> Result<(), CollaboratorError> {
        let mut inner = self.inner.lock();
        inner.check_online(viewer)?;
        inner.entity_mut(entity)?.visible_to.insert(viewer);
        inner.events.push(WorldEvent::Shown { entity, viewer });
        Ok(())
    }

    fn hide_entity(&self, entity: LiveEntityId, viewer: ViewerId) -> Result<(), CollaboratorError> {
        let mut inner = self.inner.lock();
        inner.check_online(viewer)?;
        inner.entity_mut(entity)?.visible_to.remove(&viewer);
        inner.events.push(WorldEvent::Hidden { entity, viewer });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryViewers
// ---------------------------------------------------------------------------

/// One call made against a [`MemoryViewers`].
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    Notified { viewer: ViewerId, message: String },
    Display { viewer: ViewerId, text: String },
    Joined(ViewerId),
    Left(ViewerId),
}

#[derive(Debug, Default)]
struct ViewersInner {
    displays: HashMap<ViewerId, String>,
    group: BTreeSet<ViewerId>,
    offline: HashSet<ViewerId>,
    events: Vec<ViewerEvent>,
}

impl ViewersInner {
    fn check_online(&self, viewer: ViewerId) -> Result<(), CollaboratorError> {
        if self.offline.contains(&viewer) {
            Err(CollaboratorError::ViewerOffline(viewer))
        } else {
            Ok(())
        }
    }
}

/// An in-memory [`ViewerChannel`].
#[derive(Debug, Default)]
pub struct MemoryViewers {
    inner: Mutex<ViewersInner>,
}

impl MemoryViewers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call for `viewer` fail.
    pub fn disconnect(&self, viewer: ViewerId) {
        self.inner.lock().offline.insert(viewer);
    }

    /// Current status display of a viewer, if one was ever set.
    pub fn display(&self, viewer: ViewerId) -> Option<String> {
        self.inner.lock().displays.get(&viewer).cloned()
    }

    /// How many times a viewer's display was written.
    pub fn display_updates(&self, viewer: ViewerId) -> usize {
        self.inner
            .lock()
            .events
            .iter()
            .filter(|e| matches!(e, ViewerEvent::Display { viewer: v, .. } if *v == viewer))
            .count()
    }

    /// Chat messages a viewer received, oldest first.
    pub fn messages(&self, viewer: ViewerId) -> Vec<String> {
        self.inner
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                ViewerEvent::Notified { viewer: v, message } if *v == viewer => {
                    Some(message.clone())
                }
                _ => None,
            })
            .collect()
    }

    pub fn in_group(&self, viewer: ViewerId) -> bool {
        self.inner.lock().group.contains(&viewer)
    }

    /// Name shown for `viewer`, prefixed while they are in the viewer group.
    pub fn display_name(&self, viewer: ViewerId) -> String {
        if self.in_group(viewer) {
            format!("{VIEWER_PREFIX}{viewer}")
        } else {
            viewer.to_string()
        }
    }

    pub fn group_members(&self) -> Vec<ViewerId> {
        self.inner.lock().group.iter().copied().collect()
    }

    pub fn events(&self) -> Vec<ViewerEvent> {
        self.inner.lock().events.clone()
    }
}

impl ViewerChannel for MemoryViewers {
    fn notify(&self, viewer: ViewerId, message: &str) -> Result<(), CollaboratorError> {
        let mut inner = self.inner.lock();
        inner.check_online(viewer)?;
        inner.events.push(ViewerEvent::Notified {
            viewer,
            message: message.to_owned(),
        });
        Ok(())
    }

    fn set_display(&self, viewer: ViewerId, text: &str) -> Result<(), CollaboratorError> {
        let mut inner = self.inner.lock();
        inner.check_online(viewer)?;
        inner.displays.insert(viewer, text.to_owned());
        inner.events.push(ViewerEvent::Display {
            viewer,
            text: text.to_owned(),
        });
        Ok(())
    }

    fn add_to_group(&self, viewer: ViewerId) -> Result<(), CollaboratorError> {
        let mut inner = self.inner.lock();
        inner.check_online(viewer)?;
        inner.group.insert(viewer);
        inner.events.push(ViewerEvent::Joined(viewer));
        Ok(())
    }

    fn remove_from_group(&self, viewer: ViewerId) -> Result<(), CollaboratorError> {
        let mut inner = self.inner.lock();
        inner.check_online(viewer)?;
        inner.group.remove(&viewer);
        inner.events.push(ViewerEvent::Left(viewer));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zombie() -> RecordableEntity {
        RecordableEntity::new(RecordedEntityId(1), "zombie")
    }

    #[test]
    fn spawn_and_despawn_track_entities() {
        let world = MemoryWorld::new();
        let ctx = world.create_context().unwrap();
        let id = world
            .spawn_entity(ctx, &zombie(), RecordablePosition::new(1.0, 2.0, 3.0), RecordableVector::ZERO)
            .unwrap();

        assert_eq!(world.entity_count(), 1);
        assert_eq!(world.entity_for(RecordedEntityId(1)).unwrap().id, id);

        world.despawn_entity(id).unwrap();
        assert_eq!(world.entity_count(), 0);
        assert_eq!(
            world.despawn_entity(id),
            Err(CollaboratorError::UnknownLiveEntity(id))
        );
    }

    #[test]
    fn null_state_clears_key() {
        let world = MemoryWorld::new();
        let ctx = world.create_context().unwrap();
        let id = world
            .spawn_entity(ctx, &zombie(), RecordablePosition::new(0.0, 0.0, 0.0), RecordableVector::ZERO)
            .unwrap();

        world.set_entity_state(id, "pose", &serde_json::json!("sitting")).unwrap();
        assert_eq!(
            world.entity_for(RecordedEntityId(1)).unwrap().state.get("pose"),
            Some(&serde_json::json!("sitting"))
        );
        world.set_entity_state(id, "pose", &serde_json::Value::Null).unwrap();
        assert!(world.entity_for(RecordedEntityId(1)).unwrap().state.is_empty());
    }

    #[test]
    fn releasing_context_drops_its_blocks() {
        let world = MemoryWorld::new();
        let ctx = world.create_context().unwrap();
        let pos = BlockPosition::new(0, 64, 0);
        world.set_block(ctx, pos, "stone").unwrap();
        assert_eq!(world.block_at(ctx, pos).as_deref(), Some("stone"));

        world.release_context(ctx).unwrap();
        assert_eq!(world.block_at(ctx, pos), None);
        assert!(!world.context_exists(ctx));
        assert!(world.release_context(ctx).is_err());
    }

    #[test]
    fn offline_viewer_calls_fail() {
        let world = MemoryWorld::new();
        let viewers = MemoryViewers::new();
        let ctx = world.create_context().unwrap();
        let v = ViewerId(3);
        world.disconnect_viewer(v);
        viewers.disconnect(v);

        assert_eq!(
            world.relocate_viewer(v, ctx),
            Err(CollaboratorError::ViewerOffline(v))
        );
        assert!(viewers.notify(v, "hi").is_err());
        assert!(viewers.add_to_group(v).is_err());
    }

    #[test]
    fn viewer_channel_records_displays_and_group() {
        let viewers = MemoryViewers::new();
        let v = ViewerId(1);
        viewers.add_to_group(v).unwrap();
        viewers.set_display(v, "Paused").unwrap();
        viewers.notify(v, "hello").unwrap();
        viewers.clear_display(v).unwrap();

        assert!(viewers.in_group(v));
        assert_eq!(viewers.display(v).as_deref(), Some(""));
        assert_eq!(viewers.display_updates(v), 2);
        assert_eq!(viewers.messages(v), vec!["hello".to_owned()]);
    }

    #[test]
    fn group_members_get_prefixed_names() {
        let viewers = MemoryViewers::new();
        let v = ViewerId(7);
        assert_eq!(viewers.display_name(v), "viewer-7");
        viewers.add_to_group(v).unwrap();
        assert_eq!(viewers.display_name(v), "[Viewer] viewer-7");
        viewers.remove_from_group(v).unwrap();
        assert_eq!(viewers.display_name(v), "viewer-7");
    }
}

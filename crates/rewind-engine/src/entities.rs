//! Live entity lifecycle.
//!
//! [`EntityManager`] maps each recorded entity to the live entities rendered
//! for it and keeps track of which viewers can see them. Spawning is not
//! idempotent: spawning the same recorded entity twice renders two live
//! instances, and both are addressed by later actions for that entity.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rewind_model::entity::{RecordableEntity, RecordedEntityId};
use rewind_model::position::{RecordablePosition, RecordableVector};

use crate::collab::{ContextId, ViewerId, WorldContext};
use crate::live::LiveEntityId;
use crate::PlaybackError;

/// One rendered instance of a recorded entity.
#[derive(Debug, Clone)]
struct LiveInstance {
    id: LiveEntityId,
    visible_to: BTreeSet<ViewerId>,
}

/// Owns the mapping from recorded entities to live entities.
pub struct EntityManager {
    world: Arc<dyn WorldContext>,
    context: ContextId,
    viewers: BTreeSet<ViewerId>,
    live: BTreeMap<RecordedEntityId, Vec<LiveInstance>>,
}

impl std::fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityManager")
            .field("context", &self.context)
            .field("viewers", &self.viewers)
            .field("entities", &self.live.len())
            .finish()
    }
}

impl EntityManager {
    /// A manager that renders into `context`.
    pub fn new(world: Arc<dyn WorldContext>, context: ContextId) -> Self {
        Self {
            world,
            context,
            viewers: BTreeSet::new(),
            live: BTreeMap::new(),
        }
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    /// Viewers new entities are shown to.
    pub fn viewers(&self) -> impl Iterator<Item = ViewerId> + '_ {
        self.viewers.iter().copied()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Render a live instance of `definition` and show it to every viewer.
    ///
    /// `position` and `velocity` override the definition's spawn position.
    /// Without either an override or a spawn position the entity cannot be
    /// placed and [`PlaybackError::MissingSpawnPosition`] is returned.
    pub fn spawn_entity(
        &mut self,
        definition: &RecordableEntity,
        position: Option<RecordablePosition>,
        velocity: Option<RecordableVector>,
    ) -> Result<LiveEntityId, PlaybackError> {
        let spawn = definition.spawn_position;
        let position = position
            .or(spawn.map(|s| s.position))
            .ok_or(PlaybackError::MissingSpawnPosition {
                entity: definition.id,
            })?;
        let velocity = velocity
            .or(spawn.map(|s| s.velocity))
            .unwrap_or(RecordableVector::ZERO);

        let id = self
            .world
            .spawn_entity(self.context, definition, position, velocity)?;

        let mut visible_to = BTreeSet::new();
        for &viewer in &self.viewers {
            match self.world.show_entity(id, viewer) {
                Ok(()) => {
                    visible_to.insert(viewer);
                }
                Err(error) => {
                    tracing::warn!(entity = %definition.id, %viewer, %error, "failed to show entity");
                }
            }
        }

        tracing::debug!(entity = %definition.id, live = %id, %position, "spawned entity");
        self.live
            .entry(definition.id)
            .or_default()
            .push(LiveInstance { id, visible_to });
        Ok(id)
    }

    /// Despawn every live instance of `entity`. Returns how many were
    /// despawned.
    ///
    /// The entity is forgotten even if the world fails to despawn one of its
    /// instances; the first such failure is returned.
    pub fn remove_entity(&mut self, entity: RecordedEntityId) -> Result<usize, PlaybackError> {
        let Some(instances) = self.live.remove(&entity) else {
            return Ok(0);
        };
        let count = instances.len();
        let mut first_error = None;
        for instance in instances {
            if let Err(error) = self.world.despawn_entity(instance.id) {
                first_error.get_or_insert(error);
            }
        }
        tracing::debug!(%entity, count, "removed entity");
        match first_error {
            Some(error) => Err(error.into()),
            None => Ok(count),
        }
    }

    /// Despawn everything. Failures are logged and skipped.
    pub fn remove_all_entities(&mut self) {
        for (entity, instances) in std::mem::take(&mut self.live) {
            for instance in instances {
                if let Err(error) = self.world.despawn_entity(instance.id) {
                    tracing::warn!(%entity, live = %instance.id, %error, "failed to despawn entity");
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Visibility
    // -----------------------------------------------------------------------

    /// Register a viewer and show them every live entity.
    pub fn add_entity_viewer(&mut self, viewer: ViewerId) {
        if !self.viewers.insert(viewer) {
            return;
        }
        for (entity, instances) in &mut self.live {
            for instance in instances {
                match self.world.show_entity(instance.id, viewer) {
                    Ok(()) => {
                        instance.visible_to.insert(viewer);
                    }
                    Err(error) => {
                        tracing::warn!(%entity, %viewer, %error, "failed to show entity");
                    }
                }
            }
        }
    }

    /// Unregister a viewer and hide every live entity from them.
    pub fn remove_entity_viewer(&mut self, viewer: ViewerId) {
        self.viewers.remove(&viewer);
        for (entity, instances) in &mut self.live {
            for instance in instances {
                if !instance.visible_to.remove(&viewer) {
                    continue;
                }
                if let Err(error) = self.world.hide_entity(instance.id, viewer) {
                    tracing::warn!(%entity, %viewer, %error, "failed to hide entity");
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The first live instance of `entity`.
    pub fn live_entity(&self, entity: RecordedEntityId) -> Option<LiveEntityId> {
        self.live
            .get(&entity)
            .and_then(|instances| instances.first())
            .map(|instance| instance.id)
    }

    /// Every live instance of `entity`, oldest first.
    pub fn instances(&self, entity: RecordedEntityId) -> Vec<LiveEntityId> {
        self.live
            .get(&entity)
            .map(|instances| instances.iter().map(|i| i.id).collect())
            .unwrap_or_default()
    }

    pub fn is_present(&self, entity: RecordedEntityId) -> bool {
        self.live.contains_key(&entity)
    }

    /// Number of live instances across all recorded entities.
    pub fn len(&self) -> usize {
        self.live.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Viewers that can see at least one instance of `entity`.
    pub fn viewers_of(&self, entity: RecordedEntityId) -> BTreeSet<ViewerId> {
        self.live
            .get(&entity)
            .map(|instances| {
                instances
                    .iter()
                    .flat_map(|i| i.visible_to.iter().copied())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Recorded entities with at least one live instance.
    pub fn present_entities(&self) -> BTreeSet<RecordedEntityId> {
        self.live.keys().copied().collect()
    }
}

// ── Immutable entity snapshot ──
//
// The store publishes `Arc<Snapshot>` through a watch channel. Readers
// hold a cheap clone; writers either swap in a whole new snapshot (bulk
// load) or copy-on-write a single entry (incremental delta).

use std::sync::Arc;

use hubdeck_api::{HubState, StateChangedData};
use indexmap::IndexMap;

use crate::model::{Entity, EntityId};

/// What an incremental `state_changed` delta did to the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ApplyOutcome {
    /// Entity was not known before.
    Inserted,
    /// Known entity whose state or update stamp moved.
    Updated,
    /// Known entity removed (`new_state` absent).
    Removed,
    /// Same state and update stamp; nothing changed.
    Unchanged,
    /// Removal of an entity that is not in the snapshot.
    Absent,
}

impl ApplyOutcome {
    pub fn is_change(self) -> bool {
        matches!(self, Self::Inserted | Self::Updated | Self::Removed)
    }

    /// Whether the delta counts toward `realtime_updates`.
    pub fn is_update(self) -> bool {
        matches!(self, Self::Inserted | Self::Updated)
    }
}

/// Insertion-ordered mirror of every hub entity plus its per-domain view.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entities: IndexMap<EntityId, Arc<Entity>>,
    grouped: IndexMap<String, Vec<Arc<Entity>>>,
}

impl Snapshot {
    pub fn from_entities(entities: impl IntoIterator<Item = Entity>) -> Self {
        let mut snapshot = Self {
            entities: entities
                .into_iter()
                .map(|entity| (entity.id.clone(), Arc::new(entity)))
                .collect(),
            grouped: IndexMap::new(),
        };
        snapshot.regroup();
        snapshot
    }

    /// Build from a bulk `get_states` answer. States without an id are skipped.
    pub(crate) fn from_states(states: Vec<HubState>) -> Self {
        Self::from_entities(
            states
                .into_iter()
                .filter(|state| !state.entity_id.is_empty())
                .map(Entity::from),
        )
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Entity>> {
        self.entities.get(id)
    }

    /// Entities in snapshot order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Entity>> {
        self.entities.values()
    }

    pub fn to_vec(&self) -> Vec<Arc<Entity>> {
        self.entities.values().cloned().collect()
    }

    /// Category → entities, categories in first-seen order and entities in
    /// snapshot order within each category.
    pub fn grouped(&self) -> &IndexMap<String, Vec<Arc<Entity>>> {
        &self.grouped
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.grouped.keys().map(String::as_str)
    }

    /// Decide what `change` would do without touching the snapshot.
    pub fn plan(&self, change: &StateChangedData) -> ApplyOutcome {
        let current = self.entities.get(change.entity_id.as_str());
        match (&change.new_state, current) {
            (None, None) => ApplyOutcome::Absent,
            (None, Some(_)) => ApplyOutcome::Removed,
            (Some(_), None) => ApplyOutcome::Inserted,
            (Some(incoming), Some(existing)) => {
                if existing.state != incoming.state || existing.last_updated != incoming.last_updated {
                    ApplyOutcome::Updated
                } else {
                    ApplyOutcome::Unchanged
                }
            }
        }
    }

    /// Apply one delta. Updates keep the entity's position; inserts append;
    /// removals close the gap.
    pub fn apply(&mut self, change: StateChangedData) -> ApplyOutcome {
        let outcome = self.plan(&change);
        match outcome {
            ApplyOutcome::Removed => {
                self.entities.shift_remove(change.entity_id.as_str());
            }
            ApplyOutcome::Inserted | ApplyOutcome::Updated => {
                if let Some(state) = change.new_state {
                    let entity = Entity::from(state);
                    // Keyed by the event's id, which is authoritative.
                    self.entities
                        .insert(EntityId::from(change.entity_id), Arc::new(entity));
                }
            }
            ApplyOutcome::Unchanged | ApplyOutcome::Absent => return outcome,
        }
        self.regroup();
        outcome
    }

    fn regroup(&mut self) {
        let mut grouped: IndexMap<String, Vec<Arc<Entity>>> = IndexMap::new();
        for entity in self.entities.values() {
            grouped
                .entry(entity.category.clone())
                .or_default()
                .push(Arc::clone(entity));
        }
        self.grouped = grouped;
    }
}

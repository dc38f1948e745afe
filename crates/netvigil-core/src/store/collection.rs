// ── Generic entity collection ──
//
// Concurrent storage with O(1) lookups and an ordered snapshot that
// is rebuilt on every mutation.

use std::collections::HashSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;

use crate::model::EntityId;

/// A concurrent collection for a single entity type.
///
/// Every mutation rebuilds the snapshot handed to readers. Values
/// are stored behind `Arc` so snapshots are cheap to hand out.
pub(crate) struct EntityCollection<T: Clone + Send + Sync + 'static> {
    by_id: DashMap<EntityId, Arc<T>>,
    snapshot: ArcSwap<Vec<Arc<T>>>,
}

impl<T: Clone + Send + Sync + 'static> EntityCollection<T> {
    pub(crate) fn new() -> Self {
        Self {
            by_id: DashMap::new(),
            snapshot: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Insert or replace an entity. Returns `true` if the id was new.
    pub(crate) fn upsert(&self, id: EntityId, entity: T) -> bool {
        let is_new = self.by_id.insert(id, Arc::new(entity)).is_none();
        self.rebuild_snapshot();
        is_new
    }

    /// Apply `f` to a copy of the entity and store the result.
    ///
    /// Returns `None` when the id is absent. The closure runs while the
    /// shard is locked, so it must not touch this collection.
    pub(crate) fn update<R>(&self, id: &EntityId, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let out = {
            let mut entry = self.by_id.get_mut(id)?;
            let mut next = T::clone(entry.value());
            let out = f(&mut next);
            *entry.value_mut() = Arc::new(next);
            out
        };
        self.rebuild_snapshot();
        Some(out)
    }

    /// Remove an entity. Returns it if it existed.
    pub(crate) fn remove(&self, id: &EntityId) -> Option<Arc<T>> {
        let removed = self.by_id.remove(id).map(|(_, v)| v);
        if removed.is_some() {
            self.rebuild_snapshot();
        }
        removed
    }

    pub(crate) fn get(&self, id: &EntityId) -> Option<Arc<T>> {
        self.by_id.get(id).map(|r| Arc::clone(r.value()))
    }

    /// Replace the whole collection, dropping ids not in `items`.
    pub(crate) fn replace_all(&self, items: Vec<(EntityId, T)>) {
        let keep: HashSet<EntityId> = items.iter().map(|(id, _)| id.clone()).collect();
        self.by_id.retain(|id, _| keep.contains(id));
        for (id, entity) in items {
            self.by_id.insert(id, Arc::new(entity));
        }
        self.rebuild_snapshot();
    }

    /// Current snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.load_full()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn rebuild_snapshot(&self) {
        let mut values: Vec<(EntityId, Arc<T>)> = self
            .by_id
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();
        values.sort_by(|a, b| a.0.cmp(&b.0));
        let values: Vec<Arc<T>> = values.into_iter().map(|(_, v)| v).collect();
        self.snapshot.store(Arc::new(values));
    }
}

//! Copy-on-write entity storage.
//!
//! A snapshot holds the identity map plus two position indices, one for
//! static entities and one for mobile ones. A writer records a sparse diff
//! over the snapshot, copies the mobile index up front and the static index
//! only on the first static write, so a transaction that only moves actors
//! never touches the (much larger) static index.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use glam::IVec3;
use tileworld_common::EntityId;

use crate::entity::{ChangeKind, EntityRef, EntityView, EntityWriteRecord};
use crate::error::KernelError;

type PositionIndex = HashMap<IVec3, Vec<EntityId>>;

fn index_insert(index: &mut PositionIndex, position: IVec3, id: EntityId) {
    let ids = index.entry(position).or_default();
    if let Err(at) = ids.binary_search(&id) {
        ids.insert(at, id);
    }
}

fn index_remove(index: &mut PositionIndex, position: IVec3, id: EntityId) {
    if let Some(ids) = index.get_mut(&position) {
        if let Ok(at) = ids.binary_search(&id) {
            ids.remove(at);
        }
        if ids.is_empty() {
            index.remove(&position);
        }
    }
}

fn merged_ids(a: Option<&Vec<EntityId>>, b: Option<&Vec<EntityId>>) -> Vec<EntityId> {
    let mut ids: Vec<EntityId> = a.into_iter().chain(b).flatten().copied().collect();
    ids.sort_unstable();
    ids
}

/// Immutable entity snapshot. Cloning shares all storage.
#[derive(Debug, Clone)]
pub struct EntityStore {
    entities: Arc<BTreeMap<EntityId, EntityRef>>,
    mobile_index: Arc<PositionIndex>,
    static_index: Arc<PositionIndex>,
    next_id: EntityId,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore {
    pub fn new() -> Self {
        Self {
            entities: Arc::default(),
            mobile_index: Arc::default(),
            static_index: Arc::default(),
            next_id: EntityId::FIRST,
        }
    }

    /// Id the next created entity will receive.
    pub fn next_id(&self) -> EntityId {
        self.next_id
    }

    /// Start a copy-on-write transaction over this snapshot.
    pub fn create_writer(&self) -> EntityStoreWriter {
        EntityStoreWriter {
            base: self.clone(),
            diff: BTreeMap::new(),
            mobile_index: (*self.mobile_index).clone(),
            mobile_dirty: false,
            static_index: None,
            next_id: self.next_id,
            released: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn shares_storage_with(&self, other: &EntityStore) -> (bool, bool, bool) {
        (
            Arc::ptr_eq(&self.entities, &other.entities),
            Arc::ptr_eq(&self.mobile_index, &other.mobile_index),
            Arc::ptr_eq(&self.static_index, &other.static_index),
        )
    }
}

impl EntityView for EntityStore {
    fn get(&self, id: EntityId) -> Option<&EntityRef> {
        self.entities.get(&id)
    }

    fn entities_at(&self, position: IVec3) -> Vec<EntityId> {
        merged_ids(
            self.mobile_index.get(&position),
            self.static_index.get(&position),
        )
    }

    fn all_with_ids(&self) -> Vec<(EntityId, EntityRef)> {
        self.entities
            .iter()
            .map(|(id, e)| (*id, Arc::clone(e)))
            .collect()
    }

    fn len(&self) -> usize {
        self.entities.len()
    }
}

/// Live, mutable view over an [`EntityStore`] snapshot.
///
/// Every write returns the [`EntityWriteRecord`] describing it; the caller
/// is responsible for fanning it out to subscribers.
#[derive(Debug)]
pub struct EntityStoreWriter {
    base: EntityStore,
    /// `None` marks a deletion.
    diff: BTreeMap<EntityId, Option<EntityRef>>,
    mobile_index: PositionIndex,
    mobile_dirty: bool,
    static_index: Option<PositionIndex>,
    next_id: EntityId,
    released: bool,
}

impl EntityStoreWriter {
    fn ensure_live(&self) -> Result<(), KernelError> {
        if self.released {
            return Err(KernelError::UseAfterRelease("entity store writer"));
        }
        Ok(())
    }

    fn index_mut(&mut self, is_static: bool) -> &mut PositionIndex {
        if is_static {
            self.static_index
                .get_or_insert_with(|| (*self.base.static_index).clone())
        } else {
            self.mobile_dirty = true;
            &mut self.mobile_index
        }
    }

    /// Whether this transaction has copied the static index yet.
    pub fn static_index_copied(&self) -> bool {
        self.static_index.is_some()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Number of entities added, updated or deleted so far.
    pub fn pending_changes(&self) -> usize {
        self.diff.len()
    }

    pub fn create(&mut self, entity: EntityRef) -> Result<EntityWriteRecord, KernelError> {
        self.ensure_live()?;
        let id = self.next_id;
        self.next_id = id.next();
        index_insert(self.index_mut(entity.is_static()), entity.position(), id);
        self.diff.insert(id, Some(Arc::clone(&entity)));
        Ok(EntityWriteRecord {
            id,
            old: None,
            new: Some(entity),
            kind: ChangeKind::Add,
        })
    }

    /// Replace an entity. Returns `None` when `entity` is the value already
    /// stored (same allocation); nothing changes in that case.
    pub fn set(
        &mut self,
        id: EntityId,
        entity: EntityRef,
    ) -> Result<Option<EntityWriteRecord>, KernelError> {
        self.ensure_live()?;
        let old = self.get(id).cloned().ok_or(KernelError::EntityNotFound(id))?;
        if Arc::ptr_eq(&old, &entity) {
            return Ok(None);
        }
        if old.is_static() != entity.is_static() {
            return Err(KernelError::MobilityChanged { id });
        }
        if old.position() != entity.position() {
            let index = self.index_mut(old.is_static());
            index_remove(index, old.position(), id);
            index_insert(index, entity.position(), id);
        }
        self.diff.insert(id, Some(Arc::clone(&entity)));
        Ok(Some(EntityWriteRecord {
            id,
            old: Some(old),
            new: Some(entity),
            kind: ChangeKind::Update,
        }))
    }

    /// Delete an entity. Returns `None` if it does not exist.
    pub fn remove(&mut self, id: EntityId) -> Result<Option<EntityWriteRecord>, KernelError> {
        self.ensure_live()?;
        let Some(old) = self.get(id).cloned() else {
            return Ok(None);
        };
        index_remove(self.index_mut(old.is_static()), old.position(), id);
        self.diff.insert(id, None);
        Ok(Some(EntityWriteRecord {
            id,
            old: Some(old),
            new: None,
            kind: ChangeKind::Delete,
        }))
    }

    /// Merge the diff into a new snapshot.
    ///
    /// Indices untouched by this transaction are shared with the base
    /// snapshot. With `release`, the writer's own copies are moved into the
    /// snapshot and the writer becomes unusable.
    pub fn build(&mut self, release: bool) -> Result<EntityStore, KernelError> {
        self.ensure_live()?;
        let entities = if self.diff.is_empty() {
            Arc::clone(&self.base.entities)
        } else {
            let mut map = (*self.base.entities).clone();
            for (id, entry) in &self.diff {
                match entry {
                    Some(e) => {
                        map.insert(*id, Arc::clone(e));
                    }
                    None => {
                        map.remove(id);
                    }
                }
            }
            Arc::new(map)
        };
        let mobile_index = match (self.mobile_dirty, release) {
            (false, _) => Arc::clone(&self.base.mobile_index),
            (true, true) => Arc::new(std::mem::take(&mut self.mobile_index)),
            (true, false) => Arc::new(self.mobile_index.clone()),
        };
        let static_index = match (&mut self.static_index, release) {
            (None, _) => Arc::clone(&self.base.static_index),
            (Some(index), true) => Arc::new(std::mem::take(index)),
            (Some(index), false) => Arc::new(index.clone()),
        };
        let store = EntityStore {
            entities,
            mobile_index,
            static_index,
            next_id: self.next_id,
        };
        if release {
            self.release();
        }
        Ok(store)
    }

    /// Drop all transaction state. Further writes fail.
    pub fn release(&mut self) {
        self.released = true;
        self.diff.clear();
        self.mobile_index.clear();
        self.static_index = None;
        self.base = EntityStore::new();
    }
}

impl EntityView for EntityStoreWriter {
    fn get(&self, id: EntityId) -> Option<&EntityRef> {
        match self.diff.get(&id) {
            Some(entry) => entry.as_ref(),
            None => self.base.entities.get(&id),
        }
    }

    fn entities_at(&self, position: IVec3) -> Vec<EntityId> {
        let statics = match &self.static_index {
            Some(index) => index.get(&position),
            None => self.base.static_index.get(&position),
        };
        merged_ids(self.mobile_index.get(&position), statics)
    }

    fn all_with_ids(&self) -> Vec<(EntityId, EntityRef)> {
        let mut all: Vec<(EntityId, EntityRef)> = self
            .base
            .entities
            .iter()
            .filter(|(id, _)| !self.diff.contains_key(id))
            .map(|(id, e)| (*id, Arc::clone(e)))
            .chain(
                self.diff
                    .iter()
                    .filter_map(|(id, e)| e.as_ref().map(|e| (*id, Arc::clone(e)))),
            )
            .collect();
        all.sort_unstable_by_key(|(id, _)| *id);
        all
    }

    fn len(&self) -> usize {
        let mut len = self.base.entities.len();
        for (id, entry) in &self.diff {
            match (self.base.entities.contains_key(id), entry.is_some()) {
                (false, true) => len += 1,
                (true, false) => len -= 1,
                _ => {}
            }
        }
        len
    }
}

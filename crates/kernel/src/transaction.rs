//! Write transactions.
//!
//! A transaction owns one writer per mutable part of a world. Every entity
//! mutation goes through it so the resulting [`EntityWriteRecord`] reaches
//! every subscribed component writer before the next command runs.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use glam::IVec3;
use tileworld_common::{Bounds, EntityId};

use crate::component::{ComponentStoreWriter, ComponentWriter, WorldComponent};
use crate::config::KernelConfig;
use crate::entity::{Entity, EntityCore, EntityRef, EntityView, EntityWriteRecord, Handle};
use crate::error::KernelError;
use crate::event_log::{Event, EventLogWriter, WorldEvent};
use crate::pathing::{PathingWriter, verify_consistency};
use crate::store::EntityStoreWriter;
use crate::world::World;

/// splitmix64 step.
fn next_seed(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Exclusive write session over a [`World`].
///
/// Dropping a transaction without committing discards every change; the
/// source world is never modified either way.
pub struct Transaction<'w> {
    world: &'w World,
    entities: EntityStoreWriter,
    components: ComponentStoreWriter,
    /// Kept only while the pathing check is enabled.
    records: Vec<EntityWriteRecord>,
    record_count: usize,
    seed: u64,
}

impl<'w> Transaction<'w> {
    /// Callers must already hold the world's transaction flag.
    pub(crate) fn open(world: &'w World) -> Self {
        Self {
            world,
            entities: world.entities().create_writer(),
            components: world.components().create_writer(),
            records: Vec::new(),
            record_count: 0,
            seed: world.seed(),
        }
    }

    /// The world this transaction started from.
    pub fn source(&self) -> &'w World {
        self.world
    }

    pub fn config(&self) -> &KernelConfig {
        self.world.config()
    }

    pub fn bounds(&self) -> Bounds {
        self.world.bounds()
    }

    /// Live view over the entities, including this transaction's writes.
    pub fn view(&self) -> &dyn EntityView {
        &self.entities
    }

    pub fn get(&self, id: EntityId) -> Option<&EntityRef> {
        self.entities.get(id)
    }

    /// Typed lookup; `TypeMismatch` when the entity is missing or of another
    /// kind.
    pub fn get_as<T: Entity>(&self, id: EntityId) -> Result<&T, KernelError> {
        self.entities
            .get(id)
            .and_then(|e| e.downcast_ref::<T>())
            .ok_or(KernelError::TypeMismatch {
                id,
                expected: std::any::type_name::<T>(),
            })
    }

    pub fn get_handle<T: Entity>(&self, handle: Handle<T>) -> Result<&T, KernelError> {
        self.get_as(handle.id)
    }

    pub fn entities_at(&self, position: IVec3) -> Vec<EntityId> {
        self.entities.entities_at(position)
    }

    fn publish(&mut self, record: EntityWriteRecord) -> Result<(), KernelError> {
        tracing::trace!(id = %record.id, kind = ?record.kind, "entity write");
        self.components.entity_change(&record, &self.entities)?;
        self.record_count += 1;
        if self.world.config().pathing_check_enabled() {
            self.records.push(record);
        }
        Ok(())
    }

    pub fn create<T: Entity>(&mut self, entity: T) -> Result<Handle<T>, KernelError> {
        let id = self.create_ref(Arc::new(entity))?;
        Ok(Handle::new(id))
    }

    pub fn create_ref(&mut self, entity: EntityRef) -> Result<EntityId, KernelError> {
        let record = self.entities.create(entity)?;
        let id = record.id;
        self.publish(record)?;
        Ok(id)
    }

    /// Replace an entity. Returns `false` when `entity` is the stored value.
    pub fn set(&mut self, id: EntityId, entity: EntityRef) -> Result<bool, KernelError> {
        match self.entities.set(id, entity)? {
            Some(record) => {
                self.publish(record)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Clone a `T`, edit the clone and store it.
    pub fn update<T: Entity + Clone>(
        &mut self,
        id: EntityId,
        edit: impl FnOnce(&mut T),
    ) -> Result<bool, KernelError> {
        let mut value = self.get_as::<T>(id)?.clone();
        edit(&mut value);
        self.set(id, Arc::new(value))
    }

    /// Edit the shared fields of any entity kind.
    pub fn modify(
        &mut self,
        id: EntityId,
        edit: impl FnOnce(&mut EntityCore),
    ) -> Result<bool, KernelError> {
        let mut value = self
            .entities
            .get(id)
            .ok_or(KernelError::EntityNotFound(id))?
            .clone_entity();
        edit(value.core_mut());
        self.set(id, EntityRef::from(value))
    }

    /// Delete an entity, returning its last value.
    pub fn remove(&mut self, id: EntityId) -> Result<Option<EntityRef>, KernelError> {
        let Some(record) = self.entities.remove(id)? else {
            return Ok(None);
        };
        let old = record.old.clone();
        self.publish(record)?;
        Ok(old)
    }

    pub fn pathing(&self) -> Result<&PathingWriter, KernelError> {
        self.components
            .writer::<PathingWriter>()
            .ok_or(KernelError::MissingComponent("PathingIndex"))
    }

    /// Direct access to the blocking index. Faces written here are not
    /// backed by entities, so they must not share voxels with blocking
    /// entities while the consistency check is enabled.
    pub fn pathing_mut(&mut self) -> Result<&mut PathingWriter, KernelError> {
        self.components
            .writer_mut::<PathingWriter>()
            .ok_or(KernelError::MissingComponent("PathingIndex"))
    }

    /// A read-only component.
    pub fn component<T: WorldComponent>(&self) -> Option<&T> {
        self.components.try_get::<T>()
    }

    pub fn component_writer<W: ComponentWriter>(&self) -> Option<&W> {
        self.components.writer::<W>()
    }

    pub fn component_writer_mut<W: ComponentWriter>(&mut self) -> Option<&mut W> {
        self.components.writer_mut::<W>()
    }

    fn event_log<E: Event>(&mut self) -> Result<&mut EventLogWriter<E>, KernelError> {
        self.components
            .writer_mut::<EventLogWriter<E>>()
            .ok_or(KernelError::MissingComponent(std::any::type_name::<E>()))
    }

    /// Append to the installed `EventLog<E>`.
    pub fn log_event<E: Event>(&mut self, event: E) -> Result<bool, KernelError> {
        self.event_log::<E>()?.log_event(event)
    }

    pub fn flush_events<E: Event>(&mut self) -> Result<usize, KernelError> {
        self.event_log::<E>()?.flush()
    }

    /// Log a [`WorldEvent`] if the world keeps a log of them.
    pub fn record_event(&mut self, event: WorldEvent) -> Result<(), KernelError> {
        if let Some(log) = self.components.writer_mut::<EventLogWriter<WorldEvent>>() {
            log.log_event(event)?;
        }
        Ok(())
    }

    /// Next value of the world's deterministic random stream.
    pub fn next_random(&mut self) -> u64 {
        next_seed(&mut self.seed)
    }

    /// Entity writes published so far.
    pub fn record_count(&self) -> usize {
        self.record_count
    }

    /// Bake every writer into a new world one tick later.
    pub fn commit(mut self) -> Result<World, KernelError> {
        if self.world.config().pathing_check_enabled() {
            verify_consistency(self.pathing()?, &self.entities, &self.records)?;
        }
        let entities = self.entities.build(true)?;
        let components = self.components.bake_immutable(true)?;
        tracing::debug!(
            tick = self.world.tick() + 1,
            writes = self.record_count,
            "transaction committed"
        );
        World::from_parts(
            self.world.bounds(),
            entities,
            components,
            self.seed,
            self.world.tick() + 1,
            self.world.config().clone(),
        )
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.entities.release();
        self.components.release();
        self.world.transaction_flag().store(false, Ordering::Release);
    }
}

//! Pluggable world components.
//!
//! A world carries an ordered list of components. Each one is an immutable
//! value; components that can change offer a writer, which lives for one
//! transaction and is baked back into a new immutable value at commit.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::entity::{EntityView, EntityWriteRecord};
use crate::error::KernelError;

/// Object-safe plumbing implemented for every component type.
pub trait ComponentBase {
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
    fn component_name(&self) -> &'static str;
}

impl<T: WorldComponent> ComponentBase for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn component_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Immutable extension data attached to a world.
pub trait WorldComponent: ComponentBase + fmt::Debug + Send + Sync + 'static {
    /// A writer for one transaction, or `None` for read-only components.
    fn create_writer(self: Arc<Self>) -> Option<Box<dyn ComponentWriter>> {
        None
    }
}

pub trait ComponentWriterBase {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: ComponentWriter> ComponentWriterBase for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Transaction-scoped writer of a component.
pub trait ComponentWriter: ComponentWriterBase + fmt::Debug + Send + 'static {
    /// Whether [`ComponentWriter::entity_change`] should be called.
    fn subscribes_to_entity_changes(&self) -> bool {
        false
    }

    /// Called for every entity mutation while the transaction runs, after
    /// the entity writer already reflects it.
    fn entity_change(
        &mut self,
        _record: &EntityWriteRecord,
        _view: &dyn EntityView,
    ) -> Result<(), KernelError> {
        Ok(())
    }

    /// Produce the immutable value. With `release` the writer is consumed
    /// and must not share mutable state with the result.
    fn bake_immutable(&mut self, release: bool) -> Result<Arc<dyn WorldComponent>, KernelError>;

    fn release(&mut self) {}
}

/// Ordered, immutable set of components.
#[derive(Debug, Clone, Default)]
pub struct ComponentStore {
    components: Vec<Arc<dyn WorldComponent>>,
}

impl ComponentStore {
    pub fn new(components: Vec<Arc<dyn WorldComponent>>) -> Self {
        Self { components }
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn WorldComponent>> {
        self.components.iter()
    }

    /// First component of type `T`.
    pub fn try_get<T: WorldComponent>(&self) -> Option<&T> {
        self.components
            .iter()
            .find_map(|c| c.as_any().downcast_ref::<T>())
    }

    /// Shared handle to the first component of type `T`.
    pub fn try_get_arc<T: WorldComponent>(&self) -> Option<Arc<T>> {
        self.components
            .iter()
            .find_map(|c| Arc::clone(c).into_any().downcast::<T>().ok())
    }

    pub fn count_of<T: WorldComponent>(&self) -> usize {
        self.components
            .iter()
            .filter(|c| c.as_any().is::<T>())
            .count()
    }

    pub fn create_writer(&self) -> ComponentStoreWriter {
        let slots = self
            .components
            .iter()
            .map(|c| match Arc::clone(c).create_writer() {
                Some(writer) => Slot::Writing(writer),
                None => Slot::ReadOnly(Arc::clone(c)),
            })
            .collect();
        ComponentStoreWriter {
            slots,
            released: false,
        }
    }
}

#[derive(Debug)]
enum Slot {
    ReadOnly(Arc<dyn WorldComponent>),
    Writing(Box<dyn ComponentWriter>),
}

/// Writers for every writable component, in store order.
#[derive(Debug)]
pub struct ComponentStoreWriter {
    slots: Vec<Slot>,
    released: bool,
}

impl ComponentStoreWriter {
    fn ensure_live(&self) -> Result<(), KernelError> {
        if self.released {
            return Err(KernelError::UseAfterRelease("component store writer"));
        }
        Ok(())
    }

    /// First writer of type `W`.
    pub fn writer<W: ComponentWriter>(&self) -> Option<&W> {
        self.slots.iter().find_map(|slot| match slot {
            Slot::Writing(w) => w.as_any().downcast_ref::<W>(),
            Slot::ReadOnly(_) => None,
        })
    }

    pub fn writer_mut<W: ComponentWriter>(&mut self) -> Option<&mut W> {
        self.slots.iter_mut().find_map(|slot| match slot {
            Slot::Writing(w) => w.as_any_mut().downcast_mut::<W>(),
            Slot::ReadOnly(_) => None,
        })
    }

    /// First read-only component of type `T`.
    pub fn try_get<T: WorldComponent>(&self) -> Option<&T> {
        self.slots.iter().find_map(|slot| match slot {
            Slot::ReadOnly(c) => c.as_any().downcast_ref::<T>(),
            Slot::Writing(_) => None,
        })
    }

    /// Fan an entity mutation out to every subscribed writer.
    pub fn entity_change(
        &mut self,
        record: &EntityWriteRecord,
        view: &dyn EntityView,
    ) -> Result<(), KernelError> {
        self.ensure_live()?;
        for slot in &mut self.slots {
            if let Slot::Writing(writer) = slot {
                if writer.subscribes_to_entity_changes() {
                    writer.entity_change(record, view)?;
                }
            }
        }
        Ok(())
    }

    pub fn bake_immutable(&mut self, release: bool) -> Result<ComponentStore, KernelError> {
        self.ensure_live()?;
        let mut components = Vec::with_capacity(self.slots.len());
        for slot in &mut self.slots {
            components.push(match slot {
                Slot::ReadOnly(c) => Arc::clone(c),
                Slot::Writing(w) => w.bake_immutable(release)?,
            });
        }
        if release {
            self.release();
        }
        Ok(ComponentStore { components })
    }

    /// Release every writer. Further use fails.
    pub fn release(&mut self) {
        for slot in &mut self.slots {
            if let Slot::Writing(w) = slot {
                w.release();
            }
        }
        self.slots.clear();
        self.released = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::{EventLog, EventLogWriter};
    use crate::kinds::Wall;
    use crate::pathing::{BlockingQuery, PathingIndex, PathingWriter};
    use crate::store::EntityStore;
    use glam::IVec3;
    use tileworld_common::{BlockingLayers, Bounds, Coordinate, Directions};

    #[derive(Debug, PartialEq)]
    struct Weather(&'static str);

    impl WorldComponent for Weather {}

    fn store() -> ComponentStore {
        let pathing = PathingIndex::empty(Bounds::from_size(IVec3::splat(4))).unwrap();
        ComponentStore::new(vec![
            Arc::new(Weather("rain")),
            Arc::new(pathing),
            Arc::new(EventLog::<String>::new()),
        ])
    }

    #[test]
    fn lookup_by_type() {
        let store = store();
        assert_eq!(store.try_get::<Weather>(), Some(&Weather("rain")));
        assert!(store.try_get::<PathingIndex>().is_some());
        assert!(store.try_get::<EventLog<u32>>().is_none());
        assert_eq!(store.count_of::<PathingIndex>(), 1);
        assert!(store.try_get_arc::<EventLog<String>>().is_some());
    }

    #[test]
    fn read_only_components_pass_through_in_order() {
        let store = store();
        let mut writer = store.create_writer();
        assert!(writer.try_get::<Weather>().is_some());
        assert!(writer.writer::<PathingWriter>().is_some());
        assert!(writer.writer::<EventLogWriter<String>>().is_some());

        let baked = writer.bake_immutable(true).unwrap();
        let names: Vec<&str> = baked.iter().map(|c| c.component_name()).collect();
        assert!(names[0].ends_with("Weather"));
        assert!(names[1].ends_with("PathingIndex"));
        assert!(names[2].contains("EventLog"));
        // The read-only component is shared, not copied.
        assert!(Arc::ptr_eq(
            &store.components[0],
            baked.iter().next().unwrap()
        ));
    }

    #[test]
    fn entity_changes_reach_subscribed_writers() {
        let store = store();
        let mut writer = store.create_writer();
        let mut entities = EntityStore::new().create_writer();
        let record = entities
            .create(Arc::new(Wall::new(
                "wall",
                Coordinate::at(IVec3::ONE),
                Directions::all(),
            )))
            .unwrap();
        writer.entity_change(&record, &entities).unwrap();

        let pathing = writer.writer::<PathingWriter>().unwrap();
        assert_eq!(
            pathing
                .blocked_faces(IVec3::ONE, BlockingLayers::STATIC)
                .unwrap(),
            Directions::all()
        );
    }

    #[test]
    fn released_writer_rejects_use() {
        let mut writer = store().create_writer();
        writer.bake_immutable(true).unwrap();
        assert!(matches!(
            writer.bake_immutable(true),
            Err(KernelError::UseAfterRelease(_))
        ));
        assert!(writer.writer::<PathingWriter>().is_none());
    }

    #[test]
    fn bake_without_release_keeps_writers() {
        let mut writer = store().create_writer();
        writer
            .writer_mut::<EventLogWriter<String>>()
            .unwrap()
            .log_event("first".into())
            .unwrap();
        let first = writer.bake_immutable(false).unwrap();
        writer
            .writer_mut::<EventLogWriter<String>>()
            .unwrap()
            .log_event("second".into())
            .unwrap();
        let second = writer.bake_immutable(true).unwrap();

        assert_eq!(first.try_get::<EventLog<String>>().unwrap().events().len(), 1);
        assert_eq!(second.try_get::<EventLog<String>>().unwrap().events().len(), 2);
    }
}

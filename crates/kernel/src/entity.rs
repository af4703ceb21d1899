//! Entity values and their capabilities.
//!
//! Entities are immutable values shared by `Arc`. A concrete kind advertises
//! what it can do through the capability accessors on [`Entity`]; each one
//! defaults to `None`, so the pipeline and the pathing index dispatch through
//! the vtable instead of inspecting concrete types.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use glam::IVec3;
use tileworld_common::{BlockingLayers, Coordinate, Directions, EntityFlags, EntityId};

use crate::command::{Command, CommandRef};

/// Shared handle to an entity value.
pub type EntityRef = Arc<dyn Entity>;

/// Fields every entity kind carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityCore {
    pub coordinate: Coordinate,
    pub name: String,
    pub flags: EntityFlags,
}

impl EntityCore {
    pub fn new(name: impl Into<String>, coordinate: Coordinate, flags: EntityFlags) -> Self {
        Self {
            coordinate,
            name: name.into(),
            flags,
        }
    }
}

/// Object-safe plumbing implemented for every `Clone` entity kind.
pub trait EntityBase {
    fn clone_entity(&self) -> Box<dyn Entity>;
    fn as_any(&self) -> &dyn Any;
    fn kind_name(&self) -> &'static str;
}

impl<T: Entity + Clone> EntityBase for T {
    fn clone_entity(&self) -> Box<dyn Entity> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn kind_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// A concrete entity kind.
pub trait Entity: EntityBase + fmt::Debug + Send + Sync + 'static {
    fn core(&self) -> &EntityCore;
    fn core_mut(&mut self) -> &mut EntityCore;

    fn coordinate(&self) -> Coordinate {
        self.core().coordinate
    }

    fn position(&self) -> IVec3 {
        self.core().coordinate.position
    }

    fn name(&self) -> &str {
        &self.core().name
    }

    fn flags(&self) -> EntityFlags {
        self.core().flags
    }

    /// Static entities carry no flags. Classification must not change while
    /// the entity lives in a store.
    fn is_static(&self) -> bool {
        self.core().flags.is_empty()
    }

    fn blocks_movement(&self) -> Option<&dyn BlocksMovement> {
        None
    }

    /// Marks the single entity whose position the pathing index tracks.
    fn is_pathing_anchor(&self) -> bool {
        false
    }

    fn vetoes_commands(&self) -> Option<&dyn VetoesOwnCommands> {
        None
    }

    fn rewrites_commands(&self) -> Option<&dyn RewritesOwnCommands> {
        None
    }

    fn responds_to_commands(&self) -> Option<&dyn RespondsToCommands> {
        None
    }
}

impl dyn Entity {
    pub fn downcast_ref<T: Entity>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn is<T: Entity>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

/// Blocked faces contributed by an entity to the voxel it occupies.
pub trait BlocksMovement {
    /// Entity-local blocked directions; rotated by the entity's facing.
    fn blocked_directions(&self) -> Directions;
    /// Layers the blocked directions apply to.
    fn blocking_layers(&self) -> BlockingLayers;
}

pub trait VetoesOwnCommands {
    /// Return `true` to discard `command` before it runs.
    fn vetoes(&self, id: EntityId, command: &dyn Command, view: &dyn EntityView) -> bool;
}

pub trait RewritesOwnCommands {
    /// Return a replacement for `command`, or `None` once it is acceptable.
    fn rewrite(&self, id: EntityId, command: &dyn Command, view: &dyn EntityView)
    -> Option<CommandRef>;
}

pub trait RespondsToCommands {
    /// Follow-up commands for a command that just ran.
    fn respond(&self, id: EntityId, command: &dyn Command, view: &dyn EntityView) -> Vec<CommandRef>;
}

/// Read access shared by entity snapshots and live writers.
pub trait EntityView {
    fn get(&self, id: EntityId) -> Option<&EntityRef>;
    /// Ids occupying a voxel, ascending.
    fn entities_at(&self, position: IVec3) -> Vec<EntityId>;
    /// Every entity, ascending by id.
    fn all_with_ids(&self) -> Vec<(EntityId, EntityRef)>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Kind of a single logical entity mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Add,
    Update,
    Delete,
}

/// Notification emitted once per entity mutation inside a transaction.
#[derive(Debug, Clone)]
pub struct EntityWriteRecord {
    pub id: EntityId,
    pub old: Option<EntityRef>,
    pub new: Option<EntityRef>,
    pub kind: ChangeKind,
}

impl EntityWriteRecord {
    /// Old and new entity, in that order, skipping the absent side.
    pub fn entities(&self) -> impl Iterator<Item = &EntityRef> {
        self.old.iter().chain(self.new.iter())
    }
}

/// Typed entity id. Lookups through a handle fail with `TypeMismatch` when
/// the id now refers to a different kind.
pub struct Handle<T> {
    pub id: EntityId,
    _kind: PhantomData<fn() -> T>,
}

impl<T: Entity> Handle<T> {
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            _kind: PhantomData,
        }
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Handle<T> {}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle<{}>({})", std::any::type_name::<T>(), self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::{Marker, Wall};

    #[test]
    fn downcast_through_trait_object() {
        let e: EntityRef = Arc::new(Marker::new("torch", Coordinate::default()));
        assert!(e.is::<Marker>());
        assert!(e.downcast_ref::<Wall>().is_none());
        assert_eq!(e.downcast_ref::<Marker>().map(|m| m.name()), Some("torch"));
    }

    #[test]
    fn clone_entity_produces_independent_value() {
        let e: EntityRef = Arc::new(Marker::new("torch", Coordinate::default()));
        let mut copy = e.clone_entity();
        copy.core_mut().name = "lantern".into();
        assert_eq!(e.name(), "torch");
        assert_eq!(copy.name(), "lantern");
    }

    #[test]
    fn static_means_no_flags() {
        let m = Marker::new("torch", Coordinate::default());
        assert!(m.is_static());
        assert!(m.blocks_movement().is_none());
    }
}

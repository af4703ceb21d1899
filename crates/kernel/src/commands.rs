//! Stock commands.
//!
//! Commands addressed to an entity that no longer exists are skipped, not
//! failed: earlier commands in the same cascade may legitimately have
//! removed it.

use std::marker::PhantomData;
use std::sync::Arc;

use glam::IVec3;
use tileworld_common::{BlockingLayers, Direction, EntityFlags, EntityId, Facing};

use crate::command::{Command, CommandRef};
use crate::entity::{EntityRef, EntityView};
use crate::error::KernelError;
use crate::event_log::{Event, WorldEvent};
use crate::kinds::Door;
use crate::pathing::BlockingQuery;
use crate::transaction::Transaction;

/// Add an entity to the world.
#[derive(Debug, Clone)]
pub struct Spawn {
    pub entity: EntityRef,
}

impl Spawn {
    pub fn new(entity: EntityRef) -> Self {
        Self { entity }
    }
}

impl Command for Spawn {
    fn apply(&self, tx: &mut Transaction<'_>) -> Result<Vec<CommandRef>, KernelError> {
        let at = self.entity.position();
        let id = tx.create_ref(Arc::clone(&self.entity))?;
        tx.record_event(WorldEvent::Spawned { id, at })?;
        Ok(Vec::new())
    }
}

/// Step one voxel, unless the pathing index blocks the move.
#[derive(Debug, Clone, PartialEq)]
pub struct Move {
    pub actor: EntityId,
    pub direction: Direction,
    /// Layers of the destination that can refuse entry.
    pub external: BlockingLayers,
    /// Layers of the source that can refuse exit.
    pub internal: BlockingLayers,
}

impl Move {
    pub fn new(actor: EntityId, direction: Direction) -> Self {
        Self {
            actor,
            direction,
            external: BlockingLayers::STATIC | BlockingLayers::MOBILE,
            internal: BlockingLayers::STATIC,
        }
    }

    pub fn with_layers(mut self, external: BlockingLayers, internal: BlockingLayers) -> Self {
        self.external = external;
        self.internal = internal;
        self
    }

    /// The same step taken by another actor.
    pub fn for_actor(&self, actor: EntityId) -> CommandRef {
        Arc::new(Self {
            actor,
            ..self.clone()
        })
    }
}

impl Command for Move {
    fn action_taker(&self) -> Option<EntityId> {
        Some(self.actor)
    }

    fn apply(&self, tx: &mut Transaction<'_>) -> Result<Vec<CommandRef>, KernelError> {
        let Some(entity) = tx.get(self.actor) else {
            tracing::debug!(actor = %self.actor, "move skipped, actor gone");
            return Ok(Vec::new());
        };
        if !entity.flags().contains(EntityFlags::MOBILE) {
            tracing::warn!(actor = %self.actor, "move skipped, entity is not mobile");
            return Ok(Vec::new());
        }
        let from = entity.position();
        if tx
            .pathing()?
            .is_blocked(from, self.direction, self.external, self.internal)?
        {
            tracing::debug!(actor = %self.actor, %from, direction = ?self.direction, "move blocked");
            tx.record_event(WorldEvent::MoveBlocked {
                id: self.actor,
                at: from,
                direction: self.direction,
            })?;
            return Ok(Vec::new());
        }
        let Some(to) = self.direction.step(from) else {
            return Ok(Vec::new());
        };
        tx.modify(self.actor, |core| core.coordinate.position = to)?;
        tx.record_event(WorldEvent::Moved {
            id: self.actor,
            from,
            to,
        })?;
        Ok(Vec::new())
    }
}

/// Change facing in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub actor: EntityId,
    pub facing: Facing,
}

impl Command for Turn {
    fn action_taker(&self) -> Option<EntityId> {
        Some(self.actor)
    }

    fn apply(&self, tx: &mut Transaction<'_>) -> Result<Vec<CommandRef>, KernelError> {
        let Some(entity) = tx.get(self.actor) else {
            return Ok(Vec::new());
        };
        if entity.coordinate().facing == self.facing {
            return Ok(Vec::new());
        }
        tx.modify(self.actor, |core| core.coordinate.facing = self.facing)?;
        Ok(Vec::new())
    }
}

/// Jump to any voxel inside the bounds, ignoring blocking.
#[derive(Debug, Clone, PartialEq)]
pub struct Teleport {
    pub actor: EntityId,
    pub to: IVec3,
}

impl Command for Teleport {
    fn action_taker(&self) -> Option<EntityId> {
        Some(self.actor)
    }

    fn apply(&self, tx: &mut Transaction<'_>) -> Result<Vec<CommandRef>, KernelError> {
        let Some(entity) = tx.get(self.actor) else {
            return Ok(Vec::new());
        };
        if !entity.flags().contains(EntityFlags::MOBILE) {
            tracing::warn!(actor = %self.actor, "teleport skipped, entity is not mobile");
            return Ok(Vec::new());
        }
        if !tx.bounds().contains(self.to) {
            tracing::warn!(actor = %self.actor, to = %self.to, "teleport target outside bounds");
            return Ok(Vec::new());
        }
        let from = entity.position();
        tx.modify(self.actor, |core| core.coordinate.position = self.to)?;
        tx.record_event(WorldEvent::Moved {
            id: self.actor,
            from,
            to: self.to,
        })?;
        Ok(Vec::new())
    }
}

/// Remove an entity that carries `MAY_DESTROY`.
#[derive(Debug, Clone, PartialEq)]
pub struct Destroy {
    pub target: EntityId,
}

impl Command for Destroy {
    fn action_taker(&self) -> Option<EntityId> {
        Some(self.target)
    }

    fn apply(&self, tx: &mut Transaction<'_>) -> Result<Vec<CommandRef>, KernelError> {
        let Some(entity) = tx.get(self.target) else {
            return Ok(Vec::new());
        };
        if !entity.flags().contains(EntityFlags::MAY_DESTROY) {
            tracing::debug!(target_id = %self.target, "destroy refused, entity is indestructible");
            return Ok(Vec::new());
        }
        tx.remove(self.target)?;
        tx.record_event(WorldEvent::Destroyed { id: self.target })?;
        Ok(Vec::new())
    }
}

/// Open a closed door or close an open one.
#[derive(Debug, Clone, PartialEq)]
pub struct ToggleDoor {
    pub door: EntityId,
}

impl Command for ToggleDoor {
    fn action_taker(&self) -> Option<EntityId> {
        Some(self.door)
    }

    fn apply(&self, tx: &mut Transaction<'_>) -> Result<Vec<CommandRef>, KernelError> {
        let Some(entity) = tx.get(self.door) else {
            return Ok(Vec::new());
        };
        if !entity.flags().contains(EntityFlags::MAY_CHANGE_STATE) {
            tracing::debug!(door = %self.door, "toggle refused, entity is fixed");
            return Ok(Vec::new());
        }
        if !entity.is::<Door>() {
            tracing::debug!(door = %self.door, kind = entity.kind_name(), "toggle skipped, not a door");
            return Ok(Vec::new());
        }
        let mut open = false;
        tx.update::<Door>(self.door, |door| {
            door.set_open(!door.is_open());
            open = door.is_open();
        })?;
        tx.record_event(WorldEvent::DoorToggled {
            id: self.door,
            open,
        })?;
        Ok(Vec::new())
    }
}

/// Append an event to the installed `EventLog<E>`.
#[derive(Debug, Clone)]
pub struct LogEvent<E> {
    pub event: E,
}

impl<E: Event> Command for LogEvent<E> {
    fn apply(&self, tx: &mut Transaction<'_>) -> Result<Vec<CommandRef>, KernelError> {
        tx.log_event(self.event.clone())?;
        Ok(Vec::new())
    }
}

/// Drop the retained events of the installed `EventLog<E>`.
#[derive(Debug)]
pub struct FlushEvents<E> {
    _event: PhantomData<fn() -> E>,
}

impl<E> Default for FlushEvents<E> {
    fn default() -> Self {
        Self {
            _event: PhantomData,
        }
    }
}

impl<E: Event> Command for FlushEvents<E> {
    fn apply(&self, tx: &mut Transaction<'_>) -> Result<Vec<CommandRef>, KernelError> {
        tx.flush_events::<E>()?;
        Ok(Vec::new())
    }
}

/// Expands into its children, which then run in order.
#[derive(Debug, Clone, Default)]
pub struct Batch(pub Vec<CommandRef>);

impl Command for Batch {
    fn apply(&self, _tx: &mut Transaction<'_>) -> Result<Vec<CommandRef>, KernelError> {
        Ok(self.0.clone())
    }
}

/// Shorthand for a `Move` as a shared command.
pub fn step(actor: EntityId, direction: Direction) -> CommandRef {
    Arc::new(Move::new(actor, direction))
}

/// Entities at `position` carrying all of `flags`.
pub fn flagged_at(view: &dyn EntityView, position: IVec3, flags: EntityFlags) -> Vec<EntityId> {
    view.entities_at(position)
        .into_iter()
        .filter(|id| view.get(*id).is_some_and(|e| e.flags().contains(flags)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::{Actor, Marker, Wall};
    use crate::world::World;
    use tileworld_common::{Bounds, Coordinate, Directions};

    fn world() -> World {
        World::create_empty(Bounds::from_size(IVec3::new(6, 6, 1)), 7, Vec::new()).unwrap()
    }

    fn spawn(world: &World, entity: EntityRef) -> (World, EntityId) {
        let id = world.entities().next_id();
        let next = world
            .apply_commands(vec![Arc::new(Spawn::new(entity))])
            .unwrap()
            .world;
        (next, id)
    }

    #[test]
    fn move_respects_walls_and_bounds() {
        let w = world();
        let (w, hero) = spawn(&w, Arc::new(Actor::new("hero", Coordinate::at(IVec3::new(1, 1, 0)))));
        let (w, _) = spawn(
            &w,
            Arc::new(Wall::new(
                "wall",
                Coordinate::at(IVec3::new(2, 1, 0)),
                Directions::WEST,
            )),
        );

        let w = w
            .apply_commands(vec![step(hero, Direction::East)])
            .unwrap()
            .world;
        assert_eq!(w.get(hero).unwrap().position(), IVec3::new(1, 1, 0));

        let w = w
            .apply_commands(vec![step(hero, Direction::South), step(hero, Direction::South)])
            .unwrap()
            .world;
        // Second step would leave the bounds.
        assert_eq!(w.get(hero).unwrap().position(), IVec3::new(1, 0, 0));
    }

    #[test]
    fn actors_block_each_other_on_the_mobile_layer() {
        let w = world();
        let (w, a) = spawn(&w, Arc::new(Actor::new("a", Coordinate::at(IVec3::ZERO))));
        let (w, b) = spawn(&w, Arc::new(Actor::new("b", Coordinate::at(IVec3::X))));
        let w = w.apply_commands(vec![step(a, Direction::East)]).unwrap().world;
        assert_eq!(w.get(a).unwrap().position(), IVec3::ZERO);

        // Once b moves away the way is clear.
        let w = w
            .apply_commands(vec![step(b, Direction::North), step(a, Direction::East)])
            .unwrap()
            .world;
        assert_eq!(w.get(a).unwrap().position(), IVec3::X);
    }

    #[test]
    fn destroy_honours_may_destroy() {
        let w = world();
        let (w, rat) = spawn(&w, Arc::new(Actor::new("rat", Coordinate::default())));
        let (w, torch) = spawn(&w, Arc::new(Marker::new("torch", Coordinate::default())));
        let w = w
            .apply_commands(vec![
                Arc::new(Destroy { target: rat }),
                Arc::new(Destroy { target: torch }),
            ])
            .unwrap()
            .world;
        assert!(w.get(rat).is_none());
        assert!(w.get(torch).is_some());
    }

    #[test]
    fn toggling_a_door_reopens_its_face() {
        let w = world();
        let (w, door) = spawn(&w, Arc::new(Door::new("gate", Coordinate::at(IVec3::new(3, 3, 0)))));
        assert!(
            w.pathing()
                .blocked_faces(IVec3::new(3, 3, 0), BlockingLayers::STATIC)
                .unwrap()
                .has(Direction::North)
        );
        let w = w
            .apply_commands(vec![Arc::new(ToggleDoor { door })])
            .unwrap()
            .world;
        assert!(w.get_as::<Door>(door).unwrap().is_open());
        assert!(
            w.pathing()
                .all_blocked_data(IVec3::new(3, 3, 0))
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn toggling_something_else_is_skipped() {
        let w = world();
        let (w, lever) = spawn(&w, Arc::new(Actor::new("lever", Coordinate::default())));
        let mut tx = w.transaction().unwrap();
        tx.modify(lever, |core| core.flags |= EntityFlags::MAY_CHANGE_STATE)
            .unwrap();
        let w = tx.commit().unwrap();

        let transition = w
            .apply_commands(vec![Arc::new(ToggleDoor { door: lever })])
            .unwrap();
        assert_eq!(transition.executed.len(), 1);
        assert!(Arc::ptr_eq(
            transition.world.get(lever).unwrap(),
            w.get(lever).unwrap()
        ));
    }

    #[test]
    fn turning_to_the_current_facing_writes_nothing() {
        let w = world();
        let (w, hero) = spawn(&w, Arc::new(Actor::new("hero", Coordinate::default())));
        let mut tx = w.transaction().unwrap();
        let turn = Turn {
            actor: hero,
            facing: Facing::North,
        };
        turn.apply(&mut tx).unwrap();
        assert_eq!(tx.record_count(), 0);
        Turn {
            actor: hero,
            facing: Facing::East,
        }
        .apply(&mut tx)
        .unwrap();
        assert_eq!(tx.record_count(), 1);
        assert_eq!(tx.source().tick(), w.tick());
    }

    #[test]
    fn turn_and_teleport() {
        let w = world();
        let (w, hero) = spawn(&w, Arc::new(Actor::new("hero", Coordinate::default())));
        let w = w
            .apply_commands(vec![
                Arc::new(Turn {
                    actor: hero,
                    facing: Facing::West,
                }),
                Arc::new(Teleport {
                    actor: hero,
                    to: IVec3::new(4, 4, 0),
                }),
                Arc::new(Teleport {
                    actor: hero,
                    to: IVec3::new(9, 9, 9),
                }),
            ])
            .unwrap()
            .world;
        let hero = w.get(hero).unwrap();
        assert_eq!(hero.coordinate().facing, Facing::West);
        assert_eq!(hero.position(), IVec3::new(4, 4, 0));
    }

    #[test]
    fn followers_repeat_the_leaders_step() {
        let w = world();
        let (w, follower) = spawn(&w, Arc::new(Actor::new("dog", Coordinate::at(IVec3::new(0, 2, 0)))));
        let (w, leader) = spawn(
            &w,
            Arc::new(
                Actor::new("hero", Coordinate::at(IVec3::new(0, 3, 0)))
                    .with_followers(vec![follower]),
            ),
        );
        let transition = w
            .apply_commands(vec![step(leader, Direction::East)])
            .unwrap();
        assert_eq!(transition.executed.len(), 2);
        let w = transition.world;
        assert_eq!(w.get(leader).unwrap().position(), IVec3::new(1, 3, 0));
        assert_eq!(w.get(follower).unwrap().position(), IVec3::new(1, 2, 0));
    }

    #[test]
    fn flagged_at_filters_by_flags() {
        let w = world();
        let (w, rat) = spawn(&w, Arc::new(Actor::new("rat", Coordinate::default())));
        let (w, _) = spawn(&w, Arc::new(Marker::new("torch", Coordinate::default())));
        assert_eq!(
            flagged_at(w.entities(), IVec3::ZERO, EntityFlags::MOBILE),
            vec![rat]
        );
    }
}

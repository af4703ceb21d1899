use std::fmt;

use glam::IVec3;
use tileworld_common::{BlockingLayers, Coordinate, Directions, EntityFlags, EntityId};
use tileworld_kernel::{BlockingQuery, EntityView, KernelError, World, WorldEvent};

#[derive(Debug, thiserror::Error)]
pub enum InspectError {
    #[error("slice z={z} outside world bounds {min}..={max}")]
    SliceOutOfBounds { z: i32, min: IVec3, max: IVec3 },
    #[error(transparent)]
    Kernel(#[from] KernelError),
}

/// World inspector for developer tooling.
///
/// Read-only queries against a committed world for debugging and the CLI.
pub struct WorldInspector;

impl WorldInspector {
    /// Produce a summary of the world state.
    pub fn summary(world: &World) -> WorldSummary {
        let all = world.all_with_ids();
        let mobile = all.iter().filter(|(_, e)| !e.is_static()).count();
        WorldSummary {
            tick: world.tick(),
            seed: world.seed(),
            entity_count: all.len(),
            mobile_count: mobile,
            component_count: world.components().len(),
            retained_events: world
                .events_since::<WorldEvent>(Default::default())
                .len(),
            anchor: world.pathing().pathing_anchor().ok().flatten(),
        }
    }

    /// Describe a single entity, or `None` if it does not exist.
    pub fn inspect_entity(world: &World, id: EntityId) -> Option<EntityInfo> {
        world.get(id).map(|e| EntityInfo {
            id,
            kind: short_kind(e.kind_name()),
            name: e.name().to_owned(),
            coordinate: e.coordinate(),
            flags: e.flags(),
            blocking: e.blocks_movement().map(|b| {
                (
                    b.blocked_directions().rotated(e.coordinate().facing),
                    b.blocking_layers(),
                )
            }),
            anchor: e.is_pathing_anchor(),
        })
    }

    /// List all entity IDs in the world, ascending.
    pub fn list_entities(world: &World) -> Vec<EntityId> {
        world.all_with_ids().into_iter().map(|(id, _)| id).collect()
    }

    /// ASCII map of one z-slice, north at the top.
    ///
    /// `@` pathing anchor, `#` every horizontal face blocked, `+` some faces
    /// blocked, `o` occupied but open, `.` empty.
    pub fn blocking_map(
        world: &World,
        z: i32,
        layers: BlockingLayers,
    ) -> Result<String, InspectError> {
        let bounds = world.bounds();
        if z < bounds.min.z || z > bounds.max.z {
            return Err(InspectError::SliceOutOfBounds {
                z,
                min: bounds.min,
                max: bounds.max,
            });
        }
        let anchor = world.pathing().pathing_anchor()?;
        let mut out = String::new();
        for y in (bounds.min.y..=bounds.max.y).rev() {
            for x in bounds.min.x..=bounds.max.x {
                let p = IVec3::new(x, y, z);
                let faces = world.pathing().blocked_faces(p, layers)?;
                let glyph = if anchor == Some(p) {
                    '@'
                } else if faces.contains(Directions::HORIZONTAL) {
                    '#'
                } else if !faces.is_empty() {
                    '+'
                } else if !world.entities().entities_at(p).is_empty() {
                    'o'
                } else {
                    '.'
                };
                out.push(glyph);
            }
            out.push('\n');
        }
        tracing::trace!(z, rows = bounds.size().y, "blocking map rendered");
        Ok(out)
    }
}

fn short_kind(type_name: &'static str) -> &'static str {
    type_name.rsplit("::").next().unwrap_or(type_name)
}

/// Summary of world state for the inspector.
#[derive(Debug, Clone)]
pub struct WorldSummary {
    pub tick: u64,
    pub seed: u64,
    pub entity_count: usize,
    pub mobile_count: usize,
    pub component_count: usize,
    pub retained_events: usize,
    pub anchor: Option<IVec3>,
}

impl fmt::Display for WorldSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "World: tick={} seed={:#x} entities={} mobile={} components={} events={}",
            self.tick,
            self.seed,
            self.entity_count,
            self.mobile_count,
            self.component_count,
            self.retained_events
        )?;
        if let Some(anchor) = self.anchor {
            write!(f, " anchor={anchor}")?;
        }
        Ok(())
    }
}

/// Detailed info about a single entity.
#[derive(Debug, Clone)]
pub struct EntityInfo {
    pub id: EntityId,
    pub kind: &'static str,
    pub name: String,
    pub coordinate: Coordinate,
    pub flags: EntityFlags,
    /// World-absolute blocked faces and their layers.
    pub blocking: Option<(Directions, BlockingLayers)>,
    pub anchor: bool,
}

impl fmt::Display for EntityInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Entity {} {} '{}' at {} facing {:?} flags={:?}",
            self.id, self.kind, self.name, self.coordinate.position, self.coordinate.facing, self.flags
        )?;
        if let Some((faces, layers)) = self.blocking {
            write!(f, " blocks={faces:?} on {layers:?}")?;
        }
        if self.anchor {
            write!(f, " (anchor)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tileworld_common::{Bounds, Facing};
    use tileworld_kernel::commands::Spawn;
    use tileworld_kernel::kinds::{Actor, Door, Wall};
    use tileworld_kernel::{CommandRef, EventLog, WorldComponent};

    fn world() -> World {
        let log: Arc<dyn WorldComponent> = Arc::new(EventLog::<WorldEvent>::new());
        World::create_empty(Bounds::from_size(IVec3::new(4, 3, 1)), 7, vec![log]).unwrap()
    }

    fn populated() -> World {
        let batch: Vec<CommandRef> = vec![
            Arc::new(Spawn::new(Arc::new(Wall::new(
                "pillar",
                Coordinate::at(IVec3::new(0, 2, 0)),
                Directions::all(),
            )))),
            Arc::new(Spawn::new(Arc::new(Door::new(
                "gate",
                Coordinate::new(IVec3::new(3, 2, 0), Facing::East),
            )))),
            Arc::new(Spawn::new(Arc::new(Actor::player(
                "hero",
                Coordinate::at(IVec3::new(1, 0, 0)),
            )))),
        ];
        world().apply_commands(batch).unwrap().world
    }

    #[test]
    fn summary_empty_world() {
        let summary = WorldInspector::summary(&world());
        assert_eq!(summary.tick, 0);
        assert_eq!(summary.entity_count, 0);
        assert_eq!(summary.component_count, 2);
        assert!(summary.anchor.is_none());
    }

    #[test]
    fn summary_with_entities() {
        let summary = WorldInspector::summary(&populated());
        assert_eq!(summary.tick, 1);
        assert_eq!(summary.entity_count, 3);
        // Doors may change state, so they count as mobile.
        assert_eq!(summary.mobile_count, 2);
        assert_eq!(summary.retained_events, 3);
        assert_eq!(summary.anchor, Some(IVec3::new(1, 0, 0)));
    }

    #[test]
    fn inspect_entity_found() {
        let world = populated();
        let info = WorldInspector::inspect_entity(&world, EntityId(2)).unwrap();
        assert_eq!(info.kind, "Door");
        assert_eq!(info.name, "gate");
        assert_eq!(
            info.blocking,
            Some((Directions::EAST, BlockingLayers::STATIC))
        );
        assert!(format!("{info}").contains("gate"));
    }

    #[test]
    fn inspect_entity_not_found() {
        assert!(WorldInspector::inspect_entity(&populated(), EntityId(42)).is_none());
    }

    #[test]
    fn list_entities() {
        let ids = WorldInspector::list_entities(&populated());
        assert_eq!(ids, vec![EntityId(1), EntityId(2), EntityId(3)]);
    }

    #[test]
    fn blocking_map_renders_rows_north_first() {
        let map = WorldInspector::blocking_map(
            &populated(),
            0,
            BlockingLayers::STATIC | BlockingLayers::MOBILE,
        )
        .unwrap();
        assert_eq!(map, "#..+\n....\n.@..\n");
    }

    #[test]
    fn blocking_map_rejects_missing_slice() {
        let err = WorldInspector::blocking_map(&populated(), 3, BlockingLayers::STATIC).unwrap_err();
        assert!(matches!(err, InspectError::SliceOutOfBounds { z: 3, .. }));
    }

    #[test]
    fn summary_display() {
        let s = format!("{}", WorldInspector::summary(&world()));
        assert!(s.contains("tick=0"));
        assert!(!s.contains("anchor"));
    }
}

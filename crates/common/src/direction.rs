use bitflags::bitflags;
use glam::IVec3;
use serde::{Deserialize, Serialize};

/// One of the six unit steps on the lattice.
///
/// Axis convention: East = +x, North = +y, Up = +z.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    North,
    East,
    South,
    West,
    Up,
    Down,
}

impl Direction {
    pub const ALL: [Direction; 6] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
        Direction::Up,
        Direction::Down,
    ];

    /// Unit offset of a single step in this direction.
    pub fn offset(self) -> IVec3 {
        match self {
            Self::North => IVec3::Y,
            Self::East => IVec3::X,
            Self::South => IVec3::NEG_Y,
            Self::West => IVec3::NEG_X,
            Self::Up => IVec3::Z,
            Self::Down => IVec3::NEG_Z,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::North => Self::South,
            Self::East => Self::West,
            Self::South => Self::North,
            Self::West => Self::East,
            Self::Up => Self::Down,
            Self::Down => Self::Up,
        }
    }

    /// The single-bit set for this direction.
    pub fn flag(self) -> Directions {
        match self {
            Self::North => Directions::NORTH,
            Self::East => Directions::EAST,
            Self::South => Directions::SOUTH,
            Self::West => Directions::WEST,
            Self::Up => Directions::UP,
            Self::Down => Directions::DOWN,
        }
    }

    /// Resolve the direction that leads from `from` to `to`, if the two
    /// voxels are orthogonal unit-distance neighbours.
    pub fn between(from: IVec3, to: IVec3) -> Option<Self> {
        let delta = to.as_i64vec3() - from.as_i64vec3();
        Self::ALL
            .into_iter()
            .find(|d| d.offset().as_i64vec3() == delta)
    }

    /// The neighbour of `from` in this direction. `None` when the step
    /// leaves the `i32` lattice.
    pub fn step(self, from: IVec3) -> Option<IVec3> {
        let o = self.offset();
        Some(IVec3::new(
            from.x.checked_add(o.x)?,
            from.y.checked_add(o.y)?,
            from.z.checked_add(o.z)?,
        ))
    }

    /// Rotate a horizontal direction clockwise by `turns` quarter turns.
    /// Vertical directions are unaffected.
    fn rotate_cw(self, turns: u8) -> Self {
        const RING: [Direction; 4] = [
            Direction::North,
            Direction::East,
            Direction::South,
            Direction::West,
        ];
        match RING.iter().position(|d| *d == self) {
            Some(i) => RING[(i + turns as usize) % 4],
            None => self,
        }
    }
}

/// Horizontal facing of an entity. Local "forward" (relative North) points
/// along the facing.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Facing {
    #[default]
    North,
    East,
    South,
    West,
}

impl Facing {
    /// Quarter turns clockwise from North.
    fn quarter_turns(self) -> u8 {
        match self {
            Self::North => 0,
            Self::East => 1,
            Self::South => 2,
            Self::West => 3,
        }
    }

    /// World-absolute direction this facing points at.
    pub fn direction(self) -> Direction {
        Direction::North.rotate_cw(self.quarter_turns())
    }

    /// Rotate an entity-local direction into a world-absolute one.
    pub fn rotate(self, local: Direction) -> Direction {
        local.rotate_cw(self.quarter_turns())
    }

    pub fn turned_right(self) -> Self {
        self.turned(1)
    }

    pub fn turned_left(self) -> Self {
        self.turned(3)
    }

    pub fn reversed(self) -> Self {
        self.turned(2)
    }

    fn turned(self, turns: u8) -> Self {
        match (self.quarter_turns() + turns) % 4 {
            0 => Self::North,
            1 => Self::East,
            2 => Self::South,
            _ => Self::West,
        }
    }
}

bitflags! {
    /// A set of lattice directions, e.g. the blocked faces of a voxel.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Directions: u8 {
        const NORTH = 1 << 0;
        const EAST = 1 << 1;
        const SOUTH = 1 << 2;
        const WEST = 1 << 3;
        const UP = 1 << 4;
        const DOWN = 1 << 5;

        const HORIZONTAL = Self::NORTH.bits() | Self::EAST.bits() | Self::SOUTH.bits() | Self::WEST.bits();
        const VERTICAL = Self::UP.bits() | Self::DOWN.bits();
    }
}

impl Default for Directions {
    fn default() -> Self {
        Self::empty()
    }
}

impl Directions {
    pub fn has(self, direction: Direction) -> bool {
        self.contains(direction.flag())
    }

    /// Individual directions contained in this set, in `Direction::ALL` order.
    pub fn directions(self) -> impl Iterator<Item = Direction> {
        Direction::ALL.into_iter().filter(move |d| self.has(*d))
    }

    /// Rotate an entity-local set into world-absolute directions.
    pub fn rotated(self, facing: Facing) -> Self {
        self.directions()
            .map(|d| facing.rotate(d).flag())
            .fold(Self::empty(), |acc, f| acc | f)
    }
}

impl From<Direction> for Directions {
    fn from(direction: Direction) -> Self {
        direction.flag()
    }
}

use glam::{I64Vec3, IVec3};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::direction::{Direction, Facing};

/// Unique identifier for an entity in the world.
///
/// Ids are allocated monotonically by the entity store and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl EntityId {
    /// Reserved sentinel meaning "no entity".
    pub const INVALID: EntityId = EntityId(0);
    /// First id handed out by a fresh store.
    pub const FIRST: EntityId = EntityId(1);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lattice position plus horizontal facing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coordinate {
    pub position: IVec3,
    pub facing: Facing,
}

impl Coordinate {
    pub fn new(position: IVec3, facing: Facing) -> Self {
        Self { position, facing }
    }

    pub fn at(position: IVec3) -> Self {
        Self {
            position,
            facing: Facing::default(),
        }
    }

    /// The coordinate one step away in `direction`, facing unchanged.
    pub fn stepped(self, direction: Direction) -> Option<Self> {
        let position = direction.step(self.position)?;
        Some(Self { position, ..self })
    }

    /// The voxel directly ahead along the facing.
    pub fn ahead(self) -> Option<IVec3> {
        self.facing.direction().step(self.position)
    }

    pub fn with_facing(self, facing: Facing) -> Self {
        Self { facing, ..self }
    }
}

/// Inclusive axis-aligned box of voxels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bounds {
    pub min: IVec3,
    pub max: IVec3,
}

impl Bounds {
    pub fn new(min: IVec3, max: IVec3) -> Self {
        Self { min, max }
    }

    /// Largest voxel count a valid box may span.
    pub const MAX_VOLUME: usize = 1 << 28;

    /// Bounds with `min` at the origin spanning `size` voxels per axis.
    pub fn from_size(size: IVec3) -> Self {
        Self {
            min: IVec3::ZERO,
            max: IVec3::from_array(size.to_array().map(|v| v.saturating_sub(1))),
        }
    }

    /// A box is valid when it spans at least one voxel on every axis and
    /// no more than [`Bounds::MAX_VOLUME`] voxels in total.
    pub fn is_valid(&self) -> bool {
        self.checked_volume().is_some()
    }

    fn extent(&self) -> I64Vec3 {
        self.max.as_i64vec3() - self.min.as_i64vec3() + I64Vec3::ONE
    }

    fn checked_volume(&self) -> Option<usize> {
        if !self.min.cmple(self.max).all() {
            return None;
        }
        let e = self.extent();
        let volume = e.x.checked_mul(e.y)?.checked_mul(e.z)?;
        usize::try_from(volume)
            .ok()
            .filter(|v| *v <= Self::MAX_VOLUME)
    }

    /// Voxels per axis. Only meaningful for valid bounds.
    pub fn size(&self) -> IVec3 {
        self.extent().as_ivec3()
    }

    /// Total voxel count. Zero for invalid bounds.
    pub fn volume(&self) -> usize {
        self.checked_volume().unwrap_or(0)
    }

    pub fn contains(&self, position: IVec3) -> bool {
        position.cmpge(self.min).all() && position.cmple(self.max).all()
    }

    /// Dense array index `x + w*(y + h*z)` relative to `min`.
    pub fn index_of(&self, position: IVec3) -> Option<usize> {
        if !self.contains(position) || !self.is_valid() {
            return None;
        }
        let s = self.size();
        let p = (position.as_i64vec3() - self.min.as_i64vec3()).as_ivec3();
        Some(p.x as usize + s.x as usize * (p.y as usize + s.y as usize * p.z as usize))
    }

    /// Inverse of [`Bounds::index_of`].
    pub fn position_of(&self, index: usize) -> Option<IVec3> {
        if index >= self.volume() {
            return None;
        }
        let s = self.size();
        let (w, h) = (s.x as usize, s.y as usize);
        let x = index % w;
        let y = (index / w) % h;
        let z = index / (w * h);
        Some(self.min + IVec3::new(x as i32, y as i32, z as i32))
    }

    /// Every voxel in index order.
    pub fn positions(&self) -> impl Iterator<Item = IVec3> + '_ {
        (0..self.volume()).filter_map(|i| self.position_of(i))
    }
}

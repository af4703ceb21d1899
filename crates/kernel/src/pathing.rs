//! Voxel blocking index.
//!
//! Each voxel stores, per blocking layer, the set of directions in which
//! movement out of (or into) the voxel is blocked. The index is maintained
//! incrementally: every entity write that involves a movement-blocking
//! entity recomputes only the voxels that entity left or entered.
//!
//! Queries treat everything outside the bounds as a solid wall.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use glam::IVec3;
use tileworld_common::{BlockingLayers, Bounds, Coordinate, Direction, Directions};

use crate::component::{ComponentWriter, WorldComponent};
use crate::entity::{EntityView, EntityWriteRecord};
use crate::error::KernelError;
use crate::pool::GridBuffer;

/// Blocked directions of one voxel, tracked independently per layer.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockedTileLayers {
    faces: [Directions; BlockingLayers::COUNT],
}

impl BlockedTileLayers {
    pub const EMPTY: Self = Self {
        faces: [Directions::empty(); BlockingLayers::COUNT],
    };
    /// Every direction blocked in every layer.
    pub const FULL: Self = Self {
        faces: [Directions::all(); BlockingLayers::COUNT],
    };

    /// Union of the blocked directions across `layers`.
    pub fn faces(&self, layers: BlockingLayers) -> Directions {
        layers
            .slots()
            .fold(Directions::empty(), |acc, slot| acc | self.faces[slot])
    }

    /// Add `directions` to every layer in `layers`.
    pub fn block(&mut self, directions: Directions, layers: BlockingLayers) {
        for slot in layers.slots() {
            self.faces[slot] |= directions;
        }
    }

    /// Replace the blocked set of every layer in `layers`.
    pub fn set(&mut self, directions: Directions, layers: BlockingLayers) {
        for slot in layers.slots() {
            self.faces[slot] = directions;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.faces.iter().all(|f| f.is_empty())
    }

    /// Layers with at least one blocked direction.
    pub fn occupied_layers(&self) -> BlockingLayers {
        self.faces
            .iter()
            .enumerate()
            .filter(|(_, f)| !f.is_empty())
            .fold(BlockingLayers::empty(), |acc, (slot, _)| {
                acc | BlockingLayers::from_bits_retain(1 << slot)
            })
    }
}

impl Default for BlockedTileLayers {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for BlockedTileLayers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (slot, faces) in self.faces.iter().enumerate() {
            if !faces.is_empty() {
                map.entry(&BlockingLayers::from_bits_retain(1 << slot), faces);
            }
        }
        map.finish()
    }
}

/// Read side of the blocking index, shared by snapshots and writers.
pub trait BlockingQuery {
    fn bounds(&self) -> Bounds;

    /// Every layer of a voxel. Out-of-bounds voxels are fully blocked.
    fn all_blocked_data(&self, position: IVec3) -> Result<BlockedTileLayers, KernelError>;

    /// Last known position of the pathing anchor.
    fn pathing_anchor(&self) -> Result<Option<IVec3>, KernelError>;

    fn blocked_faces(
        &self,
        position: IVec3,
        layers: BlockingLayers,
    ) -> Result<Directions, KernelError> {
        Ok(self.all_blocked_data(position)?.faces(layers))
    }

    /// Blocked if `from` blocks egress towards `direction` under `internal`,
    /// or the neighbour blocks ingress from the opposite side under
    /// `external`.
    fn is_blocked(
        &self,
        from: IVec3,
        direction: Direction,
        external: BlockingLayers,
        internal: BlockingLayers,
    ) -> Result<bool, KernelError> {
        if !self.bounds().contains(from) || self.blocked_faces(from, internal)?.has(direction) {
            return Ok(true);
        }
        let Some(to) = direction.step(from) else {
            return Ok(true);
        };
        Ok(self.blocked_faces(to, external)?.has(direction.opposite()))
    }

    fn is_blocked_between(
        &self,
        a: IVec3,
        b: IVec3,
        layers: BlockingLayers,
    ) -> Result<bool, KernelError> {
        self.is_blocked_between_layers(a, b, layers, layers)
    }

    /// Like [`BlockingQuery::is_blocked`] for two voxels that must be
    /// orthogonal unit-distance neighbours.
    fn is_blocked_between_layers(
        &self,
        a: IVec3,
        b: IVec3,
        external: BlockingLayers,
        internal: BlockingLayers,
    ) -> Result<bool, KernelError> {
        let direction = Direction::between(a, b).ok_or_else(|| {
            KernelError::GeometryPrecondition(format!("{a} and {b} are not adjacent"))
        })?;
        self.is_blocked(a, direction, external, internal)
    }

    /// Walk `length` steps along the coordinate's facing; true if any step
    /// is blocked.
    fn is_blocked_cast(
        &self,
        from: Coordinate,
        length: u32,
        external: BlockingLayers,
        internal: BlockingLayers,
    ) -> Result<bool, KernelError> {
        let direction = from.facing.direction();
        let mut position = from.position;
        for _ in 0..length {
            if self.is_blocked(position, direction, external, internal)? {
                return Ok(true);
            }
            match direction.step(position) {
                Some(next) => position = next,
                None => return Ok(true),
            }
        }
        Ok(false)
    }
}

/// Recompute a voxel from scratch out of the entities occupying it.
pub fn recompute_voxel(view: &dyn EntityView, position: IVec3) -> BlockedTileLayers {
    let mut tile = BlockedTileLayers::EMPTY;
    for id in view.entities_at(position) {
        let Some(entity) = view.get(id) else {
            continue;
        };
        if let Some(blocking) = entity.blocks_movement() {
            let absolute = blocking
                .blocked_directions()
                .rotated(entity.coordinate().facing);
            tile.block(absolute, blocking.blocking_layers());
        }
    }
    tile
}

/// Voxels whose blocking state depends on the given records.
pub fn touched_voxels(records: &[EntityWriteRecord]) -> Vec<IVec3> {
    let mut seen = HashSet::new();
    records
        .iter()
        .flat_map(EntityWriteRecord::entities)
        .filter(|e| e.blocks_movement().is_some())
        .map(|e| e.position())
        .filter(|p| seen.insert(*p))
        .collect()
}

/// Check every voxel touched by `records` against a from-scratch
/// recomputation over `view`.
pub fn verify_consistency(
    index: &dyn BlockingQuery,
    view: &dyn EntityView,
    records: &[EntityWriteRecord],
) -> Result<(), KernelError> {
    let bounds = index.bounds();
    for position in touched_voxels(records) {
        if !bounds.contains(position) {
            continue;
        }
        let incremental = index.all_blocked_data(position)?;
        let recomputed = recompute_voxel(view, position);
        if incremental != recomputed {
            return Err(KernelError::ConsistencyCheckFailure {
                position,
                incremental: format!("{incremental:?}"),
                recomputed: format!("{recomputed:?}"),
            });
        }
    }
    Ok(())
}

/// Immutable blocking index over fixed bounds.
pub struct PathingIndex {
    bounds: Bounds,
    cells: Arc<GridBuffer>,
    anchor: Option<IVec3>,
}

impl PathingIndex {
    pub fn empty(bounds: Bounds) -> Result<Self, KernelError> {
        if !bounds.is_valid() {
            return Err(KernelError::InvalidBounds {
                min: bounds.min,
                max: bounds.max,
            });
        }
        Ok(Self {
            bounds,
            cells: Arc::new(GridBuffer::acquire(bounds.volume())),
            anchor: None,
        })
    }

    /// Start a copy-on-write writer over this index.
    pub fn writer(self: &Arc<Self>) -> PathingWriter {
        PathingWriter {
            bounds: self.bounds,
            anchor: self.anchor,
            base: Some(Arc::clone(self)),
            cells: None,
            anchor_dirty: false,
        }
    }

    /// Whether two indices share the same backing array.
    pub fn shares_cells_with(&self, other: &PathingIndex) -> bool {
        Arc::ptr_eq(&self.cells, &other.cells)
    }
}

impl fmt::Debug for PathingIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathingIndex")
            .field("bounds", &self.bounds)
            .field("anchor", &self.anchor)
            .finish_non_exhaustive()
    }
}

impl BlockingQuery for PathingIndex {
    fn bounds(&self) -> Bounds {
        self.bounds
    }

    fn all_blocked_data(&self, position: IVec3) -> Result<BlockedTileLayers, KernelError> {
        match self.bounds.index_of(position) {
            Some(index) => self.cells.get(index),
            None => Ok(BlockedTileLayers::FULL),
        }
    }

    fn pathing_anchor(&self) -> Result<Option<IVec3>, KernelError> {
        Ok(self.anchor)
    }
}

impl WorldComponent for PathingIndex {
    fn create_writer(self: Arc<Self>) -> Option<Box<dyn ComponentWriter>> {
        Some(Box::new(self.writer()))
    }
}

/// Mutable blocking index for one transaction.
///
/// The base array is copied on the first write; a writer that never writes
/// bakes back to its base index without copying.
#[derive(Debug)]
pub struct PathingWriter {
    bounds: Bounds,
    /// `None` once released.
    base: Option<Arc<PathingIndex>>,
    cells: Option<GridBuffer>,
    anchor: Option<IVec3>,
    anchor_dirty: bool,
}

impl PathingWriter {
    fn base(&self) -> Result<&Arc<PathingIndex>, KernelError> {
        self.base
            .as_ref()
            .ok_or(KernelError::UseAfterRelease("pathing writer"))
    }

    fn cells_mut(&mut self) -> Result<&mut [BlockedTileLayers], KernelError> {
        if self.cells.is_none() {
            let copy = self.base()?.cells.duplicate()?;
            self.cells = Some(copy);
        }
        match self.cells.as_mut() {
            Some(cells) => cells.as_mut_slice(),
            None => Err(KernelError::UseAfterRelease("pathing writer")),
        }
    }

    fn cell_index(&self, position: IVec3) -> Result<usize, KernelError> {
        self.bounds.index_of(position).ok_or_else(|| {
            KernelError::GeometryPrecondition(format!(
                "{position} outside {}..={}",
                self.bounds.min, self.bounds.max
            ))
        })
    }

    /// Whether this writer holds changes its base index lacks.
    pub fn is_dirty(&self) -> bool {
        self.cells.is_some() || self.anchor_dirty
    }

    pub fn is_released(&self) -> bool {
        self.base.is_none()
    }

    /// Add blocked `directions` on `layers`.
    pub fn block_faces(
        &mut self,
        position: IVec3,
        directions: Directions,
        layers: BlockingLayers,
    ) -> Result<(), KernelError> {
        self.base()?;
        let index = self.cell_index(position)?;
        self.cells_mut()?[index].block(directions, layers);
        Ok(())
    }

    /// Replace the blocked set on `layers`; may reopen faces.
    pub fn set_blocked_faces(
        &mut self,
        position: IVec3,
        directions: Directions,
        layers: BlockingLayers,
    ) -> Result<(), KernelError> {
        self.base()?;
        let index = self.cell_index(position)?;
        self.cells_mut()?[index].set(directions, layers);
        Ok(())
    }

    /// Overwrite every layer of a voxel. Skips the copy when nothing changes.
    pub fn set_voxel(&mut self, position: IVec3, tile: BlockedTileLayers) -> Result<(), KernelError> {
        let index = self.cell_index(position)?;
        if self.all_blocked_data(position)? == tile {
            return Ok(());
        }
        self.cells_mut()?[index] = tile;
        Ok(())
    }

    pub fn set_pathing_anchor(&mut self, anchor: Option<IVec3>) -> Result<(), KernelError> {
        self.base()?;
        if self.anchor != anchor {
            tracing::debug!(?anchor, "pathing anchor moved");
            self.anchor = anchor;
            self.anchor_dirty = true;
        }
        Ok(())
    }

    /// Bake into an immutable index.
    ///
    /// With `release` the copied array moves into the result and the writer
    /// is consumed; otherwise the array is duplicated and the writer stays
    /// usable.
    pub fn bake(&mut self, release: bool) -> Result<Arc<PathingIndex>, KernelError> {
        let base = Arc::clone(self.base()?);
        let baked = if !self.is_dirty() {
            base
        } else {
            let cells = match (self.cells.as_mut(), release) {
                (None, _) => Arc::clone(&base.cells),
                (Some(cells), true) => Arc::new(cells.transfer()?),
                (Some(cells), false) => Arc::new(cells.duplicate()?),
            };
            Arc::new(PathingIndex {
                bounds: self.bounds,
                cells,
                anchor: self.anchor,
            })
        };
        if release {
            self.release();
        }
        Ok(baked)
    }

    /// Return the working array to the pool; the writer becomes unusable.
    pub fn release(&mut self) {
        if let Some(cells) = self.cells.as_mut() {
            cells.release();
        }
        self.cells = None;
        self.base = None;
    }

    /// Bring the voxels affected by `record` up to date.
    pub fn apply_record(
        &mut self,
        record: &EntityWriteRecord,
        view: &dyn EntityView,
    ) -> Result<(), KernelError> {
        self.base()?;
        if let Some(new) = record.new.as_ref().filter(|e| e.is_pathing_anchor()) {
            self.set_pathing_anchor(Some(new.position()))?;
        } else if record.old.as_ref().is_some_and(|e| e.is_pathing_anchor()) {
            self.set_pathing_anchor(None)?;
        }
        for position in touched_voxels(std::slice::from_ref(record)) {
            if !self.bounds.contains(position) {
                tracing::warn!(id = %record.id, %position, "blocking entity outside bounds");
                continue;
            }
            let tile = recompute_voxel(view, position);
            tracing::trace!(%position, ?tile, "voxel recomputed");
            self.set_voxel(position, tile)?;
        }
        Ok(())
    }
}

impl BlockingQuery for PathingWriter {
    fn bounds(&self) -> Bounds {
        self.bounds
    }

    fn all_blocked_data(&self, position: IVec3) -> Result<BlockedTileLayers, KernelError> {
        let base = self.base()?;
        let Some(index) = self.bounds.index_of(position) else {
            return Ok(BlockedTileLayers::FULL);
        };
        match &self.cells {
            Some(cells) => cells.get(index),
            None => base.cells.get(index),
        }
    }

    fn pathing_anchor(&self) -> Result<Option<IVec3>, KernelError> {
        self.base()?;
        Ok(self.anchor)
    }
}

impl ComponentWriter for PathingWriter {
    fn subscribes_to_entity_changes(&self) -> bool {
        true
    }

    fn entity_change(
        &mut self,
        record: &EntityWriteRecord,
        view: &dyn EntityView,
    ) -> Result<(), KernelError> {
        self.apply_record(record, view)
    }

    fn bake_immutable(&mut self, release: bool) -> Result<Arc<dyn WorldComponent>, KernelError> {
        let baked: Arc<dyn WorldComponent> = self.bake(release)?;
        Ok(baked)
    }

    fn release(&mut self) {
        PathingWriter::release(self);
    }
}

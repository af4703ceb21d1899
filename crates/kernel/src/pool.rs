//! Process-wide pool of dense grid buffers.
//!
//! Worlds of the same bounds reuse identically sized backing arrays instead
//! of reallocating them on every transaction. Buffers are keyed by exact
//! byte length and return to the pool when released or dropped.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use parking_lot::Mutex;

use crate::error::KernelError;
use crate::pathing::BlockedTileLayers;

/// Spare buffers kept per size class.
const MAX_POOLED_PER_SIZE: usize = 8;

static POOL: LazyLock<Mutex<HashMap<usize, Vec<Vec<BlockedTileLayers>>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn byte_len(len: usize) -> usize {
    len * std::mem::size_of::<BlockedTileLayers>()
}

fn take_pooled(len: usize) -> Option<Vec<BlockedTileLayers>> {
    let buffer = POOL.lock().get_mut(&byte_len(len)).and_then(Vec::pop);
    if buffer.is_some() {
        tracing::trace!(len, "grid buffer reused from pool");
    }
    buffer
}

fn return_pooled(buffer: Vec<BlockedTileLayers>) {
    let mut pool = POOL.lock();
    let spares = pool.entry(byte_len(buffer.len())).or_default();
    if spares.len() < MAX_POOLED_PER_SIZE {
        spares.push(buffer);
    }
}

/// Number of spare buffers currently pooled for `len` cells.
pub fn pooled_buffers(len: usize) -> usize {
    POOL.lock().get(&byte_len(len)).map_or(0, Vec::len)
}

/// A pooled dense array of voxel cells with a single owner.
///
/// Once released or transferred the buffer is consumed, and every access
/// fails with `UseAfterRelease`.
pub struct GridBuffer {
    cells: Option<Vec<BlockedTileLayers>>,
}

impl fmt::Debug for GridBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cells {
            Some(cells) => write!(f, "GridBuffer({} cells)", cells.len()),
            None => f.write_str("GridBuffer(released)"),
        }
    }
}

impl GridBuffer {
    /// A buffer of `len` empty cells.
    pub fn acquire(len: usize) -> Self {
        let cells = match take_pooled(len) {
            Some(mut cells) => {
                cells.fill(BlockedTileLayers::EMPTY);
                cells
            }
            None => vec![BlockedTileLayers::EMPTY; len],
        };
        Self { cells: Some(cells) }
    }

    /// A deep copy drawn from the pool.
    pub fn duplicate(&self) -> Result<Self, KernelError> {
        let source = self.as_slice()?;
        let cells = match take_pooled(source.len()) {
            Some(mut cells) => {
                cells.copy_from_slice(source);
                cells
            }
            None => source.to_vec(),
        };
        Ok(Self { cells: Some(cells) })
    }

    /// Move the storage into a new owner. This buffer is consumed.
    pub fn transfer(&mut self) -> Result<Self, KernelError> {
        let cells = self
            .cells
            .take()
            .ok_or(KernelError::UseAfterRelease("grid buffer"))?;
        Ok(Self { cells: Some(cells) })
    }

    /// Return the storage to the pool. Safe to call more than once.
    pub fn release(&mut self) {
        if let Some(cells) = self.cells.take() {
            return_pooled(cells);
        }
    }

    pub fn is_released(&self) -> bool {
        self.cells.is_none()
    }

    pub fn as_slice(&self) -> Result<&[BlockedTileLayers], KernelError> {
        self.cells
            .as_deref()
            .ok_or(KernelError::UseAfterRelease("grid buffer"))
    }

    pub fn as_mut_slice(&mut self) -> Result<&mut [BlockedTileLayers], KernelError> {
        self.cells
            .as_deref_mut()
            .ok_or(KernelError::UseAfterRelease("grid buffer"))
    }

    pub fn get(&self, index: usize) -> Result<BlockedTileLayers, KernelError> {
        let cells = self.as_slice()?;
        cells.get(index).copied().ok_or_else(|| {
            KernelError::GeometryPrecondition(format!(
                "cell {index} outside grid of {} cells",
                cells.len()
            ))
        })
    }
}

impl Drop for GridBuffer {
    fn drop(&mut self) {
        self.release();
    }
}

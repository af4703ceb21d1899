//! Shared lattice types for the tileworld engine.
//!
//! # Invariants
//! - Entity ids are never reused; `EntityId::INVALID` is never allocated.
//! - Direction sets are world-absolute unless documented as entity-local.

mod direction;
mod layers;
mod types;

pub use direction::{Direction, Directions, Facing};
pub use glam::IVec3;
pub use layers::{BlockingLayers, EntityFlags};
pub use types::{Bounds, Coordinate, EntityId};

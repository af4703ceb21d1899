//! Developer tooling for tileworld: read-only inspection of world snapshots.
//!
//! # Invariants
//! - Tools never open transactions; they only read committed worlds.

mod inspector;

pub use inspector::{EntityInfo, InspectError, WorldInspector, WorldSummary};

//! Tileworld kernel: immutable world snapshots advanced by command cascades.
//!
//! # Invariants
//! - A world never changes after construction; every mutation goes through a
//!   [`Transaction`] and produces a new world.
//! - Every entity write is fanned out to subscribed component writers before
//!   the next command runs, so the pathing index is consistent mid-cascade.
//! - A transaction is all-or-nothing: on error the source world is untouched.
//! - Voxels outside the world bounds are fully blocked on every layer.

pub mod command;
pub mod commands;
pub mod component;
pub mod config;
pub mod entity;
pub mod error;
pub mod event_log;
pub mod kinds;
pub mod pathing;
pub mod pipeline;
pub mod pool;
pub mod store;
pub mod transaction;
pub mod world;

pub use command::{Command, CommandRef};
pub use component::{ComponentStore, ComponentStoreWriter, ComponentWriter, WorldComponent};
pub use config::KernelConfig;
pub use entity::{
    BlocksMovement, ChangeKind, Entity, EntityCore, EntityRef, EntityView, EntityWriteRecord,
    Handle, RespondsToCommands, RewritesOwnCommands, VetoesOwnCommands,
};
pub use error::KernelError;
pub use event_log::{EventCheckpoint, EventLog, EventLogWriter, WorldEvent};
pub use pathing::{BlockedTileLayers, BlockingQuery, PathingIndex, PathingWriter};
pub use store::{EntityStore, EntityStoreWriter};
pub use transaction::Transaction;
pub use world::{Transition, World};

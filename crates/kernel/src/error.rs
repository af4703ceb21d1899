use glam::IVec3;
use tileworld_common::EntityId;

/// Errors raised by the world kernel.
///
/// None of these are recoverable mid-transaction: a failing transaction is
/// discarded as a whole and the previous world stays valid.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("use after release: {0}")]
    UseAfterRelease(&'static str),
    #[error("command rewrite did not settle after {iterations} iterations (last: {command})")]
    UnsettledCommandRewrite { iterations: usize, command: String },
    #[error("command cascade exceeded {limit} executions")]
    CascadeOverflow { limit: usize },
    #[error("entity {id} is not a {expected}")]
    TypeMismatch { id: EntityId, expected: &'static str },
    #[error("entity {0} not found")]
    EntityNotFound(EntityId),
    #[error("geometry precondition violated: {0}")]
    GeometryPrecondition(String),
    #[error("pathing consistency check failed at {position}: incremental {incremental}, recomputed {recomputed}")]
    ConsistencyCheckFailure {
        position: IVec3,
        incremental: String,
        recomputed: String,
    },
    #[error("a transaction is already open on this world")]
    TransactionInProgress,
    #[error("required component {0} is missing")]
    MissingComponent(&'static str),
    #[error("component {0} registered more than once")]
    DuplicateComponent(&'static str),
    #[error("entity {id} changed between static and mobile in place")]
    MobilityChanged { id: EntityId },
    #[error("invalid bounds {min}..={max}")]
    InvalidBounds { min: IVec3, max: IVec3 },
}

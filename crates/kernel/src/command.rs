use std::any::Any;
use std::fmt;
use std::sync::Arc;

use tileworld_common::EntityId;

use crate::error::KernelError;
use crate::transaction::Transaction;

/// Shared handle to a command value.
pub type CommandRef = Arc<dyn Command>;

pub trait CommandBase {
    fn as_any(&self) -> &dyn Any;
    fn command_name(&self) -> &'static str;
}

impl<T: Command> CommandBase for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn command_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// A unit of mutation.
///
/// Commands are values: they are never stored in the world, only executed
/// and returned to the caller as the audit trail of a transaction.
pub trait Command: CommandBase + fmt::Debug + Send + Sync + 'static {
    /// The entity this command is addressed to. Its veto, rewrite and
    /// respond hooks are consulted by the pipeline.
    fn action_taker(&self) -> Option<EntityId> {
        None
    }

    /// Mutate the world through `tx` and return follow-up commands, which
    /// run before any sibling of this command.
    fn apply(&self, tx: &mut Transaction<'_>) -> Result<Vec<CommandRef>, KernelError>;
}

impl dyn Command {
    pub fn downcast_ref<T: Command>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn is<T: Command>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

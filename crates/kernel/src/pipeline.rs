//! Command cascade execution.
//!
//! Commands run depth-first: everything a command spawns, directly or
//! through its action taker's respond hook, runs before the next sibling.

use std::collections::HashSet;
use std::sync::Arc;

use tileworld_common::EntityId;

use crate::command::CommandRef;
use crate::entity::EntityView;
use crate::error::KernelError;
use crate::transaction::Transaction;

/// Whether the action taker discards `command` outright.
fn is_vetoed(view: &dyn EntityView, command: &CommandRef) -> bool {
    let Some(taker) = command.action_taker() else {
        return false;
    };
    view.get(taker)
        .and_then(|e| e.vetoes_commands())
        .is_some_and(|hook| hook.vetoes(taker, command.as_ref(), view))
}

/// Let action takers rewrite `command` until one accepts it.
///
/// An entity may keep rewriting its own result, but once another entity has
/// taken a turn, an entity that already rewrote in this cycle accepts the
/// command as-is. This stops two entities from handing a command back and
/// forth forever. At most `max_iterations` rewrites are accepted; commands
/// nobody rewrites settle even with a zero limit.
pub fn settle(
    view: &dyn EntityView,
    mut command: CommandRef,
    max_iterations: usize,
) -> Result<CommandRef, KernelError> {
    let mut rewriters: HashSet<EntityId> = HashSet::new();
    let mut last_rewriter: Option<EntityId> = None;
    let mut rewrites = 0usize;
    loop {
        let Some(taker) = command.action_taker() else {
            return Ok(command);
        };
        if last_rewriter != Some(taker) && rewriters.contains(&taker) {
            return Ok(command);
        }
        let Some(hook) = view.get(taker).and_then(|e| e.rewrites_commands()) else {
            return Ok(command);
        };
        let Some(rewritten) = hook.rewrite(taker, command.as_ref(), view) else {
            return Ok(command);
        };
        if rewrites == max_iterations {
            return Err(KernelError::UnsettledCommandRewrite {
                iterations: max_iterations,
                command: format!("{command:?}"),
            });
        }
        rewrites += 1;
        tracing::debug!(
            %taker,
            from = command.command_name(),
            to = rewritten.command_name(),
            "command rewritten"
        );
        rewriters.insert(taker);
        last_rewriter = Some(taker);
        command = rewritten;
    }
}

/// Run `batch` and everything it spawns. Returns the executed commands,
/// after rewrites, in execution order.
pub fn execute(
    tx: &mut Transaction<'_>,
    batch: Vec<CommandRef>,
) -> Result<Vec<CommandRef>, KernelError> {
    let max_executions = tx.config().max_command_executions;
    let max_rewrites = tx.config().max_rewrite_iterations;
    let mut stack: Vec<CommandRef> = batch.into_iter().rev().collect();
    let mut executed = Vec::new();
    let mut popped = 0usize;

    while let Some(command) = stack.pop() {
        popped += 1;
        if popped > max_executions {
            tracing::error!(limit = max_executions, "command cascade overflow");
            return Err(KernelError::CascadeOverflow {
                limit: max_executions,
            });
        }
        if is_vetoed(tx.view(), &command) {
            tracing::debug!(command = command.command_name(), "command vetoed");
            continue;
        }
        let command = settle(tx.view(), command, max_rewrites)?;
        executed.push(Arc::clone(&command));

        let mut spawned = command.apply(tx)?;
        if let Some(taker) = command.action_taker() {
            if let Some(entity) = tx.get(taker).cloned() {
                if let Some(hook) = entity.responds_to_commands() {
                    spawned.extend(hook.respond(taker, command.as_ref(), tx.view()));
                }
            }
        }
        if !spawned.is_empty() {
            tracing::trace!(count = spawned.len(), "commands spawned");
        }
        stack.extend(spawned.into_iter().rev());
    }
    Ok(executed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::commands::{Batch, Move, step};
    use crate::config::KernelConfig;
    use crate::entity::{Entity, EntityCore, RewritesOwnCommands};
    use crate::kinds::Actor;
    use crate::world::World;
    use glam::IVec3;
    use parking_lot::Mutex;
    use tileworld_common::{Bounds, Coordinate, Direction, EntityFlags};

    type Journal = Arc<Mutex<Vec<&'static str>>>;

    /// Records its label and spawns its children.
    #[derive(Debug)]
    struct Tracer {
        label: &'static str,
        children: Vec<CommandRef>,
        journal: Journal,
    }

    impl Tracer {
        fn new(label: &'static str, children: Vec<CommandRef>, journal: &Journal) -> CommandRef {
            Arc::new(Self {
                label,
                children,
                journal: Arc::clone(journal),
            })
        }
    }

    impl Command for Tracer {
        fn apply(&self, _tx: &mut Transaction<'_>) -> Result<Vec<CommandRef>, KernelError> {
            self.journal.lock().push(self.label);
            Ok(self.children.clone())
        }
    }

    /// Spawns a copy of itself forever.
    #[derive(Debug)]
    struct Echo;

    impl Command for Echo {
        fn apply(&self, _tx: &mut Transaction<'_>) -> Result<Vec<CommandRef>, KernelError> {
            Ok(vec![Arc::new(Echo)])
        }
    }

    /// A token handed between jugglers.
    #[derive(Debug, Clone, PartialEq)]
    struct Hand {
        taker: EntityId,
        value: u32,
    }

    impl Command for Hand {
        fn action_taker(&self) -> Option<EntityId> {
            Some(self.taker)
        }

        fn apply(&self, _tx: &mut Transaction<'_>) -> Result<Vec<CommandRef>, KernelError> {
            Ok(Vec::new())
        }
    }

    #[derive(Debug, Clone, Copy)]
    enum Trick {
        /// Rewrites value 0 into 1 once, then accepts.
        Once,
        PassTo(EntityId),
        /// Keeps rewriting its own command.
        Spin,
    }

    #[derive(Debug, Clone)]
    struct Juggler {
        core: EntityCore,
        trick: Trick,
    }

    impl Juggler {
        fn new(trick: Trick) -> Self {
            Self {
                core: EntityCore::new("juggler", Coordinate::default(), EntityFlags::MOBILE),
                trick,
            }
        }
    }

    impl RewritesOwnCommands for Juggler {
        fn rewrite(
            &self,
            id: EntityId,
            command: &dyn Command,
            _view: &dyn EntityView,
        ) -> Option<CommandRef> {
            let hand = command.downcast_ref::<Hand>()?;
            let (taker, value) = match self.trick {
                Trick::Once if hand.value == 0 => (id, 1),
                Trick::Once => return None,
                Trick::PassTo(other) => (other, hand.value + 1),
                Trick::Spin => (id, hand.value + 1),
            };
            Some(Arc::new(Hand { taker, value }))
        }
    }

    impl Entity for Juggler {
        fn core(&self) -> &EntityCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut EntityCore {
            &mut self.core
        }

        fn rewrites_commands(&self) -> Option<&dyn RewritesOwnCommands> {
            Some(self)
        }
    }

    fn world_with(entities: Vec<Arc<dyn Entity>>) -> World {
        let world = World::create_empty(Bounds::from_size(IVec3::splat(6)), 0, Vec::new()).unwrap();
        let mut tx = world.transaction().unwrap();
        for e in entities {
            tx.create_ref(e).unwrap();
        }
        tx.commit().unwrap()
    }

    fn hands(executed: &[CommandRef]) -> Vec<Hand> {
        executed
            .iter()
            .filter_map(|c| c.downcast_ref::<Hand>().cloned())
            .collect()
    }

    #[test]
    fn cascade_runs_depth_first() {
        let journal = Journal::default();
        let c1a = Tracer::new("C1a", Vec::new(), &journal);
        let c1 = Tracer::new("C1", vec![c1a], &journal);
        let c2 = Tracer::new("C2", Vec::new(), &journal);
        let c0 = Tracer::new("C0", vec![c1, c2], &journal);
        let c3 = Tracer::new("C3", Vec::new(), &journal);

        let world = world_with(Vec::new());
        let transition = world.apply_commands(vec![c0, c3]).unwrap();
        assert_eq!(*journal.lock(), vec!["C0", "C1", "C1a", "C2", "C3"]);
        assert_eq!(transition.executed.len(), 5);
    }

    #[test]
    fn vetoed_move_never_runs() {
        let mut statue = Actor::new("statue", Coordinate::at(IVec3::ONE));
        statue.set_frozen(true);
        let world = world_with(vec![Arc::new(statue)]);
        let id = EntityId::FIRST;

        let transition = world
            .apply_commands(vec![step(id, Direction::East)])
            .unwrap();
        assert!(transition.executed.is_empty());
        assert_eq!(transition.world.get(id).unwrap().position(), IVec3::ONE);
    }

    #[test]
    fn single_rewrite_settles() {
        let world = world_with(vec![Arc::new(Juggler::new(Trick::Once))]);
        let executed = world
            .apply_commands(vec![Arc::new(Hand {
                taker: EntityId(1),
                value: 0,
            })])
            .unwrap()
            .executed;
        assert_eq!(
            hands(&executed),
            vec![Hand {
                taker: EntityId(1),
                value: 1
            }]
        );
    }

    #[test]
    fn ping_pong_rewrites_settle_on_return() {
        let world = world_with(vec![
            Arc::new(Juggler::new(Trick::PassTo(EntityId(2)))),
            Arc::new(Juggler::new(Trick::PassTo(EntityId(1)))),
        ]);
        let executed = world
            .apply_commands(vec![Arc::new(Hand {
                taker: EntityId(1),
                value: 0,
            })])
            .unwrap()
            .executed;
        assert_eq!(
            hands(&executed),
            vec![Hand {
                taker: EntityId(1),
                value: 2
            }]
        );
    }

    #[test]
    fn three_hop_chain_settles_when_it_closes() {
        let world = world_with(vec![
            Arc::new(Juggler::new(Trick::PassTo(EntityId(2)))),
            Arc::new(Juggler::new(Trick::PassTo(EntityId(3)))),
            Arc::new(Juggler::new(Trick::PassTo(EntityId(1)))),
        ]);
        let executed = world
            .apply_commands(vec![Arc::new(Hand {
                taker: EntityId(1),
                value: 0,
            })])
            .unwrap()
            .executed;
        assert_eq!(
            hands(&executed),
            vec![Hand {
                taker: EntityId(1),
                value: 3
            }]
        );
    }

    #[test]
    fn self_rewriting_forever_is_unsettled() {
        let world = world_with(vec![Arc::new(Juggler::new(Trick::Spin))]).with_config(KernelConfig {
            max_rewrite_iterations: 5,
            ..KernelConfig::default()
        });
        let err = world
            .apply_commands(vec![Arc::new(Hand {
                taker: EntityId(1),
                value: 0,
            })])
            .unwrap_err();
        assert!(matches!(
            err,
            KernelError::UnsettledCommandRewrite { iterations: 5, .. }
        ));
    }

    #[test]
    fn zero_rewrite_limit_only_fails_actual_rewrites() {
        let world = world_with(vec![Arc::new(Juggler::new(Trick::Once))]).with_config(KernelConfig {
            max_rewrite_iterations: 0,
            ..KernelConfig::default()
        });
        let journal = Journal::default();
        let transition = world
            .apply_commands(vec![
                Arc::new(Batch::default()),
                Tracer::new("plain", Vec::new(), &journal),
            ])
            .unwrap();
        assert_eq!(transition.executed.len(), 2);

        let err = transition
            .world
            .apply_commands(vec![Arc::new(Hand {
                taker: EntityId(1),
                value: 0,
            })])
            .unwrap_err();
        assert!(matches!(
            err,
            KernelError::UnsettledCommandRewrite { iterations: 0, .. }
        ));
    }

    #[test]
    fn runaway_cascade_overflows() {
        let world = world_with(Vec::new()).with_config(KernelConfig {
            max_command_executions: 50,
            ..KernelConfig::default()
        });
        let err = world.apply_commands(vec![Arc::new(Echo)]).unwrap_err();
        assert!(matches!(err, KernelError::CascadeOverflow { limit: 50 }));
        // The failed transaction released the world for the next one.
        assert!(world.transaction().is_ok());
        assert_eq!(world.tick(), 1);
    }

    #[test]
    fn commands_for_missing_takers_are_skipped() {
        let world = world_with(Vec::new());
        let executed = world
            .apply_commands(vec![Arc::new(Move::new(EntityId(77), Direction::North))])
            .unwrap()
            .executed;
        // Nothing vetoed it, so it counts as executed even though it did nothing.
        assert_eq!(executed.len(), 1);
    }
}

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use glam::IVec3;
use tileworld_common::{Bounds, EntityId};

use crate::command::CommandRef;
use crate::component::{ComponentStore, WorldComponent};
use crate::config::KernelConfig;
use crate::entity::{Entity, EntityRef, EntityView, Handle};
use crate::error::KernelError;
use crate::event_log::{Event, EventCheckpoint, EventLog};
use crate::pathing::PathingIndex;
use crate::pipeline;
use crate::store::EntityStore;
use crate::transaction::Transaction;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(hash: &mut u64, bytes: &[u8]) {
    for b in bytes {
        *hash ^= u64::from(*b);
        *hash = hash.wrapping_mul(FNV_PRIME);
    }
}

/// Result of applying a command batch.
#[derive(Debug)]
pub struct Transition {
    pub world: World,
    /// Commands that actually ran, after rewrites, in execution order.
    pub executed: Vec<CommandRef>,
}

/// Immutable world snapshot.
///
/// A world is only ever produced by [`World::create_empty`] or by committing
/// a transaction over a previous world. Both the old and the new world stay
/// valid after a transition; release whichever is no longer needed.
pub struct World {
    bounds: Bounds,
    entities: EntityStore,
    components: ComponentStore,
    pathing: Arc<PathingIndex>,
    seed: u64,
    tick: u64,
    config: KernelConfig,
    transaction_open: AtomicBool,
}

impl World {
    /// A world with no entities.
    ///
    /// A `PathingIndex` over `bounds` is added in front of `components`
    /// unless one is supplied.
    pub fn create_empty(
        bounds: Bounds,
        seed: u64,
        components: Vec<Arc<dyn WorldComponent>>,
    ) -> Result<Self, KernelError> {
        if !bounds.is_valid() {
            return Err(KernelError::InvalidBounds {
                min: bounds.min,
                max: bounds.max,
            });
        }
        let mut store = ComponentStore::new(components);
        if store.count_of::<PathingIndex>() == 0 {
            let mut with_pathing: Vec<Arc<dyn WorldComponent>> =
                vec![Arc::new(PathingIndex::empty(bounds)?)];
            with_pathing.extend(store.iter().cloned());
            store = ComponentStore::new(with_pathing);
        }
        tracing::info!(min = %bounds.min, max = %bounds.max, seed, "world created");
        Self::from_parts(
            bounds,
            EntityStore::new(),
            store,
            seed,
            0,
            KernelConfig::default(),
        )
    }

    pub(crate) fn from_parts(
        bounds: Bounds,
        entities: EntityStore,
        components: ComponentStore,
        seed: u64,
        tick: u64,
        config: KernelConfig,
    ) -> Result<Self, KernelError> {
        match components.count_of::<PathingIndex>() {
            0 => return Err(KernelError::MissingComponent("PathingIndex")),
            1 => {}
            _ => return Err(KernelError::DuplicateComponent("PathingIndex")),
        }
        let pathing = components
            .try_get_arc::<PathingIndex>()
            .ok_or(KernelError::MissingComponent("PathingIndex"))?;
        let pathing_bounds = crate::pathing::BlockingQuery::bounds(pathing.as_ref());
        if pathing_bounds != bounds {
            return Err(KernelError::GeometryPrecondition(format!(
                "pathing index covers {}..={}, world covers {}..={}",
                pathing_bounds.min, pathing_bounds.max, bounds.min, bounds.max
            )));
        }
        Ok(Self {
            bounds,
            entities,
            components,
            pathing,
            seed,
            tick,
            config,
            transaction_open: AtomicBool::new(false),
        })
    }

    /// Replace the limits carried by this world and its successors.
    pub fn with_config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    /// Open an exclusive write transaction.
    pub fn transaction(&self) -> Result<Transaction<'_>, KernelError> {
        if self
            .transaction_open
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(KernelError::TransactionInProgress);
        }
        Ok(Transaction::open(self))
    }

    pub(crate) fn transaction_flag(&self) -> &AtomicBool {
        &self.transaction_open
    }

    /// Run `commands` through the pipeline in one transaction.
    ///
    /// On error nothing is committed and this world is unchanged.
    pub fn apply_commands(&self, commands: Vec<CommandRef>) -> Result<Transition, KernelError> {
        let span = tracing::info_span!("apply_commands", tick = self.tick, batch = commands.len());
        let _guard = span.enter();
        let mut tx = self.transaction()?;
        let executed = pipeline::execute(&mut tx, commands)?;
        let world = tx.commit()?;
        tracing::debug!(executed = executed.len(), "commands applied");
        Ok(Transition { world, executed })
    }

    /// Dispose of this world. Grid buffers no longer shared with another
    /// world return to the pool.
    pub fn release(self) {
        tracing::debug!(tick = self.tick, "world released");
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Number of transactions committed since creation.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn entities(&self) -> &EntityStore {
        &self.entities
    }

    pub fn components(&self) -> &ComponentStore {
        &self.components
    }

    pub fn pathing(&self) -> &PathingIndex {
        &self.pathing
    }

    pub fn get(&self, id: EntityId) -> Option<&EntityRef> {
        self.entities.get(id)
    }

    pub fn get_as<T: Entity>(&self, id: EntityId) -> Result<&T, KernelError> {
        self.entities
            .get(id)
            .and_then(|e| e.downcast_ref::<T>())
            .ok_or(KernelError::TypeMismatch {
                id,
                expected: std::any::type_name::<T>(),
            })
    }

    pub fn try_get_as<T: Entity>(&self, id: EntityId) -> Option<&T> {
        self.entities.get(id).and_then(|e| e.downcast_ref::<T>())
    }

    pub fn get_handle<T: Entity>(&self, handle: Handle<T>) -> Result<&T, KernelError> {
        self.get_as(handle.id)
    }

    pub fn entities_at(&self, position: IVec3) -> Vec<EntityId> {
        self.entities.entities_at(position)
    }

    /// Handles to every entity of kind `T`, ascending by id.
    pub fn entities_of_type<T: Entity>(&self) -> Vec<Handle<T>> {
        self.entities
            .all_with_ids()
            .into_iter()
            .filter(|(_, e)| e.is::<T>())
            .map(|(id, _)| Handle::new(id))
            .collect()
    }

    pub fn all_with_ids(&self) -> Vec<(EntityId, EntityRef)> {
        self.entities.all_with_ids()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn component<T: WorldComponent>(&self) -> Option<&T> {
        self.components.try_get::<T>()
    }

    /// Checkpoint of the installed `EventLog<E>`, if any.
    pub fn checkpoint<E: Event>(&self) -> Option<EventCheckpoint> {
        self.component::<EventLog<E>>().map(EventLog::checkpoint)
    }

    /// Retained events of `EventLog<E>` logged after `checkpoint`. Empty
    /// when no such log is installed.
    pub fn events_since<E: Event>(&self, checkpoint: EventCheckpoint) -> &[E] {
        self.component::<EventLog<E>>()
            .map(|log| log.events_since(checkpoint))
            .unwrap_or_default()
    }

    /// FNV-1a over tick, seed and every entity in id order. Equal worlds
    /// replayed from the same inputs hash equal.
    pub fn state_hash(&self) -> u64 {
        let mut hash = FNV_OFFSET;
        fnv1a(&mut hash, &self.tick.to_le_bytes());
        fnv1a(&mut hash, &self.seed.to_le_bytes());
        for (id, entity) in self.entities.all_with_ids() {
            let c = entity.coordinate();
            fnv1a(&mut hash, &id.0.to_le_bytes());
            for axis in c.position.to_array() {
                fnv1a(&mut hash, &axis.to_le_bytes());
            }
            fnv1a(&mut hash, &[c.facing as u8, entity.flags().bits()]);
            fnv1a(&mut hash, entity.name().as_bytes());
            fnv1a(&mut hash, entity.kind_name().as_bytes());
        }
        hash
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("bounds", &self.bounds)
            .field("tick", &self.tick)
            .field("seed", &self.seed)
            .field("entities", &self.entities.len())
            .field("components", &self.components.len())
            .finish()
    }
}

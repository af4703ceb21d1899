//! Stock entity kinds.

use tileworld_common::{BlockingLayers, Coordinate, Directions, EntityFlags, EntityId};

use crate::command::{Command, CommandRef};
use crate::entity::{
    BlocksMovement, Entity, EntityCore, EntityView, RespondsToCommands, VetoesOwnCommands,
};

/// Static geometry blocking a fixed set of entity-local faces.
#[derive(Debug, Clone, PartialEq)]
pub struct Wall {
    core: EntityCore,
    faces: Directions,
    layers: BlockingLayers,
}

impl Wall {
    /// A wall on the static layer. `faces` are relative to the facing.
    pub fn new(name: impl Into<String>, coordinate: Coordinate, faces: Directions) -> Self {
        Self {
            core: EntityCore::new(name, coordinate, EntityFlags::empty()),
            faces,
            layers: BlockingLayers::STATIC,
        }
    }

    pub fn with_layers(mut self, layers: BlockingLayers) -> Self {
        self.layers = layers;
        self
    }

    pub fn faces(&self) -> Directions {
        self.faces
    }
}

impl BlocksMovement for Wall {
    fn blocked_directions(&self) -> Directions {
        self.faces
    }

    fn blocking_layers(&self) -> BlockingLayers {
        self.layers
    }
}

impl Entity for Wall {
    fn core(&self) -> &EntityCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }

    fn blocks_movement(&self) -> Option<&dyn BlocksMovement> {
        Some(self)
    }
}

/// Blocks its front face on the static layer while closed.
#[derive(Debug, Clone, PartialEq)]
pub struct Door {
    core: EntityCore,
    open: bool,
}

impl Door {
    pub fn new(name: impl Into<String>, coordinate: Coordinate) -> Self {
        Self {
            core: EntityCore::new(name, coordinate, EntityFlags::MAY_CHANGE_STATE),
            open: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn set_open(&mut self, open: bool) {
        self.open = open;
    }
}

impl BlocksMovement for Door {
    fn blocked_directions(&self) -> Directions {
        Directions::NORTH
    }

    fn blocking_layers(&self) -> BlockingLayers {
        BlockingLayers::STATIC
    }
}

impl Entity for Door {
    fn core(&self) -> &EntityCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }

    fn blocks_movement(&self) -> Option<&dyn BlocksMovement> {
        if self.open { None } else { Some(self) }
    }
}

/// A mobile creature occupying its whole voxel on the mobile layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    core: EntityCore,
    anchor: bool,
    frozen: bool,
    /// Actors that repeat every step this actor takes.
    followers: Vec<EntityId>,
}

impl Actor {
    pub fn new(name: impl Into<String>, coordinate: Coordinate) -> Self {
        Self {
            core: EntityCore::new(
                name,
                coordinate,
                EntityFlags::MOBILE | EntityFlags::MAY_DESTROY,
            ),
            anchor: false,
            frozen: false,
            followers: Vec::new(),
        }
    }

    /// The actor the pathing index tracks.
    pub fn player(name: impl Into<String>, coordinate: Coordinate) -> Self {
        Self {
            anchor: true,
            ..Self::new(name, coordinate)
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// A frozen actor vetoes every command addressed to it.
    pub fn set_frozen(&mut self, frozen: bool) {
        self.frozen = frozen;
    }

    pub fn with_followers(mut self, followers: Vec<EntityId>) -> Self {
        self.followers = followers;
        self
    }

    pub fn followers(&self) -> &[EntityId] {
        &self.followers
    }
}

impl BlocksMovement for Actor {
    fn blocked_directions(&self) -> Directions {
        Directions::all()
    }

    fn blocking_layers(&self) -> BlockingLayers {
        BlockingLayers::MOBILE
    }
}

impl VetoesOwnCommands for Actor {
    fn vetoes(&self, id: EntityId, _command: &dyn Command, _view: &dyn EntityView) -> bool {
        if self.frozen {
            tracing::debug!(%id, "frozen actor vetoed command");
        }
        self.frozen
    }
}

impl RespondsToCommands for Actor {
    fn respond(&self, _id: EntityId, command: &dyn Command, view: &dyn EntityView) -> Vec<CommandRef> {
        let Some(step) = command.downcast_ref::<crate::commands::Move>() else {
            return Vec::new();
        };
        self.followers
            .iter()
            .filter(|f| view.get(**f).is_some())
            .map(|f| step.for_actor(*f))
            .collect()
    }
}

impl Entity for Actor {
    fn core(&self) -> &EntityCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }

    fn blocks_movement(&self) -> Option<&dyn BlocksMovement> {
        Some(self)
    }

    fn is_pathing_anchor(&self) -> bool {
        self.anchor
    }

    fn vetoes_commands(&self) -> Option<&dyn VetoesOwnCommands> {
        Some(self)
    }

    fn responds_to_commands(&self) -> Option<&dyn RespondsToCommands> {
        (!self.followers.is_empty()).then_some(self as &dyn RespondsToCommands)
    }
}

/// Static, non-blocking scenery.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    core: EntityCore,
}

impl Marker {
    pub fn new(name: impl Into<String>, coordinate: Coordinate) -> Self {
        Self {
            core: EntityCore::new(name, coordinate, EntityFlags::empty()),
        }
    }
}

impl Entity for Marker {
    fn core(&self) -> &EntityCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }
}

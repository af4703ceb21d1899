use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Independent blocking categories tracked per voxel.
    ///
    /// `STATIC` and `MOBILE` are reserved; the remaining 14 bits are free
    /// for game-defined layers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct BlockingLayers: u16 {
        const STATIC = 1 << 0;
        const MOBILE = 1 << 1;
        const USER_0 = 1 << 2;
        const USER_1 = 1 << 3;
        const USER_2 = 1 << 4;
        const USER_3 = 1 << 5;
        const USER_4 = 1 << 6;
        const USER_5 = 1 << 7;
        const USER_6 = 1 << 8;
        const USER_7 = 1 << 9;
        const USER_8 = 1 << 10;
        const USER_9 = 1 << 11;
        const USER_10 = 1 << 12;
        const USER_11 = 1 << 13;
        const USER_12 = 1 << 14;
        const USER_13 = 1 << 15;
    }
}

impl BlockingLayers {
    /// Number of distinct layer slots.
    pub const COUNT: usize = 16;

    /// Game-defined layer `n` (0..14).
    pub fn user(n: u8) -> Option<Self> {
        (n < 14).then(|| Self::from_bits_retain(Self::USER_0.bits() << n))
    }

    /// Slot indices (0..16) of every layer in this mask.
    pub fn slots(self) -> impl Iterator<Item = usize> {
        let bits = self.bits();
        (0..Self::COUNT).filter(move |i| bits & (1 << i) != 0)
    }
}

impl Default for BlockingLayers {
    fn default() -> Self {
        Self::empty()
    }
}

bitflags! {
    /// Behavioural flags of an entity. An entity with no flags is static.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct EntityFlags: u8 {
        const MOBILE = 1 << 0;
        const MAY_DESTROY = 1 << 1;
        const MAY_CHANGE_STATE = 1 << 2;
    }
}

impl Default for EntityFlags {
    fn default() -> Self {
        Self::empty()
    }
}

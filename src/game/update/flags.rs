//! Bitsets carried inside replicated fields and message headers

use bitflags::bitflags;

bitflags! {
    /// Object type mask stored in `OBJECT_FIELD_TYPE`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ObjectTypeFlags: u32 {
        const OBJECT = 1 << 0;
        const ITEM = 1 << 1;
        const CONTAINER = 1 << 2;
        const UNIT = 1 << 3;
        const PLAYER = 1 << 4;
        const GAME_OBJECT = 1 << 5;
        const DYNAMIC_OBJECT = 1 << 6;
        const CORPSE = 1 << 7;
    }
}

bitflags! {
    /// Extra player flags, packed into the first byte of `PLAYER_BYTES_2`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PlayerFlags: u8 {
        const GROUP_LEADER = 1 << 0;
        const AFK = 1 << 1;
        const DND = 1 << 2;
        const GM = 1 << 3;
        const GHOST = 1 << 4;
        const RESTING = 1 << 5;
    }
}

bitflags! {
    /// Update message header flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MessageFlags: u8 {
        /// Recipient is the entity itself
        const SELF = 1 << 0;
    }
}

impl MessageFlags {
    pub fn is_self(&self) -> bool {
        self.contains(Self::SELF)
    }
}

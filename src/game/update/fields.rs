//! Field table
//!
//! Static schema for every replicable attribute. Each field lives in one of
//! three stacked blocks (object, unit, avatar) at a block-relative slot
//! offset, and carries a fixed numeric kind. Composite fields additionally
//! declare how their sub-values are packed into the 32-bit word, including
//! the byte order the client expects for that particular field.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use crate::error::SchemaError;
use crate::game::update::flags::ObjectTypeFlags;

/// Field block, in wire order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum FieldBlock {
    Object = 0,
    Unit = 1,
    Avatar = 2,
}

impl FieldBlock {
    /// All blocks in wire order
    pub const ALL: [FieldBlock; 3] = [FieldBlock::Object, FieldBlock::Unit, FieldBlock::Avatar];

    /// Wire tag for this block
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Convert from a wire tag
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Object),
            1 => Some(Self::Unit),
            2 => Some(Self::Avatar),
            _ => None,
        }
    }

    /// Number of 32-bit slots in this block
    pub fn slot_count(self) -> u16 {
        match self {
            FieldBlock::Object => OBJECT_END,
            FieldBlock::Unit => UNIT_END,
            FieldBlock::Avatar => AVATAR_END,
        }
    }

    /// Number of 32-bit mask words needed to cover every slot
    pub fn mask_words(self) -> usize {
        (self.slot_count() as usize).div_ceil(32)
    }

    pub fn name(self) -> &'static str {
        match self {
            FieldBlock::Object => "object",
            FieldBlock::Unit => "unit",
            FieldBlock::Avatar => "avatar",
        }
    }
}

impl fmt::Display for FieldBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Entity type, which decides the prefix of active blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    Object,
    Unit,
    Avatar,
}

impl EntityType {
    /// Active blocks for this entity type (always a prefix of `FieldBlock::ALL`)
    pub fn blocks(self) -> &'static [FieldBlock] {
        match self {
            EntityType::Object => &FieldBlock::ALL[..1],
            EntityType::Unit => &FieldBlock::ALL[..2],
            EntityType::Avatar => &FieldBlock::ALL[..],
        }
    }

    /// Check whether a block is active for this entity type
    pub fn has_block(self, block: FieldBlock) -> bool {
        self.blocks().contains(&block)
    }

    /// Type id carried in the update header
    pub fn type_id(self) -> u8 {
        match self {
            EntityType::Object => 0,
            EntityType::Unit => 3,
            EntityType::Avatar => 4,
        }
    }

    /// Convert from a header type id
    pub fn from_type_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Object),
            3 => Some(Self::Unit),
            4 => Some(Self::Avatar),
            _ => None,
        }
    }

    /// Value of `OBJECT_FIELD_TYPE` for this entity type
    pub fn type_flags(self) -> ObjectTypeFlags {
        match self {
            EntityType::Object => ObjectTypeFlags::OBJECT,
            EntityType::Unit => ObjectTypeFlags::OBJECT | ObjectTypeFlags::UNIT,
            EntityType::Avatar => {
                ObjectTypeFlags::OBJECT | ObjectTypeFlags::UNIT | ObjectTypeFlags::PLAYER
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EntityType::Object => "object",
            EntityType::Unit => "unit",
            EntityType::Avatar => "avatar",
        }
    }
}

/// Numeric kind of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    UInt32,
    Int32,
    /// Occupies two consecutive slots (low word first)
    UInt64,
    /// Raw IEEE-754 bit pattern
    Float32,
}

impl FieldKind {
    /// Width in bytes
    pub fn width(self) -> usize {
        self.slots() as usize * 4
    }

    /// Number of 32-bit slots (and mask bits)
    pub fn slots(self) -> u16 {
        match self {
            FieldKind::UInt64 => 2,
            _ => 1,
        }
    }
}

/// Byte order used to pack sub-values into a composite word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    Little,
    Big,
}

/// How a field's 32-bit value is assembled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Packing {
    /// Single scalar value
    Plain,
    /// Four 8-bit sub-values
    Bytes(ByteOrder),
    /// Two 16-bit sub-values
    Halves(ByteOrder),
}

impl Packing {
    pub fn is_composite(self) -> bool {
        !matches!(self, Packing::Plain)
    }

    /// Pack four bytes into a word, `None` unless this is a byte composite
    pub fn pack_bytes(self, parts: [u8; 4]) -> Option<u32> {
        match self {
            Packing::Bytes(ByteOrder::Little) => Some(u32::from_le_bytes(parts)),
            Packing::Bytes(ByteOrder::Big) => Some(u32::from_be_bytes(parts)),
            _ => None,
        }
    }

    /// Inverse of [`Packing::pack_bytes`]
    pub fn unpack_bytes(self, word: u32) -> Option<[u8; 4]> {
        match self {
            Packing::Bytes(ByteOrder::Little) => Some(word.to_le_bytes()),
            Packing::Bytes(ByteOrder::Big) => Some(word.to_be_bytes()),
            _ => None,
        }
    }

    /// Pack two 16-bit halves into a word, `None` unless this is a halves composite
    pub fn pack_halves(self, parts: [u16; 2]) -> Option<u32> {
        match self {
            Packing::Halves(ByteOrder::Little) => {
                Some(parts[0] as u32 | ((parts[1] as u32) << 16))
            }
            Packing::Halves(ByteOrder::Big) => Some(((parts[0] as u32) << 16) | parts[1] as u32),
            _ => None,
        }
    }

    /// Inverse of [`Packing::pack_halves`]
    pub fn unpack_halves(self, word: u32) -> Option<[u16; 2]> {
        let low = (word & 0xFFFF) as u16;
        let high = (word >> 16) as u16;
        match self {
            Packing::Halves(ByteOrder::Little) => Some([low, high]),
            Packing::Halves(ByteOrder::Big) => Some([high, low]),
            _ => None,
        }
    }
}

/// Identifier of one replicable attribute
///
/// Ordering is block first, then slot offset, which is the order values
/// appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId {
    block: FieldBlock,
    offset: u16,
}

impl FieldId {
    pub const fn new(block: FieldBlock, offset: u16) -> Self {
        Self { block, offset }
    }

    pub fn block(self) -> FieldBlock {
        self.block
    }

    /// Block-relative slot offset
    pub fn offset(self) -> u16 {
        self.offset
    }

    /// Element `index` of the id-offset sequence starting at this field
    ///
    /// Each element is an independent field with its own mask bit.
    pub fn nth(self, index: u16) -> Result<FieldId, SchemaError> {
        let def = FieldTable::global()
            .get(self)
            .ok_or(SchemaError::UnknownField(self))?;
        if def.index != 0 || index >= def.count {
            return Err(SchemaError::SequenceOutOfRange { field: self, index });
        }
        Ok(FieldId::new(self.block, self.offset + index * def.kind.slots()))
    }

    /// Schema definition for this field
    pub fn def(self) -> Option<&'static FieldDef> {
        FieldTable::global().get(self)
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.block, self.offset)
    }
}

pub const OBJECT_END: u16 = 6;
pub const UNIT_END: u16 = 57;
pub const AVATAR_END: u16 = 11;

/// Generic object fields
pub mod object_fields {
    use super::{FieldBlock, FieldId};

    const fn id(offset: u16) -> FieldId {
        FieldId::new(FieldBlock::Object, offset)
    }

    pub const GUID: FieldId = id(0);
    pub const TYPE: FieldId = id(2);
    pub const ENTRY: FieldId = id(3);
    pub const SCALE_X: FieldId = id(4);
    pub const PADDING: FieldId = id(5);
}

/// Animate unit fields
pub mod unit_fields {
    use super::{FieldBlock, FieldId};

    const fn id(offset: u16) -> FieldId {
        FieldId::new(FieldBlock::Unit, offset)
    }

    pub const CHANNEL_OBJECT: FieldId = id(0);
    pub const CHANNEL_SPELL: FieldId = id(2);
    pub const HEALTH: FieldId = id(3);
    /// Sequence of four, one per power type
    pub const POWERS: FieldId = id(4);
    pub const MAX_HEALTH: FieldId = id(8);
    /// Sequence of four, one per power type
    pub const MAX_POWERS: FieldId = id(9);
    pub const LEVEL: FieldId = id(13);
    pub const FACTION_TEMPLATE: FieldId = id(14);
    /// race, class, gender, power type
    pub const BYTES_0: FieldId = id(15);
    /// Sequence of five
    pub const STATS: FieldId = id(16);
    /// Sequence of five
    pub const BASE_STATS: FieldId = id(21);
    pub const FLAGS: FieldId = id(26);
    pub const COINAGE: FieldId = id(27);
    /// Sequence of two: main hand, off hand
    pub const BASE_ATTACK_TIME: FieldId = id(28);
    /// Sequence of six, one per school
    pub const RESISTANCES: FieldId = id(30);
    pub const BOUNDING_RADIUS: FieldId = id(36);
    pub const COMBAT_REACH: FieldId = id(37);
    pub const DISPLAY_ID: FieldId = id(38);
    pub const MOUNT_DISPLAY_ID: FieldId = id(39);
    /// Sequence of six, one per school
    pub const RESISTANCE_BUFF_MODS_POSITIVE: FieldId = id(40);
    /// Sequence of six, one per school
    pub const RESISTANCE_BUFF_MODS_NEGATIVE: FieldId = id(46);
    /// stand state, unused, shapeshift form, sheath state
    pub const BYTES_1: FieldId = id(52);
    pub const MOD_CAST_SPEED: FieldId = id(53);
    pub const DYNAMIC_FLAGS: FieldId = id(54);
    /// min damage, max damage (16/16)
    pub const DAMAGE: FieldId = id(55);
    /// combo points, unused x3
    pub const BYTES_2: FieldId = id(56);
}

/// Avatar-specific fields
pub mod avatar_fields {
    use super::{FieldBlock, FieldId};

    const fn id(offset: u16) -> FieldId {
        FieldId::new(FieldBlock::Avatar, offset)
    }

    pub const NUM_INV_SLOTS: FieldId = id(0);
    /// skin, face, hair style, hair colour
    pub const BYTES: FieldId = id(1);
    pub const XP: FieldId = id(2);
    pub const NEXT_LEVEL_XP: FieldId = id(3);
    /// extra flags, bank slots, facial hair, unused (big-endian)
    pub const BYTES_2: FieldId = id(4);
    pub const CHARACTER_POINTS1: FieldId = id(5);
    pub const CHARACTER_POINTS2: FieldId = id(6);
    pub const BLOCK_PERCENTAGE: FieldId = id(7);
    pub const DODGE_PERCENTAGE: FieldId = id(8);
    pub const PARRY_PERCENTAGE: FieldId = id(9);
    pub const BASE_MANA: FieldId = id(10);
}

/// Schema entry for one field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub id: FieldId,
    pub name: &'static str,
    pub kind: FieldKind,
    pub packing: Packing,
    /// Position within an id-offset sequence (0 for the base or a singleton)
    pub index: u16,
    /// Length of the sequence this field belongs to (1 for a singleton)
    pub count: u16,
}

struct FieldSpec {
    name: &'static str,
    id: FieldId,
    kind: FieldKind,
    packing: Packing,
    count: u16,
}

impl FieldSpec {
    const fn plain(name: &'static str, id: FieldId, kind: FieldKind) -> Self {
        Self {
            name,
            id,
            kind,
            packing: Packing::Plain,
            count: 1,
        }
    }

    const fn sequence(name: &'static str, id: FieldId, kind: FieldKind, count: u16) -> Self {
        Self {
            name,
            id,
            kind,
            packing: Packing::Plain,
            count,
        }
    }

    const fn packed(name: &'static str, id: FieldId, packing: Packing) -> Self {
        Self {
            name,
            id,
            kind: FieldKind::UInt32,
            packing,
            count: 1,
        }
    }
}

fn layout() -> Vec<FieldSpec> {
    use FieldKind::{Float32, Int32, UInt32, UInt64};

    vec![
        FieldSpec::plain("OBJECT_FIELD_GUID", object_fields::GUID, UInt64),
        FieldSpec::plain("OBJECT_FIELD_TYPE", object_fields::TYPE, UInt32),
        FieldSpec::plain("OBJECT_FIELD_ENTRY", object_fields::ENTRY, UInt32),
        FieldSpec::plain("OBJECT_FIELD_SCALE_X", object_fields::SCALE_X, Float32),
        FieldSpec::plain("OBJECT_FIELD_PADDING", object_fields::PADDING, UInt32),
        FieldSpec::plain("UNIT_FIELD_CHANNEL_OBJECT", unit_fields::CHANNEL_OBJECT, UInt64),
        FieldSpec::plain("UNIT_CHANNEL_SPELL", unit_fields::CHANNEL_SPELL, UInt32),
        FieldSpec::plain("UNIT_FIELD_HEALTH", unit_fields::HEALTH, UInt32),
        FieldSpec::sequence("UNIT_FIELD_POWER", unit_fields::POWERS, UInt32, 4),
        FieldSpec::plain("UNIT_FIELD_MAXHEALTH", unit_fields::MAX_HEALTH, UInt32),
        FieldSpec::sequence("UNIT_FIELD_MAXPOWER", unit_fields::MAX_POWERS, UInt32, 4),
        FieldSpec::plain("UNIT_FIELD_LEVEL", unit_fields::LEVEL, UInt32),
        FieldSpec::plain("UNIT_FIELD_FACTIONTEMPLATE", unit_fields::FACTION_TEMPLATE, UInt32),
        FieldSpec::packed(
            "UNIT_FIELD_BYTES_0",
            unit_fields::BYTES_0,
            Packing::Bytes(ByteOrder::Little),
        ),
        FieldSpec::sequence("UNIT_FIELD_STAT", unit_fields::STATS, UInt32, 5),
        FieldSpec::sequence("UNIT_FIELD_BASESTAT", unit_fields::BASE_STATS, UInt32, 5),
        FieldSpec::plain("UNIT_FIELD_FLAGS", unit_fields::FLAGS, UInt32),
        FieldSpec::plain("UNIT_FIELD_COINAGE", unit_fields::COINAGE, UInt32),
        FieldSpec::sequence(
            "UNIT_FIELD_BASEATTACKTIME",
            unit_fields::BASE_ATTACK_TIME,
            UInt32,
            2,
        ),
        FieldSpec::sequence("UNIT_FIELD_RESISTANCES", unit_fields::RESISTANCES, Int32, 6),
        FieldSpec::plain("UNIT_FIELD_BOUNDINGRADIUS", unit_fields::BOUNDING_RADIUS, Float32),
        FieldSpec::plain("UNIT_FIELD_COMBATREACH", unit_fields::COMBAT_REACH, Float32),
        FieldSpec::plain("UNIT_FIELD_DISPLAYID", unit_fields::DISPLAY_ID, UInt32),
        FieldSpec::plain("UNIT_FIELD_MOUNTDISPLAYID", unit_fields::MOUNT_DISPLAY_ID, UInt32),
        FieldSpec::sequence(
            "UNIT_FIELD_RESISTANCEBUFFMODSPOSITIVE",
            unit_fields::RESISTANCE_BUFF_MODS_POSITIVE,
            Int32,
            6,
        ),
        FieldSpec::sequence(
            "UNIT_FIELD_RESISTANCEBUFFMODSNEGATIVE",
            unit_fields::RESISTANCE_BUFF_MODS_NEGATIVE,
            Int32,
            6,
        ),
        FieldSpec::packed(
            "UNIT_FIELD_BYTES_1",
            unit_fields::BYTES_1,
            Packing::Bytes(ByteOrder::Little),
        ),
        FieldSpec::plain("UNIT_MOD_CAST_SPEED", unit_fields::MOD_CAST_SPEED, Float32),
        FieldSpec::plain("UNIT_DYNAMIC_FLAGS", unit_fields::DYNAMIC_FLAGS, UInt32),
        FieldSpec::packed(
            "UNIT_FIELD_DAMAGE",
            unit_fields::DAMAGE,
            Packing::Halves(ByteOrder::Little),
        ),
        FieldSpec::packed(
            "UNIT_FIELD_BYTES_2",
            unit_fields::BYTES_2,
            Packing::Bytes(ByteOrder::Little),
        ),
        FieldSpec::plain("PLAYER_FIELD_NUM_INV_SLOTS", avatar_fields::NUM_INV_SLOTS, UInt32),
        FieldSpec::packed(
            "PLAYER_BYTES",
            avatar_fields::BYTES,
            Packing::Bytes(ByteOrder::Little),
        ),
        FieldSpec::plain("PLAYER_XP", avatar_fields::XP, UInt32),
        FieldSpec::plain("PLAYER_NEXT_LEVEL_XP", avatar_fields::NEXT_LEVEL_XP, UInt32),
        FieldSpec::packed(
            "PLAYER_BYTES_2",
            avatar_fields::BYTES_2,
            Packing::Bytes(ByteOrder::Big),
        ),
        FieldSpec::plain(
            "PLAYER_CHARACTER_POINTS1",
            avatar_fields::CHARACTER_POINTS1,
            UInt32,
        ),
        FieldSpec::plain(
            "PLAYER_CHARACTER_POINTS2",
            avatar_fields::CHARACTER_POINTS2,
            UInt32,
        ),
        FieldSpec::plain(
            "PLAYER_BLOCK_PERCENTAGE",
            avatar_fields::BLOCK_PERCENTAGE,
            Float32,
        ),
        FieldSpec::plain(
            "PLAYER_DODGE_PERCENTAGE",
            avatar_fields::DODGE_PERCENTAGE,
            Float32,
        ),
        FieldSpec::plain(
            "PLAYER_PARRY_PERCENTAGE",
            avatar_fields::PARRY_PERCENTAGE,
            Float32,
        ),
        FieldSpec::plain("PLAYER_BASE_MANA", avatar_fields::BASE_MANA, UInt32),
    ]
}

/// The field schema, built once
#[derive(Debug)]
pub struct FieldTable {
    defs: BTreeMap<FieldId, FieldDef>,
    /// Slot -> owning field, per block (both slots of a 64-bit field map to it)
    slots: [Vec<Option<FieldId>>; 3],
}

static FIELD_TABLE: OnceLock<FieldTable> = OnceLock::new();

impl FieldTable {
    /// Get the process-wide field table
    pub fn global() -> &'static FieldTable {
        FIELD_TABLE.get_or_init(Self::build)
    }

    fn build() -> Self {
        let mut defs = BTreeMap::new();
        let mut slots = FieldBlock::ALL.map(|block| vec![None; block.slot_count() as usize]);

        for entry in layout() {
            let step = entry.kind.slots();
            for index in 0..entry.count {
                let id = FieldId::new(entry.id.block, entry.id.offset + index * step);
                let block_slots = &mut slots[id.block as usize];
                for slot in id.offset..id.offset + step {
                    debug_assert!(
                        block_slots[slot as usize].is_none(),
                        "overlapping field at {}",
                        id
                    );
                    block_slots[slot as usize] = Some(id);
                }
                defs.insert(
                    id,
                    FieldDef {
                        id,
                        name: entry.name,
                        kind: entry.kind,
                        packing: entry.packing,
                        index,
                        count: entry.count,
                    },
                );
            }
        }

        Self { defs, slots }
    }

    /// Look up a field definition
    pub fn get(&self, id: FieldId) -> Option<&FieldDef> {
        self.defs.get(&id)
    }

    /// Find the field that owns a slot
    pub fn lookup_slot(&self, block: FieldBlock, slot: u16) -> Option<&FieldDef> {
        self.slots[block as usize]
            .get(slot as usize)
            .copied()
            .flatten()
            .and_then(|id| self.defs.get(&id))
    }

    /// Every field active for an entity type, ascending
    pub fn active_fields(&self, entity_type: EntityType) -> impl Iterator<Item = &FieldDef> {
        self.defs
            .values()
            .filter(move |def| entity_type.has_block(def.id.block))
    }

    /// Total number of fields in the schema
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

/// A typed field value
///
/// Floats compare by bit pattern so that values round-trip exactly through
/// the encoder, including NaN payloads and negative zero.
#[derive(Debug, Clone, Copy)]
pub enum FieldValue {
    U32(u32),
    I32(i32),
    U64(u64),
    F32(f32),
}

impl FieldValue {
    pub fn kind(self) -> FieldKind {
        match self {
            FieldValue::U32(_) => FieldKind::UInt32,
            FieldValue::I32(_) => FieldKind::Int32,
            FieldValue::U64(_) => FieldKind::UInt64,
            FieldValue::F32(_) => FieldKind::Float32,
        }
    }

    /// Zero value of a kind
    pub fn zero(kind: FieldKind) -> Self {
        match kind {
            FieldKind::UInt32 => FieldValue::U32(0),
            FieldKind::Int32 => FieldValue::I32(0),
            FieldKind::UInt64 => FieldValue::U64(0),
            FieldKind::Float32 => FieldValue::F32(0.0),
        }
    }

    /// Wire words, low word first for 64-bit values
    pub fn to_words(self) -> ([u32; 2], usize) {
        match self {
            FieldValue::U32(v) => ([v, 0], 1),
            FieldValue::I32(v) => ([v as u32, 0], 1),
            FieldValue::U64(v) => ([v as u32, (v >> 32) as u32], 2),
            FieldValue::F32(v) => ([v.to_bits(), 0], 1),
        }
    }

    /// Rebuild a value of `kind` from its wire words
    pub fn from_words(kind: FieldKind, low: u32, high: u32) -> Self {
        match kind {
            FieldKind::UInt32 => FieldValue::U32(low),
            FieldKind::Int32 => FieldValue::I32(low as i32),
            FieldKind::UInt64 => FieldValue::U64(low as u64 | ((high as u64) << 32)),
            FieldKind::Float32 => FieldValue::F32(f32::from_bits(low)),
        }
    }

    /// Low 32 bits as stored on the wire
    pub fn as_u32(self) -> u32 {
        self.to_words().0[0]
    }

    pub fn as_u64(self) -> Option<u64> {
        match self {
            FieldValue::U64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f32(self) -> Option<f32> {
        match self {
            FieldValue::F32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i32(self) -> Option<i32> {
        match self {
            FieldValue::I32(v) => Some(v),
            _ => None,
        }
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldValue::U32(a), FieldValue::U32(b)) => a == b,
            (FieldValue::I32(a), FieldValue::I32(b)) => a == b,
            (FieldValue::U64(a), FieldValue::U64(b)) => a == b,
            (FieldValue::F32(a), FieldValue::F32(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for FieldValue {}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::U32(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::I32(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::U64(v)
    }
}

impl From<f32> for FieldValue {
    fn from(v: f32) -> Self {
        FieldValue::F32(v)
    }
}

//! Update encoder
//!
//! Serializes field values into update messages. Each message carries a
//! small header followed by one section per included block:
//!
//! ```text
//! u8   update kind (0 partial, 2 full)
//! u8   message flags
//! u64  entity guid
//! u8   type id
//! u8   block count
//! per block:
//!   u8   block tag
//!   u8   mask word count
//!   u32  mask words
//!   u32  value words, ascending slot order
//! ```
//!
//! All multi-byte quantities are little-endian. 64-bit fields take two
//! consecutive mask bits and are written low word first.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::error::EncodeError;
use crate::game::update::fields::{
    EntityType, FieldBlock, FieldId, FieldKind, FieldTable, FieldValue,
};
use crate::game::update::flags::MessageFlags;
use crate::game::update::store::{FieldSnapshot, FieldStore};
use crate::net::buffer::PacketBuffer;

/// Fixed header length in bytes
pub const HEADER_LEN: usize = 12;

/// Update message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UpdateKind {
    /// Changed fields only
    Partial = 0,
    /// Every active field
    Full = 2,
}

impl UpdateKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Partial),
            2 => Some(Self::Full),
            _ => None,
        }
    }
}

/// An encoded update message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateMessage {
    pub kind: UpdateKind,
    pub guid: u64,
    bytes: Bytes,
}

impl UpdateMessage {
    fn empty(kind: UpdateKind, guid: u64) -> Self {
        Self {
            kind,
            guid,
            bytes: Bytes::new(),
        }
    }

    /// An empty message carries nothing and should not be sent
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

/// Encode every active field and clear the dirty set
pub fn encode_full(store: &mut FieldStore, flags: MessageFlags) -> UpdateMessage {
    let message = encode_fields(
        store.entity_type(),
        store.guid(),
        UpdateKind::Full,
        flags,
        store.iter(),
    );
    store.mark_clean();
    message
}

/// Encode only the fields written since the last update
///
/// Returns an empty message if nothing changed.
pub fn encode_partial(store: &mut FieldStore) -> UpdateMessage {
    let dirty = store.drain_dirty();
    if dirty.is_empty() {
        return UpdateMessage::empty(UpdateKind::Partial, store.guid());
    }

    let values: Vec<(FieldId, FieldValue)> = dirty
        .into_iter()
        .filter_map(|id| store.get(id).map(|value| (id, value)))
        .collect();

    encode_fields(
        store.entity_type(),
        store.guid(),
        UpdateKind::Partial,
        MessageFlags::empty(),
        values.into_iter(),
    )
}

/// Full encode of a published snapshot
pub fn encode_snapshot(snapshot: &FieldSnapshot, flags: MessageFlags) -> UpdateMessage {
    encode_fields(
        snapshot.entity_type(),
        snapshot.guid(),
        UpdateKind::Full,
        flags,
        snapshot.iter(),
    )
}

/// Per-block accumulator for mask bits and value words
struct BlockSection {
    mask: Vec<u32>,
    values: Vec<u32>,
}

impl BlockSection {
    fn new(block: FieldBlock) -> Self {
        Self {
            mask: vec![0; block.mask_words()],
            values: Vec::new(),
        }
    }

    fn push(&mut self, id: FieldId, value: FieldValue) {
        let (words, count) = value.to_words();
        for (i, word) in words.iter().take(count).enumerate() {
            let slot = id.offset() as usize + i;
            self.mask[slot / 32] |= 1 << (slot % 32);
            self.values.push(*word);
        }
    }

    fn write(&self, block: FieldBlock, buf: &mut PacketBuffer) {
        buf.write_ubyte(block.tag());
        buf.write_ubyte(self.mask.len() as u8);
        for word in &self.mask {
            buf.write_uint_le(*word);
        }
        for word in &self.values {
            buf.write_uint_le(*word);
        }
    }
}

/// Encode an ascending sequence of (id, value) pairs
///
/// Full messages emit a section for every active block; partial messages
/// omit blocks with no included field.
pub fn encode_fields(
    entity_type: EntityType,
    guid: u64,
    kind: UpdateKind,
    flags: MessageFlags,
    fields: impl Iterator<Item = (FieldId, FieldValue)>,
) -> UpdateMessage {
    let mut sections: BTreeMap<FieldBlock, BlockSection> = BTreeMap::new();
    if kind == UpdateKind::Full {
        for block in entity_type.blocks() {
            sections.insert(*block, BlockSection::new(*block));
        }
    }

    for (id, value) in fields {
        sections
            .entry(id.block())
            .or_insert_with(|| BlockSection::new(id.block()))
            .push(id, value);
    }

    if sections.is_empty() {
        return UpdateMessage::empty(kind, guid);
    }

    let body_len: usize = sections
        .values()
        .map(|s| 2 + 4 * (s.mask.len() + s.values.len()))
        .sum();
    let mut buf = PacketBuffer::with_capacity(HEADER_LEN + body_len);

    buf.write_ubyte(kind as u8);
    buf.write_ubyte(flags.bits());
    buf.write_ulong_le(guid);
    buf.write_ubyte(entity_type.type_id());
    buf.write_ubyte(sections.len() as u8);

    for (block, section) in &sections {
        section.write(*block, &mut buf);
    }

    UpdateMessage {
        kind,
        guid,
        bytes: buf.freeze(),
    }
}

/// A decoded update message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedUpdate {
    pub kind: UpdateKind,
    pub flags: MessageFlags,
    pub guid: u64,
    pub entity_type: EntityType,
    pub values: BTreeMap<FieldId, FieldValue>,
}

fn require(buf: &PacketBuffer, count: usize, what: &str) -> Result<(), EncodeError> {
    if buf.remaining() < count {
        return Err(EncodeError::Malformed(format!(
            "truncated {} (need {} bytes, have {})",
            what,
            count,
            buf.remaining()
        )));
    }
    Ok(())
}

/// Decode an update message body
pub fn decode(bytes: &[u8]) -> Result<DecodedUpdate, EncodeError> {
    let table = FieldTable::global();
    let mut buf = PacketBuffer::from_bytes(bytes);

    require(&buf, HEADER_LEN, "header")?;
    let raw_kind = buf.read_ubyte();
    let kind = UpdateKind::from_u8(raw_kind)
        .ok_or_else(|| EncodeError::Malformed(format!("unknown update kind {}", raw_kind)))?;
    let flags = MessageFlags::from_bits_truncate(buf.read_ubyte());
    let guid = buf.read_ulong_le();
    let raw_type = buf.read_ubyte();
    let entity_type = EntityType::from_type_id(raw_type)
        .ok_or_else(|| EncodeError::Malformed(format!("unknown type id {}", raw_type)))?;
    let block_count = buf.read_ubyte();

    let mut values = BTreeMap::new();
    let mut previous: Option<FieldBlock> = None;

    for _ in 0..block_count {
        require(&buf, 2, "block header")?;
        let tag = buf.read_ubyte();
        let block = FieldBlock::from_tag(tag).ok_or(EncodeError::UnknownBlock(tag))?;
        if !entity_type.has_block(block) {
            return Err(EncodeError::Malformed(format!(
                "block {} is not active for {} entities",
                block,
                entity_type.name()
            )));
        }
        if previous.is_some_and(|p| p >= block) {
            return Err(EncodeError::Malformed(format!(
                "block {} out of order",
                block
            )));
        }
        previous = Some(block);

        let mask_words = buf.read_ubyte() as usize;
        if mask_words != block.mask_words() {
            return Err(EncodeError::Malformed(format!(
                "block {} has {} mask words, expected {}",
                block,
                mask_words,
                block.mask_words()
            )));
        }
        require(&buf, mask_words * 4, "mask")?;
        let mask: Vec<u32> = (0..mask_words).map(|_| buf.read_uint_le()).collect();

        let slots: Vec<u16> = mask
            .iter()
            .enumerate()
            .flat_map(|(w, word)| {
                (0..32u16)
                    .filter(move |bit| (*word & (1u32 << *bit)) != 0)
                    .map(move |bit| w as u16 * 32 + bit)
            })
            .collect();

        let mut i = 0;
        while i < slots.len() {
            let slot = slots[i];
            let def = table
                .lookup_slot(block, slot)
                .ok_or(EncodeError::UnknownSlot { block, slot })?;
            if def.id.offset() != slot {
                return Err(EncodeError::Malformed(format!(
                    "high word of {} without its low word",
                    def.id
                )));
            }

            if def.kind == FieldKind::UInt64 {
                if slots.get(i + 1) != Some(&(slot + 1)) {
                    return Err(EncodeError::Malformed(format!(
                        "low word of {} without its high word",
                        def.id
                    )));
                }
                require(&buf, 8, "value")?;
                let low = buf.read_uint_le();
                let high = buf.read_uint_le();
                values.insert(def.id, FieldValue::from_words(def.kind, low, high));
                i += 2;
            } else {
                require(&buf, 4, "value")?;
                values.insert(def.id, FieldValue::from_words(def.kind, buf.read_uint_le(), 0));
                i += 1;
            }
        }
    }

    if buf.has_remaining() {
        return Err(EncodeError::Malformed(format!(
            "{} trailing bytes",
            buf.remaining()
        )));
    }

    Ok(DecodedUpdate {
        kind,
        flags,
        guid,
        entity_type,
        values,
    })
}

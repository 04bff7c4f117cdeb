//! Field update module
//!
//! Schema-driven field storage and the wire format replicated to clients:
//! - Field table, kinds and composite packing
//! - Per-entity field store with dirty tracking
//! - Full and partial update encoding
//! - Size-aware compression of encoded updates

pub mod compression;
pub mod encoder;
pub mod fields;
pub mod flags;
pub mod store;

pub use compression::{Compressor, Envelope};
pub use encoder::{decode, encode_full, encode_partial, UpdateKind, UpdateMessage};
pub use fields::{EntityType, FieldBlock, FieldId, FieldTable, FieldValue};
pub use flags::{MessageFlags, ObjectTypeFlags, PlayerFlags};
pub use store::{FieldSnapshot, FieldStore};

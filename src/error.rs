//! Error handling module
//!
//! Defines custom error types for the Realmsync replication core.

use std::io;

use thiserror::Error;

use crate::game::update::fields::{FieldBlock, FieldId, FieldKind};

/// Main error type for the Realmsync server
#[derive(Error, Debug)]
pub enum RealmsyncError {
    /// Field schema violations
    #[error("Schema violation: {0}")]
    Schema(#[from] SchemaError),

    /// Update message encoding errors
    #[error("Encoding error: {0}")]
    Encode(#[from] EncodeError),

    /// Transport hand-off errors
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// Replication driver errors
    #[error("Replication error: {0}")]
    Replication(#[from] ReplicationError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A value did not fit the declared width or kind of a field
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Unknown field {0}")]
    UnknownField(FieldId),

    #[error("Field {field} is not active for {entity_type} entities")]
    InactiveField {
        field: FieldId,
        entity_type: &'static str,
    },

    #[error("Field {field} expects {expected:?}, got {actual:?}")]
    KindMismatch {
        field: FieldId,
        expected: FieldKind,
        actual: FieldKind,
    },

    #[error("Value {value} overflows field {field} ({kind:?})")]
    Overflow {
        field: FieldId,
        kind: FieldKind,
        value: i64,
    },

    #[error("Field {0} is not a composite field")]
    NotComposite(FieldId),

    #[error("Field {field} sequence index {index} is out of range")]
    SequenceOutOfRange { field: FieldId, index: u16 },
}

/// Update message encoding and framing errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodeError {
    #[error("Encoded message is {size} bytes (max frame: {max})")]
    EncodingOverflow { size: usize, max: usize },

    #[error("Compression failed: {0}")]
    CompressionFailure(String),

    #[error("Decompression failed: {0}")]
    DecompressionFailure(String),

    #[error("Malformed update message: {0}")]
    Malformed(String),

    #[error("Unknown block tag {0}")]
    UnknownBlock(u8),

    #[error("Slot {slot} is not mapped in block {block:?}")]
    UnknownSlot { block: FieldBlock, slot: u16 },
}

/// Transport hand-off errors (fire-and-forget, never retried)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("No session for entity {0:#x}")]
    SessionNotFound(u64),

    #[error("Outbound queue full for entity {0:#x}")]
    QueueFull(u64),

    #[error("Connection closed for entity {0:#x}")]
    ConnectionClosed(u64),
}

/// Replication driver errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReplicationError {
    #[error("Invalid state transition from {from} during {operation}")]
    InvalidState {
        from: &'static str,
        operation: &'static str,
    },

    #[error("Relocation of {0:#x} interrupted by logout")]
    RelocationInterrupted(u64),

    #[error("No metadata for race {0}")]
    UnknownRace(u8),

    #[error("Unknown class {0}")]
    UnknownClass(u8),

    #[error("Unknown gender {0}")]
    UnknownGender(u8),

    #[error("Unknown power type {0}")]
    UnknownPowerType(u8),

    #[error("Map {0} cannot be encoded in a new-world message")]
    InvalidMap(u32),
}

/// Result type alias for Realmsync operations
pub type Result<T> = std::result::Result<T, RealmsyncError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::update::fields::unit_fields;

    #[test]
    fn test_error_display() {
        let err = DeliveryError::QueueFull(0x10);
        assert_eq!(err.to_string(), "Outbound queue full for entity 0x10");

        let err = EncodeError::EncodingOverflow {
            size: 70000,
            max: 65535,
        };
        assert_eq!(
            err.to_string(),
            "Encoded message is 70000 bytes (max frame: 65535)"
        );

        let err = ReplicationError::UnknownRace(42);
        assert_eq!(err.to_string(), "No metadata for race 42");
    }

    #[test]
    fn test_schema_error_names_field() {
        let err = SchemaError::Overflow {
            field: unit_fields::LEVEL,
            kind: FieldKind::UInt32,
            value: -1,
        };
        assert!(err.to_string().contains("unit[13]"));
    }

    #[test]
    fn test_conversion_into_top_level() {
        let err: RealmsyncError = DeliveryError::SessionNotFound(7).into();
        assert!(matches!(err, RealmsyncError::Delivery(_)));
    }
}

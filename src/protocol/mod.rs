//! Protocol module
//!
//! Opcodes, framing and the outgoing messages produced by replication.

pub mod packets;

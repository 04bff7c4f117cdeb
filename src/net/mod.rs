//! Networking module
//!
//! Outbound side of the transport:
//! - Byte buffers for packet encoding
//! - Per-entity session channels and the packet sink used by replication

pub mod buffer;
pub mod session;

//! Game module
//!
//! Avatar state and everything needed to replicate it:
//! - Field schema, field stores and update messages (`update`)
//! - Interest management and the per-avatar replication driver (`sync`)
//! - Spatial grid, race metadata and durable records
//! - The world that drives replication every tick

pub mod avatar;
pub mod grid;
pub mod metadata;
pub mod persistence;
pub mod sync;
pub mod update;
pub mod world;

/// Globally unique entity identifier
pub type Guid = u64;

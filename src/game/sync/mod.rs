//! Replication module
//!
//! Handles synchronization of avatar state to nearby clients.
//! This includes:
//! - Tracking which observers hold a baseline of which entity
//! - Publishing per-tick baselines for other avatars to read
//! - Driving each avatar through activation, ticks, teleports and logout

pub mod baseline;
pub mod interest;
pub mod replicator;

pub use baseline::{BaselineCache, PublishedState};
pub use interest::{InterestChange, InterestResolver};
pub use replicator::{
    AvatarReplicator, RelocationKind, ReplicationContext, ReplicationState, TickReport,
};

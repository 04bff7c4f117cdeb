//! Realmsync Server Library
//!
//! Avatar state replication: schema-driven field stores, full and partial
//! update encoding, compression, interest management and the per-avatar
//! replication driver.
//!
//! ## Modules
//!
//! - `config` - Server configuration management
//! - `error` - Error types and result definitions
//! - `game` - Avatar model, field updates, interest management and the world loop
//! - `net` - Byte buffers and outbound sessions
//! - `protocol` - Opcodes, framing and outgoing messages

pub mod config;
pub mod error;
pub mod game;
pub mod net;
pub mod protocol;
pub mod state;

// Re-export commonly used types
pub use config::ServerConfig;
pub use error::{RealmsyncError, Result};
pub use state::AppState;

/// Server version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Application state module
//!
//! Wires the replication collaborators together from the server configuration.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::{RealmsyncError, Result};
use crate::game::grid::CellGrid;
use crate::game::metadata::RaceTable;
use crate::game::persistence::{AvatarStore, MemoryAvatarStore};
use crate::game::sync::baseline::BaselineCache;
use crate::game::sync::interest::InterestResolver;
use crate::game::sync::replicator::ReplicationContext;
use crate::game::update::compression::Compressor;
use crate::game::world::{ReplicationWorld, WorldSettings};
use crate::net::session::SessionRegistry;

/// Application state shared across the server
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// Outbound sessions keyed by avatar guid
    pub sessions: Arc<SessionRegistry>,
    /// Replication world
    pub world: Arc<ReplicationWorld>,
    /// Durable avatar storage
    pub store: Arc<dyn AvatarStore>,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    /// Create a new application state backed by in-memory storage
    pub fn new(config: ServerConfig, shutdown_tx: broadcast::Sender<()>) -> Result<Self> {
        Self::with_store(config, shutdown_tx, Arc::new(MemoryAvatarStore::new()))
    }

    /// Create a new application state with a custom avatar store
    pub fn with_store(
        config: ServerConfig,
        shutdown_tx: broadcast::Sender<()>,
        store: Arc<dyn AvatarStore>,
    ) -> Result<Self> {
        let races = Self::load_races(&config)?;
        info!(races = races.len(), "Race metadata loaded");

        let grid = CellGrid::new(config.cell_size);
        let radius = grid.radius_for(config.view_distance);
        info!(
            cell_size = config.cell_size,
            view_distance = config.view_distance,
            radius_cells = radius,
            "Configuring interest management"
        );

        let sessions = Arc::new(SessionRegistry::new(config.outbound_queue_capacity));
        let ctx = ReplicationContext {
            resolver: Arc::new(InterestResolver::new(Arc::new(grid), radius)),
            sessions: Arc::clone(&sessions),
            baselines: Arc::new(BaselineCache::new()),
            metadata: Arc::new(races),
            store: Arc::clone(&store),
            compressor: Compressor::new(config.compression_threshold, config.max_frame_size),
            continent_maps: config.continent_maps.clone(),
        };

        let settings = Self::create_world_settings(&config);
        let world = Arc::new(ReplicationWorld::new(settings, Arc::new(ctx)));

        Ok(Self {
            config,
            sessions,
            world,
            store,
            shutdown_tx,
        })
    }

    fn load_races(config: &ServerConfig) -> Result<RaceTable> {
        match &config.race_data_path {
            Some(path) if path.exists() => RaceTable::load(path)
                .map_err(|e| RealmsyncError::Config(format!("{:#}", e))),
            Some(path) => {
                warn!(
                    "Race data not found at {}, using built-in values",
                    path.display()
                );
                Ok(RaceTable::builtin())
            }
            None => Ok(RaceTable::builtin()),
        }
    }

    /// Create world settings from server config
    fn create_world_settings(config: &ServerConfig) -> WorldSettings {
        WorldSettings::default()
            .with_name(config.world_name.clone())
            .with_tick_rate(config.tick_rate_ms)
    }
}

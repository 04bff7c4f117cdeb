//! Server configuration module
//!
//! Handles loading and parsing of server configuration from files and environment variables.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::game::avatar::MapId;
use crate::game::update::compression::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_THRESHOLD};
use crate::net::session::DEFAULT_QUEUE_CAPACITY;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// World name used in logs
    #[serde(default = "default_world_name")]
    pub world_name: String,

    /// Replication tick rate in milliseconds
    #[serde(default = "default_tick_rate")]
    pub tick_rate_ms: u64,

    /// Interest range in world units
    #[serde(default = "default_view_distance")]
    pub view_distance: f32,

    /// Spatial grid cell edge in world units
    #[serde(default = "default_cell_size")]
    pub cell_size: f32,

    /// Encoded bodies larger than this are compressed
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: usize,

    /// Largest packet payload the transport accepts
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Outbound queue depth per session
    #[serde(default = "default_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Non-instanced maps, where same-map teleports skip the loading screen
    #[serde(default = "default_continent_maps")]
    pub continent_maps: Vec<MapId>,

    /// Optional TOML race table layered over the built-in values
    #[serde(default)]
    pub race_data_path: Option<PathBuf>,

    /// Enable debug logging
    #[serde(default)]
    pub debug: bool,

    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

// Default value functions
fn default_world_name() -> String {
    "Realmsync".to_string()
}

fn default_tick_rate() -> u64 {
    100
}

fn default_view_distance() -> f32 {
    100.0
}

fn default_cell_size() -> f32 {
    crate::game::grid::DEFAULT_CELL_SIZE
}

fn default_compression_threshold() -> usize {
    DEFAULT_THRESHOLD
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_continent_maps() -> Vec<MapId> {
    vec![0, 1]
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config/realmsync.toml"),
            world_name: default_world_name(),
            tick_rate_ms: default_tick_rate(),
            view_distance: default_view_distance(),
            cell_size: default_cell_size(),
            compression_threshold: default_compression_threshold(),
            max_frame_size: default_max_frame_size(),
            outbound_queue_capacity: default_queue_capacity(),
            continent_maps: default_continent_maps(),
            race_data_path: None,
            debug: false,
            log_format: default_log_format(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from file and environment variables
    pub async fn load() -> Result<Self> {
        let config_path = env::var("REALMSYNC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/realmsync.toml"));

        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| {
                    format!("Failed to read config file: {}", config_path.display())
                })?;

            Self::from_toml_str(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            tracing::warn!(
                "Config file not found at {}, using defaults",
                config_path.display()
            );
            Self::default()
        };

        config.config_path = config_path;

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("REALMSYNC_WORLD_NAME") {
            self.world_name = val;
        }
        if let Ok(val) = env::var("REALMSYNC_TICK_RATE_MS") {
            if let Ok(rate) = val.parse() {
                self.tick_rate_ms = rate;
            }
        }
        if let Ok(val) = env::var("REALMSYNC_VIEW_DISTANCE") {
            if let Ok(distance) = val.parse() {
                self.view_distance = distance;
            }
        }
        if let Ok(val) = env::var("REALMSYNC_CELL_SIZE") {
            if let Ok(size) = val.parse() {
                self.cell_size = size;
            }
        }
        if let Ok(val) = env::var("REALMSYNC_COMPRESSION_THRESHOLD") {
            if let Ok(threshold) = val.parse() {
                self.compression_threshold = threshold;
            }
        }
        if let Ok(val) = env::var("REALMSYNC_MAX_FRAME_SIZE") {
            if let Ok(size) = val.parse() {
                self.max_frame_size = size;
            }
        }
        if let Ok(val) = env::var("REALMSYNC_OUTBOUND_QUEUE_CAPACITY") {
            if let Ok(capacity) = val.parse() {
                self.outbound_queue_capacity = capacity;
            }
        }
        if let Ok(val) = env::var("REALMSYNC_CONTINENT_MAPS") {
            let maps: std::result::Result<Vec<MapId>, _> =
                val.split(',').map(|m| m.trim().parse()).collect();
            if let Ok(maps) = maps {
                self.continent_maps = maps;
            }
        }
        if let Ok(val) = env::var("REALMSYNC_RACE_DATA_PATH") {
            self.race_data_path = Some(PathBuf::from(val));
        }
        if let Ok(val) = env::var("REALMSYNC_DEBUG") {
            self.debug = val.to_lowercase() == "true" || val == "1";
        }
        if let Ok(val) = env::var("REALMSYNC_LOG_FORMAT") {
            self.log_format = val;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.tick_rate_ms < 10 || self.tick_rate_ms > 5000 {
            anyhow::bail!("Tick rate must be between 10ms and 5000ms");
        }

        if self.cell_size.is_nan() || self.cell_size <= 0.0 {
            anyhow::bail!("Cell size must be positive");
        }
        if self.view_distance.is_nan() || self.view_distance < 0.0 {
            anyhow::bail!("View distance must not be negative");
        }

        if self.max_frame_size == 0 || self.max_frame_size > DEFAULT_MAX_FRAME_SIZE {
            anyhow::bail!(
                "Max frame size must be between 1 and {} bytes",
                DEFAULT_MAX_FRAME_SIZE
            );
        }
        if self.compression_threshold >= self.max_frame_size {
            anyhow::bail!("Compression threshold must be below the max frame size");
        }

        if self.outbound_queue_capacity == 0 {
            anyhow::bail!("Outbound queue capacity must be at least 1");
        }

        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            anyhow::bail!("Log format must be 'pretty' or 'json'");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.world_name, "Realmsync");
        assert_eq!(config.tick_rate_ms, 100);
        assert_eq!(config.compression_threshold, 100);
        assert_eq!(config.max_frame_size, 65533);
        assert_eq!(config.continent_maps, vec![0, 1]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = ServerConfig::from_toml_str(
            r#"
            world_name = "Test"
            view_distance = 120.0
            continent_maps = [0, 1, 530]
            "#,
        )
        .unwrap();
        assert_eq!(config.world_name, "Test");
        assert_eq!(config.continent_maps, vec![0, 1, 530]);
        assert_eq!(config.cell_size, 50.0);
        assert_eq!(config.view_distance, 120.0);
    }

    #[test]
    fn test_validation() {
        let mut config = ServerConfig::default();

        config.max_frame_size = 70000;
        assert!(config.validate().is_err());
        config.max_frame_size = DEFAULT_MAX_FRAME_SIZE;

        config.compression_threshold = DEFAULT_MAX_FRAME_SIZE;
        assert!(config.validate().is_err());
        config.compression_threshold = 100;

        config.cell_size = 0.0;
        assert!(config.validate().is_err());
        config.cell_size = 50.0;

        config.log_format = "xml".to_string();
        assert!(config.validate().is_err());
    }
}

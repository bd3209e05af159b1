//! Server configuration.
//!
//! Loaded from a TOML file; every field has a default, so a partial file (or
//! none at all) is fine.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use tessera_world::WorldConfig;
use tracing::{info, warn};

/// Configuration file name.
pub const CONFIG_FILE: &str = "tessera.toml";

/// Server configuration parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    // === Startup Settings ===
    /// Spawn point X in world pixels
    pub spawn_x: f32,
    /// Spawn point Y in world pixels
    pub spawn_y: f32,
    /// How long startup waits for the spawn area to generate, in seconds
    pub pregenerate_timeout_secs: u64,

    // === Logging ===
    /// Emit logs as JSON lines instead of human-readable text
    pub log_json: bool,

    // === World Settings ===
    /// World store and prefetch settings
    pub world: WorldConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            spawn_x: 0.0,
            spawn_y: 0.0,
            pregenerate_timeout_secs: 30,
            log_json: false,
            world: WorldConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a specific path.
    /// Returns default config if file doesn't exist or is invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();

        if !path.exists() {
            info!("Config file not found, using defaults");
            return Self::default();
        }

        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("Failed to read config file: {e}");
                return Self::default();
            },
        };

        match toml::from_str::<Self>(&contents) {
            Ok(mut config) => {
                config.validate();
                info!("Loaded config from {}", path.display());
                config
            },
            Err(e) => {
                warn!("Failed to parse config file: {e}");
                Self::default()
            },
        }
    }

    /// Save configuration to a specific path.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, contents)?;

        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Validate and clamp configuration values.
    pub fn validate(&mut self) {
        self.world.validate();
        self.pregenerate_timeout_secs = self.pregenerate_timeout_secs.clamp(1, 600);
        if !self.spawn_x.is_finite() {
            self.spawn_x = 0.0;
        }
        if !self.spawn_y.is_finite() {
            self.spawn_y = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.world.default_world_name, "defaultWorld");
        assert_eq!(config.world.prefetch.worker_threads, 4);
        assert_eq!(config.pregenerate_timeout_secs, 30);
        assert!(!config.log_json);
    }

    #[test]
    fn test_config_validation() {
        let mut config = ServerConfig::default();
        config.pregenerate_timeout_secs = 0;
        config.spawn_x = f32::NAN;
        config.world.prefetch.preload_radius = 100;

        config.validate();

        assert_eq!(config.pregenerate_timeout_secs, 1);
        assert_eq!(config.spawn_x, 0.0);
        assert_eq!(config.world.prefetch.preload_radius, 32);
    }

    #[test]
    fn test_config_save_load() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("nested").join(CONFIG_FILE);

        let mut config = ServerConfig::default();
        config.world.default_world_name = "archipelago".to_string();
        config.world.default_seed = -9;
        config.spawn_x = 640.0;
        config.log_json = true;

        config.save_to(&config_path).expect("Failed to save config");

        let loaded = ServerConfig::load_from(&config_path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_load_missing_file() {
        let config = ServerConfig::load_from("/nonexistent/path/tessera.toml");
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_config_load_invalid_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join(CONFIG_FILE);
        fs::write(&config_path, "world = 3").expect("write");
        assert_eq!(ServerConfig::load_from(&config_path), ServerConfig::default());
    }
}

//! World and prefetch configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tessera_common::{chunk_span_pixels, DEFAULT_TILE_SIZE};

/// World store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// World created and activated on first start
    pub default_world_name: String,
    /// Seed of the default world when it has to be created
    pub default_seed: i64,
    /// Tile edge length in pixels
    pub tile_size: u32,
    /// Root directory for on-disk worlds
    pub save_dir: PathBuf,
    /// Background chunk loading
    pub prefetch: PrefetchConfig,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            default_world_name: "defaultWorld".to_string(),
            default_seed: 12345,
            tile_size: DEFAULT_TILE_SIZE,
            save_dir: PathBuf::from("saves"),
            prefetch: PrefetchConfig::default(),
        }
    }
}

impl WorldConfig {
    /// Validates and clamps configuration values.
    pub fn validate(&mut self) {
        self.tile_size = self.tile_size.clamp(1, 1024);
        if self.default_world_name.trim().is_empty() {
            self.default_world_name = Self::default().default_world_name;
        }
        self.prefetch.validate();
    }

    /// Edge length of one chunk in pixels.
    #[must_use]
    pub fn chunk_span_pixels(&self) -> f32 {
        chunk_span_pixels(self.tile_size)
    }
}

/// Prefetcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Chebyshev radius, in chunks, that gets a fade state
    pub visible_radius: u32,
    /// Chebyshev radius, in chunks, kept resident around the player
    pub preload_radius: u32,
    /// Delay before a failed chunk is attempted again
    pub failure_cooldown_ms: u64,
    /// Number of loader threads
    pub worker_threads: usize,
    /// How long shutdown waits for running loads
    pub shutdown_grace_ms: u64,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            visible_radius: 2,
            preload_radius: 4,
            failure_cooldown_ms: 5000,
            worker_threads: 4,
            shutdown_grace_ms: 5000,
        }
    }
}

impl PrefetchConfig {
    /// Validates and clamps configuration values.
    ///
    /// The preload window always contains the visible window.
    pub fn validate(&mut self) {
        self.preload_radius = self.preload_radius.clamp(1, 32);
        self.visible_radius = self.visible_radius.min(self.preload_radius);
        self.worker_threads = self.worker_threads.clamp(1, 64);
        self.failure_cooldown_ms = self.failure_cooldown_ms.min(600_000);
        self.shutdown_grace_ms = self.shutdown_grace_ms.min(60_000);
    }

    /// Failure cooldown as a duration.
    #[must_use]
    pub const fn failure_cooldown(&self) -> Duration {
        Duration::from_millis(self.failure_cooldown_ms)
    }

    /// Shutdown grace period as a duration.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

//! Server lifecycle: bring the world up, keep the spawn area warm, shut down
//! cleanly.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tessera_common::PixelPos;
use tessera_world::{
    ChunkPersistence, ChunkPrefetcher, DiskPersistence, PlayerMove, PoolError, WorldError,
    WorldMetadata, WorldStore,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;

/// Errors that can occur while running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A world store operation failed.
    #[error("World error: {0}")]
    World(#[from] WorldError),

    /// The prefetch worker pool failed.
    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),

    /// The spawn area did not finish generating in time.
    #[error("Spawn area not ready after {0:?}")]
    PregenerateTimeout(Duration),
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// What happened during shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Dirty chunks written by the final save.
    pub chunks_saved: usize,
    /// Prefetch workers still busy when the grace period ran out.
    pub stragglers: usize,
    /// How long the server ran.
    pub uptime: Duration,
}

/// A running world server.
pub struct Server {
    config: ServerConfig,
    store: Arc<WorldStore>,
    prefetcher: ChunkPrefetcher,
    started: Instant,
}

impl Server {
    /// Starts a server that keeps worlds under `config.world.save_dir`.
    pub fn start(config: ServerConfig) -> ServerResult<Self> {
        let persistence = Arc::new(DiskPersistence::new(&config.world.save_dir));
        info!("Saving worlds to {}", config.world.save_dir.display());
        Self::with_persistence(config, persistence)
    }

    /// Starts a server over the given persistence backend and activates the
    /// default world.
    pub fn with_persistence(
        mut config: ServerConfig,
        persistence: Arc<dyn ChunkPersistence>,
    ) -> ServerResult<Self> {
        config.validate();

        let store = Arc::new(WorldStore::with_default_generation(
            config.world.clone(),
            persistence,
        ));
        let metadata = store.load_default_world()?;
        info!(
            "World '{}' active (seed {}, {} known players)",
            metadata.name,
            metadata.seed,
            metadata.players.len()
        );

        let prefetcher = ChunkPrefetcher::new(Arc::clone(&store))?;

        Ok(Self {
            config,
            store,
            prefetcher,
            started: Instant::now(),
        })
    }

    /// Returns the configuration the server runs with.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the world store.
    #[must_use]
    pub fn store(&self) -> &Arc<WorldStore> {
        &self.store
    }

    /// Returns the chunk prefetcher.
    #[must_use]
    pub fn prefetcher(&self) -> &ChunkPrefetcher {
        &self.prefetcher
    }

    /// Spawn point in world pixels.
    #[must_use]
    pub fn spawn_position(&self) -> PixelPos {
        PixelPos::new(self.config.spawn_x, self.config.spawn_y)
    }

    /// Metadata of the active world.
    #[must_use]
    pub fn world(&self) -> Option<WorldMetadata> {
        self.store.world_metadata()
    }

    /// Prefetches the preload window around the spawn point and blocks until
    /// it is resident. Returns the number of loads that were queued.
    pub fn pregenerate_spawn(&self) -> ServerResult<usize> {
        let spawn = self.spawn_position();
        let queued = self.prefetcher.update_player_position(spawn);
        let timeout = Duration::from_secs(self.config.pregenerate_timeout_secs);
        debug!("Waiting for {} spawn chunks", queued);

        if !self.prefetcher.wait_idle(timeout) {
            warn!(
                "Spawn area still loading after {:?} ({} in flight)",
                timeout,
                self.prefetcher.in_flight_count()
            );
            return Err(ServerError::PregenerateTimeout(timeout));
        }

        info!(
            "Spawn area around chunk {} ready ({} chunks resident)",
            spawn.to_chunk_coord(self.config.world.tile_size),
            self.store.resident_count()
        );
        Ok(queued)
    }

    /// Records a player movement and moves the prefetch window with it.
    pub fn handle_player_move(&self, event: PlayerMove) -> ServerResult<usize> {
        let position = event.position;
        self.store.record_player_move(event)?;
        Ok(self.prefetcher.update_player_position(position))
    }

    /// Stops prefetching and saves the active world.
    ///
    /// Workers that outlive the grace period are reported, not treated as
    /// fatal. A failed save is.
    pub fn shutdown(self) -> ServerResult<ShutdownReport> {
        info!("Shutting down");

        let stragglers = match self.prefetcher.shutdown() {
            Ok(()) => 0,
            Err(PoolError::Stragglers(count)) => count,
            Err(e) => {
                error!("Prefetcher shutdown failed: {}", e);
                return Err(e.into());
            },
        };

        let chunks_saved = match self.store.save_world() {
            Ok(saved) => saved,
            Err(WorldError::NoActiveWorld) => 0,
            Err(e) => {
                error!("Final save failed: {}", e);
                return Err(e.into());
            },
        };

        let report = ShutdownReport {
            chunks_saved,
            stragglers,
            uptime: self.started.elapsed(),
        };
        info!(
            "Shutdown complete: {} chunk(s) saved, {} straggler(s), up {:?}",
            report.chunks_saved, report.stragglers, report.uptime
        );
        Ok(report)
    }
}

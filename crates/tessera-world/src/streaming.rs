//! Background chunk prefetching around moving players.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use tessera_common::{ChunkCoord, PixelPos};
use tracing::{debug, info, warn};

use crate::config::PrefetchConfig;
use crate::pool::{PoolResult, TaskHandle, WorkerPool};
use crate::store::{LoadOutcome, WorldResult, WorldStore};

/// Fade value of a chunk that just entered the visible window.
pub const FADE_START: f32 = 0.0;

/// Fade value of a fully visible chunk.
pub const FADE_DONE: f32 = 1.0;

/// Handle to a prefetch load.
pub type LoadHandle = TaskHandle<WorldResult<LoadOutcome>>;

/// Result of asking the prefetcher to load one chunk.
#[derive(Debug)]
pub enum RequestOutcome {
    /// A load was queued.
    Submitted(LoadHandle),
    /// A load for this chunk is already running.
    InFlight,
    /// The chunk is already resident.
    AlreadyLoaded,
    /// The chunk failed recently and is waiting out its cooldown.
    CoolingDown,
    /// The worker pool refused the job.
    Rejected,
}

impl RequestOutcome {
    /// Returns true if a load was queued.
    #[must_use]
    pub const fn is_submitted(&self) -> bool {
        matches!(self, Self::Submitted(_))
    }
}

/// Bookkeeping shared between the prefetcher and its worker jobs.
#[derive(Debug)]
struct PrefetchState {
    store: Arc<WorldStore>,
    preloaded: DashSet<ChunkCoord>,
    in_flight: DashMap<ChunkCoord, Instant>,
    failures: DashMap<ChunkCoord, Instant>,
    fade_states: DashMap<ChunkCoord, f32>,
}

/// Clears a chunk's in-flight slot when its job ends, however it ends.
///
/// A job that unwinds before [`InFlightSlot::finish`] counts as a failure.
struct InFlightSlot {
    state: Arc<PrefetchState>,
    coord: ChunkCoord,
    finished: bool,
}

impl InFlightSlot {
    fn finish(mut self, result: &WorldResult<LoadOutcome>) {
        match result {
            Ok(outcome) => {
                self.state.preloaded.insert(self.coord);
                self.state.failures.remove(&self.coord);
                debug!("Prefetched chunk {} ({:?})", self.coord, outcome);
            },
            Err(e) => {
                self.state.failures.insert(self.coord, Instant::now());
                warn!("Prefetch of chunk {} failed: {}", self.coord, e);
            },
        }
        self.finished = true;
    }
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        if !self.finished {
            self.state.failures.insert(self.coord, Instant::now());
        }
        self.state.in_flight.remove(&self.coord);
    }
}

/// Keeps the chunks around a player resident ahead of need.
///
/// Position updates only dispatch work; loads run on the worker pool. A chunk
/// is never loaded twice concurrently, and a chunk whose load failed is left
/// alone until its cooldown has passed.
#[derive(Debug)]
pub struct ChunkPrefetcher {
    config: PrefetchConfig,
    tile_size: u32,
    state: Arc<PrefetchState>,
    pool: WorkerPool,
    center: Mutex<Option<ChunkCoord>>,
}

impl ChunkPrefetcher {
    /// Creates a prefetcher using the store's prefetch configuration.
    pub fn new(store: Arc<WorldStore>) -> PoolResult<Self> {
        let config = store.config().prefetch.clone();
        Self::with_config(store, config)
    }

    /// Creates a prefetcher with an explicit configuration.
    pub fn with_config(store: Arc<WorldStore>, mut config: PrefetchConfig) -> PoolResult<Self> {
        config.validate();
        let pool = WorkerPool::new("chunk-loader", config.worker_threads)?;
        info!(
            "Chunk prefetcher started: preload radius {}, visible radius {}, {} workers",
            config.preload_radius, config.visible_radius, config.worker_threads
        );
        Ok(Self {
            tile_size: store.config().tile_size,
            config,
            state: Arc::new(PrefetchState {
                store,
                preloaded: DashSet::new(),
                in_flight: DashMap::new(),
                failures: DashMap::new(),
                fade_states: DashMap::new(),
            }),
            pool,
            center: Mutex::new(None),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &PrefetchConfig {
        &self.config
    }

    /// Handles a player position update.
    ///
    /// Queues loads for the preload window nearest-first and gives every
    /// chunk in the visible window a fade state. Returns the number of loads
    /// queued.
    pub fn update_player_position(&self, position: PixelPos) -> usize {
        let center = position.to_chunk_coord(self.tile_size);

        let mut wanted: Vec<ChunkCoord> = center
            .square_window(self.config.preload_radius)
            .iter()
            .filter(|coord| !self.state.preloaded.contains(coord))
            .collect();
        wanted.sort_by_key(|coord| coord.distance_squared(center));

        let submitted = wanted
            .into_iter()
            .filter(|&coord| self.request_load(coord).is_submitted())
            .count();

        for coord in center.square_window(self.config.visible_radius).iter() {
            self.state.fade_states.entry(coord).or_insert(FADE_START);
        }

        let mut last = self.center.lock();
        if *last != Some(center) {
            debug!("Player entered chunk {}, {} loads queued", center, submitted);
            *last = Some(center);
        }
        submitted
    }

    /// Requests a background load of one chunk.
    pub fn request_load(&self, coord: ChunkCoord) -> RequestOutcome {
        if self.state.in_flight.contains_key(&coord) {
            return RequestOutcome::InFlight;
        }
        if self.state.store.is_loaded(coord) {
            self.state.preloaded.insert(coord);
            return RequestOutcome::AlreadyLoaded;
        }
        if self.in_cooldown(coord) {
            return RequestOutcome::CoolingDown;
        }

        match self.state.in_flight.entry(coord) {
            Entry::Occupied(_) => return RequestOutcome::InFlight,
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
            },
        }

        let slot = InFlightSlot {
            state: Arc::clone(&self.state),
            coord,
            finished: false,
        };
        let submitted = self.pool.submit(move || {
            let result = slot.state.store.load_or_generate(coord);
            slot.finish(&result);
            result
        });

        match submitted {
            Ok(handle) => RequestOutcome::Submitted(handle),
            Err(e) => {
                // The rejected job was dropped along with its slot.
                warn!("Could not queue load of chunk {}: {}", coord, e);
                RequestOutcome::Rejected
            },
        }
    }

    fn in_cooldown(&self, coord: ChunkCoord) -> bool {
        self.state
            .failures
            .get(&coord)
            .is_some_and(|failed_at| failed_at.elapsed() < self.config.failure_cooldown())
    }

    /// Returns true if the chunk finished a prefetch (or was found resident).
    #[must_use]
    pub fn is_preloaded(&self, coord: ChunkCoord) -> bool {
        self.state.preloaded.contains(&coord)
    }

    /// Returns true if a load for the chunk is running or queued.
    #[must_use]
    pub fn is_in_flight(&self, coord: ChunkCoord) -> bool {
        self.state.in_flight.contains_key(&coord)
    }

    /// Number of loads running or queued.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.state.in_flight.len()
    }

    /// When the chunk last failed to load, if it did.
    #[must_use]
    pub fn last_failure(&self, coord: ChunkCoord) -> Option<Instant> {
        self.state.failures.get(&coord).map(|at| *at)
    }

    /// Fade state of a visible chunk.
    #[must_use]
    pub fn fade_state(&self, coord: ChunkCoord) -> Option<f32> {
        self.state.fade_states.get(&coord).map(|v| *v)
    }

    /// Moves every fade state `step` closer to fully visible.
    pub fn advance_fades(&self, step: f32) {
        for mut fade in self.state.fade_states.iter_mut() {
            *fade = (*fade + step).min(FADE_DONE);
        }
    }

    /// Chunk the player was last seen in.
    #[must_use]
    pub fn center(&self) -> Option<ChunkCoord> {
        *self.center.lock()
    }

    /// Drops preload, failure and fade bookkeeping, e.g. after a world switch.
    pub fn forget_all(&self) {
        self.state.preloaded.clear();
        self.state.failures.clear();
        self.state.fade_states.clear();
        *self.center.lock() = None;
    }

    /// Blocks until no load is in flight or `timeout` elapses. Returns true if
    /// the prefetcher went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.state.in_flight.is_empty() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        true
    }

    /// Stops the worker pool, waiting up to the configured grace period.
    pub fn shutdown(&self) -> PoolResult<()> {
        let result = self.pool.shutdown(self.config.shutdown_grace());
        self.state.in_flight.clear();
        result
    }
}

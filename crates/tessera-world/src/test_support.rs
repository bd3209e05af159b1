//! Deterministic generators for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tessera_common::{ChunkCoord, CHUNK_SIZE};

use crate::chunk::{TileGrid, TileId};
use crate::generation::{Biome, ObjectFactory, TerrainGenerator};
use crate::object::WorldObject;

pub const WATER: TileId = 1;
pub const GRASS: TileId = 3;

/// Fills every chunk with one tile, counting and logging calls.
#[derive(Default)]
pub struct CountingTerrain {
    calls: AtomicUsize,
    log: Mutex<Vec<ChunkCoord>>,
    pub fill: TileId,
    pub size: usize,
    pub delay: Duration,
}

impl CountingTerrain {
    pub fn filled(fill: TileId) -> Self {
        Self {
            fill,
            size: CHUNK_SIZE,
            ..Self::default()
        }
    }

    /// Produces grids one row short, which never validate.
    pub fn broken() -> Self {
        Self {
            size: CHUNK_SIZE - 1,
            ..Self::filled(GRASS)
        }
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        Self { delay, ..self }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn generated(&self) -> Vec<ChunkCoord> {
        self.log.lock().clone()
    }
}

impl TerrainGenerator for CountingTerrain {
    fn generate_tiles(&self, _seed: i64, coord: ChunkCoord) -> TileGrid {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push(coord);
        thread::sleep(self.delay);
        vec![vec![self.fill; self.size]; self.size]
    }

    fn biome(&self, _seed: i64, _coord: ChunkCoord) -> Biome {
        Biome::Plains
    }

    fn is_tile_impassable(&self, tile: TileId) -> bool {
        tile == WATER
    }
}

/// Places the same objects in every chunk.
#[derive(Default)]
pub struct FixedObjects(pub Vec<WorldObject>);

impl ObjectFactory for FixedObjects {
    fn generate_objects(
        &self,
        _coord: ChunkCoord,
        _tiles: &[Vec<TileId>],
        _biome: Biome,
        _seed: i64,
    ) -> Vec<WorldObject> {
        self.0.clone()
    }
}

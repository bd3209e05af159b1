//! In-memory persistence backend.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use dashmap::DashMap;
use tessera_common::ChunkCoord;

use super::{ChunkPersistence, PersistenceError, PersistenceResult};
use crate::chunk::Chunk;
use crate::object::WorldObject;
use crate::state::WorldMetadata;

/// A chunk as held by the backend: encoded tiles plus objects.
#[derive(Debug, Clone)]
struct StoredChunk {
    tiles: Vec<u8>,
    objects: Vec<WorldObject>,
}

/// Volatile backend holding everything in concurrent maps.
///
/// Chunks are stored in encoded form and come back lazily materialized, the
/// same way they would from disk. Loads and saves can be made to fail, which
/// lets callers exercise their fallback paths.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    worlds: DashMap<String, WorldMetadata>,
    chunks: DashMap<(String, ChunkCoord), StoredChunk>,
    fail_chunk_loads: AtomicBool,
    fail_chunk_saves: AtomicBool,
    chunk_saves: AtomicUsize,
}

impl MemoryPersistence {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent chunk load fail (or succeed again).
    pub fn set_fail_chunk_loads(&self, fail: bool) {
        self.fail_chunk_loads.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent chunk save fail (or succeed again).
    pub fn set_fail_chunk_saves(&self, fail: bool) {
        self.fail_chunk_saves.store(fail, Ordering::SeqCst);
    }

    /// Total number of successful chunk saves.
    #[must_use]
    pub fn chunk_save_count(&self) -> usize {
        self.chunk_saves.load(Ordering::SeqCst)
    }

    /// Number of chunks stored for a world.
    #[must_use]
    pub fn stored_chunk_count(&self, world: &str) -> usize {
        self.chunks.iter().filter(|e| e.key().0 == world).count()
    }

    /// Returns true if a chunk is stored.
    #[must_use]
    pub fn has_chunk(&self, world: &str, coord: ChunkCoord) -> bool {
        self.chunks.contains_key(&(world.to_string(), coord))
    }

    /// Stores raw encoded tiles for a chunk, bypassing any checks.
    pub fn insert_raw_chunk(
        &self,
        world: &str,
        coord: ChunkCoord,
        tiles: Vec<u8>,
        objects: Vec<WorldObject>,
    ) {
        self.chunks
            .insert((world.to_string(), coord), StoredChunk { tiles, objects });
    }
}

impl ChunkPersistence for MemoryPersistence {
    fn load_world(&self, name: &str) -> PersistenceResult<Option<WorldMetadata>> {
        Ok(self.worlds.get(name).map(|entry| entry.value().clone()))
    }

    fn save_world(&self, metadata: &WorldMetadata) -> PersistenceResult<()> {
        self.worlds.insert(metadata.name.clone(), metadata.clone());
        Ok(())
    }

    fn world_exists(&self, name: &str) -> bool {
        self.worlds.contains_key(name)
    }

    fn delete_world(&self, name: &str) -> PersistenceResult<()> {
        self.worlds.remove(name);
        self.chunks.retain(|(world, _), _| world != name);
        Ok(())
    }

    fn load_chunk(&self, world: &str, coord: ChunkCoord) -> PersistenceResult<Option<Chunk>> {
        if self.fail_chunk_loads.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable(format!(
                "chunk load {coord} refused"
            )));
        }
        Ok(self
            .chunks
            .get(&(world.to_string(), coord))
            .map(|stored| {
                Chunk::from_encoded(coord, stored.tiles.clone(), Some(stored.objects.clone()))
            }))
    }

    fn save_chunk(&self, world: &str, chunk: &Chunk) -> PersistenceResult<()> {
        if self.fail_chunk_saves.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable(format!(
                "chunk save {} refused",
                chunk.coord()
            )));
        }
        let tiles = chunk
            .encoded_tiles()
            .ok_or(PersistenceError::MissingTiles(chunk.coord()))?
            .into_owned();
        self.chunks.insert(
            (world.to_string(), chunk.coord()),
            StoredChunk {
                tiles,
                objects: chunk.objects().to_vec(),
            },
        );
        self.chunk_saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete_chunk(&self, world: &str, coord: ChunkCoord) -> PersistenceResult<()> {
        self.chunks.remove(&(world.to_string(), coord));
        Ok(())
    }
}

//! The authoritative world store.
//!
//! [`WorldStore`] owns the active world, its resident chunks and the per-chunk
//! lock registry, and drives the load-or-generate pipeline.
//!
//! Lock order is per-chunk registry lock, then the world lock (held only for
//! map lookups and inserts), then the chunk's data lock. The world lock is
//! never held while acquiring a registry lock, and persistence or generation
//! only run while holding the relevant registry lock. Whole-world operations
//! (create, delete, load) hold the world write lock for their duration.

use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use dashmap::DashMap;
use parking_lot::RwLock;
use tessera_common::{ChunkCoord, ObjectId, ViewRect};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chunk::{check_dimensions, decode_tiles, Chunk, ChunkError, TileGrid, TileId};
use crate::config::WorldConfig;
use crate::generation::{
    GeneratorConfig, NoiseTerrainGenerator, ObjectFactory, ScatterObjectFactory,
    TerrainGenerator,
};
use crate::locks::ChunkLockRegistry;
use crate::object::{ObjectKind, ObjectUpdate, ParseObjectKindError, WorldObject};
use crate::persistence::{ChunkPersistence, PersistenceError};
use crate::state::{now_millis, PlayerMove, SharedChunk, WorldMetadata, WorldState};

/// World store errors.
#[derive(Debug, Error)]
pub enum WorldError {
    /// Generated content failed validation; the chunk was not installed
    #[error("Generation of chunk {coord} failed: {reason}")]
    GenerationFailed {
        /// Chunk coordinate
        coord: ChunkCoord,
        /// Validation failure
        reason: String,
    },
    /// Chunk content is structurally invalid
    #[error("Invalid chunk: {0}")]
    InvalidChunk(#[from] ChunkError),
    /// Operation needs an active world
    #[error("No active world")]
    NoActiveWorld,
    /// World name already taken
    #[error("World '{0}' already exists")]
    WorldAlreadyExists(String),
    /// World does not exist
    #[error("World '{0}' not found")]
    WorldNotFound(String),
    /// Active world changed while a chunk was being loaded
    #[error("Active world changed while loading chunk {0}")]
    WorldSwitched(ChunkCoord),
    /// Chunk is not resident
    #[error("Chunk {0} is not resident")]
    NotResident(ChunkCoord),
    /// Object update named an unknown kind
    #[error(transparent)]
    UnknownObjectKind(#[from] ParseObjectKindError),
    /// Two objects in one chunk share an ID
    #[error("Duplicate object ID {id} in chunk {coord}")]
    DuplicateObjectId {
        /// Chunk coordinate
        coord: ChunkCoord,
        /// Repeated ID
        id: ObjectId,
    },
    /// A collidable object sits on a tile that blocks movement
    #[error("Collidable object {id} on impassable tile {tile} at ({x},{y}) in chunk {coord}")]
    ObjectOnImpassableTile {
        /// Chunk coordinate
        coord: ChunkCoord,
        /// Object ID
        id: ObjectId,
        /// Local X
        x: i32,
        /// Local Y
        y: i32,
        /// Tile under the object
        tile: TileId,
    },
    /// Persistence backend failure
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Result type for world store operations.
pub type WorldResult<T> = Result<T, WorldError>;

/// How [`WorldStore::load_or_generate`] made a chunk resident.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The chunk was already resident; nothing was done.
    AlreadyResident,
    /// The chunk was loaded from persistence.
    Loaded,
    /// The chunk was generated (and persisted best-effort).
    Generated,
}

/// What [`WorldStore::apply_object_update`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// A new object was appended.
    Added,
    /// An existing object changed position.
    Moved,
    /// An object was removed.
    Removed,
    /// Removal of an unknown ID; the chunk is unchanged.
    RemoveIgnored,
    /// The owning chunk is not resident; the update was dropped.
    Dropped,
}

/// Single authoritative owner of the active world and its resident chunks.
pub struct WorldStore {
    config: WorldConfig,
    state: RwLock<WorldState>,
    locks: ChunkLockRegistry,
    loaded_worlds: DashMap<String, WorldMetadata>,
    persistence: Arc<dyn ChunkPersistence>,
    terrain: Arc<dyn TerrainGenerator>,
    objects: Arc<dyn ObjectFactory>,
    initialized: AtomicBool,
}

impl std::fmt::Debug for WorldStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldStore")
            .field("world", &self.active_world_name())
            .field("resident", &self.resident_count())
            .field("locks", &self.locks.len())
            .finish_non_exhaustive()
    }
}

impl WorldStore {
    /// Creates a store over the given collaborators. No world is active yet.
    pub fn new(
        config: WorldConfig,
        persistence: Arc<dyn ChunkPersistence>,
        terrain: Arc<dyn TerrainGenerator>,
        objects: Arc<dyn ObjectFactory>,
    ) -> Self {
        Self {
            config,
            state: RwLock::new(WorldState::default()),
            locks: ChunkLockRegistry::new(),
            loaded_worlds: DashMap::new(),
            persistence,
            terrain,
            objects,
            initialized: AtomicBool::new(false),
        }
    }

    /// Creates a store using the noise terrain generator and scatter objects.
    pub fn with_default_generation(
        config: WorldConfig,
        persistence: Arc<dyn ChunkPersistence>,
    ) -> Self {
        Self::new(
            config,
            persistence,
            Arc::new(NoiseTerrainGenerator::new(GeneratorConfig::default())),
            Arc::new(ScatterObjectFactory::default()),
        )
    }

    /// Returns the store configuration.
    #[must_use]
    pub const fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Makes sure the configured default world exists in persistence.
    ///
    /// Idempotent. Does not activate the world.
    pub fn initialize(&self) -> WorldResult<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let name = &self.config.default_world_name;
        let metadata = if let Some(metadata) = self.persistence.load_world(name)? {
            info!("Found existing world '{}' (seed {})", name, metadata.seed);
            metadata
        } else {
            let metadata = WorldMetadata::new(name.clone(), self.config.default_seed);
            self.persistence.save_world(&metadata)?;
            info!(
                "Created default world '{}' with seed {}",
                name, metadata.seed
            );
            metadata
        };
        self.loaded_worlds.insert(name.clone(), metadata);
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    /// Initializes and activates the configured default world.
    pub fn load_default_world(&self) -> WorldResult<WorldMetadata> {
        self.initialize()?;
        self.load_world(&self.config.default_world_name)
    }

    /// Makes a persisted world the active one.
    ///
    /// Dirty chunks of the previously active world are flushed before its
    /// chunks are dropped. Loading the already active world is a no-op.
    pub fn load_world(&self, name: &str) -> WorldResult<WorldMetadata> {
        let mut state = self.state.write();
        if let Some(active) = state.metadata.as_ref().filter(|m| m.name == name) {
            return Ok(active.clone());
        }

        let mut metadata = self
            .persistence
            .load_world(name)?
            .ok_or_else(|| WorldError::WorldNotFound(name.to_string()))?;
        metadata.last_played_at = now_millis();

        self.flush_previous(&state, name);
        state.activate(metadata.clone());
        self.loaded_worlds.insert(name.to_string(), metadata.clone());
        info!("Loaded world '{}' (seed {})", name, metadata.seed);
        Ok(metadata)
    }

    /// Creates a world and makes it active.
    ///
    /// Fails with [`WorldError::WorldAlreadyExists`] without any change if
    /// persistence already knows the name.
    pub fn create_world(&self, name: &str, seed: i64) -> WorldResult<WorldMetadata> {
        let mut state = self.state.write();
        if self.persistence.world_exists(name) {
            warn!("World '{}' already exists", name);
            return Err(WorldError::WorldAlreadyExists(name.to_string()));
        }

        let metadata = WorldMetadata::new(name, seed);
        self.persistence.save_world(&metadata)?;
        self.flush_previous(&state, name);
        state.activate(metadata.clone());
        self.loaded_worlds.insert(name.to_string(), metadata.clone());
        info!("Created world '{}' with seed {}", name, seed);
        Ok(metadata)
    }

    /// Deletes a world. If it was active, the store returns to having no
    /// active world.
    pub fn delete_world(&self, name: &str) -> WorldResult<()> {
        let mut state = self.state.write();
        if !self.persistence.world_exists(name) {
            warn!("Cannot delete world '{}': not found", name);
            return Err(WorldError::WorldNotFound(name.to_string()));
        }

        self.persistence.delete_world(name)?;
        if state.name() == Some(name) {
            state.reset();
        }
        self.loaded_worlds.remove(name);
        info!("Deleted world '{}'", name);
        Ok(())
    }

    /// Persists the active world's metadata and every dirty resident chunk.
    ///
    /// Returns the number of chunks written. Chunks that fail to save stay
    /// dirty for the next attempt.
    pub fn save_world(&self) -> WorldResult<usize> {
        let (metadata, resident) = {
            let mut state = self.state.write();
            let metadata = state.metadata.as_mut().ok_or(WorldError::NoActiveWorld)?;
            metadata.last_played_at = now_millis();
            let metadata = metadata.clone();
            (metadata, state.chunks.values().cloned().collect::<Vec<_>>())
        };

        self.persistence.save_world(&metadata)?;
        self.loaded_worlds
            .insert(metadata.name.clone(), metadata.clone());

        let mut saved = 0;
        for shared in resident {
            let coord = shared.read().coord();
            let lock = self.locks.lock_for(coord);
            let _guard = lock.write();
            let dirty = shared.read().is_dirty();
            if dirty && self.persist_chunk(&metadata.name, &shared) {
                saved += 1;
            }
        }
        info!("Saved world '{}' ({} chunks written)", metadata.name, saved);
        Ok(saved)
    }

    /// Metadata of the active world.
    #[must_use]
    pub fn world_metadata(&self) -> Option<WorldMetadata> {
        self.state.read().metadata.clone()
    }

    /// Name of the active world.
    #[must_use]
    pub fn active_world_name(&self) -> Option<String> {
        self.state.read().name().map(str::to_string)
    }

    /// Metadata of a world seen by this store, active or not.
    #[must_use]
    pub fn loaded_world(&self, name: &str) -> Option<WorldMetadata> {
        self.loaded_worlds.get(name).map(|m| m.value().clone())
    }

    /// Number of resident chunks.
    #[must_use]
    pub fn resident_count(&self) -> usize {
        self.state.read().chunks.len()
    }

    /// Returns true if the chunk is resident.
    #[must_use]
    pub fn is_loaded(&self, coord: ChunkCoord) -> bool {
        self.state.read().chunks.contains_key(&coord)
    }

    /// Returns a resident chunk.
    #[must_use]
    pub fn chunk(&self, coord: ChunkCoord) -> Option<SharedChunk> {
        self.state.read().chunks.get(&coord).cloned()
    }

    /// Makes a chunk resident, loading it from persistence or generating it.
    ///
    /// At most one load or generation runs per coordinate at a time; a caller
    /// that loses the race sees [`LoadOutcome::AlreadyResident`].
    pub fn load_or_generate(&self, coord: ChunkCoord) -> WorldResult<LoadOutcome> {
        if self.is_loaded(coord) {
            return Ok(LoadOutcome::AlreadyResident);
        }
        let lock = self.locks.lock_for(coord);
        let _guard = lock.write();
        self.load_or_generate_locked(coord)
    }

    /// Load path for a caller already holding the chunk's write lock.
    fn load_or_generate_locked(&self, coord: ChunkCoord) -> WorldResult<LoadOutcome> {
        let (world, seed) = {
            let state = self.state.read();
            if state.chunks.contains_key(&coord) {
                return Ok(LoadOutcome::AlreadyResident);
            }
            let metadata = state.metadata.as_ref().ok_or(WorldError::NoActiveWorld)?;
            (metadata.name.clone(), metadata.seed)
        };

        match self.persistence.load_chunk(&world, coord) {
            Ok(Some(chunk)) => match self.validate_loaded(&chunk) {
                Ok(()) => {
                    self.install(&world, chunk)?;
                    debug!("Loaded chunk {} from storage", coord);
                    return Ok(LoadOutcome::Loaded);
                },
                Err(e) => warn!("Stored chunk {} is invalid, regenerating: {}", coord, e),
            },
            Ok(None) => {},
            Err(e) => warn!("Failed to load chunk {}, generating instead: {}", coord, e),
        }

        let chunk = self.generate_chunk(seed, coord)?;
        let shared = self.install(&world, chunk)?;
        self.persist_chunk(&world, &shared);
        debug!("Generated chunk {}", coord);
        Ok(LoadOutcome::Generated)
    }

    /// Loads a chunk if needed and returns a snapshot of it.
    pub fn request_chunk(&self, coord: ChunkCoord) -> WorldResult<Chunk> {
        self.load_or_generate(coord)?;
        let shared = self.chunk(coord).ok_or(WorldError::NotResident(coord))?;
        let snapshot = shared.read().clone();
        Ok(snapshot)
    }

    /// Records a player's movement in the active world's player table.
    pub fn record_player_move(&self, event: PlayerMove) -> WorldResult<()> {
        let mut state = self.state.write();
        let metadata = state.metadata.as_mut().ok_or(WorldError::NoActiveWorld)?;
        let snapshot = event.into_snapshot();
        metadata
            .players
            .insert(snapshot.player_id.clone(), snapshot);
        Ok(())
    }

    /// Resident chunks covering a view rectangle, loading any that are missing.
    ///
    /// A chunk that fails to load is left out of the result; the failure is
    /// logged.
    pub fn visible_chunks(&self, rect: ViewRect) -> WorldResult<AHashMap<ChunkCoord, SharedChunk>> {
        let range = rect.covered_chunks(self.config.tile_size);
        for coord in range.iter() {
            if self.is_loaded(coord) {
                continue;
            }
            match self.load_or_generate(coord) {
                Ok(_) => {},
                Err(WorldError::NoActiveWorld) => return Err(WorldError::NoActiveWorld),
                Err(e) => warn!("Visible chunk {} unavailable: {}", coord, e),
            }
        }

        let state = self.state.read();
        Ok(range
            .iter()
            .filter_map(|coord| state.chunks.get(&coord).map(|c| (coord, Arc::clone(c))))
            .collect())
    }

    /// All objects in the chunks covering a view rectangle.
    pub fn visible_objects(&self, rect: ViewRect) -> WorldResult<Vec<WorldObject>> {
        let chunks = self.visible_chunks(rect)?;
        Ok(chunks
            .values()
            .flat_map(|shared| shared.read().objects().to_vec())
            .collect())
    }

    /// Discards a chunk from memory and storage and generates it again.
    pub fn regenerate_chunk(&self, coord: ChunkCoord) -> WorldResult<LoadOutcome> {
        let lock = self.locks.lock_for(coord);
        let _guard = lock.write();

        let world = self.active_world_name().ok_or(WorldError::NoActiveWorld)?;
        self.persistence.delete_chunk(&world, coord)?;
        {
            let mut state = self.state.write();
            if state.name() != Some(world.as_str()) {
                return Err(WorldError::WorldSwitched(coord));
            }
            state.chunks.remove(&coord);
        }
        info!("Regenerating chunk {}", coord);
        self.load_or_generate_locked(coord)
    }

    /// Replaces a chunk's tiles and objects, creating the chunk if needed.
    ///
    /// Everything is validated first; an invalid request changes nothing.
    pub fn replace_chunk(
        &self,
        coord: ChunkCoord,
        tiles: &[Vec<TileId>],
        objects: Vec<WorldObject>,
    ) -> WorldResult<()> {
        self.validate_contents(coord, tiles, &objects)?;

        let lock = self.locks.lock_for(coord);
        let _guard = lock.write();

        let (world, existing) = {
            let state = self.state.read();
            let world = state.name().ok_or(WorldError::NoActiveWorld)?.to_string();
            (world, state.chunks.get(&coord).cloned())
        };

        let shared = if let Some(shared) = existing {
            {
                let mut chunk = shared.write();
                chunk.set_tiles(tiles)?;
                chunk.set_objects(objects);
            }
            shared
        } else {
            self.install(&world, Chunk::with_contents(coord, tiles, objects)?)?
        };
        self.persist_chunk(&world, &shared);
        debug!("Replaced chunk {}", coord);
        Ok(())
    }

    /// Applies an add, move or remove event to the owning resident chunk.
    ///
    /// Moves keep the object's kind. Updates for chunks that are not resident
    /// are dropped. The chunk is persisted after every applied update,
    /// including removals of unknown IDs.
    pub fn apply_object_update(&self, update: &ObjectUpdate) -> WorldResult<UpdateOutcome> {
        let coord = update.chunk();
        let (x, y) = update.tile().to_local();

        let lock = self.locks.lock_for(coord);
        let _guard = lock.write();

        let (world, shared) = {
            let state = self.state.read();
            let world = state.name().ok_or(WorldError::NoActiveWorld)?.to_string();
            match state.chunks.get(&coord) {
                Some(shared) => (world, Arc::clone(shared)),
                None => {
                    warn!(
                        "Dropping update for object {}: chunk {} not loaded",
                        update.object_id, coord
                    );
                    return Ok(UpdateOutcome::Dropped);
                },
            }
        };

        let outcome = {
            let mut chunk = shared.write();
            if update.removed {
                match chunk.remove_object(&update.object_id) {
                    Some(_) => UpdateOutcome::Removed,
                    None => UpdateOutcome::RemoveIgnored,
                }
            } else if let Some(collidable) = chunk
                .find_object(&update.object_id)
                .map(|o| o.collidable)
            {
                self.check_passable(&mut chunk, &update.object_id, x, y, collidable)?;
                if let Some(object) = chunk
                    .objects_mut()
                    .iter_mut()
                    .find(|o| o.id == update.object_id)
                {
                    object.tile_x = x;
                    object.tile_y = y;
                }
                chunk.mark_dirty();
                UpdateOutcome::Moved
            } else {
                let kind: ObjectKind = update.kind.parse()?;
                let object = WorldObject::new(update.object_id.clone(), x, y, kind);
                self.check_passable(&mut chunk, &object.id, x, y, object.collidable)?;
                chunk.objects_mut().push(object);
                chunk.mark_dirty();
                UpdateOutcome::Added
            }
        };

        self.persist_chunk(&world, &shared);
        debug!(
            "Object update {} in chunk {}: {:?}",
            update.object_id, coord, outcome
        );
        Ok(outcome)
    }

    /// Applies a batch of updates. A failing update does not stop the rest.
    pub fn apply_object_updates(
        &self,
        updates: &[ObjectUpdate],
    ) -> Vec<WorldResult<UpdateOutcome>> {
        updates
            .iter()
            .map(|update| {
                let result = self.apply_object_update(update);
                if let Err(e) = &result {
                    warn!("Object update {} rejected: {}", update.object_id, e);
                }
                result
            })
            .collect()
    }

    /// Rejects placing a collidable object on an impassable tile.
    fn check_passable(
        &self,
        chunk: &mut Chunk,
        id: &ObjectId,
        x: i32,
        y: i32,
        collidable: bool,
    ) -> WorldResult<()> {
        if !collidable {
            return Ok(());
        }
        let coord = chunk.coord();
        chunk.materialize_tiles();
        let tile = chunk
            .tile_at(x as usize, y as usize)
            .ok_or(ChunkError::MissingTiles { coord })?;
        if self.terrain.is_tile_impassable(tile) {
            return Err(WorldError::ObjectOnImpassableTile {
                coord,
                id: id.clone(),
                x,
                y,
                tile,
            });
        }
        Ok(())
    }

    /// Full content check: dimensions, bounds, impassability and unique IDs.
    fn validate_contents(
        &self,
        coord: ChunkCoord,
        tiles: &[Vec<TileId>],
        objects: &[WorldObject],
    ) -> WorldResult<()> {
        check_dimensions(tiles)?;
        let mut seen = HashSet::with_capacity(objects.len());
        for object in objects {
            if !object.in_chunk_bounds() {
                return Err(ChunkError::ObjectOutOfBounds {
                    id: object.id.clone(),
                    x: object.tile_x,
                    y: object.tile_y,
                }
                .into());
            }
            if !seen.insert(&object.id) {
                return Err(WorldError::DuplicateObjectId {
                    coord,
                    id: object.id.clone(),
                });
            }
            let tile = tiles[object.tile_y as usize][object.tile_x as usize];
            if object.collidable && self.terrain.is_tile_impassable(tile) {
                return Err(WorldError::ObjectOnImpassableTile {
                    coord,
                    id: object.id.clone(),
                    x: object.tile_x,
                    y: object.tile_y,
                    tile,
                });
            }
        }
        Ok(())
    }

    /// Validates a chunk read from storage without materializing it.
    fn validate_loaded(&self, chunk: &Chunk) -> WorldResult<()> {
        chunk.validate()?;
        if chunk.objects().is_empty() {
            return Ok(());
        }
        let coord = chunk.coord();
        let grid: Cow<'_, TileGrid> = match chunk.materialized_tiles() {
            Some(grid) => Cow::Borrowed(grid),
            None => {
                let blob = chunk
                    .encoded_tiles()
                    .ok_or(ChunkError::MissingTiles { coord })?;
                Cow::Owned(
                    decode_tiles(&blob)
                        .map_err(|reason| ChunkError::CorruptTiles { coord, reason })?,
                )
            },
        };
        self.validate_contents(coord, &grid, chunk.objects())
    }

    /// Produces and validates a new chunk. Nothing is installed on failure.
    fn generate_chunk(&self, seed: i64, coord: ChunkCoord) -> WorldResult<Chunk> {
        let tiles = self.terrain.generate_tiles(seed, coord);
        check_dimensions(&tiles).map_err(|e| generation_failed(coord, &e))?;
        let biome = self.terrain.biome(seed, coord);
        let objects = self.objects.generate_objects(coord, &tiles, biome, seed);
        self.validate_contents(coord, &tiles, &objects)
            .map_err(|e| generation_failed(coord, &e))?;
        Chunk::with_contents(coord, &tiles, objects).map_err(|e| generation_failed(coord, &e))
    }

    /// Inserts a chunk unless the active world changed in the meantime.
    fn install(&self, world: &str, chunk: Chunk) -> WorldResult<SharedChunk> {
        let coord = chunk.coord();
        let mut state = self.state.write();
        if state.name() != Some(world) {
            return Err(WorldError::WorldSwitched(coord));
        }
        let shared = Arc::new(RwLock::new(chunk));
        state.chunks.insert(coord, Arc::clone(&shared));
        Ok(shared)
    }

    /// Best-effort save of one chunk. On failure the chunk stays dirty.
    fn persist_chunk(&self, world: &str, shared: &SharedChunk) -> bool {
        let result = {
            let chunk = shared.read();
            self.persistence.save_chunk(world, &chunk)
        };
        match result {
            Ok(()) => {
                shared.write().clear_dirty();
                true
            },
            Err(e) => {
                let coord = shared.read().coord();
                warn!("Failed to persist chunk {}: {}", coord, e);
                false
            },
        }
    }

    /// Flushes the active world's dirty chunks before `next` replaces it.
    fn flush_previous(&self, state: &WorldState, next: &str) {
        if let Some(previous) = state.name() {
            let resident: Vec<SharedChunk> = state.chunks.values().cloned().collect();
            let flushed = self.flush_dirty(previous, &resident);
            info!(
                "Switching from world '{}' ({} chunks flushed) to '{}'",
                previous, flushed, next
            );
        }
    }

    /// Saves dirty chunks of `world` while the caller holds the world lock.
    fn flush_dirty(&self, world: &str, chunks: &[SharedChunk]) -> usize {
        chunks
            .iter()
            .filter(|shared| shared.read().is_dirty())
            .filter(|shared| self.persist_chunk(world, shared))
            .count()
    }
}

fn generation_failed(coord: ChunkCoord, error: &impl std::fmt::Display) -> WorldError {
    WorldError::GenerationFailed {
        coord,
        reason: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{MemoryPersistence, PersistenceResult};
    use crate::test_support::{CountingTerrain, FixedObjects, GRASS, WATER};
    use std::thread;
    use std::time::Duration;
    use tessera_common::{PixelPos, PlayerId, TilePos, CHUNK_SIZE};

    struct Fixture {
        store: Arc<WorldStore>,
        terrain: Arc<CountingTerrain>,
        persistence: Arc<MemoryPersistence>,
    }

    fn fixture_with(terrain: CountingTerrain, objects: Vec<WorldObject>) -> Fixture {
        let terrain = Arc::new(terrain);
        let persistence = Arc::new(MemoryPersistence::new());
        let store = Arc::new(WorldStore::new(
            WorldConfig::default(),
            Arc::clone(&persistence) as Arc<dyn ChunkPersistence>,
            Arc::clone(&terrain) as Arc<dyn TerrainGenerator>,
            Arc::new(FixedObjects(objects)),
        ));
        Fixture {
            store,
            terrain,
            persistence,
        }
    }

    fn fixture() -> Fixture {
        let fx = fixture_with(CountingTerrain::filled(GRASS), Vec::new());
        fx.store.create_world("w1", 42).expect("create failed");
        fx
    }

    fn rock(id: &str, x: i32, y: i32) -> WorldObject {
        WorldObject::new(ObjectId::new(id), x, y, ObjectKind::Rock)
    }

    fn grid(fill: TileId) -> TileGrid {
        vec![vec![fill; CHUNK_SIZE]; CHUNK_SIZE]
    }

    #[test]
    fn test_create_world_twice_fails() {
        let fx = fixture_with(CountingTerrain::filled(GRASS), Vec::new());
        fx.store.create_world("w1", 42).expect("first create");
        let err = fx.store.create_world("w1", 99).expect_err("second create");
        assert!(matches!(err, WorldError::WorldAlreadyExists(ref n) if n == "w1"));
        assert_eq!(fx.store.world_metadata().map(|m| m.seed), Some(42));
        assert_eq!(fx.store.loaded_world("w1").map(|m| m.seed), Some(42));
    }

    #[test]
    fn test_generate_then_reuse() {
        let fx = fixture();
        let coord = ChunkCoord::new(0, 0);

        assert_eq!(
            fx.store.load_or_generate(coord).expect("load"),
            LoadOutcome::Generated
        );
        assert!(fx.store.is_loaded(coord));
        assert!(fx.persistence.has_chunk("w1", coord));
        let first = fx.store.chunk(coord).expect("resident");
        assert!(!first.read().is_dirty());

        assert_eq!(
            fx.store.load_or_generate(coord).expect("load"),
            LoadOutcome::AlreadyResident
        );
        let second = fx.store.chunk(coord).expect("resident");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fx.terrain.calls(), 1);
        assert_eq!(fx.persistence.chunk_save_count(), 1);
    }

    #[test]
    fn test_exactly_one_generation_under_race() {
        let fx = fixture_with(
            CountingTerrain::filled(GRASS).with_delay(Duration::from_millis(20)),
            Vec::new(),
        );
        fx.store.create_world("w1", 1).expect("create");
        let coord = ChunkCoord::new(3, -2);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&fx.store);
                thread::spawn(move || store.load_or_generate(coord))
            })
            .collect();
        let outcomes: Vec<LoadOutcome> = handles
            .into_iter()
            .map(|h| h.join().expect("thread panicked").expect("load failed"))
            .collect();

        let generated = outcomes
            .iter()
            .filter(|o| **o == LoadOutcome::Generated)
            .count();
        assert_eq!(generated, 1);
        assert_eq!(fx.terrain.calls(), 1);
        assert_eq!(fx.persistence.chunk_save_count(), 1);
        assert_eq!(fx.store.resident_count(), 1);
    }

    #[test]
    fn test_valid_stored_chunk_is_loaded_not_resaved() {
        let fx = fixture();
        let coord = ChunkCoord::new(1, 1);
        let stored = Chunk::with_contents(coord, &grid(GRASS), vec![rock("r", 2, 2)])
            .expect("valid chunk");
        fx.persistence.save_chunk("w1", &stored).expect("seed storage");
        let saves_before = fx.persistence.chunk_save_count();

        assert_eq!(
            fx.store.load_or_generate(coord).expect("load"),
            LoadOutcome::Loaded
        );
        assert_eq!(fx.terrain.calls(), 0);
        assert_eq!(fx.persistence.chunk_save_count(), saves_before);
        let shared = fx.store.chunk(coord).expect("resident");
        assert!(!shared.read().is_materialized());
        assert_eq!(shared.read().objects().len(), 1);
    }

    #[test]
    fn test_corrupt_stored_chunk_falls_back_to_generation() {
        let fx = fixture();
        let coord = ChunkCoord::new(0, 0);
        fx.persistence
            .insert_raw_chunk("w1", coord, vec![0xde, 0xad, 0xbe, 0xef], Vec::new());

        assert_eq!(
            fx.store.load_or_generate(coord).expect("load"),
            LoadOutcome::Generated
        );
        assert_eq!(fx.terrain.calls(), 1);
        let shared = fx.store.chunk(coord).expect("resident");
        assert_eq!(shared.write().tiles(), Some(&grid(GRASS)));
    }

    #[test]
    fn test_stored_rock_on_water_falls_back_to_generation() {
        let fx = fixture();
        let coord = ChunkCoord::new(0, 0);
        let blob = crate::chunk::encode_tiles(&grid(WATER));
        fx.persistence
            .insert_raw_chunk("w1", coord, blob, vec![rock("r", 0, 0)]);

        assert_eq!(
            fx.store.load_or_generate(coord).expect("load"),
            LoadOutcome::Generated
        );
        assert!(fx
            .store
            .chunk(coord)
            .expect("resident")
            .read()
            .objects()
            .is_empty());
    }

    #[test]
    fn test_invalid_generation_is_not_installed() {
        let fx = fixture_with(CountingTerrain::filled(WATER), vec![rock("r", 1, 1)]);
        fx.store.create_world("w1", 1).expect("create");
        let coord = ChunkCoord::new(0, 0);

        let err = fx.store.load_or_generate(coord).expect_err("must fail");
        assert!(matches!(err, WorldError::GenerationFailed { .. }));
        assert!(!fx.store.is_loaded(coord));
        assert!(!fx.persistence.has_chunk("w1", coord));
    }

    #[test]
    fn test_malformed_generated_grid_fails() {
        let fx = fixture_with(CountingTerrain::broken(), Vec::new());
        fx.store.create_world("w1", 1).expect("create");
        assert!(matches!(
            fx.store.load_or_generate(ChunkCoord::new(0, 0)),
            Err(WorldError::GenerationFailed { .. })
        ));
        assert_eq!(fx.store.resident_count(), 0);
    }

    #[test]
    fn test_no_active_world() {
        let fx = fixture_with(CountingTerrain::filled(GRASS), Vec::new());
        assert!(matches!(
            fx.store.load_or_generate(ChunkCoord::new(0, 0)),
            Err(WorldError::NoActiveWorld)
        ));
        assert!(matches!(
            fx.store.visible_chunks(ViewRect::new(0.0, 0.0, 10.0, 10.0)),
            Err(WorldError::NoActiveWorld)
        ));
    }

    #[test]
    fn test_add_then_remove_object() {
        let fx = fixture();
        let coord = ChunkCoord::new(0, 0);
        fx.store.load_or_generate(coord).expect("load");
        let before = fx.store.chunk(coord).expect("resident").read().objects().len();

        let add = ObjectUpdate::place("A", ObjectKind::Rock, TilePos::new(3, 4));
        assert_eq!(
            fx.store.apply_object_update(&add).expect("add"),
            UpdateOutcome::Added
        );
        {
            let shared = fx.store.chunk(coord).expect("resident");
            let chunk = shared.read();
            assert_eq!(chunk.objects().len(), before + 1);
            let obj = chunk.find_object(&ObjectId::new("A")).expect("added");
            assert_eq!((obj.tile_x, obj.tile_y), (3, 4));
            assert_eq!(obj.kind, ObjectKind::Rock);
        }

        let remove = ObjectUpdate::remove("A", TilePos::new(3, 4));
        assert_eq!(
            fx.store.apply_object_update(&remove).expect("remove"),
            UpdateOutcome::Removed
        );
        assert_eq!(
            fx.store.chunk(coord).expect("resident").read().objects().len(),
            before
        );
    }

    #[test]
    fn test_move_keeps_kind_and_id() {
        let fx = fixture();
        let coord = ChunkCoord::new(0, 0);
        fx.store
            .replace_chunk(coord, &grid(GRASS), vec![rock("A", 1, 1)])
            .expect("replace");

        let update = ObjectUpdate::place("A", ObjectKind::Tree, TilePos::new(9, 10));
        assert_eq!(
            fx.store.apply_object_update(&update).expect("move"),
            UpdateOutcome::Moved
        );
        let shared = fx.store.chunk(coord).expect("resident");
        let chunk = shared.read();
        assert_eq!(chunk.objects().len(), 1);
        let obj = &chunk.objects()[0];
        assert_eq!(obj.id, ObjectId::new("A"));
        assert_eq!(obj.kind, ObjectKind::Rock);
        assert_eq!((obj.tile_x, obj.tile_y), (9, 10));
    }

    #[test]
    fn test_remove_unknown_id_is_noop_but_persists() {
        let fx = fixture();
        let coord = ChunkCoord::new(0, 0);
        fx.store.load_or_generate(coord).expect("load");
        let saves = fx.persistence.chunk_save_count();

        let update = ObjectUpdate::remove("ghost", TilePos::new(0, 0));
        assert_eq!(
            fx.store.apply_object_update(&update).expect("apply"),
            UpdateOutcome::RemoveIgnored
        );
        assert_eq!(fx.persistence.chunk_save_count(), saves + 1);
        assert!(fx
            .store
            .chunk(coord)
            .expect("resident")
            .read()
            .objects()
            .is_empty());
    }

    #[test]
    fn test_update_rejections() {
        let fx = fixture();
        let missing = ObjectUpdate::place("A", ObjectKind::Rock, TilePos::new(100, 100));
        assert_eq!(
            fx.store.apply_object_update(&missing).expect("apply"),
            UpdateOutcome::Dropped
        );
        assert!(!fx.store.is_loaded(missing.chunk()));

        fx.store.load_or_generate(ChunkCoord::new(0, 0)).expect("load");
        let mut unknown = ObjectUpdate::place("B", ObjectKind::Rock, TilePos::new(1, 1));
        unknown.kind = "DRAGON".to_string();
        assert!(matches!(
            fx.store.apply_object_update(&unknown),
            Err(WorldError::UnknownObjectKind(_))
        ));

        let results = fx.store.apply_object_updates(&[
            unknown,
            ObjectUpdate::place("C", ObjectKind::Bush, TilePos::new(2, 2)),
        ]);
        assert!(results[0].is_err());
        assert_eq!(results[1].as_ref().ok(), Some(&UpdateOutcome::Added));
    }

    #[test]
    fn test_update_routes_negative_tiles() {
        let fx = fixture();
        let coord = ChunkCoord::new(-1, -1);
        fx.store.load_or_generate(coord).expect("load");

        let update = ObjectUpdate::place("N", ObjectKind::Bush, TilePos::new(-1, -16));
        fx.store.apply_object_update(&update).expect("apply");
        let shared = fx.store.chunk(coord).expect("resident");
        let chunk = shared.read();
        let obj = chunk.find_object(&ObjectId::new("N")).expect("placed");
        assert_eq!((obj.tile_x, obj.tile_y), (15, 0));
    }

    #[test]
    fn test_collidable_object_cannot_be_placed_on_water() {
        let fx = fixture();
        let coord = ChunkCoord::new(0, 0);
        let mut tiles = grid(GRASS);
        tiles[5][5] = WATER;
        fx.store
            .replace_chunk(coord, &tiles, Vec::new())
            .expect("replace");

        let rock = ObjectUpdate::place("R", ObjectKind::Rock, TilePos::new(5, 5));
        assert!(matches!(
            fx.store.apply_object_update(&rock),
            Err(WorldError::ObjectOnImpassableTile { .. })
        ));
        let flower = ObjectUpdate::place("F", ObjectKind::Flower, TilePos::new(5, 5));
        assert_eq!(
            fx.store.apply_object_update(&flower).expect("flower"),
            UpdateOutcome::Added
        );
        assert_eq!(
            fx.store.chunk(coord).expect("resident").read().objects().len(),
            1
        );
    }

    #[test]
    fn test_visible_chunks_loads_exactly_covering_set() {
        let fx = fixture();
        let span = fx.store.config().chunk_span_pixels();
        fx.store
            .load_or_generate(ChunkCoord::new(1, 1))
            .expect("preload");

        let rect = ViewRect::new(0.0, 0.0, span * 3.0, span * 3.0);
        let visible = fx.store.visible_chunks(rect).expect("visible");
        assert_eq!(visible.len(), 9);
        assert_eq!(fx.terrain.calls(), 9);
        assert_eq!(fx.store.resident_count(), 9);
        for y in 0..3 {
            for x in 0..3 {
                assert!(visible.contains_key(&ChunkCoord::new(x, y)));
            }
        }
    }

    #[test]
    fn test_visible_objects_flattens_chunks() {
        let fx = fixture_with(CountingTerrain::filled(GRASS), vec![rock("r", 0, 0)]);
        fx.store.create_world("w1", 1).expect("create");
        let span = fx.store.config().chunk_span_pixels();
        let objects = fx
            .store
            .visible_objects(ViewRect::new(0.0, 0.0, span * 2.0, span))
            .expect("visible");
        assert_eq!(objects.len(), 2);
    }

    #[test]
    fn test_replace_chunk_rejects_without_mutation() {
        let fx = fixture();
        let coord = ChunkCoord::new(0, 0);
        fx.store
            .replace_chunk(coord, &grid(GRASS), vec![rock("a", 0, 0)])
            .expect("replace");

        let short: TileGrid = vec![vec![GRASS; CHUNK_SIZE]; CHUNK_SIZE - 1];
        assert!(matches!(
            fx.store.replace_chunk(coord, &short, Vec::new()),
            Err(WorldError::InvalidChunk(ChunkError::InvalidDimensions { .. }))
        ));
        assert!(matches!(
            fx.store
                .replace_chunk(coord, &grid(GRASS), vec![rock("d", 1, 1), rock("d", 2, 2)]),
            Err(WorldError::DuplicateObjectId { .. })
        ));
        assert!(matches!(
            fx.store.replace_chunk(coord, &grid(GRASS), vec![rock("o", 16, 0)]),
            Err(WorldError::InvalidChunk(ChunkError::ObjectOutOfBounds { .. }))
        ));
        assert!(matches!(
            fx.store.replace_chunk(coord, &grid(WATER), vec![rock("w", 0, 0)]),
            Err(WorldError::ObjectOnImpassableTile { .. })
        ));

        let shared = fx.store.chunk(coord).expect("resident");
        let mut chunk = shared.write();
        assert_eq!(chunk.tiles(), Some(&grid(GRASS)));
        assert_eq!(chunk.objects().len(), 1);
        assert!(!chunk.is_dirty());
    }

    #[test]
    fn test_regenerate_chunk() {
        let fx = fixture();
        let coord = ChunkCoord::new(2, 2);
        fx.store
            .replace_chunk(coord, &grid(WATER), Vec::new())
            .expect("replace");
        assert_eq!(fx.terrain.calls(), 0);

        assert_eq!(
            fx.store.regenerate_chunk(coord).expect("regenerate"),
            LoadOutcome::Generated
        );
        assert_eq!(fx.terrain.calls(), 1);
        let shared = fx.store.chunk(coord).expect("resident");
        assert_eq!(shared.write().tiles(), Some(&grid(GRASS)));
        assert!(fx.persistence.has_chunk("w1", coord));
    }

    #[test]
    fn test_delete_world() {
        let fx = fixture();
        fx.store
            .load_or_generate(ChunkCoord::new(0, 0))
            .expect("load");
        assert!(matches!(
            fx.store.delete_world("nope"),
            Err(WorldError::WorldNotFound(_))
        ));

        fx.store.delete_world("w1").expect("delete");
        assert!(fx.store.active_world_name().is_none());
        assert_eq!(fx.store.resident_count(), 0);
        assert!(fx.store.loaded_world("w1").is_none());
        assert_eq!(fx.persistence.stored_chunk_count("w1"), 0);
    }

    #[test]
    fn test_failed_persist_stays_resident_and_flushes_later() {
        let fx = fixture();
        let coord = ChunkCoord::new(0, 0);
        fx.persistence.set_fail_chunk_saves(true);

        assert_eq!(
            fx.store.load_or_generate(coord).expect("load"),
            LoadOutcome::Generated
        );
        assert!(fx.store.is_loaded(coord));
        assert!(fx.store.chunk(coord).expect("resident").read().is_dirty());
        assert!(!fx.persistence.has_chunk("w1", coord));

        fx.persistence.set_fail_chunk_saves(false);
        assert_eq!(fx.store.save_world().expect("save"), 1);
        assert!(fx.persistence.has_chunk("w1", coord));
        assert!(!fx.store.chunk(coord).expect("resident").read().is_dirty());
        assert_eq!(fx.store.save_world().expect("save"), 0);
    }

    #[test]
    fn test_create_world_flushes_previous_world() {
        let fx = fixture();
        let coord = ChunkCoord::new(0, 0);
        fx.persistence.set_fail_chunk_saves(true);
        fx.store.load_or_generate(coord).expect("load");
        assert!(!fx.persistence.has_chunk("w1", coord));

        fx.persistence.set_fail_chunk_saves(false);
        fx.store.create_world("w2", 2).expect("create");
        assert!(fx.persistence.has_chunk("w1", coord));
        assert!(!fx.persistence.has_chunk("w2", coord));
        assert_eq!(fx.store.active_world_name().as_deref(), Some("w2"));
        assert_eq!(fx.store.resident_count(), 0);
    }

    /// Switches the active world from inside `delete_chunk`.
    struct SwitchOnDelete {
        inner: MemoryPersistence,
        store: parking_lot::Mutex<Option<Arc<WorldStore>>>,
    }

    impl ChunkPersistence for SwitchOnDelete {
        fn load_world(&self, name: &str) -> PersistenceResult<Option<WorldMetadata>> {
            self.inner.load_world(name)
        }

        fn save_world(&self, metadata: &WorldMetadata) -> PersistenceResult<()> {
            self.inner.save_world(metadata)
        }

        fn world_exists(&self, name: &str) -> bool {
            self.inner.world_exists(name)
        }

        fn delete_world(&self, name: &str) -> PersistenceResult<()> {
            self.inner.delete_world(name)
        }

        fn load_chunk(
            &self,
            world: &str,
            coord: ChunkCoord,
        ) -> PersistenceResult<Option<Chunk>> {
            self.inner.load_chunk(world, coord)
        }

        fn save_chunk(&self, world: &str, chunk: &Chunk) -> PersistenceResult<()> {
            self.inner.save_chunk(world, chunk)
        }

        fn delete_chunk(&self, world: &str, coord: ChunkCoord) -> PersistenceResult<()> {
            self.inner.delete_chunk(world, coord)?;
            let store = self.store.lock().take();
            if let Some(store) = store {
                store.create_world("w2", 2).expect("switch world");
            }
            Ok(())
        }
    }

    #[test]
    fn test_regenerate_refuses_after_world_switch() {
        let terrain = Arc::new(CountingTerrain::filled(GRASS));
        let persistence = Arc::new(SwitchOnDelete {
            inner: MemoryPersistence::new(),
            store: parking_lot::Mutex::new(None),
        });
        let store = Arc::new(WorldStore::new(
            WorldConfig::default(),
            Arc::clone(&persistence) as Arc<dyn ChunkPersistence>,
            Arc::clone(&terrain) as Arc<dyn TerrainGenerator>,
            Arc::new(FixedObjects::default()),
        ));
        store.create_world("w1", 1).expect("create");
        let coord = ChunkCoord::new(1, 2);
        store.load_or_generate(coord).expect("load");

        *persistence.store.lock() = Some(Arc::clone(&store));
        let err = store.regenerate_chunk(coord).expect_err("world switched");
        assert!(matches!(err, WorldError::WorldSwitched(c) if c == coord));
        assert_eq!(store.active_world_name().as_deref(), Some("w2"));
        assert!(!store.is_loaded(coord));
        assert!(!persistence.inner.has_chunk("w2", coord));
        assert_eq!(terrain.calls(), 1);
    }

    #[test]
    fn test_initialize_and_switch_worlds() {
        let fx = fixture_with(CountingTerrain::filled(GRASS), Vec::new());
        fx.store.initialize().expect("init");
        fx.store.initialize().expect("init again");
        assert!(fx.persistence.world_exists("defaultWorld"));
        assert!(fx.store.active_world_name().is_none());

        let meta = fx.store.load_default_world().expect("load default");
        assert_eq!(meta.seed, 12345);
        fx.store
            .load_or_generate(ChunkCoord::new(0, 0))
            .expect("load");

        fx.store.create_world("other", 5).expect("create");
        assert_eq!(fx.store.resident_count(), 0);
        fx.store.load_world("defaultWorld").expect("switch back");
        assert_eq!(fx.store.active_world_name().as_deref(), Some("defaultWorld"));
        assert!(matches!(
            fx.store.load_world("missing"),
            Err(WorldError::WorldNotFound(_))
        ));
    }

    #[test]
    fn test_request_chunk_and_player_move() {
        let fx = fixture();
        let snapshot = fx
            .store
            .request_chunk(ChunkCoord::new(4, 4))
            .expect("request");
        assert_eq!(snapshot.coord(), ChunkCoord::new(4, 4));

        fx.store
            .record_player_move(PlayerMove {
                player_id: PlayerId::new("ash"),
                position: PixelPos::new(100.0, 50.0),
                direction: "LEFT".to_string(),
                moving: true,
                running: true,
            })
            .expect("move");
        fx.store.save_world().expect("save");
        let stored = fx
            .persistence
            .load_world("w1")
            .expect("load")
            .expect("present");
        assert!(stored.players.contains_key(&PlayerId::new("ash")));
    }
}

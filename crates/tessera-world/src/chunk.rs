//! Chunk data structure and lazy tile compression.

use std::borrow::Cow;

use tessera_common::{ChunkCoord, ObjectId, CHUNK_SIZE};
use thiserror::Error;
use tracing::warn;

use crate::object::WorldObject;

/// Tile type identifier.
pub type TileId = u32;

/// Square tile grid indexed `grid[y][x]`.
pub type TileGrid = Vec<Vec<TileId>>;

/// Chunk errors.
#[derive(Debug, Error)]
pub enum ChunkError {
    /// Tile grid is not `CHUNK_SIZE` x `CHUNK_SIZE`
    #[error("Invalid tile grid dimensions: {rows} rows, a row of {cols} columns (expected {CHUNK_SIZE}x{CHUNK_SIZE})")]
    InvalidDimensions {
        /// Number of rows found
        rows: usize,
        /// Column count of the first malformed row
        cols: usize,
    },
    /// Chunk has neither a tile grid nor encoded tiles
    #[error("Chunk {coord} has no tiles")]
    MissingTiles {
        /// Chunk coordinate
        coord: ChunkCoord,
    },
    /// Encoded tiles could not be decoded
    #[error("Chunk {coord} has corrupt tile data: {reason}")]
    CorruptTiles {
        /// Chunk coordinate
        coord: ChunkCoord,
        /// Decoder message
        reason: String,
    },
    /// An object lies outside the chunk
    #[error("Object {id} position ({x},{y}) outside chunk bounds")]
    ObjectOutOfBounds {
        /// Object ID
        id: ObjectId,
        /// Local X
        x: i32,
        /// Local Y
        y: i32,
    },
}

/// Result type for chunk operations.
pub type ChunkResult<T> = Result<T, ChunkError>;

/// Outcome of [`Chunk::materialize_tiles`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileMaterialization {
    /// The grid was already present.
    AlreadyMaterialized,
    /// The grid was decoded from the encoded tiles.
    Decoded,
    /// Decoding failed; an all-zero grid was synthesized and the chunk marked dirty.
    Recovered,
    /// The chunk holds no tile data at all.
    Missing,
}

/// A chunk of the world: a tile grid plus the objects placed on it.
///
/// Tiles may be held only in encoded form (as loaded from storage) and are
/// decoded by an explicit [`Chunk::materialize_tiles`] step. Decoding never
/// touches the encoded bytes.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Chunk coordinate
    coord: ChunkCoord,
    /// Decoded tile grid
    tiles: Option<TileGrid>,
    /// lz4-compressed tile bytes
    tiles_blob: Option<Vec<u8>>,
    /// Set when the grid was synthesized after a failed decode
    recovered: bool,
    /// Placed objects; `None` until first initialized
    objects: Option<Vec<WorldObject>>,
    /// Whether chunk has been modified since last save
    dirty: bool,
}

impl Chunk {
    /// Creates a new chunk with no tiles and an empty object list.
    #[must_use]
    pub fn new(coord: ChunkCoord) -> Self {
        Self {
            coord,
            tiles: None,
            tiles_blob: None,
            recovered: false,
            objects: Some(Vec::new()),
            dirty: false,
        }
    }

    /// Creates a dirty chunk from a tile grid and objects.
    pub fn with_contents(
        coord: ChunkCoord,
        tiles: &[Vec<TileId>],
        objects: Vec<WorldObject>,
    ) -> ChunkResult<Self> {
        let mut chunk = Self::new(coord);
        chunk.set_tiles(tiles)?;
        chunk.set_objects(objects);
        Ok(chunk)
    }

    /// Creates a clean chunk holding only encoded tiles, as read from storage.
    #[must_use]
    pub fn from_encoded(
        coord: ChunkCoord,
        tiles_blob: Vec<u8>,
        objects: Option<Vec<WorldObject>>,
    ) -> Self {
        Self {
            coord,
            tiles: None,
            tiles_blob: Some(tiles_blob),
            recovered: false,
            objects,
            dirty: false,
        }
    }

    /// Returns the chunk coordinate.
    #[must_use]
    pub const fn coord(&self) -> ChunkCoord {
        self.coord
    }

    /// Returns whether the chunk is dirty.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Marks the chunk as dirty.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Clears the dirty flag, typically right after a successful save.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Returns true once the tile grid has been decoded or assigned.
    #[must_use]
    pub const fn is_materialized(&self) -> bool {
        self.tiles.is_some()
    }

    /// Decodes the encoded tiles into the grid if not already done.
    pub fn materialize_tiles(&mut self) -> TileMaterialization {
        if self.tiles.is_some() {
            return TileMaterialization::AlreadyMaterialized;
        }
        let Some(blob) = self.tiles_blob.as_deref() else {
            return TileMaterialization::Missing;
        };
        match decode_tiles(blob) {
            Ok(grid) => {
                self.tiles = Some(grid);
                TileMaterialization::Decoded
            },
            Err(reason) => {
                warn!(
                    "Failed to decode tiles for chunk ({}): {reason}; using empty tiles",
                    self.coord
                );
                self.tiles = Some(empty_grid());
                self.recovered = true;
                self.dirty = true;
                TileMaterialization::Recovered
            },
        }
    }

    /// Returns the tile grid, materializing it first.
    pub fn tiles(&mut self) -> Option<&TileGrid> {
        self.materialize_tiles();
        self.tiles.as_ref()
    }

    /// Returns the tile grid only if it is already materialized.
    #[must_use]
    pub fn materialized_tiles(&self) -> Option<&TileGrid> {
        self.tiles.as_ref()
    }

    /// Returns the tile at local coordinates of a materialized grid.
    #[must_use]
    pub fn tile_at(&self, x: usize, y: usize) -> Option<TileId> {
        self.tiles.as_ref()?.get(y)?.get(x).copied()
    }

    /// Replaces the tile grid. Fails without mutating if not `CHUNK_SIZE` square.
    pub fn set_tiles(&mut self, tiles: &[Vec<TileId>]) -> ChunkResult<()> {
        check_dimensions(tiles)?;
        let grid: TileGrid = tiles.to_vec();
        self.tiles_blob = Some(encode_tiles(&grid));
        self.tiles = Some(grid);
        self.recovered = false;
        self.dirty = true;
        Ok(())
    }

    /// Encoded tiles suitable for persisting.
    ///
    /// After a recovery the original bytes are kept untouched, so the
    /// synthesized grid is encoded fresh instead.
    #[must_use]
    pub fn encoded_tiles(&self) -> Option<Cow<'_, [u8]>> {
        match (&self.tiles, &self.tiles_blob) {
            (Some(grid), _) if self.recovered => Some(Cow::Owned(encode_tiles(grid))),
            (_, Some(blob)) => Some(Cow::Borrowed(blob.as_slice())),
            (Some(grid), None) => Some(Cow::Owned(encode_tiles(grid))),
            (None, None) => None,
        }
    }

    /// Returns the placed objects.
    #[must_use]
    pub fn objects(&self) -> &[WorldObject] {
        self.objects.as_deref().unwrap_or(&[])
    }

    /// Mutable object list, created (and the chunk marked dirty) if absent.
    pub fn objects_mut(&mut self) -> &mut Vec<WorldObject> {
        if self.objects.is_none() {
            self.dirty = true;
        }
        self.objects.get_or_insert_with(Vec::new)
    }

    /// Replaces the object list.
    pub fn set_objects(&mut self, objects: Vec<WorldObject>) {
        self.objects = Some(objects);
        self.dirty = true;
    }

    /// Finds an object by ID.
    #[must_use]
    pub fn find_object(&self, id: &ObjectId) -> Option<&WorldObject> {
        self.objects().iter().find(|o| &o.id == id)
    }

    /// Removes an object by ID, returning it if present.
    pub fn remove_object(&mut self, id: &ObjectId) -> Option<WorldObject> {
        let objects = self.objects.as_mut()?;
        let index = objects.iter().position(|o| &o.id == id)?;
        self.dirty = true;
        Some(objects.remove(index))
    }

    /// Checks the structural invariants: a well-formed tile grid and all
    /// objects inside chunk bounds.
    ///
    /// Encoded tiles are decoded into a scratch grid; the chunk itself is not
    /// materialized.
    pub fn validate(&self) -> ChunkResult<()> {
        match (&self.tiles, &self.tiles_blob) {
            (Some(grid), _) => check_dimensions(grid)?,
            (None, Some(blob)) => {
                decode_tiles(blob).map_err(|reason| ChunkError::CorruptTiles {
                    coord: self.coord,
                    reason,
                })?;
            },
            (None, None) => return Err(ChunkError::MissingTiles { coord: self.coord }),
        }

        if let Some(obj) = self.objects().iter().find(|o| !o.in_chunk_bounds()) {
            return Err(ChunkError::ObjectOutOfBounds {
                id: obj.id.clone(),
                x: obj.tile_x,
                y: obj.tile_y,
            });
        }
        Ok(())
    }
}

/// Returns an all-zero `CHUNK_SIZE` x `CHUNK_SIZE` grid.
#[must_use]
pub fn empty_grid() -> TileGrid {
    vec![vec![0; CHUNK_SIZE]; CHUNK_SIZE]
}

/// Checks that a grid is exactly `CHUNK_SIZE` x `CHUNK_SIZE`.
pub fn check_dimensions(tiles: &[Vec<TileId>]) -> ChunkResult<()> {
    if tiles.len() != CHUNK_SIZE {
        return Err(ChunkError::InvalidDimensions {
            rows: tiles.len(),
            cols: tiles.first().map_or(0, Vec::len),
        });
    }
    if let Some(row) = tiles.iter().find(|row| row.len() != CHUNK_SIZE) {
        return Err(ChunkError::InvalidDimensions {
            rows: tiles.len(),
            cols: row.len(),
        });
    }
    Ok(())
}

/// Compresses a grid into the tile blob format.
#[must_use]
pub fn encode_tiles(grid: &[Vec<TileId>]) -> Vec<u8> {
    let flat: Vec<TileId> = grid.iter().flatten().copied().collect();
    lz4_flex::compress_prepend_size(bytemuck::cast_slice(&flat))
}

/// Decompresses a tile blob, checking it holds a full grid.
pub fn decode_tiles(blob: &[u8]) -> Result<TileGrid, String> {
    let bytes = lz4_flex::decompress_size_prepended(blob).map_err(|e| e.to_string())?;
    let expected = CHUNK_SIZE * CHUNK_SIZE * std::mem::size_of::<TileId>();
    if bytes.len() != expected {
        return Err(format!(
            "tile data size mismatch: expected {expected} bytes, got {}",
            bytes.len()
        ));
    }
    let flat: Vec<TileId> = bytes
        .chunks_exact(std::mem::size_of::<TileId>())
        .map(bytemuck::pod_read_unaligned::<TileId>)
        .collect();
    Ok(flat.chunks_exact(CHUNK_SIZE).map(<[TileId]>::to_vec).collect())
}

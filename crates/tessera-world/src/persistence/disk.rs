//! File-per-chunk persistence under a save directory.
//!
//! Layout:
//!
//! ```text
//! <root>/<world>/world.json
//! <root>/<world>/chunks/chunk_<x>_<y>.tchk
//! ```
//!
//! A chunk file is a little-endian `u32` header length, the bincode
//! [`ChunkHeader`], the bincode object list, then the lz4 tile blob exactly as
//! the chunk holds it.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tessera_common::{ChunkCoord, MagicBytes, SchemaVersion};
use tracing::{debug, info};

use super::{ChunkPersistence, PersistenceError, PersistenceResult};
use crate::chunk::Chunk;
use crate::object::WorldObject;
use crate::state::WorldMetadata;

const WORLD_FILE: &str = "world.json";
const CHUNK_DIR: &str = "chunks";
const CHUNK_EXT: &str = "tchk";

/// Chunk file header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkHeader {
    /// Magic bytes for format identification
    pub magic: [u8; 4],
    /// Schema version
    pub version: SchemaVersion,
    /// Chunk X coordinate
    pub x: i32,
    /// Chunk Y coordinate
    pub y: i32,
    /// Length in bytes of the encoded object list that follows
    pub objects_len: u32,
    /// Compression type of the tile blob (1 = lz4)
    pub compression: u8,
}

impl ChunkHeader {
    /// Creates a header for a chunk.
    #[must_use]
    pub fn new(coord: ChunkCoord, objects_len: u32) -> Self {
        Self {
            magic: MagicBytes::CHUNK.0,
            version: SchemaVersion::CHUNK_FILE,
            x: coord.x,
            y: coord.y,
            objects_len,
            compression: 1,
        }
    }

    /// Coordinate recorded in the header.
    #[must_use]
    pub const fn coord(&self) -> ChunkCoord {
        ChunkCoord::new(self.x, self.y)
    }

    /// Validates the header.
    pub fn validate(&self) -> PersistenceResult<()> {
        if self.magic != MagicBytes::CHUNK.0 {
            return Err(PersistenceError::InvalidFormat);
        }
        if !SchemaVersion::CHUNK_FILE.can_read(&self.version) {
            return Err(PersistenceError::VersionMismatch {
                expected: SchemaVersion::CHUNK_FILE.to_string(),
                actual: self.version.to_string(),
            });
        }
        Ok(())
    }
}

/// Persistence backend writing one file per chunk.
#[derive(Debug, Clone)]
pub struct DiskPersistence {
    root: PathBuf,
}

impl DiskPersistence {
    /// Creates a backend rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the save root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn world_dir(&self, name: &str) -> PersistenceResult<PathBuf> {
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.contains("..")
        {
            return Err(PersistenceError::InvalidWorldName(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    fn chunk_path(&self, world: &str, coord: ChunkCoord) -> PersistenceResult<PathBuf> {
        Ok(self
            .world_dir(world)?
            .join(CHUNK_DIR)
            .join(format!("chunk_{}_{}.{CHUNK_EXT}", coord.x, coord.y)))
    }

    /// Lists the coordinates of every chunk saved for a world.
    pub fn saved_chunks(&self, world: &str) -> PersistenceResult<Vec<ChunkCoord>> {
        let dir = self.world_dir(world)?.join(CHUNK_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut coords = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if let Some(coord) = parse_chunk_file_name(&path) {
                coords.push(coord);
            }
        }
        coords.sort();
        Ok(coords)
    }
}

/// Extracts the coordinate from a `chunk_<x>_<y>.tchk` path.
fn parse_chunk_file_name(path: &Path) -> Option<ChunkCoord> {
    if path.extension()? != CHUNK_EXT {
        return None;
    }
    let stem = path.file_stem()?.to_str()?.strip_prefix("chunk_")?;
    let (x, y) = stem.split_once('_')?;
    Some(ChunkCoord::new(x.parse().ok()?, y.parse().ok()?))
}

/// Writes `bytes` next to `path` and renames it into place.
fn write_atomic(path: &Path, bytes: &[u8]) -> PersistenceResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Encodes a chunk into the chunk file format.
pub fn encode_chunk_file(chunk: &Chunk) -> PersistenceResult<Vec<u8>> {
    let tiles = chunk
        .encoded_tiles()
        .ok_or(PersistenceError::MissingTiles(chunk.coord()))?;
    let object_bytes = bincode::serialize(chunk.objects())
        .map_err(|e| PersistenceError::Serialization(e.to_string()))?;
    let header = ChunkHeader::new(chunk.coord(), object_bytes.len() as u32);
    let header_bytes = bincode::serialize(&header)
        .map_err(|e| PersistenceError::Serialization(e.to_string()))?;

    let mut result =
        Vec::with_capacity(4 + header_bytes.len() + object_bytes.len() + tiles.len());
    result.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    result.extend_from_slice(&header_bytes);
    result.extend_from_slice(&object_bytes);
    result.extend_from_slice(&tiles);
    Ok(result)
}

/// Decodes a chunk file. Tiles stay encoded until first read.
pub fn decode_chunk_file(bytes: &[u8]) -> PersistenceResult<Chunk> {
    if bytes.len() < 4 {
        return Err(PersistenceError::Serialization("data too short".into()));
    }
    let (len_bytes, rest) = bytes.split_at(4);
    let header_len =
        u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
    if rest.len() < header_len {
        return Err(PersistenceError::Serialization(
            "header length mismatch".into(),
        ));
    }
    let (header_bytes, rest) = rest.split_at(header_len);
    let header: ChunkHeader = bincode::deserialize(header_bytes)
        .map_err(|e| PersistenceError::Serialization(e.to_string()))?;
    header.validate()?;

    let objects_len = header.objects_len as usize;
    if rest.len() < objects_len {
        return Err(PersistenceError::Serialization(
            "object data truncated".into(),
        ));
    }
    let (object_bytes, tiles) = rest.split_at(objects_len);
    let objects: Vec<WorldObject> = bincode::deserialize(object_bytes)
        .map_err(|e| PersistenceError::Serialization(e.to_string()))?;

    Ok(Chunk::from_encoded(
        header.coord(),
        tiles.to_vec(),
        Some(objects),
    ))
}

impl ChunkPersistence for DiskPersistence {
    fn load_world(&self, name: &str) -> PersistenceResult<Option<WorldMetadata>> {
        let path = self.world_dir(name)?.join(WORLD_FILE);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let metadata = serde_json::from_str(&contents)
            .map_err(|e| PersistenceError::Serialization(e.to_string()))?;
        debug!("Loaded world metadata from {}", path.display());
        Ok(Some(metadata))
    }

    fn save_world(&self, metadata: &WorldMetadata) -> PersistenceResult<()> {
        let path = self.world_dir(&metadata.name)?.join(WORLD_FILE);
        let json = serde_json::to_string_pretty(metadata)
            .map_err(|e| PersistenceError::Serialization(e.to_string()))?;
        write_atomic(&path, json.as_bytes())?;
        debug!("Saved world metadata to {}", path.display());
        Ok(())
    }

    fn world_exists(&self, name: &str) -> bool {
        self.world_dir(name)
            .map(|dir| dir.join(WORLD_FILE).is_file())
            .unwrap_or(false)
    }

    fn delete_world(&self, name: &str) -> PersistenceResult<()> {
        let dir = self.world_dir(name)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!("Deleted world directory {}", dir.display());
                Ok(())
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn load_chunk(&self, world: &str, coord: ChunkCoord) -> PersistenceResult<Option<Chunk>> {
        let path = self.chunk_path(world, coord)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let chunk = decode_chunk_file(&bytes)?;
        if chunk.coord() != coord {
            return Err(PersistenceError::CoordMismatch {
                requested: coord,
                found: chunk.coord(),
            });
        }
        Ok(Some(chunk))
    }

    fn save_chunk(&self, world: &str, chunk: &Chunk) -> PersistenceResult<()> {
        let path = self.chunk_path(world, chunk.coord())?;
        let bytes = encode_chunk_file(chunk)?;
        write_atomic(&path, &bytes)
    }

    fn delete_chunk(&self, world: &str, coord: ChunkCoord) -> PersistenceResult<()> {
        let path = self.chunk_path(world, coord)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

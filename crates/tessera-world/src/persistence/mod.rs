//! Durable storage of worlds and chunks.
//!
//! The store only talks to [`ChunkPersistence`]; the encoding behind it is the
//! backend's business. Two backends ship with the crate: [`MemoryPersistence`]
//! and [`DiskPersistence`].

mod disk;
mod memory;

pub use disk::{decode_chunk_file, encode_chunk_file, ChunkHeader, DiskPersistence};
pub use memory::MemoryPersistence;

use tessera_common::ChunkCoord;
use thiserror::Error;

use crate::chunk::Chunk;
use crate::state::WorldMetadata;

/// Persistence errors.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Underlying IO failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Encoding or decoding failed
    #[error("Serialization failed: {0}")]
    Serialization(String),
    /// File is not a chunk file
    #[error("Invalid chunk format")]
    InvalidFormat,
    /// File was written by an incompatible version
    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Expected version
        expected: String,
        /// Actual version
        actual: String,
    },
    /// Stored chunk claims a different coordinate than requested
    #[error("Chunk file for {requested} contains chunk {found}")]
    CoordMismatch {
        /// Requested coordinate
        requested: ChunkCoord,
        /// Coordinate recorded in the file
        found: ChunkCoord,
    },
    /// Chunk has no tile data to save
    #[error("Chunk {0} has no tile data")]
    MissingTiles(ChunkCoord),
    /// World name cannot be used as a storage key
    #[error("Invalid world name '{0}'")]
    InvalidWorldName(String),
    /// Backend refused the operation
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Result type for persistence operations.
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Durable load/save/delete of world metadata and chunks.
///
/// Implementations are called from worker threads and must be thread-safe.
/// Calls may block on IO.
pub trait ChunkPersistence: Send + Sync {
    /// Loads world metadata; `Ok(None)` if the world does not exist.
    fn load_world(&self, name: &str) -> PersistenceResult<Option<WorldMetadata>>;

    /// Saves world metadata, creating the world if needed.
    fn save_world(&self, metadata: &WorldMetadata) -> PersistenceResult<()>;

    /// Returns true if the world exists.
    fn world_exists(&self, name: &str) -> bool;

    /// Deletes a world and all its chunks.
    fn delete_world(&self, name: &str) -> PersistenceResult<()>;

    /// Loads a chunk; `Ok(None)` if it was never saved.
    fn load_chunk(&self, world: &str, coord: ChunkCoord) -> PersistenceResult<Option<Chunk>>;

    /// Saves a chunk, replacing any previous copy.
    fn save_chunk(&self, world: &str, chunk: &Chunk) -> PersistenceResult<()>;

    /// Deletes a chunk. Deleting a missing chunk succeeds.
    fn delete_chunk(&self, world: &str, coord: ChunkCoord) -> PersistenceResult<()>;
}

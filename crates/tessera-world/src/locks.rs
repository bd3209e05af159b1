//! Per-chunk lock registry.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tessera_common::ChunkCoord;

/// A lock guarding the load, generate and mutate paths of one chunk.
pub type ChunkLock = Arc<RwLock<()>>;

/// Lazily created read/write lock per chunk coordinate.
///
/// Locks are created by an atomic get-or-insert and never evicted, so every
/// caller asking for the same coordinate gets the same lock for the lifetime
/// of the registry.
#[derive(Debug, Default)]
pub struct ChunkLockRegistry {
    locks: DashMap<ChunkCoord, ChunkLock>,
}

impl ChunkLockRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock for a coordinate, creating it on first use.
    #[must_use]
    pub fn lock_for(&self, coord: ChunkCoord) -> ChunkLock {
        Arc::clone(self.locks.entry(coord).or_default().value())
    }

    /// Number of locks created so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Returns true if no lock was ever requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

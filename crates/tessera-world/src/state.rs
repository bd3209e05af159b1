//! World metadata and the authoritative in-memory world state.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tessera_common::{ChunkCoord, PixelPos, PlayerId, SchemaVersion};

use crate::chunk::Chunk;

/// A resident chunk shared between the store and its readers.
pub type SharedChunk = Arc<RwLock<Chunk>>;

/// Last known state of a player, as synced from movement events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    /// Player identity
    pub player_id: PlayerId,
    /// Position in world pixels
    pub position: PixelPos,
    /// Facing direction as reported by the client
    pub direction: String,
    /// Whether the player is moving
    pub moving: bool,
    /// Whether the player is running
    pub running: bool,
    /// Last update, milliseconds since the Unix epoch
    pub updated_at: u64,
}

/// Movement event received from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerMove {
    /// Player identity
    pub player_id: PlayerId,
    /// New position in world pixels
    pub position: PixelPos,
    /// Facing direction
    pub direction: String,
    /// Whether the player is moving
    pub moving: bool,
    /// Whether the player is running
    pub running: bool,
}

impl PlayerMove {
    /// Converts the event into a snapshot stamped with the current time.
    #[must_use]
    pub fn into_snapshot(self) -> PlayerSnapshot {
        PlayerSnapshot {
            player_id: self.player_id,
            position: self.position,
            direction: self.direction,
            moving: self.moving,
            running: self.running,
            updated_at: now_millis(),
        }
    }
}

/// Persisted description of a world, without its chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldMetadata {
    /// Format version
    #[serde(default)]
    pub version: SchemaVersion,
    /// World name (unique within the persistence backend)
    pub name: String,
    /// Generation seed
    pub seed: i64,
    /// Creation time, milliseconds since the Unix epoch
    pub created_at: u64,
    /// Last time the world was played, milliseconds since the Unix epoch
    pub last_played_at: u64,
    /// Accumulated play time in seconds
    pub played_time_secs: u64,
    /// Known players keyed by ID
    #[serde(default)]
    pub players: BTreeMap<PlayerId, PlayerSnapshot>,
}

impl WorldMetadata {
    /// Creates metadata for a brand-new world stamped with the current time.
    #[must_use]
    pub fn new(name: impl Into<String>, seed: i64) -> Self {
        let now = now_millis();
        Self {
            version: SchemaVersion::WORLD_META,
            name: name.into(),
            seed,
            created_at: now,
            last_played_at: now,
            played_time_secs: 0,
            players: BTreeMap::new(),
        }
    }
}

/// The single authoritative world: active metadata plus resident chunks.
///
/// `metadata` is `None` when no world is active (the cleared form).
#[derive(Debug, Default)]
pub struct WorldState {
    /// Active world metadata
    pub metadata: Option<WorldMetadata>,
    /// Resident chunks keyed by coordinate
    pub chunks: AHashMap<ChunkCoord, SharedChunk>,
}

impl WorldState {
    /// Name of the active world, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.metadata.as_ref().map(|m| m.name.as_str())
    }

    /// Seed of the active world, if any.
    #[must_use]
    pub fn seed(&self) -> Option<i64> {
        self.metadata.as_ref().map(|m| m.seed)
    }

    /// Makes `metadata` the active world and drops all resident chunks.
    pub fn activate(&mut self, metadata: WorldMetadata) {
        self.metadata = Some(metadata);
        self.chunks.clear();
    }

    /// Resets to the empty form: no active world, no chunks.
    pub fn reset(&mut self) {
        self.metadata = None;
        self.chunks.clear();
    }
}

/// Current time in milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

//! Placed world objects and the updates that move them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tessera_common::{ChunkCoord, ObjectId, TilePos, CHUNK_SIZE_I32};
use thiserror::Error;

/// Kinds of objects that can be placed on tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectKind {
    /// Broadleaf tree.
    Tree,
    /// Conifer, found in colder biomes.
    PineTree,
    /// Small rock.
    Rock,
    /// Large immovable boulder.
    Boulder,
    /// Low shrub.
    Bush,
    /// Desert cactus.
    Cactus,
    /// Walk-through grass patch.
    TallGrass,
    /// Decorative flower.
    Flower,
    /// Readable signpost.
    Sign,
}

impl ObjectKind {
    /// Get all object kinds.
    #[must_use]
    pub const fn all() -> [Self; 9] {
        [
            Self::Tree,
            Self::PineTree,
            Self::Rock,
            Self::Boulder,
            Self::Bush,
            Self::Cactus,
            Self::TallGrass,
            Self::Flower,
            Self::Sign,
        ]
    }

    /// Canonical upper-case name used on the wire.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Tree => "TREE",
            Self::PineTree => "PINE_TREE",
            Self::Rock => "ROCK",
            Self::Boulder => "BOULDER",
            Self::Bush => "BUSH",
            Self::Cactus => "CACTUS",
            Self::TallGrass => "TALL_GRASS",
            Self::Flower => "FLOWER",
            Self::Sign => "SIGN",
        }
    }

    /// Whether objects of this kind block movement by default.
    #[must_use]
    pub const fn is_collidable(self) -> bool {
        !matches!(self, Self::TallGrass | Self::Flower)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An object kind name that does not map to any [`ObjectKind`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown object kind '{0}'")]
pub struct ParseObjectKindError(pub String);

impl FromStr for ObjectKind {
    type Err = ParseObjectKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::all()
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ParseObjectKindError(s.to_string()))
    }
}

/// An object placed on a tile inside a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldObject {
    /// Stable identity, unique within its chunk
    pub id: ObjectId,
    /// Chunk-local tile X
    pub tile_x: i32,
    /// Chunk-local tile Y
    pub tile_y: i32,
    /// Object kind
    pub kind: ObjectKind,
    /// Whether the object blocks movement
    pub collidable: bool,
}

impl WorldObject {
    /// Creates an object whose collidability follows its kind.
    #[must_use]
    pub fn new(id: ObjectId, tile_x: i32, tile_y: i32, kind: ObjectKind) -> Self {
        Self {
            id,
            tile_x,
            tile_y,
            kind,
            collidable: kind.is_collidable(),
        }
    }

    /// Overrides the kind's default collidability.
    #[must_use]
    pub fn with_collidable(mut self, collidable: bool) -> Self {
        self.collidable = collidable;
        self
    }

    /// Returns true if the local position lies inside a chunk.
    #[must_use]
    pub const fn in_chunk_bounds(&self) -> bool {
        self.tile_x >= 0
            && self.tile_x < CHUNK_SIZE_I32
            && self.tile_y >= 0
            && self.tile_y < CHUNK_SIZE_I32
    }
}

/// Add/move/remove event for a world object, as received from clients.
///
/// Positions are in world tile coordinates; the owning chunk is implied by
/// them. `kind` stays a raw string until the update is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectUpdate {
    /// World tile X
    pub tile_x: i32,
    /// World tile Y
    pub tile_y: i32,
    /// Object being added, moved, or removed
    pub object_id: ObjectId,
    /// Object kind name (ignored for removals)
    pub kind: String,
    /// Whether the object is being removed
    pub removed: bool,
}

impl ObjectUpdate {
    /// An add-or-move update.
    #[must_use]
    pub fn place(object_id: impl Into<ObjectId>, kind: ObjectKind, tile: TilePos) -> Self {
        Self {
            tile_x: tile.x,
            tile_y: tile.y,
            object_id: object_id.into(),
            kind: kind.name().to_string(),
            removed: false,
        }
    }

    /// A removal update.
    #[must_use]
    pub fn remove(object_id: impl Into<ObjectId>, tile: TilePos) -> Self {
        Self {
            tile_x: tile.x,
            tile_y: tile.y,
            object_id: object_id.into(),
            kind: String::new(),
            removed: true,
        }
    }

    /// World tile targeted by this update.
    #[must_use]
    pub const fn tile(&self) -> TilePos {
        TilePos::new(self.tile_x, self.tile_y)
    }

    /// Chunk that owns the targeted tile.
    #[must_use]
    pub const fn chunk(&self) -> ChunkCoord {
        self.tile().to_chunk_coord()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object_kind() {
        assert_eq!("ROCK".parse::<ObjectKind>(), Ok(ObjectKind::Rock));
        assert_eq!("tall_grass".parse::<ObjectKind>(), Ok(ObjectKind::TallGrass));
        assert_eq!(
            "DRAGON".parse::<ObjectKind>(),
            Err(ParseObjectKindError("DRAGON".to_string()))
        );
    }

    #[test]
    fn test_names_round_trip() {
        for kind in ObjectKind::all() {
            assert_eq!(kind.name().parse::<ObjectKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_collidable_follows_kind_unless_overridden() {
        let rock = WorldObject::new(ObjectId::new("r"), 1, 1, ObjectKind::Rock);
        assert!(rock.collidable);
        let flower = WorldObject::new(ObjectId::new("f"), 1, 1, ObjectKind::Flower);
        assert!(!flower.collidable);
        assert!(!rock.with_collidable(false).collidable);
    }

    #[test]
    fn test_bounds() {
        assert!(WorldObject::new(ObjectId::new("a"), 0, 15, ObjectKind::Bush).in_chunk_bounds());
        assert!(!WorldObject::new(ObjectId::new("b"), 16, 0, ObjectKind::Bush).in_chunk_bounds());
        assert!(!WorldObject::new(ObjectId::new("c"), 0, -1, ObjectKind::Bush).in_chunk_bounds());
    }

    #[test]
    fn test_update_routes_to_owning_chunk() {
        let update = ObjectUpdate::place("A", ObjectKind::Rock, TilePos::new(3, 4));
        assert_eq!(update.chunk(), ChunkCoord::new(0, 0));
        let update = ObjectUpdate::remove("A", TilePos::new(-1, 33));
        assert_eq!(update.chunk(), ChunkCoord::new(-1, 2));
        assert!(update.removed);
    }

    #[test]
    fn test_serde_uses_screaming_case() {
        let json = serde_json::to_string(&ObjectKind::PineTree).expect("serialize failed");
        assert_eq!(json, "\"PINE_TREE\"");
    }
}

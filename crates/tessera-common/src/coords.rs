//! Coordinate types for chunk, tile, and pixel positions.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ParseCoordError;

/// Edge length of a chunk in tiles.
pub const CHUNK_SIZE: usize = 16;

/// Edge length of a chunk in tiles, as a signed value for coordinate math.
pub const CHUNK_SIZE_I32: i32 = CHUNK_SIZE as i32;

/// Default edge length of a tile in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 32;

/// Chunk coordinate (identifies a chunk in the world grid).
///
/// This is the canonical chunk key: every map and lock is keyed by it, and its
/// string form is always `"x,y"`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Pod, Zeroable,
)]
#[repr(C)]
pub struct ChunkCoord {
    /// X coordinate in chunk space
    pub x: i32,
    /// Y coordinate in chunk space
    pub y: i32,
}

impl ChunkCoord {
    /// Creates a new chunk coordinate.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Returns the coordinate offset by `(dx, dy)` chunks, saturating at the
    /// edge of chunk space.
    #[must_use]
    pub const fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x.saturating_add(dx),
            y: self.y.saturating_add(dy),
        }
    }

    /// Chebyshev (square-ring) distance to another chunk.
    #[must_use]
    pub fn chebyshev_distance(self, other: Self) -> u32 {
        self.x.abs_diff(other.x).max(self.y.abs_diff(other.y))
    }

    /// Squared euclidean distance to another chunk.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> i64 {
        let dx = i64::from(self.x) - i64::from(other.x);
        let dy = i64::from(self.y) - i64::from(other.y);
        dx * dx + dy * dy
    }

    /// All coordinates within `radius` of this one (inclusive square window).
    #[must_use]
    pub fn square_window(self, radius: u32) -> ChunkRange {
        let r = radius as i32;
        ChunkRange::new(self.offset(-r, -r), self.offset(r, r))
    }

    /// Top-left tile of this chunk in world tile coordinates.
    ///
    /// Saturates for chunks beyond the range of tile coordinates.
    #[must_use]
    pub const fn origin_tile(self) -> TilePos {
        TilePos {
            x: self.x.saturating_mul(CHUNK_SIZE_I32),
            y: self.y.saturating_mul(CHUNK_SIZE_I32),
        }
    }
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

impl FromStr for ChunkCoord {
    type Err = ParseCoordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, y) = s
            .split_once(',')
            .ok_or_else(|| ParseCoordError::Malformed(s.to_string()))?;
        if y.contains(',') {
            return Err(ParseCoordError::Malformed(s.to_string()));
        }
        let parse = |component: &str| {
            component
                .trim()
                .parse::<i32>()
                .map_err(|_| ParseCoordError::InvalidComponent {
                    key: s.to_string(),
                    component: component.to_string(),
                })
        };
        Ok(Self::new(parse(x)?, parse(y)?))
    }
}

/// Tile position in world tile coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct TilePos {
    /// X coordinate in tiles
    pub x: i32,
    /// Y coordinate in tiles
    pub y: i32,
}

impl TilePos {
    /// Creates a new tile position.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Returns the chunk containing this tile.
    #[must_use]
    pub const fn to_chunk_coord(self) -> ChunkCoord {
        ChunkCoord {
            x: self.x.div_euclid(CHUNK_SIZE_I32),
            y: self.y.div_euclid(CHUNK_SIZE_I32),
        }
    }

    /// Returns the chunk-local `(x, y)` of this tile, each in `[0, CHUNK_SIZE)`.
    #[must_use]
    pub const fn to_local(self) -> (i32, i32) {
        (
            self.x.rem_euclid(CHUNK_SIZE_I32),
            self.y.rem_euclid(CHUNK_SIZE_I32),
        )
    }
}

/// Position in world pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PixelPos {
    /// X coordinate in pixels
    pub x: f32,
    /// Y coordinate in pixels
    pub y: f32,
}

impl PixelPos {
    /// Creates a new pixel position.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Converts to the chunk containing this pixel.
    #[must_use]
    pub fn to_chunk_coord(self, tile_size: u32) -> ChunkCoord {
        let span = chunk_span_pixels(tile_size);
        ChunkCoord::new(
            (self.x / span).floor() as i32,
            (self.y / span).floor() as i32,
        )
    }
}

/// Width of one chunk in pixels for the given tile size.
#[must_use]
pub fn chunk_span_pixels(tile_size: u32) -> f32 {
    (CHUNK_SIZE as u32 * tile_size) as f32
}

/// Axis-aligned view rectangle in world pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ViewRect {
    /// Left edge in pixels
    pub x: f32,
    /// Top edge in pixels
    pub y: f32,
    /// Width in pixels
    pub width: f32,
    /// Height in pixels
    pub height: f32,
}

impl ViewRect {
    /// Creates a new view rectangle.
    #[must_use]
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Inclusive range of chunks covering this rectangle.
    ///
    /// The right and bottom edges are exclusive, so a rectangle that exactly
    /// spans `n` chunks covers exactly `n` chunk columns.
    #[must_use]
    pub fn covered_chunks(&self, tile_size: u32) -> ChunkRange {
        let span = chunk_span_pixels(tile_size);
        let start_x = (self.x / span).floor() as i32;
        let start_y = (self.y / span).floor() as i32;
        let end_x = (((self.x + self.width.max(0.0)) / span).ceil() as i32)
            .saturating_sub(1)
            .max(start_x);
        let end_y = (((self.y + self.height.max(0.0)) / span).ceil() as i32)
            .saturating_sub(1)
            .max(start_y);
        ChunkRange::new(
            ChunkCoord::new(start_x, start_y),
            ChunkCoord::new(end_x, end_y),
        )
    }
}

/// Inclusive rectangular range of chunk coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkRange {
    /// Minimum corner (inclusive)
    pub min: ChunkCoord,
    /// Maximum corner (inclusive)
    pub max: ChunkCoord,
}

impl ChunkRange {
    /// Creates a range from two inclusive corners.
    #[must_use]
    pub const fn new(min: ChunkCoord, max: ChunkCoord) -> Self {
        Self { min, max }
    }

    /// Returns true if the coordinate lies inside the range.
    #[must_use]
    pub const fn contains(&self, coord: ChunkCoord) -> bool {
        coord.x >= self.min.x
            && coord.x <= self.max.x
            && coord.y >= self.min.y
            && coord.y <= self.max.y
    }

    /// Number of coordinates in the range.
    #[must_use]
    pub fn len(&self) -> usize {
        let w = (i64::from(self.max.x) - i64::from(self.min.x) + 1).max(0);
        let h = (i64::from(self.max.y) - i64::from(self.min.y) + 1).max(0);
        (w * h) as usize
    }

    /// Returns true if the range holds no coordinates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates the range row by row.
    pub fn iter(&self) -> impl Iterator<Item = ChunkCoord> {
        let (min, max) = (self.min, self.max);
        (min.y..=max.y).flat_map(move |y| (min.x..=max.x).map(move |x| ChunkCoord::new(x, y)))
    }
}

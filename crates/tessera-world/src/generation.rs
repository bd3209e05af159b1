//! Procedural world generation.
//!
//! The store consumes generation through two traits: [`TerrainGenerator`] for
//! tiles and biomes, and [`ObjectFactory`] for placed objects. Noise-based
//! defaults for both live here.

use noise::{NoiseFn, Perlin};
use serde::{Deserialize, Serialize};
use tessera_common::{ChunkCoord, ObjectId, CHUNK_SIZE};

use crate::chunk::{TileGrid, TileId};
use crate::object::{ObjectKind, WorldObject};

/// Biome classification of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Biome {
    /// Open grassland with sparse trees.
    #[default]
    Plains,
    /// Dense tree coverage.
    Forest,
    /// Hot and dry, sand and cacti.
    Desert,
    /// Cold, conifers and snow.
    Tundra,
}

/// Produces tiles and biomes for chunk coordinates.
///
/// Implementations must be deterministic for a given seed and coordinate.
pub trait TerrainGenerator: Send + Sync {
    /// Generates the tile grid of a chunk. Must return a `CHUNK_SIZE` square grid.
    fn generate_tiles(&self, seed: i64, coord: ChunkCoord) -> TileGrid;

    /// Classifies the biome of a chunk.
    fn biome(&self, seed: i64, coord: ChunkCoord) -> Biome;

    /// Whether a tile type blocks movement.
    fn is_tile_impassable(&self, tile: TileId) -> bool;
}

/// Produces the placed objects of a freshly generated chunk.
pub trait ObjectFactory: Send + Sync {
    /// Generates objects for a chunk given its tiles and biome.
    fn generate_objects(
        &self,
        coord: ChunkCoord,
        tiles: &[Vec<TileId>],
        biome: Biome,
        seed: i64,
    ) -> Vec<WorldObject>;
}

/// Tile IDs used by the default generator.
pub mod tiles {
    use super::TileId;

    /// Deep water (impassable).
    pub const WATER: TileId = 1;
    /// Beach sand.
    pub const SAND: TileId = 2;
    /// Grass.
    pub const GRASS: TileId = 3;
    /// Dirt.
    pub const DIRT: TileId = 4;
    /// Bare rock (impassable).
    pub const STONE: TileId = 5;
    /// Snow caps.
    pub const SNOW: TileId = 6;

    /// Returns true for tiles nothing can walk over or stand on.
    #[must_use]
    pub const fn is_impassable(tile: TileId) -> bool {
        matches!(tile, WATER | STONE)
    }
}

/// World generator configuration.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Terrain scale in tiles (larger = smoother)
    pub terrain_scale: f64,
    /// Biome scale in chunks
    pub biome_scale: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            terrain_scale: 48.0,
            biome_scale: 6.0,
        }
    }
}

/// Perlin-noise terrain generator.
#[derive(Debug, Clone, Default)]
pub struct NoiseTerrainGenerator {
    /// Configuration
    config: GeneratorConfig,
}

impl NoiseTerrainGenerator {
    /// Creates a new generator with the given config.
    #[must_use]
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    /// Returns the generator configuration.
    #[must_use]
    pub const fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Converts a height value (0-1) to a tile ID.
    fn height_to_tile(height: f64) -> TileId {
        match height {
            h if h < 0.3 => tiles::WATER,
            h if h < 0.35 => tiles::SAND,
            h if h < 0.6 => tiles::GRASS,
            h if h < 0.7 => tiles::DIRT,
            h if h < 0.85 => tiles::STONE,
            _ => tiles::SNOW,
        }
    }
}

/// Folds a 64-bit seed into the 32-bit seed Perlin expects.
fn noise_seed(seed: i64, salt: u32) -> u32 {
    let folded = (seed as u64 ^ (seed as u64 >> 32)) as u32;
    folded.wrapping_add(salt)
}

impl TerrainGenerator for NoiseTerrainGenerator {
    fn generate_tiles(&self, seed: i64, coord: ChunkCoord) -> TileGrid {
        let terrain_noise = Perlin::new(noise_seed(seed, 0));
        let detail_noise = Perlin::new(noise_seed(seed, 1));
        let origin = coord.origin_tile();
        let scale = self.config.terrain_scale;

        (0..CHUNK_SIZE)
            .map(|y| {
                (0..CHUNK_SIZE)
                    .map(|x| {
                        let wx = (f64::from(origin.x) + x as f64) / scale;
                        let wy = (f64::from(origin.y) + y as f64) / scale;
                        let height = terrain_noise.get([wx, wy]);
                        let detail = detail_noise.get([wx * 4.0, wy * 4.0]) * 0.1;
                        Self::height_to_tile((height + detail + 1.0) / 2.0)
                    })
                    .collect()
            })
            .collect()
    }

    fn biome(&self, seed: i64, coord: ChunkCoord) -> Biome {
        let temperature = Perlin::new(noise_seed(seed, 2));
        let moisture = Perlin::new(noise_seed(seed, 3));
        let scale = self.config.biome_scale;
        let point = [
            f64::from(coord.x) / scale + 0.5,
            f64::from(coord.y) / scale + 0.5,
        ];
        let t = temperature.get(point);
        let m = moisture.get(point);
        match (t, m) {
            (t, _) if t < -0.25 => Biome::Tundra,
            (t, m) if t > 0.25 && m < 0.0 => Biome::Desert,
            (_, m) if m > 0.1 => Biome::Forest,
            _ => Biome::Plains,
        }
    }

    fn is_tile_impassable(&self, tile: TileId) -> bool {
        tiles::is_impassable(tile)
    }
}

/// Scatters biome-appropriate objects on passable tiles.
///
/// Placement is seeded by the world seed and chunk coordinate, so the same
/// chunk always receives the same objects.
#[derive(Debug, Clone)]
pub struct ScatterObjectFactory {
    /// Chance that a passable tile receives an object
    density: f64,
}

impl Default for ScatterObjectFactory {
    fn default() -> Self {
        Self { density: 0.06 }
    }
}

impl ScatterObjectFactory {
    /// Creates a factory with the given placement density (clamped to 0-1).
    #[must_use]
    pub fn new(density: f64) -> Self {
        Self {
            density: density.clamp(0.0, 1.0),
        }
    }

    fn palette(biome: Biome) -> &'static [ObjectKind] {
        match biome {
            Biome::Plains => &[ObjectKind::TallGrass, ObjectKind::Flower, ObjectKind::Tree],
            Biome::Forest => &[ObjectKind::Tree, ObjectKind::Tree, ObjectKind::Bush],
            Biome::Desert => &[ObjectKind::Cactus, ObjectKind::Rock],
            Biome::Tundra => &[ObjectKind::PineTree, ObjectKind::Boulder],
        }
    }

    fn rng_for(seed: i64, coord: ChunkCoord) -> fastrand::Rng {
        let mixed = (seed as u64)
            ^ (u64::from(coord.x as u32) << 32)
            ^ u64::from(coord.y as u32).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        fastrand::Rng::with_seed(mixed)
    }
}

impl ObjectFactory for ScatterObjectFactory {
    fn generate_objects(
        &self,
        coord: ChunkCoord,
        grid: &[Vec<TileId>],
        biome: Biome,
        seed: i64,
    ) -> Vec<WorldObject> {
        let mut rng = Self::rng_for(seed, coord);
        let palette = Self::palette(biome);
        let mut objects = Vec::new();

        for (y, row) in grid.iter().enumerate() {
            for (x, &tile) in row.iter().enumerate() {
                if tiles::is_impassable(tile) {
                    continue;
                }
                if rng.f64() >= self.density {
                    continue;
                }
                let kind = palette[rng.usize(..palette.len())];
                objects.push(WorldObject::new(
                    ObjectId::generated(coord, objects.len()),
                    x as i32,
                    y as i32,
                    kind,
                ));
            }
        }
        objects
    }
}

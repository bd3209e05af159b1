//! # Tessera World
//!
//! The chunked tile world behind a Tessera server.
//!
//! This crate handles:
//! - Chunks with lazily decoded, lz4-compressed tiles
//! - The authoritative world store and its locking discipline
//! - Procedural generation of missing chunks
//! - Persistence of worlds and chunks (in memory or on disk)
//! - Background prefetching of chunks around moving players

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod chunk;
pub mod config;
pub mod generation;
pub mod locks;
pub mod object;
pub mod persistence;
pub mod pool;
pub mod state;
pub mod store;
pub mod streaming;

#[cfg(test)]
mod test_support;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::chunk::*;
    pub use crate::config::*;
    pub use crate::generation::*;
    pub use crate::locks::*;
    pub use crate::object::*;
    pub use crate::persistence::*;
    pub use crate::pool::*;
    pub use crate::state::*;
    pub use crate::store::*;
    pub use crate::streaming::*;
}

pub use prelude::*;

//! Chunk-based memory pool
//!
//! Fixed-size cells carved from backend regions, handed out and returned
//! through a bounded-wait protocol with per-chunk lifecycle states.

mod chunk;
mod info;
#[allow(clippy::module_inception)]
mod pool;

pub use chunk::{ChunkState, OwnerId};
pub use info::ChunkInfo;
pub use pool::{MemoryPool, PoolConfig};

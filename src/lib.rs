//! Fixed-capacity chunk pools over pluggable region backends
//!
//! This crate provides a memory layer for workloads that want allocation to
//! be bounded and predictable: a [`MemoryPool`] carves large regions into
//! equally sized chunks up front and then serves acquire/release cycles
//! without ever moving memory, while a small [`Backend`] trait decides where
//! those regions come from (the process heap, a fixed arena, multiple fixed
//! arenas, or anything a caller plugs in).
//!
//! # Highlights
//!
//! - **Bounded waits.** Every potentially-waiting operation takes a
//!   [`WaitBudget`]; nothing blocks indefinitely unless asked to.
//! - **Ownership-gated release.** Chunks acquired through
//!   [`MemoryPool::acquire_exclusive`] can only be released by the identity
//!   that claimed them.
//! - **Corruption detection.** Each chunk carries guard bytes directly after
//!   its usable buffer; an overrun is detected on release, logged, and
//!   repaired before the chunk re-enters service.
//! - **Growth without invalidation.** [`MemoryPool::add_memory`] appends
//!   chunks while existing indices and in-flight buffers stay valid.
//!
//! # Example
//!
//! ```
//! use cellpool::{MemoryPool, WaitBudget};
//!
//! let pool = MemoryPool::with_capacity(64, 8)?;
//! let buf = pool.acquire(WaitBudget::from_millis(10))?;
//! // ... use up to 64 bytes at `buf` ...
//! pool.release(buf, WaitBudget::FOREVER)?;
//! # Ok::<(), cellpool::PoolError>(())
//! ```
//!
//! Backends compose: wrap any backend in an [`ObservedBackend`] to count
//! traffic, or in a [`SyncBackend`] to serialize it behind a lock with an
//! admission [`AllocationFilter`].

pub mod backend;
pub mod error;
pub mod pool;
pub mod utils;
pub mod wait;

pub use backend::{
    AllocationFilter, AllocationHook, Backend, BackendCategory, BumpBackend, CountingHook,
    HeapBackend, MaxBytesFilter, MultiRegionBackend, NoopHook, ObservedBackend, PassFilter,
    SyncBackend,
};
pub use error::{PoolError, Result};
pub use pool::{ChunkInfo, ChunkState, MemoryPool, OwnerId, PoolConfig};
pub use wait::WaitBudget;

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

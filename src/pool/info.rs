//! Diagnostic snapshots of pool chunks

use core::fmt;

use super::chunk::{ChunkState, OwnerId};

/// Point-in-time snapshot of one chunk's bookkeeping
///
/// Produced by [`MemoryPool::chunk_info`](super::MemoryPool::chunk_info).
/// The snapshot is not kept coherent with the live chunk; concurrent
/// transitions may outdate it immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Stable index of the chunk within the pool
    pub index: usize,
    /// Lifecycle state at snapshot time
    pub state: ChunkState,
    /// Holder at snapshot time, if the chunk was claimed
    pub owner: Option<OwnerId>,
    /// Whether the claim was ownership-gated
    pub exclusive: bool,
    /// Whether the guard pattern deviated at snapshot time
    pub corrupted: bool,
    /// Address of the usable buffer
    pub buffer_addr: usize,
}

impl fmt::Display for ChunkInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chunk #{} [{}] buffer=0x{:x}",
            self.index, self.state, self.buffer_addr
        )?;
        if let Some(owner) = self.owner {
            write!(f, " owner={}", owner.as_u64())?;
            if self.exclusive {
                f.write_str(" (exclusive)")?;
            }
        }
        if self.corrupted {
            f.write_str(" CORRUPTED")?;
        }
        Ok(())
    }
}

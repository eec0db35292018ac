//! Pool chunk
//!
//! A [`Chunk`] is the bookkeeping for one fixed-size cell inside a pool
//! region: an atomic lifecycle state, the claiming owner, and a guard
//! pattern written directly after the usable buffer. The guard doubles as a
//! cheap overrun canary: a writer that runs past `element_size` bytes tramples
//! it, and the release path notices.
//!
//! Chunks never own their cell memory; regions are owned by the pool.

use core::fmt;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use crate::error::{PoolError, Result};
use crate::utils::secure_zero;

/// Guard pattern written after the usable buffer of every chunk
pub(crate) const GUARD: [u8; 2] = [0x6d, 0x6e];

/// Bytes of per-cell overhead past the usable buffer
pub(crate) const GUARD_LEN: usize = GUARD.len();

/// Lifecycle state of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChunkState {
    /// Available for acquisition
    Free = 0,
    /// Handed out to a caller
    Used = 1,
    /// Administratively withheld from acquisition
    Blocked = 2,
    /// Not a chunk this pool manages (query results only, never stored)
    NotHandled = 3,
}

impl ChunkState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => ChunkState::Free,
            1 => ChunkState::Used,
            2 => ChunkState::Blocked,
            _ => ChunkState::NotHandled,
        }
    }
}

impl fmt::Display for ChunkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChunkState::Free => "free",
            ChunkState::Used => "used",
            ChunkState::Blocked => "blocked",
            ChunkState::NotHandled => "not-handled",
        };
        f.write_str(name)
    }
}

/// Identity of a chunk holder
///
/// Each thread gets a distinct id on first use; host runtimes that multiplex
/// work onto shared threads can mint their own ids and use the `*_as`
/// operations on the pool instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(u64);

impl OwnerId {
    /// The identity of the calling thread
    pub fn current() -> Self {
        use std::cell::Cell;

        static NEXT: AtomicU64 = AtomicU64::new(1);
        thread_local! {
            static THREAD_ID: Cell<u64> = const { Cell::new(0) };
        }

        THREAD_ID.with(|slot| {
            let mut id = slot.get();
            if id == 0 {
                id = NEXT.fetch_add(1, Ordering::Relaxed);
                slot.set(id);
            }
            OwnerId(id)
        })
    }

    /// Mints an identity from a raw id, for callers managing their own
    /// ownership domains
    ///
    /// Raw id 0 is reserved for "no owner".
    pub const fn from_raw(raw: u64) -> Self {
        OwnerId(raw)
    }

    /// The raw id
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

const NO_OWNER: u64 = 0;

/// Bookkeeping for one cell of pool memory
///
/// State transitions go through atomic compare-exchange for acquisition and
/// blocking; the release path performs a multi-step check-and-clear and is
/// serialized by the pool's transition lock.
pub(crate) struct Chunk {
    cell: NonNull<u8>,
    element_size: usize,
    state: AtomicU8,
    owner: AtomicU64,
    exclusive: AtomicBool,
}

// SAFETY: The cell pointer is only dereferenced by the holder of the chunk
// (between a successful claim and the matching release) or under the pool's
// transition lock; the remaining fields are atomics.
unsafe impl Send for Chunk {}
unsafe impl Sync for Chunk {}

impl Chunk {
    /// Adopts a cell of at least `element_size + GUARD_LEN` bytes and writes
    /// the guard pattern
    ///
    /// # Safety
    ///
    /// `cell` must be valid for reads and writes of `element_size + GUARD_LEN`
    /// bytes for the lifetime of the chunk, and no other chunk may alias it.
    pub unsafe fn adopt(cell: NonNull<u8>, element_size: usize) -> Self {
        let chunk = Self {
            cell,
            element_size,
            state: AtomicU8::new(ChunkState::Free as u8),
            owner: AtomicU64::new(NO_OWNER),
            exclusive: AtomicBool::new(false),
        };
        // SAFETY: Caller guarantees the cell spans the guard region.
        unsafe { chunk.write_guard() };
        chunk
    }

    /// Pointer to the usable buffer
    pub fn buffer(&self) -> NonNull<u8> {
        self.cell
    }

    /// Whether `ptr` is this chunk's buffer
    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        self.cell == ptr
    }

    pub fn state(&self) -> ChunkState {
        ChunkState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// The claiming owner, if the chunk is held
    pub fn owner(&self) -> Option<OwnerId> {
        match self.owner.load(Ordering::Acquire) {
            NO_OWNER => None,
            raw => Some(OwnerId(raw)),
        }
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive.load(Ordering::Acquire)
    }

    /// Attempts the Free -> Used transition, recording `owner`
    ///
    /// Returns `false` if the chunk was not free. On success the buffer is
    /// exclusively the caller's until released.
    pub fn try_claim(&self, owner: OwnerId, exclusive: bool) -> bool {
        if self
            .state
            .compare_exchange(
                ChunkState::Free as u8,
                ChunkState::Used as u8,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_err()
        {
            return false;
        }
        // Only the claimant writes these while Used; released before the
        // buffer pointer escapes to the caller.
        self.owner.store(owner.0, Ordering::Release);
        self.exclusive.store(exclusive, Ordering::Release);
        true
    }

    /// Attempts the Free -> Blocked transition
    ///
    /// Never succeeds against a Used chunk; in-flight buffers stay valid.
    pub fn try_block(&self) -> bool {
        self.state
            .compare_exchange(
                ChunkState::Free as u8,
                ChunkState::Blocked as u8,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Attempts the Blocked -> Free transition
    pub fn try_unblock(&self) -> bool {
        self.state
            .compare_exchange(
                ChunkState::Blocked as u8,
                ChunkState::Free as u8,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Releases a Used chunk back to Free on behalf of `requester`
    ///
    /// Returns whether the guard pattern had been trampled while the chunk
    /// was held. The guard is restored and the buffer zeroed regardless.
    ///
    /// Callers must serialize releases of the same chunk (the pool holds its
    /// transition lock around this).
    pub fn release(&self, requester: OwnerId) -> Result<bool> {
        if self.state() != ChunkState::Used {
            return Err(PoolError::InvalidTarget);
        }
        if self.is_exclusive() && self.owner.load(Ordering::Acquire) != requester.0 {
            return Err(PoolError::OwnershipViolation);
        }

        // SAFETY: The chunk is Used and the release path is serialized, so no
        // other party touches the cell while we scrub it.
        let corrupted = unsafe { self.guard_trampled() };
        unsafe {
            secure_zero(self.cell.as_ptr(), self.element_size);
            self.write_guard();
        }

        self.owner.store(NO_OWNER, Ordering::Release);
        self.exclusive.store(false, Ordering::Release);
        self.state.store(ChunkState::Free as u8, Ordering::Release);
        Ok(corrupted)
    }

    /// Whether the guard pattern currently deviates from [`GUARD`]
    ///
    /// Diagnostic peek; racy against a holder writing the buffer.
    pub fn is_corrupted(&self) -> bool {
        // SAFETY: The guard region is valid for the chunk's lifetime.
        unsafe { self.guard_trampled() }
    }

    unsafe fn guard_ptr(&self) -> *mut u8 {
        // SAFETY: element_size + GUARD_LEN is within the cell per adopt().
        unsafe { self.cell.as_ptr().add(self.element_size) }
    }

    unsafe fn guard_trampled(&self) -> bool {
        // SAFETY: See guard_ptr.
        unsafe {
            let guard = self.guard_ptr();
            core::slice::from_raw_parts(guard, GUARD_LEN) != GUARD
        }
    }

    unsafe fn write_guard(&self) {
        // SAFETY: See guard_ptr.
        unsafe {
            core::ptr::copy_nonoverlapping(GUARD.as_ptr(), self.guard_ptr(), GUARD_LEN);
        }
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("buffer", &self.cell)
            .field("element_size", &self.element_size)
            .field("state", &self.state())
            .field("owner", &self.owner())
            .field("exclusive", &self.is_exclusive())
            .finish()
    }
}

//! Fixed-capacity chunk pool
//!
//! [`MemoryPool`] carves backend regions into equally sized cells and hands
//! them out through a bounded-wait acquire/release protocol. The chunk table
//! is append-only: indices and in-flight buffers stay valid across growth.

use core::alloc::Layout;
use core::fmt;
use core::ptr::NonNull;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, trace, warn};

use super::chunk::{Chunk, ChunkState, GUARD_LEN, OwnerId};
use super::info::ChunkInfo;
use crate::backend::{Backend, BackendCategory, HeapBackend};
use crate::error::{PoolError, Result};
use crate::utils::{Backoff, align_up, is_power_of_two};
use crate::wait::WaitBudget;

/// Construction parameters for a [`MemoryPool`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Usable bytes per chunk
    pub element_size: usize,
    /// Chunks to provision at creation
    pub capacity: usize,
    /// Fewest chunks an under-provisioned creation may settle for
    pub min_capacity: usize,
    /// Cell alignment, a power of two
    pub align: usize,
}

impl PoolConfig {
    /// Config for `capacity` chunks of `element_size` bytes
    ///
    /// Defaults to requiring the full capacity and pointer alignment.
    pub const fn new(element_size: usize, capacity: usize) -> Self {
        Self {
            element_size,
            capacity,
            min_capacity: capacity,
            align: core::mem::align_of::<usize>(),
        }
    }

    /// Accept a pool of at least `min` chunks when memory is short
    pub const fn min_capacity(mut self, min: usize) -> Self {
        self.min_capacity = min;
        self
    }

    /// Align each cell to `align` bytes
    pub const fn align(mut self, align: usize) -> Self {
        self.align = align;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.element_size == 0 {
            return Err(PoolError::invalid_layout("element size must be non-zero"));
        }
        if !is_power_of_two(self.align) {
            return Err(PoolError::invalid_layout("alignment must be a power of two"));
        }
        if self.min_capacity > self.capacity {
            return Err(PoolError::invalid_layout("min capacity exceeds capacity"));
        }
        Ok(())
    }
}

/// One contiguous slab of cell memory
struct Region {
    ptr: NonNull<u8>,
    layout: Layout,
    /// Whether the backend handed this out (as opposed to caller-provided)
    owned: bool,
}

/// Chunk pool over a pluggable [`Backend`]
///
/// Acquire and release never move memory; a buffer handed out stays at its
/// address until released, including across [`add_memory`](Self::add_memory).
pub struct MemoryPool<B: Backend = HeapBackend> {
    backend: B,
    element_size: usize,
    align: usize,
    /// Stride of one cell: element plus trailing guard, aligned
    cell_size: usize,
    chunks: RwLock<Vec<Chunk>>,
    /// Serializes multi-step transitions (release, block retry). Lock order:
    /// `transition` before `chunks`.
    transition: Mutex<()>,
    /// Signalled whenever a chunk may have become acquirable
    available: Condvar,
    regions: Mutex<Vec<Region>>,
}

// SAFETY: Region pointers are only dereferenced through the chunk protocol;
// all shared mutation goes through the locks and chunk atomics.
unsafe impl<B: Backend> Send for MemoryPool<B> {}
unsafe impl<B: Backend> Sync for MemoryPool<B> {}

impl MemoryPool<HeapBackend> {
    /// Heap-backed pool of `capacity` chunks of `element_size` bytes
    pub fn with_capacity(element_size: usize, capacity: usize) -> Result<Self> {
        Self::create(PoolConfig::new(element_size, capacity), HeapBackend::new(), WaitBudget::FOREVER)
    }
}

impl<B: Backend> MemoryPool<B> {
    /// Creates a pool over `backend` per `config`
    ///
    /// Provisioning first attempts one contiguous region for the full
    /// capacity. If the backend refuses, cells are gathered one at a time
    /// until the capacity is met, the backend is exhausted, or `budget`
    /// expires. A pool below `min_capacity` is torn down and refused.
    pub fn create(config: PoolConfig, backend: B, budget: WaitBudget) -> Result<Self> {
        config.validate()?;

        let align = config.align;
        let cell_size = config
            .element_size
            .checked_add(GUARD_LEN)
            .map(|s| align_up(s, align))
            .ok_or(PoolError::SizeOverflow)?;

        let pool = Self {
            backend,
            element_size: config.element_size,
            align,
            cell_size,
            chunks: RwLock::new(Vec::new()),
            transition: Mutex::new(()),
            available: Condvar::new(),
            regions: Mutex::new(Vec::new()),
        };

        pool.provision(config.capacity, budget)?;

        let got = pool.capacity();
        if got == 0 {
            return Err(PoolError::CreateFailed);
        }
        if got < config.min_capacity {
            // Tear down before reporting; Drop returns the regions.
            return Err(PoolError::min_capacity_not_met(got, config.min_capacity));
        }

        debug!(
            element_size = config.element_size,
            capacity = got,
            cell_size,
            "pool created"
        );
        Ok(pool)
    }

    fn provision(&self, count: usize, budget: WaitBudget) -> Result<()> {
        if count == 0 {
            return Ok(());
        }

        let bulk_size = self.cell_size.checked_mul(count).ok_or(PoolError::SizeOverflow)?;
        let bulk = Layout::from_size_align(bulk_size, self.align)
            .map_err(|_| PoolError::invalid_layout("region layout"))?;

        // SAFETY: Validated non-zero layout.
        if let Ok(region) = unsafe { self.backend.allocate(bulk) } {
            self.adopt_region(region.cast(), bulk, true);
            return Ok(());
        }

        // Contiguous provisioning refused; gather cells one at a time.
        let single = Layout::from_size_align(self.cell_size, self.align)
            .map_err(|_| PoolError::invalid_layout("cell layout"))?;
        let deadline = budget.start();
        for _ in 0..count {
            if deadline.expired() {
                break;
            }
            // SAFETY: Validated non-zero layout.
            match unsafe { self.backend.allocate(single) } {
                Ok(region) => self.adopt_region(region.cast(), single, true),
                Err(_) => break,
            };
        }
        Ok(())
    }

    /// Carves `layout.size()` bytes at `base` into cells and appends them
    fn adopt_region(&self, base: NonNull<u8>, layout: Layout, owned: bool) -> usize {
        let start = align_up(base.as_ptr() as usize, self.align);
        let end = base.as_ptr() as usize + layout.size();

        let mut chunks = self.chunks.write();
        let before = chunks.len();
        let mut cursor = start;
        while cursor + self.cell_size <= end {
            // SAFETY: [cursor, cursor + cell_size) lies within the region,
            // which stays alive for the pool's lifetime, and cells never
            // overlap by construction of the stride.
            let cell = unsafe { NonNull::new_unchecked(cursor as *mut u8) };
            chunks.push(unsafe { Chunk::adopt(cell, self.element_size) });
            cursor += self.cell_size;
        }
        let added = chunks.len() - before;
        drop(chunks);

        self.regions.lock().push(Region { ptr: base, layout, owned });
        if added > 0 {
            // Notify under the transition mutex: a waiter that failed its
            // locked re-check cannot park until we hold the lock, so the
            // signal cannot fall into the gap before its wait.
            let _transition = self.transition.lock();
            self.available.notify_all();
        }
        added
    }

    /// Claims a free chunk for the calling thread, waiting up to `budget`
    ///
    /// The returned buffer holds `element_size` bytes and stays valid until
    /// released. Fails with [`PoolError::AllocationExhausted`] when no chunk
    /// frees up within the budget.
    pub fn acquire(&self, budget: WaitBudget) -> Result<NonNull<u8>> {
        self.acquire_as(budget, OwnerId::current(), false)
    }

    /// Like [`acquire`](Self::acquire), but the claim is ownership-gated:
    /// only the claiming identity may release it
    pub fn acquire_exclusive(&self, budget: WaitBudget) -> Result<NonNull<u8>> {
        self.acquire_as(budget, OwnerId::current(), true)
    }

    /// Claims a free chunk on behalf of an explicit identity
    ///
    /// Ordering between concurrent waiters is unspecified beyond the
    /// index-ascending scan preference; no fairness guarantee is made.
    pub fn acquire_as(&self, budget: WaitBudget, owner: OwnerId, exclusive: bool) -> Result<NonNull<u8>> {
        let deadline = budget.start();
        loop {
            if let Some(buffer) = self.try_claim_any(owner, exclusive) {
                return Ok(buffer);
            }

            let mut guard = self.transition.lock();
            // A release may have signalled between the scan and the lock;
            // re-check before sleeping.
            if let Some(buffer) = self.try_claim_any(owner, exclusive) {
                return Ok(buffer);
            }
            match deadline.remaining() {
                None => self.available.wait(&mut guard),
                Some(rem) => {
                    if rem.is_zero() || self.available.wait_for(&mut guard, rem).timed_out() {
                        drop(guard);
                        // One final scan so even a zero budget makes a full
                        // attempt.
                        return self.try_claim_any(owner, exclusive).ok_or_else(|| {
                            trace!(owner = owner.as_u64(), "acquire budget exhausted");
                            PoolError::AllocationExhausted
                        });
                    }
                }
            }
        }
    }

    /// Single first-fit-by-index pass; lock-free per-chunk check-and-claim
    fn try_claim_any(&self, owner: OwnerId, exclusive: bool) -> Option<NonNull<u8>> {
        let chunks = self.chunks.read();
        // First fit by index keeps reuse dense at the front.
        for chunk in chunks.iter() {
            if chunk.try_claim(owner, exclusive) {
                return Some(chunk.buffer());
            }
        }
        None
    }

    /// Returns `ptr` to the pool on behalf of the calling thread
    ///
    /// The returned flag reports whether the guard bytes were found trampled.
    pub fn release(&self, ptr: NonNull<u8>, budget: WaitBudget) -> Result<bool> {
        self.release_as(ptr, OwnerId::current(), budget)
    }

    /// Returns `ptr` to the pool on behalf of an explicit identity
    ///
    /// Fails with [`PoolError::InvalidTarget`] for pointers the pool never
    /// handed out, [`PoolError::OwnershipViolation`] when an exclusive claim
    /// is released by anyone but its owner, and [`PoolError::LockTimeout`]
    /// when the transition lock stays contended past `budget`. A trampled
    /// guard is reported and logged, then repaired; the chunk returns to
    /// service either way.
    pub fn release_as(&self, ptr: NonNull<u8>, requester: OwnerId, budget: WaitBudget) -> Result<bool> {
        let _transition = match budget.limit() {
            None => self.transition.lock(),
            Some(limit) => self.transition.try_lock_for(limit).ok_or(PoolError::LockTimeout)?,
        };

        let chunks = self.chunks.read();
        let (index, chunk) = chunks
            .iter()
            .enumerate()
            .find(|(_, c)| c.owns(ptr))
            .ok_or(PoolError::InvalidTarget)?;

        let corrupted = chunk.release(requester)?;
        if corrupted {
            warn!(index, "guard bytes overwritten while chunk was held");
        }
        self.available.notify_all();
        Ok(corrupted)
    }

    /// Withholds chunk `index` from acquisition, or returns it to service
    ///
    /// A chunk currently held is never forced: the transition is retried
    /// against the holder until it frees the chunk or `budget` expires.
    /// Returns whether the chunk reached the requested state.
    pub fn set_blocked(&self, index: usize, blocked: bool, budget: WaitBudget) -> bool {
        let deadline = budget.start();
        let mut backoff = Backoff::new();
        loop {
            {
                let _transition = self.transition.lock();
                let chunks = self.chunks.read();
                let Some(chunk) = chunks.get(index) else {
                    return false;
                };
                let done = match (blocked, chunk.state()) {
                    (true, ChunkState::Blocked) | (false, ChunkState::Free) => true,
                    (true, _) => chunk.try_block(),
                    (false, _) => chunk.try_unblock(),
                };
                if done {
                    if !blocked {
                        self.available.notify_all();
                    }
                    return true;
                }
            }
            if deadline.expired() {
                return false;
            }
            backoff.spin_or_yield();
        }
    }

    /// Grows the pool by `count` chunks from the backend
    ///
    /// Existing chunk indices and in-flight buffers are unaffected. Returns
    /// whether any chunk was added.
    pub fn add_memory(&self, count: usize) -> bool {
        if count == 0 {
            return false;
        }
        let Some(size) = self.cell_size.checked_mul(count) else {
            return false;
        };
        let Ok(layout) = Layout::from_size_align(size, self.align) else {
            return false;
        };
        // SAFETY: Validated non-zero layout.
        match unsafe { self.backend.allocate(layout) } {
            Ok(region) => {
                let added = self.adopt_region(region.cast(), layout, true);
                debug!(added, total = self.capacity(), "pool grown");
                added > 0
            }
            Err(err) => {
                trace!(%err, count, "backend refused growth region");
                false
            }
        }
    }

    /// Adopts a caller-provided region of `len` bytes as pool chunks
    ///
    /// The region is never freed by the pool. Returns whether at least one
    /// cell fit after alignment.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes for the
    /// pool's entire lifetime and must not be used by anyone else while
    /// adopted.
    pub unsafe fn add_memory_region(&self, ptr: NonNull<u8>, len: usize) -> bool {
        let Ok(layout) = Layout::from_size_align(len, 1) else {
            return false;
        };
        self.adopt_region(ptr, layout, false) > 0
    }

    /// Total chunks under management
    pub fn capacity(&self) -> usize {
        self.chunks.read().len()
    }

    /// Chunks currently handed out
    pub fn used_count(&self) -> usize {
        self.count_state(ChunkState::Used)
    }

    /// Chunks available for acquisition
    pub fn free_count(&self) -> usize {
        self.count_state(ChunkState::Free)
    }

    /// Chunks withheld from acquisition
    pub fn blocked_count(&self) -> usize {
        self.count_state(ChunkState::Blocked)
    }

    /// Whether no chunk is currently acquirable
    pub fn is_empty(&self) -> bool {
        self.free_count() == 0
    }

    fn count_state(&self, state: ChunkState) -> usize {
        self.chunks.read().iter().filter(|c| c.state() == state).count()
    }

    /// Usable bytes per chunk
    pub const fn element_size(&self) -> usize {
        self.element_size
    }

    /// Stride of one cell, guard and alignment padding included
    pub const fn cell_size(&self) -> usize {
        self.cell_size
    }

    /// The backing allocator
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Lifecycle state of chunk `index`
    ///
    /// Out-of-range indices report [`ChunkState::NotHandled`].
    pub fn chunk_state(&self, index: usize) -> ChunkState {
        self.chunks
            .read()
            .get(index)
            .map_or(ChunkState::NotHandled, Chunk::state)
    }

    /// Diagnostic snapshot of chunk `index`
    pub fn chunk_info(&self, index: usize) -> Option<ChunkInfo> {
        let chunks = self.chunks.read();
        let chunk = chunks.get(index)?;
        Some(ChunkInfo {
            index,
            state: chunk.state(),
            owner: chunk.owner(),
            exclusive: chunk.is_exclusive(),
            corrupted: chunk.is_corrupted(),
            buffer_addr: chunk.buffer().as_ptr() as usize,
        })
    }
}

impl<B: Backend> Drop for MemoryPool<B> {
    fn drop(&mut self) {
        if self.backend.category() != BackendCategory::OwnsAndFrees {
            return;
        }
        let regions = self.regions.get_mut();
        for region in regions.drain(..) {
            if region.owned {
                // SAFETY: Allocated from this backend with this layout and
                // never freed elsewhere; all chunk borrows end with the pool.
                unsafe { self.backend.deallocate(region.ptr, region.layout) };
            }
        }
    }
}

impl<B: Backend> fmt::Debug for MemoryPool<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPool")
            .field("element_size", &self.element_size)
            .field("cell_size", &self.cell_size)
            .field("capacity", &self.capacity())
            .field("used", &self.used_count())
            .field("blocked", &self.blocked_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BumpBackend;

    #[test]
    fn test_create_and_accounting() {
        let pool = MemoryPool::with_capacity(32, 8).unwrap();
        assert_eq!(pool.capacity(), 8);
        assert_eq!(pool.free_count(), 8);
        assert_eq!(pool.used_count(), 0);
        assert_eq!(pool.blocked_count(), 0);
        assert!(!pool.is_empty());
        assert_eq!(pool.element_size(), 32);
        assert!(pool.cell_size() >= 32 + 2);
    }

    #[test]
    fn test_zero_capacity_refused() {
        let err = MemoryPool::with_capacity(32, 0).unwrap_err();
        assert_eq!(err, PoolError::CreateFailed);
    }

    #[test]
    fn test_zero_element_size_refused() {
        let err = MemoryPool::with_capacity(0, 4).unwrap_err();
        assert!(matches!(err, PoolError::InvalidLayout { .. }));
    }

    #[test]
    fn test_acquire_release_roundtrip() {
        let pool = MemoryPool::with_capacity(64, 2).unwrap();
        let a = pool.acquire(WaitBudget::ZERO).unwrap();
        let b = pool.acquire(WaitBudget::ZERO).unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.used_count(), 2);
        assert!(pool.is_empty());

        pool.release(a, WaitBudget::FOREVER).unwrap();
        pool.release(b, WaitBudget::FOREVER).unwrap();
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn test_exhausted_with_zero_budget() {
        let pool = MemoryPool::with_capacity(16, 1).unwrap();
        let _held = pool.acquire(WaitBudget::ZERO).unwrap();
        assert_eq!(pool.acquire(WaitBudget::ZERO), Err(PoolError::AllocationExhausted));
    }

    #[test]
    fn test_release_foreign_pointer_refused() {
        let pool = MemoryPool::with_capacity(16, 1).unwrap();
        let mut outside = [0u8; 16];
        let ptr = NonNull::new(outside.as_mut_ptr()).unwrap();
        assert_eq!(pool.release(ptr, WaitBudget::FOREVER), Err(PoolError::InvalidTarget));
    }

    #[test]
    fn test_double_release_refused() {
        let pool = MemoryPool::with_capacity(16, 2).unwrap();
        let ptr = pool.acquire(WaitBudget::ZERO).unwrap();
        pool.release(ptr, WaitBudget::FOREVER).unwrap();
        assert_eq!(pool.release(ptr, WaitBudget::FOREVER), Err(PoolError::InvalidTarget));
    }

    #[test]
    fn test_min_capacity_not_met() {
        // Room for roughly one cell; the pool needs two.
        let backend = BumpBackend::new(48).unwrap();
        let config = PoolConfig::new(24, 4).min_capacity(2);
        let err = MemoryPool::create(config, backend, WaitBudget::FOREVER).unwrap_err();
        assert!(matches!(err, PoolError::MinCapacityNotMet { got: _, min: 2 }));
    }

    #[test]
    fn test_partial_provisioning_above_minimum() {
        // Bulk region for 8 cells will not fit; per-cell gathering stops at
        // the backend's limit, which still clears the minimum.
        let backend = BumpBackend::new(200).unwrap();
        let config = PoolConfig::new(24, 8).min_capacity(2);
        let pool = MemoryPool::create(config, backend, WaitBudget::FOREVER).unwrap();
        assert!(pool.capacity() >= 2);
        assert!(pool.capacity() < 8);
    }

    #[test]
    fn test_add_memory_grows_in_place() {
        let pool = MemoryPool::with_capacity(32, 2).unwrap();
        let held = pool.acquire(WaitBudget::ZERO).unwrap();

        assert!(pool.add_memory(3));
        assert_eq!(pool.capacity(), 5);
        assert_eq!(pool.used_count(), 1);
        assert_eq!(pool.chunk_state(0), ChunkState::Used);

        // The buffer handed out before growth still releases cleanly.
        pool.release(held, WaitBudget::FOREVER).unwrap();
        assert_eq!(pool.free_count(), 5);
    }

    #[test]
    fn test_add_memory_zero_is_noop() {
        let pool = MemoryPool::with_capacity(32, 2).unwrap();
        assert!(!pool.add_memory(0));
        assert_eq!(pool.capacity(), 2);
    }

    #[test]
    fn test_add_external_region() {
        let pool = MemoryPool::with_capacity(32, 1).unwrap();
        let mut slab = vec![0u8; 256];
        let ptr = NonNull::new(slab.as_mut_ptr()).unwrap();
        assert!(unsafe { pool.add_memory_region(ptr, slab.len()) });
        assert!(pool.capacity() > 1);
        drop(pool);
        // Slab outlives the pool and is untouched by its Drop.
        drop(slab);
    }

    #[test]
    fn test_chunk_state_out_of_range() {
        let pool = MemoryPool::with_capacity(16, 2).unwrap();
        assert_eq!(pool.chunk_state(99), ChunkState::NotHandled);
        assert!(pool.chunk_info(99).is_none());
    }

    #[test]
    fn test_set_blocked_and_unblock() {
        let pool = MemoryPool::with_capacity(16, 3).unwrap();
        assert!(pool.set_blocked(1, true, WaitBudget::ZERO));
        assert_eq!(pool.chunk_state(1), ChunkState::Blocked);
        assert_eq!(pool.blocked_count(), 1);
        assert_eq!(pool.free_count(), 2);

        // Idempotent.
        assert!(pool.set_blocked(1, true, WaitBudget::ZERO));

        assert!(pool.set_blocked(1, false, WaitBudget::ZERO));
        assert_eq!(pool.chunk_state(1), ChunkState::Free);
    }

    #[test]
    fn test_set_blocked_refuses_held_chunk() {
        let pool = MemoryPool::with_capacity(16, 1).unwrap();
        let held = pool.acquire(WaitBudget::ZERO).unwrap();
        assert!(!pool.set_blocked(0, true, WaitBudget::ZERO));
        assert_eq!(pool.chunk_state(0), ChunkState::Used);
        pool.release(held, WaitBudget::FOREVER).unwrap();
    }

    #[test]
    fn test_set_blocked_out_of_range() {
        let pool = MemoryPool::with_capacity(16, 1).unwrap();
        assert!(!pool.set_blocked(7, true, WaitBudget::ZERO));
    }

    #[test]
    fn test_exclusive_release_gate() {
        let pool = MemoryPool::with_capacity(16, 1).unwrap();
        let alice = OwnerId::from_raw(501);
        let bob = OwnerId::from_raw(502);

        let ptr = pool.acquire_as(WaitBudget::ZERO, alice, true).unwrap();
        assert_eq!(pool.release_as(ptr, bob, WaitBudget::FOREVER), Err(PoolError::OwnershipViolation));
        assert_eq!(pool.used_count(), 1);
        pool.release_as(ptr, alice, WaitBudget::FOREVER).unwrap();
        assert_eq!(pool.free_count(), 1);
    }

    #[test]
    fn test_chunk_info_snapshot() {
        let pool = MemoryPool::with_capacity(16, 2).unwrap();
        let ptr = pool.acquire_exclusive(WaitBudget::ZERO).unwrap();

        let info = pool.chunk_info(0).unwrap();
        assert_eq!(info.state, ChunkState::Used);
        assert!(info.exclusive);
        assert_eq!(info.owner, Some(OwnerId::current()));
        assert_eq!(info.buffer_addr, ptr.as_ptr() as usize);
        assert!(!info.corrupted);

        pool.release(ptr, WaitBudget::FOREVER).unwrap();
    }

    #[test]
    fn test_no_op_backend_pool_drop() {
        // A bump backend frees nothing; dropping the pool must not try to
        // return regions to it.
        let backend = BumpBackend::new(1024).unwrap();
        let pool = MemoryPool::create(PoolConfig::new(16, 4), backend, WaitBudget::ZERO).unwrap();
        let ptr = pool.acquire(WaitBudget::ZERO).unwrap();
        pool.release(ptr, WaitBudget::FOREVER).unwrap();
        drop(pool);
    }
}

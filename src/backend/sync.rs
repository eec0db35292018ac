//! Synchronized backend with admission filtering
//!
//! [`SyncBackend`] serializes access to a wrapped backend behind a mutex with
//! a configurable acquisition budget, and consults an [`AllocationFilter`]
//! before each operation. A filter can veto an allocation outright; vetoes
//! are reported as [`PoolError::FilterVetoed`] without touching the inner
//! backend.

use core::alloc::Layout;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::trace;

use super::{Backend, BackendCategory};
use crate::error::{PoolError, Result};
use crate::wait::WaitBudget;

/// Admission control consulted around every backend operation
///
/// `on_pre_alloc` is the veto point; the remaining methods are notifications
/// with no-op defaults.
pub trait AllocationFilter: Send + Sync {
    /// Returns `false` to veto an allocation of `size` bytes
    fn on_pre_alloc(&self, size: usize) -> bool {
        let _ = size;
        true
    }

    /// Called after a successful allocation of `size` bytes
    fn on_alloc(&self, size: usize) {
        let _ = size;
    }

    /// Returns `false` to veto a deallocation of `size` bytes
    ///
    /// A vetoed deallocation leaves the region allocated; the caller keeps
    /// responsibility for it.
    fn on_pre_dealloc(&self, size: usize) -> bool {
        let _ = size;
        true
    }

    /// Called after a deallocation of `size` bytes
    fn on_dealloc(&self, size: usize) {
        let _ = size;
    }
}

/// Filter that admits everything
#[derive(Debug, Clone, Copy, Default)]
pub struct PassFilter;

impl AllocationFilter for PassFilter {}

/// Filter enforcing a total outstanding-bytes quota
///
/// Allocations that would push the outstanding total past the limit are
/// vetoed. Deallocations return their bytes to the budget.
#[derive(Debug)]
pub struct MaxBytesFilter {
    limit: usize,
    current: AtomicUsize,
}

impl MaxBytesFilter {
    /// Creates a filter admitting at most `limit` outstanding bytes
    pub const fn new(limit: usize) -> Self {
        Self { limit, current: AtomicUsize::new(0) }
    }

    /// Bytes currently outstanding
    pub fn current(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    /// Bytes still available under the quota
    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.current())
    }

    /// The configured quota
    pub const fn limit(&self) -> usize {
        self.limit
    }
}

impl AllocationFilter for MaxBytesFilter {
    fn on_pre_alloc(&self, size: usize) -> bool {
        let current = self.current.load(Ordering::Relaxed);
        match current.checked_add(size) {
            Some(next) => next <= self.limit,
            None => false,
        }
    }

    fn on_alloc(&self, size: usize) {
        self.current.fetch_add(size, Ordering::Relaxed);
    }

    fn on_dealloc(&self, size: usize) {
        self.current.fetch_sub(size, Ordering::Relaxed);
    }
}

/// Mutex-serialized backend with a pluggable admission filter
#[derive(Debug)]
pub struct SyncBackend<B, F = PassFilter> {
    inner: B,
    lock: Mutex<()>,
    timeout: Mutex<WaitBudget>,
    filter: F,
}

impl<B: Backend> SyncBackend<B, PassFilter> {
    /// Wraps `inner` with an unbounded lock budget and no filtering
    pub fn new(inner: B) -> Self {
        Self::with_filter(inner, PassFilter)
    }
}

impl<B: Backend, F: AllocationFilter> SyncBackend<B, F> {
    /// Wraps `inner` with `filter` and an unbounded lock budget
    pub fn with_filter(inner: B, filter: F) -> Self {
        Self {
            inner,
            lock: Mutex::new(()),
            timeout: Mutex::new(WaitBudget::FOREVER),
            filter,
        }
    }

    /// Sets the budget applied to lock acquisition on every operation
    pub fn set_default_timeout(&self, budget: WaitBudget) {
        *self.timeout.lock() = budget;
    }

    /// The budget applied to lock acquisition
    pub fn default_timeout(&self) -> WaitBudget {
        *self.timeout.lock()
    }

    /// The installed filter
    pub fn filter(&self) -> &F {
        &self.filter
    }

    /// The wrapped backend
    pub fn inner(&self) -> &B {
        &self.inner
    }

    fn acquire_lock(&self) -> Result<parking_lot::MutexGuard<'_, ()>> {
        let budget = self.default_timeout();
        match budget.limit() {
            None => Ok(self.lock.lock()),
            Some(limit) => self.lock.try_lock_for(limit).ok_or(PoolError::LockTimeout),
        }
    }
}

// SAFETY: All operations on the inner backend happen under the mutex, and
// the filter only sees sizes, never memory.
unsafe impl<B: Backend, F: AllocationFilter> Backend for SyncBackend<B, F> {
    #[inline]
    fn category(&self) -> BackendCategory {
        self.inner.category()
    }

    unsafe fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>> {
        let _guard = self.acquire_lock()?;
        if !self.filter.on_pre_alloc(layout.size()) {
            trace!(size = layout.size(), "allocation vetoed by filter");
            return Err(PoolError::FilterVetoed);
        }
        // SAFETY: Same contract as B::allocate.
        let ptr = unsafe { self.inner.allocate(layout)? };
        self.filter.on_alloc(layout.size());
        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // Deallocations ignore the budget; dropping one would leak.
        let _guard = self.lock.lock();
        if !self.filter.on_pre_dealloc(layout.size()) {
            trace!(size = layout.size(), "deallocation vetoed by filter");
            return;
        }
        // SAFETY: Same contract as B::deallocate.
        unsafe { self.inner.deallocate(ptr, layout) };
        self.filter.on_dealloc(layout.size());
    }

    fn max_size(&self) -> usize {
        self.inner.max_size()
    }
}

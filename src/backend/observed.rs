//! Observed backend
//!
//! A transparent wrapper that invokes observation hooks on every successful
//! allocate/deallocate. Hooks are purely observational: they never change the
//! allocation decision and do not run on failed attempts.

use core::alloc::Layout;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use super::{Backend, BackendCategory};
use crate::error::Result;

/// Observation hooks invoked around backend operations
///
/// Default implementations are no-ops, so a hook only has to name the events
/// it cares about.
pub trait AllocationHook: Send + Sync {
    /// Called after a successful allocation
    fn on_alloc(&self, layout: Layout) {
        let _ = layout;
    }

    /// Called after a deallocation
    fn on_dealloc(&self, layout: Layout) {
        let _ = layout;
    }
}

/// Hook that observes nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

impl AllocationHook for NoopHook {}

/// Hook that counts calls and bytes, for accounting and debugging
#[derive(Debug, Default)]
pub struct CountingHook {
    allocs: AtomicUsize,
    deallocs: AtomicUsize,
    bytes_allocated: AtomicUsize,
    bytes_deallocated: AtomicUsize,
}

impl CountingHook {
    /// Creates a hook with all counters at zero
    pub const fn new() -> Self {
        Self {
            allocs: AtomicUsize::new(0),
            deallocs: AtomicUsize::new(0),
            bytes_allocated: AtomicUsize::new(0),
            bytes_deallocated: AtomicUsize::new(0),
        }
    }

    /// Successful allocations observed
    pub fn allocation_count(&self) -> usize {
        self.allocs.load(Ordering::Relaxed)
    }

    /// Deallocations observed
    pub fn deallocation_count(&self) -> usize {
        self.deallocs.load(Ordering::Relaxed)
    }

    /// Bytes handed out
    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated.load(Ordering::Relaxed)
    }

    /// Bytes returned
    pub fn bytes_deallocated(&self) -> usize {
        self.bytes_deallocated.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero
    pub fn reset(&self) {
        self.allocs.store(0, Ordering::Relaxed);
        self.deallocs.store(0, Ordering::Relaxed);
        self.bytes_allocated.store(0, Ordering::Relaxed);
        self.bytes_deallocated.store(0, Ordering::Relaxed);
    }
}

impl AllocationHook for CountingHook {
    fn on_alloc(&self, layout: Layout) {
        self.allocs.fetch_add(1, Ordering::Relaxed);
        self.bytes_allocated.fetch_add(layout.size(), Ordering::Relaxed);
    }

    fn on_dealloc(&self, layout: Layout) {
        self.deallocs.fetch_add(1, Ordering::Relaxed);
        self.bytes_deallocated.fetch_add(layout.size(), Ordering::Relaxed);
    }
}

/// Backend decorator invoking an [`AllocationHook`] around the inner backend
#[derive(Debug)]
pub struct ObservedBackend<B, H = NoopHook> {
    inner: B,
    hook: H,
}

impl<B: Backend> ObservedBackend<B, NoopHook> {
    /// Wraps `inner` with the no-op hook
    pub fn new(inner: B) -> Self {
        Self { inner, hook: NoopHook }
    }
}

impl<B: Backend, H: AllocationHook> ObservedBackend<B, H> {
    /// Wraps `inner` with `hook`
    pub fn with_hook(inner: B, hook: H) -> Self {
        Self { inner, hook }
    }

    /// The installed hook
    pub fn hook(&self) -> &H {
        &self.hook
    }

    /// The wrapped backend
    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Consumes the decorator and returns the wrapped backend
    pub fn into_inner(self) -> B {
        self.inner
    }
}

// SAFETY: Forwards to the inner backend; hooks observe after the decision is
// made and never touch the returned memory.
unsafe impl<B: Backend, H: AllocationHook> Backend for ObservedBackend<B, H> {
    #[inline]
    fn category(&self) -> BackendCategory {
        self.inner.category()
    }

    unsafe fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>> {
        // SAFETY: Same contract as B::allocate.
        let ptr = unsafe { self.inner.allocate(layout)? };
        self.hook.on_alloc(layout);
        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Same contract as B::deallocate.
        unsafe { self.inner.deallocate(ptr, layout) };
        self.hook.on_dealloc(layout);
    }

    fn max_size(&self) -> usize {
        self.inner.max_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeapBackend;

    #[test]
    fn test_counts_successful_operations() {
        let backend = ObservedBackend::with_hook(HeapBackend::new(), CountingHook::new());
        let layout = Layout::from_size_align(128, 8).unwrap();

        unsafe {
            let ptr = backend.allocate(layout).unwrap();
            backend.deallocate(ptr.cast(), layout);
        }

        assert_eq!(backend.hook().allocation_count(), 1);
        assert_eq!(backend.hook().deallocation_count(), 1);
        assert_eq!(backend.hook().bytes_allocated(), 128);
        assert_eq!(backend.hook().bytes_deallocated(), 128);
    }

    #[test]
    fn test_failed_allocation_not_observed() {
        let backend = ObservedBackend::with_hook(HeapBackend::new(), CountingHook::new());
        let layout = Layout::from_size_align(0, 1).unwrap();

        unsafe {
            assert!(backend.allocate(layout).is_err());
        }
        assert_eq!(backend.hook().allocation_count(), 0);
    }

    #[test]
    fn test_category_is_transparent() {
        let backend = ObservedBackend::new(HeapBackend::new());
        assert_eq!(backend.category(), BackendCategory::OwnsAndFrees);
    }
}

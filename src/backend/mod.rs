//! Region backends
//!
//! A [`Backend`] is the raw memory source a pool draws bulk regions from.
//! The trait is a closed abstraction over a small set of strategies chosen at
//! construction time:
//!
//! - [`HeapBackend`]: the process heap; owns and frees what it returns
//! - [`BumpBackend`]: a fixed buffer with a monotonic cursor; never frees
//! - [`MultiRegionBackend`]: a fixed set of independently-cursored regions
//!
//! Two wrappers compose over any backend without changing its decisions:
//! [`ObservedBackend`] adds observation hooks, [`SyncBackend`] adds mutual
//! exclusion with a bounded wait and a pre/post allocation filter policy.

mod bump;
mod heap;
mod multi_region;
mod observed;
mod sync;

pub use bump::BumpBackend;
pub use heap::HeapBackend;
pub use multi_region::MultiRegionBackend;
pub use observed::{AllocationHook, CountingHook, NoopHook, ObservedBackend};
pub use sync::{AllocationFilter, MaxBytesFilter, PassFilter, SyncBackend};

use core::alloc::Layout;
use core::ptr::NonNull;
use std::sync::Arc;

use crate::error::{PoolError, Result};

/// Deallocation semantics of a backend, resolved at compose time
///
/// An `OwnsAndFrees` backend takes responsibility for every region it hands
/// out and expects it back through [`Backend::deallocate`]. A `NoOpOnFree`
/// backend returns memory without taking deallocation responsibility; its
/// `deallocate` is a guaranteed no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendCategory {
    /// The backend owns returned regions and frees them on `deallocate`
    OwnsAndFrees,
    /// `deallocate` is a guaranteed no-op (bump-style strategies)
    NoOpOnFree,
}

/// Raw allocation strategy supplying bulk regions
///
/// A backend never retries internally: exhaustion is reported immediately as
/// [`PoolError::AllocationExhausted`] and the caller decides whether to wait,
/// grow, or give up.
///
/// # Safety
/// Implementors must ensure that:
/// - Returned pointers are valid for reads and writes of `layout.size()`
///   bytes and aligned to `layout.align()`
/// - Returned regions do not overlap while allocated
/// - For [`BackendCategory::OwnsAndFrees`], `deallocate` with the original
///   layout releases the region; passing an address the backend did not
///   return is undefined behavior
/// - For [`BackendCategory::NoOpOnFree`], `deallocate` has no effect
pub unsafe trait Backend: Send + Sync {
    /// Deallocation semantics of this backend
    fn category(&self) -> BackendCategory;

    /// Allocates a region of at least `layout.size()` bytes
    ///
    /// # Safety
    /// The returned memory is uninitialized and must be initialized before
    /// use.
    ///
    /// # Errors
    /// [`PoolError::AllocationExhausted`] when the backend has no capacity,
    /// [`PoolError::InvalidLayout`] for a zero-sized request.
    unsafe fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>>;

    /// Releases a previously returned region
    ///
    /// # Safety
    /// `ptr` must have been returned by this backend with this exact
    /// `layout`, and must not be used afterwards. No-op for
    /// [`BackendCategory::NoOpOnFree`] backends.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);

    /// Total capacity of this backend in bytes, for diagnostics only
    fn max_size(&self) -> usize;
}

/// Rejects requests no backend in this crate can satisfy
#[inline]
pub(crate) fn validate_layout(layout: Layout) -> Result<()> {
    if layout.size() == 0 {
        return Err(PoolError::invalid_layout("zero-sized region"));
    }
    Ok(())
}

// SAFETY: Forwards every call to the underlying T: Backend; no new unsafe
// operations are introduced and all contracts are preserved by delegation.
unsafe impl<T: Backend + ?Sized> Backend for &T {
    fn category(&self) -> BackendCategory {
        (**self).category()
    }

    unsafe fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>> {
        // SAFETY: Same contract as T::allocate.
        unsafe { (**self).allocate(layout) }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Same contract as T::deallocate.
        unsafe { (**self).deallocate(ptr, layout) }
    }

    fn max_size(&self) -> usize {
        (**self).max_size()
    }
}

// SAFETY: As above; Arc only adds shared ownership, allocation contracts are
// untouched.
unsafe impl<T: Backend + ?Sized> Backend for Arc<T> {
    fn category(&self) -> BackendCategory {
        (**self).category()
    }

    unsafe fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>> {
        // SAFETY: Same contract as T::allocate.
        unsafe { (**self).allocate(layout) }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Same contract as T::deallocate.
        unsafe { (**self).deallocate(ptr, layout) }
    }

    fn max_size(&self) -> usize {
        (**self).max_size()
    }
}

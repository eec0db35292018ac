//! Heap backend
//!
//! Delegates bulk region requests to the system's default memory allocator.
//! This is the default backend for pools on hosted targets.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;
use std::alloc::System;

use super::{Backend, BackendCategory, validate_layout};
use crate::error::{PoolError, Result};

/// Backend over the system's default allocator
///
/// # Thread Safety
/// The system allocator is inherently thread-safe; this wrapper adds no
/// locking of its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapBackend;

impl HeapBackend {
    /// Creates a new heap backend
    ///
    /// Zero-cost: the backend carries no state.
    #[inline]
    pub const fn new() -> Self {
        HeapBackend
    }
}

// SAFETY: Delegates to the platform allocator, which returns valid, aligned,
// exclusive regions and frees them on dealloc.
unsafe impl Backend for HeapBackend {
    #[inline]
    fn category(&self) -> BackendCategory {
        BackendCategory::OwnsAndFrees
    }

    unsafe fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>> {
        validate_layout(layout)?;

        // SAFETY: layout has non-zero size (validated above).
        let ptr = unsafe { System.alloc(layout) };

        match NonNull::new(ptr) {
            Some(ptr) => Ok(NonNull::slice_from_raw_parts(ptr, layout.size())),
            None => Err(PoolError::AllocationExhausted),
        }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }

        // SAFETY: ptr was returned by this backend with this layout (caller
        // contract).
        unsafe { System.dealloc(ptr.as_ptr(), layout) };
    }

    fn max_size(&self) -> usize {
        isize::MAX as usize
    }
}

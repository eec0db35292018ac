//! Bump backend
//!
//! Operates on a fixed owned buffer with a monotonically advancing cursor.
//! Individual regions are never freed; `deallocate` is a guaranteed no-op.
//! Suitable for attaching a pool to pre-reserved memory on constrained
//! targets.
//!
//! # Safety
//!
//! - The buffer is wrapped in `SyncUnsafeCell` for interior mutability
//! - The atomic cursor is advanced with a CAS loop, so concurrent allocations
//!   receive disjoint ranges
//! - The cursor only moves forward, except through the unsafe [`reset`]
//!
//! [`reset`]: BumpBackend::reset

use core::alloc::Layout;
use core::cell::UnsafeCell;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use super::{Backend, BackendCategory, validate_layout};
use crate::error::{PoolError, Result};
use crate::utils::{Backoff, align_up};

/// Thread-safe wrapper for the memory buffer with interior mutability
#[repr(transparent)]
struct SyncUnsafeCell<T: ?Sized>(UnsafeCell<T>);

// SAFETY: All mutation of the buffer goes through ranges claimed exclusively
// via the atomic cursor CAS; no two allocations overlap.
unsafe impl<T: ?Sized> Sync for SyncUnsafeCell<T> {}

// SAFETY: repr(transparent) over UnsafeCell<T>; sendable whenever T is.
unsafe impl<T: ?Sized + Send> Send for SyncUnsafeCell<T> {}

/// Backend over a fixed buffer that never individually frees
///
/// # Memory Layout
/// ```text
/// [allocated........][cursor→            free            ]
/// start                                                end
/// ```
pub struct BumpBackend {
    /// Owned backing buffer
    memory: Box<SyncUnsafeCell<[u8]>>,
    /// Offset of the next free byte
    cursor: AtomicUsize,
    /// Buffer capacity in bytes
    capacity: usize,
}

impl BumpBackend {
    /// Creates a bump backend over a freshly zeroed buffer of `capacity`
    /// bytes
    ///
    /// # Errors
    /// [`PoolError::InvalidLayout`] for a zero capacity.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(PoolError::invalid_layout("zero-capacity bump buffer"));
        }

        let boxed = vec![0u8; capacity].into_boxed_slice();
        let len = boxed.len();
        let ptr = Box::into_raw(boxed).cast::<u8>();
        // SAFETY: SyncUnsafeCell is repr(transparent) over its inner type, so
        // a Box<[u8]> pointer round-trips as Box<SyncUnsafeCell<[u8]>> with
        // identical layout and ownership.
        let memory: Box<SyncUnsafeCell<[u8]>> = unsafe {
            Box::from_raw(core::ptr::slice_from_raw_parts_mut(ptr, len) as *mut SyncUnsafeCell<[u8]>)
        };

        Ok(Self {
            memory,
            cursor: AtomicUsize::new(0),
            capacity,
        })
    }

    /// Start address of the owned buffer
    #[inline]
    fn base_addr(&self) -> usize {
        self.memory.0.get() as *mut u8 as usize
    }

    /// Bytes not yet handed out
    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity - self.cursor.load(Ordering::Acquire).min(self.capacity)
    }

    /// Bytes handed out so far (including alignment padding)
    #[inline]
    pub fn used(&self) -> usize {
        self.cursor.load(Ordering::Acquire).min(self.capacity)
    }

    /// Rewinds the cursor to the start of the buffer
    ///
    /// # Safety
    /// Every region previously returned by this backend becomes invalid;
    /// the caller must guarantee none of them is still in use.
    pub unsafe fn reset(&self) {
        self.cursor.store(0, Ordering::Release);
    }
}

impl core::fmt::Debug for BumpBackend {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BumpBackend")
            .field("capacity", &self.capacity)
            .field("used", &self.used())
            .finish()
    }
}

// SAFETY: Disjoint ranges are claimed through the CAS loop below; returned
// pointers stay valid for the lifetime of the backend because the buffer is
// owned and never reallocated.
unsafe impl Backend for BumpBackend {
    #[inline]
    fn category(&self) -> BackendCategory {
        BackendCategory::NoOpOnFree
    }

    unsafe fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>> {
        validate_layout(layout)?;

        let mut backoff = Backoff::new();
        loop {
            let current = self.cursor.load(Ordering::Acquire);

            let region_start = align_up(self.base_addr() + current, layout.align());
            let offset = region_start - self.base_addr();
            let end = offset
                .checked_add(layout.size())
                .ok_or(PoolError::SizeOverflow)?;

            if end > self.capacity {
                return Err(PoolError::AllocationExhausted);
            }

            match self.cursor.compare_exchange_weak(
                current,
                end,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    // SAFETY: [offset, end) is within the owned buffer and
                    // exclusively claimed by the successful CAS.
                    let ptr = unsafe { NonNull::new_unchecked(region_start as *mut u8) };
                    return Ok(NonNull::slice_from_raw_parts(ptr, layout.size()));
                }
                Err(_) => backoff.spin(),
            }
        }
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {
        // NoOpOnFree: memory is reclaimed only when the backend is dropped
        // or reset.
    }

    fn max_size(&self) -> usize {
        self.capacity
    }
}

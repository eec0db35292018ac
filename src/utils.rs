//! Utility functions and helpers for cellpool
//!
//! This module provides common utilities used throughout the crate:
//! - Memory alignment helpers
//! - Secure memory zeroing
//! - Backoff for bounded polling loops

use core::ptr;
use core::sync::atomic::{Ordering, compiler_fence};

/// Aligns a value up to the nearest multiple of alignment
///
/// # Examples
/// ```
/// use cellpool::utils::align_up;
///
/// assert_eq!(align_up(7, 8), 8);
/// assert_eq!(align_up(8, 8), 8);
/// assert_eq!(align_up(9, 8), 16);
/// ```
#[inline(always)]
pub const fn align_up(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Checks if a value is aligned to the given alignment
///
/// # Examples
/// ```
/// use cellpool::utils::is_aligned;
///
/// assert!(is_aligned(16, 8));
/// assert!(!is_aligned(17, 8));
/// ```
#[inline(always)]
pub const fn is_aligned(value: usize, alignment: usize) -> bool {
    debug_assert!(alignment.is_power_of_two());
    value & (alignment - 1) == 0
}

/// Check if a number is a power of two (zero is not)
#[inline(always)]
pub const fn is_power_of_two(value: usize) -> bool {
    value != 0 && value & (value - 1) == 0
}

/// Check if a pointer is properly aligned
#[inline(always)]
pub fn is_aligned_ptr<T>(ptr: *const T, alignment: usize) -> bool {
    is_aligned(ptr as usize, alignment)
}

/// Securely zero memory
///
/// The compiler fence keeps the write from being elided even when the
/// buffer is about to be handed to a new owner.
///
/// # Safety
/// `ptr` must be valid for writes of `len` bytes.
#[inline(always)]
pub unsafe fn secure_zero(ptr: *mut u8, len: usize) {
    if len == 0 {
        return;
    }

    // SAFETY: Caller guarantees ptr is valid for writes of len bytes.
    unsafe {
        ptr::write_bytes(ptr, 0, len);
    }
    compiler_fence(Ordering::SeqCst);
}

/// Backoff utility for bounded polling loops
#[derive(Debug, Clone)]
pub struct Backoff {
    current: u32,
    max: u32,
}

impl Backoff {
    /// Create new backoff with default parameters
    #[inline]
    pub fn new() -> Self {
        Self { current: 1, max: 64 }
    }

    /// Create backoff with custom maximum spin
    #[inline]
    pub fn with_max(max: u32) -> Self {
        Self { current: 1, max }
    }

    /// Perform backoff
    #[inline]
    pub fn spin(&mut self) {
        for _ in 0..self.current {
            core::hint::spin_loop();
        }
        if self.current < self.max {
            self.current *= 2;
        }
    }

    /// Reset backoff
    #[inline]
    pub fn reset(&mut self) {
        self.current = 1;
    }

    /// True once the spin count has reached its maximum
    ///
    /// Callers typically switch from spinning to sleeping at this point.
    #[inline]
    pub fn is_saturated(&self) -> bool {
        self.current >= self.max
    }

    /// Spin or yield depending on iteration count
    #[inline]
    pub fn spin_or_yield(&mut self) {
        if self.current < 8 {
            self.spin();
        } else {
            std::thread::yield_now();
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

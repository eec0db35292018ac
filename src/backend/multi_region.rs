//! Multi-region backend
//!
//! A fixed set of independently-cursored regions. A request is served by the
//! first region with enough room, spilling to the next when one fills up.
//! Like [`BumpBackend`], regions never individually free.

use core::alloc::Layout;
use core::ptr::NonNull;

use super::{Backend, BackendCategory, BumpBackend, validate_layout};
use crate::error::{PoolError, Result};

/// Backend over a fixed set of bump regions
///
/// Useful when backing memory is fragmented into several fixed areas (for
/// example separate internal and external RAM banks) that should be drained
/// in order of preference.
#[derive(Debug)]
pub struct MultiRegionBackend {
    regions: Vec<BumpBackend>,
}

impl MultiRegionBackend {
    /// Creates a backend over `region_sizes.len()` regions of the given
    /// sizes, drained in the order given
    ///
    /// # Errors
    /// [`PoolError::InvalidLayout`] when no region is configured or any
    /// region size is zero.
    pub fn new(region_sizes: &[usize]) -> Result<Self> {
        if region_sizes.is_empty() {
            return Err(PoolError::invalid_layout("no regions configured"));
        }

        let regions = region_sizes
            .iter()
            .map(|&size| BumpBackend::new(size))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { regions })
    }

    /// Creates a backend over `count` regions of `region_size` bytes each
    pub fn uniform(count: usize, region_size: usize) -> Result<Self> {
        if count == 0 {
            return Err(PoolError::invalid_layout("no regions configured"));
        }
        Self::new(&vec![region_size; count])
    }

    /// Number of configured regions
    #[inline]
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Bytes not yet handed out, per region
    pub fn remaining_per_region(&self) -> Vec<usize> {
        self.regions.iter().map(BumpBackend::remaining).collect()
    }

    /// Bytes not yet handed out across all regions
    pub fn remaining(&self) -> usize {
        self.regions.iter().map(BumpBackend::remaining).sum()
    }
}

// SAFETY: Each inner region upholds the Backend contract; regions own
// disjoint buffers, so regions handed out never overlap.
unsafe impl Backend for MultiRegionBackend {
    #[inline]
    fn category(&self) -> BackendCategory {
        BackendCategory::NoOpOnFree
    }

    unsafe fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>> {
        validate_layout(layout)?;

        for region in &self.regions {
            // SAFETY: Same contract as this fn; the region validates again.
            match unsafe { region.allocate(layout) } {
                Ok(ptr) => return Ok(ptr),
                Err(PoolError::AllocationExhausted) => continue,
                Err(other) => return Err(other),
            }
        }
        Err(PoolError::AllocationExhausted)
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {
        // NoOpOnFree across all regions.
    }

    fn max_size(&self) -> usize {
        self.regions.iter().map(BumpBackend::max_size).sum()
    }
}

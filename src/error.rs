//! Error types for pool and backend operations
//!
//! All expected failures are signalled through return values; nothing in the
//! crate unwinds for an exhausted backend or a refused release. Corruption is
//! deliberately *not* an error: it is reported as a flag on the successful
//! release path while the pool keeps servicing other chunks.

use thiserror::Error;

/// Result type for pool and backend operations
pub type Result<T> = std::result::Result<T, PoolError>;

/// Pool and backend operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// No capacity became available within the wait budget
    #[error("allocation exhausted: no capacity became available within the wait budget")]
    AllocationExhausted,

    /// The backend could not supply the initial bulk region
    #[error("pool creation failed: backend could not supply the initial region")]
    CreateFailed,

    /// Fewer elements than the configured minimum were obtainable
    #[error("pool reached only {got} of the configured minimum of {min} elements")]
    MinCapacityNotMet {
        /// Elements actually obtained
        got: usize,
        /// Configured minimum
        min: usize,
    },

    /// Release attempted by a non-owner on an exclusive-release chunk
    #[error("release attempted by a non-owner on an exclusive-release chunk")]
    OwnershipViolation,

    /// The address is not managed by this pool
    #[error("address is not managed by this pool")]
    InvalidTarget,

    /// The filter policy rejected the operation before it reached the backend
    #[error("operation rejected by the allocation filter policy")]
    FilterVetoed,

    /// Mutual-exclusion guard could not be acquired within the wait budget
    #[error("lock acquisition timed out")]
    LockTimeout,

    /// Invalid layout parameters
    #[error("invalid layout: {reason}")]
    InvalidLayout {
        /// What was wrong with the layout
        reason: &'static str,
    },

    /// Size calculation overflowed
    #[error("size calculation overflowed")]
    SizeOverflow,
}

impl PoolError {
    /// Create an invalid layout error
    #[inline]
    pub const fn invalid_layout(reason: &'static str) -> Self {
        Self::InvalidLayout { reason }
    }

    /// Create a minimum-capacity failure
    #[inline]
    pub const fn min_capacity_not_met(got: usize, min: usize) -> Self {
        Self::MinCapacityNotMet { got, min }
    }

    /// True when retrying with a larger wait budget (or after growing the
    /// pool) can succeed
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AllocationExhausted | Self::LockTimeout | Self::FilterVetoed
        )
    }

    /// True for exhaustion within the wait budget
    pub const fn is_exhausted(&self) -> bool {
        matches!(self, Self::AllocationExhausted)
    }

    /// True for the ownership gate refusing a release
    pub const fn is_ownership_violation(&self) -> bool {
        matches!(self, Self::OwnershipViolation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = PoolError::min_capacity_not_met(3, 8);
        assert_eq!(
            err.to_string(),
            "pool reached only 3 of the configured minimum of 8 elements"
        );
        assert!(PoolError::AllocationExhausted.to_string().contains("wait budget"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(PoolError::AllocationExhausted.is_retryable());
        assert!(PoolError::LockTimeout.is_retryable());
        assert!(!PoolError::OwnershipViolation.is_retryable());
        assert!(!PoolError::InvalidTarget.is_retryable());
    }
}

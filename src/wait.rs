//! Bounded-wait budgets
//!
//! Every blocking entry point in this crate takes a [`WaitBudget`]: the
//! maximum time the caller is willing to block before the operation fails.
//! A budget is either bounded by a [`Duration`] or infinite.
//!
//! Blocking callers park on a condition wait (or a timed lock acquisition)
//! and recompute the remaining budget from a [`Deadline`] after every
//! wake-up. There is no cancellation token; once the budget is consumed the
//! call fails and control returns to the caller.

use std::time::{Duration, Instant};

/// Maximum time to block while waiting for a resource
///
/// # Examples
/// ```
/// use cellpool::WaitBudget;
/// use std::time::Duration;
///
/// let bounded = WaitBudget::bounded(Duration::from_millis(50));
/// assert!(!bounded.is_infinite());
/// assert!(WaitBudget::FOREVER.is_infinite());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitBudget(Option<Duration>);

impl WaitBudget {
    /// Block indefinitely until the resource becomes available
    pub const FOREVER: Self = Self(None);

    /// Do not block: a single attempt, then give up
    pub const ZERO: Self = Self(Some(Duration::ZERO));

    /// Block for at most `limit`
    #[inline]
    pub const fn bounded(limit: Duration) -> Self {
        Self(Some(limit))
    }

    /// Block for at most `millis` milliseconds
    #[inline]
    pub const fn from_millis(millis: u64) -> Self {
        Self(Some(Duration::from_millis(millis)))
    }

    /// True for the indefinite sentinel
    #[inline]
    pub const fn is_infinite(&self) -> bool {
        self.0.is_none()
    }

    /// The bounded limit, if any
    #[inline]
    pub const fn limit(&self) -> Option<Duration> {
        self.0
    }

    /// Start the clock on this budget
    #[inline]
    pub(crate) fn start(&self) -> Deadline {
        Deadline(self.0.map(|limit| Instant::now() + limit))
    }
}

impl Default for WaitBudget {
    fn default() -> Self {
        Self::FOREVER
    }
}

/// A started wait budget
///
/// Recomputes the remaining budget on every poll iteration so repeated lock
/// attempts share one clock.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline(Option<Instant>);

impl Deadline {
    /// Remaining budget; `None` means unbounded
    #[inline]
    pub(crate) fn remaining(&self) -> Option<Duration> {
        self.0.map(|end| end.saturating_duration_since(Instant::now()))
    }

    /// True once a bounded budget is consumed
    #[inline]
    pub(crate) fn expired(&self) -> bool {
        match self.0 {
            Some(end) => Instant::now() >= end,
            None => false,
        }
    }
}

//! # Expiry
//!
//! Absolute expiration deadlines for cache entries.
//!
//! Deadlines live in the nanosecond domain of whichever [`Timer`] the group
//! was built with, so entries written against a wall clock and entries
//! written against a monotonic clock never mix within one group.
//!
//! [`Timer`]: crate::timer::Timer

use serde::{Deserialize, Serialize};

use crate::timer::Timer;

/// Absolute expiration deadline in timer nanoseconds.
///
/// The zero value means "never expires". Anything else is compared against
/// `Timer::now()` on access.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Expiry(i64);

impl Expiry {
    /// No expiration.
    pub const NONE: Expiry = Expiry(0);

    /// Creates a deadline from absolute nanoseconds; 0 means none.
    #[inline]
    pub const fn from_nanos(nanos: i64) -> Self {
        Expiry(nanos)
    }

    /// Builds a deadline `ttl` past the timer's current reading.
    pub fn after(timer: &dyn Timer, ttl: std::time::Duration) -> Self {
        Expiry(timer.now().saturating_add(ttl.as_nanos() as i64))
    }

    /// Returns the raw nanosecond value.
    #[inline]
    pub const fn as_nanos(&self) -> i64 {
        self.0
    }

    /// Returns true when no deadline is set.
    #[inline]
    pub const fn is_none(&self) -> bool {
        self.0 == 0
    }

    /// Returns true when the deadline has passed at `now`.
    #[inline]
    pub const fn is_expired(&self, now: i64) -> bool {
        self.0 != 0 && self.0 < now
    }
}

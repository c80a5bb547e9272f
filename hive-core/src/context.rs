//! # Call Context
//!
//! Deadline carrier for a single cache operation. The deadline flows into
//! the user loader and every peer RPC issued on the caller's behalf; the
//! engine turns it into `tokio::time::timeout` bounds on those RPCs.
//!
//! Cancellation has no token here: dropping the operation's future is the
//! cancellation. A dropped caller stops waiting, while the load flight it
//! may have started runs to completion for any remaining waiters.

use std::time::{Duration, Instant};

/// Per-call context with an optional absolute deadline.
#[derive(Debug, Clone, Copy, Default)]
pub struct Context {
    deadline: Option<Instant>,
}

impl Context {
    /// Context with no deadline.
    pub fn background() -> Self {
        Context { deadline: None }
    }

    /// Context expiring `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Context {
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Context expiring at an absolute instant.
    pub fn with_deadline(deadline: Instant) -> Self {
        Context {
            deadline: Some(deadline),
        }
    }

    /// The absolute deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` means unbounded, zero means
    /// already expired.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Returns true once the deadline has passed.
    pub fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(Duration::ZERO))
    }
}

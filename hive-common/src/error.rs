//! # Error Taxonomy
//!
//! Purpose: Define the one error type every Hivecache operation surfaces,
//! with a variant per failure class so callers can branch on policy.
//!
//! ## Usage Notes
//!
//! - The type is `Clone + Eq`: a single load flight fans its result out to
//!   every coalesced waiter, so the error must be duplicable. Peer and
//!   loader failures therefore carry their detail as text.
//! - `DeadlineExceeded` is the only peer failure that propagates to the
//!   caller; any other peer error is recorded and recovered by loading
//!   locally.

use thiserror::Error;

/// Result alias used across the workspace.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors surfaced by cache groups, sinks, pickers, and the registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// A group with this name is already registered.
    #[error("duplicate registration of group `{0}`")]
    DuplicateGroup(String),

    /// The process-wide peer picker was already installed.
    #[error("peer picker installed more than once")]
    PickerInstalled,

    /// Empty keys are not addressable on the ring.
    #[error("empty key is not allowed")]
    EmptyKey,

    /// The context deadline elapsed before the operation finished.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// A peer RPC failed for a reason other than its deadline.
    #[error("peer `{peer}` failed: {detail}")]
    Peer { peer: String, detail: String },

    /// The user loader returned an error for a key this process owns.
    #[error("loading `{key}`: {detail}")]
    Loader { key: String, detail: String },

    /// A sink was used out of sequence or handed data it cannot accept.
    #[error("sink: {0}")]
    Sink(String),

    /// One or more peers rejected a broadcast Set/Remove/Clear.
    #[error("{failed} of {total} peers failed: {detail}")]
    FanOut {
        failed: usize,
        total: usize,
        detail: String,
    },

    /// A load flight terminated without publishing a result.
    #[error("load flight aborted")]
    FlightAborted,
}

impl CacheError {
    /// Builds a peer error from any displayable failure.
    pub fn peer(peer: impl Into<String>, err: impl std::fmt::Display) -> Self {
        CacheError::Peer {
            peer: peer.into(),
            detail: err.to_string(),
        }
    }

    /// Builds a loader error from any displayable failure.
    pub fn loader(key: impl Into<String>, err: impl std::fmt::Display) -> Self {
        CacheError::Loader {
            key: key.into(),
            detail: err.to_string(),
        }
    }

    /// Returns true when the error is a deadline or cancellation signal
    /// that must not trigger a local fallback.
    pub fn is_deadline(&self) -> bool {
        matches!(self, CacheError::DeadlineExceeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = CacheError::DuplicateGroup("users".to_string());
        assert_eq!(err.to_string(), "duplicate registration of group `users`");

        let err = CacheError::peer("peer-1", "connection refused");
        assert_eq!(err.to_string(), "peer `peer-1` failed: connection refused");

        let err = CacheError::loader("k1", "backend down");
        assert_eq!(err.to_string(), "loading `k1`: backend down");
    }

    #[test]
    fn test_deadline_classification() {
        assert!(CacheError::DeadlineExceeded.is_deadline());
        assert!(!CacheError::peer("p", "boom").is_deadline());
        assert!(!CacheError::FlightAborted.is_deadline());
    }

    #[test]
    fn test_clone_and_eq() {
        let err = CacheError::FanOut {
            failed: 2,
            total: 3,
            detail: "peer `a` failed: x; peer `b` failed: y".to_string(),
        };
        assert_eq!(err.clone(), err);
    }
}

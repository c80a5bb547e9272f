// hive-common - Shared types for the Hivecache fleet
//
// This crate defines the error taxonomy, wire contract, and timers that
// hive-core and any transport layer agree on.

pub mod error;
pub mod timer;
pub mod types;
pub mod wire;

// Re-export for convenience
pub use error::{CacheError, CacheResult};
pub use timer::{CachedTimer, Monotonic, MonotonicEpoch, Timer, TimerFn, WallClock};
pub use types::Expiry;
pub use wire::{GetRequest, GetResponse, SetRequest};

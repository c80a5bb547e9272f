//! # Hivecache Core
//!
//! Distributed, in-process, read-through cache engine. A fleet of
//! identical processes shares a keyspace: a consistent-hash ring assigns
//! each key one authoritative owner, owners load through a user-supplied
//! [`Getter`] behind a singleflight gate, and every process keeps a
//! byte-budgeted pair of LRU tiers (authoritative main, briefly-mirrored
//! hot).
//!
//! The crate is transport-agnostic: peers are reached through the
//! [`Peer`]/[`PeerPicker`] traits and the serde-ready wire types in
//! `hive-common`; wiring them to HTTP, gRPC, or anything else is the
//! embedder's concern.
//!
//! ```no_run
//! use std::sync::Arc;
//! use hive_core::{new_group, Context, GetterFn, Sink, StringSink, WallClock};
//!
//! # async fn demo() -> hive_core::CacheResult<()> {
//! let users = new_group(
//!     "users",
//!     64 << 20,
//!     Arc::new(GetterFn::new(|_ctx: &Context, key: &str, dest: &mut dyn Sink| {
//!         // Fetch from the backing store here.
//!         dest.set_string(&format!("user:{key}"), hive_core::Expiry::NONE)?;
//!         Ok(())
//!     })),
//!     Arc::new(WallClock),
//! );
//!
//! let mut value = String::new();
//! users
//!     .get(&Context::background(), "alice", &mut StringSink::new(&mut value))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod byteview;
mod cache;
pub mod context;
pub mod group;
pub mod lru;
pub mod peers;
pub mod registry;
pub mod ring;
pub mod singleflight;
pub mod sink;

// Re-export for convenience
pub use byteview::ByteView;
pub use cache::CacheStats;
pub use context::Context;
pub use group::{CacheKind, Getter, GetterFn, Group, StatsSnapshot};
pub use peers::{NoPeers, Peer, PeerPicker, RingPicker, DEFAULT_REPLICAS};
pub use registry::{
    deregister_group, get_group, new_group, register_peer_picker, PickerFactory, Registry,
};
pub use ring::Ring;
pub use singleflight::FlightGroup;
pub use sink::{ByteSink, JsonSink, Sink, StringSink, TruncatingSink};

pub use hive_common::error::{CacheError, CacheResult};
pub use hive_common::timer::{CachedTimer, Monotonic, MonotonicEpoch, Timer, TimerFn, WallClock};
pub use hive_common::types::Expiry;
pub use hive_common::wire::{GetRequest, GetResponse, SetRequest};

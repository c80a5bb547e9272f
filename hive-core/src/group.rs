//! # Group
//!
//! Purpose: Orchestrate one named cache — two byte-accounted tiers, a
//! singleflight gate in front of the loader, and peer dispatch over the
//! consistent-hash picker.
//!
//! ## Control Flow
//!
//! A `get` consults the main tier, then the hot tier, then enters a load
//! flight keyed by the key. Inside the flight: re-check the tiers (the
//! flight may have queued behind a store), ask the picker who owns the
//! key, fetch from the owner if remote (mirroring ~1/8 of results into
//! the hot tier), otherwise run the user loader and install the result in
//! the main tier.
//!
//! ## Failure Policy
//!
//! Peer errors are absorbed: the key is loaded locally and the incident
//! is counted and logged. The two exceptions are deadline expiry, which
//! surfaces so tight-SLA callers fail fast, and local loader errors,
//! which always surface.

use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use futures::future::join_all;
use rand::Rng;
use tracing::warn;

use hive_common::error::{CacheError, CacheResult};
use hive_common::timer::Timer;
use hive_common::types::Expiry;
use hive_common::wire::{GetRequest, SetRequest};

use crate::byteview::ByteView;
use crate::cache::{Cache, CacheStats};
use crate::context::Context;
use crate::peers::{NoPeers, Peer, PeerPicker};
use crate::singleflight::FlightGroup;
use crate::sink::{Sink, ViewSink};

/// User-supplied loader invoked on a cache miss for a key this process
/// owns.
///
/// Called at most once per miss per process under normal operation. Must
/// not reach back into the cache and must be safe to call from any task.
#[async_trait]
pub trait Getter: Send + Sync {
    /// Produces the value for `key` into `dest`, calling exactly one
    /// setter on success.
    async fn get(&self, ctx: &Context, key: &str, dest: &mut dyn Sink) -> anyhow::Result<()>;
}

/// Adapter turning a synchronous closure into a [`Getter`].
pub struct GetterFn<F>(pub F);

impl<F> GetterFn<F>
where
    F: Fn(&Context, &str, &mut dyn Sink) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        GetterFn(f)
    }
}

#[async_trait]
impl<F> Getter for GetterFn<F>
where
    F: Fn(&Context, &str, &mut dyn Sink) -> anyhow::Result<()> + Send + Sync,
{
    async fn get(&self, ctx: &Context, key: &str, dest: &mut dyn Sink) -> anyhow::Result<()> {
        (self.0)(ctx, key, dest)
    }
}

/// Which cache tier to inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    /// Keys this process owns authoritatively.
    Main,
    /// Mirrored entries owned by other peers.
    Hot,
}

/// Group counters. Incremented atomically; read via [`Group::stats`].
#[derive(Debug, Default)]
struct Stats {
    gets: AtomicI64,
    cache_hits: AtomicI64,
    loads: AtomicI64,
    loads_deduped: AtomicI64,
    local_loads: AtomicI64,
    local_load_errs: AtomicI64,
    peer_loads: AtomicI64,
    peer_errors: AtomicI64,
}

/// Point-in-time copy of a group's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Get calls, including cache hits.
    pub gets: i64,
    /// Gets served from either tier, including late hits inside a flight.
    pub cache_hits: i64,
    /// Gets that entered the load path.
    pub loads: i64,
    /// Loads that actually ran rather than joining an existing flight.
    pub loads_deduped: i64,
    /// Successful user-loader invocations.
    pub local_loads: i64,
    /// Failed user-loader invocations.
    pub local_load_errs: i64,
    /// Successful remote fetches.
    pub peer_loads: i64,
    /// Remote fetches that failed and fell back to the local loader.
    pub peer_errors: i64,
}

/// What a load flight delivers to every coalesced waiter.
#[derive(Clone)]
pub(crate) struct LoadReply {
    view: ByteView,
    expire: Expiry,
}

pub(crate) type PickerResolver = Box<dyn Fn() -> Option<Arc<dyn PeerPicker>> + Send + Sync>;

struct GroupShared {
    name: String,
    getter: Arc<dyn Getter>,
    /// Combined byte budget across both tiers; zero disables caching.
    cache_bytes: i64,
    main_cache: Cache,
    hot_cache: Cache,
    load_group: FlightGroup<LoadReply>,
    /// Resolved on first load; groups created before the process picker is
    /// installed pick it up here.
    peers: OnceLock<Arc<dyn PeerPicker>>,
    picker_resolver: Option<PickerResolver>,
    stats: Stats,
}

/// A named, two-tier, singleflight-protected cache.
///
/// Cheap to clone; all clones share the same tiers and counters.
#[derive(Clone)]
pub struct Group {
    shared: Arc<GroupShared>,
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.shared.name)
            .finish()
    }
}

impl Group {
    /// Builds an unregistered group with an explicit peer picker.
    pub fn with_picker(
        name: impl Into<String>,
        cache_bytes: i64,
        getter: Arc<dyn Getter>,
        picker: Arc<dyn PeerPicker>,
        timer: Arc<dyn Timer>,
    ) -> Group {
        let group = Group::with_resolver(name, cache_bytes, getter, timer, None);
        let _ = group.shared.peers.set(picker);
        group
    }

    pub(crate) fn with_resolver(
        name: impl Into<String>,
        cache_bytes: i64,
        getter: Arc<dyn Getter>,
        timer: Arc<dyn Timer>,
        picker_resolver: Option<PickerResolver>,
    ) -> Group {
        Group {
            shared: Arc::new(GroupShared {
                name: name.into(),
                getter,
                cache_bytes,
                main_cache: Cache::new(Arc::clone(&timer)),
                hot_cache: Cache::new(timer),
                load_group: FlightGroup::new(),
                peers: OnceLock::new(),
                picker_resolver,
                stats: Stats::default(),
            }),
        }
    }

    /// The group's registered name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Fetches `key`, delivering the value into `dest`.
    ///
    /// Serves from the tiers when possible; otherwise at most one load per
    /// key runs in this process at a time and every concurrent caller
    /// receives its result.
    pub async fn get(&self, ctx: &Context, key: &str, dest: &mut dyn Sink) -> CacheResult<()> {
        let shared = &self.shared;
        shared.stats.gets.fetch_add(1, Ordering::Relaxed);
        if ctx.is_expired() {
            return Err(CacheError::DeadlineExceeded);
        }

        if let Some(view) = shared.lookup_cache(key) {
            shared.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            return dest.set_view(view, Expiry::NONE);
        }

        let reply = self.load(ctx, key).await?;
        dest.set_view(reply.view, reply.expire)
    }

    async fn load(&self, ctx: &Context, key: &str) -> CacheResult<LoadReply> {
        let shared = &self.shared;
        shared.stats.loads.fetch_add(1, Ordering::Relaxed);

        let flight_shared = Arc::clone(shared);
        let flight_key = key.to_string();
        let flight_ctx = *ctx;
        let (result, _was_shared) = shared
            .load_group
            .work(key, move || async move {
                // This flight may have queued behind a store for the same
                // key; serve the stored value instead of loading twice.
                if let Some(view) = flight_shared.lookup_cache(&flight_key) {
                    flight_shared.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(LoadReply {
                        view,
                        expire: Expiry::NONE,
                    });
                }
                flight_shared
                    .stats
                    .loads_deduped
                    .fetch_add(1, Ordering::Relaxed);
                flight_shared.load_slow(flight_ctx, flight_key).await
            })
            .await;
        result
    }

    /// Installs `value` on the key's owner.
    ///
    /// Remote owner: issues the `Set` RPC, then (with `hot`) mirrors the
    /// value into the local hot tier so subsequent local reads skip the
    /// round trip. Local owner: installs into the main tier; `hot` adds
    /// nothing.
    pub async fn set(
        &self,
        ctx: &Context,
        key: &str,
        value: ByteView,
        expire: Expiry,
        hot: bool,
    ) -> CacheResult<()> {
        let shared = &self.shared;
        if key.is_empty() {
            return Err(CacheError::EmptyKey);
        }

        let reply = LoadReply {
            view: value,
            expire,
        };
        if let Some(peer) = shared.picker().pick_peer(key) {
            let request = SetRequest::new(shared.name.clone(), key, reply.view.to_vec(), expire);
            shared.bounded(ctx, peer.set(ctx, &request)).await?;
            if hot {
                shared
                    .load_group
                    .lock(|| shared.populate(&shared.hot_cache, key, &reply));
            }
            return Ok(());
        }

        shared
            .load_group
            .lock(|| shared.populate(&shared.main_cache, key, &reply));
        Ok(())
    }

    /// Deletes `key` locally and on every peer.
    ///
    /// Best effort: failures are joined into [`CacheError::FanOut`] and
    /// the fleet may be left divergent.
    pub async fn remove(&self, ctx: &Context, key: &str) -> CacheResult<()> {
        let shared = &self.shared;
        if key.is_empty() {
            return Err(CacheError::EmptyKey);
        }

        shared.load_group.lock(|| {
            shared.main_cache.remove(key);
            shared.hot_cache.remove(key);
        });

        let request = GetRequest::new(shared.name.clone(), key);
        let peers = shared.picker().get_all();
        let total = peers.len();
        let results = join_all(peers.iter().map(|peer| {
            let request = &request;
            async move {
                shared
                    .bounded(ctx, peer.remove(ctx, request))
                    .await
                    .map_err(|err| (peer.id().to_string(), err))
            }
        }))
        .await;
        shared.join_fanout(total, results)
    }

    /// Empties both local tiers and every peer's tiers for this group.
    pub async fn clear(&self, ctx: &Context) -> CacheResult<()> {
        let shared = &self.shared;

        shared.load_group.lock(|| {
            shared.main_cache.clear();
            shared.hot_cache.clear();
        });

        let request = GetRequest::new(shared.name.clone(), "");
        let peers = shared.picker().get_all();
        let total = peers.len();
        let results = join_all(peers.iter().map(|peer| {
            let request = &request;
            async move {
                shared
                    .bounded(ctx, peer.clear(ctx, request))
                    .await
                    .map_err(|err| (peer.id().to_string(), err))
            }
        }))
        .await;
        shared.join_fanout(total, results)
    }

    /// Snapshot of the group counters.
    pub fn stats(&self) -> StatsSnapshot {
        let stats = &self.shared.stats;
        StatsSnapshot {
            gets: stats.gets.load(Ordering::Relaxed),
            cache_hits: stats.cache_hits.load(Ordering::Relaxed),
            loads: stats.loads.load(Ordering::Relaxed),
            loads_deduped: stats.loads_deduped.load(Ordering::Relaxed),
            local_loads: stats.local_loads.load(Ordering::Relaxed),
            local_load_errs: stats.local_load_errs.load(Ordering::Relaxed),
            peer_loads: stats.peer_loads.load(Ordering::Relaxed),
            peer_errors: stats.peer_errors.load(Ordering::Relaxed),
        }
    }

    /// Snapshot of one tier's counters.
    pub fn cache_stats(&self, kind: CacheKind) -> CacheStats {
        match kind {
            CacheKind::Main => self.shared.main_cache.stats(),
            CacheKind::Hot => self.shared.hot_cache.stats(),
        }
    }
}

impl GroupShared {
    fn picker(&self) -> Arc<dyn PeerPicker> {
        Arc::clone(self.peers.get_or_init(|| {
            self.picker_resolver
                .as_ref()
                .and_then(|resolve| resolve())
                .unwrap_or_else(|| Arc::new(NoPeers))
        }))
    }

    fn lookup_cache(&self, key: &str) -> Option<ByteView> {
        if self.cache_bytes <= 0 {
            return None;
        }
        self.main_cache
            .get(key)
            .or_else(|| self.hot_cache.get(key))
    }

    async fn load_slow(&self, ctx: Context, key: String) -> CacheResult<LoadReply> {
        if let Some(peer) = self.picker().pick_peer(&key) {
            match self.get_from_peer(&ctx, peer.as_ref(), &key).await {
                Ok(reply) => {
                    self.stats.peer_loads.fetch_add(1, Ordering::Relaxed);
                    return Ok(reply);
                }
                Err(err) if err.is_deadline() => return Err(err),
                Err(err) => {
                    self.stats.peer_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        group = %self.name,
                        key = %key,
                        error = %err,
                        "peer load failed, loading locally"
                    );
                }
            }
        }

        let mut sink = ViewSink::new();
        if let Err(err) = self.getter.get(&ctx, &key, &mut sink).await {
            self.stats.local_load_errs.fetch_add(1, Ordering::Relaxed);
            return Err(CacheError::loader(&*key, format!("{err:#}")));
        }
        let (view, expire) = sink.into_parts()?;
        self.stats.local_loads.fetch_add(1, Ordering::Relaxed);

        let reply = LoadReply { view, expire };
        self.load_group
            .lock(|| self.populate(&self.main_cache, &key, &reply));
        Ok(reply)
    }

    async fn get_from_peer(
        &self,
        ctx: &Context,
        peer: &dyn Peer,
        key: &str,
    ) -> CacheResult<LoadReply> {
        let request = GetRequest::new(self.name.clone(), key);
        let response = self.bounded(ctx, peer.get(ctx, &request)).await?;
        let reply = LoadReply {
            view: ByteView::from(response.value),
            expire: response.expire,
        };
        // Mirror roughly one in eight remote loads into the hot tier.
        if rand::thread_rng().gen_range(0..8) == 0 {
            self.load_group
                .lock(|| self.populate(&self.hot_cache, key, &reply));
        }
        Ok(reply)
    }

    /// Bounds a peer RPC by the context deadline.
    async fn bounded<T>(
        &self,
        ctx: &Context,
        fut: impl Future<Output = CacheResult<T>>,
    ) -> CacheResult<T> {
        match ctx.remaining() {
            None => fut.await,
            Some(remaining) => {
                if remaining.is_zero() {
                    return Err(CacheError::DeadlineExceeded);
                }
                tokio::time::timeout(remaining, fut)
                    .await
                    .map_err(|_| CacheError::DeadlineExceeded)?
            }
        }
    }

    /// Installs a value into a tier and re-establishes the byte budget.
    /// Callers hold the flight-table lock.
    fn populate(&self, tier: &Cache, key: &str, reply: &LoadReply) {
        if self.cache_bytes <= 0 {
            return;
        }
        tier.add(key, reply.view.clone(), reply.expire);
        self.enforce_budget();
    }

    fn enforce_budget(&self) {
        loop {
            let main_bytes = self.main_cache.bytes();
            let hot_bytes = self.hot_cache.bytes();
            if main_bytes + hot_bytes <= self.cache_bytes {
                return;
            }
            // Evict from the larger tier; ties come out of main.
            let removed = if hot_bytes > main_bytes {
                self.hot_cache.remove_oldest()
            } else {
                self.main_cache.remove_oldest()
            };
            if !removed {
                return;
            }
        }
    }

    fn join_fanout(
        &self,
        total: usize,
        results: Vec<Result<(), (String, CacheError)>>,
    ) -> CacheResult<()> {
        let failures: Vec<(String, CacheError)> =
            results.into_iter().filter_map(Result::err).collect();
        if failures.is_empty() {
            return Ok(());
        }
        let detail = failures
            .iter()
            .map(|(peer, err)| format!("{peer}: {err}"))
            .collect::<Vec<_>>()
            .join("; ");
        warn!(
            group = %self.name,
            failed = failures.len(),
            total,
            %detail,
            "broadcast partially failed"
        );
        Err(CacheError::FanOut {
            failed: failures.len(),
            total,
            detail,
        })
    }
}

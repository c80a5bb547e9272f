//! # Byte-Accounted Cache Tier
//!
//! Wraps [`LruMap`] with a lock and byte accounting. A group owns two of
//! these: the main tier for keys this process is authoritative for, and
//! the hot tier mirroring remote-owned keys.
//!
//! `nbytes` tracks `Σ(len(key) + value.len())`. The eviction hook debits
//! it for every entry leaving the map (eviction, replacement, removal, or
//! clear), so the counter stays exact without a second bookkeeping path.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use hive_common::timer::Timer;
use hive_common::types::Expiry;

use crate::byteview::ByteView;
use crate::lru::LruMap;

/// Point-in-time counters for one cache tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Bytes of all keys and values currently resident.
    pub bytes: i64,
    /// Number of resident entries.
    pub items: i64,
    /// Lookups served by this tier.
    pub gets: i64,
    /// Lookups that found a live entry.
    pub hits: i64,
    /// Entries that left the tier, including replacements.
    pub evictions: i64,
}

// Shared with the eviction hook, which runs inside the map.
#[derive(Debug, Default)]
struct TierCounters {
    nbytes: AtomicI64,
    nevict: AtomicI64,
}

pub(crate) struct Cache {
    lru: Mutex<LruMap<String, ByteView>>,
    counters: Arc<TierCounters>,
    nget: AtomicI64,
    nhit: AtomicI64,
}

impl Cache {
    pub(crate) fn new(timer: Arc<dyn Timer>) -> Self {
        let counters = Arc::new(TierCounters::default());
        let hook_counters = Arc::clone(&counters);

        let mut lru: LruMap<String, ByteView> = LruMap::new(0, timer);
        lru.set_on_evicted(Box::new(move |key, value| {
            let size = (key.len() + value.len()) as i64;
            hook_counters.nbytes.fetch_sub(size, Ordering::Relaxed);
            hook_counters.nevict.fetch_add(1, Ordering::Relaxed);
        }));

        Cache {
            lru: Mutex::new(lru),
            counters,
            nget: AtomicI64::new(0),
            nhit: AtomicI64::new(0),
        }
    }

    /// Installs `value` under `key`; replacement adjusts bytes by the
    /// delta through the eviction hook.
    pub(crate) fn add(&self, key: &str, value: ByteView, expire: Expiry) {
        let size = (key.len() + value.len()) as i64;
        let mut lru = self.lru.lock();
        lru.add(key.to_string(), value, expire);
        self.counters.nbytes.fetch_add(size, Ordering::Relaxed);
    }

    pub(crate) fn get(&self, key: &str) -> Option<ByteView> {
        self.nget.fetch_add(1, Ordering::Relaxed);
        let value = self.lru.lock().get(key).cloned();
        if value.is_some() {
            self.nhit.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    pub(crate) fn remove(&self, key: &str) {
        self.lru.lock().remove(key);
    }

    pub(crate) fn remove_oldest(&self) -> bool {
        self.lru.lock().remove_oldest()
    }

    pub(crate) fn clear(&self) {
        self.lru.lock().clear();
    }

    pub(crate) fn bytes(&self) -> i64 {
        self.counters.nbytes.load(Ordering::Relaxed)
    }

    pub(crate) fn items(&self) -> i64 {
        self.lru.lock().len() as i64
    }

    pub(crate) fn stats(&self) -> CacheStats {
        CacheStats {
            bytes: self.bytes(),
            items: self.items(),
            gets: self.nget.load(Ordering::Relaxed),
            hits: self.nhit.load(Ordering::Relaxed),
            evictions: self.counters.nevict.load(Ordering::Relaxed),
        }
    }
}

//! # LRU Map
//!
//! Recency-ordered map with a capacity cap, per-entry expiration, and an
//! eviction callback. Not safe for concurrent use; the byte-accounted
//! cache tier wraps it with a lock.
//!
//! The recency list is index-based over a slot arena: nodes live in a
//! `Vec`, links are slot indices, and a free list recycles slots under
//! churn. No heap pointers, no `unsafe`.

use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::Arc;

use ahash::RandomState;
use hashbrown::HashMap;

use hive_common::timer::Timer;
use hive_common::types::Expiry;

/// Callback invoked with the key and value of every entry leaving the map,
/// whether by eviction, replacement, removal, or clear.
pub type EvictionHook<K, V> = Box<dyn FnMut(&K, &V) + Send>;

#[derive(Debug)]
struct Node<K, V> {
    key: K,
    value: V,
    expires_at: Expiry,
    // Intrusive recency links; head is oldest, tail is most recent.
    prev: Option<usize>,
    next: Option<usize>,
}

/// Ordered key/value map with LRU eviction and expiry-on-access.
pub struct LruMap<K, V> {
    /// Maximum number of entries before the oldest is evicted. Zero means
    /// no limit; eviction is then driven by the caller.
    max_entries: usize,
    timer: Arc<dyn Timer>,
    on_evicted: Option<EvictionHook<K, V>>,
    /// Key -> slot index for O(1) lookup.
    map: HashMap<K, usize, RandomState>,
    /// Dense node storage; `None` slots are free.
    nodes: Vec<Option<Node<K, V>>>,
    /// Free-list for recycling slots.
    free: Vec<usize>,
    /// Oldest entry.
    head: Option<usize>,
    /// Most recently used entry.
    tail: Option<usize>,
}

impl<K: Hash + Eq + Clone, V> LruMap<K, V> {
    /// Creates a map evicting beyond `max_entries` (0 = unbounded), with
    /// expiration checked against `timer`.
    pub fn new(max_entries: usize, timer: Arc<dyn Timer>) -> Self {
        LruMap {
            max_entries,
            timer,
            on_evicted: None,
            map: HashMap::with_hasher(RandomState::new()),
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    /// Installs the eviction callback.
    pub fn set_on_evicted(&mut self, hook: EvictionHook<K, V>) {
        self.on_evicted = Some(hook);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true when the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Inserts or replaces an entry and marks it most recently used.
    ///
    /// Replacing fires the eviction callback for the outgoing value. A new
    /// insert that pushes the map over `max_entries` evicts the oldest
    /// entry.
    pub fn add(&mut self, key: K, value: V, expire: Expiry) {
        if let Some(&idx) = self.map.get(&key) {
            let old = {
                let node = self.nodes[idx].as_mut().expect("mapped slot is live");
                node.expires_at = expire;
                std::mem::replace(&mut node.value, value)
            };
            if let Some(hook) = self.on_evicted.as_mut() {
                hook(&key, &old);
            }
            self.touch(idx);
            return;
        }

        let idx = self.free.pop().unwrap_or_else(|| {
            self.nodes.push(None);
            self.nodes.len() - 1
        });
        self.nodes[idx] = Some(Node {
            key: key.clone(),
            value,
            expires_at: expire,
            prev: None,
            next: None,
        });
        self.link_back(idx);
        self.map.insert(key, idx);

        if self.max_entries != 0 && self.map.len() > self.max_entries {
            self.remove_oldest();
        }
    }

    /// Looks up a key, refreshing its recency.
    ///
    /// An expired entry is removed and reported absent.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let idx = *self.map.get(key)?;
        let expired = self.nodes[idx]
            .as_ref()
            .map(|node| node.expires_at.is_expired(self.timer.now()))
            .unwrap_or(true);
        if expired {
            self.remove_index(idx);
            return None;
        }
        self.touch(idx);
        self.nodes[idx].as_ref().map(|node| &node.value)
    }

    /// Removes a key. Returns true when a live entry was removed; the
    /// eviction callback fires for it.
    pub fn remove<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        match self.map.get(key).copied() {
            Some(idx) => self.remove_index(idx),
            None => false,
        }
    }

    /// Evicts the least recently used entry, if any.
    pub fn remove_oldest(&mut self) -> bool {
        match self.head {
            Some(idx) => self.remove_index(idx),
            None => false,
        }
    }

    /// Removes every entry, firing the eviction callback for each.
    pub fn clear(&mut self) {
        let nodes = std::mem::take(&mut self.nodes);
        for node in nodes.into_iter().flatten() {
            if let Some(hook) = self.on_evicted.as_mut() {
                hook(&node.key, &node.value);
            }
        }
        self.map.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    fn remove_index(&mut self, idx: usize) -> bool {
        self.unlink(idx);
        let node = match self.nodes[idx].take() {
            Some(node) => node,
            None => return false,
        };
        self.map.remove(&node.key);
        self.free.push(idx);
        if let Some(hook) = self.on_evicted.as_mut() {
            hook(&node.key, &node.value);
        }
        true
    }

    /// Detaches `idx` from the recency list.
    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let node = match self.nodes[idx].as_ref() {
                Some(node) => node,
                None => return,
            };
            (node.prev, node.next)
        };

        match prev {
            Some(prev_idx) => {
                if let Some(prev_node) = self.nodes[prev_idx].as_mut() {
                    prev_node.next = next;
                }
            }
            None => self.head = next,
        }

        match next {
            Some(next_idx) => {
                if let Some(next_node) = self.nodes[next_idx].as_mut() {
                    next_node.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = None;
            node.next = None;
        }
    }

    /// Appends `idx` at the most-recently-used end.
    fn link_back(&mut self, idx: usize) {
        let tail = self.tail;
        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = tail;
            node.next = None;
        }

        match tail {
            Some(tail_idx) => {
                if let Some(tail_node) = self.nodes[tail_idx].as_mut() {
                    tail_node.next = Some(idx);
                }
            }
            None => self.head = Some(idx),
        }

        self.tail = Some(idx);
    }

    /// Marks `idx` most recently used.
    fn touch(&mut self, idx: usize) {
        if self.tail == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.link_back(idx);
    }
}

//! # Peers
//!
//! The contract between a group and the rest of its fleet. A [`Peer`] is
//! the client half of another process's transport (HTTP, gRPC, an
//! in-process stub in tests); a [`PeerPicker`] decides which peer owns a
//! key. The engine never sees sockets, only these traits.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use ahash::RandomState;
use hashbrown::HashMap;

use hive_common::error::CacheResult;
use hive_common::wire::{GetRequest, GetResponse, SetRequest};

use crate::context::Context;
use crate::ring::Ring;

/// Virtual nodes per peer on the default ring.
pub const DEFAULT_REPLICAS: usize = 50;

/// Client handle to one remote process in the fleet.
#[async_trait]
pub trait Peer: Send + Sync {
    /// Stable identity of the peer (typically its base URL).
    fn id(&self) -> &str;

    /// Fetches a value from the peer's group.
    async fn get(&self, ctx: &Context, request: &GetRequest) -> CacheResult<GetResponse>;

    /// Installs a value on the peer.
    async fn set(&self, ctx: &Context, request: &SetRequest) -> CacheResult<()>;

    /// Removes a key from the peer's caches.
    async fn remove(&self, ctx: &Context, request: &GetRequest) -> CacheResult<()>;

    /// Clears the peer's caches for the group; the request key is ignored.
    async fn clear(&self, ctx: &Context, request: &GetRequest) -> CacheResult<()>;
}

/// Chooses the authoritative peer for a key.
pub trait PeerPicker: Send + Sync {
    /// Returns the owner's handle, or `None` when this process is
    /// authoritative. An unavailable owner also yields `None`: the key is
    /// served locally rather than retried around the ring.
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn Peer>>;

    /// Every reachable peer, for broadcast operations.
    fn get_all(&self) -> Vec<Arc<dyn Peer>>;
}

/// Picker for a solo process; everything is local.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPeers;

impl PeerPicker for NoPeers {
    fn pick_peer(&self, _key: &str) -> Option<Arc<dyn Peer>> {
        None
    }

    fn get_all(&self) -> Vec<Arc<dyn Peer>> {
        Vec::new()
    }
}

struct RingState {
    ring: Ring,
    /// Fleet member id -> client handle. `None` marks a member that is
    /// known but currently unreachable.
    slots: HashMap<String, Option<Arc<dyn Peer>>, RandomState>,
}

/// Consistent-hash picker over a fleet of peer handles.
///
/// The ring spans every fleet member including this process; picking a key
/// owned by `self_id` (or by a member whose slot is vacant) reports local
/// authority.
pub struct RingPicker {
    self_id: String,
    replicas: usize,
    state: RwLock<RingState>,
}

impl RingPicker {
    /// Creates a picker for the process identified by `self_id`.
    pub fn new(self_id: impl Into<String>, replicas: usize) -> Self {
        let replicas = replicas.max(1);
        RingPicker {
            self_id: self_id.into(),
            replicas,
            state: RwLock::new(RingState {
                ring: Ring::new(replicas),
                slots: HashMap::with_hasher(RandomState::new()),
            }),
        }
    }

    /// Replaces the fleet membership. `slots` lists every member id with
    /// its client handle; the entry for `self_id` (if present) needs no
    /// handle.
    pub fn set_peers(&self, slots: Vec<(String, Option<Arc<dyn Peer>>)>) {
        let mut ring = Ring::new(self.replicas);
        let ids: Vec<&str> = slots.iter().map(|(id, _)| id.as_str()).collect();
        ring.add(&ids);

        let mut state = self.state.write();
        state.ring = ring;
        state.slots = slots.into_iter().collect();
    }
}

impl PeerPicker for RingPicker {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn Peer>> {
        let state = self.state.read();
        let owner = state.ring.owner(key)?;
        if owner == self.self_id {
            return None;
        }
        state.slots.get(owner).cloned().flatten()
    }

    fn get_all(&self) -> Vec<Arc<dyn Peer>> {
        let state = self.state.read();
        state
            .slots
            .iter()
            .filter(|(id, _)| *id != &self.self_id)
            .filter_map(|(_, slot)| slot.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_common::error::CacheError;
    use hive_common::types::Expiry;

    struct StubPeer {
        id: String,
    }

    #[async_trait]
    impl Peer for StubPeer {
        fn id(&self) -> &str {
            &self.id
        }

        async fn get(&self, _ctx: &Context, request: &GetRequest) -> CacheResult<GetResponse> {
            Ok(GetResponse::new(
                format!("{}:{}", self.id, request.key).into_bytes(),
                Expiry::NONE,
            ))
        }

        async fn set(&self, _ctx: &Context, _request: &SetRequest) -> CacheResult<()> {
            Ok(())
        }

        async fn remove(&self, _ctx: &Context, _request: &GetRequest) -> CacheResult<()> {
            Err(CacheError::peer(self.id.as_str(), "unimplemented"))
        }

        async fn clear(&self, _ctx: &Context, _request: &GetRequest) -> CacheResult<()> {
            Ok(())
        }
    }

    fn stub(id: &str) -> Arc<dyn Peer> {
        Arc::new(StubPeer { id: id.to_string() })
    }

    #[test]
    fn test_no_peers_is_always_local() {
        let picker = NoPeers;
        assert!(picker.pick_peer("anything").is_none());
        assert!(picker.get_all().is_empty());
    }

    #[test]
    fn test_ring_picker_routes_remote_and_local() {
        let picker = RingPicker::new("self", DEFAULT_REPLICAS);
        picker.set_peers(vec![
            ("self".to_string(), None),
            ("peer-a".to_string(), Some(stub("peer-a"))),
            ("peer-b".to_string(), Some(stub("peer-b"))),
        ]);

        let mut local = 0;
        let mut remote: HashMap<String, usize, RandomState> =
            HashMap::with_hasher(RandomState::new());
        for i in 0..300 {
            match picker.pick_peer(&format!("key-{i}")) {
                None => local += 1,
                Some(peer) => *remote.entry(peer.id().to_string()).or_default() += 1,
            }
        }
        assert!(local > 0);
        assert_eq!(remote.len(), 2);
    }

    #[test]
    fn test_vacant_slot_falls_back_to_local() {
        let picker = RingPicker::new("self", DEFAULT_REPLICAS);
        picker.set_peers(vec![
            ("self".to_string(), None),
            ("peer-a".to_string(), None),
        ]);

        // Every key routes locally: the only other member is unreachable.
        for i in 0..100 {
            assert!(picker.pick_peer(&format!("key-{i}")).is_none());
        }
        assert!(picker.get_all().is_empty());
    }

    #[test]
    fn test_get_all_excludes_self_and_vacant() {
        let picker = RingPicker::new("self", DEFAULT_REPLICAS);
        picker.set_peers(vec![
            ("self".to_string(), None),
            ("peer-a".to_string(), Some(stub("peer-a"))),
            ("peer-b".to_string(), None),
        ]);

        let all = picker.get_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id(), "peer-a");
    }
}

//! # Registry
//!
//! Process-wide name → group map and the installation point for the peer
//! picker. The registry is an ordinary value so tests build a fresh one;
//! production code uses the free functions, which delegate to a default
//! process-global instance.
//!
//! Groups created before the picker is installed resolve it lazily on
//! their first load; a group keeps only a weak handle back to its
//! registry, so nothing here forms an ownership cycle.

use std::sync::{Arc, OnceLock, Weak};

use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::debug;

use hive_common::error::{CacheError, CacheResult};
use hive_common::timer::Timer;

use crate::group::{Getter, Group, PickerResolver};
use crate::peers::PeerPicker;

/// Builds the process picker on first use.
pub type PickerFactory = Box<dyn Fn() -> Arc<dyn PeerPicker> + Send + Sync>;

struct RegistryShared {
    groups: RwLock<HashMap<String, Group, RandomState>>,
    picker: OnceLock<PickerFactory>,
}

/// Name → group map with a once-installable peer-picker factory.
#[derive(Clone)]
pub struct Registry {
    shared: Arc<RegistryShared>,
}

impl Default for Registry {
    fn default() -> Self {
        Registry {
            shared: Arc::new(RegistryShared {
                groups: RwLock::new(HashMap::with_hasher(RandomState::new())),
                picker: OnceLock::new(),
            }),
        }
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and registers a group.
    ///
    /// Group names are unique for the registry's lifetime; a duplicate is
    /// a construction error.
    pub fn new_group(
        &self,
        name: &str,
        cache_bytes: i64,
        getter: Arc<dyn Getter>,
        timer: Arc<dyn Timer>,
    ) -> CacheResult<Group> {
        let mut groups = self.shared.groups.write();
        if groups.contains_key(name) {
            return Err(CacheError::DuplicateGroup(name.to_string()));
        }

        let source: Weak<RegistryShared> = Arc::downgrade(&self.shared);
        let resolver: PickerResolver = Box::new(move || {
            source
                .upgrade()
                .and_then(|shared| shared.picker.get().map(|factory| factory()))
        });

        let group = Group::with_resolver(name, cache_bytes, getter, timer, Some(resolver));
        groups.insert(name.to_string(), group.clone());
        debug!(group = name, cache_bytes, "registered cache group");
        Ok(group)
    }

    /// Looks up a registered group.
    pub fn get_group(&self, name: &str) -> Option<Group> {
        self.shared.groups.read().get(name).cloned()
    }

    /// Unlinks a group's name. Existing handles keep working; the name
    /// becomes available again.
    pub fn deregister_group(&self, name: &str) -> bool {
        let removed = self.shared.groups.write().remove(name).is_some();
        if removed {
            debug!(group = name, "deregistered cache group");
        }
        removed
    }

    /// Installs the peer-picker factory. May be called once; groups that
    /// already resolved their picker are unaffected.
    pub fn install_peer_picker(&self, factory: PickerFactory) -> CacheResult<()> {
        self.shared
            .picker
            .set(factory)
            .map_err(|_| CacheError::PickerInstalled)
    }
}

fn default_registry() -> &'static Registry {
    static DEFAULT: OnceLock<Registry> = OnceLock::new();
    DEFAULT.get_or_init(Registry::new)
}

/// Creates a group in the process-global registry.
///
/// # Panics
///
/// Panics if `name` is already registered; duplicate registration is a
/// programming error.
pub fn new_group(
    name: &str,
    cache_bytes: i64,
    getter: Arc<dyn Getter>,
    timer: Arc<dyn Timer>,
) -> Group {
    match default_registry().new_group(name, cache_bytes, getter, timer) {
        Ok(group) => group,
        Err(err) => panic!("{err}"),
    }
}

/// Looks up a group in the process-global registry.
pub fn get_group(name: &str) -> Option<Group> {
    default_registry().get_group(name)
}

/// Removes a group's name from the process-global registry.
pub fn deregister_group(name: &str) -> bool {
    default_registry().deregister_group(name)
}

/// Installs the process-global peer-picker factory.
///
/// # Panics
///
/// Panics on a second installation.
pub fn register_peer_picker<F>(factory: F)
where
    F: Fn() -> Arc<dyn PeerPicker> + Send + Sync + 'static,
{
    if default_registry()
        .install_peer_picker(Box::new(factory))
        .is_err()
    {
        panic!("register_peer_picker called more than once");
    }
}

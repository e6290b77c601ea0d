//! Asset listeners
//!
//! Listeners observe load, error and unload events at three scopes: one asset
//! instance, one asset type, or every asset. The cache only keeps weak
//! references, so dropping the last `ListenerRef` unregisters a listener from
//! every scope at once.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::handle::{AnyAssetHandle, UnloadEvent};

/// Observer of asset events
///
/// Callbacks run on whichever thread finished the work, with no cache lock
/// held. Listeners may call back into the cache.
pub trait AssetListener: Send + Sync {
    fn on_loaded(&self, _asset: &AnyAssetHandle, _reloaded: bool) {}

    fn on_error(&self, _asset: &AnyAssetHandle, _reloaded: bool, _message: &str) {}

    /// The asset is gone; only its identity is left
    fn on_unloaded(&self, _asset: &UnloadEvent) {}
}

/// Shared listener reference, as passed to the cache
pub type ListenerRef = Arc<dyn AssetListener>;

fn same_listener(weak: &Weak<dyn AssetListener>, listener: &ListenerRef) -> bool {
    Weak::as_ptr(weak) as *const () == Arc::as_ptr(listener) as *const ()
}

/// Ordered set of weakly held listeners
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: Vec<Weak<dyn AssetListener>>,
}

impl ListenerSet {
    /// Returns false if the listener was already present
    pub(crate) fn insert(&mut self, listener: &ListenerRef) -> bool {
        self.listeners.retain(|weak| weak.strong_count() > 0);
        if self.contains(listener) {
            return false;
        }
        self.listeners.push(Arc::downgrade(listener));
        true
    }

    pub(crate) fn remove(&mut self, listener: &ListenerRef) -> bool {
        let before = self.listeners.len();
        self.listeners
            .retain(|weak| weak.strong_count() > 0 && !same_listener(weak, listener));
        self.listeners.len() != before
    }

    pub(crate) fn contains(&self, listener: &ListenerRef) -> bool {
        self.listeners.iter().any(|weak| same_listener(weak, listener))
    }

    /// Live listeners in registration order
    pub(crate) fn snapshot(&self) -> Vec<ListenerRef> {
        self.listeners.iter().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.listeners.iter().all(|weak| weak.strong_count() == 0)
    }
}

/// Type-scope and global listeners
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    by_type: RwLock<HashMap<TypeId, ListenerSet>>,
    global: RwLock<ListenerSet>,
}

impl ListenerRegistry {
    pub(crate) fn register_type(&self, type_id: TypeId, listener: &ListenerRef) -> bool {
        self.by_type
            .write()
            .entry(type_id)
            .or_default()
            .insert(listener)
    }

    pub(crate) fn register_global(&self, listener: &ListenerRef) -> bool {
        self.global.write().insert(listener)
    }

    /// Remove from the type and global scopes
    pub(crate) fn unregister(&self, listener: &ListenerRef) -> bool {
        let mut removed = false;
        let mut by_type = self.by_type.write();
        for set in by_type.values_mut() {
            removed |= set.remove(listener);
        }
        by_type.retain(|_, set| !set.is_empty());
        drop(by_type);

        removed |= self.global.write().remove(listener);
        removed
    }

    /// Listeners for an asset type, then the global ones
    pub(crate) fn snapshot(&self, type_id: TypeId) -> Vec<ListenerRef> {
        let mut listeners = self
            .by_type
            .read()
            .get(&type_id)
            .map(ListenerSet::snapshot)
            .unwrap_or_default();
        listeners.extend(self.global.read().snapshot());
        listeners
    }
}

/// Event fanned out to a listener snapshot
pub(crate) enum Notification<'a> {
    Loaded {
        asset: &'a AnyAssetHandle,
        reloaded: bool,
    },
    Error {
        asset: &'a AnyAssetHandle,
        reloaded: bool,
        message: &'a str,
    },
    Unloaded(&'a UnloadEvent),
}

impl Notification<'_> {
    pub(crate) fn deliver(&self, listeners: &[ListenerRef]) {
        for listener in listeners {
            match *self {
                Self::Loaded { asset, reloaded } => listener.on_loaded(asset, reloaded),
                Self::Error {
                    asset,
                    reloaded,
                    message,
                } => listener.on_error(asset, reloaded, message),
                Self::Unloaded(event) => listener.on_unloaded(event),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        loaded: AtomicUsize,
    }

    impl AssetListener for Counting {
        fn on_loaded(&self, _asset: &AnyAssetHandle, _reloaded: bool) {
            self.loaded.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_insert_is_idempotent() {
        let listener: ListenerRef = Arc::new(Counting::default());
        let mut set = ListenerSet::default();

        assert!(set.insert(&listener));
        assert!(!set.insert(&listener));
        assert_eq!(set.snapshot().len(), 1);

        assert!(set.remove(&listener));
        assert!(!set.remove(&listener));
        assert!(set.is_empty());
    }

    #[test]
    fn test_dropped_listener_leaves_every_scope() {
        let registry = ListenerRegistry::default();
        let listener: ListenerRef = Arc::new(Counting::default());
        registry.register_type(TypeId::of::<u32>(), &listener);
        registry.register_global(&listener);
        assert_eq!(registry.snapshot(TypeId::of::<u32>()).len(), 2);

        drop(listener);
        assert!(registry.snapshot(TypeId::of::<u32>()).is_empty());
    }

    #[test]
    fn test_type_snapshot_precedes_global() {
        let registry = ListenerRegistry::default();
        let global: ListenerRef = Arc::new(Counting::default());
        let typed: ListenerRef = Arc::new(Counting::default());
        registry.register_global(&global);
        registry.register_type(TypeId::of::<u32>(), &typed);

        let snapshot = registry.snapshot(TypeId::of::<u32>());
        assert!(Arc::ptr_eq(&snapshot[0], &typed));
        assert!(Arc::ptr_eq(&snapshot[1], &global));

        assert_eq!(registry.snapshot(TypeId::of::<u64>()).len(), 1);
        assert!(registry.unregister(&typed));
        assert_eq!(registry.snapshot(TypeId::of::<u32>()).len(), 1);
    }
}

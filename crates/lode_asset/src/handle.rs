//! Asset handles - shared references to cached assets
//!
//! Handles provide:
//! - Reference counting (the last strong handle unloads the asset)
//! - Atomically published load state and reload generation
//! - Weak references that never keep an asset resident
//! - Type erasure for listeners and cache bookkeeping

use core::any::{Any, TypeId};
use core::fmt;
use core::hash::{Hash, Hasher};
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_channel::Sender;
use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::key::AssetKey;

/// Anything that can live in the asset cache
pub trait Asset: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Asset for T {}

/// Unique identifier of one asset instance
///
/// A key that is unloaded and loaded again gets a new id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssetId(pub u64);

impl AssetId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn id(&self) -> u64 {
        self.0
    }
}

/// Load state for an asset
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AssetState {
    /// Created, nothing requested yet
    Empty = 0,
    /// Waiting for a worker
    Queued = 1,
    /// Being read and parsed
    Loading = 2,
    /// Loaded and ready
    Loaded = 3,
    /// Load failed
    Error = 4,
    /// Reload requested, content is stale
    OutOfDate = 5,
}

impl From<u8> for AssetState {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Queued,
            2 => Self::Loading,
            3 => Self::Loaded,
            4 => Self::Error,
            5 => Self::OutOfDate,
            _ => Self::Empty,
        }
    }
}

impl AssetState {
    /// A load has completed, successfully or not
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Loaded | Self::Error)
    }

    /// A load still has to run for this state
    pub(crate) fn needs_load(self) -> bool {
        matches!(self, Self::Empty | Self::Queued | Self::OutOfDate)
    }
}

/// Posted when the last strong handle to an asset is dropped
#[derive(Clone, Debug)]
pub struct UnloadEvent {
    pub id: AssetId,
    pub key: AssetKey,
    pub type_id: TypeId,
    pub type_name: &'static str,
}

/// Bookkeeping shared by every asset regardless of its type
pub struct AssetBase {
    id: AssetId,
    key: AssetKey,
    type_id: TypeId,
    type_name: &'static str,
    state: AtomicU8,
    generation: AtomicU32,
}

impl AssetBase {
    fn new<T: Asset>(id: AssetId, key: AssetKey) -> Self {
        Self {
            id,
            key,
            type_id: TypeId::of::<T>(),
            type_name: core::any::type_name::<T>(),
            state: AtomicU8::new(AssetState::Empty as u8),
            generation: AtomicU32::new(0),
        }
    }

    pub fn id(&self) -> AssetId {
        self.id
    }

    pub fn key(&self) -> &AssetKey {
        &self.key
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Get current load state
    pub fn state(&self) -> AssetState {
        AssetState::from(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: AssetState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Number of completed reloads
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) fn increment_generation(&self) -> u32 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Storage for one asset instance
///
/// Content is swapped as a whole on load and reload, so readers holding an
/// `Arc<T>` snapshot never observe a half-parsed object.
pub struct AssetNode<T: Asset> {
    base: AssetBase,
    content: RwLock<Arc<T>>,
    load_lock: Mutex<()>,
    unload_tx: Option<Sender<UnloadEvent>>,
}

impl<T: Asset> AssetNode<T> {
    pub(crate) fn new(
        id: AssetId,
        key: AssetKey,
        content: T,
        unload_tx: Option<Sender<UnloadEvent>>,
    ) -> Self {
        Self {
            base: AssetBase::new::<T>(id, key),
            content: RwLock::new(Arc::new(content)),
            load_lock: Mutex::new(()),
            unload_tx,
        }
    }

    pub(crate) fn content(&self) -> Arc<T> {
        self.content.read().clone()
    }

    pub(crate) fn replace_content(&self, content: Arc<T>) -> Arc<T> {
        core::mem::replace(&mut *self.content.write(), content)
    }
}

impl<T: Asset> Drop for AssetNode<T> {
    fn drop(&mut self) {
        if let Some(tx) = self.unload_tx.take() {
            // The cache may already be gone
            let _ = tx.send(UnloadEvent {
                id: self.base.id,
                key: self.base.key.clone(),
                type_id: self.base.type_id,
                type_name: self.base.type_name,
            });
        }
    }
}

/// Type-erased view of an [`AssetNode`]
pub trait ErasedAsset: Send + Sync + 'static {
    fn base(&self) -> &AssetBase;

    /// Held for the whole duration of a load or reload
    fn load_lock(&self) -> MutexGuard<'_, ()>;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Asset> ErasedAsset for AssetNode<T> {
    fn base(&self) -> &AssetBase {
        &self.base
    }

    fn load_lock(&self) -> MutexGuard<'_, ()> {
        self.load_lock.lock()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Strong handle to an asset
///
/// The asset stays resident as long as there are strong handles.
pub struct AssetHandle<T: Asset> {
    node: Arc<AssetNode<T>>,
}

impl<T: Asset> AssetHandle<T> {
    pub(crate) fn from_node(node: Arc<AssetNode<T>>) -> Self {
        Self { node }
    }

    /// Create a handle that is not registered in any cache
    ///
    /// Dropping it unloads nothing and notifies nobody.
    pub fn detached(id: AssetId, key: impl Into<AssetKey>, content: T) -> Self {
        Self::from_node(Arc::new(AssetNode::new(id, key.into(), content, None)))
    }

    pub fn id(&self) -> AssetId {
        self.node.base.id
    }

    pub fn key(&self) -> &AssetKey {
        &self.node.base.key
    }

    pub fn state(&self) -> AssetState {
        self.node.base.state()
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == AssetState::Loaded
    }

    /// Get the generation (for detecting reloads)
    pub fn generation(&self) -> u32 {
        self.node.base.generation()
    }

    /// Snapshot of the current content
    pub fn get(&self) -> Arc<T> {
        self.node.content.read().clone()
    }

    /// Replace the content, returning the previous one
    ///
    /// Used by authoring flows between `create` and `save`.
    pub fn set(&self, content: T) -> Arc<T> {
        self.node.replace_content(Arc::new(content))
    }

    /// Number of strong handles to this asset
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.node)
    }

    /// Same underlying asset object
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }

    /// Create a weak handle
    pub fn downgrade(&self) -> WeakAssetHandle<T> {
        WeakAssetHandle {
            node: Arc::downgrade(&self.node),
        }
    }

    /// Cast to an untyped handle
    pub fn untyped(&self) -> AnyAssetHandle {
        AnyAssetHandle {
            node: self.node.clone(),
        }
    }

    pub(crate) fn node(&self) -> &Arc<AssetNode<T>> {
        &self.node
    }
}

impl<T: Asset> Clone for AssetHandle<T> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
        }
    }
}

impl<T: Asset> PartialEq for AssetHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T: Asset> Eq for AssetHandle<T> {}

impl<T: Asset> Hash for AssetHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node.base.id.hash(state);
    }
}

impl<T: Asset> fmt::Debug for AssetHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetHandle")
            .field("id", &self.id())
            .field("key", self.key())
            .field("state", &self.state())
            .field("generation", &self.generation())
            .finish()
    }
}

/// Weak handle to an asset
///
/// Does not keep the asset loaded. Can be upgraded to a strong handle.
pub struct WeakAssetHandle<T: Asset> {
    node: Weak<AssetNode<T>>,
}

impl<T: Asset> WeakAssetHandle<T> {
    /// Try to upgrade to a strong handle
    pub fn upgrade(&self) -> Option<AssetHandle<T>> {
        self.node.upgrade().map(AssetHandle::from_node)
    }

    /// Check if the asset is still alive
    pub fn is_alive(&self) -> bool {
        self.node.strong_count() > 0
    }
}

impl<T: Asset> Clone for WeakAssetHandle<T> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
        }
    }
}

impl<T: Asset> Default for WeakAssetHandle<T> {
    fn default() -> Self {
        Self { node: Weak::new() }
    }
}

/// Untyped strong handle, handed to listeners
#[derive(Clone)]
pub struct AnyAssetHandle {
    node: Arc<dyn ErasedAsset>,
}

impl AnyAssetHandle {
    pub(crate) fn from_erased(node: Arc<dyn ErasedAsset>) -> Self {
        Self { node }
    }

    pub fn id(&self) -> AssetId {
        self.node.base().id
    }

    pub fn key(&self) -> &AssetKey {
        &self.node.base().key
    }

    pub fn state(&self) -> AssetState {
        self.node.base().state()
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == AssetState::Loaded
    }

    pub fn generation(&self) -> u32 {
        self.node.base().generation()
    }

    pub fn type_id(&self) -> TypeId {
        self.node.base().type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.node.base().type_name
    }

    pub fn is<T: Asset>(&self) -> bool {
        self.type_id() == TypeId::of::<T>()
    }

    /// Cast to a typed handle
    pub fn downcast<T: Asset>(&self) -> Option<AssetHandle<T>> {
        self.node
            .clone()
            .into_any()
            .downcast::<AssetNode<T>>()
            .ok()
            .map(AssetHandle::from_node)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl<T: Asset> From<AssetHandle<T>> for AnyAssetHandle {
    fn from(handle: AssetHandle<T>) -> Self {
        Self { node: handle.node }
    }
}

impl fmt::Debug for AnyAssetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyAssetHandle")
            .field("id", &self.id())
            .field("key", self.key())
            .field("type", &self.type_name())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestAsset(i32);

    #[test]
    fn test_handle_basic() {
        let handle = AssetHandle::detached(AssetId::new(42), "a.bin", TestAsset(1));

        assert_eq!(handle.id(), AssetId::new(42));
        assert_eq!(handle.state(), AssetState::Empty);
        assert!(!handle.is_loaded());
        assert_eq!(handle.get().0, 1);
    }

    #[test]
    fn test_handle_clone() {
        let handle1 = AssetHandle::detached(AssetId::new(42), "a.bin", TestAsset(1));
        let handle2 = handle1.clone();

        assert_eq!(handle1, handle2);
        assert_eq!(handle1.strong_count(), 2);

        drop(handle2);
        assert_eq!(handle1.strong_count(), 1);
    }

    #[test]
    fn test_weak_handle() {
        let handle = AssetHandle::detached(AssetId::new(42), "a.bin", TestAsset(1));
        let weak = handle.downgrade();

        assert!(weak.is_alive());
        assert!(weak.upgrade().is_some());

        drop(handle);
        assert!(!weak.is_alive());
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_untyped_roundtrip() {
        let handle = AssetHandle::detached(AssetId::new(1), "a.bin", TestAsset(5));
        let any = handle.untyped();

        assert!(any.is::<TestAsset>());
        assert!(any.downcast::<String>().is_none());
        let back = any.downcast::<TestAsset>().unwrap();
        assert!(back.ptr_eq(&handle));
    }

    #[test]
    fn test_last_drop_posts_unload() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let node = AssetNode::new(AssetId::new(9), AssetKey::path("x.bin"), TestAsset(0), Some(tx));
        let handle = AssetHandle::from_node(Arc::new(node));
        let clone = handle.clone();

        drop(handle);
        assert!(rx.try_recv().is_err());

        drop(clone);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.id, AssetId::new(9));
        assert_eq!(event.key, AssetKey::path("x.bin"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_content_swap() {
        let handle = AssetHandle::detached(AssetId::new(1), "a.bin", TestAsset(1));
        let before = handle.get();
        let previous = handle.set(TestAsset(2));

        assert_eq!(previous.0, 1);
        assert_eq!(before.0, 1);
        assert_eq!(handle.get().0, 2);
    }
}

//! Asset Cache - Central asset management
//!
//! The cache maps every [`AssetKey`] to at most one live asset. It only keeps
//! weak references: an asset stays resident exactly as long as some caller
//! holds a strong [`AssetHandle`]. When the last handle drops, the asset posts
//! an unload event that the cache processes on its next operation or
//! [`AssetCache::update`].
//!
//! Loads run synchronously on the calling thread or asynchronously on the
//! worker pool. Listener callbacks run on whichever thread completed the work,
//! with no cache lock held.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};

use crate::config::AssetCacheConfig;
use crate::error::{AssetError, LoadError, LoadResult, Result};
use crate::file::{ByteSource, DiskFileSystem, EmptySource, FileInfo, FileSystem, SourceRegion};
use crate::handle::{
    AnyAssetHandle, Asset, AssetHandle, AssetId, AssetState, ErasedAsset, UnloadEvent,
};
use crate::key::AssetKey;
use crate::listener::{ListenerRef, ListenerRegistry, ListenerSet, Notification};
use crate::loader::{AssetLoader, ErasedLoader, LoadContext, LoaderRegistry, SaveMode};
use crate::worker::WorkerPool;

#[cfg(feature = "hot-reload")]
use crate::watcher::AssetWatcher;

/// How `get_or_load` performs a missing load
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoadMode {
    /// Read and parse on the calling thread before returning
    #[default]
    Sync,
    /// Queue on the worker pool and return immediately
    Async,
}

/// Identifies a registered reload hook
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ReloadHookId(u64);

type ReloadHook = Arc<dyn Fn(&AnyAssetHandle, &(dyn Any + Send + Sync)) + Send + Sync>;

struct CacheEntry {
    id: AssetId,
    asset: Weak<dyn ErasedAsset>,
    loader: Arc<dyn ErasedLoader>,
    listeners: ListenerSet,
    last_error: Option<String>,
}

/// Entry whose asset died but whose unload event is still in flight
struct Retired {
    loader: Arc<dyn ErasedLoader>,
    listeners: ListenerSet,
}

#[derive(Default)]
struct Entries {
    live: HashMap<AssetKey, CacheEntry>,
    retired: HashMap<AssetId, Retired>,
}

impl Entries {
    /// Entry for `key` if it still belongs to asset `id`
    fn current_mut(&mut self, key: &AssetKey, id: AssetId) -> Option<&mut CacheEntry> {
        self.live.get_mut(key).filter(|entry| entry.id == id)
    }

    fn retire(&mut self, key: &AssetKey) {
        if let Some(stale) = self.live.remove(key) {
            self.retired.insert(
                stale.id,
                Retired {
                    loader: stale.loader,
                    listeners: stale.listeners,
                },
            );
        }
    }
}

/// Outcome delivered to a listener attached after the load finished
enum Settled {
    Loaded,
    Failed(String),
}

impl Settled {
    fn of(state: AssetState, last_error: &Option<String>) -> Option<Self> {
        match state {
            AssetState::Loaded => Some(Self::Loaded),
            AssetState::Error => Some(Self::Failed(
                last_error.clone().unwrap_or_else(|| "load failed".to_string()),
            )),
            _ => None,
        }
    }

    fn deliver(&self, asset: &AnyAssetHandle, listener: &ListenerRef) {
        let listeners = std::slice::from_ref(listener);
        match self {
            Self::Loaded => Notification::Loaded {
                asset,
                reloaded: false,
            }
            .deliver(listeners),
            Self::Failed(message) => Notification::Error {
                asset,
                reloaded: false,
                message,
            }
            .deliver(listeners),
        }
    }
}

/// State reachable from worker jobs
struct Shared {
    fs: Arc<dyn FileSystem>,
    loaders: RwLock<LoaderRegistry>,
    entries: Mutex<Entries>,
    listeners: ListenerRegistry,
    reload_hooks: RwLock<HashMap<TypeId, Vec<(ReloadHookId, ReloadHook)>>>,
    next_id: AtomicU64,
    next_hook: AtomicU64,
    unload_tx: Sender<UnloadEvent>,
    unload_rx: Receiver<UnloadEvent>,
}

impl Shared {
    fn allocate_id(&self) -> AssetId {
        AssetId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Live asset and its loader
    fn live_node(&self, key: &AssetKey) -> Option<(Arc<dyn ErasedAsset>, Arc<dyn ErasedLoader>)> {
        let entries = self.entries.lock();
        let entry = entries.live.get(key)?;
        Some((entry.asset.upgrade()?, entry.loader.clone()))
    }

    /// Register a fresh asset for `key`, replacing a dead entry if present
    fn insert_new(
        &self,
        entries: &mut Entries,
        key: &AssetKey,
        loader: &Arc<dyn ErasedLoader>,
        listener: Option<&ListenerRef>,
    ) -> Arc<dyn ErasedAsset> {
        entries.retire(key);

        let id = self.allocate_id();
        let node = loader.create_node(id, key.clone(), Some(self.unload_tx.clone()));
        let mut listeners = ListenerSet::default();
        if let Some(listener) = listener {
            listeners.insert(listener);
        }

        entries.live.insert(
            key.clone(),
            CacheEntry {
                id,
                asset: Arc::downgrade(&node),
                loader: loader.clone(),
                listeners,
                last_error: None,
            },
        );
        log::debug!("Created {} {} ({:?})", loader.asset_type_name(), key, id);
        node
    }

    /// Publish a final state and snapshot the listeners to notify
    ///
    /// State and listener set change under the same lock, so a listener
    /// attached concurrently is notified exactly once.
    fn publish(
        &self,
        node: &Arc<dyn ErasedAsset>,
        state: AssetState,
        error: Option<String>,
    ) -> (AssetState, Vec<ListenerRef>) {
        let base = node.base();
        let mut entries = self.entries.lock();
        let previous = base.state();
        base.set_state(state);
        let mut listeners = match entries.current_mut(base.key(), base.id()) {
            Some(entry) => {
                entry.last_error = error;
                entry.listeners.snapshot()
            }
            None => Vec::new(),
        };
        drop(entries);

        listeners.extend(self.listeners.snapshot(base.type_id()));
        (previous, listeners)
    }

    fn open_source(
        &self,
        key: &AssetKey,
        loader: &dyn ErasedLoader,
    ) -> LoadResult<(FileInfo, Box<dyn ByteSource>)> {
        let info = loader.resolve_location(key);
        if !info.is_on_disk() {
            return Ok((info, Box::new(EmptySource)));
        }

        let file = self.fs.open_read(&info.file_name).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => LoadError::NotFound(info.file_name.clone()),
            _ => LoadError::ReadFailure(format!("{}: {}", info.file_name, e)),
        })?;

        let source: Box<dyn ByteSource> = if info.data_offset > 0 || info.data_length.is_some() {
            Box::new(SourceRegion::new(file, info.data_offset, info.data_length))
        } else {
            file
        };
        Ok((info, source))
    }

    /// Run the load for `node` unless another thread already finished it
    ///
    /// With `reload` the load always runs and the reload flag is reported.
    fn load(&self, node: &Arc<dyn ErasedAsset>, loader: &Arc<dyn ErasedLoader>, reload: bool) {
        let guard = node.load_lock();
        let base = node.base();
        if reload {
            base.set_state(AssetState::OutOfDate);
        } else if !base.state().needs_load() {
            return;
        }
        base.set_state(AssetState::Loading);

        let result = self
            .open_source(base.key(), loader.as_ref())
            .and_then(|(info, mut source)| {
                let mut ctx = LoadContext::new(base.key(), &info, source.as_mut(), reload);
                loader.load_into(node.as_ref(), &mut ctx)
            });

        let handle = AnyAssetHandle::from_erased(node.clone());
        match result {
            Ok(previous) => {
                if reload {
                    base.increment_generation();
                }
                let (_, listeners) = self.publish(node, AssetState::Loaded, None);
                drop(guard);

                log::debug!(
                    "{} {} (generation {})",
                    if reload { "Reloaded" } else { "Loaded" },
                    base.key(),
                    base.generation()
                );
                if reload {
                    self.run_reload_hooks(&handle, &*previous);
                }
                Notification::Loaded {
                    asset: &handle,
                    reloaded: reload,
                }
                .deliver(&listeners);
            }
            Err(err) => {
                let message = err.to_string();
                log::warn!("Failed to load {}: {}", base.key(), message);
                let (_, listeners) =
                    self.publish(node, AssetState::Error, Some(message.clone()));
                drop(guard);

                Notification::Error {
                    asset: &handle,
                    reloaded: reload,
                    message: &message,
                }
                .deliver(&listeners);
            }
        }
    }

    fn run_reload_hooks(&self, handle: &AnyAssetHandle, previous: &(dyn Any + Send + Sync)) {
        let hooks: Vec<ReloadHook> = self
            .reload_hooks
            .read()
            .get(&handle.type_id())
            .map(|hooks| hooks.iter().map(|(_, hook)| hook.clone()).collect())
            .unwrap_or_default();

        for hook in hooks {
            hook(handle, previous);
        }
    }

    /// Drain unload events posted by dropped handles
    fn process_unloads(&self) -> usize {
        let mut processed = 0;
        while let Ok(event) = self.unload_rx.try_recv() {
            self.unload(event);
            processed += 1;
        }
        processed
    }

    fn unload(&self, event: UnloadEvent) {
        let (loader, mut listeners, release) = {
            let mut entries = self.entries.lock();
            let removed = if entries.current_mut(&event.key, event.id).is_some() {
                entries
                    .live
                    .remove(&event.key)
                    .map(|entry| (entry.loader, entry.listeners))
            } else {
                entries
                    .retired
                    .remove(&event.id)
                    .map(|retired| (retired.loader, retired.listeners))
            };

            let Some((loader, listeners)) = removed else {
                log::debug!("Ignoring unload of untracked asset {:?}", event.id);
                return;
            };
            // A newer asset under the same key keeps the loader's resources
            let release = !entries.live.contains_key(&event.key);
            (loader, listeners.snapshot(), release)
        };

        log::debug!("Unloaded {} ({:?})", event.key, event.id);
        listeners.extend(self.listeners.snapshot(event.type_id));
        Notification::Unloaded(&event).deliver(&listeners);

        if release {
            loader.release(&event.key);
        }
    }
}

/// The asset cache
pub struct AssetCache {
    config: AssetCacheConfig,
    shared: Arc<Shared>,
    workers: WorkerPool,
    #[cfg(feature = "hot-reload")]
    watcher: Mutex<Option<AssetWatcher>>,
}

impl AssetCache {
    /// Cache reading from `config.asset_dir` on disk
    pub fn new(config: AssetCacheConfig) -> Self {
        let fs = Arc::new(DiskFileSystem::new(config.asset_dir.clone()));
        let cache = Self::with_file_system(config, fs);

        #[cfg(feature = "hot-reload")]
        if cache.config.hot_reload {
            match AssetWatcher::new(&cache.config.asset_dir) {
                Ok(watcher) => *cache.watcher.lock() = Some(watcher),
                Err(e) => log::warn!("Hot reload disabled: {}", e),
            }
        }

        cache
    }

    /// Cache reading from an arbitrary file system
    pub fn with_file_system(config: AssetCacheConfig, fs: Arc<dyn FileSystem>) -> Self {
        let (unload_tx, unload_rx) = unbounded();
        let workers = WorkerPool::new(config.worker_threads);

        Self {
            config,
            shared: Arc::new(Shared {
                fs,
                loaders: RwLock::new(LoaderRegistry::new()),
                entries: Mutex::new(Entries::default()),
                listeners: ListenerRegistry::default(),
                reload_hooks: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                next_hook: AtomicU64::new(1),
                unload_tx,
                unload_rx,
            }),
            workers,
            #[cfg(feature = "hot-reload")]
            watcher: Mutex::new(None),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &AssetCacheConfig {
        &self.config
    }

    pub fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.shared.fs
    }

    /// Register a loader
    ///
    /// Meant for startup, before any asset exists.
    pub fn register_loader<L: AssetLoader>(&self, loader: L) {
        if !self.shared.entries.lock().live.is_empty() {
            log::warn!(
                "Loader for {} registered while assets are live",
                core::any::type_name::<L::Asset>()
            );
        }
        self.shared.loaders.write().register(loader);
    }

    fn typed_loader<T: Asset>(&self, key: &AssetKey) -> Result<Arc<dyn ErasedLoader>> {
        self.shared
            .loaders
            .read()
            .find(TypeId::of::<T>(), key.kind())
            .cloned()
            .ok_or(AssetError::NoLoader {
                type_name: core::any::type_name::<T>(),
                key_kind: key.kind().name(),
            })
    }

    fn typed<T: Asset>(node: Arc<dyn ErasedAsset>) -> Result<AssetHandle<T>> {
        let handle = AnyAssetHandle::from_erased(node);
        handle.downcast::<T>().ok_or_else(|| AssetError::TypeMismatch {
            key: handle.key().to_string(),
            cached: handle.type_name(),
            requested: core::any::type_name::<T>(),
        })
    }

    /// Get the asset for `key`, loading it if no live asset exists
    ///
    /// A live asset is returned as is and never loaded twice. `listener` is
    /// attached to the asset instance; if the asset already finished loading
    /// it is told so immediately. Load failures leave the asset in `Error`
    /// and are reported to listeners, not returned here.
    pub fn get_or_load<T: Asset>(
        &self,
        key: impl Into<AssetKey>,
        mode: LoadMode,
        listener: Option<&ListenerRef>,
    ) -> Result<AssetHandle<T>> {
        let key = key.into();
        let loader = self.typed_loader::<T>(&key)?;
        let expected = (TypeId::of::<T>(), core::any::type_name::<T>());
        let node = self.acquire(key, loader, Some(expected), mode, listener)?;
        Self::typed(node)
    }

    /// Like [`get_or_load`](Self::get_or_load) without naming the asset type
    ///
    /// The loader is chosen by key shape, and by extension for path keys.
    pub fn get_or_load_untyped(
        &self,
        key: impl Into<AssetKey>,
        mode: LoadMode,
        listener: Option<&ListenerRef>,
    ) -> Result<AnyAssetHandle> {
        let key = key.into();
        let loader = self
            .shared
            .loaders
            .read()
            .find_untyped(&key)
            .cloned()
            .ok_or(AssetError::NoLoader {
                type_name: "<untyped>",
                key_kind: key.kind().name(),
            })?;
        let node = self.acquire(key, loader, None, mode, listener)?;
        Ok(AnyAssetHandle::from_erased(node))
    }

    fn acquire(
        &self,
        key: AssetKey,
        loader: Arc<dyn ErasedLoader>,
        expected: Option<(TypeId, &'static str)>,
        mode: LoadMode,
        listener: Option<&ListenerRef>,
    ) -> Result<Arc<dyn ErasedAsset>> {
        self.shared.process_unloads();

        let mut entries = self.shared.entries.lock();
        let existing = entries.live.get_mut(&key).and_then(|entry| {
            let node = entry.asset.upgrade()?;
            let late = match listener {
                Some(listener) if entry.listeners.insert(listener) => {
                    Settled::of(node.base().state(), &entry.last_error)
                }
                _ => None,
            };
            Some((node, entry.loader.clone(), late))
        });

        if let Some((node, entry_loader, late)) = existing {
            drop(entries);

            if let Some((type_id, requested)) = expected {
                if node.base().type_id() != type_id {
                    return Err(AssetError::TypeMismatch {
                        key: key.to_string(),
                        cached: node.base().type_name(),
                        requested,
                    });
                }
            }

            if let (Some(settled), Some(listener)) = (late, listener) {
                settled.deliver(&AnyAssetHandle::from_erased(node.clone()), listener);
            }

            // Queued work is taken over; a load in progress is waited for.
            // Created assets stay untouched until saved.
            let state = node.base().state();
            if mode == LoadMode::Sync && matches!(state, AssetState::Queued | AssetState::Loading) {
                self.shared.load(&node, &entry_loader, false);
            }
            return Ok(node);
        }

        let node = self.shared.insert_new(&mut entries, &key, &loader, listener);
        if mode == LoadMode::Async {
            node.base().set_state(AssetState::Queued);
        }
        drop(entries);

        match mode {
            LoadMode::Sync => self.shared.load(&node, &loader, false),
            LoadMode::Async => self.schedule(&node, loader),
        }
        Ok(node)
    }

    fn schedule(&self, node: &Arc<dyn ErasedAsset>, loader: Arc<dyn ErasedLoader>) {
        let weak = Arc::downgrade(node);
        let key = node.base().key().clone();
        let shared = Arc::clone(&self.shared);

        self.workers.spawn(move || match weak.upgrade() {
            Some(node) => shared.load(&node, &loader, false),
            None => log::debug!("Discarding async load of dropped asset {}", key),
        });
    }

    /// Live asset for `key`, without loading
    pub fn find<T: Asset>(&self, key: &AssetKey) -> Option<AssetHandle<T>> {
        self.find_untyped(key)?.downcast::<T>()
    }

    pub fn find_untyped(&self, key: &AssetKey) -> Option<AnyAssetHandle> {
        self.shared.process_unloads();
        self.shared
            .live_node(key)
            .map(|(node, _)| AnyAssetHandle::from_erased(node))
    }

    pub fn contains(&self, key: &AssetKey) -> bool {
        self.find_untyped(key).is_some()
    }

    /// Number of live assets
    pub fn len(&self) -> usize {
        self.shared.process_unloads();
        self.shared
            .entries
            .lock()
            .live
            .values()
            .filter(|entry| entry.asset.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create an empty, unsaved asset for `key`
    ///
    /// Fails if a live asset already exists for `key`.
    pub fn create<T: Asset>(&self, key: impl Into<AssetKey>) -> Result<AssetHandle<T>> {
        let key = key.into();
        let loader = self.typed_loader::<T>(&key)?;
        self.shared.process_unloads();

        let mut entries = self.shared.entries.lock();
        let live = entries
            .live
            .get(&key)
            .is_some_and(|entry| entry.asset.strong_count() > 0);
        if live {
            drop(entries);
            log::error!("Cannot create {}: asset already exists", key);
            return Err(AssetError::PreconditionViolation(format!(
                "asset {} already exists",
                key
            )));
        }

        let node = self.shared.insert_new(&mut entries, &key, &loader, None);
        drop(entries);
        Self::typed(node)
    }

    /// Serialize an asset to its file location
    ///
    /// On success the asset is `Loaded`; if it was not before, listeners get
    /// `on_loaded`.
    pub fn save<T: Asset>(&self, handle: &AssetHandle<T>, mode: SaveMode) -> Result<()> {
        self.shared.process_unloads();
        let key = handle.key();

        let loader = self
            .shared
            .entries
            .lock()
            .current_mut(key, handle.id())
            .map(|entry| entry.loader.clone());
        let Some(loader) = loader else {
            log::error!("Cannot save {}: asset is not registered in this cache", key);
            return Err(AssetError::PreconditionViolation(format!(
                "asset {} is not registered in this cache",
                key
            )));
        };

        let info = loader.resolve_location(key);
        if !info.is_on_disk() || info.data_offset > 0 || info.data_length.is_some() {
            return Err(AssetError::WriteFailure {
                path: key.to_string(),
                reason: "asset does not own a whole file".to_string(),
            });
        }

        let node: Arc<dyn ErasedAsset> = handle.node().clone();
        let guard = node.load_lock();

        let write_failure = |e: io::Error| AssetError::WriteFailure {
            path: info.file_name.clone(),
            reason: e.to_string(),
        };
        let mut sink = self.shared.fs.open_write(&info.file_name).map_err(write_failure)?;
        loader
            .save_from(node.as_ref(), sink.as_mut(), mode)
            .map_err(|reason| AssetError::SaveFailure {
                key: key.to_string(),
                reason,
            })?;
        sink.finish().map_err(write_failure)?;

        let (previous, listeners) = self.shared.publish(&node, AssetState::Loaded, None);
        drop(guard);
        log::debug!("Saved {} to {}", key, info.file_name);

        if previous != AssetState::Loaded {
            Notification::Loaded {
                asset: &handle.untyped(),
                reloaded: false,
            }
            .deliver(&listeners);
        }
        Ok(())
    }

    /// Re-read a live asset in place
    ///
    /// Handles keep pointing at the same asset; its content and generation
    /// change and listeners get `reloaded = true`. Returns false if `key` is
    /// not live.
    pub fn reload(&self, key: &AssetKey) -> bool {
        self.shared.process_unloads();
        let Some((node, loader)) = self.shared.live_node(key) else {
            return false;
        };
        self.shared.load(&node, &loader, true);
        true
    }

    /// Reload every live asset depending on one of `paths`
    pub fn reload_changed<S: AsRef<str>>(&self, paths: &[S]) -> usize {
        self.shared.process_unloads();
        let changed: HashSet<String> = paths
            .iter()
            .map(|p| p.as_ref().replace('\\', "/"))
            .collect();

        let live: Vec<_> = self
            .shared
            .entries
            .lock()
            .live
            .values()
            .filter_map(|entry| Some((entry.asset.upgrade()?, entry.loader.clone())))
            .collect();

        let mut reloaded = 0;
        for (node, loader) in live {
            let affected = loader
                .dependency_files(node.as_ref())
                .iter()
                .any(|file| changed.contains(file));
            if affected {
                self.shared.load(&node, &loader, true);
                reloaded += 1;
            }
        }

        if reloaded > 0 {
            log::info!("Hot reloaded {} asset(s)", reloaded);
        }
        reloaded
    }

    /// Call `hook` after every successful reload of a `T`
    ///
    /// The hook gets the reloaded handle and the content it replaced, so
    /// dependents can swap references to the old content.
    pub fn on_reload<T, F>(&self, hook: F) -> ReloadHookId
    where
        T: Asset,
        F: Fn(&AssetHandle<T>, &Arc<T>) + Send + Sync + 'static,
    {
        let id = ReloadHookId(self.shared.next_hook.fetch_add(1, Ordering::Relaxed));
        let erased: ReloadHook = Arc::new(move |handle, previous| {
            if let (Some(handle), Some(previous)) =
                (handle.downcast::<T>(), previous.downcast_ref::<Arc<T>>())
            {
                hook(&handle, previous);
            }
        });

        self.shared
            .reload_hooks
            .write()
            .entry(TypeId::of::<T>())
            .or_default()
            .push((id, erased));
        id
    }

    pub fn remove_reload_hook(&self, id: ReloadHookId) -> bool {
        let mut hooks = self.shared.reload_hooks.write();
        let mut removed = false;
        for list in hooks.values_mut() {
            let before = list.len();
            list.retain(|(hook_id, _)| *hook_id != id);
            removed |= list.len() != before;
        }
        hooks.retain(|_, list| !list.is_empty());
        removed
    }

    /// Listen to every asset of type `T`
    pub fn register_type_listener<T: Asset>(&self, listener: &ListenerRef) -> bool {
        self.shared
            .listeners
            .register_type(TypeId::of::<T>(), listener)
    }

    /// Listen to every asset
    pub fn register_global_listener(&self, listener: &ListenerRef) -> bool {
        self.shared.listeners.register_global(listener)
    }

    /// Listen to one asset; notified at once if it already finished loading
    pub fn register_instance_listener(&self, asset: &AnyAssetHandle, listener: &ListenerRef) -> bool {
        let late = {
            let mut entries = self.shared.entries.lock();
            match entries.current_mut(asset.key(), asset.id()) {
                Some(entry) => entry
                    .listeners
                    .insert(listener)
                    .then(|| Settled::of(asset.state(), &entry.last_error)),
                None => None,
            }
        };

        match late {
            Some(settled) => {
                if let Some(settled) = settled {
                    settled.deliver(asset, listener);
                }
                true
            }
            None => false,
        }
    }

    pub fn unregister_instance_listener(&self, asset: &AnyAssetHandle, listener: &ListenerRef) -> bool {
        self.shared
            .entries
            .lock()
            .current_mut(asset.key(), asset.id())
            .is_some_and(|entry| entry.listeners.remove(listener))
    }

    /// Remove a listener from every scope
    pub fn unregister_listener(&self, listener: &ListenerRef) -> bool {
        let mut removed = self.shared.listeners.unregister(listener);
        let mut entries = self.shared.entries.lock();
        for entry in entries.live.values_mut() {
            removed |= entry.listeners.remove(listener);
        }
        for retired in entries.retired.values_mut() {
            removed |= retired.listeners.remove(listener);
        }
        removed
    }

    /// Pump the cache once per frame
    ///
    /// Runs queued loads in deferred mode, applies file changes when hot
    /// reload is on and processes unloads. Returns the number of unloads.
    pub fn update(&self) -> usize {
        let mut unloaded = self.shared.process_unloads();
        self.workers.run_pending();

        #[cfg(feature = "hot-reload")]
        {
            let changed = self
                .watcher
                .lock()
                .as_mut()
                .map(AssetWatcher::poll)
                .unwrap_or_default();
            if !changed.is_empty() {
                self.reload_changed(changed.as_slice());
            }
        }

        unloaded += self.shared.process_unloads();
        unloaded
    }

    /// Wait for every queued load, then process unloads
    pub fn flush(&self) {
        self.workers.wait_idle();
        self.shared.process_unloads();
    }

    /// Async loads not yet finished
    pub fn pending_loads(&self) -> usize {
        self.workers.pending()
    }
}

impl Drop for AssetCache {
    fn drop(&mut self) {
        let live = self.len();
        if live > 0 {
            log::debug!("Asset cache dropped with {} live asset(s)", live);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::MemoryFileSystem;
    use crate::listener::AssetListener;
    use std::sync::atomic::AtomicUsize;

    struct Text(String);

    struct TextLoader;

    impl AssetLoader for TextLoader {
        type Asset = Text;

        fn extensions(&self) -> &[&str] {
            &["txt"]
        }

        fn create(&self, _key: &AssetKey) -> Text {
            Text(String::new())
        }

        fn load(&self, asset: &mut Text, ctx: &mut LoadContext) -> LoadResult<()> {
            asset.0 = ctx.read_string()?;
            Ok(())
        }
    }

    #[derive(Default)]
    struct Unloads(AtomicUsize);

    impl AssetListener for Unloads {
        fn on_unloaded(&self, _asset: &UnloadEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn cache() -> (AssetCache, MemoryFileSystem) {
        let fs = MemoryFileSystem::new();
        fs.insert("hello.txt", "Hello, Asset!");
        let cache = AssetCache::with_file_system(
            AssetCacheConfig::default().deferred().with_hot_reload(false),
            Arc::new(fs.clone()),
        );
        cache.register_loader(TextLoader);
        (cache, fs)
    }

    #[test]
    fn test_sync_load() {
        let (cache, _) = cache();
        let handle: AssetHandle<Text> = cache.get_or_load("hello.txt", LoadMode::Sync, None).unwrap();

        assert_eq!(handle.state(), AssetState::Loaded);
        assert_eq!(handle.get().0, "Hello, Asset!");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_async_load_is_queued_until_update() {
        let (cache, _) = cache();
        let handle: AssetHandle<Text> = cache.get_or_load("hello.txt", LoadMode::Async, None).unwrap();

        assert_eq!(handle.state(), AssetState::Queued);
        assert_eq!(cache.pending_loads(), 1);

        cache.update();
        assert!(handle.is_loaded());
        assert_eq!(cache.pending_loads(), 0);
    }

    #[test]
    fn test_missing_file_sets_error() {
        let (cache, _) = cache();
        let handle: AssetHandle<Text> = cache.get_or_load("missing.txt", LoadMode::Sync, None).unwrap();
        assert_eq!(handle.state(), AssetState::Error);
    }

    #[test]
    fn test_no_loader() {
        let (cache, _) = cache();
        let result = cache.get_or_load::<u32>("hello.txt", LoadMode::Sync, None);
        assert!(matches!(result, Err(AssetError::NoLoader { .. })));
    }

    #[test]
    fn test_unload_on_last_drop() {
        let (cache, _) = cache();
        let unloads = Arc::new(Unloads::default());
        let listener: ListenerRef = unloads.clone();
        cache.register_global_listener(&listener);

        let handle: AssetHandle<Text> = cache.get_or_load("hello.txt", LoadMode::Sync, None).unwrap();
        let key = handle.key().clone();
        drop(handle);

        assert_eq!(cache.update(), 1);
        assert!(!cache.contains(&key));
        assert_eq!(unloads.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dead_entry_is_replaced() {
        let (cache, _) = cache();
        let first: AssetHandle<Text> = cache.get_or_load("hello.txt", LoadMode::Sync, None).unwrap();
        let first_id = first.id();
        drop(first);

        // The unload event is drained before the lookup
        let second: AssetHandle<Text> = cache.get_or_load("hello.txt", LoadMode::Sync, None).unwrap();
        assert_ne!(second.id(), first_id);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_untyped_by_extension() {
        let (cache, _) = cache();
        let any = cache
            .get_or_load_untyped("hello.txt", LoadMode::Sync, None)
            .unwrap();
        assert!(any.is::<Text>());
        assert!(any.is_loaded());

        let typed: AssetHandle<Text> = cache.find(any.key()).unwrap();
        assert_eq!(typed.id(), any.id());
    }
}

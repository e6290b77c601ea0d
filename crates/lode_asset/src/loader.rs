//! Asset Loader - Pluggable asset loading system
//!
//! A loader is registered once per (asset type, key shape) pair. It maps a key
//! to a file location, builds an empty asset, fills it from a byte source and
//! writes it back to a byte sink. Loaders hold no per-asset state.

use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use crossbeam_channel::Sender;

use crate::error::{LoadError, LoadResult};
use crate::file::{ByteSink, ByteSource, FileInfo};
use crate::handle::{Asset, AssetId, AssetNode, ErasedAsset, UnloadEvent};
use crate::key::{AssetKey, KeyKind};

/// Output flavour requested from [`AssetLoader::save`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SaveMode {
    /// Compact form used at runtime
    #[default]
    Binary,
    /// Human-readable form for authoring tools, where the format has one
    Text,
}

/// Context provided to loaders during loading
pub struct LoadContext<'a> {
    key: &'a AssetKey,
    file: &'a FileInfo,
    source: &'a mut dyn ByteSource,
    reloading: bool,
}

impl<'a> LoadContext<'a> {
    pub fn new(
        key: &'a AssetKey,
        file: &'a FileInfo,
        source: &'a mut dyn ByteSource,
        reloading: bool,
    ) -> Self {
        Self {
            key,
            file,
            source,
            reloading,
        }
    }

    /// Key of the asset being loaded
    pub fn key(&self) -> &AssetKey {
        self.key
    }

    /// Location the bytes come from
    pub fn file(&self) -> &FileInfo {
        self.file
    }

    /// The asset already had content and is being refreshed
    pub fn is_reloading(&self) -> bool {
        self.reloading
    }

    /// Size of the readable data
    pub fn len(&self) -> u64 {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    /// Underlying byte source, for incremental parsers
    pub fn source(&mut self) -> &mut dyn ByteSource {
        &mut *self.source
    }

    /// Read `length` bytes at `offset`
    pub fn read(&mut self, offset: u64, length: usize) -> LoadResult<Vec<u8>> {
        self.source.read(offset, length).map_err(read_failure)
    }

    /// Read all data
    pub fn read_all(&mut self) -> LoadResult<Vec<u8>> {
        self.source.read_all().map_err(read_failure)
    }

    /// Read data as string (UTF-8)
    pub fn read_string(&mut self) -> LoadResult<String> {
        let bytes = self.read_all()?;
        String::from_utf8(bytes)
            .map_err(|e| LoadError::ParseFailure(format!("Invalid UTF-8: {}", e)))
    }
}

fn read_failure(err: io::Error) -> LoadError {
    LoadError::ReadFailure(err.to_string())
}

/// Trait for asset loaders
pub trait AssetLoader: Send + Sync + 'static {
    /// Asset type this loader produces
    type Asset: Asset;

    /// Key shapes this loader accepts
    fn key_kinds(&self) -> &[KeyKind] {
        &[KeyKind::Path]
    }

    /// File extensions this loader handles, for untyped loads
    fn extensions(&self) -> &[&str] {
        &[]
    }

    /// Where the bytes for `key` live
    ///
    /// Path keys map to their file by default; any other key has no on-disk
    /// representation unless the loader says otherwise.
    fn resolve_location(&self, key: &AssetKey) -> FileInfo {
        match key {
            AssetKey::Path(path) => FileInfo::file(path.path.clone()),
            _ => FileInfo::in_memory(),
        }
    }

    /// Build the empty asset object for `key`
    fn create(&self, key: &AssetKey) -> Self::Asset;

    /// Fill `asset` from the context's byte source
    fn load(&self, asset: &mut Self::Asset, ctx: &mut LoadContext) -> LoadResult<()>;

    /// Serialize `asset` into `sink`
    fn save(
        &self,
        _asset: &Self::Asset,
        _sink: &mut dyn ByteSink,
        _mode: SaveMode,
    ) -> Result<(), String> {
        Err(format!(
            "{} does not support saving",
            core::any::type_name::<Self>()
        ))
    }

    /// Files whose change invalidates this asset
    fn dependency_files(&self, key: &AssetKey, _asset: &Self::Asset) -> Vec<String> {
        let info = self.resolve_location(key);
        if info.is_on_disk() {
            vec![info.file_name]
        } else {
            Vec::new()
        }
    }

    /// Called after an asset of `key` was unloaded and its listeners ran
    fn release(&self, _key: &AssetKey) {}

    /// Get the type ID of the asset
    fn asset_type_id(&self) -> TypeId {
        TypeId::of::<Self::Asset>()
    }

    /// Get the type name of the asset
    fn asset_type_name(&self) -> &'static str {
        core::any::type_name::<Self::Asset>()
    }
}

/// Type-erased asset loader
pub trait ErasedLoader: Send + Sync {
    fn asset_type_id(&self) -> TypeId;

    fn asset_type_name(&self) -> &'static str;

    fn key_kinds(&self) -> &[KeyKind];

    fn extensions(&self) -> &[&str];

    fn resolve_location(&self, key: &AssetKey) -> FileInfo;

    /// Build a cache node holding a freshly created asset
    fn create_node(
        &self,
        id: AssetId,
        key: AssetKey,
        unload_tx: Option<Sender<UnloadEvent>>,
    ) -> Arc<dyn ErasedAsset>;

    /// Load new content and swap it into `node`
    ///
    /// Returns the previous content (an `Arc<Asset>`) boxed, for reload hooks.
    fn load_into(
        &self,
        node: &dyn ErasedAsset,
        ctx: &mut LoadContext,
    ) -> LoadResult<Box<dyn Any + Send + Sync>>;

    fn save_from(
        &self,
        node: &dyn ErasedAsset,
        sink: &mut dyn ByteSink,
        mode: SaveMode,
    ) -> Result<(), String>;

    fn dependency_files(&self, node: &dyn ErasedAsset) -> Vec<String>;

    fn release(&self, key: &AssetKey);
}

fn typed_node<T: Asset>(node: &dyn ErasedAsset) -> Result<&AssetNode<T>, String> {
    node.as_any().downcast_ref::<AssetNode<T>>().ok_or_else(|| {
        format!(
            "{} is not a {}",
            node.base().type_name(),
            core::any::type_name::<T>()
        )
    })
}

impl<L: AssetLoader> ErasedLoader for L {
    fn asset_type_id(&self) -> TypeId {
        AssetLoader::asset_type_id(self)
    }

    fn asset_type_name(&self) -> &'static str {
        AssetLoader::asset_type_name(self)
    }

    fn key_kinds(&self) -> &[KeyKind] {
        AssetLoader::key_kinds(self)
    }

    fn extensions(&self) -> &[&str] {
        AssetLoader::extensions(self)
    }

    fn resolve_location(&self, key: &AssetKey) -> FileInfo {
        AssetLoader::resolve_location(self, key)
    }

    fn create_node(
        &self,
        id: AssetId,
        key: AssetKey,
        unload_tx: Option<Sender<UnloadEvent>>,
    ) -> Arc<dyn ErasedAsset> {
        let content = self.create(&key);
        Arc::new(AssetNode::new(id, key, content, unload_tx))
    }

    fn load_into(
        &self,
        node: &dyn ErasedAsset,
        ctx: &mut LoadContext,
    ) -> LoadResult<Box<dyn Any + Send + Sync>> {
        let node = typed_node::<L::Asset>(node).map_err(LoadError::ParseFailure)?;
        let mut asset = self.create(node.base().key());
        self.load(&mut asset, ctx)?;
        let previous = node.replace_content(Arc::new(asset));
        Ok(Box::new(previous))
    }

    fn save_from(
        &self,
        node: &dyn ErasedAsset,
        sink: &mut dyn ByteSink,
        mode: SaveMode,
    ) -> Result<(), String> {
        let node = typed_node::<L::Asset>(node)?;
        self.save(&node.content(), sink, mode)
    }

    fn dependency_files(&self, node: &dyn ErasedAsset) -> Vec<String> {
        match typed_node::<L::Asset>(node) {
            Ok(typed) => AssetLoader::dependency_files(self, node.base().key(), &typed.content()),
            Err(_) => Vec::new(),
        }
    }

    fn release(&self, key: &AssetKey) {
        AssetLoader::release(self, key)
    }
}

/// Registry of asset loaders
pub struct LoaderRegistry {
    /// Loader for each (asset type, key shape) pair -> index into all_loaders
    by_type: BTreeMap<(TypeId, KeyKind), usize>,
    /// Loaders by extension -> list of indices into all_loaders
    by_extension: BTreeMap<String, Vec<usize>>,
    /// Loaders by key shape, in registration order
    by_kind: BTreeMap<KeyKind, Vec<usize>>,
    /// All registered loaders
    all_loaders: Vec<Arc<dyn ErasedLoader>>,
}

impl LoaderRegistry {
    /// Create a new loader registry
    pub fn new() -> Self {
        Self {
            by_type: BTreeMap::new(),
            by_extension: BTreeMap::new(),
            by_kind: BTreeMap::new(),
            all_loaders: Vec::new(),
        }
    }

    /// Register a loader
    pub fn register<L: AssetLoader>(&mut self, loader: L) {
        self.register_erased(Arc::new(loader));
    }

    /// Register an erased loader
    ///
    /// A later loader for the same (type, key shape) pair replaces the
    /// earlier one for typed lookups.
    pub fn register_erased(&mut self, loader: Arc<dyn ErasedLoader>) {
        let type_id = loader.asset_type_id();
        let idx = self.all_loaders.len();

        for &kind in loader.key_kinds() {
            if let Some(previous) = self.by_type.insert((type_id, kind), idx) {
                log::warn!(
                    "Loader for {} ({} keys) replaces loader #{}",
                    loader.asset_type_name(),
                    kind.name(),
                    previous
                );
            }
            self.by_kind.entry(kind).or_default().push(idx);
        }

        for &ext in loader.extensions() {
            self.by_extension
                .entry(ext.to_lowercase())
                .or_default()
                .push(idx);
        }

        log::debug!(
            "Registered loader for {} (extensions: {:?})",
            loader.asset_type_name(),
            loader.extensions()
        );
        self.all_loaders.push(loader);
    }

    /// Loader for an asset type and key shape
    pub fn find(&self, type_id: TypeId, kind: KeyKind) -> Option<&Arc<dyn ErasedLoader>> {
        self.by_type
            .get(&(type_id, kind))
            .and_then(|&idx| self.all_loaders.get(idx))
    }

    /// Loader for a key without a requested type
    ///
    /// Path keys go by file extension; other keys take the first loader
    /// accepting their shape.
    pub fn find_untyped(&self, key: &AssetKey) -> Option<&Arc<dyn ErasedLoader>> {
        let kind = key.kind();
        let by_ext = key.extension().and_then(|ext| {
            self.by_extension.get(&ext)?.iter().find_map(|&idx| {
                let loader = self.all_loaders.get(idx)?;
                loader.key_kinds().contains(&kind).then_some(loader)
            })
        });

        by_ext.or_else(|| {
            if kind == KeyKind::Path {
                return None;
            }
            let idx = *self.by_kind.get(&kind)?.first()?;
            self.all_loaders.get(idx)
        })
    }

    /// Check if a format is supported
    pub fn supports_extension(&self, ext: &str) -> bool {
        self.by_extension.contains_key(&ext.to_lowercase())
    }

    /// Get all registered extensions
    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.by_extension.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.all_loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all_loaders.is_empty()
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::MemorySource;
    use crate::handle::AssetHandle;
    use crate::key::UniqueKey;

    #[derive(Default)]
    struct TextAsset(String);

    struct TextLoader;

    impl AssetLoader for TextLoader {
        type Asset = TextAsset;

        fn extensions(&self) -> &[&str] {
            &["txt", "text"]
        }

        fn create(&self, _key: &AssetKey) -> TextAsset {
            TextAsset::default()
        }

        fn load(&self, asset: &mut TextAsset, ctx: &mut LoadContext) -> LoadResult<()> {
            asset.0 = ctx.read_string()?;
            Ok(())
        }
    }

    struct CounterLoader;

    impl AssetLoader for CounterLoader {
        type Asset = u64;

        fn key_kinds(&self) -> &[KeyKind] {
            &[KeyKind::Unique]
        }

        fn create(&self, key: &AssetKey) -> u64 {
            match key {
                AssetKey::Unique(UniqueKey(n)) => *n,
                _ => 0,
            }
        }

        fn load(&self, _asset: &mut u64, _ctx: &mut LoadContext) -> LoadResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_loader_registry() {
        let mut registry = LoaderRegistry::new();
        registry.register(TextLoader);

        assert!(registry.supports_extension("txt"));
        assert!(registry.supports_extension("TXT")); // Case insensitive
        assert!(registry.supports_extension("text"));
        assert!(!registry.supports_extension("png"));

        assert!(registry.find(TypeId::of::<TextAsset>(), KeyKind::Path).is_some());
        assert!(registry.find(TypeId::of::<TextAsset>(), KeyKind::Unique).is_none());
    }

    #[test]
    fn test_find_untyped() {
        let mut registry = LoaderRegistry::new();
        registry.register(TextLoader);
        registry.register(CounterLoader);

        let text = registry.find_untyped(&AssetKey::path("notes/readme.TXT")).unwrap();
        assert_eq!(text.asset_type_id(), TypeId::of::<TextAsset>());

        let counter = registry.find_untyped(&UniqueKey(4).into()).unwrap();
        assert_eq!(counter.asset_type_id(), TypeId::of::<u64>());

        assert!(registry.find_untyped(&AssetKey::path("image.png")).is_none());
    }

    #[test]
    fn test_load_into_swaps_content() {
        let loader: Arc<dyn ErasedLoader> = Arc::new(TextLoader);
        let key = AssetKey::path("test.txt");
        let node = loader.create_node(AssetId::new(1), key.clone(), None);

        let info = loader.resolve_location(&key);
        assert_eq!(info, FileInfo::file("test.txt"));

        let mut source = MemorySource::new(b"Hello, World!".to_vec());
        let mut ctx = LoadContext::new(&key, &info, &mut source, false);
        let previous = loader.load_into(node.as_ref(), &mut ctx).unwrap();

        let previous = previous.downcast::<Arc<TextAsset>>().unwrap();
        assert_eq!(previous.0, "");

        let handle: AssetHandle<TextAsset> = crate::handle::AnyAssetHandle::from_erased(node)
            .downcast()
            .unwrap();
        assert_eq!(handle.get().0, "Hello, World!");
    }

    #[test]
    fn test_parse_failure_keeps_content() {
        let loader: Arc<dyn ErasedLoader> = Arc::new(TextLoader);
        let key = AssetKey::path("bad.txt");
        let node = loader.create_node(AssetId::new(1), key.clone(), None);
        let info = loader.resolve_location(&key);

        let mut source = MemorySource::new(vec![0xff, 0xfe]);
        let mut ctx = LoadContext::new(&key, &info, &mut source, false);
        let err = loader.load_into(node.as_ref(), &mut ctx).unwrap_err();
        assert!(matches!(err, LoadError::ParseFailure(_)));
    }

    #[test]
    fn test_default_dependency_files() {
        let loader: Arc<dyn ErasedLoader> = Arc::new(TextLoader);
        let node = loader.create_node(AssetId::new(1), AssetKey::path("a/b.txt"), None);
        assert_eq!(loader.dependency_files(node.as_ref()), vec!["a/b.txt".to_string()]);

        let counter: Arc<dyn ErasedLoader> = Arc::new(CounterLoader);
        let node = counter.create_node(AssetId::new(2), UniqueKey(1).into(), None);
        assert!(counter.dependency_files(node.as_ref()).is_empty());
        assert!(counter.save_from(node.as_ref(), &mut NullSink, SaveMode::Binary).is_err());
    }

    struct NullSink;

    impl ByteSink for NullSink {
        fn write(&mut self, _bytes: &[u8]) -> io::Result<()> {
            Ok(())
        }

        fn finish(self: Box<Self>) -> io::Result<()> {
            Ok(())
        }
    }
}

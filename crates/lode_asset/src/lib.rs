//! # lode_asset - Keyed Asset Cache
//!
//! Asset management with:
//! - At most one live asset per key, shared through reference-counted handles
//! - Pluggable loaders per (asset type, key shape)
//! - Sync and async loads on a worker pool
//! - Instance, type and global listeners
//! - In-place reload and hot reload from file changes
//!
//! ## Example
//!
//! ```ignore
//! use lode_asset::prelude::*;
//!
//! let cache = AssetCache::new(AssetCacheConfig::new("assets"));
//! cache.register_loader(TextLoader);
//!
//! // Load now
//! let readme: AssetHandle<Text> = cache.get_or_load("readme.txt", LoadMode::Sync, None)?;
//!
//! // Or queue it and pump the cache each frame
//! let notes: AssetHandle<Text> = cache.get_or_load("notes.txt", LoadMode::Async, None)?;
//! cache.update();
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod file;
pub mod handle;
pub mod key;
pub mod listener;
pub mod loader;
#[cfg(feature = "hot-reload")]
pub mod watcher;
mod worker;

pub use cache::{AssetCache, LoadMode, ReloadHookId};
pub use config::AssetCacheConfig;
pub use error::{AssetError, LoadError, LoadResult, Result};
pub use file::{
    ByteSink, ByteSource, DiskFileSystem, FileInfo, FileSystem, MemoryFileSystem, MemorySource,
};
pub use handle::{
    AnyAssetHandle, Asset, AssetHandle, AssetId, AssetState, UnloadEvent, WeakAssetHandle,
};
pub use key::{AssetKey, KeyKind, LevelEntityKey, PathKey, UniqueKey};
pub use listener::{AssetListener, ListenerRef};
pub use loader::{AssetLoader, ErasedLoader, LoadContext, LoaderRegistry, SaveMode};

#[cfg(feature = "hot-reload")]
pub use watcher::AssetWatcher;

/// Prelude - commonly used types
pub mod prelude {
    pub use crate::cache::{AssetCache, LoadMode};
    pub use crate::config::AssetCacheConfig;
    pub use crate::handle::{AnyAssetHandle, AssetHandle, AssetState, WeakAssetHandle};
    pub use crate::key::{AssetKey, LevelEntityKey, PathKey, UniqueKey};
    pub use crate::listener::{AssetListener, ListenerRef};
    pub use crate::loader::{AssetLoader, LoadContext, SaveMode};
    pub use crate::loaders::{Bytes, BytesLoader, Text, TextLoader};
    pub use crate::error::{AssetError, LoadError, LoadResult};
}

/// Built-in asset loaders for common types
pub mod loaders {
    use super::*;

    /// Raw bytes asset
    #[derive(Clone, Debug, Default, PartialEq, Eq)]
    pub struct Bytes(pub Vec<u8>);

    /// Text asset
    #[derive(Clone, Debug, Default, PartialEq, Eq)]
    pub struct Text(pub String);

    /// Bytes loader
    pub struct BytesLoader;

    impl AssetLoader for BytesLoader {
        type Asset = Bytes;

        fn extensions(&self) -> &[&str] {
            &["bin", "dat"]
        }

        fn create(&self, _key: &AssetKey) -> Bytes {
            Bytes::default()
        }

        fn load(&self, asset: &mut Bytes, ctx: &mut LoadContext) -> LoadResult<()> {
            asset.0 = ctx.read_all()?;
            Ok(())
        }

        fn save(&self, asset: &Bytes, sink: &mut dyn ByteSink, _mode: SaveMode) -> std::result::Result<(), String> {
            sink.write(&asset.0).map_err(|e| e.to_string())
        }
    }

    /// Text loader
    pub struct TextLoader;

    impl AssetLoader for TextLoader {
        type Asset = Text;

        fn extensions(&self) -> &[&str] {
            &["txt", "text", "md", "json", "toml", "yaml", "yml", "xml"]
        }

        fn create(&self, _key: &AssetKey) -> Text {
            Text::default()
        }

        fn load(&self, asset: &mut Text, ctx: &mut LoadContext) -> LoadResult<()> {
            asset.0 = ctx.read_string()?;
            Ok(())
        }

        fn save(&self, asset: &Text, sink: &mut dyn ByteSink, _mode: SaveMode) -> std::result::Result<(), String> {
            sink.write(asset.0.as_bytes()).map_err(|e| e.to_string())
        }
    }
}

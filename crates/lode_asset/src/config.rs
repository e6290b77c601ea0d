//! Asset cache configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Asset cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetCacheConfig {
    /// Root directory for relative asset paths
    pub asset_dir: PathBuf,

    /// Threads running async loads; 0 runs them on `AssetCache::update()`
    pub worker_threads: usize,

    /// Watch `asset_dir` and reload changed files
    pub hot_reload: bool,
}

impl Default for AssetCacheConfig {
    fn default() -> Self {
        Self {
            asset_dir: PathBuf::from("assets"),
            worker_threads: 2,
            hot_reload: cfg!(debug_assertions),
        }
    }
}

impl AssetCacheConfig {
    /// Configuration rooted at `asset_dir`
    pub fn new(asset_dir: impl Into<PathBuf>) -> Self {
        Self {
            asset_dir: asset_dir.into(),
            ..Default::default()
        }
    }

    /// Async loads run only when the owner pumps the cache
    pub fn deferred(mut self) -> Self {
        self.worker_threads = 0;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn with_hot_reload(mut self, enabled: bool) -> Self {
        self.hot_reload = enabled;
        self
    }

    /// Parse from TOML; missing fields keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

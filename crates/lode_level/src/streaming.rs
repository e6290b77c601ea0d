//! Observer-driven level streaming
//!
//! The system keeps one level loaded and tracks a square of chunks around the
//! observer. Each chunk moves between `NotRequested` and `Requested`: becoming
//! visible queues async loads for its entities, becoming invisible drops the
//! handles so the cache unloads whatever nothing else still holds.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

use lode_asset::{
    AnyAssetHandle, AssetCache, AssetHandle, AssetKey, AssetListener, AssetState, LevelEntityKey,
    ListenerRef, LoadMode, PathKey,
};

use crate::config::StreamingConfig;
use crate::error::{Result, StreamingError};
use crate::grid::{Chunk, ChunkBounds, ChunkCoord, ChunkGrid, ChunkState};
use crate::level::{LevelAsset, LevelEntity};
use crate::telemetry::{StreamingTelemetry, TelemetrySnapshot};

/// Keeps the error message of a level load
#[derive(Default)]
struct LoadOutcome {
    error: Mutex<Option<String>>,
}

impl AssetListener for LoadOutcome {
    fn on_error(&self, _asset: &AnyAssetHandle, _reloaded: bool, message: &str) {
        *self.error.lock() = Some(message.to_string());
    }
}

struct LoadedLevel {
    path: String,
    asset: AssetHandle<LevelAsset>,
    grid: ChunkGrid,
    /// Same order as the grid: y-major
    chunks: Vec<Chunk>,
    special: Vec<AssetHandle<LevelEntity>>,
    observer: Option<ChunkCoord>,
    visible: BTreeSet<ChunkCoord>,
}

impl LoadedLevel {
    fn chunk(&self, coord: ChunkCoord) -> Option<&Chunk> {
        self.grid.index_of(coord).and_then(|i| self.chunks.get(i))
    }

    fn held_handles(&self) -> usize {
        self.chunks.iter().map(|c| c.entities_loaded.len()).sum::<usize>() + self.special.len()
    }
}

/// Streams the entities of one level around an observer
pub struct StreamingSystem {
    cache: Arc<AssetCache>,
    config: StreamingConfig,
    telemetry: Arc<StreamingTelemetry>,
    level: Option<LoadedLevel>,
}

impl StreamingSystem {
    /// Create a streaming system on `cache`
    ///
    /// The level loaders must already be registered (see
    /// [`register_loaders`](crate::register_loaders)).
    pub fn new(cache: Arc<AssetCache>, config: StreamingConfig) -> Self {
        let telemetry = Arc::new(StreamingTelemetry::new());
        let listener: ListenerRef = telemetry.clone();
        cache.register_type_listener::<LevelEntity>(&listener);

        Self {
            cache,
            config,
            telemetry,
            level: None,
        }
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<AssetCache> {
        &self.cache
    }

    /// Load `path` synchronously and make it the streamed level
    ///
    /// A previously streamed level is unloaded first. No grid chunk is
    /// requested until the first [`update`](Self::update).
    pub fn load_level(&mut self, path: &str) -> Result<()> {
        let path = PathKey::new(path).path;
        self.unload_level();

        let outcome = Arc::new(LoadOutcome::default());
        let listener: ListenerRef = outcome.clone();
        let asset: AssetHandle<LevelAsset> =
            self.cache
                .get_or_load(AssetKey::path(path.clone()), LoadMode::Sync, Some(&listener))?;
        self.cache
            .unregister_instance_listener(&asset.untyped(), &listener);

        if asset.state() != AssetState::Loaded {
            let reason = outcome
                .error
                .lock()
                .take()
                .unwrap_or_else(|| format!("level is {:?}", asset.state()));
            log::warn!("Level {} failed to load: {}", path, reason);
            return Err(StreamingError::LevelLoad { path, reason });
        }

        let content = asset.get();
        let grid = content.grid.clone();
        let chunks = grid
            .bounds()
            .iter()
            .map(|coord| Chunk::new(coord, grid.entities(coord).to_vec()))
            .collect();

        let special = if self.config.load_special_chunk {
            let handles = request_entities(&self.cache, &path, grid.special());
            self.telemetry.record_requests(handles.len());
            handles
        } else {
            Vec::new()
        };

        log::info!(
            "Streaming level {} ({}x{} chunks, {} entities, {} special)",
            path,
            grid.bounds().width(),
            grid.bounds().height(),
            content.entity_count(),
            special.len()
        );

        self.level = Some(LoadedLevel {
            path,
            asset,
            grid,
            chunks,
            special,
            observer: None,
            visible: BTreeSet::new(),
        });
        Ok(())
    }

    /// Release the streamed level and every entity handle it holds
    pub fn unload_level(&mut self) -> bool {
        let Some(level) = self.level.take() else {
            return false;
        };
        log::info!(
            "Stopped streaming level {} ({} entity handles released)",
            level.path,
            level.held_handles()
        );
        true
    }

    /// Move the observer; chunks entering or leaving view are processed
    ///
    /// Nothing happens while the observer stays inside the same chunk.
    /// Returns how many chunks changed state.
    pub fn update(&mut self, position: [f32; 3]) -> usize {
        let (hide, show) = {
            let Some(level) = self.level.as_mut() else {
                return 0;
            };
            let center = level.grid.coord_of(position);
            if level.observer == Some(center) {
                return 0;
            }
            level.observer = Some(center);

            let wanted: BTreeSet<ChunkCoord> = ChunkBounds::around(center, self.config.view_distance)
                .intersect(&level.grid.bounds())
                .map(|area| area.iter().collect())
                .unwrap_or_default();
            let hide: Vec<_> = level.visible.difference(&wanted).copied().collect();
            let show: Vec<_> = wanted.difference(&level.visible).copied().collect();
            log::debug!(
                "Observer entered chunk {}: {} chunks in view, {} leaving",
                center,
                show.len(),
                hide.len()
            );
            (hide, show)
        };

        for &coord in &hide {
            self.on_chunk_invisible(coord);
        }
        for &coord in &show {
            self.on_chunk_visible(coord);
        }
        hide.len() + show.len()
    }

    /// Request every entity of `coord`; no-op if already requested
    ///
    /// Returns the number of entity loads requested.
    pub fn on_chunk_visible(&mut self, coord: ChunkCoord) -> usize {
        let cache = &self.cache;
        let Some(level) = self.level.as_mut() else {
            return 0;
        };
        let Some(index) = level.grid.index_of(coord) else {
            return 0;
        };
        let chunk = &mut level.chunks[index];
        if chunk.state == ChunkState::Requested {
            return 0;
        }

        chunk.state = ChunkState::Requested;
        chunk.entities_loaded = request_entities(cache, &level.path, &chunk.entity_indices);
        level.visible.insert(coord);

        let count = chunk.entities_loaded.len();
        self.telemetry.record_requests(count);
        log::trace!("Chunk {} requested {} entities", coord, count);
        count
    }

    /// Drop the handles of `coord`; no-op if not requested
    ///
    /// Returns the number of handles released.
    pub fn on_chunk_invisible(&mut self, coord: ChunkCoord) -> usize {
        let Some(level) = self.level.as_mut() else {
            return 0;
        };
        let Some(index) = level.grid.index_of(coord) else {
            return 0;
        };
        let chunk = &mut level.chunks[index];
        if chunk.state != ChunkState::Requested {
            return 0;
        }

        let released = std::mem::take(&mut chunk.entities_loaded).len();
        chunk.state = ChunkState::NotRequested;
        level.visible.remove(&coord);
        log::trace!("Chunk {} released {} entities", coord, released);
        released
    }

    pub fn is_level_loaded(&self) -> bool {
        self.level.is_some()
    }

    pub fn level(&self) -> Option<&AssetHandle<LevelAsset>> {
        self.level.as_ref().map(|l| &l.asset)
    }

    pub fn level_path(&self) -> Option<&str> {
        self.level.as_ref().map(|l| l.path.as_str())
    }

    pub fn chunk(&self, coord: ChunkCoord) -> Option<&Chunk> {
        self.level.as_ref()?.chunk(coord)
    }

    pub fn chunk_state(&self, coord: ChunkCoord) -> Option<ChunkState> {
        self.chunk(coord).map(|c| c.state)
    }

    /// Chunk the observer was last seen in
    pub fn observer(&self) -> Option<ChunkCoord> {
        self.level.as_ref()?.observer
    }

    /// Requested chunks, in coordinate order
    pub fn visible_chunks(&self) -> Vec<ChunkCoord> {
        self.level
            .as_ref()
            .map(|l| l.visible.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Handles of the special chunk's entities
    pub fn special_entities(&self) -> &[AssetHandle<LevelEntity>] {
        self.level
            .as_ref()
            .map(|l| l.special.as_slice())
            .unwrap_or(&[])
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot()
    }
}

fn request_entities(cache: &AssetCache, level: &str, indices: &[u32]) -> Vec<AssetHandle<LevelEntity>> {
    indices
        .iter()
        .filter_map(|&index| {
            match cache.get_or_load::<LevelEntity>(LevelEntityKey::new(level, index), LoadMode::Async, None) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    log::error!("Cannot request entity {} of {}: {}", index, level, e);
                    None
                }
            }
        })
        .collect()
}

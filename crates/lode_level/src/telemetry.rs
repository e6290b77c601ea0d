//! Streaming telemetry

use std::sync::atomic::{AtomicU64, Ordering};

use lode_asset::{AnyAssetHandle, AssetListener, UnloadEvent};

/// Counters over level entity events
///
/// Registered as a type listener for `LevelEntity`, so it sees every entity
/// the cache loads, whoever requested it.
#[derive(Debug, Default)]
pub struct StreamingTelemetry {
    requested: AtomicU64,
    loaded: AtomicU64,
    reloaded: AtomicU64,
    failed: AtomicU64,
    unloaded: AtomicU64,
}

/// Point-in-time copy of [`StreamingTelemetry`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub requested: u64,
    pub loaded: u64,
    pub reloaded: u64,
    pub failed: u64,
    pub unloaded: u64,
}

impl StreamingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_requests(&self, count: usize) {
        self.requested.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            requested: self.requested.load(Ordering::Relaxed),
            loaded: self.loaded.load(Ordering::Relaxed),
            reloaded: self.reloaded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            unloaded: self.unloaded.load(Ordering::Relaxed),
        }
    }
}

impl AssetListener for StreamingTelemetry {
    fn on_loaded(&self, _asset: &AnyAssetHandle, reloaded: bool) {
        if reloaded {
            self.reloaded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.loaded.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn on_error(&self, asset: &AnyAssetHandle, _reloaded: bool, message: &str) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        log::warn!("Level entity {} failed to stream: {}", asset.key(), message);
    }

    fn on_unloaded(&self, _asset: &UnloadEvent) {
        self.unloaded.fetch_add(1, Ordering::Relaxed);
    }
}

//! # lode_level - Chunked Level Streaming
//!
//! Levels baked into a single binary file, cut into a grid of chunks, and
//! streamed entity by entity through a [`lode_asset::AssetCache`] as an
//! observer moves.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use lode_asset::prelude::*;
//! use lode_level::{register_loaders, StreamingConfig, StreamingSystem};
//!
//! let cache = Arc::new(AssetCache::new(AssetCacheConfig::new("assets")));
//! register_loaders(&cache);
//!
//! let mut streaming = StreamingSystem::new(cache.clone(), StreamingConfig::default());
//! streaming.load_level("maps/harbor.level")?;
//!
//! // Each frame
//! streaming.update(camera_position);
//! cache.update();
//! ```

pub mod config;
pub mod error;
pub mod grid;
pub mod level;
pub mod loader;
pub mod streaming;
pub mod telemetry;

pub use config::StreamingConfig;
pub use error::{LevelError, Result, StreamingError};
pub use grid::{Bounds, Chunk, ChunkBounds, ChunkCoord, ChunkGrid, ChunkState};
pub use level::{read_level, EntityInfo, LevelAsset, LevelBuilder, LevelEntity};
pub use loader::{register_loaders, LevelEntityLoader, LevelLoader, LevelTables};
pub use streaming::StreamingSystem;
pub use telemetry::{StreamingTelemetry, TelemetrySnapshot};

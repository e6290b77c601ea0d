//! Error types for level files and streaming

use lode_asset::{AssetError, LoadError};
use thiserror::Error;

/// Problem found while reading a level file
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LevelError {
    #[error("Bad level signature: {0:?}")]
    BadSignature([u8; 4]),

    #[error("Unsupported level version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    /// File ended inside a table
    #[error("Level file truncated in {0}")]
    Truncated(&'static str),

    /// Chunk counts disagree with the chunk bounds, or the grid is unreasonable
    #[error("Chunk grid mismatch: {0}")]
    GridMismatch(String),

    /// Content does not fit the format's field widths
    #[error("Level too large: {0}")]
    TooLarge(String),

    #[error("Entity index {index} out of range ({count} entities)")]
    EntityIndex { index: u32, count: u32 },
}

impl From<LevelError> for LoadError {
    fn from(err: LevelError) -> Self {
        match err {
            LevelError::Truncated(_) => LoadError::ReadFailure(err.to_string()),
            other => LoadError::ParseFailure(other.to_string()),
        }
    }
}

/// Streaming system errors
#[derive(Debug, Error)]
pub enum StreamingError {
    /// Cache refused the request (usually missing loaders)
    #[error(transparent)]
    Asset(#[from] AssetError),

    #[error("Failed to load level {path}: {reason}")]
    LevelLoad { path: String, reason: String },

    #[error("Invalid streaming config: {0}")]
    Config(#[from] toml::de::Error),
}

/// Result type for streaming operations
pub type Result<T> = std::result::Result<T, StreamingError>;

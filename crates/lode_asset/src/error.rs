//! Error types for asset loading and cache operations

use thiserror::Error;

/// Error reported by a loader while reading an asset
///
/// Loaders never panic on bad data. They describe the problem and the cache
/// turns it into an `Error` state plus an `on_error` notification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// Key resolves to no file and is not an in-memory asset
    #[error("Asset not found: {0}")]
    NotFound(String),

    /// I/O error or short read
    #[error("Read failure: {0}")]
    ReadFailure(String),

    /// Loader rejected the byte content
    #[error("Parse failure: {0}")]
    ParseFailure(String),

    /// A referenced sub-asset failed to resolve
    #[error("Dependency missing: {0}")]
    DependencyMissing(String),
}

impl From<String> for LoadError {
    fn from(msg: String) -> Self {
        Self::ParseFailure(msg)
    }
}

impl From<&str> for LoadError {
    fn from(msg: &str) -> Self {
        Self::ParseFailure(msg.to_string())
    }
}

/// Result type for loader operations
pub type LoadResult<T> = std::result::Result<T, LoadError>;

/// Asset cache errors
#[derive(Debug, Error)]
pub enum AssetError {
    /// Loading failed
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Could not open or write the destination file
    #[error("Failed to write {path}: {reason}")]
    WriteFailure { path: String, reason: String },

    /// Loader rejected the asset during serialization
    #[error("Failed to save {key}: {reason}")]
    SaveFailure { key: String, reason: String },

    /// No loader registered for the asset type and key shape
    #[error("No loader registered for {type_name} with {key_kind} keys")]
    NoLoader {
        type_name: &'static str,
        key_kind: &'static str,
    },

    /// Key is live in the cache under a different asset type
    #[error("Asset type mismatch for {key}: cached as {cached}, requested {requested}")]
    TypeMismatch {
        key: String,
        cached: &'static str,
        requested: &'static str,
    },

    /// Programmer error (double create, save before register, ...)
    #[error("Precondition violated: {0}")]
    PreconditionViolation(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be parsed
    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// File watcher could not be started
    #[cfg(feature = "hot-reload")]
    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, AssetError>;

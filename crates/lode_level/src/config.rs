//! Streaming configuration

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Streaming configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Chunks kept loaded around the observer's chunk, in every direction
    pub view_distance: u32,

    /// Load the special chunk together with the level
    pub load_special_chunk: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            view_distance: 1,
            load_special_chunk: true,
        }
    }
}

impl StreamingConfig {
    pub fn with_view_distance(mut self, chunks: u32) -> Self {
        self.view_distance = chunks;
        self
    }

    pub fn with_special_chunk(mut self, enabled: bool) -> Self {
        self.load_special_chunk = enabled;
        self
    }

    /// Parse from TOML; missing fields keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

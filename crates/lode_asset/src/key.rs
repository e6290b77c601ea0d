//! Asset keys
//!
//! An [`AssetKey`] identifies an asset independently of where it is stored.
//! Keys are immutable values: comparable, hashable and cheap to clone.

use core::fmt;

/// Key addressing an asset by file path, optionally narrowed to a variant
/// (a shader define set, a texture quality, ...)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PathKey {
    /// Path relative to the asset root
    pub path: String,
    /// Variant inside the file, if any
    pub variant: Option<String>,
}

impl PathKey {
    /// Create a key for a whole file
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: normalize(path.into()),
            variant: None,
        }
    }

    /// Create a key for a variant of a file
    pub fn with_variant(path: impl Into<String>, variant: impl Into<String>) -> Self {
        Self {
            path: normalize(path.into()),
            variant: Some(variant.into()),
        }
    }

    /// Lowercased file extension
    pub fn extension(&self) -> Option<String> {
        let file = self.path.rsplit('/').next()?;
        let (_, ext) = file.rsplit_once('.')?;
        Some(ext.to_lowercase())
    }
}

fn normalize(path: String) -> String {
    if path.contains('\\') {
        path.replace('\\', "/")
    } else {
        path
    }
}

/// Key for purely in-memory assets identified by a unique number
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UniqueKey(pub u64);

/// Key for one entity of a streamed level
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LevelEntityKey {
    /// Path of the owning level file
    pub level: String,
    /// Index into the level's entity table
    pub index: u32,
}

impl LevelEntityKey {
    pub fn new(level: impl Into<String>, index: u32) -> Self {
        Self {
            level: normalize(level.into()),
            index,
        }
    }
}

/// Shape of a key, used to route keys to loaders
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyKind {
    Path,
    Unique,
    LevelEntity,
}

impl KeyKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::Unique => "unique",
            Self::LevelEntity => "level-entity",
        }
    }
}

/// Type-erased asset key
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AssetKey {
    Path(PathKey),
    Unique(UniqueKey),
    LevelEntity(LevelEntityKey),
}

impl AssetKey {
    /// Shortcut for a whole-file path key
    pub fn path(path: impl Into<String>) -> Self {
        Self::Path(PathKey::new(path))
    }

    /// Shape of this key
    pub fn kind(&self) -> KeyKind {
        match self {
            Self::Path(_) => KeyKind::Path,
            Self::Unique(_) => KeyKind::Unique,
            Self::LevelEntity(_) => KeyKind::LevelEntity,
        }
    }

    pub fn as_path(&self) -> Option<&PathKey> {
        match self {
            Self::Path(key) => Some(key),
            _ => None,
        }
    }

    pub fn as_level_entity(&self) -> Option<&LevelEntityKey> {
        match self {
            Self::LevelEntity(key) => Some(key),
            _ => None,
        }
    }

    /// Extension of the addressed file, for path keys
    pub fn extension(&self) -> Option<String> {
        self.as_path().and_then(PathKey::extension)
    }
}

impl From<PathKey> for AssetKey {
    fn from(key: PathKey) -> Self {
        Self::Path(key)
    }
}

impl From<UniqueKey> for AssetKey {
    fn from(key: UniqueKey) -> Self {
        Self::Unique(key)
    }
}

impl From<LevelEntityKey> for AssetKey {
    fn from(key: LevelEntityKey) -> Self {
        Self::LevelEntity(key)
    }
}

impl From<&str> for AssetKey {
    fn from(path: &str) -> Self {
        Self::path(path)
    }
}

impl From<String> for AssetKey {
    fn from(path: String) -> Self {
        Self::path(path)
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(PathKey { path, variant: None }) => write!(f, "{}", path),
            Self::Path(PathKey {
                path,
                variant: Some(variant),
            }) => write!(f, "{}#{}", path, variant),
            Self::Unique(UniqueKey(id)) => write!(f, "unique:{}", id),
            Self::LevelEntity(LevelEntityKey { level, index }) => {
                write!(f, "{}@{}", level, index)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_key_equality_and_hash() {
        let mut set = HashSet::new();
        set.insert(AssetKey::path("materials/stone.mat"));
        set.insert(AssetKey::path("materials\\stone.mat"));
        set.insert(AssetKey::Path(PathKey::with_variant("materials/stone.mat", "hq")));
        set.insert(UniqueKey(7).into());
        set.insert(LevelEntityKey::new("maps/a.level", 3).into());
        set.insert(LevelEntityKey::new("maps/a.level", 3).into());

        assert_eq!(set.len(), 4);
    }

    #[test]
    fn test_extension() {
        assert_eq!(AssetKey::path("a/b/Stone.MAT").extension().as_deref(), Some("mat"));
        assert_eq!(AssetKey::path("a.dir/file").extension(), None);
        assert_eq!(AssetKey::from(UniqueKey(1)).extension(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(AssetKey::path("a.txt").to_string(), "a.txt");
        assert_eq!(
            AssetKey::Path(PathKey::with_variant("a.fx", "SKIN")).to_string(),
            "a.fx#SKIN"
        );
        assert_eq!(AssetKey::from(LevelEntityKey::new("m.level", 2)).to_string(), "m.level@2");
    }
}

//! Level and level-entity loaders
//!
//! Both loaders share a [`LevelTables`] registry. Loading a level publishes
//! its entity table there; entity keys resolve to byte ranges of the level
//! file through it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use lode_asset::{
    AssetCache, AssetKey, AssetLoader, FileInfo, KeyKind, LoadContext, LoadError, LoadResult,
};

use crate::level::{read_level, EntityInfo, LevelAsset, LevelEntity};

/// Entity tables of every loaded level, by level path
#[derive(Default)]
pub struct LevelTables {
    tables: Mutex<HashMap<String, Arc<Vec<EntityInfo>>>>,
}

impl LevelTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, level: impl Into<String>, entities: Arc<Vec<EntityInfo>>) {
        self.tables.lock().insert(level.into(), entities);
    }

    pub fn remove(&self, level: &str) -> bool {
        self.tables.lock().remove(level).is_some()
    }

    pub fn contains(&self, level: &str) -> bool {
        self.tables.lock().contains_key(level)
    }

    pub fn entity(&self, level: &str, index: u32) -> Option<EntityInfo> {
        self.tables
            .lock()
            .get(level)
            .and_then(|table| table.get(index as usize).copied())
    }
}

/// Loads `.level` files
pub struct LevelLoader {
    tables: Arc<LevelTables>,
}

impl LevelLoader {
    pub fn new(tables: Arc<LevelTables>) -> Self {
        Self { tables }
    }
}

impl AssetLoader for LevelLoader {
    type Asset = LevelAsset;

    fn extensions(&self) -> &[&str] {
        &["level"]
    }

    fn create(&self, _key: &AssetKey) -> LevelAsset {
        LevelAsset::default()
    }

    fn load(&self, asset: &mut LevelAsset, ctx: &mut LoadContext) -> LoadResult<()> {
        let path = match ctx.key().as_path() {
            Some(key) => key.path.clone(),
            None => return Err(LoadError::ParseFailure(format!("{} is not a level path", ctx.key()))),
        };
        *asset = read_level(ctx.source())?;
        self.tables.insert(path, Arc::clone(&asset.entities));
        log::debug!(
            "Read level tables of {} ({} entities, {} chunks)",
            ctx.key(),
            asset.entity_count(),
            asset.grid.len()
        );
        Ok(())
    }

    fn release(&self, key: &AssetKey) {
        if let Some(path) = key.as_path() {
            self.tables.remove(&path.path);
        }
    }
}

/// Loads single entities out of a loaded level's file
pub struct LevelEntityLoader {
    tables: Arc<LevelTables>,
}

impl LevelEntityLoader {
    pub fn new(tables: Arc<LevelTables>) -> Self {
        Self { tables }
    }
}

impl AssetLoader for LevelEntityLoader {
    type Asset = LevelEntity;

    fn key_kinds(&self) -> &[KeyKind] {
        &[KeyKind::LevelEntity]
    }

    fn resolve_location(&self, key: &AssetKey) -> FileInfo {
        let Some(key) = key.as_level_entity() else {
            return FileInfo::in_memory();
        };
        match self.tables.entity(&key.level, key.index) {
            Some(info) => FileInfo::region(key.level.clone(), u64::from(info.offset), u64::from(info.size)),
            None => FileInfo::in_memory(),
        }
    }

    fn create(&self, key: &AssetKey) -> LevelEntity {
        LevelEntity {
            index: key.as_level_entity().map_or(0, |k| k.index),
            ..Default::default()
        }
    }

    fn load(&self, asset: &mut LevelEntity, ctx: &mut LoadContext) -> LoadResult<()> {
        let Some(key) = ctx.key().as_level_entity().cloned() else {
            return Err(LoadError::ParseFailure(format!("{} is not a level entity", ctx.key())));
        };
        let Some(info) = self.tables.entity(&key.level, key.index) else {
            return Err(LoadError::DependencyMissing(format!(
                "level {} is not loaded or has no entity {}",
                key.level, key.index
            )));
        };
        // Location was resolved before the level's table was published
        if !ctx.file().is_on_disk() {
            return Err(LoadError::DependencyMissing(format!(
                "entity {} was requested before level {} loaded",
                key.index, key.level
            )));
        }

        asset.index = key.index;
        asset.bounds = info.bounds();
        asset.payload = ctx.read_all()?;
        Ok(())
    }

    /// Entities follow their level; a level file change reloads the level
    fn dependency_files(&self, _key: &AssetKey, _asset: &LevelEntity) -> Vec<String> {
        Vec::new()
    }
}

/// Register both level loaders on `cache`, sharing one table registry
pub fn register_loaders(cache: &AssetCache) -> Arc<LevelTables> {
    let tables = Arc::new(LevelTables::new());
    cache.register_loader(LevelLoader::new(Arc::clone(&tables)));
    cache.register_loader(LevelEntityLoader::new(Arc::clone(&tables)));
    tables
}

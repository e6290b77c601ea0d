use std::sync::Arc;

use lode_asset::prelude::*;
use lode_asset::MemoryFileSystem;
use lode_level::{
    register_loaders, Bounds, ChunkCoord, ChunkState, LevelBuilder, StreamingConfig,
    StreamingError, StreamingSystem,
};

const LEVEL: &str = "maps/harbor.level";

fn square(x0: f32, y0: f32, x1: f32, y1: f32) -> Bounds {
    Bounds::new([x0, y0, 0.0], [x1, y1, 1.0])
}

/// 4x4 grid of 10-unit chunks; chunk [1, 0] holds entities 3 and 7
fn harbor(with_special: bool) -> Vec<u8> {
    let mut builder = LevelBuilder::new(10.0);
    let boxes = [
        square(1.0, 21.0, 9.0, 29.0),
        square(11.0, 21.0, 19.0, 29.0),
        square(21.0, 21.0, 29.0, 29.0),
        square(11.0, 1.0, 19.0, 9.0),
        square(31.0, 31.0, 39.0, 39.0),
        square(1.0, 31.0, 9.0, 39.0),
        square(21.0, 31.0, 29.0, 39.0),
        square(12.0, 2.0, 18.0, 8.0),
    ];
    for (i, bounds) in boxes.into_iter().enumerate() {
        builder.add_entity(bounds, format!("entity-{}", i).into_bytes());
    }
    if with_special {
        builder.add_special_entity(square(0.0, 0.0, 40.0, 40.0), b"weather".to_vec());
    }
    builder.build().unwrap()
}

fn streaming(level: Vec<u8>, config: StreamingConfig) -> (Arc<AssetCache>, StreamingSystem) {
    let fs = MemoryFileSystem::new();
    fs.insert(LEVEL, level);
    let cache = Arc::new(AssetCache::with_file_system(
        AssetCacheConfig::new("unused").deferred().with_hot_reload(false),
        Arc::new(fs),
    ));
    register_loaders(&cache);
    let system = StreamingSystem::new(cache.clone(), config);
    (cache, system)
}

fn no_special() -> StreamingConfig {
    StreamingConfig::default().with_special_chunk(false)
}

fn entity_key(index: u32) -> AssetKey {
    LevelEntityKey::new(LEVEL, index).into()
}

#[test]
fn visible_chunk_requests_its_entities_once() {
    let (cache, mut system) = streaming(harbor(false), no_special());
    system.load_level(LEVEL).unwrap();

    let coord = ChunkCoord::new(1, 0);
    assert_eq!(system.chunk(coord).unwrap().entity_indices, vec![3, 7]);
    assert_eq!(system.chunk_state(coord), Some(ChunkState::NotRequested));

    assert_eq!(system.on_chunk_visible(coord), 2);
    assert_eq!(system.chunk_state(coord), Some(ChunkState::Requested));
    // Already requested
    assert_eq!(system.on_chunk_visible(coord), 0);
    assert_eq!(cache.pending_loads(), 2);

    cache.update();
    let chunk = system.chunk(coord).unwrap();
    assert_eq!(chunk.entities_loaded.len(), 2);
    assert!(chunk.entities_loaded.iter().all(|h| h.state() == AssetState::Loaded));
    assert_eq!(chunk.entities_loaded[0].get().payload, b"entity-3");
    assert_eq!(chunk.entities_loaded[1].get().payload, b"entity-7");
    assert_eq!(system.telemetry().loaded, 2);

    assert_eq!(system.on_chunk_invisible(coord), 2);
    assert_eq!(system.on_chunk_invisible(coord), 0);
    assert_eq!(system.chunk_state(coord), Some(ChunkState::NotRequested));
    assert!(system.chunk(coord).unwrap().entities_loaded.is_empty());

    cache.update();
    assert!(!cache.contains(&entity_key(3)));
    assert!(!cache.contains(&entity_key(7)));
    assert_eq!(system.telemetry().unloaded, 2);
}

#[test]
fn failed_entity_leaves_chunk_requested() {
    let mut level = harbor(false);
    // Cut into the last payload, entity 7
    level.pop();
    let (cache, mut system) = streaming(level, no_special());
    system.load_level(LEVEL).unwrap();

    let coord = ChunkCoord::new(1, 0);
    assert_eq!(system.on_chunk_visible(coord), 2);
    cache.update();

    let chunk = system.chunk(coord).unwrap();
    assert_eq!(chunk.state, ChunkState::Requested);
    assert_eq!(chunk.entities_loaded[0].state(), AssetState::Loaded);
    assert_eq!(chunk.entities_loaded[1].state(), AssetState::Error);

    let telemetry = system.telemetry();
    assert_eq!(telemetry.requested, 2);
    assert_eq!(telemetry.loaded, 1);
    assert_eq!(telemetry.failed, 1);
}

#[test]
fn update_only_processes_changed_chunks() {
    let (cache, mut system) = streaming(harbor(false), no_special().with_view_distance(1));
    system.load_level(LEVEL).unwrap();

    // Observer in [1, 0]: columns 0..=2, rows 0..=1
    assert_eq!(system.update([15.0, 5.0, 0.0]), 6);
    assert_eq!(system.observer(), Some(ChunkCoord::new(1, 0)));
    assert_eq!(system.visible_chunks().len(), 6);

    // Same chunk
    assert_eq!(system.update([16.0, 6.0, 3.0]), 0);

    // Step into [2, 0]: column 0 leaves, column 3 enters
    assert_eq!(system.update([25.0, 5.0, 0.0]), 4);
    assert_eq!(system.chunk_state(ChunkCoord::new(0, 0)), Some(ChunkState::NotRequested));
    assert_eq!(system.chunk_state(ChunkCoord::new(0, 1)), Some(ChunkState::NotRequested));
    assert_eq!(system.chunk_state(ChunkCoord::new(3, 0)), Some(ChunkState::Requested));
    assert_eq!(system.chunk_state(ChunkCoord::new(1, 1)), Some(ChunkState::Requested));
    assert_eq!(system.chunk_state(ChunkCoord::new(2, 3)), Some(ChunkState::NotRequested));

    cache.update();
    assert!(cache.find::<lode_level::LevelEntity>(&entity_key(3)).is_some());
}

#[test]
fn entity_shared_by_chunks_stays_loaded() {
    let mut builder = LevelBuilder::new(10.0);
    builder.add_entity(square(5.0, 1.0, 15.0, 9.0), b"bridge".to_vec());
    let (cache, mut system) = streaming(builder.build().unwrap(), no_special());
    system.load_level(LEVEL).unwrap();

    let (left, right) = (ChunkCoord::new(0, 0), ChunkCoord::new(1, 0));
    system.on_chunk_visible(left);
    system.on_chunk_visible(right);
    cache.update();
    assert_eq!(cache.len(), 2);

    system.on_chunk_invisible(left);
    cache.update();
    assert!(cache.contains(&entity_key(0)));

    system.on_chunk_invisible(right);
    cache.update();
    assert!(!cache.contains(&entity_key(0)));
}

#[test]
fn special_chunk_follows_the_level() {
    let (cache, mut system) = streaming(harbor(true), StreamingConfig::default());
    system.load_level(LEVEL).unwrap();

    assert_eq!(system.special_entities().len(), 1);
    cache.update();
    assert_eq!(system.special_entities()[0].get().payload, b"weather");

    assert!(system.unload_level());
    assert!(system.special_entities().is_empty());
    cache.update();
    assert!(!cache.contains(&entity_key(8)));
}

#[test]
fn special_chunk_can_be_disabled() {
    let (_cache, mut system) = streaming(harbor(true), no_special());
    system.load_level(LEVEL).unwrap();
    assert!(system.special_entities().is_empty());
    assert_eq!(system.telemetry().requested, 0);
}

#[test]
fn unload_level_releases_everything() {
    let (cache, mut system) = streaming(harbor(true), StreamingConfig::default());
    system.load_level(LEVEL).unwrap();
    system.update([15.0, 25.0, 0.0]);
    cache.update();
    assert!(cache.len() > 1);

    assert!(system.unload_level());
    assert!(!system.unload_level());
    assert_eq!(system.update([15.0, 25.0, 0.0]), 0);
    assert_eq!(system.on_chunk_visible(ChunkCoord::new(0, 0)), 0);

    cache.update();
    assert!(cache.is_empty());
}

#[test]
fn level_failures_are_reported() {
    let (_cache, mut system) = streaming(harbor(false), no_special());

    let err = system.load_level("maps/missing.level").unwrap_err();
    assert!(matches!(err, StreamingError::LevelLoad { .. }));
    assert!(!system.is_level_loaded());

    let fs = MemoryFileSystem::new();
    fs.insert(LEVEL, b"not a level".to_vec());
    let cache = Arc::new(AssetCache::with_file_system(
        AssetCacheConfig::new("unused").deferred().with_hot_reload(false),
        Arc::new(fs),
    ));
    let mut unregistered = StreamingSystem::new(cache.clone(), no_special());
    let err = unregistered.load_level(LEVEL).unwrap_err();
    assert!(matches!(err, StreamingError::Asset(AssetError::NoLoader { .. })));

    register_loaders(&cache);
    match unregistered.load_level(LEVEL).unwrap_err() {
        StreamingError::LevelLoad { path, reason } => {
            assert_eq!(path, LEVEL);
            assert!(reason.contains("signature") || reason.contains("truncated"), "{}", reason);
        }
        other => panic!("unexpected error: {}", other),
    }
}

//! Bakes a small level to disk and walks an observer across it

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use env_logger::Env;
use lode_asset::{AssetCache, AssetCacheConfig};
use lode_level::{register_loaders, Bounds, LevelBuilder, StreamingConfig, StreamingSystem};

const GRID: u32 = 8;
const CHUNK_SIZE: f32 = 16.0;

fn bake_level() -> Result<Vec<u8>, lode_level::LevelError> {
    let mut builder = LevelBuilder::new(CHUNK_SIZE);
    for y in 0..GRID {
        for x in 0..GRID {
            let (x0, y0) = (x as f32 * CHUNK_SIZE, y as f32 * CHUNK_SIZE);
            let bounds = Bounds::new([x0 + 2.0, y0 + 2.0, 0.0], [x0 + 12.0, y0 + 12.0, 8.0]);
            builder.add_entity(bounds, format!("house {} {}", x, y).into_bytes());
        }
    }
    // A road crossing the whole map
    let extent = GRID as f32 * CHUNK_SIZE;
    builder.add_entity(Bounds::new([0.0, 60.0, 0.0], [extent, 68.0, 1.0]), b"road".to_vec());
    builder.add_special_entity(Bounds::new([0.0; 3], [extent, extent, 100.0]), b"skybox".to_vec());
    builder.build()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let dir = std::env::temp_dir().join("lode_streaming_demo");
    std::fs::create_dir_all(dir.join("maps"))?;
    std::fs::write(dir.join("maps/town.level"), bake_level()?)?;

    let config = AssetCacheConfig::new(&dir)
        .with_worker_threads(2)
        .with_hot_reload(false);
    let cache = Arc::new(AssetCache::new(config));
    register_loaders(&cache);

    let mut streaming = StreamingSystem::new(cache.clone(), StreamingConfig::default());
    streaming.load_level("maps/town.level")?;

    // Diagonal walk, one step per frame
    for step in 0..=64 {
        let p = step as f32 * 2.0;
        let changed = streaming.update([p, p, 0.0]);
        cache.update();
        if changed > 0 {
            log::info!(
                "Observer at {:?}: {} chunks changed, {} visible, {} assets live",
                streaming.observer(),
                changed,
                streaming.visible_chunks().len(),
                cache.len()
            );
        }
        thread::sleep(Duration::from_millis(5));
    }

    cache.flush();
    streaming.unload_level();
    cache.update();

    let stats = streaming.telemetry();
    log::info!(
        "Requested {}, loaded {}, failed {}, unloaded {}",
        stats.requested,
        stats.loaded,
        stats.failed,
        stats.unloaded
    );
    Ok(())
}

//! File system watcher for hot-reload

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecursiveMode, Watcher};

use crate::error::Result;

/// Watches an asset directory and reports changed files relative to it
pub struct AssetWatcher {
    _watcher: notify::RecommendedWatcher,
    rx: crossbeam_channel::Receiver<notify::Result<Event>>,
    root: PathBuf,
    /// Debounce tracking - prevents duplicate events
    debounce: HashMap<PathBuf, Instant>,
    debounce_duration: Duration,
}

impl AssetWatcher {
    /// Start watching `root` recursively, creating it if needed
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.exists() {
            std::fs::create_dir_all(root)?;
        }
        let root = root.canonicalize()?;

        let (tx, rx) = crossbeam_channel::unbounded();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        log::info!("Watching asset directory: {:?}", root);
        Ok(Self {
            _watcher: watcher,
            rx,
            root,
            debounce: HashMap::new(),
            debounce_duration: Duration::from_millis(100),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Set debounce duration
    pub fn set_debounce(&mut self, duration: Duration) {
        self.debounce_duration = duration;
    }

    /// Drain pending events into asset-relative paths
    pub fn poll(&mut self) -> Vec<String> {
        let now = Instant::now();
        let mut changed = Vec::new();

        while let Ok(result) = self.rx.try_recv() {
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    log::warn!("File watcher error: {}", e);
                    continue;
                }
            };

            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                continue;
            }

            for path in event.paths {
                if path.is_dir() {
                    continue;
                }

                if let Some(last) = self.debounce.get(&path) {
                    if now.duration_since(*last) < self.debounce_duration {
                        continue;
                    }
                }

                let Some(relative) = self.relative(&path) else {
                    continue;
                };
                self.debounce.insert(path, now);
                if !changed.contains(&relative) {
                    changed.push(relative);
                }
            }
        }

        // Clean up old debounce entries
        self.debounce
            .retain(|_, time| now.duration_since(*time) < Duration::from_secs(5));

        changed
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect();
        Some(parts.join("/"))
    }
}

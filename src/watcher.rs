//! Bridges `notify`'s blocking callback thread into the async world: the
//! watcher thread pushes raw events onto a bounded channel, and a tokio task
//! drains it, drops anything `PathFilter` wouldn't index, and calls into
//! `CacheManager` (§4.11).

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::cache_manager::CacheManager;

const CHANNEL_CAPACITY: usize = 1024;

pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    bridge: tokio::task::JoinHandle<()>,
}

impl FileWatcher {
    pub fn start(cache_manager: Arc<CacheManager>, roots: &[PathBuf]) -> notify::Result<Self> {
        let (tx, rx) = mpsc::channel::<Event>(CHANNEL_CAPACITY);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if tx.blocking_send(event).is_err() {
                    tracing::warn!("file watcher bridge channel closed, dropping event");
                }
            }
            Err(e) => tracing::error!(error = %e, "file watcher error"),
        })?;

        for root in roots {
            watcher.watch(root, RecursiveMode::Recursive)?;
        }

        let bridge = tokio::spawn(bridge_loop(cache_manager, rx));

        Ok(Self { _watcher: watcher, bridge })
    }

    pub fn stop(self) {
        self.bridge.abort();
    }
}

async fn bridge_loop(cache_manager: Arc<CacheManager>, mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        for path in event.paths {
            if !cache_manager.path_filter().should_include(&path) {
                continue;
            }
            let result = match event.kind {
                EventKind::Remove(_) => cache_manager.remove(&path).await,
                EventKind::Create(_) | EventKind::Modify(_) => {
                    if path.exists() {
                        cache_manager.invalidate(&path).await
                    } else {
                        cache_manager.remove(&path).await
                    }
                }
                _ => continue,
            };
            if let Err(e) = result {
                tracing::warn!(path = %path.display(), error = %e, "watcher-driven reindex failed");
            }
        }
    }
}

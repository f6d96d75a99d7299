//! Process-wide singleton tying `CacheManager` and `FileWatcher` together,
//! so CLI/embedder-caller code gets a single `initialize`/`dispose` pair
//! instead of threading both objects through every call site.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use crate::cache_manager::CacheManager;
use crate::config::Config;
use crate::watcher::FileWatcher;

pub struct Facade {
    pub cache_manager: Arc<CacheManager>,
    watcher: Option<FileWatcher>,
}

fn slot() -> &'static Mutex<Option<Facade>> {
    static SLOT: OnceLock<Mutex<Option<Facade>>> = OnceLock::new();
    SLOT.get_or_init(|| Mutex::new(None))
}

/// Bring the singleton up: cache manager first (it owns the worker pool),
/// then the watcher (it depends on the cache manager being ready to accept
/// updates). Re-entrant: a second call disposes the old instance first.
pub async fn initialize(workspace_root: PathBuf, config: Config, exe: PathBuf) -> anyhow::Result<()> {
    dispose().await;

    let roots = if config.include_paths.is_empty() { vec![workspace_root.clone()] } else { config.include_paths.clone() };

    let cache_manager = Arc::new(CacheManager::initialize(workspace_root, config, exe).await?);

    // Kicked off in the background so the editor stays responsive while the
    // initial scan/tag/embed pass runs (§4.10); the watcher is already live
    // by the time this returns, so edits during the scan aren't lost.
    let background_cache_manager = cache_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = background_cache_manager.build_initial_index().await {
            tracing::error!(error = %e, "initial index build failed");
        }
    });

    let watcher = FileWatcher::start(cache_manager.clone(), &roots)?;

    let mut guard = slot().lock().unwrap();
    *guard = Some(Facade { cache_manager, watcher: Some(watcher) });
    Ok(())
}

/// Tear down in reverse order: watcher first so no new events arrive mid
/// shutdown, then the cache manager (which stops the worker host).
pub async fn dispose() {
    let taken = slot().lock().unwrap().take();
    if let Some(mut facade) = taken {
        if let Some(watcher) = facade.watcher.take() {
            watcher.stop();
        }
        facade.cache_manager.shutdown().await;
    }
}

pub fn cache_manager() -> Option<Arc<CacheManager>> {
    slot().lock().unwrap().as_ref().map(|f| f.cache_manager.clone())
}

pub fn is_initialized() -> bool {
    slot().lock().unwrap().is_some()
}

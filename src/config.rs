use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Recognized configuration options (§6). Layered the way the reference
/// crate's `Config` is: serde defaults per field group, overridable by a
/// workspace-relative JSON file, overridable again by CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Worker thread count; 0 means "auto = host CPU count".
    pub worker_threads: usize,
    /// Roots to scan; empty defaults to workspace folders.
    pub include_paths: Vec<PathBuf>,
    /// Glob patterns excluded even under an include root.
    pub exclude_patterns: Vec<String>,
    /// Extensions admitted (leading dot, compared case-insensitively).
    pub file_extensions: Vec<String>,
    /// Tagger binary (e.g. `ctags`).
    pub ctags_path: String,
    /// Gate the embedding pipeline.
    pub enable_embeddings: bool,
    /// Directory the derived index lives under, relative to the workspace root.
    pub cache_dir: PathBuf,
    pub embedder: EmbedderConfig,
    pub huge_safety: ScanSafetyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            include_paths: vec![],
            exclude_patterns: vec![],
            file_extensions: vec![
                ".c".into(), ".h".into(), ".cc".into(), ".cpp".into(), ".cxx".into(),
                ".hpp".into(), ".hh".into(), ".hxx".into(),
            ],
            ctags_path: "ctags".into(),
            enable_embeddings: true,
            cache_dir: PathBuf::from(".cache/vsctoolbox/index"),
            embedder: EmbedderConfig::default(),
            huge_safety: ScanSafetyConfig::default(),
        }
    }
}

/// Hard safety ceiling independent of any config: never try to tag or chunk
/// a file this large, regardless of what the config says.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSafetyConfig {
    pub max_file_bytes: u64,
}

impl Default for ScanSafetyConfig {
    fn default() -> Self {
        Self { max_file_bytes: 2_000_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    pub base_url: String,
    pub dims: usize,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8088".into(),
            dims: 768,
        }
    }
}

/// Load `<workspace>/.vsctoolbox.json`, falling back to defaults on any
/// read/parse failure (matches the reference crate's `load_config`: missing
/// or malformed config is never a hard error).
pub fn load_config(workspace_root: &Path) -> Config {
    let path = workspace_root.join(".vsctoolbox.json");
    let Ok(text) = std::fs::read_to_string(&path) else {
        return Config::default();
    };
    serde_json::from_str::<Config>(&text).unwrap_or_else(|e| {
        tracing::warn!(error = %e, path = %path.display(), "malformed config, using defaults");
        Config::default()
    })
}

pub fn resolved_worker_threads(cfg: &Config) -> usize {
    if cfg.worker_threads == 0 {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
    } else {
        cfg.worker_threads
    }
}

use std::path::PathBuf;

/// Typed failure kinds for the indexing engine (§7 of the design).
///
/// Call sites that merge unrelated failure sources (CLI bootstrap, facade
/// init) use `anyhow::Result` instead; this enum exists so per-file and
/// per-batch outcomes carry a loggable, matchable reason rather than an
/// opaque string.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("unreadable source {path}: {source}")]
    UnreadableSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("tagger failed for {path}: {message}")]
    TaggerFailed { path: PathBuf, message: String },

    #[error("tagger timed out for {path} after {millis}ms")]
    TaggerTimeout { path: PathBuf, millis: u64 },

    #[error("malformed tag file {path}: {message}")]
    MalformedTagFile { path: PathBuf, message: String },

    #[error("embedder unavailable: {0}")]
    EmbedderUnavailable(String),

    #[error("embedder returned a partial batch: {failed}/{total} items failed")]
    EmbedderPartialFailure { failed: usize, total: usize },

    #[error("vector store I/O error: {0}")]
    VectorStoreIo(String),

    #[error("worker crashed: {0}")]
    WorkerCrash(String),

    #[error("worker host crashed: {0}")]
    HostCrash(String),

    #[error("operation cancelled")]
    Cancelled,
}

pub type IndexResult<T> = Result<T, IndexError>;

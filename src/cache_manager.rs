//! Top-level orchestrator (§5): owns the worker pool, the vector store, the
//! embedder client, and the per-file freshness map, and sequences the
//! index → chunk → embed pipeline for both the initial scan and
//! single-file updates from the watcher. Grounded in the reference crate's
//! `CodebaseIndex` (`vector_store.rs`), generalized from its single
//! in-process pass to the worker-pool pipeline this design uses.

use ignore::WalkBuilder;
use sha2::Digest;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::chunker;
use crate::config::Config;
use crate::embedder::LlamaEmbedder;
use crate::embedding_processor;
use crate::error::{IndexError, IndexResult};
use crate::file_index::FileIndex;
use crate::ipc::{ChunkInput, IndexInput, IndexStatus};
use crate::path_filter::PathFilter;
use crate::thread_pool::ThreadPool;
use crate::vector_db::{NearestChunk, VectorDatabase};

/// §4.8: the tag-run/chunk-compute phase batches up to this many files into
/// a single `index_batch`/`chunk_batch` pool call.
const TAG_BATCH_SIZE: usize = 500;

pub struct CacheManager {
    config: Config,
    workspace_root: PathBuf,
    path_filter: PathFilter,
    thread_pool: Arc<ThreadPool>,
    vector_db: Arc<Mutex<VectorDatabase>>,
    embedder: LlamaEmbedder,
    files: Mutex<HashMap<PathBuf, FileIndex>>,
}

/// `<bucket>/<basename>.<UPPER16HEX>.tags` — bucket is the lowercased first
/// character of the basename if it falls in `a..z`, else `_`; the hex
/// component is the first 16 hex chars of a sha256 over the full source
/// path, uppercased, so two files named the same in different directories
/// never collide (§6).
fn tags_path_for(cache_dir: &Path, source_path: &Path) -> PathBuf {
    let basename = source_path.file_name().and_then(|n| n.to_str()).unwrap_or("_");
    let bucket_char = basename.chars().next().map(|c| c.to_ascii_lowercase()).unwrap_or('_');
    let bucket = if bucket_char.is_ascii_lowercase() { bucket_char.to_string() } else { "_".to_string() };

    let digest = sha2::Sha256::digest(source_path.to_string_lossy().as_bytes());
    let hex16: String = format!("{digest:x}").chars().take(16).collect::<String>().to_uppercase();

    cache_dir.join("ctags").join(bucket).join(format!("{basename}.{hex16}.tags"))
}

impl CacheManager {
    pub async fn initialize(workspace_root: PathBuf, config: Config, exe: PathBuf) -> IndexResult<Self> {
        let cache_dir = workspace_root.join(&config.cache_dir);
        for bucket in "abcdefghijklmnopqrstuvwxyz_".chars() {
            std::fs::create_dir_all(cache_dir.join("ctags").join(bucket.to_string()))
                .map_err(|e| IndexError::VectorStoreIo(format!("create cache dir: {e}")))?;
        }

        let num_threads = crate::config::resolved_worker_threads(&config);
        let thread_pool = ThreadPool::spawn(&exe, num_threads).await?;
        // `ThreadPool::spawn` returns an `Arc` directly: the reader task holds a
        // `Weak` back-reference to it so it can respawn the host without the
        // caller having to keep the pool alive for it.
        let vector_db = VectorDatabase::open(&cache_dir.join("vectordb").join("records.jsonl"))?;
        let embedder = LlamaEmbedder::new(&config.embedder);

        let path_filter = PathFilter::new(
            config.include_paths.clone(),
            &config.exclude_patterns,
            &config.file_extensions,
            &[workspace_root.clone()],
            None,
            cfg!(windows),
        );

        Ok(Self {
            config,
            workspace_root,
            path_filter,
            thread_pool,
            vector_db: Arc::new(Mutex::new(vector_db)),
            embedder,
            files: Mutex::new(HashMap::new()),
        })
    }

    fn tags_path(&self, source_path: &Path) -> PathBuf {
        tags_path_for(&self.workspace_root.join(&self.config.cache_dir), source_path)
    }

    fn candidate_paths(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        for root in self.path_filter.include_roots() {
            let walker = WalkBuilder::new(root).hidden(false).build();
            for entry in walker.flatten() {
                let path = entry.path().to_path_buf();
                if path.is_file() && self.path_filter.should_include(&path) {
                    out.push(path);
                }
            }
        }
        out
    }

    /// Discover every candidate file and index it in batches of
    /// `TAG_BATCH_SIZE`, yielding to the runtime between batches so a large
    /// workspace doesn't starve other tasks during the initial scan (§4.8).
    pub async fn build_initial_index(&self) -> IndexResult<Vec<PathBuf>> {
        let paths = self.candidate_paths();
        for batch in paths.chunks(TAG_BATCH_SIZE) {
            self.index_files(batch).await?;
            tokio::task::yield_now().await;
        }
        Ok(paths)
    }

    /// Index, chunk, and (if enabled) embed a single file. Used for
    /// watcher-driven create events; routes through the same batched
    /// pipeline as the initial scan with a batch of one.
    pub async fn add(&self, source_path: &Path) -> IndexResult<()> {
        self.index_files(std::slice::from_ref(&source_path.to_path_buf())).await
    }

    /// Tag, chunk, and embed every file in `paths` via one `index_batch`
    /// call, then (if embeddings are enabled) one `chunk_batch` + one
    /// `EmbeddingProcessor::run` call per `embedding_processor::BATCH_SIZE`
    /// sub-group (§2, §4.7, §4.8). A single bad file within the batch is
    /// logged and skipped rather than aborting every other file's work.
    async fn index_files(&self, paths: &[PathBuf]) -> IndexResult<()> {
        if paths.is_empty() {
            return Ok(());
        }

        let mut admitted: Vec<PathBuf> = Vec::with_capacity(paths.len());
        for path in paths {
            match std::fs::metadata(path) {
                Ok(meta) if meta.len() > self.config.huge_safety.max_file_bytes => {
                    tracing::warn!(path = %path.display(), size = meta.len(), "skipping oversized file");
                }
                Ok(_) => admitted.push(path.clone()),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable file");
                }
            }
        }
        if admitted.is_empty() {
            return Ok(());
        }

        let index_inputs: Vec<IndexInput> = admitted
            .iter()
            .map(|path| IndexInput {
                source_path: path.to_string_lossy().into_owned(),
                tags_path: self.tags_path(path).to_string_lossy().into_owned(),
                ctags_path: self.config.ctags_path.clone(),
            })
            .collect();
        let index_outputs = self.thread_pool.index_batch(index_inputs).await?;

        let mut tagged: Vec<PathBuf> = Vec::with_capacity(admitted.len());
        for (path, result) in admitted.iter().zip(index_outputs.iter()) {
            if result.status == IndexStatus::Failed {
                tracing::warn!(path = %path.display(), error = ?result.error, "tagger failed, skipping file");
                continue;
            }
            tagged.push(path.clone());
        }

        if self.config.enable_embeddings {
            for embed_batch in tagged.chunks(embedding_processor::BATCH_SIZE) {
                let chunk_inputs: Vec<ChunkInput> = embed_batch
                    .iter()
                    .map(|path| ChunkInput {
                        source_path: path.to_string_lossy().into_owned(),
                        tags_path: self.tags_path(path).to_string_lossy().into_owned(),
                    })
                    .collect();
                let chunk_outputs = self.thread_pool.chunk_batch(chunk_inputs).await?;

                let mut files: Vec<(String, Vec<chunker::Chunk>)> = Vec::with_capacity(embed_batch.len());
                for output in chunk_outputs {
                    if let Some(err) = output.error {
                        tracing::warn!(file = %output.file_path, error = %err, "chunk compute failed, skipping file's embeddings");
                        continue;
                    }
                    let chunks = output
                        .chunks
                        .into_iter()
                        .map(|c| chunker::Chunk { start_line: c.start_line, end_line: c.end_line, text: c.text, sha256: c.sha256 })
                        .collect();
                    files.push((output.file_path, chunks));
                }

                let mut db = self.vector_db.lock().await;
                embedding_processor::run(&mut db, &self.embedder, &files).await?;
            }
        }

        let mut files_map = self.files.lock().await;
        for path in &tagged {
            let tags_path = self.tags_path(path);
            files_map.insert(path.clone(), FileIndex::new(path.clone(), tags_path));
        }
        Ok(())
    }

    /// Re-index `source_path` only if its content hash no longer matches
    /// what's on record; always clear its symbol LRU entry regardless
    /// (§4.8/§4.9).
    pub async fn invalidate(&self, source_path: &Path) -> IndexResult<()> {
        let stale = match self.files.lock().await.get(source_path) {
            Some(entry) => {
                entry.invalidate_cache();
                !entry.is_valid()
            }
            None => true,
        };
        if stale {
            self.index_files(std::slice::from_ref(&source_path.to_path_buf())).await?;
        }
        Ok(())
    }

    pub async fn remove(&self, source_path: &Path) -> IndexResult<()> {
        if let Some(entry) = self.files.lock().await.remove(source_path) {
            entry.invalidate_cache();
            let _ = std::fs::remove_file(&entry.tags_path);
        }
        let file_key = source_path.to_string_lossy().into_owned();
        self.vector_db.lock().await.delete_file(&file_key)
    }

    /// Look up one file's entry. If `ensure_valid`, an entry that fails
    /// `is_valid` is re-indexed (single-item batch) before being returned
    /// (§4.8).
    pub async fn get(&self, source_path: &Path, ensure_valid: bool) -> IndexResult<Option<FileIndex>> {
        if ensure_valid {
            let needs_reindex = matches!(self.files.lock().await.get(source_path), Some(entry) if !entry.is_valid());
            if needs_reindex {
                self.index_files(std::slice::from_ref(&source_path.to_path_buf())).await?;
            }
        }
        Ok(self.files.lock().await.get(source_path).cloned())
    }

    /// Same as [`get`](Self::get) but over every tracked entry: when
    /// `ensure_valid`, every stale entry is collected and re-indexed in one
    /// pool batch rather than one call per file (§4.8).
    pub async fn get_all(&self, ensure_valid: bool) -> IndexResult<Vec<FileIndex>> {
        if ensure_valid {
            let stale: Vec<PathBuf> = {
                let files = self.files.lock().await;
                files.values().filter(|e| !e.is_valid()).map(|e| e.source_path.clone()).collect()
            };
            if !stale.is_empty() {
                self.index_files(&stale).await?;
            }
        }
        Ok(self.files.lock().await.values().cloned().collect())
    }

    pub async fn get_all_paths(&self) -> Vec<PathBuf> {
        self.files.lock().await.keys().cloned().collect()
    }

    pub async fn get_nearest_embeddings(
        &self,
        file_path: Option<&str>,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Vec<NearestChunk> {
        self.vector_db.lock().await.get_nearest_file_chunks(file_path, query_embedding, top_k)
    }

    pub async fn search(&self, patterns: Vec<String>, literals: Vec<Vec<String>>) -> IndexResult<Vec<crate::ipc::SearchOutput>> {
        let paths = self.get_all_paths().await;
        let inputs = paths
            .into_iter()
            .map(|p| crate::ipc::SearchInput {
                file_path: p.to_string_lossy().into_owned(),
                patterns: patterns.clone(),
                literals: literals.clone(),
            })
            .collect();
        self.thread_pool.search_batch(inputs).await
    }

    /// Replace the live config. Path-filter-affecting fields take effect on
    /// the next `build_initial_index`; already-cached files are left in
    /// place until the watcher or a rescan revisits them.
    pub fn update_config(&mut self, config: Config) {
        self.path_filter = PathFilter::new(
            config.include_paths.clone(),
            &config.exclude_patterns,
            &config.file_extensions,
            &[self.workspace_root.clone()],
            None,
            cfg!(windows),
        );
        self.config = config;
    }

    pub async fn shutdown(&self) {
        self.thread_pool.shutdown().await;
    }

    pub fn path_filter(&self) -> &PathFilter {
        &self.path_filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_path_is_stable_for_the_same_source_path() {
        let cache_dir = PathBuf::from("/tmp/cache");
        let a = tags_path_for(&cache_dir, Path::new("/repo/src/main.c"));
        let b = tags_path_for(&cache_dir, Path::new("/repo/src/main.c"));
        assert_eq!(a, b);
    }

    #[test]
    fn tags_path_differs_for_different_sources() {
        let cache_dir = PathBuf::from("/tmp/cache");
        let a = tags_path_for(&cache_dir, Path::new("/repo/src/a.c"));
        let b = tags_path_for(&cache_dir, Path::new("/repo/src/b.c"));
        assert_ne!(a, b);
    }
}

//! Append-only embedding store, one JSON line per event. A chunk's identity
//! is its content hash, not its line range, so a pure line shift (content
//! above it changed, the chunk itself didn't) can be recorded as a cheap
//! "move" without re-embedding (§4.9). Deletes are tombstones, not
//! rewrites — the file is a log; `open` folds it down to current state.
//! Schema grounded in the reference crate's flat-file `vector_store.rs`,
//! generalized from its xxh3/file-line identity to a content-hash one.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{IndexError, IndexResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    pub start_line: u32,
    pub end_line: u32,
    pub sha256: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorRecord {
    file_path: String,
    sha256: String,
    start_line: u32,
    end_line: u32,
    embedding: Vec<f32>,
    deleted: bool,
}

#[derive(Debug, Clone)]
pub struct NearestChunk {
    pub file_path: String,
    pub sha256: String,
    pub start_line: u32,
    pub end_line: u32,
    pub score: f32,
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// `(file_path, sha256)` is the logical key; `HashMap` value is `None` once
/// tombstoned so a stale live record never resurfaces after a delete.
pub struct VectorDatabase {
    path: PathBuf,
    live: HashMap<(String, String), VectorRecord>,
}

impl VectorDatabase {
    pub fn open(path: &Path) -> IndexResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| IndexError::VectorStoreIo(format!("create {}: {e}", parent.display())))?;
        }
        let mut live: HashMap<(String, String), VectorRecord> = HashMap::new();
        if path.exists() {
            let text = std::fs::read_to_string(path).map_err(|e| IndexError::VectorStoreIo(e.to_string()))?;
            for line in text.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let record: VectorRecord = serde_json::from_str(line)
                    .map_err(|e| IndexError::VectorStoreIo(format!("malformed record: {e}")))?;
                let key = (record.file_path.clone(), record.sha256.clone());
                if record.deleted {
                    live.remove(&key);
                } else {
                    live.insert(key, record);
                }
            }
        }
        Ok(Self { path: path.to_path_buf(), live })
    }

    fn append(&self, record: &VectorRecord) -> IndexResult<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| IndexError::VectorStoreIo(e.to_string()))?;
        let mut line = serde_json::to_string(record).map_err(|e| IndexError::VectorStoreIo(e.to_string()))?;
        line.push('\n');
        file.write_all(line.as_bytes()).map_err(|e| IndexError::VectorStoreIo(e.to_string()))?;
        Ok(())
    }

    pub fn add(&mut self, file_path: &str, chunk: &EmbeddedChunk) -> IndexResult<()> {
        let record = VectorRecord {
            file_path: file_path.to_string(),
            sha256: chunk.sha256.clone(),
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            embedding: chunk.embedding.clone(),
            deleted: false,
        };
        self.append(&record)?;
        self.live.insert((record.file_path.clone(), record.sha256.clone()), record);
        Ok(())
    }

    /// Re-position a chunk whose content didn't change, without touching its
    /// embedding. No-op (with a warning) if the chunk isn't currently live.
    pub fn update_lines(&mut self, file_path: &str, sha256: &str, start_line: u32, end_line: u32) -> IndexResult<()> {
        let key = (file_path.to_string(), sha256.to_string());
        let Some(existing) = self.live.get(&key).cloned() else {
            tracing::warn!(file_path, sha256, "update_lines on unknown chunk, ignoring");
            return Ok(());
        };
        let moved = VectorRecord { start_line, end_line, ..existing };
        self.append(&moved)?;
        self.live.insert(key, moved);
        Ok(())
    }

    pub fn delete_chunk(&mut self, file_path: &str, sha256: &str) -> IndexResult<()> {
        let key = (file_path.to_string(), sha256.to_string());
        if let Some(existing) = self.live.remove(&key) {
            self.append(&VectorRecord { deleted: true, ..existing })?;
        }
        Ok(())
    }

    pub fn delete_file(&mut self, file_path: &str) -> IndexResult<()> {
        let hashes: Vec<String> = self
            .live
            .keys()
            .filter(|(f, _)| f == file_path)
            .map(|(_, h)| h.clone())
            .collect();
        for hash in hashes {
            self.delete_chunk(file_path, &hash)?;
        }
        Ok(())
    }

    pub fn live_hashes_for_file(&self, file_path: &str) -> Vec<String> {
        self.live.keys().filter(|(f, _)| f == file_path).map(|(_, h)| h.clone()).collect()
    }

    pub fn get_nearest_file_chunks(
        &self,
        file_path: Option<&str>,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Vec<NearestChunk> {
        let mut scored: Vec<NearestChunk> = self
            .live
            .values()
            .filter(|r| file_path.map(|f| f == r.file_path).unwrap_or(true))
            .map(|r| NearestChunk {
                file_path: r.file_path.clone(),
                sha256: r.sha256.clone(),
                start_line: r.start_line,
                end_line: r.end_line,
                score: cosine_similarity(query_embedding, &r.embedding),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

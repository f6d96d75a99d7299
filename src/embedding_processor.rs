//! Public entry `run(files)` (§4.7): processes files in fixed-size batches
//! of `BATCH_SIZE`. For each batch, diffs every file's freshly computed
//! chunks against what's already embedded — deletes dropped chunks,
//! re-positions unchanged ones without touching their vectors, and calls the
//! embedder once for the whole batch's worth of genuinely new text — so a
//! 500-file initial scan costs a handful of embedder round trips, not one
//! per file.

use std::collections::HashSet;

use crate::chunker::Chunk;
use crate::embedder::LlamaEmbedder;
use crate::error::IndexResult;
use crate::vector_db::{EmbeddedChunk, VectorDatabase};

pub const BATCH_SIZE: usize = 50;

#[derive(Debug, Default, Clone, Copy)]
pub struct DiffSummary {
    pub deleted: usize,
    pub moved: usize,
    pub embedded: usize,
}

/// Diff-and-embed a single file's chunks. A thin wrapper over [`run`] for
/// single-file incremental updates (watcher-driven create/modify).
pub async fn reconcile_file(
    vector_db: &mut VectorDatabase,
    embedder: &LlamaEmbedder,
    file_path: &str,
    chunks: &[Chunk],
) -> IndexResult<DiffSummary> {
    run(vector_db, embedder, std::slice::from_ref(&(file_path.to_string(), chunks.to_vec()))).await
}

/// Batch entry point: `files` is every file's `(path, freshly computed
/// chunks)` pair for this indexing pass. Processed `BATCH_SIZE` files at a
/// time; an unchanged file within a batch produces zero deletes, zero
/// updates, zero embeddings.
pub async fn run(
    vector_db: &mut VectorDatabase,
    embedder: &LlamaEmbedder,
    files: &[(String, Vec<Chunk>)],
) -> IndexResult<DiffSummary> {
    let mut summary = DiffSummary::default();

    for batch in files.chunks(BATCH_SIZE) {
        let mut texts: Vec<String> = Vec::new();
        let mut texts_meta: Vec<(String, Chunk)> = Vec::new();

        for (file_path, chunks) in batch {
            let existing: HashSet<String> = vector_db.live_hashes_for_file(file_path).into_iter().collect();
            let incoming: HashSet<&str> = chunks.iter().map(|c| c.sha256.as_str()).collect();

            for hash in existing.iter().filter(|h| !incoming.contains(h.as_str())) {
                vector_db.delete_chunk(file_path, hash)?;
                summary.deleted += 1;
            }

            for chunk in chunks {
                if existing.contains(&chunk.sha256) {
                    vector_db.update_lines(file_path, &chunk.sha256, chunk.start_line, chunk.end_line)?;
                    summary.moved += 1;
                } else {
                    texts.push(chunk.text.clone());
                    texts_meta.push((file_path.clone(), chunk.clone()));
                }
            }
        }

        if !texts.is_empty() {
            let embeddings = embedder.embed_batch(&texts).await?;
            for ((file_path, chunk), embedding) in texts_meta.into_iter().zip(embeddings) {
                vector_db.add(
                    &file_path,
                    &EmbeddedChunk {
                        start_line: chunk.start_line,
                        end_line: chunk.end_line,
                        sha256: chunk.sha256.clone(),
                        embedding,
                    },
                )?;
                summary.embedded += 1;
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbedderConfig;

    fn chunk(sha256: &str, start: u32, end: u32, text: &str) -> Chunk {
        Chunk { start_line: start, end_line: end, text: text.into(), sha256: sha256.into() }
    }

    #[tokio::test]
    async fn unchanged_hash_is_repositioned_without_touching_the_embedder() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = VectorDatabase::open(&dir.path().join("vectordb")).unwrap();
        db.add(
            "a.c",
            &EmbeddedChunk { start_line: 1, end_line: 10, sha256: "h1".into(), embedding: vec![1.0, 0.0] },
        )
        .unwrap();

        let embedder = LlamaEmbedder::new(&EmbedderConfig { base_url: "http://127.0.0.1:1".into(), dims: 2 });
        let chunks = vec![chunk("h1", 5, 14, "same body")];
        let summary = reconcile_file(&mut db, &embedder, "a.c", &chunks).await.unwrap();

        assert_eq!(summary.moved, 1);
        assert_eq!(summary.embedded, 0);
        let nearest = db.get_nearest_file_chunks(Some("a.c"), &[1.0, 0.0], 1);
        assert_eq!(nearest[0].start_line, 5);
    }

    #[tokio::test]
    async fn dropped_chunk_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = VectorDatabase::open(&dir.path().join("vectordb")).unwrap();
        db.add(
            "a.c",
            &EmbeddedChunk { start_line: 1, end_line: 10, sha256: "stale".into(), embedding: vec![1.0, 0.0] },
        )
        .unwrap();

        let embedder = LlamaEmbedder::new(&EmbedderConfig { base_url: "http://127.0.0.1:1".into(), dims: 2 });
        let summary = reconcile_file(&mut db, &embedder, "a.c", &[]).await.unwrap();

        assert_eq!(summary.deleted, 1);
        assert!(db.is_empty());
    }

    /// Testable property from §4.7: diffing is per-file but one `run` call
    /// covers every file in the batch, and an unchanged file contributes
    /// zero deletes/updates/embeddings alongside files that do change.
    #[tokio::test]
    async fn run_diffs_several_files_in_one_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = VectorDatabase::open(&dir.path().join("vectordb")).unwrap();
        db.add("unchanged.c", &EmbeddedChunk { start_line: 1, end_line: 5, sha256: "same".into(), embedding: vec![1.0, 0.0] }).unwrap();
        db.add("stale.c", &EmbeddedChunk { start_line: 1, end_line: 5, sha256: "gone".into(), embedding: vec![0.0, 1.0] }).unwrap();

        let embedder = LlamaEmbedder::new(&EmbedderConfig { base_url: "http://127.0.0.1:1".into(), dims: 2 });
        let files = vec![
            ("unchanged.c".to_string(), vec![chunk("same", 5, 9, "same body")]),
            ("stale.c".to_string(), vec![]),
        ];
        let summary = run(&mut db, &embedder, &files).await.unwrap();

        assert_eq!(summary.moved, 1);
        assert_eq!(summary.deleted, 1);
        assert_eq!(summary.embedded, 0);
        assert!(db.live_hashes_for_file("stale.c").is_empty());
        let nearest = db.get_nearest_file_chunks(Some("unchanged.c"), &[1.0, 0.0], 1);
        assert_eq!(nearest[0].start_line, 5);
    }
}

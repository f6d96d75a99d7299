//! The child process spawned by `thread_pool`: reads `HostRequest` lines from
//! stdin, fans each batch out across `num_threads` workers, and writes one
//! `HostResponse` line per request to stdout. A panic inside one worker only
//! loses that worker's share of the batch — every item it was holding comes
//! back as a per-item failure rather than taking the whole batch down.

use rayon::prelude::*;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::ipc::{
    ChunkInput, ChunkOutput, HostRequest, HostResponse, IndexInput, IndexOutput, IndexStatus, SearchInput, SearchOutput,
};
use crate::worker;

/// Split `items` into at most `num_threads` roughly-equal groups (ceil
/// division), so `T` workers never sit idle while one carries the remainder.
fn split_batches<T>(items: Vec<T>, num_threads: usize) -> Vec<Vec<T>> {
    let num_threads = num_threads.max(1);
    if items.is_empty() {
        return vec![];
    }
    let chunk_size = items.len().div_ceil(num_threads);
    let mut out = Vec::new();
    let mut rest = items;
    while !rest.is_empty() {
        let at = chunk_size.min(rest.len());
        let tail = rest.split_off(at);
        out.push(rest);
        rest = tail;
    }
    out
}

/// Await every group's handle, concatenating successful outputs; a group
/// whose worker panicked gets one synthesized output per lost item instead
/// of vanishing from the result (§4.4/§9: `outputs.len() == inputs.len()`
/// always holds, even under a crash).
async fn collect_with_crash_backfill<T>(
    handles: Vec<(Vec<String>, tokio::task::JoinHandle<Vec<T>>)>,
    on_crash: impl Fn(String) -> T,
) -> Vec<T> {
    let mut out = Vec::new();
    for (paths, handle) in handles {
        match handle.await {
            Ok(results) => out.extend(results),
            Err(_join_err) => {
                tracing::error!("worker crashed; marking {} item(s) failed", paths.len());
                out.extend(paths.into_iter().map(&on_crash));
            }
        }
    }
    out
}

async fn run_search_batch(inputs: Vec<SearchInput>, num_threads: usize) -> Vec<SearchOutput> {
    let groups = split_batches(inputs, num_threads);
    let mut handles = Vec::new();
    for group in groups {
        let paths: Vec<String> = group.iter().map(|i| i.file_path.clone()).collect();
        // Each worker's sub-batch still does its own read-and-regex pass per
        // file; rayon fans that out across the group instead of running it
        // as one long sequential scan (mirrors the reference crate's
        // par_iter read+hash sweep in `vector_store.rs`).
        let handle =
            tokio::task::spawn_blocking(move || group.par_iter().map(worker::execute_search).collect::<Vec<_>>());
        handles.push((paths, handle));
    }
    collect_with_crash_backfill(handles, |path| SearchOutput {
        file_path: path,
        matches: vec![],
        error: Some("worker crashed".to_string()),
    })
    .await
}

/// Run an index batch, recovering the source paths of a crashed worker's
/// share so every lost item still gets an explicit `Failed` output instead
/// of silently vanishing from the response.
async fn run_index_batch_recoverable(inputs: Vec<IndexInput>, num_threads: usize) -> Vec<IndexOutput> {
    let groups = split_batches(inputs, num_threads);
    let mut handles = Vec::new();
    for group in groups {
        let paths: Vec<String> = group.iter().map(|i| i.source_path.clone()).collect();
        let handle = tokio::spawn(async move {
            let mut results = Vec::with_capacity(group.len());
            for item in &group {
                results.push(worker::execute_index(item).await);
            }
            results
        });
        handles.push((paths, handle));
    }
    collect_with_crash_backfill(handles, |path| IndexOutput {
        file_path: path,
        status: IndexStatus::Failed,
        error: Some("worker crashed".to_string()),
    })
    .await
}

async fn run_chunk_batch(inputs: Vec<ChunkInput>, num_threads: usize) -> Vec<ChunkOutput> {
    let groups = split_batches(inputs, num_threads);
    let mut handles = Vec::new();
    for group in groups {
        let paths: Vec<String> = group.iter().map(|i| i.source_path.clone()).collect();
        let handle =
            tokio::task::spawn_blocking(move || group.par_iter().map(worker::execute_chunk).collect::<Vec<_>>());
        handles.push((paths, handle));
    }
    collect_with_crash_backfill(handles, |path| ChunkOutput {
        file_path: path,
        chunks: vec![],
        error: Some("worker crashed".to_string()),
    })
    .await
}

/// Entry point for the hidden `--worker-host` re-exec (see `main.rs`). Blocks
/// until stdin closes or a `Shutdown` request arrives.
pub async fn run() -> anyhow::Result<()> {
    let mut num_threads = crate::config::resolved_worker_threads(&crate::config::Config::default());
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: HostRequest = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable host request, skipping");
                continue;
            }
        };

        let response = match request {
            HostRequest::Init { num_threads: n } => {
                num_threads = n;
                HostResponse::InitAck { num_threads }
            }
            HostRequest::Shutdown => break,
            HostRequest::SearchBatch { message_id, inputs } => {
                HostResponse::SearchBatch { message_id, outputs: run_search_batch(inputs, num_threads).await }
            }
            HostRequest::IndexBatch { message_id, inputs } => {
                HostResponse::IndexBatch { message_id, outputs: run_index_batch_recoverable(inputs, num_threads).await }
            }
            HostRequest::ChunkBatch { message_id, inputs } => {
                HostResponse::ChunkBatch { message_id, outputs: run_chunk_batch(inputs, num_threads).await }
            }
        };

        let mut line = serde_json::to_string(&response)?;
        line.push('\n');
        stdout.write_all(line.as_bytes()).await?;
        stdout.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_batches_is_ceil_division_and_covers_every_item() {
        let items: Vec<u32> = (0..10).collect();
        let groups = split_batches(items.clone(), 3);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups.iter().map(|g| g.len()).sum::<usize>(), 10);
        let flattened: Vec<u32> = groups.into_iter().flatten().collect();
        assert_eq!(flattened, items);
    }

    #[test]
    fn split_batches_handles_empty_input() {
        let groups: Vec<Vec<u32>> = split_batches(vec![], 4);
        assert!(groups.is_empty());
    }

    #[tokio::test]
    async fn search_batch_recovers_from_a_missing_file_without_losing_other_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let ok_path = dir.path().join("ok.c");
        std::fs::write(&ok_path, "int foo(void);\n").unwrap();

        let inputs = vec![
            SearchInput { file_path: ok_path.to_string_lossy().into_owned(), patterns: vec!["foo".into()], literals: vec![vec!["foo".into()]] },
            SearchInput { file_path: "/does/not/exist.c".into(), patterns: vec!["foo".into()], literals: vec![vec!["foo".into()]] },
        ];
        let outputs = run_search_batch(inputs, 2).await;
        assert_eq!(outputs.len(), 2);
        assert!(outputs.iter().any(|o| o.error.is_none() && !o.matches.is_empty()));
        assert!(outputs.iter().any(|o| o.error.is_some()));
    }

    /// Testable property: `outputs.len() == inputs.len()` even when a
    /// worker panics outright, not just when a single file is unreadable.
    #[tokio::test]
    async fn search_batch_backfills_errors_for_a_panicked_worker() {
        let handles: Vec<(Vec<String>, tokio::task::JoinHandle<Vec<SearchOutput>>)> = vec![(
            vec!["a.c".to_string(), "b.c".to_string()],
            tokio::task::spawn_blocking(|| -> Vec<SearchOutput> { panic!("simulated worker crash") }),
        )];

        let out = collect_with_crash_backfill(handles, |path| SearchOutput {
            file_path: path,
            matches: vec![],
            error: Some("worker crashed".to_string()),
        })
        .await;

        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|o| o.error.as_deref() == Some("worker crashed")));
    }
}

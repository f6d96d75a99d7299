//! Parent-side proxy for the worker host: owns the child process, tags each
//! outbound batch with a `messageId`, and resolves the matching pending
//! future when the reply line comes back. Mirrors the reference crate's
//! MCP stdio client/server split (`server.rs`, `tests/mcp_stdio_smoke.rs`),
//! generalized from a single JSON-RPC stream to three batch kinds.
//!
//! A dead host doesn't wedge the pool: the reader task notices stdout
//! closing, rejects every in-flight call, and respawns a fresh host unless
//! the pool is mid-`shutdown` (§4.4/§7).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};

use crate::error::{IndexError, IndexResult};
use crate::ipc::{ChunkInput, ChunkOutput, HostRequest, HostResponse, IndexInput, IndexOutput, SearchInput, SearchOutput};

const INIT_TIMEOUT: Duration = Duration::from_secs(10);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

type Pending = Arc<Mutex<HashMap<u32, oneshot::Sender<HostResponse>>>>;

struct HostState {
    child: Child,
    stdin: ChildStdin,
    pending: Pending,
    reader: tokio::task::JoinHandle<()>,
}

pub struct ThreadPool {
    exe: PathBuf,
    num_threads: usize,
    state: Mutex<Option<HostState>>,
    next_id: AtomicU32,
    shutting_down: Arc<AtomicBool>,
}

impl ThreadPool {
    /// Spawn the worker host and block until `init-ack` comes back.
    pub async fn spawn(exe: &Path, num_threads: usize) -> IndexResult<Arc<Self>> {
        let pool = Arc::new(Self {
            exe: exe.to_path_buf(),
            num_threads,
            state: Mutex::new(None),
            next_id: AtomicU32::new(1),
            shutting_down: Arc::new(AtomicBool::new(false)),
        });
        pool.connect().await?;
        Ok(pool)
    }

    /// (Re)establish the host process and start a reader task that, on the
    /// host's stdout closing, rejects every call still waiting on a reply
    /// and reconnects automatically — unless `shutdown` asked it to stop.
    async fn connect(self: &Arc<Self>) -> IndexResult<()> {
        let mut child = Command::new(&self.exe)
            .arg("--worker-host")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| IndexError::HostCrash(format!("failed to spawn worker host: {e}")))?;

        let stdin = child.stdin.take().ok_or_else(|| IndexError::HostCrash("no stdin".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| IndexError::HostCrash("no stdout".into()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(relay_stderr(stderr));
        }

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (init_tx, init_rx) = oneshot::channel();
        let init_slot = Arc::new(Mutex::new(Some(init_tx)));

        let reader_pending = pending.clone();
        let weak = Arc::downgrade(self);
        let shutting_down = self.shutting_down.clone();
        let reader = tokio::spawn(async move {
            read_loop(stdout, reader_pending.clone(), init_slot).await;
            reader_pending.lock().await.clear();
            if shutting_down.load(Ordering::SeqCst) {
                return;
            }
            tracing::error!("worker host exited unexpectedly; respawning");
            let Some(pool) = weak.upgrade() else { return };
            if let Err(e) = pool.connect().await {
                tracing::error!(error = %e, "failed to respawn worker host");
            }
        });

        *self.state.lock().await = Some(HostState { child, stdin, pending, reader });

        self.send_request(&HostRequest::Init { num_threads: self.num_threads }).await?;
        match tokio::time::timeout(INIT_TIMEOUT, init_rx).await {
            Ok(Ok(HostResponse::InitAck { .. })) => Ok(()),
            Ok(Ok(_other)) => Err(IndexError::HostCrash("unexpected reply to init".into())),
            Ok(Err(_)) => Err(IndexError::HostCrash("worker host closed before init-ack".into())),
            Err(_) => Err(IndexError::HostCrash("worker host did not ack init within 10s".into())),
        }
    }

    async fn send_request(&self, request: &HostRequest) -> IndexResult<()> {
        let mut line = serde_json::to_string(request).map_err(|e| IndexError::HostCrash(e.to_string()))?;
        line.push('\n');
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or_else(|| IndexError::HostCrash("worker host not connected".into()))?;
        state
            .stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| IndexError::HostCrash(format!("write to worker host failed: {e}")))?;
        state.stdin.flush().await.map_err(|e| IndexError::HostCrash(e.to_string()))?;
        Ok(())
    }

    async fn roundtrip(&self, build: impl FnOnce(u32) -> HostRequest) -> IndexResult<HostResponse> {
        let message_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let guard = self.state.lock().await;
            let state = guard.as_ref().ok_or_else(|| IndexError::HostCrash("worker host not connected".into()))?;
            state.pending.lock().await.insert(message_id, tx);
        }

        self.send_request(&build(message_id)).await?;

        rx.await.map_err(|_| IndexError::HostCrash("worker host crashed before responding".into()))
    }

    pub async fn search_batch(&self, inputs: Vec<SearchInput>) -> IndexResult<Vec<SearchOutput>> {
        match self.roundtrip(|message_id| HostRequest::SearchBatch { message_id, inputs }).await? {
            HostResponse::SearchBatch { outputs, .. } => Ok(outputs),
            _ => Err(IndexError::HostCrash("mismatched reply to searchBatch".into())),
        }
    }

    pub async fn index_batch(&self, inputs: Vec<IndexInput>) -> IndexResult<Vec<IndexOutput>> {
        match self.roundtrip(|message_id| HostRequest::IndexBatch { message_id, inputs }).await? {
            HostResponse::IndexBatch { outputs, .. } => Ok(outputs),
            _ => Err(IndexError::HostCrash("mismatched reply to indexBatch".into())),
        }
    }

    pub async fn chunk_batch(&self, inputs: Vec<ChunkInput>) -> IndexResult<Vec<ChunkOutput>> {
        match self.roundtrip(|message_id| HostRequest::ChunkBatch { message_id, inputs }).await? {
            HostResponse::ChunkBatch { outputs, .. } => Ok(outputs),
            _ => Err(IndexError::HostCrash("mismatched reply to computeChunksBatch".into())),
        }
    }

    /// Ask the host to exit; give it `SHUTDOWN_GRACE` before killing it.
    /// Marks the pool as shutting down first so the reader task doesn't
    /// mistake the resulting stdout close for a crash and respawn.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let _ = self.send_request(&HostRequest::Shutdown).await;
        let mut guard = self.state.lock().await;
        if let Some(mut state) = guard.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, state.child.wait()).await.is_err() {
                let _ = state.child.kill().await;
            }
            state.reader.abort();
        }
    }
}

async fn read_loop(
    stdout: tokio::process::ChildStdout,
    pending: Pending,
    init_slot: Arc<Mutex<Option<oneshot::Sender<HostResponse>>>>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(l)) => l,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "worker host stdout read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let response: HostResponse = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable worker host response");
                continue;
            }
        };
        match &response {
            HostResponse::Log { level, message } => relay_log(*level, message),
            HostResponse::InitAck { .. } => {
                if let Some(tx) = init_slot.lock().await.take() {
                    let _ = tx.send(response);
                }
            }
            HostResponse::SearchBatch { message_id, .. }
            | HostResponse::IndexBatch { message_id, .. }
            | HostResponse::ChunkBatch { message_id, .. } => {
                if let Some(tx) = pending.lock().await.remove(message_id) {
                    let _ = tx.send(response);
                }
            }
        }
    }
}

fn relay_log(level: crate::ipc::LogLevel, message: &str) {
    use crate::ipc::LogLevel;
    match level {
        LogLevel::Debug => tracing::debug!(target: "worker_host", "{message}"),
        LogLevel::Info => tracing::info!(target: "worker_host", "{message}"),
        LogLevel::Warn => tracing::warn!(target: "worker_host", "{message}"),
        LogLevel::Error => tracing::error!(target: "worker_host", "{message}"),
    }
}

async fn relay_stderr(stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::warn!(target: "worker_host_stderr", "{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_are_monotonic() {
        let ids = AtomicU32::new(1);
        let a = ids.fetch_add(1, Ordering::SeqCst);
        let b = ids.fetch_add(1, Ordering::SeqCst);
        assert!(b > a);
    }
}

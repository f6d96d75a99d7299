//! Wire shapes exchanged over the parent↔host pipe and, conceptually,
//! between the host and its worker threads (§4.12, §6). Tagged with
//! `#[serde(tag = "type")]` so each line is self-describing; the parent and
//! the host each run one exhaustive `match` over these.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchInput {
    pub file_path: String,
    /// One regex per AND term, already escaped/expanded by `query.rs`.
    pub patterns: Vec<String>,
    /// Per-pattern literal fragments for the byte-substring pre-filter.
    pub literals: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchMatch {
    pub line: u32,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutput {
    pub file_path: String,
    pub matches: Vec<SearchMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexInput {
    pub source_path: String,
    pub tags_path: String,
    pub ctags_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    Skipped,
    Indexed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexOutput {
    pub file_path: String,
    pub status: IndexStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkInput {
    pub source_path: String,
    pub tags_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkWire {
    pub start_line: u32,
    pub end_line: u32,
    pub text: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkOutput {
    pub file_path: String,
    pub chunks: Vec<ChunkWire>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Parent → host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HostRequest {
    #[serde(rename = "init")]
    Init { num_threads: usize },
    #[serde(rename = "shutdown")]
    Shutdown,
    #[serde(rename = "searchBatch")]
    SearchBatch { message_id: u32, inputs: Vec<SearchInput> },
    #[serde(rename = "indexBatch")]
    IndexBatch { message_id: u32, inputs: Vec<IndexInput> },
    #[serde(rename = "computeChunksBatch")]
    ChunkBatch { message_id: u32, inputs: Vec<ChunkInput> },
}

/// Host → parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HostResponse {
    #[serde(rename = "init-ack")]
    InitAck { num_threads: usize },
    #[serde(rename = "log")]
    Log { level: LogLevel, message: String },
    #[serde(rename = "searchBatch")]
    SearchBatch { message_id: u32, outputs: Vec<SearchOutput> },
    #[serde(rename = "indexBatch")]
    IndexBatch { message_id: u32, outputs: Vec<IndexOutput> },
    #[serde(rename = "computeChunksBatch")]
    ChunkBatch { message_id: u32, outputs: Vec<ChunkOutput> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_json() {
        let req = HostRequest::SearchBatch {
            message_id: 7,
            inputs: vec![SearchInput {
                file_path: "a.cc".into(),
                patterns: vec!["foo".into()],
                literals: vec![vec!["foo".into()]],
            }],
        };
        let line = serde_json::to_string(&req).unwrap();
        assert!(line.contains("\"type\":\"searchBatch\""));
        let back: HostRequest = serde_json::from_str(&line).unwrap();
        match back {
            HostRequest::SearchBatch { message_id, inputs } => {
                assert_eq!(message_id, 7);
                assert_eq!(inputs.len(), 1);
            }
            _ => panic!("wrong variant"),
        }
    }
}

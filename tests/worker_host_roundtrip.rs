//! Exercises the actual child-process pipe: spawn the binary as a
//! worker host, send it a batch over stdin, read the matching reply off
//! stdout. Mirrors the reference crate's stdio smoke test, generalized
//! from a single JSON-RPC request to the search-batch message shape.

use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

#[tokio::test]
async fn worker_host_acks_init_then_answers_a_search_batch() {
    let exe = env!("CARGO_BIN_EXE_tagcache");
    let mut child = Command::new(exe)
        .arg("--worker-host")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn worker host");

    let mut stdin = child.stdin.take().unwrap();
    let mut lines = BufReader::new(child.stdout.take().unwrap()).lines();

    stdin.write_all(b"{\"type\":\"init\",\"num_threads\":2}\n").await.unwrap();
    let init_reply = lines.next_line().await.unwrap().expect("init-ack line");
    assert!(init_reply.contains("init-ack"));

    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("a.c");
    std::fs::write(&file_path, "int foo(void) { return 1; }\n").unwrap();

    let request = serde_json::json!({
        "type": "searchBatch",
        "message_id": 1,
        "inputs": [{
            "file_path": file_path.to_string_lossy(),
            "patterns": ["foo"],
            "literals": [["foo"]],
        }]
    });
    let mut line = serde_json::to_string(&request).unwrap();
    line.push('\n');
    stdin.write_all(line.as_bytes()).await.unwrap();

    let reply = lines.next_line().await.unwrap().expect("searchBatch reply line");
    let parsed: serde_json::Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(parsed["type"], "searchBatch");
    assert_eq!(parsed["message_id"], 1);
    assert_eq!(parsed["outputs"][0]["matches"][0]["line"], 1);

    stdin.write_all(b"{\"type\":\"shutdown\"}\n").await.unwrap();
    let status = child.wait().await.unwrap();
    assert!(status.success());
}

//! Per-item task execution, run by `worker_host` across its OS thread pool
//! (search/chunk, CPU-bound) or awaited directly (index, I/O-bound subprocess
//! with a timeout). Grounded in the reference crate's subprocess pattern in
//! `laynepenney-codi-rs`'s bash tool handler: `tokio::process::Command` +
//! `tokio::time::timeout`, carried over here for the tagger invocation.

use regex::RegexBuilder;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

use crate::chunker;
use crate::error::{IndexError, IndexResult};
use crate::ipc::{ChunkInput, ChunkOutput, ChunkWire, IndexInput, IndexOutput, IndexStatus, SearchInput, SearchMatch, SearchOutput};
use crate::tags;

const TAGGER_TIMEOUT: Duration = Duration::from_secs(3);

fn content_sha256(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// True if `needle` occurs anywhere in `haystack`, byte-for-byte.
fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Each AND term is matched independently across the whole file; a term
/// with zero matches anywhere kills the file's result (AND), but surviving
/// terms' matching lines are unioned rather than required to coincide on
/// the same line. A file-wide literal-fragment prefilter (OR within a
/// term's fragment list) skips the regex scan entirely when a term has no
/// chance of matching.
fn run_search(input: &SearchInput) -> IndexResult<Vec<SearchMatch>> {
    let bytes = std::fs::read(&input.file_path).map_err(|e| IndexError::UnreadableSource {
        path: input.file_path.clone().into(),
        source: e,
    })?;

    for literals in &input.literals {
        if !literals.is_empty() && !literals.iter().any(|lit| contains_subslice(&bytes, lit.as_bytes())) {
            return Ok(vec![]);
        }
    }

    let source = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = source.lines().map(|l| l.strip_suffix('\r').unwrap_or(l)).collect();

    let compiled: Vec<regex::Regex> = input
        .patterns
        .iter()
        .map(|p| RegexBuilder::new(p).case_insensitive(true).multi_line(true).build())
        .collect::<Result<_, _>>()
        .map_err(|e| IndexError::MalformedTagFile {
            path: input.file_path.clone().into(),
            message: format!("bad search pattern: {e}"),
        })?;

    let mut merged: BTreeMap<u32, String> = BTreeMap::new();
    for re in &compiled {
        let mut any = false;
        for (idx, line) in lines.iter().enumerate() {
            if re.is_match(line) {
                any = true;
                merged.entry((idx + 1) as u32).or_insert_with(|| line.to_string());
            }
        }
        if !any {
            return Ok(vec![]);
        }
    }

    Ok(merged.into_iter().map(|(line, text)| SearchMatch { line, text }).collect())
}

pub fn execute_search(input: &SearchInput) -> SearchOutput {
    match run_search(input) {
        Ok(matches) => SearchOutput { file_path: input.file_path.clone(), matches, error: None },
        Err(e) => SearchOutput { file_path: input.file_path.clone(), matches: vec![], error: Some(e.to_string()) },
    }
}

async fn run_index(input: &IndexInput) -> IndexResult<IndexStatus> {
    let source_path = Path::new(&input.source_path);
    let tags_path = Path::new(&input.tags_path);

    // Fast path: tag file already newer than the source, skip without
    // touching the source's bytes at all.
    if let (Ok(source_meta), Ok(tags_meta)) = (tokio::fs::metadata(source_path).await, tokio::fs::metadata(tags_path).await) {
        if let (Ok(source_mtime), Ok(tags_mtime)) = (source_meta.modified(), tags_meta.modified()) {
            if tags_mtime >= source_mtime {
                return Ok(IndexStatus::Skipped);
            }
        }
    }

    let content = tokio::fs::read(source_path).await.map_err(|e| IndexError::UnreadableSource {
        path: source_path.to_path_buf(),
        source: e,
    })?;
    let hash = content_sha256(&content);

    if let Ok(Some(existing)) = tags::read_footer_hash(tags_path) {
        if existing == hash {
            return Ok(IndexStatus::Skipped);
        }
    }
    let _ = tokio::fs::remove_file(tags_path).await;

    let run = Command::new(&input.ctags_path)
        .args(["--output-format=json", "--fields=+cneNZKS", "--kinds-all=*", "-o"])
        .arg(tags_path)
        .arg(source_path)
        .output();
    let output = tokio::time::timeout(TAGGER_TIMEOUT, run)
        .await
        .map_err(|_| IndexError::TaggerTimeout { path: source_path.to_path_buf(), millis: TAGGER_TIMEOUT.as_millis() as u64 })?
        .map_err(|e| IndexError::TaggerFailed { path: source_path.to_path_buf(), message: e.to_string() })?;

    if !output.status.success() {
        return Err(IndexError::TaggerFailed {
            path: source_path.to_path_buf(),
            message: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    let mut bytes = tokio::fs::read(tags_path).await.map_err(|e| IndexError::TaggerFailed {
        path: source_path.to_path_buf(),
        message: format!("tagger produced no output file: {e}"),
    })?;
    if !bytes.ends_with(b"\n") {
        bytes.push(b'\n');
    }
    bytes.extend_from_slice(tags::footer_line(&hash).as_bytes());
    tokio::fs::write(tags_path, bytes)
        .await
        .map_err(|e| IndexError::UnreadableSource { path: tags_path.to_path_buf(), source: e })?;

    Ok(IndexStatus::Indexed)
}

pub async fn execute_index(input: &IndexInput) -> IndexOutput {
    match run_index(input).await {
        Ok(status) => IndexOutput { file_path: input.source_path.clone(), status, error: None },
        Err(e) => IndexOutput { file_path: input.source_path.clone(), status: IndexStatus::Failed, error: Some(e.to_string()) },
    }
}

fn run_chunk(input: &ChunkInput) -> IndexResult<Vec<ChunkWire>> {
    let source_path = Path::new(&input.source_path);
    let source = std::fs::read_to_string(source_path).map_err(|e| IndexError::UnreadableSource {
        path: source_path.to_path_buf(),
        source: e,
    })?;
    let tags_path = Path::new(&input.tags_path);
    let entries = if tags_path.exists() { tags::parse_tag_file(tags_path)? } else { vec![] };

    let chunks = chunker::chunk_file(source_path, &source, &entries);
    Ok(chunks
        .into_iter()
        .map(|c| ChunkWire { start_line: c.start_line, end_line: c.end_line, text: c.text, sha256: c.sha256 })
        .collect())
}

pub fn execute_chunk(input: &ChunkInput) -> ChunkOutput {
    match run_chunk(input) {
        Ok(chunks) => ChunkOutput { file_path: input.source_path.clone(), chunks, error: None },
        Err(e) => ChunkOutput { file_path: input.source_path.clone(), chunks: vec![], error: Some(e.to_string()) },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_unions_each_terms_matching_lines_but_requires_every_term_to_match_somewhere() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.c");
        std::fs::write(&path, "int foo_bar(void);\nint foo(void);\n").unwrap();

        // "foo" matches both lines, "bar" matches only line 1 -> union is {1, 2}.
        let input = SearchInput {
            file_path: path.to_string_lossy().into_owned(),
            patterns: vec!["foo".into(), "bar".into()],
            literals: vec![vec!["foo".into()], vec!["bar".into()]],
        };
        let out = execute_search(&input);
        assert!(out.error.is_none());
        assert_eq!(out.matches.iter().map(|m| m.line).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn search_matches_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.c");
        std::fs::write(&path, "int Foo(void);\n").unwrap();

        let input = SearchInput {
            file_path: path.to_string_lossy().into_owned(),
            patterns: vec!["foo".into()],
            literals: vec![vec!["Foo".into()]],
        };
        let out = execute_search(&input);
        assert!(out.error.is_none());
        assert_eq!(out.matches.len(), 1);
    }

    #[test]
    fn search_fails_the_whole_file_if_any_term_never_matches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.c");
        std::fs::write(&path, "int foo(void);\nint nonexistent(void);\n").unwrap();

        let input = SearchInput {
            file_path: path.to_string_lossy().into_owned(),
            patterns: vec!["foo".into(), "no_such_term".into()],
            literals: vec![vec!["foo".into()], vec![]],
        };
        let out = execute_search(&input);
        assert!(out.error.is_none());
        assert!(out.matches.is_empty());
    }

    #[test]
    fn chunk_reads_source_and_tags_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let source_path = dir.path().join("a.c");
        let lines: Vec<String> = (1..=10)
            .map(|n| format!("line {n} of reasonably long filler text to pass the min-length chunk check"))
            .collect();
        std::fs::write(&source_path, lines.join("\n")).unwrap();

        let input = ChunkInput {
            source_path: source_path.to_string_lossy().into_owned(),
            // No tag file on disk: falls back to an empty symbol list, so
            // this chunks as a single uniform, tag-less range.
            tags_path: dir.path().join("a.c.tags").to_string_lossy().into_owned(),
        };
        let out = execute_chunk(&input);
        assert!(out.error.is_none());
        assert_eq!(out.chunks.len(), 1);
        let chunk = &out.chunks[0];
        assert_eq!((chunk.start_line, chunk.end_line), (1, 10));
        assert!(chunk.text.contains("line 1 of reasonably long filler text"));
        assert!(chunk.text.contains("line 10 of reasonably long filler text"));
    }

    #[tokio::test]
    async fn index_skips_when_footer_hash_already_matches() {
        let dir = tempfile::tempdir().unwrap();
        let source_path = dir.path().join("a.c");
        let tags_path = dir.path().join("a.c.tags");
        std::fs::write(&source_path, "int main(void) { return 0; }\n").unwrap();
        let hash = content_sha256(std::fs::read(&source_path).unwrap().as_slice());
        std::fs::write(&tags_path, tags::footer_line(&hash)).unwrap();

        let input = IndexInput {
            source_path: source_path.to_string_lossy().into_owned(),
            tags_path: tags_path.to_string_lossy().into_owned(),
            ctags_path: "ctags".into(),
        };
        let out = execute_index(&input).await;
        assert_eq!(out.status, IndexStatus::Skipped);
        assert!(out.error.is_none());
    }
}

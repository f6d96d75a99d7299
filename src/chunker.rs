use sha2::{Digest, Sha256};
use std::path::Path;

use crate::tags::TagEntry;

pub const MAX_CHUNK_LINES: u32 = 150;
pub const CHUNK_OVERLAP_LINES: u32 = 15;
pub const STRIDE_LINES: u32 = MAX_CHUNK_LINES - CHUNK_OVERLAP_LINES; // 135
pub const MIN_CHUNK_CHARS: usize = 75;

const CPP_EXTENSIONS: &[&str] = &["c", "h", "cc", "cpp", "cxx", "hpp", "hh", "hxx"];

/// A finished chunk, ready for hashing and embedding (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 1-based, inclusive.
    pub start_line: u32,
    pub end_line: u32,
    /// Prefixed text (what gets embedded).
    pub text: String,
    /// sha256 over the *un-prefixed* text.
    pub sha256: String,
}

/// A container's merged, doc-comment-expanded extent (§4.5 steps 2-3).
struct TopLevelRange {
    start_line: u32,
    end_line: u32,
    kind: String,
    qualified_name: String,
    signature: Option<String>,
}

fn qualified_name(entry: &TagEntry) -> String {
    match entry.normalized_scope() {
        Some(scope) if !scope.is_empty() => format!("{scope}::{}", entry.name),
        _ => entry.name.clone(),
    }
}

fn is_preamble_macro(entry: &TagEntry) -> bool {
    entry.kind == "macro" && entry.name.ends_with("_H_")
}

/// Sort containers by start line, sweep, merge overlapping/nested spans
/// into their outermost extent (§4.5 step 2).
fn compute_top_level_ranges(mut containers: Vec<&TagEntry>) -> Vec<TopLevelRange> {
    containers.sort_by_key(|t| t.line);

    let mut ranges: Vec<TopLevelRange> = Vec::new();
    for tag in containers {
        let end = tag.end.unwrap_or(tag.line);
        if let Some(last) = ranges.last_mut() {
            if tag.line <= last.end_line {
                // Fully inside or extending the current cover.
                if end > last.end_line {
                    last.end_line = end;
                }
                continue;
            }
        }
        ranges.push(TopLevelRange {
            start_line: tag.line,
            end_line: end,
            kind: tag.kind.clone(),
            qualified_name: qualified_name(tag),
            signature: tag.signature.clone(),
        });
    }
    ranges
}

/// Absorb non-blank lines immediately above a range that don't belong to the
/// previous range, so a leading doc comment joins its function (step 3).
fn expand_upward(ranges: &mut [TopLevelRange], lines: &[&str]) {
    for i in 0..ranges.len() {
        let prev_end = if i == 0 { 0 } else { ranges[i - 1].end_line };
        loop {
            let above = ranges[i].start_line.saturating_sub(1);
            if above <= prev_end || above == 0 {
                break;
            }
            let idx = (above - 1) as usize;
            let Some(text) = lines.get(idx) else { break };
            if text.trim().is_empty() {
                break;
            }
            ranges[i].start_line = above;
        }
    }
}

fn is_boilerplate(text: &str) -> bool {
    if text.len() > 200 {
        return false;
    }
    let mut any_nonblank = false;
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        any_nonblank = true;
        let is_comment = line.starts_with("//") || line.starts_with("/*") || line.starts_with('*') || line.starts_with('#');
        let is_closing_brace = line == "}" || line == "};" || line == ")" || line == ");";
        let is_preproc_guard = line.starts_with("#ifndef")
            || line.starts_with("#define")
            || line.starts_with("#endif")
            || line.starts_with("#if")
            || line.starts_with("#pragma once");
        if !(is_comment || is_closing_brace || is_preproc_guard) {
            return false;
        }
    }
    any_nonblank
}

fn passes_invariants(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty() && trimmed.len() >= MIN_CHUNK_CHARS && !is_boilerplate(trimmed)
}

fn content_sha256(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    format!("{digest:x}")
}

fn slice_lines(lines: &[&str], start_line: u32, end_line: u32) -> String {
    if start_line > end_line || start_line == 0 {
        return String::new();
    }
    let lo = (start_line - 1) as usize;
    let hi = (end_line as usize).min(lines.len());
    if lo >= hi {
        return String::new();
    }
    lines[lo..hi].join("\n")
}

struct PrefixContext<'a> {
    file_path: &'a str,
    kind: Option<&'a str>,
    qualified_name: Option<&'a str>,
    signature: Option<&'a str>,
}

fn build_prefix(ctx: &PrefixContext, non_first_chunk: bool) -> String {
    let mut prefix = format!("file: {}\n", ctx.file_path);
    if let (Some(kind), Some(name)) = (ctx.kind, ctx.qualified_name) {
        prefix.push_str(&format!("{kind}: {name}\n"));
        let is_callable = matches!(kind, "function" | "method" | "prototype");
        if non_first_chunk && is_callable {
            if let Some(sig) = ctx.signature {
                prefix.push_str(&format!("signature: {sig}\n"));
            }
        }
    }
    prefix.push('\n');
    prefix
}

/// Split `[start_line, end_line]` into `MAX_CHUNK_LINES`-wide windows,
/// advancing the cursor by `STRIDE_LINES` each time so consecutive windows
/// share a trailing `CHUNK_OVERLAP_LINES` overlap; the last chunk carries
/// none.
fn stride_chunks(
    lines: &[&str],
    start_line: u32,
    end_line: u32,
    file_path: &str,
    container: Option<(&str, &str, Option<&str>)>,
    out: &mut Vec<Chunk>,
) {
    if start_line > end_line {
        return;
    }
    let mut cursor = start_line;
    let mut first = true;
    while cursor <= end_line {
        let this_end = (cursor + MAX_CHUNK_LINES - 1).min(end_line);
        let text = slice_lines(lines, cursor, this_end);
        if passes_invariants(&text) {
            let ctx = PrefixContext {
                file_path,
                kind: container.map(|c| c.0),
                qualified_name: container.map(|c| c.1),
                signature: container.and_then(|c| c.2),
            };
            let prefix = build_prefix(&ctx, !first);
            out.push(Chunk {
                start_line: cursor,
                end_line: this_end,
                text: format!("{prefix}{text}"),
                sha256: content_sha256(&text),
            });
        }
        first = false;
        if this_end >= end_line {
            break;
        }
        cursor = this_end + 1 - CHUNK_OVERLAP_LINES;
        if cursor <= start_line && this_end == end_line {
            break;
        }
    }
}

pub fn is_cpp_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| CPP_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Structural chunking for C/C++: top-level ranges from the tag file,
/// cursor scan over gaps and ranges (§4.5).
pub fn chunk_cpp_file(file_path: &str, source: &str, tags: &[TagEntry]) -> Vec<Chunk> {
    let lines: Vec<&str> = source.lines().collect();
    let total_lines = lines.len() as u32;

    let containers: Vec<&TagEntry> = tags.iter().filter(|t| t.is_container()).collect();
    let earliest_non_preamble = tags
        .iter()
        .filter(|t| !is_preamble_macro(t))
        .map(|t| t.line)
        .min();

    let mut ranges = compute_top_level_ranges(containers);
    expand_upward(&mut ranges, &lines);

    let mut out = Vec::new();
    let mut cursor = match (earliest_non_preamble, ranges.first()) {
        (Some(earliest), Some(first)) if earliest <= first.start_line => earliest.max(1),
        _ => 1,
    };

    for range in &ranges {
        if cursor < range.start_line {
            stride_chunks(&lines, cursor, range.start_line - 1, file_path, None, &mut out);
        }
        stride_chunks(
            &lines,
            range.start_line,
            range.end_line,
            file_path,
            Some((range.kind.as_str(), range.qualified_name.as_str(), range.signature.as_deref())),
            &mut out,
        );
        cursor = range.end_line + 1;
    }

    if cursor <= total_lines {
        stride_chunks(&lines, cursor, total_lines, file_path, None, &mut out);
    }

    out
}

/// Uniform split for non-C/C++ files: same stride/overlap parameters, a
/// prefix carrying only the file line.
pub fn chunk_uniform(file_path: &str, source: &str) -> Vec<Chunk> {
    let lines: Vec<&str> = source.lines().collect();
    let total = lines.len() as u32;
    let mut out = Vec::new();
    if total > 0 {
        stride_chunks(&lines, 1, total, file_path, None, &mut out);
    }
    out
}

/// Entry point used by the worker's chunk task: dispatch on extension.
pub fn chunk_file(path: &Path, source: &str, tags: &[TagEntry]) -> Vec<Chunk> {
    let file_path = path.to_string_lossy();
    if is_cpp_path(path) {
        chunk_cpp_file(&file_path, source, tags)
    } else {
        chunk_uniform(&file_path, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_source(total_lines: u32) -> String {
        (1..=total_lines).map(|n| format!("line {n} of reasonably long filler text to pass the min-length chunk check")).collect::<Vec<_>>().join("\n")
    }

    fn fn_tag(name: &str, line: u32, end: u32) -> TagEntry {
        TagEntry {
            name: name.into(),
            line,
            end: Some(end),
            column: None,
            kind: "function".into(),
            scope: None,
            signature: Some("void f()".into()),
            typeref: None,
        }
    }

    #[test]
    fn chunk_invariants_hold() {
        let source = make_source(300);
        let tags = vec![fn_tag("f", 10, 200)];
        let chunks = chunk_cpp_file("main.cc", &source, &tags);
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(c.start_line <= c.end_line);
            assert!(c.end_line - c.start_line < MAX_CHUNK_LINES);
            let without_prefix_start = c.text.find("\n\n").map(|i| i + 2).unwrap_or(0);
            let body = &c.text[without_prefix_start..];
            assert!(body.trim().len() >= MIN_CHUNK_CHARS || c.text.trim().len() >= MIN_CHUNK_CHARS);
        }
    }

    #[test]
    fn preceding_comment_joins_function_range() {
        let mut lines = vec!["// leading doc".to_string(), "// comment".to_string(), "// block".to_string()];
        for n in 4..=200u32 {
            lines.push(format!("line {n} body content padded out long enough to not look trivial"));
        }
        let source = lines.join("\n");
        let tags = vec![fn_tag("f", 4, 200)];
        let containers: Vec<&TagEntry> = tags.iter().collect();
        let mut ranges = compute_top_level_ranges(containers);
        let src_lines: Vec<&str> = source.lines().collect();
        expand_upward(&mut ranges, &src_lines);
        assert_eq!(ranges[0].start_line, 1);
    }

    #[test]
    fn stride_windows_are_150_lines_wide_not_135() {
        let mut out = Vec::new();
        let lines: Vec<String> = (1..=300).map(|n| format!("line {n} body content padded out long enough")).collect();
        let line_refs: Vec<&str> = lines.iter().map(|s| s.as_str()).collect();
        stride_chunks(&line_refs, 7, 200, "f.c", None, &mut out);
        assert_eq!((out[0].start_line, out[0].end_line), (7, 156));
        assert_eq!((out[1].start_line, out[1].end_line), (142, 200));
    }

    #[test]
    fn overlap_between_consecutive_strides_is_fifteen_lines() {
        let source = make_source(300);
        let tags = vec![fn_tag("f", 1, 300)];
        let chunks = chunk_cpp_file("main.cc", &source, &tags);
        assert!(chunks.len() >= 2);
        let overlap = chunks[0].end_line as i64 - chunks[1].start_line as i64 + 1;
        assert_eq!(overlap, CHUNK_OVERLAP_LINES as i64);
    }

    #[test]
    fn sha256_is_over_unprefixed_text() {
        let source = make_source(50);
        let chunks = chunk_uniform("f.py", &source);
        assert_eq!(chunks.len(), 1);
        let body = slice_lines(&source.lines().collect::<Vec<_>>(), chunks[0].start_line, chunks[0].end_line);
        assert_eq!(chunks[0].sha256, content_sha256(&body));
    }

    #[test]
    fn pure_boilerplate_is_dropped() {
        let text = "}\n}\n#endif\n// nothing else here";
        assert!(is_boilerplate(text));
        assert!(!passes_invariants(text));
    }

    #[test]
    fn non_cpp_extension_uses_uniform_chunking() {
        assert!(!is_cpp_path(Path::new("main.py")));
        assert!(is_cpp_path(Path::new("main.cpp")));
    }
}

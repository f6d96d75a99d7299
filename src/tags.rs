use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{IndexError, IndexResult};

/// Kinds that denote a syntactic scope and therefore count as a container
/// when the entry also carries an end line (§3).
const CONTAINER_KINDS: &[&str] = &[
    "class", "struct", "union", "function", "method", "enum", "interface", "namespace", "module",
];

/// One line of the tagger's line-delimited JSON output, after the `ptag`
/// metadata lines and the trailing `sha256` footer have been filtered out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagEntry {
    pub name: String,
    /// 1-based start line.
    pub line: u32,
    #[serde(default)]
    pub end: Option<u32>,
    #[serde(default)]
    pub column: Option<u32>,
    pub kind: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
    /// Form `"typename:<type>"`.
    #[serde(default)]
    pub typeref: Option<String>,
}

impl TagEntry {
    pub fn is_container(&self) -> bool {
        self.end.is_some() && CONTAINER_KINDS.contains(&self.kind.as_str())
    }

    /// Anonymous-namespace markers (`__anon<hex>+`) read back as the literal
    /// `(anonymous namespace)` everywhere they appear in a scope string.
    pub fn normalized_scope(&self) -> Option<String> {
        self.scope.as_deref().map(normalize_anon_scope)
    }
}

fn normalize_anon_scope(scope: &str) -> String {
    let mut out = String::with_capacity(scope.len());
    let mut rest = scope;
    loop {
        let Some(pos) = rest.find("__anon") else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..pos]);
        let after = &rest[pos + "__anon".len()..];
        let hex_len = after.chars().take_while(|c| c.is_ascii_hexdigit()).count();
        if hex_len > 0 && after.as_bytes().get(hex_len) == Some(&b'+') {
            out.push_str("(anonymous namespace)");
            rest = &after[hex_len + 1..];
        } else {
            out.push_str("__anon");
            rest = after;
        }
    }
    out
}

/// Raw wire shape emitted by the tagger: one JSON object per line, each
/// carrying at least `_type`. Matches `{"_type":"tag", ...}` /
/// `{"_type":"ptag", ...}` / `{"_type":"sha256","hash":"..."}`.
#[derive(Debug, Deserialize)]
struct RawLine {
    #[serde(rename = "_type")]
    kind: String,
    #[serde(flatten)]
    rest: serde_json::Value,
}

/// Parse a tag file, returning the symbol entries. Unknown `_type` values
/// (future tagger versions) are skipped explicitly rather than causing a
/// parse failure — a new line type degrades to "ignored".
pub fn parse_tag_file(path: &Path) -> IndexResult<Vec<TagEntry>> {
    let file = std::fs::File::open(path).map_err(|e| IndexError::UnreadableSource {
        path: path.to_path_buf(),
        source: e,
    })?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();

    for line in reader.lines() {
        let line = line.map_err(|e| IndexError::UnreadableSource {
            path: path.to_path_buf(),
            source: e,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let raw: RawLine = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                return Err(IndexError::MalformedTagFile {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })
            }
        };
        match raw.kind.as_str() {
            "tag" => {
                let entry: TagEntry =
                    serde_json::from_value(raw.rest).map_err(|e| IndexError::MalformedTagFile {
                        path: path.to_path_buf(),
                        message: e.to_string(),
                    })?;
                entries.push(entry);
            }
            "ptag" | "sha256" => continue,
            _other => continue,
        }
    }
    Ok(entries)
}

/// Footer line appended by the worker after a successful tagger run. Fixed
/// layout, exactly 96 bytes: `{"_type":"sha256","hash":"<64 hex>"}\n`.
pub fn footer_line(hash_hex: &str) -> String {
    format!("{{\"_type\":\"sha256\",\"hash\":\"{hash_hex}\"}}\n")
}

/// Read the trailing footer hash without parsing the whole file: seek to
/// the last 96 bytes and pull the hex field at its fixed offset. Falls back
/// to a full re-read if the file is shorter (malformed/older tag file).
pub fn read_footer_hash(path: &Path) -> IndexResult<Option<String>> {
    use std::io::{Read, Seek, SeekFrom};

    const FOOTER_LEN: u64 = 96;
    const HASH_OFFSET: usize = 29;
    const HASH_LEN: usize = 64;

    let mut file = std::fs::File::open(path).map_err(|e| IndexError::UnreadableSource {
        path: path.to_path_buf(),
        source: e,
    })?;
    let len = file
        .metadata()
        .map_err(|e| IndexError::UnreadableSource { path: path.to_path_buf(), source: e })?
        .len();
    if len < FOOTER_LEN {
        return Ok(None);
    }
    file.seek(SeekFrom::End(-(FOOTER_LEN as i64)))
        .map_err(|e| IndexError::UnreadableSource { path: path.to_path_buf(), source: e })?;
    let mut buf = [0u8; FOOTER_LEN as usize];
    file.read_exact(&mut buf)
        .map_err(|e| IndexError::UnreadableSource { path: path.to_path_buf(), source: e })?;

    if buf.len() < HASH_OFFSET + HASH_LEN {
        return Ok(None);
    }
    let hash_bytes = &buf[HASH_OFFSET..HASH_OFFSET + HASH_LEN];
    let Ok(hash) = std::str::from_utf8(hash_bytes) else {
        return Ok(None);
    };
    if hash.len() == HASH_LEN && hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        Ok(Some(hash.to_string()))
    } else {
        Ok(None)
    }
}

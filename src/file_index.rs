//! Per-file symbol view backed by a parsed tag file, with a small
//! process-wide LRU so repeated `getSymbols` calls against the same file
//! (hover, go-to-definition, chunk lookups) skip re-parsing (§4.6).

use lru::LruCache;
use sha2::Digest;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use crate::error::IndexResult;
use crate::tags::{self, TagEntry};

const SYMBOL_CACHE_CAPACITY: usize = 300;

fn symbol_cache() -> &'static Mutex<LruCache<PathBuf, Vec<TagEntry>>> {
    static CACHE: OnceLock<Mutex<LruCache<PathBuf, Vec<TagEntry>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(LruCache::new(NonZeroUsize::new(SYMBOL_CACHE_CAPACITY).unwrap())))
}

#[derive(Debug, Clone)]
pub struct FunctionDetails {
    pub name: String,
    pub qualified_name: String,
    pub signature: Option<String>,
    pub typeref: Option<String>,
    pub start_line: u32,
    pub end_line: Option<u32>,
}

/// Tracks one source file's freshness against its derived tag file.
#[derive(Debug, Clone)]
pub struct FileIndex {
    pub source_path: PathBuf,
    pub tags_path: PathBuf,
}

impl FileIndex {
    pub fn new(source_path: PathBuf, tags_path: PathBuf) -> Self {
        Self { source_path, tags_path }
    }

    /// Tag-mtime ≥ source-mtime is trusted outright; otherwise fall back to
    /// comparing the tag file's footer hash against a freshly computed
    /// source sha256 (§4.9). Any I/O error along the way reads as invalid.
    pub fn is_valid(&self) -> bool {
        let source_mtime = match std::fs::metadata(&self.source_path).and_then(|m| m.modified()) {
            Ok(m) => m,
            Err(_) => return false,
        };
        if let Ok(tags_mtime) = std::fs::metadata(&self.tags_path).and_then(|m| m.modified()) {
            if tags_mtime >= source_mtime {
                return true;
            }
        }
        let Ok(Some(footer)) = tags::read_footer_hash(&self.tags_path) else { return false };
        let Ok(content) = std::fs::read(&self.source_path) else { return false };
        let current_hash = format!("{:x}", sha2::Sha256::digest(&content));
        current_hash == footer
    }

    pub fn invalidate_cache(&self) {
        symbol_cache().lock().unwrap().pop(&self.tags_path);
    }

    /// Parsed tag entries, served from the module-level LRU when present.
    pub fn get_symbols(&self) -> IndexResult<Vec<TagEntry>> {
        if let Some(hit) = symbol_cache().lock().unwrap().get(&self.tags_path) {
            return Ok(hit.clone());
        }
        let entries = tags::parse_tag_file(&self.tags_path)?;
        symbol_cache().lock().unwrap().put(self.tags_path.clone(), entries.clone());
        Ok(entries)
    }

    pub fn qualified_name(entry: &TagEntry) -> String {
        match entry.normalized_scope() {
            Some(scope) if !scope.is_empty() => format!("{scope}::{}", entry.name),
            _ => entry.name.clone(),
        }
    }

    /// Innermost container whose range covers `line`: smallest span wins,
    /// ties broken by the latest start line.
    pub fn get_container<'a>(symbols: &'a [TagEntry], line: u32) -> Option<&'a TagEntry> {
        symbols
            .iter()
            .filter(|t| t.is_container() && t.line <= line && t.end.unwrap_or(t.line) >= line)
            .min_by_key(|t| (t.end.unwrap_or(t.line) - t.line, std::cmp::Reverse(t.line)))
    }

    pub fn get_fully_qualified_name(entry: &TagEntry) -> String {
        Self::qualified_name(entry)
    }

    pub fn get_function_details<'a>(symbols: &'a [TagEntry], name: &str) -> Option<FunctionDetails> {
        symbols
            .iter()
            .find(|t| matches!(t.kind.as_str(), "function" | "method" | "prototype") && t.name == name)
            .map(|t| FunctionDetails {
                name: t.name.clone(),
                qualified_name: Self::qualified_name(t),
                signature: t.signature.clone(),
                typeref: t.typeref.clone(),
                start_line: t.line,
                end_line: t.end,
            })
    }
}

pub fn source_path_from_tags(tags_path: &Path) -> PathBuf {
    tags_path.with_extension("")
}

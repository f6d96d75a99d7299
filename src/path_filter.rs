use glob::Pattern;
use std::path::{Path, PathBuf};

/// Decides whether a file path belongs in the index: extension, include-root
/// prefix, exclude glob. Grounded in the reference crate's `scanner.rs`
/// (ignore-crate walking + override patterns), generalized here to the
/// spec's three-list constructor and prefix-normalization rules.
#[derive(Debug, Clone)]
pub struct PathFilter {
    include_roots: Vec<PathBuf>,
    exclude_globs: Vec<Pattern>,
    extensions: Vec<String>,
    case_insensitive: bool,
}

/// `glob::Pattern` has no `{a,b}` alternation syntax, so a brace group is
/// expanded into one literal pattern per alternative before compiling
/// (`**/{build,dist}/**` → `**/build/**`, `**/dist/**`). Nested braces are
/// not supported, matching what real exclude lists actually need.
fn expand_braces(pattern: &str) -> Vec<String> {
    let Some(open) = pattern.find('{') else { return vec![pattern.to_string()] };
    let Some(close) = pattern[open..].find('}') else { return vec![pattern.to_string()] };
    let close = open + close;
    let prefix = &pattern[..open];
    let suffix = &pattern[close + 1..];
    pattern[open + 1..close]
        .split(',')
        .flat_map(|alt| expand_braces(&format!("{prefix}{alt}{suffix}")))
        .collect()
}

fn normalize(p: &Path, case_insensitive: bool) -> String {
    let s = p.to_string_lossy().replace('\\', "/");
    if case_insensitive {
        s.to_lowercase()
    } else {
        s
    }
}

impl PathFilter {
    /// `workspace_folders` is the host's fallback when `include_roots` is
    /// empty. `kb_root` is an optional extra root (e.g. a knowledge-base
    /// directory) appended after the fallback.
    pub fn new(
        include_roots: Vec<PathBuf>,
        exclude_patterns: &[String],
        extensions: &[String],
        workspace_folders: &[PathBuf],
        kb_root: Option<PathBuf>,
        case_insensitive: bool,
    ) -> Self {
        let mut roots = if include_roots.is_empty() {
            workspace_folders.to_vec()
        } else {
            include_roots
        };
        if let Some(kb) = kb_root {
            roots.push(kb);
        }

        // Drop any root that is itself nested under another root: stable
        // sort lexicographically, then a one-pass sweep keeping only the
        // entries that are not prefixed by an already-kept one.
        roots.sort();
        let mut kept: Vec<PathBuf> = Vec::with_capacity(roots.len());
        for root in roots {
            let norm = normalize(&root, case_insensitive);
            let nested = kept
                .iter()
                .any(|k| norm.starts_with(&format!("{}/", normalize(k, case_insensitive))) || norm == normalize(k, case_insensitive));
            if !nested {
                kept.push(root);
            }
        }

        let exclude_globs = exclude_patterns
            .iter()
            .flat_map(|p| expand_braces(p))
            .filter_map(|p| Pattern::new(&p).ok())
            .collect();

        let extensions = extensions.iter().map(|e| e.to_lowercase()).collect();

        Self {
            include_roots: kept,
            exclude_globs,
            extensions,
            case_insensitive,
        }
    }

    pub fn include_roots(&self) -> &[PathBuf] {
        &self.include_roots
    }

    fn extension_matches(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let dotted = format!(".{}", ext.to_lowercase());
        self.extensions.iter().any(|e| *e == dotted)
    }

    fn under_some_root(&self, path: &Path) -> bool {
        let norm = normalize(path, self.case_insensitive);
        self.include_roots.iter().any(|root| {
            let root_norm = normalize(root, self.case_insensitive);
            norm == root_norm || norm.starts_with(&format!("{root_norm}/"))
        })
    }

    fn excluded(&self, path: &Path) -> bool {
        self.exclude_globs.iter().any(|g| g.matches_path(path))
    }

    pub fn should_include(&self, path: &Path) -> bool {
        self.extension_matches(path) && self.under_some_root(path) && !self.excluded(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> PathFilter {
        PathFilter::new(
            vec![PathBuf::from("/repo/src")],
            &["**/generated/**".to_string()],
            &[".c".to_string(), ".h".to_string()],
            &[],
            None,
            true,
        )
    }

    #[test]
    fn admits_matching_extension_under_root() {
        let f = filter();
        assert!(f.should_include(Path::new("/repo/src/main.c")));
        assert!(f.should_include(Path::new("/REPO/SRC/Main.C")));
    }

    #[test]
    fn rejects_wrong_extension() {
        let f = filter();
        assert!(!f.should_include(Path::new("/repo/src/main.rs")));
    }

    #[test]
    fn rejects_outside_root() {
        let f = filter();
        assert!(!f.should_include(Path::new("/repo/other/main.c")));
    }

    #[test]
    fn rejects_excluded_glob() {
        let f = filter();
        assert!(!f.should_include(Path::new("/repo/src/generated/foo.c")));
    }

    #[test]
    fn expand_braces_splits_alternatives_into_separate_patterns() {
        let out = expand_braces("**/{build,dist}/**");
        assert_eq!(out, vec!["**/build/**".to_string(), "**/dist/**".to_string()]);
    }

    #[test]
    fn expand_braces_is_identity_without_braces() {
        assert_eq!(expand_braces("**/generated/**"), vec!["**/generated/**".to_string()]);
    }

    #[test]
    fn rejects_excluded_brace_alternation_glob() {
        let f = PathFilter::new(
            vec![PathBuf::from("/repo/src")],
            &["**/{build,dist}/**".to_string()],
            &[".c".to_string()],
            &[],
            None,
            true,
        );
        assert!(!f.should_include(Path::new("/repo/src/build/foo.c")));
        assert!(!f.should_include(Path::new("/repo/src/dist/foo.c")));
        assert!(f.should_include(Path::new("/repo/src/other/foo.c")));
    }

    #[test]
    fn drops_nested_include_roots() {
        let f = PathFilter::new(
            vec![PathBuf::from("/repo"), PathBuf::from("/repo/src")],
            &[],
            &[".c".to_string()],
            &[],
            None,
            true,
        );
        assert_eq!(f.include_roots().len(), 1);
        assert_eq!(f.include_roots()[0], PathBuf::from("/repo"));
    }
}

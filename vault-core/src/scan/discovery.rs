//! Walks the vault root and collects candidate image files.

use super::ScanIssue;
use crate::cancel::CancelToken;
use crate::entry::relative_path_string;
use crate::error::{ErrorKind, VaultError};
use crate::vault::Vault;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// An image file found on disk
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub path: PathBuf,
    pub relative_path: String,
}

#[derive(Debug, Default)]
pub(crate) struct Discovery {
    pub candidates: Vec<Candidate>,
    pub issues: Vec<ScanIssue>,
    /// Relative paths the walk could not read. Entries at or below these
    /// were not observed either way, so they must not be marked missing.
    /// An empty string stands for the root itself.
    pub unreadable: Vec<String>,
    pub cancelled: bool,
}

/// Compile ignore patterns: bare names match that component anywhere,
/// patterns with wildcards are used as globs.
pub(crate) fn build_ignore_set(patterns: &[String]) -> crate::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob_pattern = if pattern.contains('*') || pattern.contains('?') {
            pattern.clone()
        } else {
            format!("**/{}", pattern)
        };
        builder.add(Glob::new(&glob_pattern).map_err(|e| VaultError::GlobPattern(e.to_string()))?);
        builder.add(
            Glob::new(&format!("**/{}/**", pattern))
                .map_err(|e| VaultError::GlobPattern(e.to_string()))?,
        );
    }
    builder
        .build()
        .map_err(|e| VaultError::GlobPattern(e.to_string()))
}

fn error_path(err: &ignore::Error) -> Option<&Path> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            error_path(err)
        }
        ignore::Error::Loop { child, .. } => Some(child),
        ignore::Error::Partial(errs) => errs.iter().find_map(error_path),
        _ => None,
    }
}

/// Relative path for reports and logs. Falls back to a lossy rendering for
/// paths that can't be indexed.
fn display_relative(root: &Path, path: &Path) -> String {
    relative_path_string(root, path).unwrap_or_else(|| {
        path.strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    })
}

impl Vault {
    pub(crate) fn discover(&self, cancel: &CancelToken) -> crate::Result<Discovery> {
        let root = self.root().to_path_buf();
        let ignore_set = build_ignore_set(&self.config().ignore.patterns)?;

        let mut builder = WalkBuilder::new(&root);
        builder.standard_filters(false);
        builder.follow_links(false);
        {
            let root = root.clone();
            let ignore_set = ignore_set.clone();
            builder.filter_entry(move |entry| {
                if entry.depth() == 0 {
                    return true;
                }
                let relative = entry.path().strip_prefix(&root).unwrap_or(entry.path());
                !ignore_set.is_match(relative)
            });
        }

        let mut discovery = Discovery::default();
        for result in builder.build() {
            if cancel.is_cancelled() {
                discovery.cancelled = true;
                break;
            }

            let entry = match result {
                Ok(entry) => entry,
                Err(err) => {
                    let relative = error_path(&err)
                        .map(|p| display_relative(&root, p))
                        .unwrap_or_default();
                    warn!(path = %relative, error = %err, "walk error");
                    discovery.issues.push(ScanIssue {
                        path: relative.clone(),
                        kind: ErrorKind::IoFailure,
                        reason: err.to_string(),
                    });
                    discovery.unreadable.push(relative);
                    continue;
                }
            };

            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }

            let path = entry.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| self.config().is_image_extension(ext));
            if !is_image {
                continue;
            }

            let Some(relative_path) = relative_path_string(&root, path) else {
                let shown = display_relative(&root, path);
                warn!(path = %shown, "skipping non-UTF-8 path");
                discovery.issues.push(ScanIssue {
                    path: shown,
                    kind: ErrorKind::IoFailure,
                    reason: "non-UTF-8 path".to_string(),
                });
                continue;
            };

            discovery.candidates.push(Candidate {
                path: path.to_path_buf(),
                relative_path,
            });
        }

        discovery
            .candidates
            .sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        debug!(
            candidates = discovery.candidates.len(),
            issues = discovery.issues.len(),
            "discovery finished"
        );
        Ok(discovery)
    }
}

/// Whether `relative_path` lies at or below one of the unreadable paths
pub(crate) fn is_shielded(relative_path: &str, unreadable: &[String]) -> bool {
    unreadable.iter().any(|prefix| {
        prefix.is_empty()
            || relative_path == prefix
            || relative_path
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn names(d: &Discovery) -> Vec<&str> {
        d.candidates.iter().map(|c| c.relative_path.as_str()).collect()
    }

    #[test]
    fn test_discovery_filters_extensions_and_ignored_dirs() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("b/deep")).unwrap();
        fs::create_dir_all(root.join(".vault_thumbs")).unwrap();
        fs::create_dir_all(root.join("thumbs")).unwrap();
        fs::write(root.join("a.jpg"), b"a").unwrap();
        fs::write(root.join("B.PNG"), b"b").unwrap();
        fs::write(root.join("notes.txt"), b"n").unwrap();
        fs::write(root.join("b/c.png"), b"c").unwrap();
        fs::write(root.join("b/deep/d.webp"), b"d").unwrap();
        fs::write(root.join(".hidden.gif"), b"h").unwrap();
        fs::write(root.join(".vault_thumbs/t.jpg"), b"t").unwrap();
        fs::write(root.join("thumbs/t.jpg"), b"t").unwrap();

        let vault = Vault::open_or_init(root).unwrap();
        let discovery = vault.discover(&CancelToken::new()).unwrap();
        assert_eq!(
            names(&discovery),
            vec![".hidden.gif", "B.PNG", "a.jpg", "b/c.png", "b/deep/d.webp"]
        );
        assert!(discovery.issues.is_empty());
        assert!(!discovery.cancelled);
    }

    #[test]
    fn test_discovery_stops_when_cancelled() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.jpg"), b"a").unwrap();
        let vault = Vault::open_or_init(dir.path()).unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let discovery = vault.discover(&cancel).unwrap();
        assert!(discovery.cancelled);
        assert!(discovery.candidates.is_empty());
    }

    #[test]
    fn test_ignore_set_patterns() {
        let set = build_ignore_set(&["thumbs".to_string(), "*.tmp".to_string()]).unwrap();
        assert!(set.is_match("thumbs"));
        assert!(set.is_match("a/thumbs/x.jpg"));
        assert!(set.is_match("x.tmp"));
        assert!(!set.is_match("thumbsup.jpg"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_names_are_reported_not_indexed() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::write(root.join("a.jpg"), b"a").unwrap();
        fs::write(root.join(OsStr::from_bytes(b"a\xff.jpg")), b"ff").unwrap();
        fs::write(root.join(OsStr::from_bytes(b"a\xfe.jpg")), b"fe").unwrap();

        let vault = Vault::open_or_init(root).unwrap();
        let discovery = vault.discover(&CancelToken::new()).unwrap();
        assert_eq!(names(&discovery), vec!["a.jpg"]);
        assert_eq!(discovery.issues.len(), 2);
        assert!(discovery
            .issues
            .iter()
            .all(|i| i.kind == ErrorKind::IoFailure && i.reason == "non-UTF-8 path"));
        assert!(discovery.unreadable.is_empty());
    }

    #[test]
    fn test_is_shielded() {
        let unreadable = vec!["locked".to_string()];
        assert!(is_shielded("locked", &unreadable));
        assert!(is_shielded("locked/a.jpg", &unreadable));
        assert!(!is_shielded("lockedout/a.jpg", &unreadable));
        assert!(is_shielded("anything.jpg", &[String::new()]));
        assert!(!is_shielded("a.jpg", &[]));
    }
}

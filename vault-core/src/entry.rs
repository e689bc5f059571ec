//! Entry records and tag normalization

use crate::VaultError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt::{self, Display};
use std::path::Path;
use std::str::FromStr;

/// Hex length of an entry ID (16 bytes of SHA-256)
const ENTRY_ID_HEX_LEN: usize = 32;

/// Stable entry ID: hash of the vault-relative path.
/// The same file maps to the same ID on every scan.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    /// Derive the ID for a relative path (already `/`-separated)
    pub fn for_path(relative_path: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(relative_path.as_bytes());
        let hash = hasher.finalize();
        Self(hex::encode(&hash[..ENTRY_ID_HEX_LEN / 2]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap a value read back from the store
    pub(crate) fn from_raw(raw: String) -> Self {
        Self(raw)
    }
}

impl Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntryId {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != ENTRY_ID_HEX_LEN || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(VaultError::InvalidEntryId(s.to_string()));
        }
        Ok(EntryId(s.to_ascii_lowercase()))
    }
}

/// One indexed image file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    /// Path relative to the vault root, `/`-separated
    pub relative_path: String,
    pub size_bytes: u64,
    /// Modification time in nanoseconds since the Unix epoch
    pub modified_at: i64,
    pub tags: BTreeSet<String>,
    /// Indexed, but absent on the latest scan or soft-deleted
    pub missing: bool,
    /// When the record was last written (seconds since the Unix epoch)
    pub indexed_at: i64,
}

impl Entry {
    /// New untagged entry for a freshly discovered file
    pub fn new(relative_path: impl Into<String>, size_bytes: u64, modified_at: i64) -> Self {
        let relative_path = relative_path.into();
        Self {
            id: EntryId::for_path(&relative_path),
            relative_path,
            size_bytes,
            modified_at,
            tags: BTreeSet::new(),
            missing: false,
            indexed_at: now_secs(),
        }
    }

    /// Final component of the relative path
    pub fn file_name(&self) -> &str {
        self.relative_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.relative_path)
    }

    /// Whether metadata differs from what the filesystem reports now
    pub fn is_stale(&self, size_bytes: u64, modified_at: i64) -> bool {
        self.size_bytes != size_bytes || self.modified_at != modified_at
    }
}

/// Canonical form of a tag: trimmed, inner whitespace collapsed, lower-cased.
/// Returns `None` for blank input.
pub fn normalize_tag(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed.to_lowercase())
    }
}

/// Normalize a caller-supplied tag list; blank tags are rejected
pub fn normalize_tags<S: AsRef<str>>(raw: &[S]) -> crate::Result<BTreeSet<String>> {
    raw.iter()
        .map(|t| {
            normalize_tag(t.as_ref())
                .ok_or_else(|| VaultError::InvalidSpec("tag must not be blank".to_string()))
        })
        .collect()
}

/// Vault-relative path of `path`, `/`-separated regardless of platform.
/// `None` when `path` is outside `root` or any component is not UTF-8.
pub fn relative_path_string(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

pub(crate) fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_id_is_deterministic() {
        let a = EntryId::for_path("b/c.png");
        let b = EntryId::for_path("b/c.png");
        let c = EntryId::for_path("a.jpg");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), ENTRY_ID_HEX_LEN);
    }

    #[test]
    fn test_entry_id_parse() {
        let id = EntryId::for_path("a.jpg");
        let parsed: EntryId = id.as_str().to_uppercase().parse().unwrap();
        assert_eq!(parsed, id);

        assert!("xyz".parse::<EntryId>().is_err());
        assert!("abcd".parse::<EntryId>().is_err());
        let not_hex = "g".repeat(ENTRY_ID_HEX_LEN);
        assert!(not_hex.parse::<EntryId>().is_err());
    }

    #[test]
    fn test_normalize_tag() {
        assert_eq!(normalize_tag("  Cat "), Some("cat".to_string()));
        assert_eq!(
            normalize_tag("Ready   For\ti2v"),
            Some("ready for i2v".to_string())
        );
        assert_eq!(normalize_tag("   "), None);
        assert_eq!(normalize_tag(""), None);
    }

    #[test]
    fn test_normalize_tags_dedups_and_rejects_blank() {
        let tags = normalize_tags(&["Cat", "cat ", "DOG"]).unwrap();
        assert_eq!(tags.len(), 2);
        assert!(tags.contains("cat") && tags.contains("dog"));

        let err = normalize_tags(&["cat", " "]).unwrap_err();
        assert!(matches!(err, VaultError::InvalidSpec(_)));
    }

    #[test]
    fn test_file_name_and_staleness() {
        let entry = Entry::new("b/c.png", 10, 100);
        assert_eq!(entry.file_name(), "c.png");
        assert_eq!(entry.id, EntryId::for_path("b/c.png"));
        assert!(!entry.is_stale(10, 100));
        assert!(entry.is_stale(11, 100));
        assert!(entry.is_stale(10, 101));
    }

    #[test]
    fn test_relative_path_string() {
        let root = Path::new("/vault");
        assert_eq!(
            relative_path_string(root, Path::new("/vault/b/c.png")),
            Some("b/c.png".to_string())
        );
        assert_eq!(relative_path_string(root, Path::new("/vault")), None);
        assert_eq!(relative_path_string(root, Path::new("/other/a.jpg")), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_relative_path_string_rejects_non_utf8() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let root = Path::new("/vault");
        let path = root.join("b").join(OsStr::from_bytes(b"a\xff.jpg"));
        assert_eq!(relative_path_string(root, &path), None);
    }
}

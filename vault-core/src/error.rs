//! Error types for vault operations

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Coarse error categories reported to callers.
///
/// Per-item failures inside scan and bulk results carry one of these so the
/// caller can decide how to surface them without matching on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    IoFailure,
    InvalidSpec,
    LockTimeout,
    StaleGeneration,
    Store,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::IoFailure => "io_failure",
            Self::InvalidSpec => "invalid_spec",
            Self::LockTimeout => "lock_timeout",
            Self::StaleGeneration => "stale_generation",
            Self::Store => "store",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    #[error("Tag not found: {0}")]
    TagNotFound(String),

    #[error("Invalid entry ID: {0}")]
    InvalidEntryId(String),

    #[error("Invalid request: {0}")]
    InvalidSpec(String),

    #[error("Timed out after {waited_ms}ms waiting for the vault lock ({operation})")]
    LockTimeout {
        operation: &'static str,
        waited_ms: u64,
    },

    #[error("IO error on {}: {source}", .path.display())]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Vault root does not exist or is not a directory: {}", .0.display())]
    VaultRootMissing(PathBuf),

    #[error("Not a vault (no .vault directory). Run 'vault init' first.")]
    NotInitialized,

    #[error("Config already exists at {}", .0.display())]
    ConfigExists(PathBuf),

    #[error("Config parse error: {0}")]
    ConfigParse(String),

    #[error("Glob pattern error: {0}")]
    GlobPattern(String),

    #[error("Schema version mismatch: database is v{found}, expected v{expected}. Remove .vault/index.db and rescan.")]
    SchemaVersionMismatch { found: i32, expected: i32 },

    #[error("Stale generation: expected {expected}, found {found}. Re-run the search from offset 0.")]
    StaleGeneration { expected: u64, found: u64 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

impl VaultError {
    pub(crate) fn file_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileIo {
            path: path.into(),
            source,
        }
    }

    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EntryNotFound(_)
            | Self::TagNotFound(_)
            | Self::VaultRootMissing(_)
            | Self::NotInitialized => ErrorKind::NotFound,
            Self::InvalidEntryId(_)
            | Self::InvalidSpec(_)
            | Self::ConfigExists(_)
            | Self::ConfigParse(_)
            | Self::GlobPattern(_) => ErrorKind::InvalidSpec,
            Self::LockTimeout { .. } => ErrorKind::LockTimeout,
            Self::FileIo { .. } | Self::Io(_) => ErrorKind::IoFailure,
            Self::Database(_) | Self::SchemaVersionMismatch { .. } | Self::Serialization(_) => {
                ErrorKind::Store
            }
            Self::StaleGeneration { .. } => ErrorKind::StaleGeneration,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            VaultError::EntryNotFound("abc".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            VaultError::InvalidSpec("empty destination".into()).kind(),
            ErrorKind::InvalidSpec
        );
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(VaultError::file_io("a.jpg", io).kind(), ErrorKind::IoFailure);
        assert_eq!(
            VaultError::LockTimeout {
                operation: "scan",
                waited_ms: 10
            }
            .kind(),
            ErrorKind::LockTimeout
        );
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::IoFailure).unwrap();
        assert_eq!(json, "\"io_failure\"");
        assert_eq!(ErrorKind::StaleGeneration.as_str(), "stale_generation");
    }
}

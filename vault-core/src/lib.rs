//! Vault Core - Local image vault indexing
//!
//! Tracks image files under a root directory, lets callers tag them,
//! search by tag and filename, and run bulk tag, delete and export
//! operations over selections.

pub mod bulk;
pub mod cancel;
pub mod config;
pub mod entry;
pub mod error;
pub mod fsio;
pub mod generation;
pub mod query;
pub mod scan;
pub mod store;
pub mod tags;
pub mod vault;

pub use bulk::{BulkFailure, BulkOperation, BulkResult, ExportOptions, ExportedFile};
pub use cancel::CancelToken;
pub use config::Config;
pub use entry::{Entry, EntryId};
pub use error::{ErrorKind, VaultError};
pub use generation::Generation;
pub use query::{MissingFilter, QuerySpec, SearchResult, SortKey, SortOrder};
pub use scan::{ScanIssue, ScanOptions, ScanReport};
pub use store::EntryStore;
pub use tags::TagIndex;
pub use vault::{TagCount, Vault, VaultStatus, VAULT_DIR};

/// Result type alias for vault operations
pub type Result<T> = std::result::Result<T, VaultError>;

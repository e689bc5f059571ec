//! Bulk operations over explicit entry ID lists.
//!
//! IDs are processed in the order given and each one gets its own outcome:
//! a failure on one ID never stops the rest. Each per-entry mutation
//! commits on its own, so a result can be partially applied.

use crate::cancel::CancelToken;
use crate::entry::{normalize_tag, normalize_tags, EntryId};
use crate::error::{ErrorKind, VaultError};
use crate::fsio::{copy_into, reserve_destination, retry_io, RetryPolicy};
use crate::query::MissingFilter;
use crate::vault::Vault;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkOperation {
    Tag,
    Delete,
    Export,
    Purge,
    RenameTag,
    DeleteTag,
}

impl BulkOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tag => "tag",
            Self::Delete => "delete",
            Self::Export => "export",
            Self::Purge => "purge",
            Self::RenameTag => "rename_tag",
            Self::DeleteTag => "delete_tag",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkFailure {
    pub id: String,
    pub kind: ErrorKind,
    pub reason: String,
}

/// Where an exported entry ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedFile {
    pub id: String,
    pub source: String,
    pub destination: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkResult {
    pub operation: BulkOperation,
    pub requested: usize,
    pub succeeded: Vec<String>,
    pub failed: Vec<BulkFailure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exported: Vec<ExportedFile>,
    /// False when cancelled; unattempted IDs are listed as cancelled failures
    pub complete: bool,
}

impl BulkResult {
    fn new(operation: BulkOperation, requested: usize) -> Self {
        Self {
            operation,
            requested,
            succeeded: Vec::new(),
            failed: Vec::new(),
            exported: Vec::new(),
            complete: true,
        }
    }

    fn fail(&mut self, id: &str, err: &VaultError) {
        warn!(operation = self.operation.as_str(), id, error = %err, "bulk item failed");
        self.failed.push(BulkFailure {
            id: id.to_string(),
            kind: err.kind(),
            reason: err.to_string(),
        });
    }

    /// Every requested ID has exactly one outcome
    pub fn outcome_count(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportOptions {
    /// Recreate each entry's folder layout under the destination
    #[serde(default)]
    pub preserve_structure: bool,
}

impl Vault {
    fn run_bulk<S: AsRef<str>>(
        &self,
        operation: BulkOperation,
        ids: &[S],
        cancel: &CancelToken,
        mut apply: impl FnMut(&EntryId) -> crate::Result<Option<ExportedFile>>,
    ) -> BulkResult {
        let mut result = BulkResult::new(operation, ids.len());

        for (i, raw) in ids.iter().enumerate() {
            let raw = raw.as_ref();
            if cancel.is_cancelled() {
                result.complete = false;
                for rest in &ids[i..] {
                    result.fail(rest.as_ref(), &VaultError::Cancelled);
                }
                break;
            }

            let outcome = raw.parse::<EntryId>().and_then(|id| apply(&id));
            match outcome {
                Ok(exported) => {
                    result.succeeded.push(raw.to_string());
                    result.exported.extend(exported);
                }
                Err(err) => result.fail(raw, &err),
            }
        }

        info!(
            operation = operation.as_str(),
            requested = result.requested,
            succeeded = result.succeeded.len(),
            failed = result.failed.len(),
            "bulk operation finished"
        );
        result
    }

    /// Add and remove tags on each entry. A tag in both lists is removed.
    pub fn bulk_tag<S: AsRef<str>, T: AsRef<str>>(
        &self,
        ids: &[S],
        add: &[T],
        remove: &[T],
    ) -> crate::Result<BulkResult> {
        let remove = normalize_tags(remove)?;
        let add: BTreeSet<String> = normalize_tags(add)?
            .difference(&remove)
            .cloned()
            .collect();
        if add.is_empty() && remove.is_empty() {
            return Err(VaultError::InvalidSpec(
                "bulk tag needs at least one tag to add or remove".to_string(),
            ));
        }

        let _gate = self.gate("bulk_tag")?;
        Ok(self.run_bulk(BulkOperation::Tag, ids, &CancelToken::new(), |id| {
            self.retag(id, "bulk_tag", |tags| {
                tags.extend(add.iter().cloned());
                tags.retain(|t| !remove.contains(t));
            })
        }))
    }

    /// Rename `from` to `to` on every entry carrying it, missing entries
    /// included. Entries that already carry `to` just lose `from`.
    pub fn rename_tag(&self, from: &str, to: &str) -> crate::Result<BulkResult> {
        let (Some(from), Some(to)) = (normalize_tag(from), normalize_tag(to)) else {
            return Err(VaultError::InvalidSpec("tag must not be blank".to_string()));
        };
        if from == to {
            return Err(VaultError::InvalidSpec(format!(
                "cannot rename tag '{from}' to itself"
            )));
        }

        let _gate = self.gate("rename_tag")?;
        let ids = self.ids_carrying(&from, "rename_tag")?;
        Ok(self.run_bulk(BulkOperation::RenameTag, &ids, &CancelToken::new(), |id| {
            self.retag(id, "rename_tag", |tags| {
                if tags.remove(&from) {
                    tags.insert(to.clone());
                }
            })
        }))
    }

    /// Remove `tag` from every entry, missing entries included
    pub fn delete_tag(&self, tag: &str) -> crate::Result<BulkResult> {
        let Some(tag) = normalize_tag(tag) else {
            return Err(VaultError::InvalidSpec("tag must not be blank".to_string()));
        };

        let _gate = self.gate("delete_tag")?;
        let ids = self.ids_carrying(&tag, "delete_tag")?;
        Ok(self.run_bulk(BulkOperation::DeleteTag, &ids, &CancelToken::new(), |id| {
            self.retag(id, "delete_tag", |tags| {
                tags.remove(&tag);
            })
        }))
    }

    fn ids_carrying(&self, tag: &str, operation: &'static str) -> crate::Result<Vec<String>> {
        let ids = self.read_catalog(operation)?.store.ids_with_tag(tag)?;
        if ids.is_empty() {
            return Err(VaultError::TagNotFound(tag.to_string()));
        }
        Ok(ids.into_iter().map(|id| id.to_string()).collect())
    }

    /// Edit one entry's tag set, writing only when it changed
    fn retag(
        &self,
        id: &EntryId,
        operation: &'static str,
        edit: impl FnOnce(&mut BTreeSet<String>),
    ) -> crate::Result<Option<ExportedFile>> {
        let mut catalog = self.write_catalog(operation)?;
        let entry = catalog.store.get(id)?;
        let mut tags = entry.tags.clone();
        edit(&mut tags);
        if tags != entry.tags {
            catalog.set_tags(&entry, &tags)?;
        }
        Ok(None)
    }

    /// Soft delete: mark entries missing, leaving their files and tags alone
    pub fn bulk_delete<S: AsRef<str>>(&self, ids: &[S]) -> crate::Result<BulkResult> {
        let _gate = self.gate("bulk_delete")?;
        Ok(self.run_bulk(BulkOperation::Delete, ids, &CancelToken::new(), |id| {
            let mut catalog = self.write_catalog("bulk_delete")?;
            let entry = catalog.store.get(id)?;
            if !entry.missing {
                catalog.set_missing(id, true)?;
            }
            Ok(None)
        }))
    }

    /// Copy each entry's file into `destination`. Existing files are never
    /// overwritten: name collisions get a `_N` suffix.
    pub fn bulk_export<S: AsRef<str>>(
        &self,
        ids: &[S],
        destination: &str,
        options: &ExportOptions,
        cancel: &CancelToken,
    ) -> crate::Result<BulkResult> {
        let destination = destination.trim();
        if destination.is_empty() {
            return Err(VaultError::InvalidSpec(
                "export destination must not be empty".to_string(),
            ));
        }
        let destination = PathBuf::from(destination);
        let policy = self.retry_policy();

        let _gate = self.gate("export")?;
        Ok(self.run_bulk(BulkOperation::Export, ids, cancel, |id| {
            self.export_one(id, &destination, options, policy).map(Some)
        }))
    }

    fn export_one(
        &self,
        id: &EntryId,
        destination: &Path,
        options: &ExportOptions,
        policy: RetryPolicy,
    ) -> crate::Result<ExportedFile> {
        let entry = self.read_catalog("export")?.store.get(id)?;
        let source = self.resolve_under_root(&entry.relative_path)?;

        let dir = match Path::new(&entry.relative_path).parent() {
            Some(parent) if options.preserve_structure && !parent.as_os_str().is_empty() => {
                destination.join(parent)
            }
            _ => destination.to_path_buf(),
        };
        fs::create_dir_all(&dir).map_err(|e| VaultError::file_io(&dir, e))?;

        let (dest_path, file) = retry_io(policy, || reserve_destination(&dir, entry.file_name()))
            .map_err(|e| VaultError::file_io(&dir, e))?;
        copy_into(&source, &dest_path, file, policy)
            .map_err(|e| VaultError::file_io(&source, e))?;

        Ok(ExportedFile {
            id: id.to_string(),
            source: entry.relative_path,
            destination: dest_path,
        })
    }

    /// Remove entries from the store entirely. Files on disk are untouched.
    pub fn purge_entries<S: AsRef<str>>(&self, ids: &[S]) -> crate::Result<BulkResult> {
        let _gate = self.gate("purge")?;
        Ok(self.purge_ids(ids, false))
    }

    /// Purge every entry currently marked missing
    pub fn purge_missing(&self) -> crate::Result<BulkResult> {
        let _gate = self.gate("purge")?;
        let ids: Vec<String> = self
            .read_catalog("purge")?
            .store
            .ids(MissingFilter::Only)?
            .into_iter()
            .map(|id| id.to_string())
            .collect();
        Ok(self.purge_ids(&ids, true))
    }

    /// Caller holds the gate. With `only_missing`, an entry that is live
    /// again by the time it is reached fails instead of being purged.
    fn purge_ids<S: AsRef<str>>(&self, ids: &[S], only_missing: bool) -> BulkResult {
        self.run_bulk(BulkOperation::Purge, ids, &CancelToken::new(), |id| {
            let mut catalog = self.write_catalog("purge")?;
            if only_missing && !catalog.store.get(id)?.missing {
                return Err(VaultError::InvalidSpec(format!(
                    "entry {id} is no longer missing"
                )));
            }
            catalog.purge(id)?;
            Ok(None)
        })
    }
}

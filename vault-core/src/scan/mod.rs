//! Scanner: reconciles the entry store with the files under the vault root.
//!
//! Discovery walks the tree, then every candidate's size and mtime are
//! compared against the stored entry. Small batches are reconciled inline;
//! larger ones stat files on a rayon pool and feed a single writer through
//! a bounded channel. Entries whose files were not seen are marked missing,
//! never deleted.

mod discovery;

use crate::cancel::CancelToken;
use crate::entry::{normalize_tag, now_secs, Entry};
use crate::error::{ErrorKind, VaultError};
use crate::fsio::{file_meta, FileMeta};
use crate::store::StoredMeta;
use crate::vault::{Vault, META_LAST_SCAN, META_LAST_SCAN_ROOT};
use discovery::{is_shielded, Candidate};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{info, info_span, warn};

/// Batches with <= this many candidates are reconciled without the pipeline
pub(crate) const SEQUENTIAL_THRESHOLD: usize = 64;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanOptions {
    /// Tag newly added entries with their folder names. Falls back to
    /// `scan.auto_tag` from the config.
    #[serde(default)]
    pub auto_tag: Option<bool>,
}

/// A file the scan could not process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanIssue {
    pub path: String,
    pub kind: ErrorKind,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanReport {
    pub added: usize,
    pub updated: usize,
    /// Previously missing entries whose file is back
    pub restored: usize,
    pub unchanged: usize,
    pub marked_missing: usize,
    pub errors: Vec<ScanIssue>,
    /// False when the scan was cancelled before finishing
    pub complete: bool,
    pub started_at: i64,
    pub duration_ms: u64,
}

impl ScanReport {
    /// Entries the scan wrote to
    pub fn changed(&self) -> usize {
        self.added + self.updated + self.restored + self.marked_missing
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Added,
    Updated,
    Restored,
    Unchanged,
}

/// Folder-derived tags for `relative_path`: underscores and dashes become
/// spaces, single-character names are dropped.
pub(crate) fn folder_tags(relative_path: &str, skip: &[String]) -> BTreeSet<String> {
    let mut parts: Vec<&str> = relative_path.split('/').collect();
    parts.pop();
    parts
        .into_iter()
        .filter(|part| !skip.iter().any(|s| s == part))
        .filter_map(|part| normalize_tag(&part.replace(['_', '-'], " ")))
        .filter(|tag| tag.chars().count() > 1)
        .collect()
}

impl Vault {
    /// Bring the store in line with the filesystem.
    ///
    /// Per-file failures are collected in the report. Store failures, a
    /// missing root and lock timeouts abort the scan.
    pub fn scan(&self, options: &ScanOptions, cancel: &CancelToken) -> crate::Result<ScanReport> {
        let _gate = self.gate("scan")?;
        if !self.root().is_dir() {
            return Err(VaultError::VaultRootMissing(self.root().to_path_buf()));
        }

        let span = info_span!("scan", root = %self.root().display());
        let _enter = span.enter();
        let started = Instant::now();
        let mut report = ScanReport {
            complete: true,
            started_at: now_secs(),
            ..Default::default()
        };
        let auto_tag = options.auto_tag.unwrap_or(self.config().scan.auto_tag);

        let discovery = self.discover(cancel)?;
        report.errors.extend(discovery.issues);

        if discovery.cancelled {
            report.complete = false;
        } else {
            if discovery.candidates.len() <= SEQUENTIAL_THRESHOLD {
                self.reconcile_sequential(&discovery.candidates, auto_tag, cancel, &mut report)?;
            } else {
                self.reconcile_pipeline(&discovery.candidates, auto_tag, cancel, &mut report)?;
            }

            // A partial walk can't tell which files are gone
            if cancel.is_cancelled() {
                report.complete = false;
            } else {
                let seen: HashSet<&str> = discovery
                    .candidates
                    .iter()
                    .map(|c| c.relative_path.as_str())
                    .collect();
                self.mark_unseen(&seen, &discovery.unreadable, cancel, &mut report)?;
            }
        }

        report.errors.sort_by(|a, b| a.path.cmp(&b.path));
        report.duration_ms = started.elapsed().as_millis() as u64;

        if report.complete {
            let catalog = self.read_catalog("scan")?;
            catalog
                .store
                .set_meta(META_LAST_SCAN, &report.started_at.to_string())?;
            catalog
                .store
                .set_meta(META_LAST_SCAN_ROOT, &self.root().to_string_lossy())?;
        }

        info!(
            added = report.added,
            updated = report.updated,
            restored = report.restored,
            unchanged = report.unchanged,
            marked_missing = report.marked_missing,
            errors = report.errors.len(),
            complete = report.complete,
            duration_ms = report.duration_ms,
            "scan finished"
        );
        Ok(report)
    }

    fn reconcile_sequential(
        &self,
        candidates: &[Candidate],
        auto_tag: bool,
        cancel: &CancelToken,
        report: &mut ScanReport,
    ) -> crate::Result<()> {
        let policy = self.retry_policy();
        for candidate in candidates {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let known = self
                .read_catalog("scan")?
                .store
                .get_by_path(&candidate.relative_path)?
                .map(|e| StoredMeta {
                    id: e.id,
                    size_bytes: e.size_bytes,
                    modified_at: e.modified_at,
                    missing: e.missing,
                });
            let meta = file_meta(&candidate.path, policy);
            self.observe(candidate, meta, known.as_ref(), auto_tag, report)?;
        }
        Ok(())
    }

    fn reconcile_pipeline(
        &self,
        candidates: &[Candidate],
        auto_tag: bool,
        cancel: &CancelToken,
        report: &mut ScanReport,
    ) -> crate::Result<()> {
        let known: HashMap<String, StoredMeta> = self.read_catalog("scan")?.store.path_snapshot()?;
        let policy = self.retry_policy();
        let (tx, rx) = crossbeam_channel::bounded::<(usize, io::Result<FileMeta>)>(64);

        // Set by the writer so producers stop early
        let stop = AtomicBool::new(false);
        let stop_ref = &stop;

        std::thread::scope(|s| {
            let producer_sender = tx.clone();
            s.spawn(move || {
                candidates.par_iter().enumerate().for_each_with(
                    producer_sender,
                    |sender, (i, candidate)| {
                        if stop_ref.load(Ordering::Relaxed) || cancel.is_cancelled() {
                            return;
                        }
                        let meta = file_meta(&candidate.path, policy);
                        if sender.send((i, meta)).is_err() {
                            stop_ref.store(true, Ordering::Relaxed);
                        }
                    },
                );
            });
            drop(tx);

            let mut result = Ok(());
            for (i, meta) in rx.iter() {
                if cancel.is_cancelled() {
                    break;
                }
                let candidate = &candidates[i];
                let known = known.get(&candidate.relative_path);
                if let Err(e) = self.observe(candidate, meta, known, auto_tag, report) {
                    result = Err(e);
                    break;
                }
            }
            // Unblock any producer still waiting on a full channel
            stop.store(true, Ordering::Relaxed);
            drop(rx);
            result
        })
    }

    /// Apply one stat result to the store
    fn observe(
        &self,
        candidate: &Candidate,
        meta: io::Result<FileMeta>,
        known: Option<&StoredMeta>,
        auto_tag: bool,
        report: &mut ScanReport,
    ) -> crate::Result<()> {
        let meta = match meta {
            Ok(meta) => meta,
            Err(err) => {
                warn!(path = %candidate.relative_path, error = %err, "cannot stat file");
                report.errors.push(ScanIssue {
                    path: candidate.relative_path.clone(),
                    kind: ErrorKind::IoFailure,
                    reason: err.to_string(),
                });
                return Ok(());
            }
        };

        match self.apply_observation(&candidate.relative_path, meta, known, auto_tag)? {
            Outcome::Added => report.added += 1,
            Outcome::Updated => report.updated += 1,
            Outcome::Restored => report.restored += 1,
            Outcome::Unchanged => report.unchanged += 1,
        }
        Ok(())
    }

    fn apply_observation(
        &self,
        relative_path: &str,
        meta: FileMeta,
        known: Option<&StoredMeta>,
        auto_tag: bool,
    ) -> crate::Result<Outcome> {
        match known {
            Some(k)
                if !k.missing
                    && k.size_bytes == meta.size_bytes
                    && k.modified_at == meta.modified_at =>
            {
                Ok(Outcome::Unchanged)
            }
            Some(k) => {
                let mut catalog = self.write_catalog("scan")?;
                let mut entry = catalog.store.get(&k.id)?;
                let outcome = if entry.missing {
                    Outcome::Restored
                } else {
                    Outcome::Updated
                };
                entry.size_bytes = meta.size_bytes;
                entry.modified_at = meta.modified_at;
                entry.missing = false;
                entry.indexed_at = now_secs();
                catalog.put(&entry)?;
                Ok(outcome)
            }
            None => {
                let mut entry = Entry::new(relative_path, meta.size_bytes, meta.modified_at);
                if auto_tag {
                    entry.tags = folder_tags(relative_path, &self.config().ignore.patterns);
                }
                self.write_catalog("scan")?.put(&entry)?;
                Ok(Outcome::Added)
            }
        }
    }

    fn mark_unseen(
        &self,
        seen: &HashSet<&str>,
        unreadable: &[String],
        cancel: &CancelToken,
        report: &mut ScanReport,
    ) -> crate::Result<()> {
        let snapshot = self.read_catalog("scan")?.store.path_snapshot()?;
        let mut unseen: Vec<(String, StoredMeta)> = snapshot
            .into_iter()
            .filter(|(path, meta)| {
                !meta.missing && !seen.contains(path.as_str()) && !is_shielded(path, unreadable)
            })
            .collect();
        unseen.sort_by(|a, b| a.0.cmp(&b.0));

        for (path, meta) in unseen {
            if cancel.is_cancelled() {
                report.complete = false;
                return Ok(());
            }
            // The file may have come back since the walk
            if self.root().join(&path).is_file() {
                continue;
            }
            self.write_catalog("scan")?.set_missing(&meta.id, true)?;
            report.marked_missing += 1;
        }
        Ok(())
    }
}

//! Vault facade: owns the store, the tag index and the locks around them

use crate::config::{Config, DEFAULT_CONFIG};
use crate::entry::{Entry, EntryId};
use crate::error::VaultError;
use crate::fsio::RetryPolicy;
use crate::generation::Generation;
use crate::query::{self, QuerySpec, SearchResult};
use crate::store::EntryStore;
use crate::tags::TagIndex;
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{info, warn};

/// Directory under the vault root holding config and the index database
pub const VAULT_DIR: &str = ".vault";
const CONFIG_FILE: &str = "config.toml";
const STORE_FILE: &str = "index.db";

pub(crate) const META_LAST_SCAN: &str = "last_scan";
pub(crate) const META_LAST_SCAN_ROOT: &str = "last_scan_root";

/// Store plus its derived tag index, always mutated together
pub(crate) struct Catalog {
    pub(crate) store: EntryStore,
    pub(crate) tags: TagIndex,
    pub(crate) generation: Generation,
}

impl Catalog {
    fn bump(&mut self) -> crate::Result<()> {
        self.generation = self.generation.next();
        self.generation.persist(&self.store)
    }

    /// Persist an entry and re-index its tags
    pub(crate) fn put(&mut self, entry: &Entry) -> crate::Result<()> {
        self.store.upsert(entry)?;
        if entry.missing {
            self.tags.remove_entry(&entry.id);
        } else {
            self.tags.insert_entry(&entry.id, &entry.tags);
        }
        self.bump()
    }

    pub(crate) fn set_tags(&mut self, entry: &Entry, tags: &BTreeSet<String>) -> crate::Result<()> {
        self.store.replace_tags(&entry.id, tags)?;
        if !entry.missing {
            self.tags.insert_entry(&entry.id, tags);
        }
        self.bump()
    }

    pub(crate) fn set_missing(&mut self, id: &EntryId, missing: bool) -> crate::Result<()> {
        self.store.set_missing(id, missing)?;
        if missing {
            self.tags.remove_entry(id);
        } else {
            let entry = self.store.get(id)?;
            self.tags.insert_entry(id, &entry.tags);
        }
        self.bump()
    }

    pub(crate) fn purge(&mut self, id: &EntryId) -> crate::Result<()> {
        self.store.delete(id)?;
        self.tags.remove_entry(id);
        self.bump()
    }
}

/// Tag with the number of live entries carrying it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

/// Vault status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultStatus {
    pub root: String,
    pub entries: usize,
    pub missing: usize,
    pub tags: usize,
    pub generation: u64,
    pub last_scan: Option<String>,
    pub store_size_bytes: u64,
}

/// An image vault rooted at one directory.
///
/// Readers share the catalog lock; each single-entry mutation takes it
/// exclusively for that entry only. Scans and bulk operations additionally
/// hold the operation gate for their whole run, so they never interleave.
pub struct Vault {
    root: PathBuf,
    config: Config,
    catalog: RwLock<Catalog>,
    op_gate: Mutex<()>,
}

impl Vault {
    /// Create `.vault/` with a default config and an empty store
    pub fn init(root: &Path) -> crate::Result<()> {
        let root = canonical_root(root)?;
        let vault_dir = root.join(VAULT_DIR);
        let config_path = vault_dir.join(CONFIG_FILE);

        if config_path.exists() {
            return Err(VaultError::ConfigExists(config_path));
        }

        fs::create_dir_all(&vault_dir)?;
        fs::write(&config_path, DEFAULT_CONFIG)?;
        EntryStore::open(&vault_dir.join(STORE_FILE))?;

        info!(root = %root.display(), "initialized vault");
        Ok(())
    }

    /// Open an initialized vault
    pub fn open(root: &Path) -> crate::Result<Self> {
        let root = canonical_root(root)?;
        let vault_dir = root.join(VAULT_DIR);
        let config_path = vault_dir.join(CONFIG_FILE);

        let config = if config_path.exists() {
            Config::load(&config_path)?
        } else {
            if !vault_dir.exists() {
                return Err(VaultError::NotInitialized);
            }
            Config::default()
        };

        Self::open_with(&root, &vault_dir.join(STORE_FILE), config)
    }

    /// Open, initializing first when `.vault/` does not exist yet
    pub fn open_or_init(root: &Path) -> crate::Result<Self> {
        if !root.join(VAULT_DIR).exists() {
            Self::init(root)?;
        }
        Self::open(root)
    }

    /// Open with an explicit store location and config
    pub fn open_with(root: &Path, store_path: &Path, config: Config) -> crate::Result<Self> {
        let root = canonical_root(root)?;
        let store = EntryStore::open(store_path)?;
        let tags = TagIndex::rebuild(&store)?;
        let generation = Generation::load(&store)?;
        info!(
            root = %root.display(),
            tags = tags.tag_count(),
            generation = generation.value(),
            "opened vault"
        );

        Ok(Self {
            root,
            config,
            catalog: RwLock::new(Catalog {
                store,
                tags,
                generation,
            }),
            op_gate: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.config.io.retry_attempts, self.config.retry_backoff())
    }

    fn lock_timeout_error(&self, operation: &'static str) -> VaultError {
        let waited_ms = self.config.lock_timeout().as_millis() as u64;
        warn!(operation, waited_ms, "vault lock timeout");
        VaultError::LockTimeout {
            operation,
            waited_ms,
        }
    }

    pub(crate) fn read_catalog(
        &self,
        operation: &'static str,
    ) -> crate::Result<RwLockReadGuard<'_, Catalog>> {
        self.catalog
            .try_read_for(self.config.lock_timeout())
            .ok_or_else(|| self.lock_timeout_error(operation))
    }

    pub(crate) fn write_catalog(
        &self,
        operation: &'static str,
    ) -> crate::Result<RwLockWriteGuard<'_, Catalog>> {
        self.catalog
            .try_write_for(self.config.lock_timeout())
            .ok_or_else(|| self.lock_timeout_error(operation))
    }

    /// Exclusive slot for a scan or bulk operation
    pub(crate) fn gate(&self, operation: &'static str) -> crate::Result<MutexGuard<'_, ()>> {
        self.op_gate
            .try_lock_for(self.config.lock_timeout())
            .ok_or_else(|| self.lock_timeout_error(operation))
    }

    /// Absolute path of a stored relative path, refusing anything that
    /// would leave the vault root.
    pub(crate) fn resolve_under_root(&self, relative_path: &str) -> crate::Result<PathBuf> {
        let rel = Path::new(relative_path);
        let contained = !relative_path.is_empty()
            && rel.components().all(|c| matches!(c, Component::Normal(_)));
        if !contained {
            return Err(VaultError::InvalidSpec(format!(
                "path escapes the vault root: {relative_path}"
            )));
        }
        Ok(self.root.join(rel))
    }

    /// Current store generation
    pub fn generation(&self) -> crate::Result<u64> {
        Ok(self.read_catalog("generation")?.generation.value())
    }

    pub fn search(&self, spec: &QuerySpec) -> crate::Result<SearchResult> {
        let catalog = self.read_catalog("search")?;
        query::execute(&catalog, &self.config.query, spec)
    }

    pub fn get_entry(&self, id: &str) -> crate::Result<Entry> {
        let id: EntryId = id.parse()?;
        self.read_catalog("get_entry")?.store.get(&id)
    }

    /// Every tag carried by at least one live entry, sorted
    pub fn list_all_tags(&self) -> crate::Result<Vec<String>> {
        let catalog = self.read_catalog("list_tags")?;
        Ok(catalog.tags.all_tags().map(str::to_string).collect())
    }

    pub fn tag_counts(&self) -> crate::Result<Vec<TagCount>> {
        let catalog = self.read_catalog("list_tags")?;
        Ok(catalog
            .tags
            .tag_counts()
            .map(|(tag, count)| TagCount {
                tag: tag.to_string(),
                count,
            })
            .collect())
    }

    pub fn status(&self) -> crate::Result<VaultStatus> {
        let catalog = self.read_catalog("status")?;
        let (entries, missing) = catalog.store.counts()?;
        let last_scan = catalog
            .store
            .get_meta(META_LAST_SCAN)?
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
            .and_then(|dt| dt.format(&Rfc3339).ok());

        Ok(VaultStatus {
            root: self.root.to_string_lossy().to_string(),
            entries,
            missing,
            tags: catalog.tags.tag_count(),
            generation: catalog.generation.value(),
            last_scan,
            store_size_bytes: catalog.store.size_on_disk(),
        })
    }
}

fn canonical_root(root: &Path) -> crate::Result<PathBuf> {
    match root.canonicalize() {
        Ok(p) if p.is_dir() => Ok(p),
        _ => Err(VaultError::VaultRootMissing(root.to_path_buf())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_then_open() {
        let dir = TempDir::new().unwrap();
        Vault::init(dir.path()).unwrap();
        assert!(dir.path().join(".vault/config.toml").exists());
        assert!(dir.path().join(".vault/index.db").exists());

        let vault = Vault::open(dir.path()).unwrap();
        assert_eq!(vault.root(), dir.path().canonicalize().unwrap());
        assert_eq!(vault.generation().unwrap(), 0);

        let err = Vault::init(dir.path()).unwrap_err();
        assert!(matches!(err, VaultError::ConfigExists(_)));
    }

    #[test]
    fn test_open_uninitialized_and_missing_root() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Vault::open(dir.path()),
            Err(VaultError::NotInitialized)
        ));
        assert!(matches!(
            Vault::open(&dir.path().join("nope")),
            Err(VaultError::VaultRootMissing(_))
        ));
        let vault = Vault::open_or_init(dir.path()).unwrap();
        assert_eq!(vault.status().unwrap().entries, 0);
    }

    #[test]
    fn test_resolve_under_root_rejects_escapes() {
        let dir = TempDir::new().unwrap();
        let vault = Vault::open_or_init(dir.path()).unwrap();
        assert!(vault.resolve_under_root("b/c.png").is_ok());
        for bad in ["../etc/passwd", "/etc/passwd", "a/../../x.jpg", ""] {
            assert!(
                matches!(vault.resolve_under_root(bad), Err(VaultError::InvalidSpec(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_catalog_keeps_index_in_step_with_store() {
        let dir = TempDir::new().unwrap();
        let vault = Vault::open_or_init(dir.path()).unwrap();
        let mut entry = Entry::new("a.jpg", 1, 1);
        entry.tags = ["cat".to_string()].into_iter().collect();

        {
            let mut catalog = vault.write_catalog("test").unwrap();
            catalog.put(&entry).unwrap();
            catalog.set_missing(&entry.id, true).unwrap();
        }
        assert!(vault.list_all_tags().unwrap().is_empty());
        assert_eq!(vault.generation().unwrap(), 2);

        vault
            .write_catalog("test")
            .unwrap()
            .set_missing(&entry.id, false)
            .unwrap();
        assert_eq!(vault.list_all_tags().unwrap(), vec!["cat"]);
        assert_eq!(
            vault.tag_counts().unwrap(),
            vec![TagCount {
                tag: "cat".into(),
                count: 1
            }]
        );
    }

    #[test]
    fn test_tag_index_rebuilt_on_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let vault = Vault::open_or_init(dir.path()).unwrap();
            let mut entry = Entry::new("a.jpg", 1, 1);
            entry.tags = ["cat".to_string()].into_iter().collect();
            vault.write_catalog("test").unwrap().put(&entry).unwrap();
        }
        let vault = Vault::open(dir.path()).unwrap();
        assert_eq!(vault.list_all_tags().unwrap(), vec!["cat"]);
    }

    #[test]
    fn test_generation_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let cursor = {
            let vault = Vault::open_or_init(dir.path()).unwrap();
            let entry = Entry::new("a.jpg", 1, 1);
            let mut catalog = vault.write_catalog("test").unwrap();
            catalog.put(&entry).unwrap();
            catalog.set_missing(&entry.id, true).unwrap();
            catalog.generation.value()
        };
        assert_eq!(cursor, 2);

        let vault = Vault::open(dir.path()).unwrap();
        assert_eq!(vault.generation().unwrap(), 2);

        // A cursor from before the reopen is not accepted again later
        let entry = vault.get_entry(EntryId::for_path("a.jpg").as_str()).unwrap();
        vault.write_catalog("test").unwrap().put(&entry).unwrap();
        let err = vault
            .search(&QuerySpec::new().page(1, 10).at_generation(cursor - 1))
            .unwrap_err();
        assert!(matches!(err, VaultError::StaleGeneration { found: 3, .. }));
    }

    #[test]
    fn test_get_entry_parses_id() {
        let dir = TempDir::new().unwrap();
        let vault = Vault::open_or_init(dir.path()).unwrap();
        assert!(matches!(
            vault.get_entry("not-an-id"),
            Err(VaultError::InvalidEntryId(_))
        ));
        let id = EntryId::for_path("a.jpg");
        assert!(matches!(
            vault.get_entry(id.as_str()),
            Err(VaultError::EntryNotFound(_))
        ));
    }

    #[test]
    fn test_lock_timeout_surfaces() {
        let dir = TempDir::new().unwrap();
        Vault::init(dir.path()).unwrap();
        let mut config = Config::default();
        config.io.lock_timeout = "10ms".to_string();
        let vault = Vault::open_with(
            dir.path(),
            &dir.path().join(".vault/index.db"),
            config,
        )
        .unwrap();

        let _held = vault.gate("test").unwrap();
        std::thread::scope(|s| {
            let waiter = s.spawn(|| vault.gate("other").map(|_| ()));
            let err = waiter.join().unwrap().unwrap_err();
            assert!(matches!(
                err,
                VaultError::LockTimeout {
                    operation: "other",
                    ..
                }
            ));
        });
    }

    /// Vault with the given files scanned in; tags are comma-separated
    fn scanned(files: &[(&str, &str)]) -> (TempDir, Vault) {
        let dir = TempDir::new().unwrap();
        for (path, _) in files {
            let full = dir.path().join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(&full, path.as_bytes()).unwrap();
        }
        let vault = Vault::open_or_init(dir.path()).unwrap();
        vault
            .scan(&crate::ScanOptions::default(), &crate::CancelToken::new())
            .unwrap();
        for (path, tags) in files {
            let tags: Vec<&str> = tags.split(',').filter(|t| !t.is_empty()).collect();
            if !tags.is_empty() {
                let id = EntryId::for_path(path);
                vault.bulk_tag(&[id.as_str()], &tags, &[]).unwrap();
            }
        }
        (dir, vault)
    }

    fn paths(result: &SearchResult) -> Vec<&str> {
        result
            .entries
            .iter()
            .map(|e| e.relative_path.as_str())
            .collect()
    }

    #[test]
    fn test_cat_scenario() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("a.jpg"), b"a").unwrap();
        fs::write(dir.path().join("b/c.png"), b"c").unwrap();
        let vault = Vault::open_or_init(dir.path()).unwrap();

        let report = vault
            .scan(&crate::ScanOptions::default(), &crate::CancelToken::new())
            .unwrap();
        assert_eq!(report.added, 2);

        let c = EntryId::for_path("b/c.png");
        vault.bulk_tag(&[c.as_str()], &["cat"], &[]).unwrap();
        let cats = vault.search(&QuerySpec::new().include_tag("cat")).unwrap();
        assert_eq!(paths(&cats), vec!["b/c.png"]);

        let a = EntryId::for_path("a.jpg");
        vault.bulk_tag(&[a.as_str()], &["cat"], &[]).unwrap();
        let cats = vault.search(&QuerySpec::new().include_tag("cat")).unwrap();
        assert_eq!(cats.total, 2);
        assert_eq!(paths(&cats), vec!["a.jpg", "b/c.png"]);
    }

    #[test]
    fn test_tag_round_trip_restores_tags() {
        let (_dir, vault) = scanned(&[("a.jpg", "dog")]);
        let id = EntryId::for_path("a.jpg");
        let before = vault.get_entry(id.as_str()).unwrap().tags;

        vault.bulk_tag(&[id.as_str()], &["cat"], &[]).unwrap();
        vault.bulk_tag(&[id.as_str()], &[], &["cat"]).unwrap();
        assert_eq!(vault.get_entry(id.as_str()).unwrap().tags, before);
    }

    #[test]
    fn test_search_matches_tag_index_and_exclude_wins() {
        let (_dir, vault) = scanned(&[
            ("one.jpg", "cat"),
            ("two.jpg", "cat,dog"),
            ("three.jpg", "dog"),
            ("four.jpg", ""),
        ]);
        vault
            .bulk_delete(&[EntryId::for_path("one.jpg").as_str()])
            .unwrap();

        let cats = vault.search(&QuerySpec::new().include_tag("cat")).unwrap();
        assert_eq!(paths(&cats), vec!["two.jpg"]);

        let cats_not_dogs = vault
            .search(&QuerySpec::new().include_tag("cat").exclude_tag("dog"))
            .unwrap();
        assert!(cats_not_dogs.entries.is_empty());

        let with_missing = vault
            .search(
                &QuerySpec::new()
                    .include_tag("cat")
                    .with_missing(crate::MissingFilter::Include),
            )
            .unwrap();
        assert_eq!(paths(&with_missing), vec!["one.jpg", "two.jpg"]);
    }

    #[test]
    fn test_queries_see_consistent_state_during_scan() {
        let names: Vec<String> = (0..200).map(|i| format!("img_{i:03}.jpg")).collect();
        let dir = TempDir::new().unwrap();
        for name in &names {
            fs::write(dir.path().join(name), name.as_bytes()).unwrap();
        }
        let vault = Vault::open_or_init(dir.path()).unwrap();

        std::thread::scope(|s| {
            let scanner = s.spawn(|| {
                vault
                    .scan(&crate::ScanOptions::default(), &crate::CancelToken::new())
                    .unwrap()
            });
            while !scanner.is_finished() {
                let result = vault.search(&QuerySpec::new().page(0, 500)).unwrap();
                assert_eq!(result.entries.len(), result.total);
            }
            assert_eq!(scanner.join().unwrap().added, names.len());
        });
        assert_eq!(vault.status().unwrap().entries, names.len());
    }
}

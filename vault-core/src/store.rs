//! Entry record store backed by SQLite

use crate::entry::{Entry, EntryId};
use crate::error::VaultError;
use crate::query::MissingFilter;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

const SCHEMA_VERSION: i32 = 1;

/// Entries fetched per round trip by [`ListAll`]
const LIST_PAGE_SIZE: usize = 256;

const ENTRY_SELECT: &str =
    "SELECT id, relative_path, size_bytes, modified_at, missing, indexed_at FROM entries";

/// Scanner's view of a stored entry, keyed by relative path
#[derive(Debug, Clone)]
pub(crate) struct StoredMeta {
    pub id: EntryId,
    pub size_bytes: u64,
    pub modified_at: i64,
    pub missing: bool,
}

/// Persistent mapping from entry ID to entry metadata and tags
pub struct EntryStore {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl EntryStore {
    /// Open or create the store at `path`
    pub fn open(path: &Path) -> crate::Result<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            conn: Mutex::new(conn),
        })
    }

    /// Non-durable store, for tests and dry runs
    pub fn open_in_memory() -> crate::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            path: None,
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> crate::Result<()> {
        // journal_mode returns a row, so it can't go through execute_batch on every driver
        let _: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch(
            "
            PRAGMA busy_timeout = 5000;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version != 0 && version != SCHEMA_VERSION {
            return Err(VaultError::SchemaVersionMismatch {
                found: version,
                expected: SCHEMA_VERSION,
            });
        }

        if version == 0 {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS entries (
                    id TEXT PRIMARY KEY,
                    relative_path TEXT UNIQUE NOT NULL,
                    size_bytes INTEGER NOT NULL,
                    modified_at INTEGER NOT NULL,
                    missing INTEGER NOT NULL DEFAULT 0,
                    indexed_at INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_entries_missing ON entries(missing);

                CREATE TABLE IF NOT EXISTS entry_tags (
                    entry_id TEXT NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
                    tag TEXT NOT NULL,
                    PRIMARY KEY (entry_id, tag)
                );

                CREATE INDEX IF NOT EXISTS idx_entry_tags_tag ON entry_tags(tag);

                -- Scan bookkeeping (last_scan, last_scan_root)
                CREATE TABLE IF NOT EXISTS meta (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                PRAGMA user_version = 1;
                ",
            )?;
        }

        Ok(())
    }

    /// Insert or overwrite the entry with the same ID, tags included.
    pub fn upsert(&self, entry: &Entry) -> crate::Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO entries (id, relative_path, size_bytes, modified_at, missing, indexed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                relative_path = excluded.relative_path,
                size_bytes = excluded.size_bytes,
                modified_at = excluded.modified_at,
                missing = excluded.missing,
                indexed_at = excluded.indexed_at",
            params![
                entry.id.as_str(),
                entry.relative_path,
                entry.size_bytes as i64,
                entry.modified_at,
                entry.missing,
                entry.indexed_at,
            ],
        )?;
        write_tags(&tx, &entry.id, &entry.tags)?;
        tx.commit()?;
        Ok(())
    }

    /// Fetch an entry, failing with `EntryNotFound` when absent
    pub fn get(&self, id: &EntryId) -> crate::Result<Entry> {
        self.find(id)?
            .ok_or_else(|| VaultError::EntryNotFound(id.to_string()))
    }

    pub fn find(&self, id: &EntryId) -> crate::Result<Option<Entry>> {
        let conn = self.conn.lock();
        let entry = conn
            .query_row(
                &format!("{ENTRY_SELECT} WHERE id = ?"),
                params![id.as_str()],
                entry_from_row,
            )
            .optional()?;
        entry.map(|e| with_tags(&conn, e)).transpose()
    }

    pub fn get_by_path(&self, relative_path: &str) -> crate::Result<Option<Entry>> {
        let conn = self.conn.lock();
        let entry = conn
            .query_row(
                &format!("{ENTRY_SELECT} WHERE relative_path = ?"),
                params![relative_path],
                entry_from_row,
            )
            .optional()?;
        entry.map(|e| with_tags(&conn, e)).transpose()
    }

    /// Fetch several entries; IDs without a record are skipped
    pub fn get_many<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a EntryId>,
    ) -> crate::Result<Vec<Entry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!("{ENTRY_SELECT} WHERE id = ?"))?;
        let mut entries = Vec::new();
        for id in ids {
            if let Some(entry) = stmt
                .query_row(params![id.as_str()], entry_from_row)
                .optional()?
            {
                entries.push(with_tags(&conn, entry)?);
            }
        }
        Ok(entries)
    }

    /// Physically remove an entry and its tags
    pub fn delete(&self, id: &EntryId) -> crate::Result<()> {
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM entries WHERE id = ?", params![id.as_str()])?;
        if removed == 0 {
            return Err(VaultError::EntryNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Lazy sequence over every stored entry. Calling again restarts it.
    pub fn list_all(&self) -> ListAll<'_> {
        ListAll {
            store: self,
            after: None,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    fn list_page(&self, after: Option<&str>) -> crate::Result<Vec<Entry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "{ENTRY_SELECT} WHERE id > ?1 ORDER BY id LIMIT ?2"
        ))?;
        let rows: Vec<Entry> = stmt
            .query_map(
                params![after.unwrap_or(""), LIST_PAGE_SIZE as i64],
                entry_from_row,
            )?
            .collect::<rusqlite::Result<_>>()?;
        rows.into_iter().map(|e| with_tags(&conn, e)).collect()
    }

    /// IDs admitted by `filter`, in ID order
    pub fn ids(&self, filter: MissingFilter) -> crate::Result<Vec<EntryId>> {
        let sql = match filter {
            MissingFilter::Exclude => "SELECT id FROM entries WHERE missing = 0 ORDER BY id",
            MissingFilter::Include => "SELECT id FROM entries ORDER BY id",
            MissingFilter::Only => "SELECT id FROM entries WHERE missing = 1 ORDER BY id",
        };
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(sql)?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0).map(EntryId::from_raw))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(ids)
    }

    /// IDs of every entry carrying `tag`, missing ones included
    pub fn ids_with_tag(&self, tag: &str) -> crate::Result<Vec<EntryId>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT entry_id FROM entry_tags WHERE tag = ? ORDER BY entry_id")?;
        let ids = stmt
            .query_map(params![tag], |row| row.get::<_, String>(0).map(EntryId::from_raw))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(ids)
    }

    /// Metadata of every entry keyed by relative path (one table scan)
    pub(crate) fn path_snapshot(&self) -> crate::Result<HashMap<String, StoredMeta>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT relative_path, id, size_bytes, modified_at, missing FROM entries")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                StoredMeta {
                    id: EntryId::from_raw(row.get(1)?),
                    size_bytes: row.get::<_, i64>(2)? as u64,
                    modified_at: row.get(3)?,
                    missing: row.get(4)?,
                },
            ))
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    pub fn set_missing(&self, id: &EntryId, missing: bool) -> crate::Result<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE entries SET missing = ?1 WHERE id = ?2",
            params![missing, id.as_str()],
        )?;
        if updated == 0 {
            return Err(VaultError::EntryNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Replace an entry's full tag set in one transaction
    pub fn replace_tags(&self, id: &EntryId, tags: &BTreeSet<String>) -> crate::Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM entries WHERE id = ?",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(VaultError::EntryNotFound(id.to_string()));
        }
        write_tags(&tx, id, tags)?;
        tx.commit()?;
        Ok(())
    }

    /// (total entries, missing entries)
    pub fn counts(&self) -> crate::Result<(usize, usize)> {
        let conn = self.conn.lock();
        let (total, missing): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(missing), 0) FROM entries",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((total as usize, missing as usize))
    }

    pub fn get_meta(&self, key: &str) -> crate::Result<Option<String>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row("SELECT value FROM meta WHERE key = ?", params![key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> crate::Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Size of the database file on disk (0 for in-memory stores)
    pub fn size_on_disk(&self) -> u64 {
        self.path
            .as_ref()
            .and_then(|p| fs::metadata(p).ok())
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

/// Paged iterator returned by [`EntryStore::list_all`]
pub struct ListAll<'a> {
    store: &'a EntryStore,
    after: Option<String>,
    buffer: VecDeque<Entry>,
    done: bool,
}

impl Iterator for ListAll<'_> {
    type Item = crate::Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.done {
            match self.store.list_page(self.after.as_deref()) {
                Ok(page) => {
                    if page.len() < LIST_PAGE_SIZE {
                        self.done = true;
                    }
                    if let Some(last) = page.last() {
                        self.after = Some(last.id.as_str().to_string());
                    }
                    self.buffer.extend(page);
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

fn write_tags(conn: &Connection, id: &EntryId, tags: &BTreeSet<String>) -> crate::Result<()> {
    conn.execute(
        "DELETE FROM entry_tags WHERE entry_id = ?",
        params![id.as_str()],
    )?;
    let mut stmt = conn.prepare_cached("INSERT INTO entry_tags (entry_id, tag) VALUES (?1, ?2)")?;
    for tag in tags {
        stmt.execute(params![id.as_str(), tag])?;
    }
    Ok(())
}

fn with_tags(conn: &Connection, mut entry: Entry) -> crate::Result<Entry> {
    let mut stmt = conn.prepare_cached("SELECT tag FROM entry_tags WHERE entry_id = ?")?;
    entry.tags = stmt
        .query_map(params![entry.id.as_str()], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;
    Ok(entry)
}

/// Construct an Entry (without tags) from a row in `ENTRY_SELECT` column order
fn entry_from_row(row: &rusqlite::Row) -> rusqlite::Result<Entry> {
    let size_bytes: i64 = row.get(2)?;
    Ok(Entry {
        id: EntryId::from_raw(row.get(0)?),
        relative_path: row.get(1)?,
        size_bytes: size_bytes as u64,
        modified_at: row.get(3)?,
        tags: BTreeSet::new(),
        missing: row.get(4)?,
        indexed_at: row.get(5)?,
    })
}

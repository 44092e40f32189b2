//! Tagged Memo Store.
//!
//! Persists short tagged memos to one of several SQLite files kept side by
//! side in a single directory.  Exactly one file is *active* at a time; every
//! record operation targets it, and [`MemoryStore::switch_active_file`]
//! replaces it atomically.
//!
//! # Storage layout
//!
//! Each memory file holds a single table `memories`:
//!
//! | column        | type    | description                                   |
//! |---------------|---------|-----------------------------------------------|
//! | id            | INTEGER | `AUTOINCREMENT` primary key, never reused      |
//! | tag           | TEXT    | One of the [`Tag`] vocabulary labels           |
//! | memo          | TEXT    | Free-form memo text                            |
//! | by_who        | TEXT    | Author label (`"user"` / `"LLM"`)              |
//! | last_modified | TEXT    | Local time, `%Y-%m-%d_%H:%M:%S`                |
//!
//! Because the key is `AUTOINCREMENT`, SQLite keeps the high-water mark in
//! `sqlite_sequence`: deleting records (including [`MemoryStore::clear_all`])
//! never lets an id be handed out twice.
//!
//! # Concurrency
//!
//! The open connection sits behind a [`parking_lot::Mutex`].  Every operation
//! holds the lock for its full duration, so record writes are serialized and
//! a file switch can never overlap an operation on the connection it closes.
//!
//! # Example
//!
//! ```rust
//! use chatmem_store::{MemoryStore, UpdateOutcome};
//! use chatmem_types::Tag;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let store = MemoryStore::open(dir.path(), "chat_memory.db").unwrap();
//!
//! let id = store.add("bogus", "Water the plants on Friday", "user").unwrap();
//! let record = store.get(id).unwrap().unwrap();
//! assert_eq!(record.tag, Tag::Others);
//!
//! assert_eq!(store.update(999, "work", "x", "LLM").unwrap(), UpdateOutcome::NotFound);
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chatmem_types::{MemoryRecord, TIMESTAMP_FORMAT, Tag};
use chrono::Local;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::files::{list_memory_files, resolve_file_name};

/// Directory used when no other location is configured.
pub const DEFAULT_DIRECTORY: &str = "memory_dbs";
/// File opened at start-up when no other name is configured.
pub const DEFAULT_FILE_NAME: &str = "chat_memory.db";

/// How long a statement waits on a lock held by another process.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from memory store operations.
///
/// "Record not found" and "file is active" are not errors; they are reported
/// through [`UpdateOutcome`], [`DeleteOutcome`] and [`FileDeleteOutcome`].
#[derive(Error, Debug)]
pub enum StoreError {
    /// The directory or a memory file could not be created or opened.
    #[error("Storage unavailable at {path}: {reason}")]
    StorageUnavailable { path: PathBuf, reason: String },
    /// A file name would resolve outside the memory directory.
    #[error("Invalid memory file name: {0:?}")]
    InvalidPath(String),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// Outcomes
// ─────────────────────────────────────────────────────────────────────────────

/// Result of [`MemoryStore::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    NotFound,
}

/// Result of [`MemoryStore::delete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Result of [`MemoryStore::delete_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileDeleteOutcome {
    Deleted,
    /// The file is the active one and was left untouched.
    RefusedActive,
    NotFound,
}

/// Summary produced by [`MemoryStore::refresh`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub file: String,
    pub records: usize,
    /// `true` when SQLite's quick integrity check passed.
    pub integrity_ok: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Active file handle
// ─────────────────────────────────────────────────────────────────────────────

struct ActiveFile {
    name: String,
    conn: Connection,
}

impl ActiveFile {
    /// Open (or create) `name` inside `dir` and make sure the table exists.
    fn open(dir: &Path, name: String) -> Result<Self, StoreError> {
        let path = dir.join(&name);
        let unavailable = |e: rusqlite::Error| StoreError::StorageUnavailable {
            path: path.clone(),
            reason: e.to_string(),
        };
        let conn = Connection::open(&path).map_err(unavailable)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(unavailable)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memories (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                tag           TEXT,
                memo          TEXT,
                by_who        TEXT,
                last_modified TEXT
            );",
        )
        .map_err(unavailable)?;
        debug!(file = %name, "memory file opened");
        Ok(Self { name, conn })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryStore
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed memo store over a directory of memory files.
pub struct MemoryStore {
    directory: PathBuf,
    active: Mutex<ActiveFile>,
}

impl MemoryStore {
    /// Create `directory` if needed and open `default_file` inside it.
    ///
    /// # Errors
    ///
    /// [`StoreError::StorageUnavailable`] when the directory or file cannot be
    /// created or opened, [`StoreError::InvalidPath`] when `default_file` is
    /// not a plain file name.
    pub fn open(directory: impl AsRef<Path>, default_file: &str) -> Result<Self, StoreError> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory).map_err(|e| StoreError::StorageUnavailable {
            path: directory.clone(),
            reason: e.to_string(),
        })?;
        let name = resolve_file_name(default_file)?;
        let active = ActiveFile::open(&directory, name)?;
        info!(dir = %directory.display(), file = %active.name, "memory store opened");
        Ok(Self {
            directory,
            active: Mutex::new(active),
        })
    }

    /// The fixed directory holding every memory file.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    // ── Records ──────────────────────────────────────────────────────────────

    /// Append a memo to the active file and return its id.
    ///
    /// `tag` is coerced onto the vocabulary.  The insert runs in autocommit
    /// mode, so it is durable once this returns `Ok`.
    pub fn add(&self, tag: &str, memo: &str, author: &str) -> Result<i64, StoreError> {
        let tag = Tag::coerce(tag);
        let active = self.active.lock();
        active.conn.execute(
            "INSERT INTO memories (tag, memo, by_who, last_modified)
             VALUES (?1, ?2, ?3, ?4)",
            params![tag.as_str(), memo, author, now_stamp()],
        )?;
        let id = active.conn.last_insert_rowid();
        debug!(file = %active.name, id, %tag, author, "memo added");
        Ok(id)
    }

    /// Fetch a single memo by id.
    pub fn get(&self, id: i64) -> Result<Option<MemoryRecord>, StoreError> {
        let active = self.active.lock();
        let record = active
            .conn
            .query_row(
                "SELECT id, tag, memo, by_who, last_modified FROM memories WHERE id = ?1",
                params![id],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Every memo in the active file, keyed and ordered by id.
    pub fn list_all(&self) -> Result<BTreeMap<i64, MemoryRecord>, StoreError> {
        let active = self.active.lock();
        let mut stmt = active
            .conn
            .prepare("SELECT id, tag, memo, by_who, last_modified FROM memories ORDER BY id ASC")?;
        let rows = stmt.query_map([], row_to_record)?;
        let mut records = BTreeMap::new();
        for row in rows {
            let record = row?;
            records.insert(record.id, record);
        }
        Ok(records)
    }

    /// Overwrite the memo with `id` and refresh its timestamp.
    pub fn update(
        &self,
        id: i64,
        tag: &str,
        memo: &str,
        author: &str,
    ) -> Result<UpdateOutcome, StoreError> {
        let tag = Tag::coerce(tag);
        let active = self.active.lock();
        let changed = active.conn.execute(
            "UPDATE memories SET tag = ?1, memo = ?2, by_who = ?3, last_modified = ?4
             WHERE id = ?5",
            params![tag.as_str(), memo, author, now_stamp(), id],
        )?;
        if changed == 0 {
            debug!(file = %active.name, id, "update target missing");
            return Ok(UpdateOutcome::NotFound);
        }
        debug!(file = %active.name, id, %tag, "memo updated");
        Ok(UpdateOutcome::Updated)
    }

    /// Remove the memo with `id`.  Remaining ids are left as they are.
    pub fn delete(&self, id: i64) -> Result<DeleteOutcome, StoreError> {
        let active = self.active.lock();
        let changed = active
            .conn
            .execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Ok(DeleteOutcome::NotFound);
        }
        debug!(file = %active.name, id, "memo deleted");
        Ok(DeleteOutcome::Deleted)
    }

    /// Remove every memo from the active file, keeping the file itself.
    ///
    /// The id high-water mark survives, so the next [`add`][Self::add]
    /// continues after the largest id the file ever handed out.
    #[instrument(level = "debug", skip(self))]
    pub fn clear_all(&self) -> Result<usize, StoreError> {
        let active = self.active.lock();
        let removed = active.conn.execute("DELETE FROM memories", [])?;
        info!(file = %active.name, removed, "memory file cleared");
        Ok(removed)
    }

    /// Maintenance pass over the active file: lets SQLite refresh its query
    /// statistics and runs a quick integrity check.
    #[instrument(level = "debug", skip(self))]
    pub fn refresh(&self) -> Result<RefreshReport, StoreError> {
        let active = self.active.lock();
        active.conn.execute_batch("PRAGMA optimize;")?;
        let check: String = active
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get(0))?;
        let records: i64 = active
            .conn
            .query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        let report = RefreshReport {
            file: active.name.clone(),
            records: usize::try_from(records).unwrap_or_default(),
            integrity_ok: check == "ok",
        };
        if report.integrity_ok {
            debug!(file = %report.file, records = report.records, "memory file refreshed");
        } else {
            warn!(file = %report.file, check = %check, "memory file failed integrity check");
        }
        Ok(report)
    }

    // ── Files ────────────────────────────────────────────────────────────────

    /// Make `name` the active file, creating it if it does not exist.
    ///
    /// The new file is opened before the old connection is released, so on
    /// any error the previously active file stays active and usable.
    #[instrument(level = "debug", skip(self))]
    pub fn switch_active_file(&self, name: &str) -> Result<(), StoreError> {
        let name = resolve_file_name(name)?;
        let mut active = self.active.lock();
        if active.name == name {
            return Ok(());
        }
        let next = ActiveFile::open(&self.directory, name)?;
        let previous = std::mem::replace(&mut *active, next);
        info!(from = %previous.name, to = %active.name, "switched memory file");
        if let Err((_, e)) = previous.conn.close() {
            warn!(file = %previous.name, error = %e, "closing previous memory file failed");
        }
        Ok(())
    }

    /// Names of every memory file in the directory, sorted.
    pub fn list_files(&self) -> Result<Vec<String>, StoreError> {
        list_memory_files(&self.directory)
    }

    /// Name (not path) of the active file.
    pub fn current_file_name(&self) -> String {
        self.active.lock().name.clone()
    }

    /// Resolve `name` and return its full path if it is an existing memory
    /// file.
    pub fn file_path(&self, name: &str) -> Result<Option<PathBuf>, StoreError> {
        let name = resolve_file_name(name)?;
        let path = self.directory.join(name);
        Ok(path.is_file().then_some(path))
    }

    /// Delete a memory file that is not the active one.
    #[instrument(level = "debug", skip(self))]
    pub fn delete_file(&self, name: &str) -> Result<FileDeleteOutcome, StoreError> {
        let name = resolve_file_name(name)?;
        // Held so a concurrent switch cannot make `name` active mid-delete.
        let active = self.active.lock();
        if active.name == name {
            return Ok(FileDeleteOutcome::RefusedActive);
        }
        let path = self.directory.join(&name);
        if path.is_dir() {
            return Ok(FileDeleteOutcome::NotFound);
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(file = %name, "memory file deleted");
                Ok(FileDeleteOutcome::Deleted)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(FileDeleteOutcome::NotFound),
            Err(e) => Err(e.into()),
        }
    }
}

fn now_stamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Columns written by older tools may be NULL; they read back as empty text.
fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRecord> {
    let id: i64 = row.get(0)?;
    let tag: Option<String> = row.get(1)?;
    let memo: Option<String> = row.get(2)?;
    let author: Option<String> = row.get(3)?;
    let last_modified: Option<String> = row.get(4)?;
    Ok(MemoryRecord {
        id,
        tag: Tag::coerce(tag.as_deref().unwrap_or_default()),
        memo: memo.unwrap_or_default(),
        author: author.unwrap_or_default(),
        last_modified: last_modified.unwrap_or_default(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn make_store() -> (tempfile::TempDir, MemoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::open(dir.path(), DEFAULT_FILE_NAME).unwrap();
        (dir, store)
    }

    #[test]
    fn open_creates_directory_and_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("memory_dbs");
        let store = MemoryStore::open(&nested, "chat_memory").unwrap();
        assert!(nested.join("chat_memory.db").is_file());
        assert_eq!(store.current_file_name(), "chat_memory.db");
        assert_eq!(store.directory(), nested.as_path());
    }

    #[test]
    fn open_fails_when_directory_cannot_be_created() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"i am a file").unwrap();
        let err = MemoryStore::open(blocker.join("sub"), DEFAULT_FILE_NAME).err().unwrap();
        assert!(matches!(err, StoreError::StorageUnavailable { .. }));
    }

    #[test]
    fn add_then_get_round_trips_fields() {
        let (_dir, store) = make_store();
        let id = store.add("work", "Project deadline is tomorrow", "LLM").unwrap();
        let record = store.get(id).unwrap().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.tag, Tag::Work);
        assert_eq!(record.memo, "Project deadline is tomorrow");
        assert_eq!(record.author, "LLM");
        assert!(
            chrono::NaiveDateTime::parse_from_str(&record.last_modified, TIMESTAMP_FORMAT).is_ok(),
            "unexpected timestamp format: {}",
            record.last_modified
        );
    }

    #[test]
    fn unknown_tag_is_coerced_to_others() {
        let (_dir, store) = make_store();
        let id = store.add("bogus", "x", "user").unwrap();
        assert_eq!(store.get(id).unwrap().unwrap().tag, Tag::Others);
    }

    #[test]
    fn get_missing_id_returns_none() {
        let (_dir, store) = make_store();
        assert!(store.get(42).unwrap().is_none());
    }

    #[test]
    fn ids_are_strictly_increasing() {
        let (_dir, store) = make_store();
        let ids: Vec<i64> = (0..10)
            .map(|i| store.add("life", &format!("memo {i}"), "user").unwrap())
            .collect();
        assert_eq!(ids[0], 1);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn update_changes_fields() {
        let (_dir, store) = make_store();
        let id = store.add("work", "old", "user").unwrap();
        assert_eq!(store.update(id, "reminder", "new", "LLM").unwrap(), UpdateOutcome::Updated);
        let record = store.get(id).unwrap().unwrap();
        assert_eq!(record.tag, Tag::Reminder);
        assert_eq!(record.memo, "new");
        assert_eq!(record.author, "LLM");
    }

    #[test]
    fn update_refreshes_last_modified() {
        let (_dir, store) = make_store();
        let id = store.add("work", "old", "user").unwrap();
        let stale = "2000-01-01_00:00:00";
        store
            .active
            .lock()
            .conn
            .execute(
                "UPDATE memories SET last_modified = ?1 WHERE id = ?2",
                params![stale, id],
            )
            .unwrap();
        assert_eq!(store.get(id).unwrap().unwrap().last_modified, stale);

        store.update(id, "work", "new", "user").unwrap();
        let refreshed = store.get(id).unwrap().unwrap().last_modified;
        assert_ne!(refreshed, stale);
        assert!(chrono::NaiveDateTime::parse_from_str(&refreshed, TIMESTAMP_FORMAT).is_ok());
    }

    #[test]
    fn update_missing_id_is_not_found_and_changes_nothing() {
        let (_dir, store) = make_store();
        store.add("work", "keep me", "user").unwrap();
        let before = store.list_all().unwrap();
        assert_eq!(store.update(99, "work", "x", "user").unwrap(), UpdateOutcome::NotFound);
        assert_eq!(store.list_all().unwrap(), before);
    }

    #[test]
    fn delete_twice_then_id_is_not_reused() {
        let (_dir, store) = make_store();
        store.add("work", "a", "user").unwrap();
        let last = store.add("work", "b", "user").unwrap();
        assert_eq!(store.delete(last).unwrap(), DeleteOutcome::Deleted);
        assert_eq!(store.delete(last).unwrap(), DeleteOutcome::NotFound);
        let next = store.add("work", "c", "user").unwrap();
        assert!(next > last, "id {last} was reassigned");
    }

    #[test]
    fn clear_all_empties_and_keeps_counting() {
        let (_dir, store) = make_store();
        store.add("work", "a", "user").unwrap();
        let high = store.add("work", "b", "user").unwrap();
        assert_eq!(store.clear_all().unwrap(), 2);
        assert!(store.list_all().unwrap().is_empty());

        let id = store.add("life", "after clear", "user").unwrap();
        assert!(id > high);
        assert_eq!(store.get(id).unwrap().unwrap().memo, "after clear");
    }

    #[test]
    fn list_all_is_ordered_by_id() {
        let (_dir, store) = make_store();
        for i in 0..5 {
            store.add("work", &format!("{i}"), "user").unwrap();
        }
        store.delete(3).unwrap();
        let ids: Vec<i64> = store.list_all().unwrap().keys().copied().collect();
        assert_eq!(ids, vec![1, 2, 4, 5]);
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let store = MemoryStore::open(dir.path(), DEFAULT_FILE_NAME).unwrap();
            store.add("person", "Alice likes tea", "user").unwrap()
        };
        let store = MemoryStore::open(dir.path(), DEFAULT_FILE_NAME).unwrap();
        assert_eq!(store.get(id).unwrap().unwrap().memo, "Alice likes tea");
    }

    #[test]
    fn switching_files_isolates_records() {
        let (_dir, store) = make_store();
        store.switch_active_file("A").unwrap();
        store.add("work", "in A", "user").unwrap();
        store.switch_active_file("B").unwrap();
        assert_eq!(store.current_file_name(), "B.db");
        store.add("work", "in B", "user").unwrap();
        store.switch_active_file("A").unwrap();

        let memos: Vec<String> = store.list_all().unwrap().into_values().map(|r| r.memo).collect();
        assert_eq!(memos, vec!["in A".to_string()]);
    }

    #[test]
    fn switch_to_same_file_is_a_no_op() {
        let (_dir, store) = make_store();
        store.add("work", "a", "user").unwrap();
        store.switch_active_file(DEFAULT_FILE_NAME).unwrap();
        assert_eq!(store.list_all().unwrap().len(), 1);
    }

    #[test]
    fn rejected_switch_keeps_previous_file_active() {
        let (_dir, store) = make_store();
        store.add("work", "still here", "user").unwrap();
        let err = store.switch_active_file("../outside").unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath(_)));
        assert_eq!(store.current_file_name(), DEFAULT_FILE_NAME);
        assert_eq!(store.list_all().unwrap().len(), 1);
    }

    #[test]
    fn failed_open_keeps_previous_file_active() {
        let (dir, store) = make_store();
        // A directory with the target name cannot be opened as a database.
        fs::create_dir(dir.path().join("broken.db")).unwrap();
        let err = store.switch_active_file("broken").unwrap_err();
        assert!(matches!(err, StoreError::StorageUnavailable { .. }));
        assert_eq!(store.current_file_name(), DEFAULT_FILE_NAME);
        store.add("work", "still writable", "user").unwrap();
    }

    #[test]
    fn delete_active_file_is_refused() {
        let (dir, store) = make_store();
        store.add("work", "a", "user").unwrap();
        let current = store.current_file_name();
        assert_eq!(store.delete_file(&current).unwrap(), FileDeleteOutcome::RefusedActive);
        assert!(dir.path().join(&current).is_file());
        assert_eq!(store.list_all().unwrap().len(), 1);
    }

    #[test]
    fn delete_other_file() {
        let (dir, store) = make_store();
        store.switch_active_file("other").unwrap();
        store.switch_active_file(DEFAULT_FILE_NAME).unwrap();
        assert_eq!(store.delete_file("other").unwrap(), FileDeleteOutcome::Deleted);
        assert!(!dir.path().join("other.db").exists());
        assert_eq!(store.delete_file("other").unwrap(), FileDeleteOutcome::NotFound);
    }

    #[test]
    fn delete_file_rejects_traversal() {
        let (_dir, store) = make_store();
        assert!(matches!(store.delete_file("../x"), Err(StoreError::InvalidPath(_))));
    }

    #[test]
    fn list_files_ignores_foreign_files() {
        let (dir, store) = make_store();
        fs::write(dir.path().join("a.db"), b"").unwrap();
        fs::write(dir.path().join("b.db"), b"").unwrap();
        fs::write(dir.path().join("readme.md"), b"").unwrap();
        let files: HashSet<String> = store.list_files().unwrap().into_iter().collect();
        let expected: HashSet<String> = ["a.db", "b.db", DEFAULT_FILE_NAME]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(files, expected);
    }

    #[test]
    fn file_path_only_resolves_existing_files() {
        let (dir, store) = make_store();
        assert_eq!(
            store.file_path("chat_memory").unwrap(),
            Some(dir.path().join(DEFAULT_FILE_NAME))
        );
        assert_eq!(store.file_path("missing").unwrap(), None);
    }

    #[test]
    fn refresh_reports_record_count() {
        let (_dir, store) = make_store();
        store.add("work", "a", "user").unwrap();
        store.add("work", "b", "user").unwrap();
        let report = store.refresh().unwrap();
        assert_eq!(report.records, 2);
        assert!(report.integrity_ok);
        assert_eq!(report.file, DEFAULT_FILE_NAME);
    }

    #[test]
    fn concurrent_adds_are_not_lost() {
        let (_dir, store) = make_store();
        let store = Arc::new(store);
        let handles: Vec<_> = (0..50)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.add("work", &format!("memo {i}"), "LLM").unwrap())
            })
            .collect();
        let ids: HashSet<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(ids.len(), 50);
        assert_eq!(store.list_all().unwrap().len(), 50);
    }

    #[test]
    fn concurrent_switches_and_writes_stay_consistent() {
        let (_dir, store) = make_store();
        let store = Arc::new(store);
        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..40 {
                    store.add("work", &format!("w{i}"), "LLM").unwrap();
                }
            })
        };
        let switcher = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..20 {
                    let name = if i % 2 == 0 { "left" } else { "right" };
                    store.switch_active_file(name).unwrap();
                }
            })
        };
        writer.join().unwrap();
        switcher.join().unwrap();

        let mut total = 0;
        for name in ["chat_memory", "left", "right"] {
            store.switch_active_file(name).unwrap();
            total += store.list_all().unwrap().len();
        }
        assert_eq!(total, 40);
    }
}

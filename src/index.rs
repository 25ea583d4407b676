//! Durable, queryable cache of note metadata.
//!
//! One SQLite row per note plus an FTS5 shadow table over `{title, tags,
//! excerpt}`. The shadow is maintained explicitly (delete + insert in the
//! same transaction as the primary row) so search results never diverge
//! from primary data. WAL journal mode lets readers proceed while a sync
//! pass writes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{SyncError, SyncResult};
use crate::note::{NoteMetadata, NoteStatus};

/// Sortable columns for [`IndexStore::list_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Title,
    Created,
    Modified,
    Progress,
}

impl SortField {
    fn column(&self) -> &'static str {
        match self {
            SortField::Title => "title",
            SortField::Created => "created",
            SortField::Modified => "modified",
            SortField::Progress => "progress",
        }
    }
}

/// Slim projection of an index row used to seed the diff phase.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub path: String,
    pub title: String,
    pub content_hash: String,
    pub modified: DateTime<Utc>,
}

pub struct IndexStore {
    conn: Mutex<Connection>,
}

impl IndexStore {
    /// Open (or create) the index database at `path`.
    pub fn open(path: &Path) -> SyncResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| SyncError::Index(format!("failed to open {:?}: {}", path, e)))?;
        Self::initialize(conn)
    }

    /// In-memory index, used by tests and throwaway passes.
    pub fn open_in_memory() -> SyncResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> SyncResult<Self> {
        // WAL must be set before anything else so concurrent readers are
        // never blocked behind a writing sync pass.
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )?;
        run_migrations(&conn)?;
        Ok(IndexStore {
            conn: Mutex::new(conn),
        })
    }

    /// Insert-or-replace by id, refreshing the full-text shadow row in the
    /// same transaction. A stale row claiming the same path under a
    /// different id is removed first to preserve the path uniqueness
    /// constraint.
    pub fn upsert(&self, meta: &NoteMetadata) -> SyncResult<()> {
        let mut conn = self.lock_conn();
        let tx = conn.transaction()?;

        let stale: Option<i64> = tx
            .query_row(
                "SELECT rowid FROM notes WHERE path = ?1 AND id <> ?2",
                params![meta.path, meta.id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(rowid) = stale {
            log::debug!("[index] evicting stale row for path {}", meta.path);
            tx.execute("DELETE FROM notes WHERE rowid = ?1", params![rowid])?;
            tx.execute("DELETE FROM notes_fts WHERE rowid = ?1", params![rowid])?;
        }

        tx.execute(
            "INSERT INTO notes (id, path, title, tags, created, modified, progress, status,
                                word_count, char_count, content_hash, excerpt, folder_path, filename)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(id) DO UPDATE SET
                path = excluded.path, title = excluded.title, tags = excluded.tags,
                created = excluded.created, modified = excluded.modified,
                progress = excluded.progress, status = excluded.status,
                word_count = excluded.word_count, char_count = excluded.char_count,
                content_hash = excluded.content_hash, excerpt = excluded.excerpt,
                folder_path = excluded.folder_path, filename = excluded.filename",
            params![
                meta.id,
                meta.path,
                meta.title,
                serde_json::to_string(&meta.tags)?,
                meta.created.to_rfc3339(),
                meta.modified.to_rfc3339(),
                meta.progress,
                meta.status.as_str(),
                meta.word_count as i64,
                meta.char_count as i64,
                meta.content_hash,
                meta.excerpt,
                meta.folder_path(),
                meta.filename(),
            ],
        )?;

        let rowid: i64 = tx.query_row(
            "SELECT rowid FROM notes WHERE id = ?1",
            params![meta.id],
            |row| row.get(0),
        )?;
        tx.execute("DELETE FROM notes_fts WHERE rowid = ?1", params![rowid])?;
        tx.execute(
            "INSERT INTO notes_fts (rowid, id, title, tags, excerpt) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![rowid, meta.id, meta.title, meta.tags.join(" "), meta.excerpt],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Remove a note and its shadow row. Returns whether a row existed.
    pub fn delete(&self, id: &str) -> SyncResult<bool> {
        let mut conn = self.lock_conn();
        let tx = conn.transaction()?;

        let rowid: Option<i64> = tx
            .query_row("SELECT rowid FROM notes WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        let Some(rowid) = rowid else {
            return Ok(false);
        };

        tx.execute("DELETE FROM notes WHERE rowid = ?1", params![rowid])?;
        tx.execute("DELETE FROM notes_fts WHERE rowid = ?1", params![rowid])?;
        tx.commit()?;
        Ok(true)
    }

    pub fn get(&self, id: &str) -> SyncResult<Option<NoteMetadata>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT_METADATA))?;
        Ok(stmt.query_row(params![id], row_to_metadata).optional()?)
    }

    pub fn get_by_path(&self, path: &str) -> SyncResult<Option<NoteMetadata>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(&format!("{} WHERE path = ?1", SELECT_METADATA))?;
        Ok(stmt.query_row(params![path], row_to_metadata).optional()?)
    }

    /// Full-text search over title, tags and excerpt, best match first.
    /// Query syntax follows FTS5 conventions.
    pub fn search(&self, query: &str) -> SyncResult<Vec<NoteMetadata>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT notes.id, notes.path, notes.title, notes.tags, notes.created, notes.modified,
                    notes.progress, notes.status, notes.word_count, notes.char_count,
                    notes.content_hash, notes.excerpt
             FROM notes_fts
             JOIN notes ON notes_fts.rowid = notes.rowid
             WHERE notes_fts MATCH ?1
             ORDER BY bm25(notes_fts)",
        )?;
        let rows = stmt.query_map(params![query], row_to_metadata)?;
        collect_rows(rows)
    }

    pub fn list_all(&self, sort: SortField, ascending: bool) -> SyncResult<Vec<NoteMetadata>> {
        let conn = self.lock_conn();
        let direction = if ascending { "ASC" } else { "DESC" };
        let mut stmt = conn.prepare(&format!(
            "{} ORDER BY {} {}",
            SELECT_METADATA,
            sort.column(),
            direction
        ))?;
        let rows = stmt.query_map([], row_to_metadata)?;
        collect_rows(rows)
    }

    pub fn count(&self) -> SyncResult<usize> {
        let conn = self.lock_conn();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM notes", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Every indexed id with the fields the diff phase needs.
    pub fn snapshot(&self) -> SyncResult<HashMap<String, IndexEntry>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare("SELECT id, path, title, content_hash, modified FROM notes")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                IndexEntry {
                    path: row.get(1)?,
                    title: row.get(2)?,
                    content_hash: row.get(3)?,
                    modified: parse_timestamp(&row.get::<_, String>(4)?),
                },
            ))
        })?;

        let mut map = HashMap::new();
        for row in rows {
            let (id, entry) = row?;
            map.insert(id, entry);
        }
        Ok(map)
    }

    fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned mutex means another pass panicked mid-write. The
        // connection itself is still usable.
        self.conn.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

const SELECT_METADATA: &str =
    "SELECT id, path, title, tags, created, modified, progress, status,
            word_count, char_count, content_hash, excerpt
     FROM notes";

fn run_migrations(conn: &Connection) -> SyncResult<()> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version < 1 {
        conn.execute_batch(
            "CREATE TABLE notes (
                id TEXT PRIMARY KEY,
                path TEXT UNIQUE NOT NULL,
                title TEXT NOT NULL,
                tags TEXT NOT NULL,
                created TEXT NOT NULL,
                modified TEXT NOT NULL,
                progress REAL NOT NULL,
                status TEXT NOT NULL,
                word_count INTEGER NOT NULL,
                char_count INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                excerpt TEXT NOT NULL,
                folder_path TEXT NOT NULL,
                filename TEXT NOT NULL
            );

            CREATE INDEX idx_notes_modified ON notes(modified DESC);
            CREATE INDEX idx_notes_folder ON notes(folder_path);
            CREATE INDEX idx_notes_status ON notes(status);
            CREATE INDEX idx_notes_tags ON notes(tags);

            CREATE VIRTUAL TABLE notes_fts USING fts5(
                id UNINDEXED,
                title,
                tags,
                excerpt
            );",
        )?;
        conn.pragma_update(None, "user_version", 1)?;
    }

    Ok(())
}

fn row_to_metadata(row: &Row<'_>) -> rusqlite::Result<NoteMetadata> {
    let tags_json: String = row.get(3)?;
    let tags = serde_json::from_str(&tags_json).unwrap_or_else(|e| {
        log::warn!("[index] malformed tags column, dropping: {}", e);
        Vec::new()
    });
    let status: String = row.get(7)?;

    Ok(NoteMetadata {
        id: row.get(0)?,
        path: row.get(1)?,
        title: row.get(2)?,
        tags,
        created: parse_timestamp(&row.get::<_, String>(4)?),
        modified: parse_timestamp(&row.get::<_, String>(5)?),
        progress: row.get(6)?,
        status: NoteStatus::parse(&status),
        word_count: row.get::<_, i64>(8)? as usize,
        char_count: row.get::<_, i64>(9)? as usize,
        content_hash: row.get(10)?,
        excerpt: row.get(11)?,
    })
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!("[index] malformed timestamp {:?}: {}", value, e);
            DateTime::<Utc>::UNIX_EPOCH
        })
}

fn collect_rows(
    rows: impl Iterator<Item = rusqlite::Result<NoteMetadata>>,
) -> SyncResult<Vec<NoteMetadata>> {
    let mut out = Vec::new();
    for row in rows {
        match row {
            Ok(meta) => out.push(meta),
            Err(e) => log::warn!("[index] skipping malformed row: {}", e),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(id: &str, path: &str, body: &str) -> NoteMetadata {
        let mut m = NoteMetadata::new(path, body, Utc::now());
        m.id = id.to_string();
        m
    }

    #[test]
    fn test_upsert_and_get() {
        let index = IndexStore::open_in_memory().unwrap();
        let mut m = meta("n1", "a/b.md", "hello world");
        m.tags = vec!["alpha".into()];
        index.upsert(&m).unwrap();

        let got = index.get("n1").unwrap().unwrap();
        assert_eq!(got.path, "a/b.md");
        assert_eq!(got.title, "b");
        assert_eq!(got.tags, vec!["alpha".to_string()]);
        assert_eq!(got.content_hash, m.content_hash);

        assert!(index.get("missing").unwrap().is_none());
        assert_eq!(index.get_by_path("a/b.md").unwrap().unwrap().id, "n1");
        assert_eq!(index.count().unwrap(), 1);
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let index = IndexStore::open_in_memory().unwrap();
        index.upsert(&meta("n1", "old.md", "one")).unwrap();

        let moved = meta("n1", "new.md", "two");
        index.upsert(&moved).unwrap();

        assert_eq!(index.count().unwrap(), 1);
        assert_eq!(index.get("n1").unwrap().unwrap().path, "new.md");
        assert!(index.get_by_path("old.md").unwrap().is_none());
    }

    #[test]
    fn test_upsert_evicts_stale_path_claim() {
        let index = IndexStore::open_in_memory().unwrap();
        index.upsert(&meta("old-id", "same.md", "one")).unwrap();
        index.upsert(&meta("new-id", "same.md", "two")).unwrap();

        assert_eq!(index.count().unwrap(), 1);
        assert_eq!(index.get_by_path("same.md").unwrap().unwrap().id, "new-id");
        assert!(index.get("old-id").unwrap().is_none());
    }

    #[test]
    fn test_search_follows_mutations() {
        let index = IndexStore::open_in_memory().unwrap();
        let mut m = meta("n1", "Grocery List.md", "milk and eggs");
        m.tags = vec!["errands".into()];
        index.upsert(&m).unwrap();

        assert_eq!(index.search("grocery").unwrap().len(), 1);
        assert_eq!(index.search("errands").unwrap().len(), 1);
        assert_eq!(index.search("milk").unwrap().len(), 1); // via excerpt

        // Shadow must follow the primary row on update.
        let renamed = meta("n1", "Pantry.md", "flour");
        index.upsert(&renamed).unwrap();
        assert!(index.search("grocery").unwrap().is_empty());
        assert_eq!(index.search("pantry").unwrap().len(), 1);

        // And on delete.
        assert!(index.delete("n1").unwrap());
        assert!(index.search("pantry").unwrap().is_empty());
        assert!(!index.delete("n1").unwrap());
    }

    #[test]
    fn test_list_all_sorting() {
        let index = IndexStore::open_in_memory().unwrap();
        index.upsert(&meta("a", "Banana.md", "")).unwrap();
        index.upsert(&meta("b", "Apple.md", "")).unwrap();

        let titles: Vec<String> = index
            .list_all(SortField::Title, true)
            .unwrap()
            .into_iter()
            .map(|m| m.title)
            .collect();
        assert_eq!(titles, vec!["Apple", "Banana"]);
    }

    #[test]
    fn test_snapshot_carries_diff_fields() {
        let index = IndexStore::open_in_memory().unwrap();
        let m = meta("n1", "a.md", "body");
        index.upsert(&m).unwrap();

        let snap = index.snapshot().unwrap();
        let entry = snap.get("n1").unwrap();
        assert_eq!(entry.path, "a.md");
        assert_eq!(entry.title, "a");
        assert_eq!(entry.content_hash, m.content_hash);
    }
}

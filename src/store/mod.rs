//! Relational bookmark stores.
//!
//! One schema at three tiers: per-module in-memory buffers, a process-wide
//! in-memory cache, and the persisted disk database. All tiers merge through
//! the same upsert protocol; whole-store propagation uses the SQLite online
//! backup API.

pub mod context;

pub use context::AppContext;

use crate::bookmark::Bookmark;
use crate::error::{is_unique_violation, StoreError};
use crate::tags::{Tags, TAG_SEP};
use rusqlite::backup::Backup;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// File name of the persisted disk store.
pub const DB_FILENAME: &str = "markdex.db";

// flags is a reserved bitmask, defaults to 0.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS bookmarks (
    id integer PRIMARY KEY,
    url text NOT NULL UNIQUE,
    metadata text default '',
    tags text default '',
    desc text default '',
    modified integer default (strftime('%s')),
    flags integer default 0,
    module text default ''
)";

const INSERT_ROW: &str = "
INSERT INTO bookmarks (url, metadata, tags, desc, flags, module)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

// Title only overwritten when the incoming value is non-empty.
const UPDATE_ROW: &str = "
UPDATE bookmarks
SET metadata = CASE WHEN ?1 != '' THEN ?1 ELSE metadata END,
    tags = ?2,
    modified = strftime('%s')
WHERE url = ?3";

const SELECT_TAGS: &str = "SELECT tags FROM bookmarks WHERE url = ?1 LIMIT 1";

/// One full row of the bookmarks relation.
#[derive(Debug, Clone)]
pub struct BookmarkRow {
    pub id: i64,
    pub url: String,
    pub metadata: String,
    pub tags: String,
    pub desc: String,
    pub modified: i64,
    pub flags: i64,
    pub module: String,
}

/// A single bookmark store backed by a sqlite database, in memory or on
/// disk.
pub struct Store {
    name: String,
    conn: Connection,
}

impl Store {
    /// Ephemeral in-memory store. Buffers and the shared cache live here.
    pub fn in_memory(name: &str) -> Result<Self, StoreError> {
        debug!(store = name, "creating in-memory store");
        let conn = Connection::open_in_memory()?;
        let store = Store {
            name: name.to_string(),
            conn,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open or create a file-backed store.
    pub fn open(name: &str, path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        let store = Store {
            name: name.to_string(),
            conn,
        };
        store.init_schema()?;
        debug!(store = name, path = %path.display(), "opened store");
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute(SCHEMA, [])?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT count(*) FROM bookmarks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.count()? == 0)
    }

    /// Tags column for a url, if the row exists.
    pub fn tags_for(&self, url: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn
            .query_row(SELECT_TAGS, [url], |row| row.get(0))
            .optional()?)
    }

    /// All rows, in id order.
    pub fn rows(&self) -> Result<Vec<BookmarkRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, url, metadata, tags, desc, modified, flags, module
             FROM bookmarks ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(BookmarkRow {
                    id: row.get(0)?,
                    url: row.get(1)?,
                    metadata: row.get(2)?,
                    tags: row.get(3)?,
                    desc: row.get(4)?,
                    modified: row.get(5)?,
                    flags: row.get(6)?,
                    module: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Insert `bk`, or merge it into the existing row when the unique URL
    /// constraint fires. The constraint violation is expected control flow:
    /// existing tags are unioned with the incoming ones and the title is
    /// only replaced by a non-empty incoming title.
    pub fn upsert(&mut self, bk: &Bookmark) -> Result<(), StoreError> {
        let tags = Tags::from_list(bk.tags.iter().cloned(), TAG_SEP).pre_sanitize();

        let tx = self.conn.transaction()?;
        let inserted = tx.execute(
            INSERT_ROW,
            params![
                bk.url,
                bk.title,
                tags.serialize(true),
                bk.desc,
                0i64,
                bk.module
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                debug!(url = %bk.url, "bookmark exists, merging tags");
                let existing: String = tx
                    .query_row(SELECT_TAGS, [&bk.url], |row| row.get(0))
                    .optional()?
                    .unwrap_or_default();
                let merged = Tags::from_delimited(&existing, TAG_SEP).merge(&tags);
                tx.execute(
                    UPDATE_ROW,
                    params![bk.title, merged.serialize(true), bk.url],
                )?;
            }
            Err(e) => return Err(e.into()),
        }

        tx.commit()?;
        Ok(())
    }

    /// Upsert every row of `self` into `dst`.
    ///
    /// Two phases: a first transaction of blind inserts collecting rows that
    /// hit the unique constraint, then a second transaction that re-reads
    /// the destination tags per conflicting row, merges and updates.
    /// Re-querying tags inside the insert transaction would serialize every
    /// write behind a read.
    pub fn sync_to(&self, dst: &mut Store) -> Result<(), StoreError> {
        debug!(src = %self.name, dst = %dst.name, "syncing store");

        let rows = self.rows()?;
        let mut conflicting: Vec<BookmarkRow> = Vec::new();

        let tx = dst.conn.transaction()?;
        for row in &rows {
            let inserted = tx.execute(
                INSERT_ROW,
                params![row.url, row.metadata, row.tags, row.desc, row.flags, row.module],
            );
            match inserted {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => conflicting.push(row.clone()),
                Err(e) => {
                    // One bad row must not stop the batch.
                    warn!(url = %row.url, error = %e, "insert failed, skipping row");
                }
            }
        }
        tx.commit()?;

        if conflicting.is_empty() {
            return Ok(());
        }

        let tx = dst.conn.transaction()?;
        for row in &conflicting {
            let existing: String = tx
                .query_row(SELECT_TAGS, [&row.url], |r| r.get(0))
                .optional()?
                .unwrap_or_default();
            let merged = Tags::from_delimited(&existing, TAG_SEP)
                .merge(&Tags::from_delimited(&row.tags, TAG_SEP));
            let updated = tx.execute(
                UPDATE_ROW,
                params![row.metadata, merged.serialize(true), row.url],
            );
            if let Err(e) = updated {
                warn!(url = %row.url, error = %e, "update failed, skipping row");
            }
        }
        tx.commit()?;

        Ok(())
    }

    /// Whole-store snapshot into another open store via the sqlite online
    /// backup API. Readers of `dst` never observe a partial copy.
    pub fn backup_to(&self, dst: &mut Store) -> Result<(), StoreError> {
        debug!(src = %self.name, dst = %dst.name, "store snapshot");
        let backup = Backup::new(&self.conn, &mut dst.conn)?;
        backup.run_to_completion(64, Duration::from_millis(5), None)?;
        Ok(())
    }

    /// Snapshot this store to a database file, replacing its content.
    pub fn backup_to_path(&self, path: &Path) -> Result<(), StoreError> {
        debug!(src = %self.name, path = %path.display(), "syncing store to disk");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let mut dst = Connection::open(path)?;
        let backup = Backup::new(&self.conn, &mut dst)?;
        backup.run_to_completion(64, Duration::from_millis(5), None)?;
        Ok(())
    }

    /// Replace this store's content with the database file at `path`.
    pub fn restore_from_path(&mut self, path: &Path) -> Result<(), StoreError> {
        debug!(dst = %self.name, path = %path.display(), "preloading store from disk");
        let src = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let backup = Backup::new(&src, &mut self.conn)?;
        backup.run_to_completion(64, Duration::from_millis(5), None)?;
        Ok(())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("name", &self.name).finish()
    }
}

//! Firefox-family parser: incremental reads from `places.sqlite`.
//!
//! Firefox keeps bookmarks relational, so instead of rebuilding the tree
//! the module patches it in place: a full join-based load at startup, then
//! incremental passes that only visit `moz_bookmarks` rows modified since
//! the previous pass. A busy/locked places database means the browser is
//! writing; the instance shuts down instead of thrashing on retries.

use super::{BrowserConfig, BrowserModule, Loader, ParserStats, Watchable};
use crate::error::{is_busy, ParseError, StoreError};
use crate::hooks::HookRegistry;
use crate::store::{AppContext, Store};
use crate::tree::{Node, NodeId, NodeTree, UrlIndex};
use crate::watch::WatchTarget;
use rusqlite::{params, Connection, OpenFlags};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Row-type discriminants and reserved row ids of the `moz_bookmarks`
/// schema. Version-specific: verify against the target schema rather than
/// assuming invariants.
#[derive(Debug, Clone)]
pub struct FirefoxSchema {
    /// `moz_bookmarks.type` for a bookmarked url row.
    pub type_url: i64,
    /// `moz_bookmarks.type` for a tag folder row.
    pub type_tag_folder: i64,
    /// Row id of the bookmarks root.
    pub root_id: i64,
    /// Row id of the tags root; tag folders hang under it.
    pub tags_root_id: i64,
    /// Highest reserved root id (mobile); tag links always have a parent
    /// above this.
    pub max_reserved_id: i64,
}

impl Default for FirefoxSchema {
    fn default() -> Self {
        FirefoxSchema {
            type_url: 1,
            type_tag_folder: 2,
            root_id: 1,
            tags_root_id: 4,
            max_reserved_id: 6,
        }
    }
}

// All url/tag associations under the tags root. The place title is
// aliased inside the CTE; the outer join brings in moz_bookmarks.title
// (the tag name) and a bare `title` would be ambiguous.
const Q_ALL_BOOKMARKS: &str = "
WITH bookmarked AS (
    SELECT moz_places.url AS url,
           moz_places.description AS desc,
           moz_places.title AS url_title,
           moz_bookmarks.parent AS tag_id
      FROM moz_places LEFT OUTER JOIN moz_bookmarks
        ON moz_places.id = moz_bookmarks.fk
     WHERE moz_bookmarks.parent IN
           (SELECT id FROM moz_bookmarks WHERE parent = ?1)
)
SELECT url, IFNULL(url_title, ''), IFNULL(desc, ''), tag_id,
       IFNULL(moz_bookmarks.title, '') AS tag_title
  FROM bookmarked LEFT OUTER JOIN moz_bookmarks
    ON tag_id = moz_bookmarks.id
 ORDER BY url";

// Rows modified since the previous pass. The upper bound guards against
// timestamps from the future; housekeeping roots are excluded.
const Q_CHANGED_BOOKMARKS: &str = "
SELECT id, type, IFNULL(fk, -1), parent, IFNULL(title, '')
  FROM moz_bookmarks
 WHERE lastModified > ?1
   AND lastModified < strftime('%s', 'now') * 1000 * 1000
   AND id NOT IN (?2, ?3)";

const Q_PLACE_BY_ID: &str = "
SELECT id, url, IFNULL(title, ''), IFNULL(description, '')
  FROM moz_places
 WHERE id = ?1";

/// One `moz_bookmarks` row from the incremental query.
#[derive(Debug, Clone)]
struct BookmarkChange {
    id: i64,
    btype: i64,
    fk: i64,
    parent: i64,
    title: String,
}

/// One `moz_places` row.
#[derive(Debug, Clone)]
struct Place {
    id: i64,
    url: String,
    title: String,
    desc: String,
}

pub struct Firefox {
    config: BrowserConfig,
    schema: FirefoxSchema,
    places: Connection,
    tree: NodeTree,
    index: UrlIndex,
    /// Insertion order of URLs in the index, used for the full buffer sync.
    url_order: Vec<String>,
    /// Tag row id -> tag node. First-seen wins.
    tag_map: HashMap<i64, NodeId>,
    /// Timestamp (microseconds, places convention) of the last successful
    /// pass's query start.
    last_run_us: i64,
    hooks: HookRegistry,
    stats: ParserStats,
    buffer: Store,
}

impl Firefox {
    pub fn new(config: BrowserConfig, schema: FirefoxSchema) -> Result<Self, ParseError> {
        let places = Connection::open_with_flags(
            &config.bookmarks_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY,
        )
        .map_err(map_sql_err)?;
        let buffer = Store::in_memory(&format!("buffer_{}", config.name))?;

        Ok(Firefox {
            config,
            schema,
            places,
            tree: NodeTree::new(),
            index: UrlIndex::new(),
            url_order: Vec::new(),
            tag_map: HashMap::new(),
            last_run_us: 0,
            hooks: HookRegistry::with_defaults(),
            stats: ParserStats::default(),
            buffer,
        })
    }

    pub fn stats(&self) -> &ParserStats {
        &self.stats
    }

    pub fn buffer(&self) -> &Store {
        &self.buffer
    }

    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    pub fn index(&self) -> &UrlIndex {
        &self.index
    }

    pub fn last_run_us(&self) -> i64 {
        self.last_run_us
    }

    fn now_us() -> i64 {
        chrono::Utc::now().timestamp_micros()
    }

    /// Find or create the tag node for a tag row id.
    fn tag_node(&mut self, tag_id: i64, title: &str) -> NodeId {
        if let Some(&id) = self.tag_map.get(&tag_id) {
            return id;
        }
        let root = self.tree.root();
        let id = self.tree.insert_child(root, Node::tag(title));
        debug!(module = self.config.name, tag = title, "new tag node");
        self.tag_map.insert(tag_id, id);
        self.stats.node_count += 1;
        id
    }

    /// Find or create the url node for a place, running hooks on first
    /// sight.
    fn url_node(&mut self, url: &str, title: &str, desc: &str) -> NodeId {
        if let Some(&id) = self.index.get(url) {
            return id;
        }
        let mut node = Node::url(url, title, desc);
        self.hooks.run_named(&self.config.use_hooks, &mut node);
        let root = self.tree.root();
        let id = self.tree.insert_child(root, node);
        self.index.insert(url.to_string(), id);
        self.url_order.push(url.to_string());
        id
    }

    /// Attach a tag to a url node and link the url under the tag node.
    fn apply_tag(&mut self, tag: NodeId, url_node: NodeId) {
        let tag_name = self.tree.node(tag).name.clone();
        self.tree.node_mut(url_node).add_tag(&tag_name);
        self.tree.link_child(tag, url_node);
    }

    /// Full pass: every url/tag association under the tags root.
    fn full_load(&mut self) -> Result<(), ParseError> {
        let rows: Vec<(String, String, String, i64, String)> = {
            let mut stmt = self.places.prepare(Q_ALL_BOOKMARKS).map_err(map_sql_err)?;
            let mapped = stmt
                .query_map([self.schema.tags_root_id], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                })
                .map_err(map_sql_err)?;
            mapped
                .collect::<Result<Vec<_>, _>>()
                .map_err(map_sql_err)?
        };

        for (url, title, desc, tag_id, tag_title) in rows {
            let tag = self.tag_node(tag_id, &tag_title);
            let node = self.url_node(&url, &title, &desc);
            self.apply_tag(tag, node);
            self.stats.url_count += 1;
        }

        Ok(())
    }

    /// Incremental pass over `moz_bookmarks` rows modified since the last
    /// run. Returns the URLs whose nodes changed.
    fn fetch_changes(&mut self) -> Result<Vec<String>, ParseError> {
        let changes: Vec<BookmarkChange> = {
            let mut stmt = self
                .places
                .prepare(Q_CHANGED_BOOKMARKS)
                .map_err(map_sql_err)?;
            let mapped = stmt
                .query_map(
                    params![
                        self.last_run_us,
                        self.schema.root_id,
                        self.schema.tags_root_id
                    ],
                    |row| {
                        Ok(BookmarkChange {
                            id: row.get(0)?,
                            btype: row.get(1)?,
                            fk: row.get(2)?,
                            parent: row.get(3)?,
                            title: row.get(4)?,
                        })
                    },
                )
                .map_err(map_sql_err)?;
            mapped
                .collect::<Result<Vec<_>, _>>()
                .map_err(map_sql_err)?
        };

        if changes.is_empty() {
            return Ok(Vec::new());
        }

        // Classify: changed places (urls) and tag/link bookmark rows.
        let mut places: HashMap<i64, Place> = HashMap::new();
        let mut bookmarks: HashMap<i64, BookmarkChange> = HashMap::new();

        for change in &changes {
            if change.btype == self.schema.type_url {
                let place = self
                    .places
                    .query_row(Q_PLACE_BY_ID, [change.fk], |row| {
                        Ok(Place {
                            id: row.get(0)?,
                            url: row.get(1)?,
                            title: row.get(2)?,
                            desc: row.get(3)?,
                        })
                    })
                    .map_err(map_sql_err)?;
                debug!(module = self.config.name, url = %place.url, "changed url");
                places.insert(place.id, place);

                // Tag link rows live above the reserved roots.
                if change.parent > self.schema.max_reserved_id {
                    bookmarks.insert(change.id, change.clone());
                }
            } else if change.btype == self.schema.type_tag_folder {
                bookmarks.insert(change.id, change.clone());
            }
        }

        let mut changed_urls = Vec::new();

        for (place_id, place) in &places {
            let url_node = self.url_node(&place.url, &place.title, &place.desc);
            if !changed_urls.contains(&place.url) {
                changed_urls.push(place.url.clone());
            }

            // Any new tag folders first.
            let new_tags: Vec<(i64, String)> = bookmarks
                .values()
                .filter(|bk| {
                    bk.btype == self.schema.type_tag_folder && !self.tag_map.contains_key(&bk.id)
                })
                .map(|bk| (bk.id, bk.title.clone()))
                .collect();
            for (tag_id, title) in new_tags {
                self.tag_node(tag_id, &title);
            }

            // Then link tags to this url.
            let links: Vec<i64> = bookmarks
                .values()
                .filter(|bk| bk.fk == *place_id && bk.parent > self.schema.max_reserved_id)
                .map(|bk| bk.parent)
                .collect();
            for parent in links {
                if let Some(&tag) = self.tag_map.get(&parent) {
                    self.apply_tag(tag, url_node);
                    self.stats.url_count += 1;
                }
            }
        }

        Ok(changed_urls)
    }

    /// Upsert the nodes behind `urls` into the buffer.
    fn sync_urls_to_buffer(&mut self, urls: &[String]) {
        for url in urls {
            let Some(&id) = self.index.get(url) else {
                warn!(module = self.config.name, url, "url missing from index");
                continue;
            };
            let bk = self.tree.node(id).to_bookmark(self.config.name);
            if let Err(e) = self.buffer.upsert(&bk) {
                warn!(url = %bk.url, error = %e, "buffer upsert failed");
            }
        }
    }
}

impl BrowserModule for Firefox {
    fn name(&self) -> &'static str {
        self.config.name
    }

    fn config(&self) -> &BrowserConfig {
        &self.config
    }

    fn as_loader(&mut self) -> Option<&mut dyn Loader> {
        Some(self)
    }

    fn as_watchable(&mut self) -> Option<&mut dyn Watchable> {
        Some(self)
    }
}

impl Loader for Firefox {
    fn load(&mut self, ctx: &AppContext) -> Result<(), ParseError> {
        info!(module = self.config.name, path = %self.config.bookmarks_path.display(), "initial load");
        let start = Instant::now();
        self.full_load()?;
        self.stats.last_parse = start.elapsed();
        self.last_run_us = Self::now_us();

        debug!(
            module = self.config.name,
            nodes = self.stats.node_count,
            urls = self.stats.url_count,
            elapsed = ?self.stats.last_parse,
            "parsed places bookmarks"
        );
        self.stats.reset();

        let urls = self.url_order.clone();
        self.sync_urls_to_buffer(&urls);
        ctx.merge_buffer(&self.buffer)?;
        Ok(())
    }
}

impl Watchable for Firefox {
    fn watch_target(&self) -> WatchTarget {
        let dir = self
            .config
            .bookmarks_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        // Firefox appends to the WAL, the main file stays quiet.
        let wal = self.config.bookmarks_path.with_extension("sqlite-wal");
        WatchTarget {
            dir,
            paths: vec![wal],
            debounce: self.config.debounce,
        }
    }

    fn run(&mut self, ctx: &AppContext) -> Result<(), ParseError> {
        let start = Instant::now();
        // Advance to the query start time, not completion, so a slow pass
        // cannot open a gap.
        let query_start_us = Self::now_us();

        let changed = self.fetch_changes()?;
        self.last_run_us = query_start_us;

        if !changed.is_empty() {
            debug!(
                module = self.config.name,
                changed = changed.len(),
                "incremental changes"
            );
            self.sync_urls_to_buffer(&changed);
            ctx.merge_buffer(&self.buffer)?;
        }

        self.stats.last_parse = start.elapsed();
        Ok(())
    }
}

fn map_sql_err(e: rusqlite::Error) -> ParseError {
    if is_busy(&e) {
        ParseError::SourceLocked
    } else {
        ParseError::Store(StoreError::Sqlite(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    /// Minimal places.sqlite with the tables the parser touches.
    fn seed_places(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE moz_places (
                 id INTEGER PRIMARY KEY,
                 url TEXT,
                 title TEXT,
                 description TEXT
             );
             CREATE TABLE moz_bookmarks (
                 id INTEGER PRIMARY KEY,
                 type INTEGER,
                 fk INTEGER,
                 parent INTEGER,
                 title TEXT,
                 lastModified INTEGER DEFAULT 0
             );
             -- reserved roots
             INSERT INTO moz_bookmarks (id, type, parent, title) VALUES
                 (1, 2, 0, 'root'),
                 (2, 2, 1, 'menu'),
                 (3, 2, 1, 'toolbar'),
                 (4, 2, 1, 'tags'),
                 (5, 2, 1, 'unfiled'),
                 (6, 2, 1, 'mobile');
             -- tag folder 'dev' and one tagged url
             INSERT INTO moz_places (id, url, title, description)
                 VALUES (100, 'https://go.dev', 'Go', 'the go website');
             INSERT INTO moz_bookmarks (id, type, fk, parent, title) VALUES
                 (10, 2, NULL, 4, 'dev'),
                 (20, 1, 100, 10, NULL);",
        )
        .unwrap();
    }

    fn firefox_at(dir: &Path) -> Firefox {
        let places = dir.join("places.sqlite");
        if !places.exists() {
            seed_places(&places);
        }
        Firefox::new(
            BrowserConfig {
                name: "firefox",
                bookmarks_path: places,
                use_hooks: vec!["title-tags".to_string()],
                debounce: Duration::from_millis(500),
            },
            FirefoxSchema::default(),
        )
        .unwrap()
    }

    #[test]
    fn full_load_links_tags_to_urls() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::open(dir.path()).unwrap();
        let mut ff = firefox_at(dir.path());

        ff.load(&ctx).unwrap();

        assert_eq!(ff.index().len(), 1);
        let id = ff.index()["https://go.dev"];
        assert_eq!(ff.tree().node(id).tags, ["dev"]);

        let tags = ff.buffer().tags_for("https://go.dev").unwrap().unwrap();
        assert!(tags.contains("dev"));
        assert_eq!(ctx.cache().lock().count().unwrap(), 1);

        // The place title, not the tag folder title, must come through.
        let rows = ff.buffer().rows().unwrap();
        assert_eq!(rows[0].metadata, "Go");
    }

    #[test]
    fn run_without_changes_writes_nothing_but_advances_clock() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::open(dir.path()).unwrap();
        let mut ff = firefox_at(dir.path());
        ff.load(&ctx).unwrap();

        let before = ff.last_run_us();
        let cache_count = ctx.cache().lock().count().unwrap();
        std::thread::sleep(Duration::from_millis(2));

        ff.run(&ctx).unwrap();

        assert!(ff.last_run_us() > before);
        assert_eq!(ctx.cache().lock().count().unwrap(), cache_count);
    }

    #[test]
    fn run_picks_up_new_tag_link() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::open(dir.path()).unwrap();
        let mut ff = firefox_at(dir.path());
        ff.load(&ctx).unwrap();

        // Tag 'rust' applied to the existing url after the load.
        let ts = Firefox::now_us() - 2_000_000;
        let conn = Connection::open(dir.path().join("places.sqlite")).unwrap();
        conn.execute_batch(&format!(
            "INSERT INTO moz_bookmarks (id, type, fk, parent, title, lastModified) VALUES
                 (11, 2, NULL, 4, 'rust', {ts}),
                 (21, 1, 100, 11, NULL, {ts});"
        ))
        .unwrap();

        // Rewind so the fresh rows land inside the query window.
        ff.last_run_us = ts - 10;
        ff.run(&ctx).unwrap();

        let id = ff.index()["https://go.dev"];
        let tags = &ff.tree().node(id).tags;
        assert!(tags.contains(&"rust".to_string()), "tags: {tags:?}");

        let cache = ctx.cache().lock();
        let stored = cache.tags_for("https://go.dev").unwrap().unwrap();
        assert!(stored.contains("rust") && stored.contains("dev"));
    }

    #[test]
    fn missing_places_file_fails_construction() {
        let dir = tempfile::tempdir().unwrap();
        let result = Firefox::new(
            BrowserConfig {
                name: "firefox",
                bookmarks_path: dir.path().join("nope.sqlite"),
                use_hooks: vec![],
                debounce: Duration::from_millis(500),
            },
            FirefoxSchema::default(),
        );
        assert!(result.is_err());
    }
}

//! Chrome-family parser: full-tree JSON.
//!
//! Chromium rewrites the whole `Bookmarks` file on every change, so each
//! pass rebuilds the node tree from scratch and detects changes against the
//! previous pass's URL index. The walk is iterative with an explicit stack;
//! parents are visited before their children so tag inheritance works.

use super::{BrowserConfig, BrowserModule, Loader, ParserStats, Watchable};
use crate::error::{ParseError, StoreError};
use crate::hooks::HookRegistry;
use crate::store::{AppContext, Store};
use crate::tree::{Node, NodeTree, UrlIndex};
use crate::watch::WatchTarget;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, warn};

pub struct Chrome {
    config: BrowserConfig,
    tree: NodeTree,
    index: UrlIndex,
    hooks: HookRegistry,
    stats: ParserStats,
    buffer: Store,
}

impl Chrome {
    pub fn new(config: BrowserConfig) -> Result<Self, StoreError> {
        let buffer = Store::in_memory(&format!("buffer_{}", config.name))?;
        Ok(Chrome {
            config,
            tree: NodeTree::new(),
            index: UrlIndex::new(),
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

    /// One full parse pass: rebuild the tree, detect changes against the
    /// previous index, sync the buffer and merge it upward.
    fn run_pass(&mut self, ctx: &AppContext) -> Result<(), ParseError> {
        let path = &self.config.bookmarks_path;
        let start = Instant::now();
        self.stats.reset();

        let raw = std::fs::read_to_string(path).map_err(|source| ParseError::Read {
            path: path.clone(),
            source,
        })?;
        let json: Value = serde_json::from_str(&raw).map_err(|source| ParseError::Json {
            path: path.clone(),
            source,
        })?;
        let roots = json
            .get("roots")
            .and_then(Value::as_object)
            .ok_or_else(|| ParseError::Malformed {
                path: path.clone(),
                reason: "missing roots object".to_string(),
            })?;

        let mut tree = NodeTree::new();
        let mut index = UrlIndex::new();

        // Children pushed in reverse so siblings pop in document order.
        let mut stack: Vec<(&Value, _)> = roots
            .values()
            .rev()
            .map(|value| (value, tree.root()))
            .collect();

        while let Some((value, parent)) = stack.pop() {
            // Top-level string sentinels (sync metadata) are not nodes.
            if value.is_string() {
                continue;
            }
            let Some(obj) = value.as_object() else {
                warn!(module = self.config.name, "skipping non-object bookmark entry");
                continue;
            };
            let Some(ntype) = obj.get("type").and_then(Value::as_str) else {
                warn!(module = self.config.name, "skipping node without type");
                continue;
            };
            let name = obj.get("name").and_then(Value::as_str).unwrap_or_default();
            self.stats.node_count += 1;

            match ntype {
                "folder" => {
                    let id = tree.insert_child(parent, Node::folder(name));
                    if let Some(children) = obj.get("children").and_then(Value::as_array) {
                        for child in children.iter().rev() {
                            stack.push((child, id));
                        }
                    }
                }
                "url" => {
                    let Some(url) = obj.get("url").and_then(Value::as_str) else {
                        warn!(
                            module = self.config.name,
                            name, "skipping url node without url"
                        );
                        continue;
                    };
                    self.stats.url_count += 1;

                    let mut node = Node::url(url, name, "");

                    match self.index.get(url) {
                        None => {
                            // First time we see this URL.
                            self.hooks.run_named(&self.config.use_hooks, &mut node);
                        }
                        Some(&prev) => {
                            if self.tree.node(prev).name_hash != node.name_hash {
                                // Title changed, new tags may be embedded.
                                node.changed = true;
                                self.hooks.run_named(&self.config.use_hooks, &mut node);
                            }
                        }
                    }

                    let id = tree.insert_child(parent, node);
                    tree.inherit_parent_tag(id);
                    index.insert(url.to_string(), id);
                }
                other => {
                    debug!(module = self.config.name, kind = other, "ignoring node kind");
                }
            }
        }

        self.stats.last_parse = start.elapsed();
        debug!(
            module = self.config.name,
            nodes = self.stats.node_count,
            urls = self.stats.url_count,
            elapsed = ?self.stats.last_parse,
            "parsed bookmark tree"
        );

        // The new tree and index replace the previous pass wholesale.
        self.tree = tree;
        self.index = index;

        self.sync_tree_to_buffer();
        ctx.merge_buffer(&self.buffer)?;

        Ok(())
    }

    /// Upsert every url node of the current tree into the buffer. One bad
    /// row is logged and skipped.
    fn sync_tree_to_buffer(&mut self) {
        let ids: Vec<_> = self.tree.iter_depth_first().collect();
        for id in ids {
            let node = self.tree.node(id);
            if !node.is_url() {
                continue;
            }
            let bk = node.to_bookmark(self.config.name);
            if let Err(e) = self.buffer.upsert(&bk) {
                warn!(url = %bk.url, error = %e, "buffer upsert failed");
            }
        }
    }
}

impl BrowserModule for Chrome {
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

impl Loader for Chrome {
    fn load(&mut self, ctx: &AppContext) -> Result<(), ParseError> {
        info!(module = self.config.name, path = %self.config.bookmarks_path.display(), "initial load");
        self.run_pass(ctx)
    }
}

impl Watchable for Chrome {
    fn watch_target(&self) -> WatchTarget {
        let dir = self
            .config
            .bookmarks_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        WatchTarget {
            dir,
            paths: vec![self.config.bookmarks_path.clone()],
            debounce: self.config.debounce,
        }
    }

    fn run(&mut self, ctx: &AppContext) -> Result<(), ParseError> {
        self.run_pass(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    const SAMPLE: &str = r#"{
        "checksum": "abc",
        "roots": {
            "bookmark_bar": {
                "type": "folder",
                "name": "Bookmarks bar",
                "children": [
                    {
                        "type": "folder",
                        "name": "Dev",
                        "children": [
                            { "type": "url", "name": "Go", "url": "https://go.dev" }
                        ]
                    },
                    { "type": "url", "name": "News #daily", "url": "https://news.example" }
                ]
            },
            "other": { "type": "folder", "name": "Other bookmarks", "children": [] },
            "sync_transaction_version": "42"
        },
        "version": 1
    }"#;

    fn chrome_with(dir: &std::path::Path, content: &str) -> Chrome {
        let path = dir.join("Bookmarks");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        Chrome::new(BrowserConfig {
            name: "chrome",
            bookmarks_path: path,
            use_hooks: vec!["title-tags".to_string()],
            debounce: Duration::from_millis(500),
        })
        .unwrap()
    }

    fn changed_count(chrome: &Chrome) -> usize {
        chrome
            .tree()
            .iter_depth_first()
            .filter(|&id| chrome.tree().node(id).changed)
            .count()
    }

    #[test]
    fn parses_tree_and_builds_index() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::open(dir.path()).unwrap();
        let mut chrome = chrome_with(dir.path(), SAMPLE);

        chrome.load(&ctx).unwrap();

        assert_eq!(chrome.index().len(), 2);
        assert!(chrome.index().contains_key("https://go.dev"));
        assert_eq!(chrome.buffer().count().unwrap(), 2);
    }

    #[test]
    fn folder_name_becomes_tag() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::open(dir.path()).unwrap();
        let mut chrome = chrome_with(dir.path(), SAMPLE);

        chrome.load(&ctx).unwrap();

        let tags = chrome.buffer().tags_for("https://go.dev").unwrap().unwrap();
        assert!(tags.contains("Dev"), "expected Dev in {tags}");
    }

    #[test]
    fn title_hashtags_become_tags() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::open(dir.path()).unwrap();
        let mut chrome = chrome_with(dir.path(), SAMPLE);

        chrome.load(&ctx).unwrap();

        let tags = chrome
            .buffer()
            .tags_for("https://news.example")
            .unwrap()
            .unwrap();
        assert!(tags.contains("daily"), "expected daily in {tags}");
    }

    #[test]
    fn unchanged_reparse_flags_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::open(dir.path()).unwrap();
        let mut chrome = chrome_with(dir.path(), SAMPLE);

        chrome.load(&ctx).unwrap();
        chrome.run(&ctx).unwrap();

        assert_eq!(changed_count(&chrome), 0);
    }

    #[test]
    fn renamed_bookmark_is_flagged_changed() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::open(dir.path()).unwrap();
        let mut chrome = chrome_with(dir.path(), SAMPLE);
        chrome.load(&ctx).unwrap();

        let renamed = SAMPLE.replace("\"name\": \"Go\"", "\"name\": \"Golang\"");
        std::fs::write(&chrome.config.bookmarks_path, renamed).unwrap();
        chrome.run(&ctx).unwrap();

        assert_eq!(changed_count(&chrome), 1);
    }

    #[test]
    fn malformed_node_is_skipped_not_fatal() {
        let broken = r#"{
            "roots": {
                "bookmark_bar": {
                    "type": "folder",
                    "name": "bar",
                    "children": [
                        { "name": "no type here" },
                        { "type": "url", "name": "missing url" },
                        { "type": "url", "name": "Ok", "url": "https://ok.example" }
                    ]
                }
            }
        }"#;
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::open(dir.path()).unwrap();
        let mut chrome = chrome_with(dir.path(), broken);

        chrome.load(&ctx).unwrap();
        assert_eq!(chrome.index().len(), 1);
    }

    #[test]
    fn unreadable_file_aborts_pass() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::open(dir.path()).unwrap();
        let mut chrome = Chrome::new(BrowserConfig {
            name: "chrome",
            bookmarks_path: dir.path().join("missing"),
            use_hooks: vec![],
            debounce: Duration::from_millis(500),
        })
        .unwrap();

        assert!(matches!(
            chrome.load(&ctx),
            Err(ParseError::Read { .. })
        ));
    }
}

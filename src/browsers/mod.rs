//! Browser modules.
//!
//! A browser module owns one bookmark source, its node tree, URL index and
//! ephemeral buffer store. Capabilities are declared through accessor
//! methods returning trait objects; the daemon introspects them at spawn
//! time.

pub mod chrome;
pub mod firefox;

pub use chrome::Chrome;
pub use firefox::Firefox;

use crate::error::ParseError;
use crate::store::AppContext;
use crate::watch::WatchTarget;
use std::path::PathBuf;
use std::time::Duration;

/// Counters tracked over parse passes.
#[derive(Debug, Default, Clone)]
pub struct ParserStats {
    pub node_count: usize,
    pub url_count: usize,
    pub last_parse: Duration,
}

impl ParserStats {
    pub fn reset(&mut self) {
        self.node_count = 0;
        self.url_count = 0;
    }
}

/// Settings shared by all browser modules. The bookmark path arrives here
/// already resolved; profile discovery is the caller's concern.
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Module identifier recorded in the `module` column.
    pub name: &'static str,
    /// Absolute path to the bookmark source file.
    pub bookmarks_path: PathBuf,
    /// Names of hooks to run on new/changed url nodes.
    pub use_hooks: Vec<String>,
    /// Quiescence interval for the event reducer.
    pub debounce: Duration,
}

/// Base trait for all browser modules.
pub trait BrowserModule: Send {
    fn name(&self) -> &'static str;

    fn config(&self) -> &BrowserConfig;

    /// Capability: synchronous full parse at startup.
    fn as_loader(&mut self) -> Option<&mut dyn Loader> {
        None
    }

    /// Capability: re-parse triggered by source change events.
    fn as_watchable(&mut self) -> Option<&mut dyn Watchable> {
        None
    }
}

/// A module that supports an initial full parse pass.
pub trait Loader {
    fn load(&mut self, ctx: &AppContext) -> Result<(), ParseError>;
}

/// A module that can be re-run on watcher events.
pub trait Watchable {
    /// What to watch, and for which file names.
    fn watch_target(&self) -> WatchTarget;

    /// One incremental pass. Runs strictly sequentially per instance.
    fn run(&mut self, ctx: &AppContext) -> Result<(), ParseError>;
}

//! Source change watching with burst reduction.
//!
//! Browsers rewrite their bookmark files wholesale, so a single user action
//! produces a burst of filesystem events. The reducer collapses a burst
//! into one downstream trigger once the source has been quiet for the
//! debounce interval; only the fact that a change occurred survives.

use crate::error::WatchError;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Poll interval for the shutdown flag while idle.
const IDLE_POLL: Duration = Duration::from_millis(250);

/// Describes what a browser module wants watched.
#[derive(Debug, Clone)]
pub struct WatchTarget {
    /// Directory to register with the OS watcher.
    pub dir: PathBuf,
    /// Full paths whose events are relevant (e.g. `Bookmarks`,
    /// `places.sqlite-wal`). Events on other paths are ignored.
    pub paths: Vec<PathBuf>,
    /// Quiescence interval before a burst is reduced to one trigger.
    pub debounce: Duration,
}

/// A watcher bound to one browser instance's source directory.
pub struct SourceWatcher {
    target: WatchTarget,
    rx: Receiver<notify::Result<Event>>,
    // Dropping the watcher cancels the OS watch.
    _watcher: notify::RecommendedWatcher,
}

impl SourceWatcher {
    pub fn new(target: WatchTarget) -> Result<Self, WatchError> {
        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })
        .map_err(|source| WatchError::Setup {
            path: target.dir.clone(),
            source,
        })?;

        watcher
            .watch(&target.dir, RecursiveMode::NonRecursive)
            .map_err(|source| WatchError::Setup {
                path: target.dir.clone(),
                source,
            })?;

        Ok(SourceWatcher {
            target,
            rx,
            _watcher: watcher,
        })
    }

    /// Block until a relevant change occurred and the source went quiet for
    /// the debounce interval. Returns `false` when `running` was cleared or
    /// the event channel disconnected.
    pub fn wait_for_change(&self, running: &AtomicBool) -> Result<bool, WatchError> {
        // Wait for the first relevant event.
        loop {
            if !running.load(Ordering::Relaxed) {
                return Ok(false);
            }
            match self.rx.recv_timeout(IDLE_POLL) {
                Ok(Ok(event)) if self.relevant(&event) => break,
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => {
                    warn!(error = %e, "watch error");
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(false),
            }
        }

        // Reducer: drain the burst until the source has been quiet for the
        // debounce interval. Waits are sliced so shutdown stays responsive
        // even when the source never goes quiet.
        let mut quiet_deadline = Instant::now() + self.target.debounce;
        loop {
            if !running.load(Ordering::Relaxed) {
                return Ok(false);
            }
            let now = Instant::now();
            if now >= quiet_deadline {
                return Ok(true);
            }
            let wait = (quiet_deadline - now).min(IDLE_POLL);
            match self.rx.recv_timeout(wait) {
                Ok(Ok(event)) => {
                    if self.relevant(&event) {
                        debug!("coalescing change event");
                        quiet_deadline = Instant::now() + self.target.debounce;
                    }
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "watch error");
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(true),
            }
        }
    }

    fn relevant(&self, event: &Event) -> bool {
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            return false;
        }
        event
            .paths
            .iter()
            .any(|p| self.target.paths.iter().any(|watched| watched == p))
    }
}

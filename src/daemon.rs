//! Module scheduler.
//!
//! One worker thread per browser instance: an initial load, then a
//! watch/parse loop driven by the instance's source watcher. Workers share
//! nothing but the store context; a fatal error in one instance never takes
//! down the others.

use crate::browsers::BrowserModule;
use crate::error::ParseError;
use crate::store::AppContext;
use crate::watch::SourceWatcher;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info, warn};

pub struct Daemon {
    ctx: Arc<AppContext>,
    running: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    /// Module names already scheduled. Double-spawning a module would race
    /// its own buffer.
    scheduled: HashSet<&'static str>,
}

impl Daemon {
    pub fn new(ctx: AppContext) -> Self {
        Daemon {
            ctx: Arc::new(ctx),
            running: Arc::new(AtomicBool::new(true)),
            workers: Vec::new(),
            scheduled: HashSet::new(),
        }
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    /// Schedule a browser module. Returns false if a module with the same
    /// name is already running.
    pub fn spawn(&mut self, mut module: Box<dyn BrowserModule>) -> bool {
        let name = module.name();
        if !self.scheduled.insert(name) {
            warn!(module = name, "module already scheduled, skipping");
            return false;
        }

        let ctx = Arc::clone(&self.ctx);
        let running = Arc::clone(&self.running);

        let spawned = std::thread::Builder::new()
            .name(format!("markdex-{name}"))
            .spawn(move || worker(&mut *module, &ctx, &running));

        match spawned {
            Ok(handle) => {
                self.workers.push(handle);
                true
            }
            Err(e) => {
                // The other instances keep running.
                error!(module = name, error = %e, "failed to spawn worker thread");
                self.scheduled.remove(name);
                false
            }
        }
    }

    /// Signal all workers to stop and wait for them.
    pub fn shutdown(&mut self) {
        info!("shutting down");
        self.running.store(false, Ordering::Relaxed);
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }
    }

    /// Block until every worker exits on its own. Used when shutdown is
    /// driven externally (signal handler clearing the running flag).
    pub fn join(&mut self) {
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }
    }

    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

/// One module's lifecycle: load, then watch until shutdown or a fatal
/// source error.
fn worker(module: &mut dyn BrowserModule, ctx: &AppContext, running: &AtomicBool) {
    let name = module.name();

    if let Some(loader) = module.as_loader() {
        match loader.load(ctx) {
            Ok(()) => {}
            Err(ParseError::SourceLocked) => {
                error!(module = name, "source locked, shutting down instance");
                return;
            }
            Err(e) => {
                error!(module = name, error = %e, "initial load failed");
                return;
            }
        }
    }

    let Some(watchable) = module.as_watchable() else {
        info!(module = name, "module is load-only, worker done");
        return;
    };

    let target = watchable.watch_target();
    let watcher = match SourceWatcher::new(target) {
        Ok(w) => w,
        Err(e) => {
            error!(module = name, error = %e, "failed to set up watcher");
            return;
        }
    };

    info!(module = name, "watching for changes");

    loop {
        match watcher.wait_for_change(running) {
            Ok(true) => match watchable.run(ctx) {
                Ok(()) => {}
                Err(ParseError::SourceLocked) => {
                    error!(module = name, "source locked, shutting down instance");
                    break;
                }
                Err(e) => {
                    // Transient parse failures leave the previous state
                    // intact; the next change event retries.
                    warn!(module = name, error = %e, "parse pass failed");
                }
            },
            Ok(false) => break,
            Err(e) => {
                error!(module = name, error = %e, "watcher failed");
                break;
            }
        }
    }

    info!(module = name, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browsers::{BrowserConfig, Chrome};
    use std::path::Path;
    use std::time::Duration;

    const SAMPLE: &str = r#"{
        "roots": {
            "bookmark_bar": {
                "type": "folder",
                "name": "bar",
                "children": [
                    { "type": "url", "name": "Go", "url": "https://go.dev" }
                ]
            }
        }
    }"#;

    fn chrome_module(dir: &Path) -> Box<dyn BrowserModule> {
        let path = dir.join("Bookmarks");
        std::fs::write(&path, SAMPLE).unwrap();
        Box::new(
            Chrome::new(BrowserConfig {
                name: "chrome",
                bookmarks_path: path,
                use_hooks: vec![],
                debounce: Duration::from_millis(50),
            })
            .unwrap(),
        )
    }

    #[test]
    fn spawn_rejects_duplicate_module_name() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::open(dir.path()).unwrap();
        let mut daemon = Daemon::new(ctx);

        assert!(daemon.spawn(chrome_module(dir.path())));
        assert!(!daemon.spawn(chrome_module(dir.path())));

        daemon.shutdown();
    }

    #[test]
    fn worker_loads_then_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::open(dir.path()).unwrap();
        let mut daemon = Daemon::new(ctx);
        daemon.spawn(chrome_module(dir.path()));

        // Give the worker time to finish the initial load.
        std::thread::sleep(Duration::from_millis(300));
        daemon.shutdown();

        let ctx = Arc::clone(daemon.context());
        assert_eq!(ctx.cache().lock().count().unwrap(), 1);
    }

    #[test]
    fn file_change_triggers_reparse() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::open(dir.path()).unwrap();
        let mut daemon = Daemon::new(ctx);
        daemon.spawn(chrome_module(dir.path()));
        std::thread::sleep(Duration::from_millis(300));

        let updated = r#"{
            "roots": {
                "bookmark_bar": {
                    "type": "folder",
                    "name": "bar",
                    "children": [
                        { "type": "url", "name": "Go", "url": "https://go.dev" },
                        { "type": "url", "name": "Rust", "url": "https://rust-lang.org" }
                    ]
                }
            }
        }"#;
        std::fs::write(dir.path().join("Bookmarks"), updated).unwrap();

        // Debounce is 50ms; allow for slow event delivery.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let ctx = Arc::clone(daemon.context());
        loop {
            if ctx.cache().lock().count().unwrap() == 2 {
                break;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "reparse never converged"
            );
            std::thread::sleep(Duration::from_millis(50));
        }

        daemon.shutdown();
    }
}

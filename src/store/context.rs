//! Process-scoped store context.
//!
//! Owns the shared in-memory cache and the disk store path. Constructed
//! explicitly at startup and passed to every component that needs store
//! access; a second initialization in the same process fails loudly.

use super::{Store, DB_FILENAME};
use crate::error::StoreError;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Shared store context: converged in-memory cache plus its on-disk mirror.
pub struct AppContext {
    cache: Arc<Mutex<Store>>,
    disk_path: PathBuf,
}

impl AppContext {
    /// Initialize the process-wide context. May be called once per process;
    /// a second call returns [`StoreError::AlreadyInitialized`].
    pub fn initialize(db_dir: &Path) -> Result<Self, StoreError> {
        if INITIALIZED.swap(true, Ordering::SeqCst) {
            return Err(StoreError::AlreadyInitialized);
        }
        AppContext::open(db_dir)
    }

    /// Build a context without the process-wide single-init guard. Intended
    /// for tests that need several isolated contexts in one process.
    pub fn open(db_dir: &Path) -> Result<Self, StoreError> {
        let mut cache = Store::in_memory("cache")?;
        let disk_path = db_dir.join(DB_FILENAME);

        if disk_path.exists() {
            info!(path = %disk_path.display(), "disk store exists, preloading into cache");
            cache.restore_from_path(&disk_path)?;
        } else {
            info!(path = %disk_path.display(), "initializing disk store");
            cache.backup_to_path(&disk_path)?;
        }

        Ok(AppContext {
            cache: Arc::new(Mutex::new(cache)),
            disk_path,
        })
    }

    pub fn cache(&self) -> &Arc<Mutex<Store>> {
        &self.cache
    }

    pub fn disk_path(&self) -> &Path {
        &self.disk_path
    }

    /// Merge a module buffer into the shared cache and flush the cache to
    /// disk. An empty cache is bootstrapped with a whole-store snapshot
    /// since there is nothing to merge against yet.
    pub fn merge_buffer(&self, buffer: &Store) -> Result<(), StoreError> {
        {
            let mut cache = self.cache.lock();
            if cache.is_empty()? {
                info!(buffer = %buffer.name(), "cache empty, bootstrapping from buffer");
                buffer.backup_to(&mut cache)?;
            } else {
                buffer.sync_to(&mut cache)?;
            }
        }
        self.flush_to_disk()
    }

    /// Snapshot the cache to the disk store. The cache is always a superset
    /// of disk, so the flush is a verbatim whole-store copy.
    pub fn flush_to_disk(&self) -> Result<(), StoreError> {
        let cache = self.cache.lock();
        if let Err(e) = cache.backup_to_path(&self.disk_path) {
            warn!(path = %self.disk_path.display(), error = %e, "disk flush failed, will retry next pass");
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bookmark::Bookmark;

    fn bk(url: &str) -> Bookmark {
        Bookmark {
            url: url.to_string(),
            title: "t".to_string(),
            tags: vec!["a".to_string()],
            desc: String::new(),
            module: "test".to_string(),
        }
    }

    #[test]
    fn empty_cache_bootstraps_from_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::open(dir.path()).unwrap();

        let mut buffer = Store::in_memory("buffer_test").unwrap();
        buffer.upsert(&bk("https://x")).unwrap();
        ctx.merge_buffer(&buffer).unwrap();

        assert_eq!(ctx.cache().lock().count().unwrap(), 1);
    }

    #[test]
    fn disk_store_preloads_into_new_context() {
        let dir = tempfile::tempdir().unwrap();

        {
            let ctx = AppContext::open(dir.path()).unwrap();
            let mut buffer = Store::in_memory("buffer_test").unwrap();
            buffer.upsert(&bk("https://x")).unwrap();
            ctx.merge_buffer(&buffer).unwrap();
        }

        let ctx = AppContext::open(dir.path()).unwrap();
        assert_eq!(ctx.cache().lock().count().unwrap(), 1);
    }

    #[test]
    fn merge_into_populated_cache_uses_upsert_protocol() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::open(dir.path()).unwrap();

        let mut first = Store::in_memory("buffer_one").unwrap();
        first.upsert(&bk("https://x")).unwrap();
        ctx.merge_buffer(&first).unwrap();

        let mut second = Store::in_memory("buffer_two").unwrap();
        let mut other = bk("https://x");
        other.tags = vec!["b".to_string()];
        second.upsert(&other).unwrap();
        second.upsert(&bk("https://y")).unwrap();
        ctx.merge_buffer(&second).unwrap();

        let cache = ctx.cache().lock();
        assert_eq!(cache.count().unwrap(), 2);
        let tags = cache.tags_for("https://x").unwrap().unwrap();
        assert!(tags.contains(",a,") && tags.contains("b"));
    }
}

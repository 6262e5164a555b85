use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::models::{ImageFileRef, Thumbnail};

/// Bounded in-memory thumbnail store keyed by file identity.
///
/// The key is the (path, mtime, size) composite of `ImageFileRef`, so a file
/// that changes on disk misses and gets re-decoded. Least-recently accessed
/// entries are evicted once capacity is reached. Nothing is persisted; the
/// cache lives for one browsing session.
pub struct ThumbnailCache {
    entries: Mutex<LruCache<ImageFileRef, Arc<Thumbnail>>>,
}

impl ThumbnailCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Fetch a cached thumbnail, marking it most-recently used.
    pub fn get(&self, key: &ImageFileRef) -> Option<Arc<Thumbnail>> {
        let mut entries = self.entries.lock().unwrap();
        entries.get(key).cloned()
    }

    /// Insert a thumbnail. A second put for the same key overwrites
    /// (last-writer-wins), though the scheduler never runs two jobs for one
    /// key concurrently.
    pub fn put(&self, key: ImageFileRef, thumbnail: Arc<Thumbnail>) {
        let mut entries = self.entries.lock().unwrap();
        entries.put(key, thumbnail);
    }

    pub fn invalidate(&self, key: &ImageFileRef) {
        let mut entries = self.entries.lock().unwrap();
        entries.pop(key);
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap();
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Secondary page cache.

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;

use super::replacer::FifoReplacer;
use super::stats::{CacheStats, CacheStatsSnapshot};
use crate::common::PageId;
use crate::storage::page::Page;

/// A cache of page images keyed by page id.
///
/// The store consults it before reading from its page array, fills it when
/// pages are evicted or explicitly cached, and removes entries whenever a
/// page is overwritten or deleted, so a cached image is never stale.
pub trait PageCache: Send + Sync {
    /// Insert or replace the image of page `id`.
    fn add(&self, id: PageId, page: &[u8]);

    /// Copy the first `dst.len()` bytes of page `id` into `dst`. Returns
    /// false on a miss.
    fn copy(&self, id: PageId, dst: &mut [u8]) -> bool;

    /// Drop page `id` if present.
    fn remove(&self, id: PageId);

    /// Current counters.
    fn stats(&self) -> CacheStatsSnapshot;
}

struct Inner {
    pages: HashMap<PageId, Page>,
    replacer: FifoReplacer,
}

/// Bounded page cache with FIFO eviction.
///
/// # Thread Safety
/// One `Mutex` guards the map and the replacer together; counters are
/// atomic and updated outside the lock.
pub struct FifoPageCache {
    capacity: usize,
    inner: Mutex<Inner>,
    stats: CacheStats,
}

impl FifoPageCache {
    /// Create a cache holding at most `capacity` pages.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                pages: HashMap::with_capacity(capacity),
                replacer: FifoReplacer::new(),
            }),
            stats: CacheStats::new(),
        }
    }

    /// Maximum number of cached pages.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of cached pages.
    pub fn len(&self) -> usize {
        self.inner.lock().pages.len()
    }

    /// True if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PageCache for FifoPageCache {
    fn add(&self, id: PageId, page: &[u8]) {
        if self.capacity == 0 {
            return;
        }

        let mut inner = self.inner.lock();
        if let Some(existing) = inner.pages.get_mut(&id) {
            if existing.len() == page.len() {
                existing.as_mut_slice().copy_from_slice(page);
                self.stats.inserts.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        while inner.pages.len() >= self.capacity && !inner.pages.contains_key(&id) {
            let Some(victim) = inner.replacer.evict() else {
                break;
            };
            inner.pages.remove(&victim);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }

        inner.pages.insert(id, Page::from_slice(page));
        inner.replacer.record_insert(id);
        self.stats.inserts.fetch_add(1, Ordering::Relaxed);
    }

    fn copy(&self, id: PageId, dst: &mut [u8]) -> bool {
        let hit = {
            let inner = self.inner.lock();
            match inner.pages.get(&id) {
                Some(page) if page.len() >= dst.len() => {
                    let len = dst.len();
                    dst.copy_from_slice(&page.as_slice()[..len]);
                    true
                }
                _ => false,
            }
        };

        let counter = if hit { &self.stats.hits } else { &self.stats.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        hit
    }

    fn remove(&self, id: PageId) {
        let mut inner = self.inner.lock();
        if inner.pages.remove(&id).is_some() {
            inner.replacer.remove(id);
        }
    }

    fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }
}

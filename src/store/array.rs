//! The store's view of its page array: optional page cache plus snapshot
//! copy-on-write, layered over the (possibly encrypting) array.

use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::snapshot::{Snapshot, SnapshotState};
use crate::cache::PageCache;
use crate::common::{Error, PageId, Result};
use crate::storage::{check_partial_page, PageArray};

pub(crate) struct StoreArray {
    /// Plaintext view; encrypts when the store has a cipher.
    array: Arc<dyn PageArray>,
    /// Storage as written to disk. Snapshots read and preserve this.
    raw: Arc<dyn PageArray>,
    cache: Option<Arc<dyn PageCache>>,
    snapshots: Mutex<Vec<Arc<SnapshotState>>>,
}

impl StoreArray {
    pub fn new(
        array: Arc<dyn PageArray>,
        raw: Arc<dyn PageArray>,
        cache: Option<Arc<dyn PageCache>>,
    ) -> Self {
        Self {
            array,
            raw,
            cache,
            snapshots: Mutex::new(Vec::new()),
        }
    }

    pub fn cache(&self) -> Option<&Arc<dyn PageCache>> {
        self.cache.as_ref()
    }

    /// Start streaming the first `page_count` pages as they are right now.
    pub fn begin_snapshot(&self, page_count: u64, position: u64) -> Snapshot {
        let state = Arc::new(SnapshotState::new(page_count));

        let mut snapshots = self.snapshots.lock();
        snapshots.retain(|s| !s.is_done());
        snapshots.push(state.clone());
        drop(snapshots);

        debug!(pages = page_count, position, "snapshot started");
        Snapshot::new(state, self.raw.clone(), position)
    }

    /// Live snapshots, pruning finished ones.
    fn live_snapshots(&self) -> Vec<Arc<SnapshotState>> {
        let mut snapshots = self.snapshots.lock();
        if snapshots.is_empty() {
            return Vec::new();
        }
        snapshots.retain(|s| !s.is_done());
        snapshots.clone()
    }

    /// Preserve page `id` for every snapshot that still needs it.
    fn preserve(&self, id: PageId) -> Result<()> {
        for snapshot in self.live_snapshots() {
            snapshot.capture(self.raw.as_ref(), id)?;
        }
        Ok(())
    }

    fn uncache(&self, id: PageId) {
        if let Some(cache) = &self.cache {
            cache.remove(id);
        }
    }
}

impl PageArray for StoreArray {
    fn page_size(&self) -> usize {
        self.array.page_size()
    }

    fn is_empty(&self) -> Result<bool> {
        self.array.is_empty()
    }

    fn page_count(&self) -> Result<u64> {
        self.array.page_count()
    }

    fn set_page_count(&self, count: u64) -> Result<()> {
        let current = self.raw.page_count()?;
        if count < current {
            for snapshot in self.live_snapshots() {
                snapshot.capture_range(self.raw.as_ref(), count, current)?;
            }
            if let Some(cache) = &self.cache {
                for id in count..current {
                    cache.remove(PageId::new(id));
                }
            }
        }
        self.array.set_page_count(count)
    }

    fn read_page(&self, id: PageId, buf: &mut [u8]) -> Result<()> {
        check_partial_page(self, buf)?;
        if let Some(cache) = &self.cache {
            if cache.copy(id, buf) {
                return Ok(());
            }
        }
        self.array.read_page(id, buf)
    }

    fn write_page(&self, id: PageId, buf: &[u8]) -> Result<()> {
        self.preserve(id)?;
        self.uncache(id);
        self.array.write_page(id, buf)
    }

    fn evict_page(&self, id: PageId, buf: &[u8]) -> Result<()> {
        self.preserve(id)?;
        self.uncache(id);
        self.array.evict_page(id, buf)?;
        if let Some(cache) = &self.cache {
            cache.add(id, buf);
        }
        Ok(())
    }

    fn cache_page(&self, id: PageId, buf: &[u8]) -> Result<()> {
        if let Some(cache) = &self.cache {
            cache.add(id, buf);
        }
        self.array.cache_page(id, buf)
    }

    fn uncache_page(&self, id: PageId) -> Result<()> {
        self.uncache(id);
        self.array.uncache_page(id)
    }

    fn sync(&self, metadata: bool) -> Result<()> {
        self.array.sync(metadata)
    }

    fn sync_page(&self, id: PageId) -> Result<()> {
        self.array.sync_page(id)
    }

    fn direct_page_pointer(&self, id: PageId) -> Result<Option<NonNull<u8>>> {
        self.array.direct_page_pointer(id)
    }

    fn copy_page(&self, src: PageId, dst: PageId) -> Result<()> {
        self.preserve(dst)?;
        self.uncache(dst);
        self.array.copy_page(src, dst)
    }

    fn close(&self, cause: Option<&Error>) -> Result<()> {
        self.array.close(cause)
    }
}

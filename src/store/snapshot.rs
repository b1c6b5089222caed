//! Point-in-time snapshot streams.

use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::common::{PageId, Result};
use crate::storage::page::Page;
use crate::storage::PageArray;

struct Progress {
    /// Next page the stream will emit.
    next: u64,
    /// Prior images of pages overwritten before the stream reached them.
    captured: HashMap<u64, Page>,
    done: bool,
}

/// Copy-on-write bookkeeping shared by a [`Snapshot`] and the array it
/// watches.
pub(crate) struct SnapshotState {
    page_count: u64,
    progress: Mutex<Progress>,
}

impl SnapshotState {
    pub fn new(page_count: u64) -> Self {
        Self {
            page_count,
            progress: Mutex::new(Progress {
                next: 0,
                captured: HashMap::new(),
                done: false,
            }),
        }
    }

    pub fn is_done(&self) -> bool {
        self.progress.lock().done
    }

    /// Preserve the raw image of page `id` before it is overwritten, unless
    /// the stream has already emitted it or it lies past the snapshot.
    pub fn capture(&self, raw: &dyn PageArray, id: PageId) -> Result<()> {
        if id.0 >= self.page_count {
            return Ok(());
        }

        let mut progress = self.progress.lock();
        if progress.done || id.0 < progress.next || progress.captured.contains_key(&id.0) {
            return Ok(());
        }

        let mut page = Page::new(raw.page_size());
        read_raw(raw, id, &mut page)?;
        progress.captured.insert(id.0, page);
        Ok(())
    }

    /// Capture every page in `from..to`.
    pub fn capture_range(&self, raw: &dyn PageArray, from: u64, to: u64) -> Result<()> {
        for id in from..to.min(self.page_count) {
            self.capture(raw, PageId::new(id))?;
        }
        Ok(())
    }

    /// Emit the next page into `buf`. Returns false at the end.
    fn emit(&self, raw: &dyn PageArray, buf: &mut Page) -> Result<bool> {
        let mut progress = self.progress.lock();
        if progress.done || progress.next >= self.page_count {
            return Ok(false);
        }

        let id = progress.next;
        match progress.captured.remove(&id) {
            Some(page) => *buf = page,
            None => read_raw(raw, PageId::new(id), buf)?,
        }
        progress.next += 1;
        Ok(true)
    }

    fn finish(&self) {
        let mut progress = self.progress.lock();
        progress.done = true;
        progress.captured.clear();
    }
}

/// Pages past the end of the backing storage read as zeros.
fn read_raw(raw: &dyn PageArray, id: PageId, page: &mut Page) -> Result<()> {
    match raw.read_page(id, page.as_mut_slice()) {
        Err(e) if e.is_eof() => {
            page.reset();
            Ok(())
        }
        other => other,
    }
}

/// A byte stream of every page of the store as of the commit that was
/// current when the snapshot began.
///
/// Pages are emitted raw, exactly as stored (encrypted if the store is),
/// from page 0 up to the committed page count. Pages the store overwrites
/// while the stream is live are preserved and emitted with their original
/// contents. Dropping the snapshot stops the preservation.
pub struct Snapshot {
    state: Arc<SnapshotState>,
    raw: Arc<dyn PageArray>,
    position: u64,
    page: Page,
    offset: usize,
    filled: usize,
}

impl Snapshot {
    pub(crate) fn new(state: Arc<SnapshotState>, raw: Arc<dyn PageArray>, position: u64) -> Self {
        let page = Page::new(raw.page_size());
        Self {
            state,
            raw,
            position,
            page,
            offset: 0,
            filled: 0,
        }
    }

    /// Number of pages in the stream.
    pub fn page_count(&self) -> u64 {
        self.state.page_count
    }

    /// Page size of the stream.
    pub fn page_size(&self) -> usize {
        self.page.len()
    }

    /// Total stream length in bytes.
    pub fn length(&self) -> u64 {
        self.page_count() * self.page_size() as u64
    }

    /// Redo position recorded by the calling layer in the snapshot's
    /// header: the little-endian u64 at the start of the extra data.
    pub fn position(&self) -> u64 {
        self.position
    }
}

impl Read for Snapshot {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }

        if self.offset == self.filled {
            let more = self
                .state
                .emit(self.raw.as_ref(), &mut self.page)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            if !more {
                return Ok(0);
            }
            self.offset = 0;
            self.filled = self.page.len();
        }

        let n = out.len().min(self.filled - self.offset);
        out[..n].copy_from_slice(&self.page.as_slice()[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.state.finish();
        debug!(pages = self.state.page_count, "snapshot ended");
    }
}

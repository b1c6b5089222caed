//! Page array abstraction.
//!
//! A [`PageArray`] is byte-addressable storage of fixed-size pages, indexed
//! by [`PageId`]. It knows nothing about headers, commits or free lists.

use std::ptr::NonNull;

use crate::common::{Error, PageId, Result};

/// Fixed-size page storage.
///
/// # Thread Safety
/// Every method takes `&self`; implementations synchronize internally so a
/// single array can be shared by the store, its allocator and any live
/// snapshots.
pub trait PageArray: Send + Sync {
    /// Size of every page in bytes.
    fn page_size(&self) -> usize;

    /// True if the array holds no pages at all.
    fn is_empty(&self) -> Result<bool>;

    /// Number of pages currently backed by storage.
    fn page_count(&self) -> Result<u64>;

    /// Grow or shrink the array to exactly `count` pages.
    fn set_page_count(&self, count: u64) -> Result<()>;

    /// Read the first `buf.len()` bytes of page `id`.
    ///
    /// # Errors
    /// Fails with an `UnexpectedEof` I/O error if the page lies beyond the
    /// end of the array.
    fn read_page(&self, id: PageId, buf: &mut [u8]) -> Result<()>;

    /// Write a full page.
    fn write_page(&self, id: PageId, buf: &[u8]) -> Result<()>;

    /// Write a page which is being evicted from a higher-level cache.
    fn evict_page(&self, id: PageId, buf: &[u8]) -> Result<()> {
        self.write_page(id, buf)
    }

    /// Offer a page to any cache layered under this array.
    fn cache_page(&self, _id: PageId, _buf: &[u8]) -> Result<()> {
        Ok(())
    }

    /// Drop a page from any cache layered under this array.
    fn uncache_page(&self, _id: PageId) -> Result<()> {
        Ok(())
    }

    /// Durably flush all writes. `metadata` also flushes file metadata.
    fn sync(&self, metadata: bool) -> Result<()>;

    /// Durably flush a single page.
    fn sync_page(&self, _id: PageId) -> Result<()> {
        self.sync(false)
    }

    /// Pointer to the page's bytes when the array is memory mapped.
    fn direct_page_pointer(&self, _id: PageId) -> Result<Option<NonNull<u8>>> {
        Ok(None)
    }

    /// Copy page `src` over page `dst`.
    fn copy_page(&self, src: PageId, dst: PageId) -> Result<()> {
        let mut buf = vec![0u8; self.page_size()];
        self.read_page(src, &mut buf)?;
        self.write_page(dst, &buf)
    }

    /// Release the array. `cause` is the failure that forced the close, if
    /// any. Further operations may fail with `Error::Closed`.
    fn close(&self, cause: Option<&Error>) -> Result<()>;
}

/// Reject buffers that are not exactly one page.
pub(crate) fn check_full_page(array: &dyn PageArray, buf: &[u8]) -> Result<()> {
    if buf.len() != array.page_size() {
        return Err(Error::InvalidArgument(format!(
            "page buffer is {} bytes, page size is {}",
            buf.len(),
            array.page_size()
        )));
    }
    Ok(())
}

/// Reject partial reads longer than a page.
pub(crate) fn check_partial_page(array: &dyn PageArray, buf: &[u8]) -> Result<()> {
    if buf.len() > array.page_size() {
        return Err(Error::InvalidArgument(format!(
            "read of {} bytes exceeds page size {}",
            buf.len(),
            array.page_size()
        )));
    }
    Ok(())
}

//! Durable page store - open, recovery, page operations and commit.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use super::array::StoreArray;
use super::commit_lock::CommitLock;
use super::failure::{Classify, Failure};
use super::snapshot::Snapshot;
use crate::alloc::{PageManager, PageStats};
use crate::cache::PageCache;
use crate::common::config::{check_page_size, HEADER_SIZE};
use crate::common::{CommitNumber, Error, PageId, Result};
use crate::storage::header::get_u64;
use crate::storage::page::{Page, PagePool};
use crate::storage::{check_full_page, check_partial_page, Crypto, CryptoPageArray, PageArray, StoreHeader};

/// Hook run mid-commit, after the allocator has prepared its state and
/// before the new header is written.
///
/// The calling layer uses it to make every page dirtied during the epoch
/// durable, and may fill in the extra data region of `header` (see
/// [`DurablePageStore::extra_commit_data_offset`]).
pub trait CommitCallback {
    /// `resume` is true when a previously interrupted commit is being
    /// resumed. Return a recoverable error such as `Error::CommitAborted` to
    /// abandon the commit and leave the store usable.
    fn prepare(&self, resume: bool, header: &mut [u8]) -> Result<()>;
}

impl<F> CommitCallback for F
where
    F: Fn(bool, &mut [u8]) -> Result<()>,
{
    fn prepare(&self, resume: bool, header: &mut [u8]) -> Result<()> {
        self(resume, header)
    }
}

/// A crash-safe page store.
///
/// Two header slots (pages 0 and 1) alternately record each committed
/// generation; slot `n & 1` holds commit `n`. A commit writes and syncs all
/// data first, then the header into the slot not holding the current
/// generation, so a torn header write always leaves the previous generation
/// intact. Opening an existing store picks the newest valid slot.
///
/// # Failure Policy
/// Recoverable errors (page limit, unavailable recycle, aborted commit)
/// reach the caller with the store still usable. Any other failure inside a
/// page operation or commit closes the store first; every later call then
/// fails with `Error::Closed` and the store must be reopened.
///
/// # Thread Safety
/// All operations take `&self`. Page operations hold the [`CommitLock`]
/// shared; a commit holds it exclusively only while claiming its commit
/// number. The committed commit number sits behind its own `RwLock`, held
/// briefly around header reads and the header write.
pub struct DurablePageStore {
    array: Arc<StoreArray>,
    manager: PageManager,
    crypto: Option<Arc<dyn Crypto>>,
    commit_lock: CommitLock,
    header: RwLock<CommitNumber>,
    headers: PagePool,
    page_size: usize,
    closed: AtomicBool,
}

impl DurablePageStore {
    /// Open a store over `raw`, creating a fresh one if `raw` is empty or
    /// `destroy` is set.
    ///
    /// # Errors
    /// - `Error::WrongPageSize` if the store was created with another page
    ///   size; retrying with `actual` succeeds
    /// - `Error::Corrupt` if neither header slot is valid, or the winning
    ///   generation's allocator state is damaged
    ///
    /// The array is closed on every error path.
    pub fn open(
        raw: Arc<dyn PageArray>,
        cache: Option<Arc<dyn PageCache>>,
        crypto: Option<Arc<dyn Crypto>>,
        destroy: bool,
    ) -> Result<Self> {
        let array: Arc<dyn PageArray> = match &crypto {
            Some(c) => Arc::new(CryptoPageArray::new(raw.clone(), c.clone())),
            None => raw.clone(),
        };
        let array = Arc::new(StoreArray::new(array, raw, cache));

        match Self::open_array(array.clone(), crypto, destroy) {
            Ok(store) => Ok(store),
            Err(e) => {
                if let Err(close_err) = array.close(Some(&e)) {
                    warn!(error = %close_err, "failed to close page array");
                }
                Err(e)
            }
        }
    }

    fn open_array(
        array: Arc<StoreArray>,
        crypto: Option<Arc<dyn Crypto>>,
        destroy: bool,
    ) -> Result<Self> {
        let page_size = array.page_size();
        check_page_size(page_size)?;

        if destroy || array.is_empty()? {
            let manager = PageManager::create(array.clone());
            let store = Self::assemble(array, manager, crypto, CommitNumber::BEFORE_FIRST);

            // Commit twice so both header slots hold valid data
            let mut header = Page::new(page_size);
            store
                .commit_inner(false, header.as_mut_slice(), None)
                .map_err(Failure::into_error)?;
            store
                .commit_inner(false, header.as_mut_slice(), None)
                .map_err(Failure::into_error)?;
            store.array.set_page_count(2)?;

            info!(page_size, destroyed = destroy, "created page store");
            return Ok(store);
        }

        // An interrupted commit may not have synced everything before the
        // header. Pages cannot be safely recycled until it has.
        array.sync(false)?;

        let (slot, header) = find_header(&*array, page_size as u32)?;
        let manager = PageManager::open(array.clone(), &header.manager)?;
        let stats = manager.stats();

        info!(
            page_size,
            commit = %header.commit_number,
            slot = slot.0,
            total_pages = stats.total_pages,
            free_pages = stats.free_pages,
            "recovered page store"
        );
        Ok(Self::assemble(array, manager, crypto, header.commit_number))
    }

    fn assemble(
        array: Arc<StoreArray>,
        manager: PageManager,
        crypto: Option<Arc<dyn Crypto>>,
        commit_number: CommitNumber,
    ) -> Self {
        let page_size = array.page_size();
        Self {
            array,
            manager,
            crypto,
            commit_lock: CommitLock::new(),
            header: RwLock::new(commit_number),
            headers: PagePool::new(HEADER_SIZE, 2),
            page_size,
            closed: AtomicBool::new(false),
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Single exit for every store operation: a fatal failure closes the
    /// store before its error is returned.
    fn settle<T>(&self, result: std::result::Result<T, Failure>) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(Failure::Recoverable(e)) => Err(e),
            Err(Failure::Fatal(e)) => {
                self.close_on_failure(&e);
                Err(e)
            }
        }
    }

    fn close_on_failure(&self, cause: &Error) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        error!(error = %cause, "closing page store after failure");
        if let Err(e) = self.array.close(Some(cause)) {
            warn!(error = %e, "failed to close page array");
        }
    }

    fn check_id(id: PageId) -> Result<()> {
        if id.is_header() {
            return Err(Error::IllegalPageId(id));
        }
        Ok(())
    }

    /// Page size in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of pages backed by the page array.
    pub fn page_count(&self) -> Result<u64> {
        self.check_open()?;
        self.array.page_count()
    }

    /// Always true: this store survives restarts.
    pub fn is_durable(&self) -> bool {
        true
    }

    /// Commit number of the current durable generation.
    pub fn commit_number(&self) -> CommitNumber {
        *self.header.read()
    }

    /// The lock page operations and commits coordinate on. Calling layers
    /// hold it shared around multi-step mutations that must not straddle a
    /// commit.
    pub fn commit_lock(&self) -> &CommitLock {
        &self.commit_lock
    }

    pub fn page_limit(&self) -> Option<u64> {
        self.manager.page_limit()
    }

    /// Cap the total page count. Allocation past the cap fails with the
    /// recoverable `Error::PageLimitExceeded`.
    pub fn set_page_limit(&self, limit: Option<u64>) {
        self.manager.set_page_limit(limit);
    }

    pub fn stats(&self) -> PageStats {
        self.manager.stats()
    }

    /// Cache counters, when a page cache is configured.
    pub fn cache_stats(&self) -> Option<crate::cache::CacheStatsSnapshot> {
        self.array.cache().map(|c| c.stats())
    }

    /// Every page id currently in use, header slots included. Pages deleted
    /// since the last commit count as in use.
    pub fn trace_pages(&self) -> Result<BTreeSet<PageId>> {
        self.check_open()?;
        let mut pages = BTreeSet::new();
        self.manager.mark_all_pages(&mut pages);
        self.manager.trace_free_pages(&mut pages);
        Ok(pages)
    }

    /// Read the first `buf.len()` bytes of page `id`.
    pub fn read_page(&self, id: PageId, buf: &mut [u8]) -> Result<()> {
        self.check_open()?;
        check_partial_page(&*self.array, buf)?;
        self.settle(self.array.read_page(id, buf).map_err(Failure::from))
    }

    /// Allocate a page for writing. The page's prior contents are undefined.
    pub fn alloc_page(&self) -> Result<PageId> {
        self.check_open()?;
        let _shared = self.commit_lock.acquire_shared();
        self.settle(self.manager.alloc_page().classify())
    }

    /// Write a full page.
    pub fn write_page(&self, id: PageId, buf: &[u8]) -> Result<()> {
        self.check_open()?;
        Self::check_id(id)?;
        check_full_page(&*self.array, buf)?;
        self.settle(self.array.write_page(id, buf).map_err(Failure::from))
    }

    /// Write a page that is leaving a higher-level cache, and keep a copy in
    /// the page cache.
    pub fn evict_page(&self, id: PageId, buf: &[u8]) -> Result<()> {
        self.check_open()?;
        Self::check_id(id)?;
        check_full_page(&*self.array, buf)?;
        self.settle(self.array.evict_page(id, buf).map_err(Failure::from))
    }

    /// Offer a page image to the page cache.
    pub fn cache_page(&self, id: PageId, buf: &[u8]) -> Result<()> {
        self.check_open()?;
        Self::check_id(id)?;
        check_full_page(&*self.array, buf)?;
        self.settle(self.array.cache_page(id, buf).map_err(Failure::from))
    }

    /// Drop a page from the page cache.
    pub fn uncache_page(&self, id: PageId) -> Result<()> {
        self.check_open()?;
        Self::check_id(id)?;
        self.settle(self.array.uncache_page(id).map_err(Failure::from))
    }

    /// Free a page. It becomes allocatable once the next commit completes.
    pub fn delete_page(&self, id: PageId) -> Result<()> {
        self.check_open()?;
        Self::check_id(id)?;
        {
            let _shared = self.commit_lock.acquire_shared();
            self.settle(self.manager.delete_page(id).classify())?;
        }
        self.settle(self.array.uncache_page(id).map_err(Failure::from))
    }

    /// Free a page for immediate reuse when no committed generation can
    /// reference it, otherwise delete it.
    pub fn recycle_page(&self, id: PageId) -> Result<()> {
        self.check_open()?;
        Self::check_id(id)?;
        {
            let _shared = self.commit_lock.acquire_shared();
            let result = match self.manager.recycle_page(id) {
                Err(Error::RecycleUnavailable(_)) => self.manager.delete_page(id),
                other => other,
            };
            self.settle(result.classify())?;
        }
        self.settle(self.array.uncache_page(id).map_err(Failure::from))
    }

    /// Grow the free list so that at least `count` pages are free, without
    /// touching the page contents. Returns the number of pages added.
    pub fn allocate_pages(&self, count: u64) -> Result<u64> {
        self.check_open()?;
        let count = count.saturating_sub(self.manager.stats().free_pages);

        for _ in 0..count {
            let _shared = self.commit_lock.acquire_shared();
            self.settle(self.manager.alloc_and_recycle_page().classify())?;
        }
        Ok(count)
    }

    /// Pointer to the page in memory when the array is memory mapped. None
    /// of the arrays in this crate are, so this returns `None`.
    pub fn direct_page_pointer(&self, id: PageId) -> Result<Option<NonNull<u8>>> {
        self.check_open()?;
        self.settle(self.array.direct_page_pointer(id).map_err(Failure::from))
    }

    /// Copy page `src` over page `dst`.
    pub fn copy_page(&self, src: PageId, dst: PageId) -> Result<()> {
        self.check_open()?;
        Self::check_id(dst)?;
        self.settle(self.array.copy_page(src, dst).map_err(Failure::from))
    }

    /// Offset of the extra data region within the header buffer passed to
    /// [`DurablePageStore::commit`].
    pub fn extra_commit_data_offset(&self) -> usize {
        StoreHeader::OFFSET_EXTRA
    }

    /// Durably advance to a new generation.
    ///
    /// `header` is a full page the caller owns across retries. The
    /// allocator fills its region, the callback may fill the extra data
    /// region, then the header is sealed and written. Pass `resume = true`
    /// to finish a commit whose callback failed recoverably, keeping the
    /// allocator state already in `header`.
    ///
    /// # Errors
    /// - Recoverable errors from the allocator or callback leave the store
    ///   usable
    /// - Anything else closes the store
    pub fn commit(
        &self,
        resume: bool,
        header: &mut [u8],
        callback: Option<&dyn CommitCallback>,
    ) -> Result<()> {
        self.check_open()?;
        if header.len() != self.page_size {
            return Err(Error::InvalidArgument(format!(
                "header buffer is {} bytes, page size is {}",
                header.len(),
                self.page_size
            )));
        }
        let result = self.commit_inner(resume, header, callback);
        self.settle(result)
    }

    fn commit_inner(
        &self,
        resume: bool,
        header: &mut [u8],
        callback: Option<&dyn CommitCallback>,
    ) -> std::result::Result<(), Failure> {
        // Exclusive only while claiming the number; the downgrade keeps
        // other commits out while letting page operations continue.
        let exclusive = self.commit_lock.acquire_exclusive();
        let commit_number = self.header.read().next();
        let _shared = exclusive.downgrade();

        if !resume {
            self.manager
                .commit_start(&mut header[StoreHeader::manager_range()])
                .classify()?;
        }
        if let Some(callback) = callback {
            callback.prepare(resume, header).classify()?;
        }

        self.commit_header(header, commit_number)?;
        self.manager
            .commit_end(&header[StoreHeader::manager_range()])?;
        Ok(())
    }

    fn commit_header(&self, header: &mut [u8], commit_number: CommitNumber) -> Result<()> {
        let checksum = StoreHeader::encode(header, self.page_size as u32, commit_number);
        let slot = commit_number.slot();

        // Data and metadata first; the header must never reference pages
        // that are not yet durable.
        self.array.sync(true)?;

        {
            let mut current = self.header.write();
            self.array.write_page(slot, header)?;
            *current = commit_number;
        }

        self.array.sync_page(slot)?;
        debug!(commit = %commit_number, slot = slot.0, checksum, "header committed");
        Ok(())
    }

    /// Copy the extra data of the current durable header into `buf`.
    pub fn read_extra_commit_data(&self, buf: &mut [u8]) -> Result<()> {
        self.check_open()?;
        if buf.len() > StoreHeader::EXTRA_SIZE {
            return Err(Error::InvalidArgument(format!(
                "extra commit data is {} bytes, buffer is {}",
                StoreHeader::EXTRA_SIZE,
                buf.len()
            )));
        }

        let result = {
            let current = self.header.read();
            let mut page = self.headers.acquire();
            self.array
                .read_page(current.slot(), &mut page)
                .map(|()| {
                    let start = StoreHeader::OFFSET_EXTRA;
                    buf.copy_from_slice(&page[start..start + buf.len()]);
                })
        };
        self.settle(result.map_err(Failure::from))
    }

    /// Begin compacting down to `target` pages. Returns false if the pages
    /// in use do not fit.
    pub fn compaction_start(&self, target: u64) -> Result<bool> {
        self.check_open()?;
        let _exclusive = self.commit_lock.acquire_exclusive();
        Ok(self.manager.compaction_start(target))
    }

    /// Reserve free pages at or above the compaction target.
    pub fn compaction_scan_free_list(&self) -> Result<bool> {
        self.check_open()?;
        let _shared = self.commit_lock.acquire_shared();
        Ok(self.manager.compaction_scan_free_list())
    }

    /// True once every page at or above the target is reserved. Reads
    /// allocator state only, so commits are not blocked.
    pub fn compaction_verify(&self) -> Result<bool> {
        self.check_open()?;
        Ok(self.manager.compaction_verify())
    }

    /// Finish compaction, shrinking the store on success.
    pub fn compaction_end(&self) -> Result<bool> {
        self.check_open()?;
        let _exclusive = self.commit_lock.acquire_exclusive();
        self.settle(self.manager.compaction_end().map_err(Failure::from))
    }

    /// Release trailing free pages back to the file system.
    pub fn truncate_pages(&self) -> Result<bool> {
        self.check_open()?;
        let _exclusive = self.commit_lock.acquire_exclusive();
        self.settle(self.manager.truncate_pages().map_err(Failure::from))
    }

    /// Start a snapshot of the current durable generation.
    pub fn begin_snapshot(&self) -> Result<Snapshot> {
        self.check_open()?;

        let result = {
            let current = self.header.read();
            let mut page = self.headers.acquire();
            self.array.read_page(current.slot(), &mut page).and_then(|()| {
                let page_count =
                    PageManager::read_total_page_count(&page[StoreHeader::manager_range()])?;
                let position = get_u64(&page, StoreHeader::OFFSET_EXTRA);
                Ok(self.array.begin_snapshot(page_count, position))
            })
        };
        self.settle(result.map_err(Failure::from))
    }

    /// Wrap `out` so that bytes written through it are encrypted, if the
    /// store has a cipher.
    pub fn encrypt(&self, out: Box<dyn Write + Send>) -> Result<Box<dyn Write + Send>> {
        match &self.crypto {
            Some(crypto) => crypto.encrypt_stream(out),
            None => Ok(out),
        }
    }

    /// Wrap `input` so that bytes read through it are decrypted, if the
    /// store has a cipher.
    pub fn decrypt(&self, input: Box<dyn Read + Send>) -> Result<Box<dyn Read + Send>> {
        match &self.crypto {
            Some(crypto) => crypto.decrypt_stream(input),
            None => Ok(input),
        }
    }

    /// Close the store and its page array. Uncommitted changes are lost.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!("closing page store");
        self.array.close(None)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Read and verify one header slot.
///
/// The outer error is an I/O failure; the inner one means the slot is
/// corrupt and the other slot may still be usable.
fn read_header(array: &dyn PageArray, slot: PageId) -> Result<Result<StoreHeader>> {
    let mut buf = [0u8; HEADER_SIZE];
    match array.read_page(slot, &mut buf) {
        Ok(()) => {}
        Err(e) if e.is_eof() => {
            return Ok(Err(Error::Corrupt("file is smaller than expected".into())));
        }
        Err(e) => return Err(e),
    }
    Ok(StoreHeader::decode(&buf))
}

/// Choose the header of the newest durable generation.
fn find_header(array: &dyn PageArray, page_size: u32) -> Result<(PageId, StoreHeader)> {
    let header0 = read_header(array, PageId::HEADER_0)?;

    let page_size0 = match &header0 {
        Ok(h) => h.page_size,
        Err(_) => page_size,
    };
    if page_size0 != page_size {
        return Err(Error::WrongPageSize {
            expected: page_size,
            actual: page_size0,
        });
    }

    let header1 = match read_header(array, PageId::HEADER_1)? {
        Ok(h) => h,
        Err(e1) => {
            return match header0 {
                Ok(h0) => {
                    warn!(error = %e1, "header slot 1 unusable, adopting slot 0");
                    Ok((PageId::HEADER_0, h0))
                }
                // Completely unusable
                Err(e0) => Err(e0),
            };
        }
    };

    if header1.page_size != page_size0 {
        return Err(Error::Corrupt(format!(
            "mismatched page sizes: {} != {}",
            page_size0, header1.page_size
        )));
    }

    let header0 = match header0 {
        Ok(h) => h,
        Err(e0) => {
            warn!(error = %e0, "header slot 0 unusable, adopting slot 1");
            return Ok((PageId::HEADER_1, header1));
        }
    };

    match header1.commit_number.compare(header0.commit_number) {
        Some(CmpOrdering::Greater) => Ok((PageId::HEADER_1, header1)),
        Some(CmpOrdering::Less) => Ok((PageId::HEADER_0, header0)),
        Some(CmpOrdering::Equal) => Err(Error::Corrupt(format!(
            "both headers have the same commit number: {}",
            header0.commit_number
        ))),
        None => Err(Error::Corrupt(format!(
            "header commit numbers are equidistant: {} and {}",
            header0.commit_number, header1.commit_number
        ))),
    }
}

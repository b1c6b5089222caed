//! Page allocator with a persisted free list.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::free_list::{decode_list_page, encode_list_page, entries_per_page, SubHeader};
use crate::common::{Error, PageId, Result};
use crate::storage::page::Page;
use crate::storage::PageArray;

/// Allocator counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageStats {
    /// Pages tracked by the allocator, header slots included.
    pub total_pages: u64,
    /// Pages that can be allocated right now.
    pub free_pages: u64,
}

impl fmt::Display for PageStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PageStats {{ total: {}, free: {} }}",
            self.total_pages, self.free_pages
        )
    }
}

struct Compaction {
    target: u64,
    /// Free ids at or above the target, withheld from allocation.
    reserve: BTreeSet<u64>,
}

struct State {
    total: u64,
    /// Allocatable now. Lowest id is handed out first.
    free: BTreeSet<u64>,
    /// Deleted during the current epoch.
    pending: BTreeSet<u64>,
    /// Deleted before the in-flight commit started; free once it ends.
    committing: BTreeSet<u64>,
    /// Allocated since the last commit ended and outside any commit. Never
    /// reachable from a committed generation, so safe to reuse at once.
    fresh: HashSet<u64>,
    /// Pages holding the free list of the last durable commit.
    list_pages: Vec<u64>,
    /// Pages holding the free list of the in-flight commit.
    tentative: Option<Vec<u64>>,
    page_limit: Option<u64>,
    compaction: Option<Compaction>,
}

impl State {
    fn new(total: u64, free: BTreeSet<u64>, list_pages: Vec<u64>) -> Self {
        Self {
            total,
            free,
            pending: BTreeSet::new(),
            committing: BTreeSet::new(),
            fresh: HashSet::new(),
            list_pages,
            tentative: None,
            page_limit: None,
            compaction: None,
        }
    }

    /// Lowest free id usable right now. During compaction, free ids at or
    /// above the target move to the reserve instead.
    fn take_free(&mut self) -> Option<u64> {
        while let Some(id) = self.free.pop_first() {
            match &mut self.compaction {
                Some(c) if id >= c.target => {
                    c.reserve.insert(id);
                }
                _ => return Some(id),
            }
        }
        None
    }

    fn grow(&mut self) -> Result<u64> {
        if let Some(limit) = self.page_limit {
            if self.total >= limit {
                return Err(Error::PageLimitExceeded { limit });
            }
        }
        Ok(self.grow_unchecked())
    }

    fn grow_unchecked(&mut self) -> u64 {
        let id = self.total;
        self.total += 1;
        id
    }

    /// Return an id to the allocatable pool.
    fn release(&mut self, id: u64) {
        match &mut self.compaction {
            Some(c) if id >= c.target => {
                c.reserve.insert(id);
            }
            _ => {
                self.free.insert(id);
            }
        }
    }

    fn is_unallocated(&self, id: u64) -> bool {
        self.free.contains(&id)
            || self.pending.contains(&id)
            || self.committing.contains(&id)
            || self.compaction.as_ref().is_some_and(|c| c.reserve.contains(&id))
            || self.list_pages.contains(&id)
            || self.tentative.as_ref().is_some_and(|t| t.contains(&id))
    }

    fn reserve_len(&self) -> usize {
        self.compaction.as_ref().map_or(0, |c| c.reserve.len())
    }
}

/// Tracks free and used pages, and persists the free list at every commit.
///
/// # Epochs
/// A deleted page is not reusable until the commit after its deletion has
/// completed: until then the last durable header may still reference it.
/// The free list written for commit `n` records every page that commit `n`
/// does not reference (free pages, pages deleted before the commit started,
/// and the pages holding the previous free list), so recovery to any durable
/// header never hands out a page the recovered generation still uses.
///
/// # Thread Safety
/// All state sits behind one `Mutex`. Free-list pages are written after the
/// lock is released; they are owned by the in-flight commit alone.
pub struct PageManager {
    array: Arc<dyn PageArray>,
    state: Mutex<State>,
}

impl PageManager {
    /// Allocator for a brand-new store: only the two header slots exist.
    pub fn create(array: Arc<dyn PageArray>) -> Self {
        Self {
            array,
            state: Mutex::new(State::new(2, BTreeSet::new(), Vec::new())),
        }
    }

    /// Restore an allocator from a committed sub-header, reading the free
    /// list chain it points to.
    ///
    /// # Errors
    /// - `Error::Corrupt` if the chain is damaged or inconsistent with the
    ///   sub-header
    pub fn open(array: Arc<dyn PageArray>, sub_header: &[u8]) -> Result<Self> {
        let sub = SubHeader::read_from(sub_header)?;
        let total = sub.total_pages;

        if total < 2 {
            return Err(Error::Corrupt(format!("total page count is {}", total)));
        }
        if sub.list_pages > total {
            return Err(Error::Corrupt(format!(
                "free list spans {} pages of {}",
                sub.list_pages, total
            )));
        }

        let mut page = Page::new(array.page_size());
        let mut list_pages = Vec::new();
        let mut entries = Vec::new();
        let mut next = sub.list_head;

        for _ in 0..sub.list_pages {
            if next < 2 || next >= total {
                return Err(Error::Corrupt(format!(
                    "free list link {} outside [2, {})",
                    next, total
                )));
            }

            let id = PageId::new(next);
            array.read_page(id, page.as_mut_slice()).map_err(|e| {
                if e.is_eof() {
                    Error::Corrupt(format!("free list {} lies beyond end of file", id))
                } else {
                    e
                }
            })?;

            list_pages.push(next);
            next = decode_list_page(id, page.as_slice(), &mut entries)?;
        }

        if next != 0 {
            return Err(Error::Corrupt("free list longer than recorded".into()));
        }
        if entries.len() as u64 != sub.free_entries {
            return Err(Error::Corrupt(format!(
                "free list holds {} entries, header records {}",
                entries.len(),
                sub.free_entries
            )));
        }

        let mut free = BTreeSet::new();
        for id in entries {
            if id < 2 || id >= total || list_pages.contains(&id) || !free.insert(id) {
                return Err(Error::Corrupt(format!("invalid free list entry {}", id)));
            }
        }

        Ok(Self {
            array,
            state: Mutex::new(State::new(total, free, list_pages)),
        })
    }

    /// Total page count recorded in a committed sub-header.
    pub fn read_total_page_count(sub_header: &[u8]) -> Result<u64> {
        Ok(SubHeader::read_from(sub_header)?.total_pages)
    }

    /// Allocate a page: the lowest free id, or a new id past the end.
    ///
    /// # Errors
    /// - `Error::PageLimitExceeded` (recoverable) if growing would pass the
    ///   page limit
    pub fn alloc_page(&self) -> Result<PageId> {
        let mut state = self.state.lock();
        let id = match state.take_free() {
            Some(id) => id,
            None => state.grow()?,
        };
        if state.tentative.is_none() {
            state.fresh.insert(id);
        }
        Ok(PageId::new(id))
    }

    /// Free a page once the next commit completes.
    ///
    /// # Errors
    /// - `Error::IllegalPageId` if `id` is a header slot or past the end
    /// - `Error::InvalidArgument` if the page is already free
    pub fn delete_page(&self, id: PageId) -> Result<()> {
        let mut state = self.state.lock();
        if id.0 < 2 || id.0 >= state.total {
            return Err(Error::IllegalPageId(id));
        }
        if state.is_unallocated(id.0) {
            return Err(Error::InvalidArgument(format!("{} is already free", id)));
        }

        state.fresh.remove(&id.0);
        state.pending.insert(id.0);
        Ok(())
    }

    /// Free a page for immediate reuse.
    ///
    /// # Errors
    /// - `Error::RecycleUnavailable` (recoverable) unless the page was
    ///   allocated after the last commit ended and outside any commit
    pub fn recycle_page(&self, id: PageId) -> Result<()> {
        let mut state = self.state.lock();
        if !state.fresh.remove(&id.0) {
            return Err(Error::RecycleUnavailable(id));
        }
        state.release(id.0);
        Ok(())
    }

    /// Grow the store by one page straight into the free set.
    pub fn alloc_and_recycle_page(&self) -> Result<()> {
        let mut state = self.state.lock();
        let id = state.grow()?;
        state.release(id);
        Ok(())
    }

    /// Begin a commit: persist the free list and fill `sub_header` (the
    /// allocator region of the new store header).
    ///
    /// Calling this again before [`PageManager::commit_end`] abandons the
    /// earlier attempt.
    pub fn commit_start(&self, sub_header: &mut [u8]) -> Result<()> {
        if sub_header.len() < crate::storage::StoreHeader::MANAGER_SIZE {
            return Err(Error::InvalidArgument("allocator sub-header too small".into()));
        }

        let page_size = self.array.page_size();
        let per_page = entries_per_page(page_size);

        let (list, entries, sub) = {
            let mut state = self.state.lock();

            if let Some(abandoned) = state.tentative.take() {
                for id in abandoned {
                    state.release(id);
                }
            }

            let pending = std::mem::take(&mut state.pending);
            state.committing.extend(pending);
            state.fresh.clear();

            let mut list = Vec::new();
            loop {
                let count = state.free.len()
                    + state.committing.len()
                    + state.reserve_len()
                    + state.list_pages.len();
                if list.len() >= count.div_ceil(per_page) {
                    break;
                }
                let id = match state.take_free() {
                    Some(id) => id,
                    None => state.grow_unchecked(),
                };
                list.push(id);
            }

            let mut entries: Vec<u64> = state
                .free
                .iter()
                .chain(&state.committing)
                .chain(state.list_pages.iter())
                .copied()
                .collect();
            if let Some(c) = &state.compaction {
                entries.extend(&c.reserve);
            }
            entries.sort_unstable();

            let sub = SubHeader {
                total_pages: state.total,
                list_head: list.first().copied().unwrap_or(0),
                list_pages: list.len() as u64,
                free_entries: entries.len() as u64,
            };

            state.tentative = Some(list.clone());
            (list, entries, sub)
        };

        let mut page = Page::new(page_size);
        let mut chunks = entries.chunks(per_page);
        for (i, id) in list.iter().enumerate() {
            let next = list.get(i + 1).copied().unwrap_or(0);
            encode_list_page(page.as_mut_slice(), next, chunks.next().unwrap_or(&[]));
            self.array.write_page(PageId::new(*id), page.as_slice())?;
        }

        sub.write_to(sub_header);
        debug!(
            total = sub.total_pages,
            free = sub.free_entries,
            list_pages = sub.list_pages,
            "free list persisted"
        );
        Ok(())
    }

    /// Finish a commit whose header is now durable.
    pub fn commit_end(&self, sub_header: &[u8]) -> Result<()> {
        let sub = SubHeader::read_from(sub_header)?;
        let mut state = self.state.lock();

        let Some(list) = state.tentative.take() else {
            return Ok(());
        };
        debug_assert_eq!(sub.list_head, list.first().copied().unwrap_or(0));

        let committing = std::mem::take(&mut state.committing);
        let old_list = std::mem::replace(&mut state.list_pages, list);
        for id in committing.into_iter().chain(old_list) {
            state.release(id);
        }
        Ok(())
    }

    /// Current page limit, in pages.
    pub fn page_limit(&self) -> Option<u64> {
        self.state.lock().page_limit
    }

    /// Cap the total page count, or lift the cap with `None`.
    pub fn set_page_limit(&self, limit: Option<u64>) {
        self.state.lock().page_limit = limit;
    }

    pub fn stats(&self) -> PageStats {
        let state = self.state.lock();
        PageStats {
            total_pages: state.total,
            free_pages: state.free.len() as u64,
        }
    }

    /// Mark every page id the allocator knows of.
    pub fn mark_all_pages(&self, pages: &mut BTreeSet<PageId>) {
        let total = self.state.lock().total;
        pages.extend((0..total).map(PageId::new));
    }

    /// Clear every page that is free. Pages awaiting a commit before they
    /// become free stay marked.
    pub fn trace_free_pages(&self, pages: &mut BTreeSet<PageId>) {
        let state = self.state.lock();
        for id in &state.free {
            pages.remove(&PageId::new(*id));
        }
        if let Some(c) = &state.compaction {
            for id in &c.reserve {
                pages.remove(&PageId::new(*id));
            }
        }
    }

    /// Begin compacting the store down to `target` pages. Free pages at or
    /// above the target stop being handed out.
    ///
    /// Returns false if a compaction is already running, the target is not
    /// below the current total, or the pages in use would not fit.
    pub fn compaction_start(&self, target: u64) -> bool {
        let mut state = self.state.lock();
        if state.compaction.is_some() || target < 2 || target >= state.total {
            return false;
        }

        let in_use = state.total - state.free.len() as u64;
        if in_use > target {
            return false;
        }

        let reserve = state.free.split_off(&target);
        debug!(target, total = state.total, reserved = reserve.len(), "compaction started");
        state.compaction = Some(Compaction { target, reserve });
        true
    }

    /// Move free pages at or above the target into the reserve. Returns
    /// false if no compaction is running.
    pub fn compaction_scan_free_list(&self) -> bool {
        let mut state = self.state.lock();
        let target = match &state.compaction {
            Some(c) => c.target,
            None => return false,
        };
        let high = state.free.split_off(&target);
        if let Some(c) = &mut state.compaction {
            c.reserve.extend(high);
        }
        true
    }

    /// True once every page at or above the target is reserved.
    pub fn compaction_verify(&self) -> bool {
        let state = self.state.lock();
        match &state.compaction {
            Some(c) => c.reserve.len() as u64 == state.total - c.target,
            None => false,
        }
    }

    /// Finish compaction. On success the store shrinks to the target;
    /// otherwise reserved pages return to the free set.
    pub fn compaction_end(&self) -> Result<bool> {
        let target = {
            let mut state = self.state.lock();
            let Some(c) = state.compaction.take() else {
                return Ok(false);
            };

            if c.reserve.len() as u64 != state.total - c.target {
                state.free.extend(c.reserve);
                debug!("compaction abandoned");
                return Ok(false);
            }

            state.total = c.target;
            c.target
        };

        if self.array.page_count()? > target {
            self.array.set_page_count(target)?;
        }
        debug!(total = target, "compaction finished");
        Ok(true)
    }

    /// Drop trailing free pages and shrink the page array to match. Returns
    /// true if anything was released.
    pub fn truncate_pages(&self) -> Result<bool> {
        let total = {
            let mut state = self.state.lock();
            if state.compaction.is_some() || state.tentative.is_some() {
                return Ok(false);
            }

            let before = state.total;
            while state.total > 2 {
                let last = state.total - 1;
                if !state.free.remove(&last) {
                    break;
                }
                state.total = last;
            }
            if state.total != before {
                debug!(from = before, to = state.total, "truncated free pages");
            }
            state.total
        };

        if self.array.page_count()? > total {
            self.array.set_page_count(total)?;
            return Ok(true);
        }
        Ok(false)
    }
}

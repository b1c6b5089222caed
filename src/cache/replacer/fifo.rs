//! FIFO (First-In-First-Out) replacement policy.

use std::collections::{HashSet, VecDeque};

use crate::common::PageId;

/// A simple FIFO eviction policy.
///
/// Evicts pages in the order they were added to the cache. Re-adding a
/// cached page does not move it.
pub struct FifoReplacer {
    /// Queue of page IDs in insertion order (front = oldest).
    queue: VecDeque<PageId>,

    /// Pages currently tracked. Queue entries not in this set are stale.
    in_queue: HashSet<PageId>,
}

impl FifoReplacer {
    /// Create a new FIFO replacer.
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            in_queue: HashSet::new(),
        }
    }

    /// Record that a page was inserted.
    ///
    /// For FIFO, only adds to queue if not already present.
    pub fn record_insert(&mut self, page_id: PageId) {
        if self.in_queue.insert(page_id) {
            self.queue.push_back(page_id);
        }
    }

    /// Select a victim page for eviction.
    ///
    /// Returns the oldest tracked page, or None if nothing is tracked.
    pub fn evict(&mut self) -> Option<PageId> {
        while let Some(page_id) = self.queue.pop_front() {
            if self.in_queue.remove(&page_id) {
                return Some(page_id);
            }
        }
        None
    }

    /// Stop tracking a page.
    ///
    /// The queue entry is left behind and skipped by [`FifoReplacer::evict`];
    /// stale entries are swept once they outnumber live ones.
    pub fn remove(&mut self, page_id: PageId) {
        if !self.in_queue.remove(&page_id) {
            return;
        }

        if self.queue.len() > 2 * self.in_queue.len() + 16 {
            let live = &self.in_queue;
            let mut seen = HashSet::with_capacity(live.len());
            self.queue.retain(|id| live.contains(id) && seen.insert(*id));
        }
    }

    /// Number of tracked pages.
    pub fn size(&self) -> usize {
        self.in_queue.len()
    }
}

impl Default for FifoReplacer {
    fn default() -> Self {
        Self::new()
    }
}

//! Page buffer pool.
//!
//! Scratch page buffers (header reads, decryption, restore copies) are taken
//! from a [`PagePool`] as [`PooledPage`] guards. The guard returns its buffer
//! to the pool when dropped, so every exit path, including early returns and
//! `?` propagation, releases the buffer.

use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;

use super::Page;

/// A bounded pool of equally sized page buffers.
///
/// # Thread Safety
/// The free list is guarded by a `Mutex`; buffers themselves are owned by
/// exactly one guard at a time.
pub struct PagePool {
    /// Size of every buffer handed out.
    page_size: usize,
    /// Maximum number of idle buffers retained.
    capacity: usize,
    /// Idle buffers (LIFO for cache locality).
    free: Mutex<Vec<Box<[u8]>>>,
}

impl PagePool {
    /// Create a pool of `page_size` buffers retaining at most `capacity`
    /// idle buffers.
    pub fn new(page_size: usize, capacity: usize) -> Self {
        Self {
            page_size,
            capacity,
            free: Mutex::new(Vec::new()),
        }
    }

    /// Size of the buffers in this pool.
    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Take a zeroed buffer from the pool, allocating if none are idle.
    pub fn acquire(&self) -> PooledPage<'_> {
        let data = match self.free.lock().pop() {
            Some(mut data) => {
                data.fill(0);
                data
            }
            None => Page::new(self.page_size).into_boxed(),
        };

        PooledPage {
            pool: self,
            data: Some(data),
        }
    }

    /// Number of idle buffers currently retained.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }

    fn release(&self, data: Box<[u8]>) {
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(data);
        }
    }
}

/// A page buffer borrowed from a [`PagePool`].
///
/// Derefs to `[u8]`. The buffer goes back to the pool on drop.
pub struct PooledPage<'a> {
    pool: &'a PagePool,
    /// `None` only transiently during `Drop`.
    data: Option<Box<[u8]>>,
}

impl Deref for PooledPage<'_> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledPage<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledPage<'_> {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            self.pool.release(data);
        }
    }
}

//! In-memory page array.

use std::io;

use parking_lot::RwLock;

use crate::common::config::check_page_size;
use crate::common::{Error, PageId, Result};
use crate::storage::page::Page;
use crate::storage::page_array::{check_full_page, check_partial_page, PageArray};

/// Volatile page storage.
///
/// Unwritten pages below the page count read as zeros. Closing is a no-op,
/// so a store can be dropped and reopened over the same array to exercise
/// recovery without touching the file system.
pub struct MemPageArray {
    page_size: usize,
    pages: RwLock<Vec<Option<Page>>>,
}

impl MemPageArray {
    /// Create an empty array.
    ///
    /// # Panics
    /// Panics if `page_size` is not a supported page size.
    pub fn new(page_size: usize) -> Self {
        assert!(check_page_size(page_size).is_ok(), "unsupported page size");
        Self {
            page_size,
            pages: RwLock::new(Vec::new()),
        }
    }
}

impl PageArray for MemPageArray {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn is_empty(&self) -> Result<bool> {
        Ok(self.pages.read().is_empty())
    }

    fn page_count(&self) -> Result<u64> {
        Ok(self.pages.read().len() as u64)
    }

    fn set_page_count(&self, count: u64) -> Result<()> {
        self.pages.write().resize_with(count as usize, || None);
        Ok(())
    }

    fn read_page(&self, id: PageId, buf: &mut [u8]) -> Result<()> {
        check_partial_page(self, buf)?;

        let pages = self.pages.read();
        match pages.get(id.0 as usize) {
            Some(Some(page)) => buf.copy_from_slice(&page.as_slice()[..buf.len()]),
            Some(None) => buf.fill(0),
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{} lies beyond end of array", id),
                )
                .into())
            }
        }
        Ok(())
    }

    fn write_page(&self, id: PageId, buf: &[u8]) -> Result<()> {
        check_full_page(self, buf)?;

        let index = id.0 as usize;
        let mut pages = self.pages.write();
        if index >= pages.len() {
            pages.resize_with(index + 1, || None);
        }
        match &mut pages[index] {
            Some(page) => page.as_mut_slice().copy_from_slice(buf),
            slot => *slot = Some(Page::from_slice(buf)),
        }
        Ok(())
    }

    fn sync(&self, _metadata: bool) -> Result<()> {
        Ok(())
    }

    fn close(&self, _cause: Option<&Error>) -> Result<()> {
        Ok(())
    }
}

//! Page identifier type.

use std::fmt;

/// Identifies a page by its ordinal position in the page array.
///
/// Pages 0 and 1 are the two header slots and are never handed out to
/// clients. With 64-bit IDs the address space is bounded by the backing
/// files, not by the identifier.
///
/// # Example
/// ```
/// use pagestore::PageId;
///
/// let page_id = PageId::new(42);
/// assert!(!page_id.is_header());
/// assert_eq!(page_id.0, 42);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u64);

impl PageId {
    /// Header slot 0.
    pub const HEADER_0: PageId = PageId(0);

    /// Header slot 1.
    pub const HEADER_1: PageId = PageId(1);

    /// First page that may hold client data.
    pub const FIRST_DATA: PageId = PageId(2);

    /// Create a new PageId.
    #[inline]
    pub fn new(id: u64) -> Self {
        PageId(id)
    }

    /// Check if this ID names one of the two header slots.
    #[inline]
    pub fn is_header(&self) -> bool {
        self.0 <= 1
    }

    /// Byte offset of this page within a single array of `page_size` pages.
    #[inline]
    pub fn offset(&self, page_size: usize) -> u64 {
        self.0 * page_size as u64
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Page({})", self.0)
    }
}

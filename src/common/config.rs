//! Configuration constants for the page store.

use super::{Error, Result};

/// Smallest supported page size in bytes.
///
/// This is also the size of the store header and the unit in which the
/// header is duplicated within a header page, matching the sector size of
/// most block devices.
pub const MINIMUM_PAGE_SIZE: usize = 512;

/// Size of the store header record in bytes.
pub const HEADER_SIZE: usize = 512;

/// Page size used when the caller does not pin one.
///
/// Matches the OS page size on most systems, so pages map cleanly onto the
/// file system allocation unit.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Largest supported page size. The header stores it as a `u32`.
pub const MAXIMUM_PAGE_SIZE: usize = (u32::MAX as usize) & !(MINIMUM_PAGE_SIZE - 1);

/// Sentinel stored at offset 0 of every valid header.
pub const MAGIC_NUMBER: u64 = 6529720411368701212;

/// Validate a page size.
///
/// A page size must be at least [`MINIMUM_PAGE_SIZE`], a multiple of it, and
/// fit in the header's 32-bit field.
pub fn check_page_size(page_size: usize) -> Result<()> {
    if page_size < MINIMUM_PAGE_SIZE
        || page_size % MINIMUM_PAGE_SIZE != 0
        || page_size > MAXIMUM_PAGE_SIZE
    {
        return Err(Error::InvalidPageSize(page_size));
    }
    Ok(())
}

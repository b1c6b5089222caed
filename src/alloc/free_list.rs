//! On-disk formats of the allocator: the sub-header stored inside the store
//! header, and the chained free-list pages it points to.

use crate::common::{Error, PageId, Result};
use crate::storage::header::{get_u32, get_u64, put_u32, put_u64};
use crate::storage::StoreHeader;

/// Allocator state persisted in the store header.
///
/// # Layout (140 bytes, little-endian)
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       8     total page count
/// 8       8     first free-list page (0 = none)
/// 16      8     number of free-list pages
/// 24      8     number of free entries
/// 32      108   reserved (zero)
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SubHeader {
    pub total_pages: u64,
    pub list_head: u64,
    pub list_pages: u64,
    pub free_entries: u64,
}

impl SubHeader {
    const OFFSET_TOTAL: usize = 0;
    const OFFSET_HEAD: usize = 8;
    const OFFSET_LIST_PAGES: usize = 16;
    const OFFSET_ENTRIES: usize = 24;

    pub fn write_to(&self, buf: &mut [u8]) {
        buf[..StoreHeader::MANAGER_SIZE].fill(0);
        put_u64(buf, Self::OFFSET_TOTAL, self.total_pages);
        put_u64(buf, Self::OFFSET_HEAD, self.list_head);
        put_u64(buf, Self::OFFSET_LIST_PAGES, self.list_pages);
        put_u64(buf, Self::OFFSET_ENTRIES, self.free_entries);
    }

    pub fn read_from(buf: &[u8]) -> Result<Self> {
        if buf.len() < StoreHeader::MANAGER_SIZE {
            return Err(Error::InvalidArgument(format!(
                "allocator sub-header is {} bytes, expected {}",
                buf.len(),
                StoreHeader::MANAGER_SIZE
            )));
        }

        Ok(Self {
            total_pages: get_u64(buf, Self::OFFSET_TOTAL),
            list_head: get_u64(buf, Self::OFFSET_HEAD),
            list_pages: get_u64(buf, Self::OFFSET_LIST_PAGES),
            free_entries: get_u64(buf, Self::OFFSET_ENTRIES),
        })
    }
}

/// Free-list page header size.
///
/// # Layout
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       8     next list page (0 = end of chain)
/// 8       4     entry count
/// 12      4     CRC32 of the page, this field zeroed
/// 16      8*n   free page ids
/// ```
const LIST_HEADER_SIZE: usize = 16;
const OFFSET_NEXT: usize = 0;
const OFFSET_COUNT: usize = 8;
const OFFSET_CRC: usize = 12;

/// Number of free ids one list page can hold.
pub(crate) fn entries_per_page(page_size: usize) -> usize {
    (page_size - LIST_HEADER_SIZE) / 8
}

/// Fill `page` with one link of the free-list chain.
pub(crate) fn encode_list_page(page: &mut [u8], next: u64, entries: &[u64]) {
    debug_assert!(entries.len() <= entries_per_page(page.len()));

    page.fill(0);
    put_u64(page, OFFSET_NEXT, next);
    put_u32(page, OFFSET_COUNT, entries.len() as u32);
    for (i, id) in entries.iter().enumerate() {
        put_u64(page, LIST_HEADER_SIZE + i * 8, *id);
    }

    let crc = list_page_checksum(page);
    put_u32(page, OFFSET_CRC, crc);
}

/// Decode one link of the chain, appending its entries to `out`. Returns the
/// next page id (0 at the end of the chain).
pub(crate) fn decode_list_page(id: PageId, page: &[u8], out: &mut Vec<u64>) -> Result<u64> {
    let stored = get_u32(page, OFFSET_CRC);
    let computed = list_page_checksum(page);
    if stored != computed {
        return Err(Error::Corrupt(format!(
            "free list {} checksum mismatch: {:#010x} != {:#010x}",
            id, computed, stored
        )));
    }

    let count = get_u32(page, OFFSET_COUNT) as usize;
    if count > entries_per_page(page.len()) {
        return Err(Error::Corrupt(format!(
            "free list {} claims {} entries",
            id, count
        )));
    }

    out.extend((0..count).map(|i| get_u64(page, LIST_HEADER_SIZE + i * 8)));
    Ok(get_u64(page, OFFSET_NEXT))
}

fn list_page_checksum(page: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&page[..OFFSET_CRC]);
    hasher.update(&[0u8; 4]);
    hasher.update(&page[OFFSET_CRC + 4..]);
    hasher.finalize()
}

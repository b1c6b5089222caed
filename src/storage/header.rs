//! Store header codec.
//!
//! Pages 0 and 1 of every store each hold a copy of the [`StoreHeader`]; the
//! copy for commit `n` lives in slot `n & 1`.

use crate::common::config::{HEADER_SIZE, MAGIC_NUMBER, MINIMUM_PAGE_SIZE};
use crate::common::{CommitNumber, Error, Result};

/// Decoded store header.
///
/// # Layout (512 bytes, little-endian)
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       8     magic number
/// 8       4     page size
/// 12      4     commit number
/// 16      4     checksum (CRC32)
/// 20      140   allocator sub-header
/// 160     96    reserved
/// 256     256   extra data (owned by the calling layer)
/// ```
///
/// # Checksum
/// The checksum covers the first 512 bytes with the checksum field itself
/// treated as zero.
///
/// # Duplication
/// When the page size is larger than 512 bytes, the encoded header is
/// replicated into every 512-byte sector of the page, so a torn multi-sector
/// write still leaves intact copies for repair tooling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreHeader {
    /// Page size the store was created with.
    pub page_size: u32,
    /// Commit number of the generation this header describes.
    pub commit_number: CommitNumber,
    /// Allocator sub-header, opaque to the header codec.
    pub manager: [u8; StoreHeader::MANAGER_SIZE],
    /// Extra data owned by the calling layer.
    pub extra: [u8; StoreHeader::EXTRA_SIZE],
}

impl StoreHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = HEADER_SIZE;

    pub const OFFSET_MAGIC: usize = 0;
    pub const OFFSET_PAGE_SIZE: usize = 8;
    pub const OFFSET_COMMIT_NUMBER: usize = 12;
    pub const OFFSET_CHECKSUM: usize = 16;
    pub const OFFSET_MANAGER: usize = 20;
    pub const MANAGER_SIZE: usize = 140;
    pub const OFFSET_EXTRA: usize = 256;
    pub const EXTRA_SIZE: usize = 256;

    /// Create a header with empty sub-header and extra data.
    pub fn new(page_size: u32, commit_number: CommitNumber) -> Self {
        Self {
            page_size,
            commit_number,
            manager: [0u8; Self::MANAGER_SIZE],
            extra: [0u8; Self::EXTRA_SIZE],
        }
    }

    /// Byte range of the allocator sub-header within a header buffer.
    #[inline]
    pub fn manager_range() -> std::ops::Range<usize> {
        Self::OFFSET_MANAGER..Self::OFFSET_MANAGER + Self::MANAGER_SIZE
    }

    /// Byte range of the extra data within a header buffer.
    #[inline]
    pub fn extra_range() -> std::ops::Range<usize> {
        Self::OFFSET_EXTRA..Self::OFFSET_EXTRA + Self::EXTRA_SIZE
    }

    /// Write every field into `page` and seal it with [`StoreHeader::encode`].
    ///
    /// # Panics
    /// Panics if `page.len() < StoreHeader::SIZE`.
    pub fn write_to(&self, page: &mut [u8]) -> u32 {
        assert!(page.len() >= Self::SIZE, "buffer too small for StoreHeader");

        page[Self::manager_range()].copy_from_slice(&self.manager);
        page[Self::extra_range()].copy_from_slice(&self.extra);
        Self::encode(page, self.page_size, self.commit_number)
    }

    /// Stamp magic number, page size and commit number into a header page
    /// whose sub-header and extra data are already in place, compute the
    /// checksum, and duplicate the header into every 512-byte sector of the
    /// page. Returns the checksum.
    ///
    /// # Panics
    /// Panics if `page.len() < StoreHeader::SIZE`.
    pub fn encode(page: &mut [u8], page_size: u32, commit_number: CommitNumber) -> u32 {
        assert!(page.len() >= Self::SIZE, "buffer too small for StoreHeader");

        put_u64(page, Self::OFFSET_MAGIC, MAGIC_NUMBER);
        put_u32(page, Self::OFFSET_PAGE_SIZE, page_size);
        put_u32(page, Self::OFFSET_COMMIT_NUMBER, commit_number.0);

        let checksum = Self::compute_checksum(page);
        put_u32(page, Self::OFFSET_CHECKSUM, checksum);

        let dup_count = page.len() / MINIMUM_PAGE_SIZE;
        for i in 1..dup_count {
            page.copy_within(0..Self::SIZE, i * MINIMUM_PAGE_SIZE);
        }

        checksum
    }

    /// Decode a header, verifying magic number and checksum.
    ///
    /// # Errors
    /// - `Error::Corrupt` if the buffer is short, the magic number is wrong, or
    ///   the checksum does not match
    pub fn decode(page: &[u8]) -> Result<Self> {
        if page.len() < Self::SIZE {
            return Err(Error::Corrupt(format!(
                "header is {} bytes, expected {}",
                page.len(),
                Self::SIZE
            )));
        }

        let magic = Self::read_magic(page);
        if magic != MAGIC_NUMBER {
            return Err(Error::Corrupt(format!("wrong magic number: {}", magic)));
        }

        let stored = get_u32(page, Self::OFFSET_CHECKSUM);
        let computed = Self::compute_checksum(page);
        if stored != computed {
            return Err(Error::Corrupt(format!(
                "header checksum mismatch: {:#010x} != {:#010x}",
                computed, stored
            )));
        }

        let mut manager = [0u8; Self::MANAGER_SIZE];
        manager.copy_from_slice(&page[Self::manager_range()]);
        let mut extra = [0u8; Self::EXTRA_SIZE];
        extra.copy_from_slice(&page[Self::extra_range()]);

        Ok(Self {
            page_size: Self::read_page_size(page),
            commit_number: CommitNumber::new(get_u32(page, Self::OFFSET_COMMIT_NUMBER)),
            manager,
            extra,
        })
    }

    /// Decode a header and check that it declares `expected_page_size`.
    ///
    /// # Errors
    /// - `Error::Corrupt` as for [`StoreHeader::decode`]
    /// - `Error::WrongPageSize` if the declared page size differs
    pub fn verify(page: &[u8], expected_page_size: u32) -> Result<Self> {
        let header = Self::decode(page)?;
        if header.page_size != expected_page_size {
            return Err(Error::WrongPageSize {
                expected: expected_page_size,
                actual: header.page_size,
            });
        }
        Ok(header)
    }

    /// Compute the CRC32 of the first 512 bytes with the checksum field
    /// zeroed out.
    pub fn compute_checksum(page: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();

        hasher.update(&page[..Self::OFFSET_CHECKSUM]);

        // Skip checksum field by feeding zeros instead
        hasher.update(&[0u8; 4]);

        hasher.update(&page[Self::OFFSET_CHECKSUM + 4..Self::SIZE]);

        hasher.finalize()
    }

    /// Raw magic number field, without verification.
    #[inline]
    pub fn read_magic(page: &[u8]) -> u64 {
        get_u64(page, Self::OFFSET_MAGIC)
    }

    /// Raw page size field, without verification.
    #[inline]
    pub fn read_page_size(page: &[u8]) -> u32 {
        get_u32(page, Self::OFFSET_PAGE_SIZE)
    }
}

pub(crate) fn get_u32(data: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

pub(crate) fn get_u64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

pub(crate) fn put_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_u64(data: &mut [u8], offset: usize, value: u64) {
    data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

// ============================================================================
// TESTS
// ============================================================================

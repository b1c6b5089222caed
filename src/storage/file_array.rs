//! File page array - page I/O over a single file.
//!
//! The [`FilePageArray`] handles all direct file operations:
//! - Reading and writing pages
//! - Growing and truncating the file
//! - Data and metadata syncs

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::common::config::check_page_size;
use crate::common::{Error, PageId, Result};
use crate::storage::page_array::{check_full_page, check_partial_page, PageArray};

/// Page storage backed by one file.
///
/// # File Layout
/// Pages are laid out sequentially:
/// ```text
/// ┌──────────┬──────────┬─────────┬─────────┬─────────┐
/// │ Header 0 │ Header 1 │ Page 2  │  ...    │ Page N  │
/// └──────────┴──────────┴─────────┴─────────┴─────────┘
/// Offset:  0    page_size   2×page_size  ...   N×page_size
/// ```
///
/// # Thread Safety
/// The file handle is behind a `Mutex`, so seek + read/write pairs are
/// atomic with respect to each other. Closing drops the handle; every later
/// call fails with `Error::Closed`.
///
/// # Durability
/// Writes are not synced individually. The store decides when to call
/// [`PageArray::sync`] and [`PageArray::sync_page`].
pub struct FilePageArray {
    file: Mutex<Option<File>>,
    path: PathBuf,
    page_size: usize,
}

impl FilePageArray {
    /// Open a page file.
    ///
    /// With `create` the file is created if missing; otherwise it must exist.
    ///
    /// # Errors
    /// - `Error::InvalidPageSize` for an unsupported page size
    /// - I/O errors from opening the file
    pub fn open<P: AsRef<Path>>(path: P, page_size: usize, create: bool) -> Result<Self> {
        check_page_size(page_size)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(path.as_ref())?;

        Ok(Self {
            file: Mutex::new(Some(file)),
            path: path.as_ref().to_path_buf(),
            page_size,
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total size of the backing file in bytes.
    pub fn file_size(&self) -> Result<u64> {
        self.with_file(|file| Ok(file.metadata()?.len()))
    }

    pub fn is_closed(&self) -> bool {
        self.file.lock().is_none()
    }

    fn with_file<T>(&self, f: impl FnOnce(&mut File) -> Result<T>) -> Result<T> {
        match self.file.lock().as_mut() {
            Some(file) => f(file),
            None => Err(Error::Closed),
        }
    }
}

impl PageArray for FilePageArray {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn is_empty(&self) -> Result<bool> {
        Ok(self.file_size()? == 0)
    }

    fn page_count(&self) -> Result<u64> {
        let size = self.file_size()?;
        Ok(size.div_ceil(self.page_size as u64))
    }

    fn set_page_count(&self, count: u64) -> Result<()> {
        let len = count * self.page_size as u64;
        self.with_file(|file| Ok(file.set_len(len)?))
    }

    fn read_page(&self, id: PageId, buf: &mut [u8]) -> Result<()> {
        check_partial_page(self, buf)?;

        self.with_file(|file| {
            file.seek(SeekFrom::Start(id.offset(self.page_size)))?;
            file.read_exact(buf).map_err(|e| {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    io::Error::new(e.kind(), format!("{} lies beyond end of file", id)).into()
                } else {
                    Error::Io(e)
                }
            })
        })
    }

    fn write_page(&self, id: PageId, buf: &[u8]) -> Result<()> {
        check_full_page(self, buf)?;

        self.with_file(|file| {
            file.seek(SeekFrom::Start(id.offset(self.page_size)))?;
            file.write_all(buf)?;
            Ok(())
        })
    }

    fn sync(&self, metadata: bool) -> Result<()> {
        self.with_file(|file| {
            if metadata {
                file.sync_all()?;
            } else {
                file.sync_data()?;
            }
            Ok(())
        })
    }

    fn close(&self, _cause: Option<&Error>) -> Result<()> {
        drop(self.file.lock().take());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PAGE: usize = 4096;

    #[test]
    fn test_create_new_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let array = FilePageArray::open(&path, PAGE, true).unwrap();
        assert!(array.is_empty().unwrap());
        assert_eq!(array.page_count().unwrap(), 0);
        assert_eq!(array.path(), path.as_path());
    }

    #[test]
    fn test_open_nonexistent_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nonexistent.db");

        assert!(FilePageArray::open(&path, PAGE, false).is_err());
    }

    #[test]
    fn test_invalid_page_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        assert!(matches!(
            FilePageArray::open(&path, 1000, true),
            Err(Error::InvalidPageSize(1000))
        ));
    }

    #[test]
    fn test_write_and_read_page() {
        let dir = tempdir().unwrap();
        let array = FilePageArray::open(dir.path().join("test.db"), PAGE, true).unwrap();

        let mut page = vec![0u8; PAGE];
        page[0] = 0xAB;
        page[100] = 0xCD;
        page[4095] = 0xEF;
        array.write_page(PageId::new(3), &page).unwrap();

        assert_eq!(array.page_count().unwrap(), 4);

        let mut read = vec![0u8; PAGE];
        array.read_page(PageId::new(3), &mut read).unwrap();
        assert_eq!(read, page);

        // Pages skipped over read back as zeros
        array.read_page(PageId::new(1), &mut read).unwrap();
        assert!(read.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_partial_read() {
        let dir = tempdir().unwrap();
        let array = FilePageArray::open(dir.path().join("test.db"), PAGE, true).unwrap();

        let mut page = vec![0u8; PAGE];
        page[10] = 0x42;
        array.write_page(PageId::new(0), &page).unwrap();

        let mut prefix = [0u8; 512];
        array.read_page(PageId::new(0), &mut prefix).unwrap();
        assert_eq!(prefix[10], 0x42);
    }

    #[test]
    fn test_read_beyond_end_is_eof() {
        let dir = tempdir().unwrap();
        let array = FilePageArray::open(dir.path().join("test.db"), PAGE, true).unwrap();

        let mut buf = vec![0u8; PAGE];
        let err = array.read_page(PageId::new(5), &mut buf).unwrap_err();
        assert!(err.is_eof());
    }

    #[test]
    fn test_write_requires_full_page() {
        let dir = tempdir().unwrap();
        let array = FilePageArray::open(dir.path().join("test.db"), PAGE, true).unwrap();

        let result = array.write_page(PageId::new(2), &[0u8; 100]);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let array = FilePageArray::open(&path, PAGE, true).unwrap();
            let mut page = vec![0u8; PAGE];
            page[0] = 0x42;
            array.write_page(PageId::new(2), &page).unwrap();
            array.sync(true).unwrap();
        }

        {
            let array = FilePageArray::open(&path, PAGE, false).unwrap();
            assert_eq!(array.page_count().unwrap(), 3);

            let mut page = vec![0u8; PAGE];
            array.read_page(PageId::new(2), &mut page).unwrap();
            assert_eq!(page[0], 0x42);
        }
    }

    #[test]
    fn test_set_page_count() {
        let dir = tempdir().unwrap();
        let array = FilePageArray::open(dir.path().join("test.db"), PAGE, true).unwrap();

        array.set_page_count(10).unwrap();
        assert_eq!(array.page_count().unwrap(), 10);
        assert_eq!(array.file_size().unwrap(), 10 * PAGE as u64);

        array.set_page_count(2).unwrap();
        assert_eq!(array.page_count().unwrap(), 2);
    }

    #[test]
    fn test_copy_page() {
        let dir = tempdir().unwrap();
        let array = FilePageArray::open(dir.path().join("test.db"), PAGE, true).unwrap();

        let page = vec![0x5Au8; PAGE];
        array.write_page(PageId::new(2), &page).unwrap();
        array.copy_page(PageId::new(2), PageId::new(4)).unwrap();

        let mut read = vec![0u8; PAGE];
        array.read_page(PageId::new(4), &mut read).unwrap();
        assert_eq!(read, page);
    }

    #[test]
    fn test_closed_array_rejects_io() {
        let dir = tempdir().unwrap();
        let array = FilePageArray::open(dir.path().join("test.db"), PAGE, true).unwrap();

        array.close(None).unwrap();
        assert!(array.is_closed());
        array.close(None).unwrap();

        let mut buf = vec![0u8; PAGE];
        assert!(matches!(array.read_page(PageId::new(0), &mut buf), Err(Error::Closed)));
        assert!(matches!(array.write_page(PageId::new(2), &buf), Err(Error::Closed)));
        assert!(matches!(array.sync(false), Err(Error::Closed)));
        assert!(matches!(array.file_size(), Err(Error::Closed)));
    }

    #[test]
    fn test_close_releases_file_for_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let array = FilePageArray::open(&path, PAGE, true).unwrap();
        array.write_page(PageId::new(2), &vec![7u8; PAGE]).unwrap();

        assert!(!array.is_closed());
        array.close(None).unwrap();
        assert!(array.is_closed());

        let reopened = FilePageArray::open(&path, PAGE, false).unwrap();
        assert_eq!(reopened.page_count().unwrap(), 3);
    }
}

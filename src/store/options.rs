//! Store open options.

use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use super::durable::DurablePageStore;
use super::restore;
use crate::cache::{FifoPageCache, PageCache};
use crate::common::config::{check_page_size, DEFAULT_PAGE_SIZE};
use crate::common::{Error, Result};
use crate::storage::{Crypto, FilePageArray, PageArray, StripedPageArray};

/// Options for opening a file-backed [`DurablePageStore`].
///
/// # Example
///
/// ```rust,no_run
/// use pagestore::StoreOptions;
///
/// let store = StoreOptions::new()
///     .file("data/store.db")
///     .create(true)
///     .cache_capacity(1024)
///     .open()?;
/// # Ok::<(), pagestore::Error>(())
/// ```
#[derive(Clone)]
pub struct StoreOptions {
    /// Backing files. Several files stripe pages round robin.
    pub(crate) files: Vec<PathBuf>,
    /// Explicit page size. When unset an existing store's page size is
    /// discovered on open.
    pub(crate) page_size: Option<usize>,
    /// Create missing files.
    pub(crate) create: bool,
    /// Discard any existing content.
    pub(crate) destroy: bool,
    pub(crate) cache: Option<Arc<dyn PageCache>>,
    pub(crate) crypto: Option<Arc<dyn Crypto>>,
    pub(crate) page_limit: Option<u64>,
}

impl StoreOptions {
    /// Options with no files, default page size discovery, no cache and no
    /// cipher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            files: Vec::new(),
            page_size: None,
            create: false,
            destroy: false,
            cache: None,
            crypto: None,
            page_limit: None,
        }
    }

    /// Add a backing file.
    #[must_use]
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(path.into());
        self
    }

    /// Add several backing files.
    #[must_use]
    pub fn files<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.files.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Pin the page size. An existing store with a different page size then
    /// fails to open instead of being reopened at its own size.
    #[must_use]
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    #[must_use]
    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// Discard existing content and start a fresh store.
    #[must_use]
    pub fn destroy(mut self, destroy: bool) -> Self {
        self.destroy = destroy;
        self
    }

    /// Use a FIFO page cache holding up to `capacity` pages.
    #[must_use]
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache = Some(Arc::new(FifoPageCache::new(capacity)));
        self
    }

    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn PageCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Encrypt every page with `crypto`.
    #[must_use]
    pub fn crypto(mut self, crypto: Arc<dyn Crypto>) -> Self {
        self.crypto = Some(crypto);
        self
    }

    #[must_use]
    pub fn page_limit(mut self, limit: u64) -> Self {
        self.page_limit = Some(limit);
        self
    }

    /// Open the store, creating it if the files are empty.
    ///
    /// # Errors
    /// - `Error::InvalidArgument` if no file was given
    /// - `Error::InvalidPageSize` for an unsupported page size
    /// - `Error::WrongPageSize` if the page size was pinned and the store
    ///   declares another
    /// - Any recovery error from [`DurablePageStore::open`]
    pub fn open(&self) -> Result<DurablePageStore> {
        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);

        let store = match self.open_at(page_size) {
            Err(Error::WrongPageSize { expected, actual }) if self.page_size.is_none() => {
                warn!(expected, actual, "page size mismatch, reopening with stored size");
                self.open_at(actual as usize)?
            }
            other => other?,
        };

        if self.page_limit.is_some() {
            store.set_page_limit(self.page_limit);
        }
        Ok(store)
    }

    fn open_at(&self, page_size: usize) -> Result<DurablePageStore> {
        let raw = self.open_array(page_size, self.create)?;
        DurablePageStore::open(raw, self.cache.clone(), self.crypto.clone(), self.destroy)
    }

    /// Restore a snapshot stream into the configured files, which must be
    /// empty, and open the result.
    ///
    /// Without a cipher the page size is read from the stream. An encrypted
    /// stream's header is opaque, so the configured page size (or the
    /// default) is used.
    ///
    /// # Errors
    /// - `Error::RestoreTargetNotEmpty` if the files hold pages
    /// - `Error::Corrupt` if the stream is not a complete snapshot
    pub fn restore<R: Read>(&self, mut reader: R) -> Result<DurablePageStore> {
        let (prefix, page_size) = match self.crypto {
            Some(_) => (None, self.page_size.unwrap_or(DEFAULT_PAGE_SIZE)),
            None => {
                let (prefix, page_size) = restore::read_stream_header(&mut reader)?;
                (Some(prefix), page_size)
            }
        };

        let raw = self.open_array(page_size, true)?;
        let prefix: &[u8] = match &prefix {
            Some(bytes) => bytes,
            None => &[],
        };

        let store = restore::restore(
            raw,
            self.cache.clone(),
            self.crypto.clone(),
            prefix,
            &mut reader,
        )?;
        if self.page_limit.is_some() {
            store.set_page_limit(self.page_limit);
        }
        Ok(store)
    }

    fn open_array(&self, page_size: usize, create: bool) -> Result<Arc<dyn PageArray>> {
        check_page_size(page_size)?;

        match self.files.as_slice() {
            [] => Err(Error::InvalidArgument("no store files given".into())),
            [path] => Ok(Arc::new(FilePageArray::open(path, page_size, create)?)),
            paths => {
                let stripes = paths
                    .iter()
                    .map(|path| {
                        FilePageArray::open(path, page_size, create)
                            .map(|a| Arc::new(a) as Arc<dyn PageArray>)
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Arc::new(StripedPageArray::new(stripes)?))
            }
        }
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("files", &self.files)
            .field("page_size", &self.page_size)
            .field("create", &self.create)
            .field("destroy", &self.destroy)
            .field("cache", &self.cache.is_some())
            .field("crypto", &self.crypto.is_some())
            .field("page_limit", &self.page_limit)
            .finish()
    }
}

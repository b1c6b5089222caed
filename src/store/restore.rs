//! Restoring a store from a snapshot stream.

use std::io::{self, Read};
use std::sync::Arc;

use tracing::{info, warn};

use super::durable::DurablePageStore;
use crate::cache::PageCache;
use crate::common::config::{check_page_size, HEADER_SIZE, MAGIC_NUMBER};
use crate::common::{Error, PageId, Result};
use crate::storage::page::Page;
use crate::storage::{Crypto, PageArray, StoreHeader};

/// Outcome of filling one buffer from a snapshot stream.
#[derive(Debug, PartialEq, Eq)]
enum Fill {
    /// The buffer was filled completely.
    Full,
    /// The stream ended before the first byte.
    End,
}

/// Fill `buf` from `reader`. A stream ending part way through is corrupt.
fn fill(reader: &mut dyn Read, buf: &mut [u8]) -> Result<Fill> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    if filled == buf.len() {
        Ok(Fill::Full)
    } else if filled == 0 {
        Ok(Fill::End)
    } else {
        Err(Error::Corrupt(format!(
            "snapshot ends {} bytes into a {} byte read",
            filled,
            buf.len()
        )))
    }
}

/// Copy pages from `reader` into `array` at sequential ids from 0. Page 0
/// starts with `prefix`, bytes already consumed from the stream. Returns the
/// number of pages written.
fn copy_pages(array: &dyn PageArray, prefix: &[u8], reader: &mut dyn Read) -> Result<u64> {
    let mut page = Page::new(array.page_size());
    let mut start = prefix.len();
    page.as_mut_slice()[..start].copy_from_slice(prefix);

    let mut count = 0u64;
    loop {
        match fill(reader, &mut page.as_mut_slice()[start..])? {
            Fill::Full => {}
            Fill::End if start == 0 => break,
            Fill::End => {
                return Err(Error::Corrupt(format!("snapshot truncated in page {}", count)));
            }
        }
        array.write_page(PageId::new(count), page.as_slice())?;
        count += 1;
        start = 0;
    }

    if count < 2 {
        return Err(Error::Corrupt(format!(
            "snapshot holds {} pages, a store has at least 2",
            count
        )));
    }
    Ok(count)
}

/// Read the leading header bytes of an unencrypted snapshot and return them
/// with the page size they declare.
///
/// # Errors
/// - `Error::Corrupt` if the stream is empty or does not start with a store
///   header
pub(crate) fn read_stream_header(reader: &mut dyn Read) -> Result<([u8; HEADER_SIZE], usize)> {
    let mut prefix = [0u8; HEADER_SIZE];
    if fill(reader, &mut prefix)? == Fill::End {
        return Err(Error::Corrupt("snapshot is empty".into()));
    }

    let magic = StoreHeader::read_magic(&prefix);
    if magic != MAGIC_NUMBER {
        return Err(Error::Corrupt(format!("wrong magic number: {}", magic)));
    }

    let page_size = StoreHeader::read_page_size(&prefix) as usize;
    check_page_size(page_size)?;
    Ok((prefix, page_size))
}

/// Fill the empty `raw` array from a snapshot stream, then open a store over
/// it. `prefix` holds bytes of page 0 already taken from the stream.
pub(crate) fn restore(
    raw: Arc<dyn PageArray>,
    cache: Option<Arc<dyn PageCache>>,
    crypto: Option<Arc<dyn Crypto>>,
    prefix: &[u8],
    reader: &mut dyn Read,
) -> Result<DurablePageStore> {
    if !raw.is_empty()? {
        return Err(Error::RestoreTargetNotEmpty);
    }

    let copied = copy_pages(raw.as_ref(), prefix, reader).and_then(|count| {
        raw.sync(true)?;
        Ok(count)
    });

    let count = match copied {
        Ok(count) => count,
        Err(e) => {
            if let Err(close_err) = raw.close(Some(&e)) {
                warn!(error = %close_err, "failed to close page array");
            }
            return Err(e);
        }
    };

    info!(pages = count, page_size = raw.page_size(), "restored snapshot");
    DurablePageStore::open(raw, cache, crypto, false)
}

impl DurablePageStore {
    /// Rebuild a store from a [`Snapshot`](super::Snapshot) stream into an
    /// empty page array, then open it.
    ///
    /// The stream holds raw pages exactly as the source stored them, so
    /// `crypto` must match the source's cipher and `raw` its page size.
    ///
    /// # Errors
    /// - `Error::RestoreTargetNotEmpty` if `raw` already holds pages; the
    ///   array is left untouched
    /// - `Error::Corrupt` if the stream ends part way through a page, or the
    ///   restored headers fail recovery
    ///
    /// On any other error the array is closed.
    pub fn restore_from_snapshot<R: Read>(
        raw: Arc<dyn PageArray>,
        cache: Option<Arc<dyn PageCache>>,
        crypto: Option<Arc<dyn Crypto>>,
        mut reader: R,
    ) -> Result<Self> {
        restore(raw, cache, crypto, &[], &mut reader)
    }
}

//! Page encryption.
//!
//! A [`Crypto`] provider transforms whole pages and byte streams. The
//! [`CryptoPageArray`] wrapper applies it to every page passing through a
//! raw array, so everything above it works on plaintext.

use std::io::{Read, Write};
use std::sync::Arc;

use crate::common::{Error, PageId, Result};
use crate::storage::page::PagePool;
use crate::storage::page_array::{check_full_page, check_partial_page, PageArray};

/// Scratch buffers kept per wrapper.
const SCRATCH_BUFFERS: usize = 4;

/// Encryption provider.
///
/// Page transforms must be length preserving: `src` and `dst` are both
/// exactly one page. The page id is supplied so providers can derive a
/// per-page tweak.
pub trait Crypto: Send + Sync {
    /// Encrypt one page.
    fn encrypt_page(&self, id: PageId, src: &[u8], dst: &mut [u8]) -> Result<()>;

    /// Decrypt one page.
    fn decrypt_page(&self, id: PageId, src: &[u8], dst: &mut [u8]) -> Result<()>;

    /// Wrap a writer so bytes written through it are encrypted.
    fn encrypt_stream(&self, out: Box<dyn Write + Send>) -> Result<Box<dyn Write + Send>>;

    /// Wrap a reader so bytes read through it are decrypted.
    fn decrypt_stream(&self, input: Box<dyn Read + Send>) -> Result<Box<dyn Read + Send>>;
}

/// Page array that encrypts pages on the way down and decrypts them on the
/// way up.
pub struct CryptoPageArray {
    inner: Arc<dyn PageArray>,
    crypto: Arc<dyn Crypto>,
    scratch: PagePool,
}

impl CryptoPageArray {
    pub fn new(inner: Arc<dyn PageArray>, crypto: Arc<dyn Crypto>) -> Self {
        let scratch = PagePool::new(inner.page_size(), SCRATCH_BUFFERS);
        Self {
            inner,
            crypto,
            scratch,
        }
    }

    /// The wrapped array, holding ciphertext.
    pub fn inner(&self) -> &Arc<dyn PageArray> {
        &self.inner
    }
}

impl PageArray for CryptoPageArray {
    fn page_size(&self) -> usize {
        self.inner.page_size()
    }

    fn is_empty(&self) -> Result<bool> {
        self.inner.is_empty()
    }

    fn page_count(&self) -> Result<u64> {
        self.inner.page_count()
    }

    fn set_page_count(&self, count: u64) -> Result<()> {
        self.inner.set_page_count(count)
    }

    fn read_page(&self, id: PageId, buf: &mut [u8]) -> Result<()> {
        check_partial_page(self, buf)?;

        let mut cipher = self.scratch.acquire();
        self.inner.read_page(id, &mut cipher)?;

        if buf.len() == cipher.len() {
            return self.crypto.decrypt_page(id, &cipher, buf);
        }

        // Partial read: decrypt the whole page, hand back the prefix
        let mut plain = self.scratch.acquire();
        self.crypto.decrypt_page(id, &cipher, &mut plain)?;
        let len = buf.len();
        buf.copy_from_slice(&plain[..len]);
        Ok(())
    }

    fn write_page(&self, id: PageId, buf: &[u8]) -> Result<()> {
        check_full_page(self, buf)?;

        let mut cipher = self.scratch.acquire();
        self.crypto.encrypt_page(id, buf, &mut cipher)?;
        self.inner.write_page(id, &cipher)
    }

    fn evict_page(&self, id: PageId, buf: &[u8]) -> Result<()> {
        check_full_page(self, buf)?;

        let mut cipher = self.scratch.acquire();
        self.crypto.encrypt_page(id, buf, &mut cipher)?;
        self.inner.evict_page(id, &cipher)
    }

    fn sync(&self, metadata: bool) -> Result<()> {
        self.inner.sync(metadata)
    }

    fn sync_page(&self, id: PageId) -> Result<()> {
        self.inner.sync_page(id)
    }

    fn close(&self, cause: Option<&Error>) -> Result<()> {
        self.inner.close(cause)
    }
}

//! Striped page array - round-robin pages across several arrays.

use std::sync::Arc;

use crate::common::{Error, PageId, Result};
use crate::storage::page_array::PageArray;

/// Spreads pages across several arrays of equal page size.
///
/// Page `id` lives in stripe `id % n` at local page `id / n`:
/// ```text
/// stripe 0: 0  n   2n ...
/// stripe 1: 1  n+1 2n+1 ...
/// ```
pub struct StripedPageArray {
    stripes: Vec<Arc<dyn PageArray>>,
    page_size: usize,
}

impl StripedPageArray {
    /// Combine `stripes` into one array.
    ///
    /// # Errors
    /// - `Error::InvalidArgument` if no stripes are given or page sizes differ
    pub fn new(stripes: Vec<Arc<dyn PageArray>>) -> Result<Self> {
        let page_size = match stripes.first() {
            Some(first) => first.page_size(),
            None => return Err(Error::InvalidArgument("no stripes provided".into())),
        };

        if let Some(odd) = stripes.iter().find(|s| s.page_size() != page_size) {
            return Err(Error::InvalidArgument(format!(
                "mismatched stripe page sizes: {} != {}",
                odd.page_size(),
                page_size
            )));
        }

        Ok(Self { stripes, page_size })
    }

    /// Number of stripes.
    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    fn locate(&self, id: PageId) -> (&dyn PageArray, PageId) {
        let n = self.stripes.len() as u64;
        let stripe = &self.stripes[(id.0 % n) as usize];
        (stripe.as_ref(), PageId::new(id.0 / n))
    }
}

impl PageArray for StripedPageArray {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn is_empty(&self) -> Result<bool> {
        for stripe in &self.stripes {
            if !stripe.is_empty()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn page_count(&self) -> Result<u64> {
        let n = self.stripes.len() as u64;
        let mut count = 0;
        for (i, stripe) in self.stripes.iter().enumerate() {
            let local = stripe.page_count()?;
            if local > 0 {
                count = count.max((local - 1) * n + i as u64 + 1);
            }
        }
        Ok(count)
    }

    fn set_page_count(&self, count: u64) -> Result<()> {
        let n = self.stripes.len() as u64;
        for (i, stripe) in self.stripes.iter().enumerate() {
            let i = i as u64;
            let local = if count > i { (count - i).div_ceil(n) } else { 0 };
            stripe.set_page_count(local)?;
        }
        Ok(())
    }

    fn read_page(&self, id: PageId, buf: &mut [u8]) -> Result<()> {
        let (stripe, local) = self.locate(id);
        stripe.read_page(local, buf)
    }

    fn write_page(&self, id: PageId, buf: &[u8]) -> Result<()> {
        let (stripe, local) = self.locate(id);
        stripe.write_page(local, buf)
    }

    fn sync(&self, metadata: bool) -> Result<()> {
        for stripe in &self.stripes {
            stripe.sync(metadata)?;
        }
        Ok(())
    }

    fn sync_page(&self, id: PageId) -> Result<()> {
        let (stripe, local) = self.locate(id);
        stripe.sync_page(local)
    }

    fn close(&self, cause: Option<&Error>) -> Result<()> {
        let mut first_err = None;
        for stripe in &self.stripes {
            if let Err(e) = stripe.close(cause) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::io::{self, Read, Write};
use std::sync::Arc;

use pagestore::{Crypto, DurablePageStore, MemPageArray, PageId, Result};

/// Test cipher: XOR with a key derived from the page id.
pub struct XorCrypto {
    key: u8,
}

impl XorCrypto {
    pub fn new(key: u8) -> Self {
        Self { key }
    }

    fn page_key(&self, id: PageId) -> u8 {
        self.key ^ (id.0 as u8).wrapping_mul(31)
    }
}

impl Crypto for XorCrypto {
    fn encrypt_page(&self, id: PageId, src: &[u8], dst: &mut [u8]) -> Result<()> {
        let key = self.page_key(id);
        for (d, s) in dst.iter_mut().zip(src) {
            *d = s ^ key;
        }
        Ok(())
    }

    fn decrypt_page(&self, id: PageId, src: &[u8], dst: &mut [u8]) -> Result<()> {
        self.encrypt_page(id, src, dst)
    }

    fn encrypt_stream(&self, out: Box<dyn Write + Send>) -> Result<Box<dyn Write + Send>> {
        Ok(Box::new(XorWriter { inner: out, key: self.key }))
    }

    fn decrypt_stream(&self, input: Box<dyn Read + Send>) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(XorReader { inner: input, key: self.key }))
    }
}

struct XorWriter {
    inner: Box<dyn Write + Send>,
    key: u8,
}

impl Write for XorWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let masked: Vec<u8> = buf.iter().map(|b| b ^ self.key).collect();
        self.inner.write_all(&masked)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct XorReader {
    inner: Box<dyn Read + Send>,
    key: u8,
}

impl Read for XorReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        for b in &mut buf[..n] {
            *b ^= self.key;
        }
        Ok(n)
    }
}

/// A page whose bytes are derived from `seed`.
pub fn page_of(seed: u64, page_size: usize) -> Vec<u8> {
    (0..page_size)
        .map(|i| (seed.wrapping_mul(131).wrapping_add(i as u64 * 7) % 251) as u8)
        .collect()
}

/// Assert page `id` holds `page_of(seed, ..)`.
pub fn check_page(store: &DurablePageStore, id: PageId, seed: u64) {
    let mut buf = vec![0u8; store.page_size()];
    store.read_page(id, &mut buf).unwrap();
    assert_eq!(buf, page_of(seed, store.page_size()), "contents of {}", id);
}

/// Commit with a scratch header and no callback.
pub fn commit(store: &DurablePageStore) {
    let mut header = vec![0u8; store.page_size()];
    store.commit(false, &mut header, None).unwrap();
}

/// A fresh store over an in-memory array.
pub fn mem_store(page_size: usize) -> (DurablePageStore, Arc<MemPageArray>) {
    let raw = Arc::new(MemPageArray::new(page_size));
    let store = DurablePageStore::open(raw.clone(), None, None, false).unwrap();
    (store, raw)
}

/// Reopen a store over an existing in-memory array.
pub fn reopen(raw: &Arc<MemPageArray>) -> Result<DurablePageStore> {
    DurablePageStore::open(raw.clone(), None, None, false)
}

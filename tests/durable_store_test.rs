//! Integration tests for the durable page store.
//!
//! These run whole open / mutate / commit / reopen cycles against file and
//! in-memory arrays.

mod common;

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use common::{check_page, commit, mem_store, page_of, reopen, XorCrypto};
use pagestore::{Error, PageArray, PageId, StoreOptions};
use tempfile::tempdir;

/// Test data survives close and reopen of a file-backed store.
#[test]
fn test_file_store_persists_committed_pages() {
    let dir = tempdir().unwrap();
    let options = StoreOptions::new()
        .file(dir.path().join("store.db"))
        .create(true)
        .page_size(1024);

    let ids: Vec<PageId> = {
        let store = options.open().unwrap();
        let ids: Vec<PageId> = (0..20).map(|_| store.alloc_page().unwrap()).collect();
        for id in &ids {
            store.write_page(*id, &page_of(id.0, 1024)).unwrap();
        }
        commit(&store);
        store.close().unwrap();
        ids
    };

    let store = options.open().unwrap();
    for id in &ids {
        check_page(&store, *id, id.0);
    }
    assert_eq!(store.stats().total_pages, 22);
}

/// Test pages deleted before a commit are reused only after it.
#[test]
fn test_deleted_pages_reused_after_commit() {
    let (store, raw) = mem_store(512);
    let ids: Vec<PageId> = (0..4).map(|_| store.alloc_page().unwrap()).collect();
    commit(&store);

    store.delete_page(ids[1]).unwrap();
    let next = store.alloc_page().unwrap();
    assert!(!ids.contains(&next));
    commit(&store);

    assert_eq!(store.alloc_page().unwrap(), ids[1]);

    // The reuse is durable once committed
    commit(&store);
    drop(store);
    let store = reopen(&raw).unwrap();
    assert!(store.trace_pages().unwrap().contains(&ids[1]));
}

/// Test the free list survives reopen.
#[test]
fn test_free_list_survives_reopen() {
    let (store, raw) = mem_store(512);
    let ids: Vec<PageId> = (0..200).map(|_| store.alloc_page().unwrap()).collect();
    commit(&store);
    for id in ids.iter().step_by(2) {
        store.delete_page(*id).unwrap();
    }
    commit(&store);
    let before = store.stats();
    drop(store);

    let store = reopen(&raw).unwrap();
    assert_eq!(store.stats(), before);
    assert_eq!(before.free_pages, 100);

    // Lowest free page first
    assert_eq!(store.alloc_page().unwrap(), ids[0]);
}

/// Test extra commit data written by the callback is readable after reopen.
#[test]
fn test_callback_extra_data() {
    let (store, raw) = mem_store(512);
    let offset = store.extra_commit_data_offset();
    assert_eq!(offset, 256);

    let id = store.alloc_page().unwrap();
    let callback = |_resume: bool, header: &mut [u8]| -> pagestore::Result<()> {
        // Dirty pages become durable before the header
        store.write_page(id, &page_of(77, 512))?;
        header[offset..offset + 4].copy_from_slice(b"redo");
        Ok(())
    };

    let mut header = vec![0u8; 512];
    store.commit(false, &mut header, Some(&callback)).unwrap();
    drop(store);

    let store = reopen(&raw).unwrap();
    let mut extra = [0u8; 4];
    store.read_extra_commit_data(&mut extra).unwrap();
    assert_eq!(&extra, b"redo");
    check_page(&store, id, 77);
}

/// Test extra data reads are bounded by the extra data region.
#[test]
fn test_read_extra_commit_data_bounds() {
    let (store, _raw) = mem_store(512);
    let mut too_big = vec![0u8; 257];
    assert!(matches!(
        store.read_extra_commit_data(&mut too_big),
        Err(Error::InvalidArgument(_))
    ));
    assert!(!store.is_closed());
}

/// Test a header buffer of the wrong size is rejected without closing.
#[test]
fn test_commit_rejects_short_header() {
    let (store, _raw) = mem_store(1024);
    let mut header = vec![0u8; 512];
    assert!(matches!(
        store.commit(false, &mut header, None),
        Err(Error::InvalidArgument(_))
    ));
    assert!(!store.is_closed());
}

/// Test buffer size validation happens before any I/O.
#[test]
fn test_page_buffer_validation() {
    let (store, _raw) = mem_store(512);
    let id = store.alloc_page().unwrap();

    assert!(matches!(store.write_page(id, &[0u8; 100]), Err(Error::InvalidArgument(_))));
    let mut big = vec![0u8; 1024];
    assert!(matches!(store.read_page(id, &mut big), Err(Error::InvalidArgument(_))));

    // A partial read is fine
    store.write_page(id, &page_of(3, 512)).unwrap();
    let mut prefix = vec![0u8; 64];
    store.read_page(id, &mut prefix).unwrap();
    assert_eq!(prefix, page_of(3, 512)[..64]);
    assert!(!store.is_closed());
}

/// Test copy_page and header slots.
#[test]
fn test_copy_page() {
    let (store, _raw) = mem_store(512);
    let a = store.alloc_page().unwrap();
    let b = store.alloc_page().unwrap();
    store.write_page(a, &page_of(5, 512)).unwrap();

    store.copy_page(a, b).unwrap();
    check_page(&store, b, 5);

    assert!(matches!(store.copy_page(a, PageId::HEADER_1), Err(Error::IllegalPageId(_))));
}

/// Test compaction shrinks the store once the high pages are free.
#[test]
fn test_compaction_cycle() {
    let (store, raw) = mem_store(512);
    let ids: Vec<PageId> = (0..10).map(|_| store.alloc_page().unwrap()).collect();
    for id in &ids {
        store.write_page(*id, &page_of(id.0, 512)).unwrap();
    }
    commit(&store);

    for id in &ids[4..] {
        store.delete_page(*id).unwrap();
    }
    commit(&store);

    assert!(!store.compaction_start(2).unwrap());
    assert!(store.compaction_start(8).unwrap());
    assert!(store.compaction_scan_free_list().unwrap());

    // The old free list page sits above the target until a commit frees it
    assert!(!store.compaction_verify().unwrap());
    commit(&store);
    assert!(store.compaction_scan_free_list().unwrap());
    assert!(store.compaction_verify().unwrap());

    assert!(store.compaction_end().unwrap());
    assert_eq!(store.stats().total_pages, 8);
    assert_eq!(store.page_count().unwrap(), 8);
    commit(&store);
    drop(store);

    let store = reopen(&raw).unwrap();
    assert_eq!(store.stats().total_pages, 8);
    for id in &ids[..4] {
        check_page(&store, *id, id.0);
    }
}

/// Test an unfinished compaction gives its pages back.
#[test]
fn test_compaction_abandoned() {
    let (store, _raw) = mem_store(512);
    let ids: Vec<PageId> = (0..6).map(|_| store.alloc_page().unwrap()).collect();
    commit(&store);
    for id in &ids[3..] {
        store.delete_page(*id).unwrap();
    }
    commit(&store);
    let free_before = store.stats().free_pages;

    assert!(store.compaction_start(6).unwrap());
    assert!(!store.compaction_verify().unwrap());
    assert!(!store.compaction_end().unwrap());

    assert_eq!(store.stats().free_pages, free_before);
    assert!(!store.compaction_verify().unwrap());
}

/// Test truncation releases trailing free pages.
#[test]
fn test_truncate_pages() {
    let (store, raw) = mem_store(512);
    let ids: Vec<PageId> = (0..8).map(|_| store.alloc_page().unwrap()).collect();
    for id in &ids {
        store.write_page(*id, &page_of(id.0, 512)).unwrap();
    }
    commit(&store);
    for id in &ids[4..] {
        store.delete_page(*id).unwrap();
    }
    commit(&store);
    // The next commit releases the previous free list page
    commit(&store);

    assert!(store.truncate_pages().unwrap());
    assert!(!store.truncate_pages().unwrap());
    let total = store.stats().total_pages;
    assert!(total < 11);
    assert_eq!(raw.page_count().unwrap(), total);

    commit(&store);
    drop(store);
    let store = reopen(&raw).unwrap();
    for id in &ids[..4] {
        check_page(&store, *id, id.0);
    }
}

/// Test pages of an encrypted store are stored as ciphertext.
#[test]
fn test_encrypted_file_store() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("secret.db");
    let options = StoreOptions::new()
        .file(&path)
        .create(true)
        .page_size(512)
        .crypto(Arc::new(XorCrypto::new(0x5A)));

    let store = options.open().unwrap();
    let id = store.alloc_page().unwrap();
    store.write_page(id, &page_of(9, 512)).unwrap();
    commit(&store);
    store.close().unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let offset = id.0 as usize * 512;
    assert_ne!(&bytes[offset..offset + 512], &page_of(9, 512)[..]);

    let store = options.open().unwrap();
    check_page(&store, id, 9);
    store.close().unwrap();

    // Without the cipher neither header verifies
    let err = StoreOptions::new().file(&path).page_size(512).open().err().unwrap();
    assert!(matches!(err, Error::Corrupt(_)));
}

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Test stream wrapping follows the configured cipher.
#[test]
fn test_encrypt_decrypt_streams() {
    let raw = Arc::new(pagestore::MemPageArray::new(512));
    let store =
        pagestore::DurablePageStore::open(raw, None, Some(Arc::new(XorCrypto::new(0x33))), false)
            .unwrap();

    let sink = SharedBuf::default();
    let mut out = store.encrypt(Box::new(sink.clone())).unwrap();
    out.write_all(b"redo record").unwrap();
    out.flush().unwrap();
    drop(out);

    let cipher = sink.0.lock().unwrap().clone();
    assert_ne!(cipher, b"redo record");

    let mut input = store.decrypt(Box::new(std::io::Cursor::new(cipher))).unwrap();
    let mut plain = Vec::new();
    input.read_to_end(&mut plain).unwrap();
    assert_eq!(plain, b"redo record");

    // No cipher: pass through
    let (plain_store, _raw) = mem_store(512);
    let sink = SharedBuf::default();
    let mut out = plain_store.encrypt(Box::new(sink.clone())).unwrap();
    out.write_all(b"abc").unwrap();
    drop(out);
    assert_eq!(*sink.0.lock().unwrap(), b"abc");
}

/// Test a cache configured through the options serves evicted pages.
#[test]
fn test_cache_via_options() {
    let dir = tempdir().unwrap();
    let store = StoreOptions::new()
        .file(dir.path().join("cached.db"))
        .create(true)
        .page_size(512)
        .cache_capacity(16)
        .open()
        .unwrap();

    let id = store.alloc_page().unwrap();
    store.evict_page(id, &page_of(1, 512)).unwrap();
    check_page(&store, id, 1);
    check_page(&store, id, 1);

    let stats = store.cache_stats().unwrap();
    assert_eq!(stats.hits, 2);
}

/// Test recycling skips the commit wait only for pages allocated since the
/// last commit.
#[test]
fn test_recycle_fast_path() {
    let (store, _raw) = mem_store(512);
    let committed = store.alloc_page().unwrap();
    commit(&store);

    let scratch = store.alloc_page().unwrap();
    store.recycle_page(scratch).unwrap();
    assert_eq!(store.alloc_page().unwrap(), scratch);

    store.recycle_page(committed).unwrap();
    let pages = store.trace_pages().unwrap();
    assert!(pages.contains(&committed), "pending deletion still in use");
}

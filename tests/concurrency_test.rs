//! Concurrent page operations racing with commits.

mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{check_page, commit, mem_store, page_of, reopen};
use pagestore::{DurablePageStore, PageId};

const PAGE: usize = 512;

/// Test allocations, writes and deletes from several threads while another
/// thread commits, then a restart with an uncommitted epoch: committed pages
/// survive, pages from the lost epoch come back free.
#[test]
fn test_writers_race_committer() {
    let (store, raw) = mem_store(PAGE);
    let store = Arc::new(store);
    let stop = Arc::new(AtomicBool::new(false));

    let committer = {
        let store = Arc::clone(&store);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut commits = 0;
            while !stop.load(Ordering::Acquire) {
                commit(&store);
                commits += 1;
                thread::yield_now();
            }
            commits
        })
    };

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let mut live = Vec::new();
                for i in 0..100 {
                    let id = store.alloc_page().unwrap();
                    store.write_page(id, &page_of(id.0, PAGE)).unwrap();
                    live.push(id);

                    if (i + t) % 4 == 0 {
                        let victim = live.swap_remove(live.len() / 2);
                        store.delete_page(victim).unwrap();
                    }
                }
                live
            })
        })
        .collect();

    let mut live: Vec<PageId> = Vec::new();
    for writer in writers {
        live.extend(writer.join().unwrap());
    }

    // Two more commits guarantee one started after every writer finished
    let mark = store.commit_number().0;
    while store.commit_number().0 < mark + 2 {
        thread::yield_now();
    }
    stop.store(true, Ordering::Release);
    assert!(committer.join().unwrap() > 0);

    // No page was handed to two owners
    let unique: HashSet<PageId> = live.iter().copied().collect();
    assert_eq!(unique.len(), live.len());

    // Uncommitted epoch: fresh allocations and one deletion, never committed
    let lost: Vec<PageId> = (0..8)
        .map(|_| {
            let id = store.alloc_page().unwrap();
            store.write_page(id, &page_of(id.0, PAGE)).unwrap();
            id
        })
        .collect();
    store.delete_page(live[0]).unwrap();
    assert!(!store.is_closed());
    drop(store);

    let store = reopen(&raw).unwrap();
    let total = store.stats().total_pages;
    let in_use = store.trace_pages().unwrap();
    for id in &lost {
        assert!(!in_use.contains(id), "{} from a lost epoch still in use", id);
        assert!(!live.contains(id));
    }
    for id in &live {
        assert!(id.0 < total);
        assert!(in_use.contains(id), "{} lost", id);
        check_page(&store, *id, id.0);
    }
}

/// Test a thread holding the commit lock shared keeps a commit waiting.
#[test]
fn test_shared_hold_blocks_commit() {
    let (store, _raw) = mem_store(PAGE);
    let store = Arc::new(store);
    let before = store.commit_number();

    let shared = store.commit_lock().acquire_shared();
    let committer = {
        let store = Arc::clone(&store);
        thread::spawn(move || commit(&store))
    };

    thread::sleep(Duration::from_millis(50));
    assert_eq!(store.commit_number(), before);

    // Shared operations still proceed on this thread
    let id = store.alloc_page().unwrap();
    store.write_page(id, &page_of(1, PAGE)).unwrap();

    drop(shared);
    committer.join().unwrap();
    assert_eq!(store.commit_number(), before.next());
}

/// Test overlapping shared holders cannot keep a commit waiting
/// indefinitely: once the commit is queued, new shared holds wait behind it.
#[test]
fn test_overlapping_readers_admit_commit() {
    let (store, _raw) = mem_store(PAGE);
    let store = Arc::new(store);
    let stop = Arc::new(AtomicBool::new(false));
    let before = store.commit_number();

    let readers: Vec<_> = (0..2u64)
        .map(|r| {
            let store = Arc::clone(&store);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(3 * r));
                while !stop.load(Ordering::Acquire) {
                    let _shared = store.commit_lock().acquire_shared();
                    thread::sleep(Duration::from_millis(6));
                }
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(20));
    let started = Instant::now();
    commit(&store);
    let waited = started.elapsed();

    stop.store(true, Ordering::Release);
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(store.commit_number(), before.next());
    assert!(waited < Duration::from_secs(1), "commit waited {:?}", waited);
}

/// Test page operations issued from inside a commit callback.
#[test]
fn test_callback_reenters_store() {
    let (store, raw) = mem_store(PAGE);
    let store: Arc<DurablePageStore> = Arc::new(store);

    let callback = {
        let store = Arc::clone(&store);
        move |_: bool, _: &mut [u8]| -> pagestore::Result<()> {
            let id = store.alloc_page()?;
            store.write_page(id, &page_of(id.0, PAGE))?;
            Ok(())
        }
    };

    let mut header = vec![0u8; PAGE];
    store.commit(false, &mut header, Some(&callback)).unwrap();
    drop(callback);

    // The page allocated mid-commit belongs to the next generation
    let total = store.stats().total_pages;
    drop(store);
    let store = reopen(&raw).unwrap();
    assert!(store.stats().total_pages < total);
}

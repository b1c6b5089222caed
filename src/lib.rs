//! pagestore - A crash-safe page store with dual checksummed headers.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Calling layer (B-tree, redo log)            │
//! └─────────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Store (store/)                                                 │
//! │    DurablePageStore: recovery + commit protocol + CommitLock    │
//! │    Snapshot / restore                                           │
//! ├───────────────────────────────┬─────────────────────────────────┤
//! │  Allocator (alloc/)           │  Page cache (cache/)            │
//! │    PageManager + free list    │    FifoPageCache + CacheStats   │
//! ├───────────────────────────────┴─────────────────────────────────┤
//! │  Storage (storage/)                                             │
//! │    PageArray: File | Striped | Mem, CryptoPageArray wrapper     │
//! │    StoreHeader codec, Page buffers                              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (PageId, CommitNumber, Error, config)
//! - [`storage`] - Page arrays, page buffers and the header codec
//! - [`cache`] - Page cache with FIFO eviction
//! - [`alloc`] - Page allocation and the persisted free list
//! - [`store`] - The durable page store, snapshots and restore
//!
//! # Quick Start
//! ```no_run
//! use pagestore::StoreOptions;
//!
//! let store = StoreOptions::new().file("my_store.db").create(true).open()?;
//!
//! let id = store.alloc_page()?;
//! store.write_page(id, &vec![0u8; store.page_size()])?;
//!
//! let mut header = vec![0u8; store.page_size()];
//! store.commit(false, &mut header, None)?;
//! # Ok::<(), pagestore::Error>(())
//! ```

pub mod alloc;
pub mod cache;
pub mod common;
pub mod storage;
pub mod store;

// Re-export commonly used items at crate root for convenience
pub use common::config::DEFAULT_PAGE_SIZE;
pub use common::{CommitNumber, Error, PageId, Result};

pub use alloc::{PageManager, PageStats};
pub use cache::{CacheStats, CacheStatsSnapshot, FifoPageCache, PageCache};
pub use storage::{
    Crypto, CryptoPageArray, FilePageArray, MemPageArray, PageArray, StoreHeader, StripedPageArray,
};
pub use store::{CommitCallback, CommitLock, DurablePageStore, Snapshot, StoreOptions};

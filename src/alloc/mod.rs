//! Page allocation.
//!
//! The [`PageManager`] decides which page ids are free, keeps deleted pages
//! out of circulation until a commit makes their release durable, and
//! persists the free list as a chain of checksummed pages referenced from
//! the store header.

mod free_list;
mod page_manager;

pub use page_manager::{PageManager, PageStats};

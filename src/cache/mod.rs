//! Page cache - keeps recently evicted pages in memory.
//!
//! # Components
//! - [`PageCache`] - Cache interface consulted by the store
//! - [`FifoPageCache`] - Bounded cache with FIFO eviction
//! - [`FifoReplacer`] - The eviction policy
//! - [`CacheStats`] - Hit / miss / eviction counters

mod page_cache;
pub mod replacer;
mod stats;

pub use page_cache::{FifoPageCache, PageCache};
pub use replacer::FifoReplacer;
pub use stats::{CacheStats, CacheStatsSnapshot};

//! Page buffers.
//!
//! This module contains:
//! - [`Page`] - An owned page-sized buffer
//! - [`PagePool`] / [`PooledPage`] - Scoped scratch buffers returned on drop

#[allow(clippy::module_inception)]
mod page;
mod pool;

pub use page::Page;
pub use pool::{PagePool, PooledPage};

//! Storage layer - page arrays, page buffers and the header codec.
//!
//! This module handles persistent storage:
//! - [`PageArray`] - Fixed-size page storage abstraction
//! - [`FilePageArray`] / [`StripedPageArray`] / [`MemPageArray`] - Implementations
//! - [`CryptoPageArray`] - Transparent page encryption
//! - [`header`] - Store header codec
//! - [`page`] - Page buffers and the scratch pool

mod crypto;
mod file_array;
pub mod header;
mod mem_array;
pub mod page;
mod page_array;
mod striped_array;

pub use crypto::{Crypto, CryptoPageArray};
pub use file_array::FilePageArray;
pub use header::StoreHeader;
pub use mem_array::MemPageArray;
pub use page_array::PageArray;
pub(crate) use page_array::{check_full_page, check_partial_page};
pub use striped_array::StripedPageArray;

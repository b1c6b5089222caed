//! Common types and utilities shared across the page store.
//!
//! This module contains fundamental primitives used throughout the codebase:
//! - Configuration constants
//! - Error types
//! - Identifiers (PageId, CommitNumber)

mod commit_number;
pub mod config;
pub mod error;
mod page_id;

pub use commit_number::CommitNumber;
pub use error::{Error, Result};
pub use page_id::PageId;

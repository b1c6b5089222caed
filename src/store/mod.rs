//! Durable page store.
//!
//! # Components
//! - [`DurablePageStore`] - Recovery, page operations and the commit protocol
//! - [`CommitLock`] - Coordinates commits with page operations
//! - [`Snapshot`] - Point-in-time page stream, restorable into a new store
//! - [`StoreOptions`] - File-backed open and restore

mod array;
mod commit_lock;
mod durable;
mod failure;
mod options;
mod restore;
mod snapshot;

pub use commit_lock::{CommitLock, ExclusiveCommit, SharedCommit};
pub use durable::{CommitCallback, DurablePageStore};
pub use options::StoreOptions;
pub use snapshot::Snapshot;

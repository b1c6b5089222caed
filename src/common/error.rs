//! Error types for the page store.

use std::io;

use thiserror::Error;

use super::PageId;

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors raised by the page store and its collaborators.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from a page array.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The store header or allocator metadata failed verification.
    ///
    /// Not retryable on the same files without repair.
    #[error("corrupt store: {0}")]
    Corrupt(String),

    /// The stored header declares a different page size than the one the
    /// store was opened with.
    #[error("wrong page size: opened with {expected}, store declares {actual}")]
    WrongPageSize { expected: u32, actual: u32 },

    /// Page size is below the minimum, not sector aligned, or too large.
    #[error("invalid page size: {0}")]
    InvalidPageSize(usize),

    /// Page ID refers to a header slot or lies outside the allocated range.
    #[error("illegal page id: {0}")]
    IllegalPageId(PageId),

    /// Any other argument validation failure.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The allocator reached its configured page limit.
    #[error("page limit of {limit} pages reached")]
    PageLimitExceeded { limit: u64 },

    /// The page is reachable from a committed generation and must go through
    /// ordinary deletion instead.
    #[error("{0} cannot be recycled before the next commit")]
    RecycleUnavailable(PageId),

    /// A commit callback asked for the commit to be retried or resumed.
    #[error("commit aborted: {0}")]
    CommitAborted(String),

    /// A restore target already holds pages.
    #[error("cannot restore into a non-empty store")]
    RestoreTargetNotEmpty,

    /// Failure reported by the encryption provider.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// The store or page array has been closed.
    #[error("store is closed")]
    Closed,
}

impl Error {
    /// Returns true if the store stays usable after this error.
    ///
    /// Every other error raised inside a page operation or commit forces the
    /// store closed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::PageLimitExceeded { .. } | Error::RecycleUnavailable(_) | Error::CommitAborted(_)
        )
    }

    /// Returns true if this wraps an unexpected end of file.
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

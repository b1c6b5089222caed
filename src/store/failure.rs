//! Failure classification for store operations.
//!
//! Internal steps return `Result<T, Failure>`. A [`Failure::Fatal`] means
//! in-memory state may no longer match what is on disk, and the store must
//! be closed before the error reaches the caller. Only the store's top-level
//! handler acts on that; internal code never closes the store itself.

use crate::common::Error;

#[derive(Debug)]
pub(crate) enum Failure {
    /// The store stays usable; the caller may retry.
    Recoverable(Error),
    /// The store must be closed.
    Fatal(Error),
}

impl Failure {
    /// Classify an error by [`Error::is_recoverable`].
    pub fn classify(error: Error) -> Self {
        if error.is_recoverable() {
            Failure::Recoverable(error)
        } else {
            Failure::Fatal(error)
        }
    }

    pub fn into_error(self) -> Error {
        match self {
            Failure::Recoverable(e) | Failure::Fatal(e) => e,
        }
    }
}

/// Unclassified errors are fatal.
impl From<Error> for Failure {
    fn from(error: Error) -> Self {
        Failure::Fatal(error)
    }
}

/// Classify the error of a `Result` by recoverability.
pub(crate) trait Classify<T> {
    fn classify(self) -> Result<T, Failure>;
}

impl<T> Classify<T> for Result<T, Error> {
    fn classify(self) -> Result<T, Failure> {
        self.map_err(Failure::classify)
    }
}

//! Commit number type.

use std::cmp::Ordering;
use std::fmt;

use super::PageId;

/// Generation counter of the latest durable commit.
///
/// The counter is 32 bits wide and wraps, so two commit numbers are compared
/// by the sign of their wrapping difference rather than by `>`. The header
/// for commit `n` lives in slot `n & 1`.
///
/// # Example
/// ```
/// use pagestore::CommitNumber;
/// use std::cmp::Ordering;
///
/// let last = CommitNumber::new(u32::MAX);
/// let next = last.next();
/// assert_eq!(next, CommitNumber::new(0));
/// assert_eq!(next.compare(last), Some(Ordering::Greater));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommitNumber(pub u32);

impl CommitNumber {
    /// Value held by a fresh store before its first header commit.
    pub const BEFORE_FIRST: CommitNumber = CommitNumber(u32::MAX);

    /// Create a new CommitNumber.
    #[inline]
    pub fn new(n: u32) -> Self {
        CommitNumber(n)
    }

    /// The commit number that follows this one.
    #[inline]
    pub fn next(self) -> Self {
        CommitNumber(self.0.wrapping_add(1))
    }

    /// Header slot holding the header for this commit.
    #[inline]
    pub fn slot(self) -> PageId {
        PageId::new(u64::from(self.0 & 1))
    }

    /// Modulo comparison.
    ///
    /// Returns `None` when the two numbers are exactly 2^31 apart; a correct
    /// commit protocol never produces that pair.
    pub fn compare(self, other: CommitNumber) -> Option<Ordering> {
        let diff = self.0.wrapping_sub(other.0) as i32;
        if diff == i32::MIN {
            None
        } else {
            Some(diff.cmp(&0))
        }
    }
}

impl fmt::Display for CommitNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Commit({})", self.0)
    }
}

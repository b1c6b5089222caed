//! Commit coordination lock.

use std::cell::RefCell;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

thread_local! {
    /// Shared holds owned by this thread, as (lock address, depth).
    static HELD: RefCell<Vec<(usize, usize)>> = const { RefCell::new(Vec::new()) };
}

/// Shared / exclusive lock serializing commits against page operations.
///
/// Page operations hold it shared. A commit takes it exclusively only long
/// enough to claim the next commit number, then downgrades to shared for
/// the rest of its work, so one commit runs at a time while allocations
/// continue. Compaction start and end hold it exclusively.
///
/// A waiting exclusive request keeps new shared holders out, so a steady
/// stream of page operations cannot starve a commit. The one exception is a
/// thread that already holds the lock shared (a commit callback, say): it
/// may acquire it shared again, since blocking it would deadlock.
#[derive(Default)]
pub struct CommitLock {
    lock: RwLock<()>,
}

/// Shared hold on a [`CommitLock`].
#[must_use = "the lock is released when the guard is dropped"]
pub struct SharedCommit<'a> {
    owner: &'a CommitLock,
    _guard: RwLockReadGuard<'a, ()>,
}

/// Exclusive hold on a [`CommitLock`].
#[must_use = "the lock is released when the guard is dropped"]
pub struct ExclusiveCommit<'a> {
    owner: &'a CommitLock,
    guard: RwLockWriteGuard<'a, ()>,
}

impl CommitLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the lock is held shared.
    pub fn acquire_shared(&self) -> SharedCommit<'_> {
        let guard = if self.held_by_current_thread() {
            self.lock.read_recursive()
        } else {
            self.lock.read()
        };
        self.enter();
        SharedCommit {
            owner: self,
            _guard: guard,
        }
    }

    /// Block until the lock is held exclusively.
    pub fn acquire_exclusive(&self) -> ExclusiveCommit<'_> {
        ExclusiveCommit {
            owner: self,
            guard: self.lock.write(),
        }
    }

    /// Try to take the lock exclusively without blocking.
    pub fn try_acquire_exclusive(&self) -> Option<ExclusiveCommit<'_>> {
        self.lock
            .try_write()
            .map(|guard| ExclusiveCommit { owner: self, guard })
    }

    fn key(&self) -> usize {
        self as *const Self as usize
    }

    fn held_by_current_thread(&self) -> bool {
        let key = self.key();
        HELD.with(|held| held.borrow().iter().any(|&(k, _)| k == key))
    }

    fn enter(&self) {
        let key = self.key();
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            match held.iter_mut().find(|(k, _)| *k == key) {
                Some((_, depth)) => *depth += 1,
                None => held.push((key, 1)),
            }
        });
    }

    fn exit(&self) {
        let key = self.key();
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().position(|&(k, _)| k == key) {
                held[pos].1 -= 1;
                if held[pos].1 == 0 {
                    held.swap_remove(pos);
                }
            }
        });
    }
}

impl Drop for SharedCommit<'_> {
    fn drop(&mut self) {
        self.owner.exit();
    }
}

impl<'a> ExclusiveCommit<'a> {
    /// Trade the exclusive hold for a shared one without letting another
    /// exclusive holder in between.
    pub fn downgrade(self) -> SharedCommit<'a> {
        let owner = self.owner;
        let guard = RwLockWriteGuard::downgrade(self.guard);
        owner.enter();
        SharedCommit {
            owner,
            _guard: guard,
        }
    }
}

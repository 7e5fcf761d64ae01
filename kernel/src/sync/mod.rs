//! Synchronization primitives
//!
//! Semaphores, locks and condition variables for kernel threads. Their
//! state lives in the [`Scheduler`](crate::sched::Scheduler), which owns
//! every thread record the waiter lists refer to; the operations are
//! implemented as `Scheduler` methods in the submodules.
//!
//! Waiter lists are kept in priority order so the highest-priority waiter
//! is always woken first. Locks additionally feed the priority-donation
//! engine through their holder and waiter list.

pub mod condvar;
pub mod lock;
pub mod semaphore;

pub use condvar::Condvar;
pub use lock::Lock;
pub use semaphore::Semaphore;

use core::fmt;

/// Lock identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockId(pub u64);

/// Semaphore identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SemaphoreId(pub u64);

/// Condition variable identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CondvarId(pub u64);

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lock#{}", self.0)
    }
}

impl fmt::Display for SemaphoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sema#{}", self.0)
    }
}

impl fmt::Display for CondvarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cond#{}", self.0)
    }
}

/// Result of an operation that may have to wait.
///
/// `Blocked` means the calling thread was suspended and another thread is
/// now current. The operation completes on the caller's behalf before it is
/// dispatched again: a lock is handed over, a semaphore unit is passed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum AcquireOutcome {
    Acquired,
    Blocked,
}

//! Priority donation
//!
//! A thread blocked on a lock lends its effective priority to the holder,
//! and through the holder to whoever holds the lock the holder is blocked
//! on, and so on down the wait-for chain. Donations are never stored: a
//! thread's effective priority is always recomputable as
//!
//! ```text
//! priority = max(base_priority, max over held locks L of max(priority of L's waiters))
//! ```
//!
//! so releasing one of several held locks only needs a recomputation.
//! Under MLFQS none of this applies and these functions leave priorities
//! alone.

use log::debug;

use super::{scheduler::Scheduler, thread::ThreadId};
use crate::sync::LockId;

impl Scheduler {
    /// Raise `tid`'s effective priority to `priority` if that is higher.
    pub fn donate(&mut self, tid: ThreadId, priority: u8) {
        if self.is_mlfqs() {
            return;
        }
        if priority > self.priority_of(tid) {
            debug!("[DONATE] thread {} raised to {}", tid, priority);
            self.set_effective_priority(tid, priority);
        }
    }

    /// Highest effective priority among the waiters of locks `tid` holds.
    pub(crate) fn max_donation(&self, tid: ThreadId) -> u8 {
        let threads = &self.threads;
        self.thread_ref(tid)
            .held_locks
            .iter()
            .filter_map(|lock| self.locks.get(lock))
            .filter_map(|lock| lock.waiters.max_priority(|w| threads[&w].priority))
            .max()
            .unwrap_or(0)
    }

    /// Recompute `tid`'s effective priority from its base priority and its
    /// held locks. Returns true if it changed.
    pub(crate) fn recompute_priority(&mut self, tid: ThreadId) -> bool {
        if self.is_mlfqs() {
            return false;
        }
        let t = self.thread_ref(tid);
        let new = t.base_priority.max(self.max_donation(tid));
        if new == t.priority {
            return false;
        }
        self.set_effective_priority(tid, new);
        true
    }

    /// Holder of the lock `tid` is blocked on, if any.
    fn next_in_chain(&self, tid: ThreadId) -> Option<(LockId, ThreadId)> {
        let lock = self.thread_ref(tid).waiting_on?;
        match self.locks.get(&lock).and_then(|l| l.holder) {
            Some(holder) => Some((lock, holder)),
            None => panic!("thread {} waits on {} which has no holder", tid, lock),
        }
    }

    /// Assert a wait-for chain walk has not looped.
    fn check_chain_depth(&self, depth: usize, lock: LockId) {
        assert!(
            depth <= self.threads.len(),
            "wait-for cycle detected through {}",
            lock
        );
    }

    /// Push `donor`'s priority down its wait-for chain, stopping at the
    /// first holder that already runs at least that high.
    pub(crate) fn donate_along_chain(&mut self, donor: ThreadId) {
        if self.is_mlfqs() {
            return;
        }
        let mut donor = donor;
        let mut depth = 0;
        while let Some((lock, holder)) = self.next_in_chain(donor) {
            depth += 1;
            self.check_chain_depth(depth, lock);
            let priority = self.priority_of(donor);
            if self.priority_of(holder) >= priority {
                break;
            }
            self.donate(holder, priority);
            donor = holder;
        }
    }

    /// Recompute `tid` and then every holder down its wait-for chain until
    /// a priority stays the same. Handles both raises and drops.
    pub(crate) fn refresh_priority(&mut self, tid: ThreadId) {
        if !self.recompute_priority(tid) {
            return;
        }
        let mut cur = tid;
        let mut depth = 0;
        while let Some((lock, holder)) = self.next_in_chain(cur) {
            depth += 1;
            self.check_chain_depth(depth, lock);
            if !self.recompute_priority(holder) {
                break;
            }
            cur = holder;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{SchedConfig, SchedPolicy},
        sched::thread::ThreadState,
        sync::AcquireOutcome,
    };

    fn sched() -> Scheduler {
        Scheduler::new(SchedConfig::default()).unwrap()
    }

    #[test]
    fn test_single_donation_and_restore() {
        let mut s = sched();
        let main = s.current();
        let lock = s.lock_create();
        assert_eq!(s.lock_acquire(lock).unwrap(), AcquireOutcome::Acquired);

        let hi = s.create("hi", 40, None).unwrap();
        assert_eq!(s.current(), hi);
        assert_eq!(s.lock_acquire(lock).unwrap(), AcquireOutcome::Blocked);

        assert_eq!(s.current(), main);
        assert_eq!(s.get_priority(), 40);
        assert_eq!(s.current_thread().base_priority, 31);
        s.check_invariants();

        s.lock_release(lock).unwrap();
        assert_eq!(s.current(), hi, "the donor runs as soon as it gets the lock");
        assert_eq!(s.lock_holder(lock).unwrap(), Some(hi));
        assert_eq!(s.thread(main).unwrap().priority, 31);
        s.check_invariants();
    }

    #[test]
    fn test_multiple_locks_recompute_on_release() {
        let mut s = sched();
        let main = s.current();
        let a = s.lock_create();
        let b = s.lock_create();
        let _ = s.lock_acquire(a).unwrap();
        let _ = s.lock_acquire(b).unwrap();

        let t1 = s.create("t1", 35, None).unwrap();
        let _ = s.lock_acquire(a).unwrap();
        assert_eq!(s.current(), main);
        assert_eq!(s.get_priority(), 35);
        let t2 = s.create("t2", 45, None).unwrap();
        let _ = s.lock_acquire(b).unwrap();
        assert_eq!(s.current(), main);
        assert_eq!(s.get_priority(), 45);

        // Releasing b drops only the donation from t2.
        s.lock_release(b).unwrap();
        assert_eq!(s.current(), t2);
        s.lock_release(b).unwrap();
        s.exit(0);
        assert_eq!(s.current(), main);
        assert_eq!(s.get_priority(), 35);

        s.lock_release(a).unwrap();
        assert_eq!(s.current(), t1);
        assert_eq!(s.thread(main).unwrap().priority, 31);
        s.check_invariants();
    }

    #[test]
    fn test_nested_donation() {
        // main holds lock1; mid holds lock2 and waits on lock1; hi waits on
        // lock2. hi's priority reaches main through mid.
        let mut s = sched();
        let main = s.current();
        let lock1 = s.lock_create();
        let lock2 = s.lock_create();
        let _ = s.lock_acquire(lock1).unwrap();

        let mid = s.create("mid", 40, None).unwrap();
        assert_eq!(s.lock_acquire(lock2).unwrap(), AcquireOutcome::Acquired);
        assert_eq!(s.lock_acquire(lock1).unwrap(), AcquireOutcome::Blocked);
        assert_eq!(s.current(), main);
        assert_eq!(s.get_priority(), 40);

        let hi = s.create("hi", 50, None).unwrap();
        assert_eq!(s.current(), hi);
        assert_eq!(s.lock_acquire(lock2).unwrap(), AcquireOutcome::Blocked);

        assert_eq!(s.current(), main);
        assert_eq!(s.thread(mid).unwrap().priority, 50);
        assert_eq!(s.get_priority(), 50);
        s.check_invariants();

        s.lock_release(lock1).unwrap();
        assert_eq!(s.current(), mid);
        assert_eq!(s.thread(main).unwrap().priority, 31);
        assert_eq!(s.thread(main).unwrap().state, ThreadState::Ready);

        s.lock_release(lock2).unwrap();
        assert_eq!(s.current(), hi);
        assert_eq!(s.thread(mid).unwrap().priority, 40);
        s.check_invariants();
    }

    #[test]
    fn test_donation_to_ready_holder_reorders_ready_queue() {
        let mut s = sched();
        let main = s.current();
        let lock = s.lock_create();

        let low = s.create("low", 10, None).unwrap();
        let other = s.create("other", 20, None).unwrap();
        s.block(crate::sched::BlockReason::Other);
        // other (20) runs; low is ready behind it.
        assert_eq!(s.current(), other);
        s.block(crate::sched::BlockReason::Other);
        assert_eq!(s.current(), low);
        let _ = s.lock_acquire(lock).unwrap();

        s.unblock(main).unwrap();
        s.unblock(other).unwrap();
        s.yield_current();
        assert_eq!(s.current(), main);
        assert_eq!(s.lock_acquire(lock).unwrap(), AcquireOutcome::Blocked);

        // low now runs at 31, ahead of other.
        assert_eq!(s.current(), low);
        assert_eq!(s.get_priority(), 31);
        assert_eq!(s.ready_list(), [other]);
        s.check_invariants();
    }

    #[test]
    fn test_set_priority_below_donation_keeps_donation() {
        let mut s = sched();
        let main = s.current();
        let lock = s.lock_create();
        let _ = s.lock_acquire(lock).unwrap();
        let hi = s.create("hi", 45, None).unwrap();
        let _ = s.lock_acquire(lock).unwrap();
        assert_eq!(s.current(), main);

        s.set_priority(5);
        assert_eq!(s.current(), main);
        assert_eq!(s.get_priority(), 45);
        assert_eq!(s.current_thread().base_priority, 5);

        s.lock_release(lock).unwrap();
        assert_eq!(s.current(), hi);
        assert_eq!(s.thread(main).unwrap().priority, 5);
    }

    #[test]
    fn test_donate_only_raises() {
        let mut s = sched();
        let main = s.current();
        s.donate(main, 10);
        assert_eq!(s.get_priority(), 31);
    }

    #[test]
    fn test_no_donation_under_mlfqs() {
        let mut s = Scheduler::new(SchedConfig {
            policy: SchedPolicy::Mlfqs,
            ..SchedConfig::default()
        })
        .unwrap();
        let main = s.current();
        let lock = s.lock_create();
        let _ = s.lock_acquire(lock).unwrap();
        s.set_nice(20);
        let before = s.thread(main).unwrap().priority;

        // Inherits nice 20, so it does not preempt until main yields.
        let hi = s.create("hi", 0, None).unwrap();
        s.yield_current();
        assert_eq!(s.current(), hi);
        s.set_nice(-20);
        assert_eq!(s.get_priority(), 63);
        assert_eq!(s.lock_acquire(lock).unwrap(), AcquireOutcome::Blocked);
        assert_eq!(s.current(), main);
        assert_eq!(s.thread(main).unwrap().priority, before);
    }
}

//! Condition variables (Mesa semantics)
//!
//! A waiter atomically releases its lock and blocks. Signalling hands the
//! highest-priority waiter its lock back, directly if the lock is free or
//! through the lock's waiter queue otherwise, so by the time it runs again
//! it holds the lock once more. Being woken does not mean the condition still
//! holds; callers re-check it in a loop.

use alloc::collections::BTreeMap;

use log::trace;

use super::{AcquireOutcome, CondvarId, LockId};
use crate::{
    error::{KernelResult, SchedError},
    sched::{queue::WaitList, BlockReason, Scheduler, ThreadId, ThreadState},
};

/// Condition variable state
#[derive(Debug, Default)]
pub struct Condvar {
    /// Threads blocked in `cond_wait`, highest priority first
    pub(crate) waiters: WaitList,
    /// Lock each waiter gave up and must get back
    relock: BTreeMap<ThreadId, LockId>,
}

impl Scheduler {
    pub fn cond_create(&mut self) -> CondvarId {
        let id = CondvarId(self.alloc_sync_id());
        self.condvars.insert(id, Condvar::default());
        id
    }

    fn cond_mut(&mut self, id: CondvarId) -> KernelResult<&mut Condvar> {
        self.condvars
            .get_mut(&id)
            .ok_or_else(|| SchedError::CondvarNotFound { id: id.0 }.into())
    }

    fn assert_lock_held(&self, lock: LockId, op: &str) {
        assert!(
            self.lock_held_by_current(lock),
            "{}: thread {} does not hold {}",
            op,
            self.current(),
            lock
        );
    }

    /// Release `lock` and wait for a signal on `id`.
    ///
    /// Always blocks. The caller holds `lock` again when it next runs.
    pub fn cond_wait(&mut self, id: CondvarId, lock: LockId) -> KernelResult<AcquireOutcome> {
        assert!(!self.in_interrupt(), "cond_wait from interrupt context");
        self.cond_mut(id)?;
        self.assert_lock_held(lock, "cond_wait");

        let cur = self.current();
        self.release_lock(lock, cur);
        let threads = &self.threads;
        if let Some(cond) = self.condvars.get_mut(&id) {
            cond.waiters.insert_ordered(cur, |w| threads[&w].priority);
            cond.relock.insert(cur, lock);
        }
        self.block(BlockReason::Condvar(id));
        Ok(AcquireOutcome::Blocked)
    }

    /// Wake the highest-priority waiter on `id`, if any. The caller must
    /// hold `lock`.
    ///
    /// If the waiter's own lock is free it runs as soon as it outranks the
    /// caller.
    pub fn cond_signal(&mut self, id: CondvarId, lock: LockId) -> KernelResult<()> {
        if self.signal_one(id, lock)? {
            self.preempt_if_outranked();
        }
        Ok(())
    }

    /// Wake every waiter on `id`. The caller must hold `lock`.
    pub fn cond_broadcast(&mut self, id: CondvarId, lock: LockId) -> KernelResult<()> {
        let mut woke = false;
        while !self.cond_mut(id)?.waiters.is_empty() {
            woke |= self.signal_one(id, lock)?;
        }
        if woke {
            self.preempt_if_outranked();
        }
        Ok(())
    }

    /// Pop the top waiter and give it back its lock. Returns true if the
    /// waiter is ready to run.
    fn signal_one(&mut self, id: CondvarId, lock: LockId) -> KernelResult<bool> {
        self.assert_lock_held(lock, "cond_signal");
        let cond = self.cond_mut(id)?;
        let Some(waiter) = cond.waiters.pop_front() else {
            return Ok(false);
        };
        let relock = cond.relock.remove(&waiter).unwrap_or(lock);
        trace!("[SYNC] {} signals thread {}", id, waiter);
        Ok(self.requeue_on_lock(waiter, relock))
    }

    pub fn cond_waiter_count(&self, id: CondvarId) -> KernelResult<usize> {
        self.condvars
            .get(&id)
            .map(|c| c.waiters.len())
            .ok_or_else(|| SchedError::CondvarNotFound { id: id.0 }.into())
    }

    /// Move a signalled waiter from its condvar onto `lock`. A free lock is
    /// granted at once; a held one is waited for with donation.
    fn requeue_on_lock(&mut self, tid: ThreadId, lock: LockId) -> bool {
        let t = self.thread_mut(tid);
        debug_assert_eq!(t.state, ThreadState::Blocked);
        t.blocked_on = Some(BlockReason::Lock(lock));
        if self.locks.get(&lock).is_some_and(|l| l.holder.is_none()) {
            self.grant_lock(lock, tid);
            true
        } else {
            self.enqueue_lock_waiter(lock, tid);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{SchedConfig, SchedPolicy},
        sched::PRI_DEFAULT,
    };

    fn sched() -> Scheduler {
        Scheduler::new(SchedConfig::default()).unwrap()
    }

    #[test]
    fn test_wait_signal_reacquires_lock() {
        let mut s = sched();
        let main = s.current();
        let lock = s.lock_create();
        let cond = s.cond_create();

        let waiter = s.create("waiter", 40, None).unwrap();
        let _ = s.lock_acquire(lock).unwrap();
        assert_eq!(s.cond_wait(cond, lock).unwrap(), AcquireOutcome::Blocked);
        assert_eq!(s.current(), main);
        assert_eq!(s.lock_holder(lock).unwrap(), None);
        assert_eq!(s.cond_waiter_count(cond).unwrap(), 1);

        let _ = s.lock_acquire(lock).unwrap();
        s.cond_signal(cond, lock).unwrap();
        assert_eq!(s.current(), main);
        // The signalled waiter now donates to main through the lock.
        assert_eq!(s.get_priority(), 40);

        s.lock_release(lock).unwrap();
        assert_eq!(s.current(), waiter);
        assert!(s.lock_held_by_current(lock));
        s.check_invariants();
    }

    #[test]
    fn test_signal_wakes_highest_priority_first() {
        let mut s = sched();
        let main = s.current();
        let lock = s.lock_create();
        let cond = s.cond_create();

        let mut waiters = alloc::vec::Vec::new();
        for prio in [35, 45, 40] {
            let w = s.create("w", prio, None).unwrap();
            let _ = s.lock_acquire(lock).unwrap();
            let _ = s.cond_wait(cond, lock).unwrap();
            waiters.push(w);
        }
        assert_eq!(s.current(), main);

        let _ = s.lock_acquire(lock).unwrap();
        s.cond_signal(cond, lock).unwrap();
        s.lock_release(lock).unwrap();
        assert_eq!(s.current(), waiters[1]);
    }

    #[test]
    fn test_broadcast_wakes_all() {
        let mut s = sched();
        let main = s.current();
        let lock = s.lock_create();
        let cond = s.cond_create();
        for _ in 0..3 {
            s.create("w", 40, None).unwrap();
            let _ = s.lock_acquire(lock).unwrap();
            let _ = s.cond_wait(cond, lock).unwrap();
        }
        assert_eq!(s.current(), main);

        let _ = s.lock_acquire(lock).unwrap();
        s.cond_broadcast(cond, lock).unwrap();
        assert_eq!(s.cond_waiter_count(cond).unwrap(), 0);
        assert_eq!(s.locks[&lock].waiter_count(), 3);
        s.check_invariants();
    }

    #[test]
    fn test_signal_grants_free_lock_to_waiter() {
        let mut s = sched();
        let main = s.current();
        let waiter_lock = s.lock_create();
        let signal_lock = s.lock_create();
        let cond = s.cond_create();

        let waiter = s.create("waiter", 40, None).unwrap();
        let _ = s.lock_acquire(waiter_lock).unwrap();
        let _ = s.cond_wait(cond, waiter_lock).unwrap();
        assert_eq!(s.current(), main);

        let _ = s.lock_acquire(signal_lock).unwrap();
        s.cond_signal(cond, signal_lock).unwrap();
        // Nobody held the waiter's lock, so it runs at once and owns it.
        assert_eq!(s.current(), waiter);
        assert_eq!(s.lock_holder(waiter_lock).unwrap(), Some(waiter));
        assert_eq!(s.thread(main).unwrap().priority, PRI_DEFAULT);
        s.check_invariants();
    }

    #[test]
    fn test_signal_grants_free_lock_under_mlfqs() {
        let mut s = Scheduler::new(SchedConfig {
            policy: SchedPolicy::Mlfqs,
            ..SchedConfig::default()
        })
        .unwrap();
        let main = s.current();
        let waiter_lock = s.lock_create();
        let signal_lock = s.lock_create();
        let cond = s.cond_create();

        let waiter = s.create("waiter", 0, None).unwrap();
        s.yield_current();
        assert_eq!(s.current(), waiter);
        let _ = s.lock_acquire(waiter_lock).unwrap();
        let _ = s.cond_wait(cond, waiter_lock).unwrap();
        assert_eq!(s.current(), main);

        let _ = s.lock_acquire(signal_lock).unwrap();
        s.cond_broadcast(cond, signal_lock).unwrap();
        assert_eq!(s.lock_holder(waiter_lock).unwrap(), Some(waiter));
        assert_eq!(s.thread(waiter).unwrap().state, ThreadState::Ready);
        assert_eq!(s.ready_list(), [waiter]);
        s.check_invariants();
    }

    #[test]
    fn test_signal_without_waiters_is_noop() {
        let mut s = sched();
        let lock = s.lock_create();
        let cond = s.cond_create();
        let _ = s.lock_acquire(lock).unwrap();
        s.cond_signal(cond, lock).unwrap();
        assert!(s.lock_held_by_current(lock));
    }

    #[test]
    #[should_panic(expected = "does not hold")]
    fn test_wait_without_lock_is_fatal() {
        let mut s = sched();
        let lock = s.lock_create();
        let cond = s.cond_create();
        let _ = s.cond_wait(cond, lock);
    }
}

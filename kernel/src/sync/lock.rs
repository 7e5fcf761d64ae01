//! Sleeping locks with priority donation
//!
//! A lock is a binary semaphore with an owner. Only the holder may release
//! it and a holder may not acquire it again. While a thread waits for a
//! lock, its priority is donated to the holder (see
//! [`crate::sched::donation`]).

use log::trace;

use super::{AcquireOutcome, LockId};
use crate::{
    error::{KernelResult, SchedError},
    sched::{queue::WaitList, BlockReason, Scheduler, ThreadId},
};

/// Lock state
#[derive(Debug, Default)]
pub struct Lock {
    pub(crate) holder: Option<ThreadId>,
    /// Threads blocked in `lock_acquire`, highest priority first
    pub(crate) waiters: WaitList,
}

impl Lock {
    pub fn holder(&self) -> Option<ThreadId> {
        self.holder
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.len()
    }
}

impl Scheduler {
    pub fn lock_create(&mut self) -> LockId {
        let id = LockId(self.alloc_sync_id());
        self.locks.insert(id, Lock::default());
        id
    }

    fn lock_ref(&self, id: LockId) -> KernelResult<&Lock> {
        self.locks
            .get(&id)
            .ok_or_else(|| SchedError::LockNotFound { id: id.0 }.into())
    }

    /// Acquire `id`, blocking if it is held.
    ///
    /// On [`AcquireOutcome::Blocked`] the caller has donated its priority
    /// to the holder chain and is suspended; the lock is handed to it
    /// before it runs again.
    pub fn lock_acquire(&mut self, id: LockId) -> KernelResult<AcquireOutcome> {
        assert!(!self.in_interrupt(), "lock_acquire from interrupt context");
        let cur = self.current();
        let holder = self.lock_ref(id)?.holder;
        assert!(
            holder != Some(cur),
            "thread {} acquiring {} which it already holds",
            cur,
            id
        );

        if holder.is_none() {
            self.take_lock(id, cur);
            return Ok(AcquireOutcome::Acquired);
        }
        self.enqueue_lock_waiter(id, cur);
        self.block(BlockReason::Lock(id));
        Ok(AcquireOutcome::Blocked)
    }

    /// Acquire `id` only if it is free. Never blocks and never donates.
    pub fn lock_try_acquire(&mut self, id: LockId) -> KernelResult<bool> {
        let cur = self.current();
        match self.lock_ref(id)?.holder {
            Some(holder) => {
                assert!(
                    holder != cur,
                    "thread {} acquiring {} which it already holds",
                    cur,
                    id
                );
                Ok(false)
            }
            None => {
                self.take_lock(id, cur);
                Ok(true)
            }
        }
    }

    /// Release `id`, which the running thread must hold.
    ///
    /// The highest-priority waiter receives the lock and the releaser drops
    /// back to whatever its remaining locks justify. If that leaves a
    /// higher-priority thread ready, the releaser yields.
    pub fn lock_release(&mut self, id: LockId) -> KernelResult<()> {
        let cur = self.current();
        let holder = self.lock_ref(id)?.holder;
        assert!(
            holder == Some(cur),
            "thread {} releasing {} held by {:?}",
            cur,
            id,
            holder
        );
        self.release_lock(id, cur);
        self.preempt_if_outranked();
        Ok(())
    }

    pub fn lock_held_by_current(&self, id: LockId) -> bool {
        self.locks
            .get(&id)
            .is_some_and(|l| l.holder == Some(self.current()))
    }

    pub fn lock_holder(&self, id: LockId) -> KernelResult<Option<ThreadId>> {
        Ok(self.lock_ref(id)?.holder)
    }

    fn take_lock(&mut self, id: LockId, tid: ThreadId) {
        if let Some(lock) = self.locks.get_mut(&id) {
            lock.holder = Some(tid);
        }
        self.thread_mut(tid).held_locks.push(id);
    }

    /// Queue blocked thread `tid` on `id` and donate down the chain. The
    /// caller is responsible for the thread's Blocked state.
    pub(crate) fn enqueue_lock_waiter(&mut self, id: LockId, tid: ThreadId) {
        self.thread_mut(tid).waiting_on = Some(id);
        let threads = &self.threads;
        if let Some(lock) = self.locks.get_mut(&id) {
            lock.waiters.insert_ordered(tid, |w| threads[&w].priority);
        }
        trace!("[SYNC] thread {} waits for {}", tid, id);
        self.donate_along_chain(tid);
    }

    /// Release `id` on behalf of `owner` without preempting anyone.
    pub(crate) fn release_lock(&mut self, id: LockId, owner: ThreadId) {
        let next = match self.locks.get_mut(&id) {
            Some(lock) => {
                lock.holder = None;
                lock.waiters.pop_front()
            }
            None => return,
        };
        self.thread_mut(owner).held_locks.retain(|&l| l != id);

        if let Some(next) = next {
            self.grant_lock(id, next);
        }
        self.refresh_priority(owner);
    }

    /// Hand `id` to the blocked waiter `tid` and wake it.
    pub(crate) fn grant_lock(&mut self, id: LockId, tid: ThreadId) {
        trace!("[SYNC] {} handed to thread {}", id, tid);
        self.thread_mut(tid).waiting_on = None;
        self.take_lock(id, tid);
        self.recompute_priority(tid);
        self.make_ready(tid);
    }
}

//! Counting semaphores

use log::trace;

use super::{AcquireOutcome, SemaphoreId};
use crate::{
    error::{KernelResult, SchedError},
    sched::{queue::WaitList, BlockReason, Scheduler},
};

/// Semaphore state
#[derive(Debug, Default)]
pub struct Semaphore {
    pub(crate) value: u32,
    /// Threads blocked in `sema_down`, highest priority first
    pub(crate) waiters: WaitList,
}

impl Scheduler {
    pub fn sema_create(&mut self, value: u32) -> SemaphoreId {
        let id = SemaphoreId(self.alloc_sync_id());
        self.semaphores.insert(
            id,
            Semaphore {
                value,
                waiters: WaitList::new(),
            },
        );
        id
    }

    fn sema_mut(&mut self, id: SemaphoreId) -> KernelResult<&mut Semaphore> {
        self.semaphores
            .get_mut(&id)
            .ok_or_else(|| SchedError::SemaphoreNotFound { id: id.0 }.into())
    }

    /// "P": take a unit, blocking until one is available.
    ///
    /// A blocked caller is handed its unit directly by the `sema_up` that
    /// wakes it.
    pub fn sema_down(&mut self, id: SemaphoreId) -> KernelResult<AcquireOutcome> {
        assert!(!self.in_interrupt(), "sema_down from interrupt context");
        let sema = self.sema_mut(id)?;
        if sema.value > 0 {
            sema.value -= 1;
            return Ok(AcquireOutcome::Acquired);
        }

        let cur = self.current();
        let threads = &self.threads;
        if let Some(sema) = self.semaphores.get_mut(&id) {
            sema.waiters.insert_ordered(cur, |w| threads[&w].priority);
        }
        self.block(BlockReason::Semaphore(id));
        Ok(AcquireOutcome::Blocked)
    }

    /// Take a unit if one is available. Safe in interrupt context.
    pub fn sema_try_down(&mut self, id: SemaphoreId) -> KernelResult<bool> {
        let sema = self.sema_mut(id)?;
        if sema.value > 0 {
            sema.value -= 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// "V": wake the highest-priority waiter, or bank the unit if there is
    /// none. Yields if the woken thread outranks the caller; in interrupt
    /// context the yield is deferred.
    pub fn sema_up(&mut self, id: SemaphoreId) -> KernelResult<()> {
        match self.sema_mut(id)?.waiters.pop_front() {
            Some(waiter) => {
                trace!("[SYNC] {} wakes thread {}", id, waiter);
                self.make_ready(waiter);
            }
            None => self.sema_mut(id)?.value += 1,
        }
        self.preempt_if_outranked();
        Ok(())
    }

    pub fn sema_value(&self, id: SemaphoreId) -> KernelResult<u32> {
        self.semaphores
            .get(&id)
            .map(|s| s.value)
            .ok_or_else(|| SchedError::SemaphoreNotFound { id: id.0 }.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::SchedConfig, sched::ThreadState};

    fn sched() -> Scheduler {
        Scheduler::new(SchedConfig::default()).unwrap()
    }

    #[test]
    fn test_counting() {
        let mut s = sched();
        let sema = s.sema_create(2);
        assert_eq!(s.sema_down(sema).unwrap(), AcquireOutcome::Acquired);
        assert!(s.sema_try_down(sema).unwrap());
        assert!(!s.sema_try_down(sema).unwrap());
        s.sema_up(sema).unwrap();
        assert_eq!(s.sema_value(sema).unwrap(), 1);
    }

    #[test]
    fn test_up_wakes_highest_priority_waiter() {
        let mut s = sched();
        let main = s.current();
        let sema = s.sema_create(0);

        let mut waiters = alloc::vec::Vec::new();
        for (name, prio) in [("w30", 30), ("w40", 40), ("w35", 35)] {
            let w = s.create(name, prio, None).unwrap();
            if s.current() == w {
                let _ = s.sema_down(sema).unwrap();
            }
            waiters.push(w);
        }
        // w30 is below main; let it reach sema_down too.
        s.set_priority(20);
        assert_eq!(s.current(), waiters[0]);
        let _ = s.sema_down(sema).unwrap();
        assert_eq!(s.current(), main);

        s.sema_up(sema).unwrap();
        assert_eq!(s.current(), waiters[1], "w40 wakes first and preempts");
        assert_eq!(s.sema_value(sema).unwrap(), 0, "the unit went to the waiter");
        s.sema_up(sema).unwrap();
        assert_eq!(s.current(), waiters[1]);
        assert_eq!(s.ready_list(), [waiters[2], main]);
        assert_eq!(s.thread(waiters[0]).unwrap().state, ThreadState::Blocked);
    }

    #[test]
    fn test_up_in_interrupt_defers_yield() {
        let mut s = sched();
        let main = s.current();
        let sema = s.sema_create(0);
        let hi = s.create("hi", 50, None).unwrap();
        let _ = s.sema_down(sema).unwrap();
        assert_eq!(s.current(), main);

        s.in_interrupt_for_test(|s| s.sema_up(sema).unwrap());
        assert_eq!(s.current(), main);
        assert!(s.yield_pending());
        assert!(s.preempt_if_due());
        assert_eq!(s.current(), hi);
    }
}

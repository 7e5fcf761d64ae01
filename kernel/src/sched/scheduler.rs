//! Core scheduler implementation
//!
//! [`Scheduler`] is the single owner of all scheduling state: the thread
//! registry, the ready and sleep queues, synchronization objects and the
//! MLFQS load average. Every mutation goes through `&mut Scheduler`; in the
//! kernel that borrow is only obtainable with interrupts masked (see
//! [`super::with_scheduler`]), which is the only synchronization the core
//! needs on a single CPU.
//!
//! Context switching is modelled: a switch changes [`Scheduler::current`],
//! and whatever runs after a call that switched runs as the new thread.

use alloc::{collections::BTreeMap, vec::Vec};
use core::fmt;

use log::{debug, info, trace, warn};

use super::{
    fixed_point::FixedPoint,
    queue::{ReadyQueue, SleepQueue},
    thread::{
        BlockReason, Thread, ThreadEntry, ThreadFlags, ThreadId, ThreadState, NICE_MAX, NICE_MIN,
        PRI_DEFAULT, PRI_MAX, PRI_MIN,
    },
};
use crate::{
    config::{SchedConfig, SchedPolicy},
    error::{KernelError, KernelResult, SchedError},
    mm::PagePool,
    sync::{Condvar, CondvarId, Lock, LockId, Semaphore, SemaphoreId},
};

/// Result of a timer tick, read back by the timer interrupt handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    /// Tick count after this tick
    pub ticks: u64,
    /// The running thread must yield at the interrupt-return preemption point
    pub preempt: bool,
}

/// Result of waiting for another thread to exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The thread has exited with this status
    Exited(i32),
    /// The caller was blocked; call `wait` again once it runs
    Blocked,
}

/// System-wide scheduling statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedStats {
    pub idle_ticks: u64,
    pub kernel_ticks: u64,
    pub user_ticks: u64,
    pub context_switches: u64,
}

impl fmt::Display for SchedStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Thread: {} idle ticks, {} kernel ticks, {} user ticks",
            self.idle_ticks, self.kernel_ticks, self.user_ticks
        )
    }
}

/// Scheduler state
pub struct Scheduler {
    config: SchedConfig,
    pub(crate) threads: BTreeMap<ThreadId, Thread>,
    pub(crate) ready: ReadyQueue,
    pub(crate) sleepers: SleepQueue,
    pub(crate) locks: BTreeMap<LockId, Lock>,
    pub(crate) semaphores: BTreeMap<SemaphoreId, Semaphore>,
    pub(crate) condvars: BTreeMap<CondvarId, Condvar>,
    pages: PagePool,
    current: ThreadId,
    idle: ThreadId,
    next_tid: u64,
    next_sync_id: u64,
    /// Timer ticks since boot
    ticks: u64,
    /// Ticks the current thread has run since it was dispatched
    slice_ticks: u32,
    pub(crate) load_avg: FixedPoint,
    /// Set while the timer interrupt handler runs
    in_interrupt: bool,
    yield_pending: bool,
    stats: SchedStats,
    /// Exit statuses not yet collected by `wait`, with the parent entitled
    /// to each. Dropped when that parent exits.
    exit_statuses: BTreeMap<ThreadId, (ThreadId, i32)>,
    /// Parent blocked in `wait`, keyed by the child it waits for
    exit_waiters: BTreeMap<ThreadId, ThreadId>,
}

impl Scheduler {
    /// Boot the scheduler.
    ///
    /// The caller becomes the `main` thread, already running. The idle
    /// thread is created parked; it runs only when nothing else is ready.
    pub fn new(config: SchedConfig) -> KernelResult<Self> {
        config.validate()?;

        let mut sched = Self {
            config,
            threads: BTreeMap::new(),
            ready: ReadyQueue::new(),
            sleepers: SleepQueue::new(),
            locks: BTreeMap::new(),
            semaphores: BTreeMap::new(),
            condvars: BTreeMap::new(),
            pages: PagePool::new(config.max_threads),
            current: ThreadId(0),
            idle: ThreadId(0),
            next_tid: 1,
            next_sync_id: 1,
            ticks: 0,
            slice_ticks: 0,
            load_avg: FixedPoint::ZERO,
            in_interrupt: false,
            yield_pending: false,
            stats: SchedStats::default(),
            exit_statuses: BTreeMap::new(),
            exit_waiters: BTreeMap::new(),
        };

        let main = sched.alloc_thread("main", PRI_DEFAULT, None)?;
        sched.current = main;
        if sched.is_mlfqs() {
            sched.mlfqs_refresh_priority(main);
        }
        let t = sched.thread_mut(main);
        t.state = ThreadState::Running;
        t.stats.run_count = 1;

        let idle = sched.alloc_thread("idle", PRI_MIN, None)?;
        sched.idle = idle;
        let t = sched.thread_mut(idle);
        t.flags |= ThreadFlags::IDLE;
        t.state = ThreadState::Ready;

        info!(
            "[SCHED] initialized: policy {:?}, {} thread slots, time slice {} ticks",
            config.policy, config.max_threads, config.time_slice
        );
        Ok(sched)
    }

    fn alloc_thread(
        &mut self,
        name: &str,
        priority: u8,
        entry: Option<ThreadEntry>,
    ) -> KernelResult<ThreadId> {
        let page = self
            .pages
            .alloc()
            .map_err(|_| KernelError::ResourceExhausted {
                resource: "thread control blocks",
            })?;
        let tid = ThreadId(self.next_tid);
        self.next_tid += 1;
        self.threads
            .insert(tid, Thread::new(tid, name, priority, page, entry));
        Ok(tid)
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    pub fn config(&self) -> &SchedConfig {
        &self.config
    }

    pub fn policy(&self) -> SchedPolicy {
        self.config.policy
    }

    pub fn is_mlfqs(&self) -> bool {
        self.config.policy == SchedPolicy::Mlfqs
    }

    /// The running thread.
    pub fn current(&self) -> ThreadId {
        self.current
    }

    pub fn current_thread(&self) -> &Thread {
        self.thread_ref(self.current)
    }

    pub fn idle_thread(&self) -> ThreadId {
        self.idle
    }

    pub fn thread(&self, tid: ThreadId) -> Option<&Thread> {
        self.threads.get(&tid)
    }

    /// Mark `tid` as running a user process; its ticks count as user time.
    pub fn mark_user_process(&mut self, tid: ThreadId) -> KernelResult<()> {
        let t = self
            .threads
            .get_mut(&tid)
            .ok_or(KernelError::ThreadNotFound { tid: tid.0 })?;
        t.flags |= ThreadFlags::USER;
        Ok(())
    }

    /// Run `f` on every live thread, in tid order.
    pub fn for_each_thread<F: FnMut(&Thread)>(&self, mut f: F) {
        self.threads.values().for_each(|t| f(t));
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn stats(&self) -> SchedStats {
        self.stats
    }

    /// Threads in the ready queue, in dispatch order.
    pub fn ready_list(&self) -> Vec<ThreadId> {
        self.ready.iter().collect()
    }

    /// Earliest tick at which a sleeping thread wakes.
    pub fn next_wake(&self) -> Option<u64> {
        self.sleepers.next_wake()
    }

    pub fn yield_pending(&self) -> bool {
        self.yield_pending
    }

    pub(crate) fn thread_ref(&self, tid: ThreadId) -> &Thread {
        match self.threads.get(&tid) {
            Some(t) => t,
            None => panic!("no thread with tid {}", tid),
        }
    }

    pub(crate) fn thread_mut(&mut self, tid: ThreadId) -> &mut Thread {
        match self.threads.get_mut(&tid) {
            Some(t) => t,
            None => panic!("no thread with tid {}", tid),
        }
    }

    pub(crate) fn priority_of(&self, tid: ThreadId) -> u8 {
        self.thread_ref(tid).priority
    }

    pub(crate) fn alloc_sync_id(&mut self) -> u64 {
        let id = self.next_sync_id;
        self.next_sync_id += 1;
        id
    }

    pub(crate) fn in_interrupt(&self) -> bool {
        self.in_interrupt
    }

    /// Run `f` as if from the timer interrupt handler.
    #[cfg(test)]
    pub(crate) fn in_interrupt_for_test<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.in_interrupt = true;
        let r = f(self);
        self.in_interrupt = false;
        r
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Create a kernel thread and make it ready.
    ///
    /// If the new thread outranks the caller, the caller yields before this
    /// returns. Under MLFQS `priority` is ignored: the new thread inherits
    /// the creator's `nice` and `recent_cpu` and its priority is computed.
    pub fn create(
        &mut self,
        name: &str,
        priority: u8,
        entry: Option<ThreadEntry>,
    ) -> KernelResult<ThreadId> {
        assert!(
            priority <= PRI_MAX,
            "create: priority {} out of range",
            priority
        );
        let parent = self.current;
        let tid = self.alloc_thread(name, priority, entry)?;
        self.thread_mut(tid).parent = Some(parent);

        if self.is_mlfqs() {
            let (nice, recent_cpu) = {
                let p = self.thread_ref(parent);
                (p.nice, p.recent_cpu)
            };
            let t = self.thread_mut(tid);
            t.nice = nice;
            t.recent_cpu = recent_cpu;
            self.mlfqs_refresh_priority(tid);
        }

        debug!(
            "[SCHED] created thread {} '{}' priority {}",
            tid,
            name,
            self.priority_of(tid)
        );
        self.make_ready(tid);
        self.preempt_if_outranked();
        Ok(tid)
    }

    /// Put the running thread to sleep until something unblocks it.
    pub fn block(&mut self, reason: BlockReason) {
        assert!(!self.in_interrupt, "block called from interrupt context");
        let cur = self.current;
        let t = self.thread_mut(cur);
        assert_eq!(
            t.state,
            ThreadState::Running,
            "block: thread {} is not running",
            cur
        );
        assert!(!t.is_idle(), "the idle thread cannot block");
        t.state = ThreadState::Blocked;
        t.blocked_on = Some(reason);
        trace!("[SCHED] thread {} blocked on {:?}", cur, reason);
        self.schedule();
    }

    /// Move a blocked thread to the ready queue. Does not preempt the
    /// caller; use [`Scheduler::yield_current`] if that is wanted.
    pub fn unblock(&mut self, tid: ThreadId) -> KernelResult<()> {
        if !self.threads.contains_key(&tid) {
            return Err(SchedError::ThreadNotFound { tid: tid.0 }.into());
        }
        self.make_ready(tid);
        Ok(())
    }

    pub(crate) fn make_ready(&mut self, tid: ThreadId) {
        let t = self.thread_mut(tid);
        t.check_magic();
        assert_eq!(
            t.state,
            ThreadState::Blocked,
            "unblock: thread {} is not blocked",
            tid
        );
        t.state = ThreadState::Ready;
        t.blocked_on = None;
        let priority = t.priority;
        self.ready.push(tid, priority);
    }

    /// Give up the CPU; the caller stays ready.
    pub fn yield_current(&mut self) {
        if self.in_interrupt {
            self.yield_pending = true;
            return;
        }
        let cur = self.current;
        let t = self.thread_mut(cur);
        assert_eq!(
            t.state,
            ThreadState::Running,
            "yield: thread {} is not running",
            cur
        );
        t.state = ThreadState::Ready;
        let (idle, priority) = (t.is_idle(), t.priority);
        if !idle {
            self.ready.push(cur, priority);
        }
        self.schedule();
    }

    /// Terminate the running thread with `status`.
    ///
    /// Threads blocked in [`Scheduler::wait`] for it are woken and any locks
    /// it still holds are handed to their waiters. The control block is
    /// reclaimed once the next thread has been switched in.
    pub fn exit(&mut self, status: i32) {
        assert!(!self.in_interrupt, "exit called from interrupt context");
        let cur = self.current;
        assert!(cur != self.idle, "the idle thread cannot exit");

        let held = self.thread_ref(cur).held_locks.clone();
        for lock in held {
            warn!("[SCHED] thread {} exiting while holding {}", cur, lock);
            self.release_lock(lock, cur);
        }

        let t = self.thread_mut(cur);
        t.exit_status = Some(status);
        t.state = ThreadState::Dying;
        let parent = t.parent;
        debug!("[SCHED] thread {} '{}' exited with status {}", cur, t.name, status);

        // Nobody is left to collect the children's statuses.
        self.exit_statuses.retain(|_, (p, _)| *p != cur);
        for t in self.threads.values_mut() {
            if t.parent == Some(cur) {
                t.parent = None;
            }
        }

        if let Some(parent) = parent {
            self.exit_statuses.insert(cur, (parent, status));
        }
        if let Some(waiter) = self.exit_waiters.remove(&cur) {
            self.make_ready(waiter);
        }
        self.schedule();
    }

    /// Wait for child `tid` to exit and collect its status.
    ///
    /// Only the thread that created `tid` may wait for it, and only once. If
    /// `tid` is still alive the caller blocks and gets
    /// [`WaitOutcome::Blocked`]; it calls `wait` again when woken.
    pub fn wait(&mut self, tid: ThreadId) -> KernelResult<WaitOutcome> {
        let cur = self.current;
        if tid == cur {
            return Err(SchedError::WaitOnSelf.into());
        }
        if let Some(&(parent, status)) = self.exit_statuses.get(&tid) {
            if parent != cur {
                return Err(SchedError::NotChild { tid: tid.0 }.into());
            }
            self.exit_statuses.remove(&tid);
            return Ok(WaitOutcome::Exited(status));
        }
        match self.threads.get(&tid) {
            Some(t) if t.parent == Some(cur) => {}
            Some(_) => return Err(SchedError::NotChild { tid: tid.0 }.into()),
            // Tids are never reused: this one existed and its status is gone.
            None if tid.0 < self.next_tid => {
                return Err(SchedError::AlreadyWaited { tid: tid.0 }.into())
            }
            None => return Err(SchedError::ThreadNotFound { tid: tid.0 }.into()),
        }
        self.exit_waiters.insert(tid, cur);
        self.block(BlockReason::Wait(tid));
        Ok(WaitOutcome::Blocked)
    }

    /// Exit statuses still waiting to be collected.
    pub fn pending_exit_statuses(&self) -> usize {
        self.exit_statuses.len()
    }

    // ---------------------------------------------------------------------
    // Dispatch
    // ---------------------------------------------------------------------

    /// Switch to the next thread to run.
    ///
    /// The current thread must already have left the Running state. Picks
    /// the highest-priority ready thread, the earliest-ready one among
    /// equals, or the idle thread when the ready queue is empty.
    pub(crate) fn schedule(&mut self) {
        let prev = self.current;
        assert_ne!(
            self.thread_ref(prev).state,
            ThreadState::Running,
            "schedule: thread {} is still running",
            prev
        );

        let next = self.ready.pop().unwrap_or(self.idle);
        let t = self.thread_mut(next);
        t.check_magic();
        assert_eq!(
            t.state,
            ThreadState::Ready,
            "dispatch of thread {} in state {:?}",
            next,
            t.state
        );
        t.state = ThreadState::Running;
        t.stats.run_count += 1;

        self.current = next;
        self.slice_ticks = 0;
        self.yield_pending = false;

        if prev != next {
            self.stats.context_switches += 1;
            trace!("[SCHED] switch {} -> {}", prev, next);
            if self.thread_ref(prev).state == ThreadState::Dying {
                self.reclaim(prev);
            }
        }
    }

    fn reclaim(&mut self, tid: ThreadId) {
        if let Some(t) = self.threads.remove(&tid) {
            t.check_magic();
            trace!("[SCHED] reclaimed thread {} '{}'", tid, t.name);
            self.pages.free(t.page);
        }
    }

    /// True when a ready thread should run instead of the current one.
    pub fn outranked(&self) -> bool {
        match self.ready.max_priority() {
            None => false,
            Some(top) => self.current == self.idle || top > self.priority_of(self.current),
        }
    }

    /// Yield if the running thread no longer has the highest priority.
    /// Inside the timer interrupt the yield is deferred to the preemption
    /// point.
    pub(crate) fn preempt_if_outranked(&mut self) {
        if self.outranked() {
            self.yield_current();
        }
    }

    /// Carry out a yield requested during the last tick. Called on return
    /// from the timer interrupt; returns true if the CPU was given up.
    pub fn preempt_if_due(&mut self) -> bool {
        if self.yield_pending && !self.in_interrupt {
            self.yield_pending = false;
            self.yield_current();
            true
        } else {
            false
        }
    }

    // ---------------------------------------------------------------------
    // Timer
    // ---------------------------------------------------------------------

    /// Account one timer tick. Runs in interrupt context: nothing here
    /// switches threads, a needed switch is reported instead.
    pub fn tick(&mut self) -> TickOutcome {
        self.in_interrupt = true;
        self.ticks += 1;

        let cur = self.current;
        let t = self.thread_mut(cur);
        t.stats.run_ticks += 1;
        if t.is_idle() {
            self.stats.idle_ticks += 1;
        } else if t.flags.contains(ThreadFlags::USER) {
            self.stats.user_ticks += 1;
        } else {
            self.stats.kernel_ticks += 1;
        }

        if self.is_mlfqs() {
            self.mlfqs_tick();
        }

        for tid in self.sleepers.pop_due(self.ticks) {
            trace!("[SCHED] waking thread {} at tick {}", tid, self.ticks);
            self.make_ready(tid);
        }

        self.slice_ticks += 1;
        if self.slice_ticks >= self.config.time_slice {
            self.yield_pending = true;
        }
        self.preempt_if_outranked();

        self.in_interrupt = false;
        TickOutcome {
            ticks: self.ticks,
            preempt: self.yield_pending,
        }
    }

    /// Block the running thread for `ticks` timer ticks. Durations of zero
    /// or less return immediately.
    pub fn sleep(&mut self, ticks: i64) {
        if ticks <= 0 {
            return;
        }
        assert!(!self.in_interrupt, "sleep called from interrupt context");
        let wake_tick = self.ticks + ticks as u64;
        let cur = self.current;
        self.thread_mut(cur).wake_tick = wake_tick;
        self.sleepers.insert(cur, wake_tick);
        self.block(BlockReason::Sleep { wake_tick });
    }

    // ---------------------------------------------------------------------
    // Priority and niceness
    // ---------------------------------------------------------------------

    /// Effective priority of the running thread.
    pub fn get_priority(&self) -> u8 {
        self.priority_of(self.current)
    }

    /// Set the running thread's base priority. Ignored under MLFQS.
    pub fn set_priority(&mut self, priority: u8) {
        assert!(
            priority <= PRI_MAX,
            "set_priority: {} out of range",
            priority
        );
        if self.is_mlfqs() {
            debug!("[SCHED] set_priority ignored under MLFQS");
            return;
        }
        let cur = self.current;
        self.thread_mut(cur).base_priority = priority;
        self.refresh_priority(cur);
        self.preempt_if_outranked();
    }

    pub fn get_nice(&self) -> i32 {
        self.current_thread().nice
    }

    /// Set the running thread's niceness. Under MLFQS its priority is
    /// recomputed at once and it yields if no longer the highest.
    pub fn set_nice(&mut self, nice: i32) {
        assert!(
            (NICE_MIN..=NICE_MAX).contains(&nice),
            "set_nice: {} out of range",
            nice
        );
        let cur = self.current;
        self.thread_mut(cur).nice = nice;
        if self.is_mlfqs() {
            self.mlfqs_refresh_priority(cur);
            self.preempt_if_outranked();
        }
    }

    /// 100 times the running thread's `recent_cpu`, rounded.
    pub fn get_recent_cpu(&self) -> i32 {
        self.current_thread().recent_cpu.scaled_round(100)
    }

    /// 100 times the system load average, rounded.
    pub fn get_load_avg(&self) -> i32 {
        self.load_avg.scaled_round(100)
    }

    pub fn load_avg(&self) -> FixedPoint {
        self.load_avg
    }

    /// Change a thread's effective priority, keeping every queue it sits in
    /// ordered.
    pub(crate) fn set_effective_priority(&mut self, tid: ThreadId, priority: u8) {
        let t = self.thread_mut(tid);
        let old = t.priority;
        if old == priority {
            return;
        }
        t.priority = priority;
        let (state, idle, waiting_on, blocked_on) =
            (t.state, t.is_idle(), t.waiting_on, t.blocked_on);

        if state == ThreadState::Ready && !idle {
            self.ready.reposition(tid, old, priority);
        }

        let threads = &self.threads;
        let prio = |w: ThreadId| threads[&w].priority;
        if let Some(lock) = waiting_on {
            if let Some(l) = self.locks.get_mut(&lock) {
                l.waiters.reorder(prio);
            }
        }
        match blocked_on {
            Some(BlockReason::Semaphore(id)) => {
                if let Some(s) = self.semaphores.get_mut(&id) {
                    s.waiters.reorder(prio);
                }
            }
            Some(BlockReason::Condvar(id)) => {
                if let Some(c) = self.condvars.get_mut(&id) {
                    c.waiters.reorder(prio);
                }
            }
            _ => {}
        }
    }

    // ---------------------------------------------------------------------
    // Diagnostics
    // ---------------------------------------------------------------------

    /// Verify every scheduler invariant, panicking on the first violation.
    pub fn check_invariants(&self) {
        let running: Vec<_> = self
            .threads
            .values()
            .filter(|t| t.state == ThreadState::Running)
            .map(|t| t.tid)
            .collect();
        assert_eq!(running, [self.current], "exactly one thread must be running");

        for t in self.threads.values() {
            t.check_invariants();
            if t.state == ThreadState::Ready && !t.is_idle() {
                assert!(
                    self.ready.iter().any(|r| r == t.tid),
                    "ready thread {} missing from the ready queue",
                    t.tid
                );
            }
            if !self.is_mlfqs() {
                let donated = self.max_donation(t.tid);
                assert_eq!(
                    t.priority,
                    t.base_priority.max(donated),
                    "thread {} effective priority does not match its donations",
                    t.tid
                );
            }
        }

        for tid in self.ready.iter() {
            let t = self.thread_ref(tid);
            assert_eq!(t.state, ThreadState::Ready, "queued thread {} not ready", tid);
        }

        let mut sleeping = 0;
        for t in self.threads.values() {
            if let Some(BlockReason::Sleep { .. }) = t.blocked_on {
                sleeping += 1;
            }
            if let Some(lock) = t.waiting_on {
                assert!(
                    self.locks[&lock].waiters.contains(t.tid),
                    "thread {} waits on {} but is not queued there",
                    t.tid,
                    lock
                );
            }
        }
        assert_eq!(
            sleeping,
            self.sleepers.len(),
            "sleep queue out of sync with sleeping threads"
        );
        assert_eq!(
            self.pages.used(),
            self.threads.len(),
            "page pool out of sync with the thread registry"
        );
    }
}

//! Multi-level feedback queue scheduling (MLFQS)
//!
//! Priorities are computed, never set:
//!
//! ```text
//! priority   = PRI_MAX - recent_cpu / 4 - nice * 2           every 4 ticks
//! recent_cpu = (2*load_avg)/(2*load_avg + 1) * recent_cpu + nice   every second
//! load_avg   = (59/60)*load_avg + (1/60)*ready_threads        every second
//! ```
//!
//! The running thread's `recent_cpu` grows by one on every tick. All
//! arithmetic is 17.14 fixed point.

use log::debug;

use super::{
    fixed_point::FixedPoint,
    scheduler::Scheduler,
    thread::{ThreadId, PRI_MAX, PRI_MIN},
};

/// Ticks between priority recomputations.
pub const PRIORITY_INTERVAL: u64 = 4;

/// MLFQS priority for the given `recent_cpu` and `nice`, clamped to the
/// valid range.
pub fn mlfqs_priority(recent_cpu: FixedPoint, nice: i32) -> u8 {
    let p = (FixedPoint::from_int(PRI_MAX as i32) - recent_cpu / 4 - nice * 2).to_int_trunc();
    p.clamp(PRI_MIN as i32, PRI_MAX as i32) as u8
}

impl Scheduler {
    /// Per-tick MLFQS bookkeeping, run from [`Scheduler::tick`].
    pub(crate) fn mlfqs_tick(&mut self) {
        let cur = self.current();
        if cur != self.idle_thread() {
            let t = self.thread_mut(cur);
            t.recent_cpu = t.recent_cpu + 1;
        }

        let ticks = self.ticks();
        if ticks % self.config().timer_freq == 0 {
            self.update_load_avg();
            self.update_recent_cpu_all();
        }
        if ticks % PRIORITY_INTERVAL == 0 {
            self.update_priorities_all();
        }
    }

    /// Threads that are running or ready to run, not counting idle.
    fn ready_threads(&self) -> i32 {
        let running = i32::from(self.current() != self.idle_thread());
        self.ready.len() as i32 + running
    }

    fn update_load_avg(&mut self) {
        let ready = self.ready_threads();
        self.load_avg = self.load_avg * 59 / 60 + FixedPoint::from_int(ready) / 60;
        debug!(
            "[MLFQS] tick {}: load_avg {} ({} ready)",
            self.ticks(),
            self.load_avg,
            ready
        );
    }

    fn update_recent_cpu_all(&mut self) {
        let twice = self.load_avg * 2;
        let coeff = twice / (twice + 1);
        for t in self.threads.values_mut().filter(|t| !t.is_idle()) {
            t.recent_cpu = coeff * t.recent_cpu + t.nice;
        }
    }

    fn update_priorities_all(&mut self) {
        let tids: alloc::vec::Vec<ThreadId> = self
            .threads
            .values()
            .filter(|t| !t.is_idle())
            .map(|t| t.tid)
            .collect();
        for tid in tids {
            self.mlfqs_refresh_priority(tid);
        }
    }

    /// Recompute one thread's priority from its `recent_cpu` and `nice`.
    pub(crate) fn mlfqs_refresh_priority(&mut self, tid: ThreadId) {
        let t = self.thread_mut(tid);
        let priority = mlfqs_priority(t.recent_cpu, t.nice);
        t.base_priority = priority;
        self.set_effective_priority(tid, priority);
    }
}

//! Programmable interval timer
//!
//! The timer interrupt drives everything time-related in the scheduler:
//! tick accounting, MLFQS updates, waking sleepers and time-slice expiry.
//!
//! # Usage
//!
//! ```ignore
//! let timer = Timer::from_config(sched.config());
//!
//! // In the interrupt handler
//! timer.interrupt(&mut sched);
//! // On the way out of the handler
//! timer.interrupt_return(&mut sched);
//!
//! // From a thread
//! timer.msleep(&mut sched, 250);
//! ```

use crate::{
    config::SchedConfig,
    sched::{Scheduler, TickOutcome},
};

/// Timer front end. The tick counter itself lives in the scheduler, and
/// the frequency always matches the one the scheduler was booted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    freq: u64,
}

impl Timer {
    pub fn from_config(config: &SchedConfig) -> Self {
        Self {
            freq: config.timer_freq,
        }
    }

    /// Interrupts per second.
    pub fn freq(&self) -> u64 {
        self.freq
    }

    /// Timer interrupt handler body.
    pub fn interrupt(&self, sched: &mut Scheduler) -> TickOutcome {
        sched.tick()
    }

    /// Interrupt-return path: carry out a yield the tick asked for.
    /// Returns true if the running thread was switched out.
    pub fn interrupt_return(&self, sched: &mut Scheduler) -> bool {
        sched.preempt_if_due()
    }

    /// Ticks since boot.
    pub fn ticks(&self, sched: &Scheduler) -> u64 {
        sched.ticks()
    }

    /// Ticks elapsed since `then`, a value earlier returned by
    /// [`Timer::ticks`].
    pub fn elapsed(&self, sched: &Scheduler, then: u64) -> u64 {
        sched.ticks().saturating_sub(then)
    }

    /// Block the running thread for `ticks` ticks.
    pub fn sleep(&self, sched: &mut Scheduler, ticks: i64) {
        sched.sleep(ticks);
    }

    /// Sleep for about `ms` milliseconds.
    pub fn msleep(&self, sched: &mut Scheduler, ms: i64) {
        self.real_time_sleep(sched, ms, 1_000);
    }

    /// Sleep for about `us` microseconds.
    pub fn usleep(&self, sched: &mut Scheduler, us: i64) {
        self.real_time_sleep(sched, us, 1_000_000);
    }

    /// Sleep for about `ns` nanoseconds.
    pub fn nsleep(&self, sched: &mut Scheduler, ns: i64) {
        self.real_time_sleep(sched, ns, 1_000_000_000);
    }

    /// `num / denom` seconds in ticks, rounded down.
    pub fn to_ticks(&self, num: i64, denom: i64) -> i64 {
        (i128::from(num) * i128::from(self.freq) / i128::from(denom)) as i64
    }

    /// Sub-tick durations do not sleep at all.
    fn real_time_sleep(&self, sched: &mut Scheduler, num: i64, denom: i64) {
        let ticks = self.to_ticks(num, denom);
        if ticks > 0 {
            sched.sleep(ticks);
        }
    }
}

//! Thread scheduling
//!
//! Implements a uniprocessor scheduler with support for:
//! - Strict priority scheduling with round-robin among equals
//! - Priority donation through chains of locks
//! - The multi-level feedback queue scheduler (MLFQS)
//! - Timed sleep without busy waiting
//!
//! The kernel owns one [`Scheduler`] behind [`SCHEDULER`]. Holding that
//! lock stands in for running with interrupts disabled.

use spin::Mutex;

use crate::{
    config::SchedConfig,
    error::{KernelResult, SchedError},
};

pub mod donation;
pub mod fixed_point;
pub mod mlfqs;
pub mod queue;
pub mod scheduler;
pub mod thread;

pub use fixed_point::FixedPoint;
pub use scheduler::{SchedStats, Scheduler, TickOutcome, WaitOutcome};
pub use thread::{
    BlockReason, Thread, ThreadEntry, ThreadFlags, ThreadFunc, ThreadId, ThreadState, NICE_DEFAULT,
    NICE_MAX, NICE_MIN, PRI_DEFAULT, PRI_MAX, PRI_MIN,
};

/// Global scheduler instance
pub static SCHEDULER: Mutex<Option<Scheduler>> = Mutex::new(None);

/// Boot the global scheduler; the caller becomes the `main` thread.
pub fn init(config: SchedConfig) -> KernelResult<()> {
    let mut slot = SCHEDULER.lock();
    if slot.is_some() {
        return Err(SchedError::AlreadyInitialized.into());
    }
    *slot = Some(Scheduler::new(config)?);
    Ok(())
}

/// Run `f` with exclusive access to the global scheduler.
pub fn with_scheduler<R, F>(f: F) -> KernelResult<R>
where
    F: FnOnce(&mut Scheduler) -> R,
{
    let mut slot = SCHEDULER.lock();
    let sched = slot.as_mut().ok_or(SchedError::NotInitialized)?;
    Ok(f(sched))
}

/// Tear down the global scheduler, returning it if it was running.
pub fn shutdown() -> Option<Scheduler> {
    SCHEDULER.lock().take()
}

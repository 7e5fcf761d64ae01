//! Kestrel Kernel Library
//!
//! The thread-scheduling core of the Kestrel teaching kernel: thread
//! records, priority scheduling with donation, the MLFQS scheduler,
//! sleeping locks, semaphores and condition variables, timed sleep and the
//! system-call boundary that lets user programs reach them.
//!
//! The library is `no_std` and allocates through `alloc`; the embedding
//! kernel supplies the global allocator, the logger and the architecture
//! code that performs real context switches.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod error;
pub mod mm;
pub mod sched;
pub mod sync;
pub mod syscall;
pub mod timer;

// Re-export the items embedding code reaches for most
pub use config::{BootOptions, SchedConfig, SchedPolicy};
pub use error::{KernelError, KernelResult, SchedError, SyscallError};
pub use sched::{Scheduler, ThreadId};

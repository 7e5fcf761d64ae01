//! Thread control block

use alloc::{string::String, vec::Vec};
use core::fmt;

use bitflags::bitflags;

use super::fixed_point::FixedPoint;
use crate::{
    mm::PageFrame,
    sync::{CondvarId, LockId, SemaphoreId},
};

/// Lowest priority.
pub const PRI_MIN: u8 = 0;
/// Default priority.
pub const PRI_DEFAULT: u8 = 31;
/// Highest priority.
pub const PRI_MAX: u8 = 63;

/// Lowest niceness (most CPU-hungry).
pub const NICE_MIN: i32 = -20;
/// Default niceness.
pub const NICE_DEFAULT: i32 = 0;
/// Highest niceness.
pub const NICE_MAX: i32 = 20;

/// Value of [`Thread::magic`] in an intact control block. A kernel stack
/// that overflows into the control block clobbers it.
pub const THREAD_MAGIC: u32 = 0xcd6a_bf4b;

/// Longest thread name kept, in bytes.
pub const MAX_NAME_LEN: usize = 15;

/// Thread ID type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// States in a thread's life cycle
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Currently on the CPU
    Running = 0,
    /// Runnable, waiting in the ready queue
    Ready = 1,
    /// Waiting for an event
    Blocked = 2,
    /// Exited; reclaimed after the next switch
    Dying = 3,
}

/// Why a thread is blocked, recorded for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    Lock(LockId),
    Semaphore(SemaphoreId),
    Condvar(CondvarId),
    Sleep { wake_tick: u64 },
    Wait(ThreadId),
    Other,
}

bitflags! {
    /// Thread attributes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ThreadFlags: u8 {
        /// The idle thread
        const IDLE = 1 << 0;
        /// Runs a user process; its ticks count as user time
        const USER = 1 << 1;
    }
}

/// Entry point of a kernel thread.
pub type ThreadFunc = fn(usize);

/// What the architecture layer needs to start a fresh thread.
#[derive(Debug, Clone, Copy)]
pub struct ThreadEntry {
    pub func: ThreadFunc,
    pub aux: usize,
}

/// Per-thread accounting
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadStats {
    /// Timer ticks spent running
    pub run_ticks: u64,
    /// Number of times dispatched
    pub run_count: u64,
}

/// Thread control block
pub struct Thread {
    pub tid: ThreadId,
    pub name: String,
    pub state: ThreadState,
    pub flags: ThreadFlags,
    /// Saved kernel stack pointer
    pub stack: usize,
    /// Page holding this block and its kernel stack
    pub(crate) page: PageFrame,
    pub entry: Option<ThreadEntry>,
    /// Creator, the only thread that may wait for this one
    pub parent: Option<ThreadId>,

    /// Priority absent donation
    pub base_priority: u8,
    /// Priority used for scheduling decisions
    pub priority: u8,
    /// Locks owned by this thread
    pub held_locks: Vec<LockId>,
    /// Lock this thread is blocked on
    pub waiting_on: Option<LockId>,
    pub blocked_on: Option<BlockReason>,

    pub nice: i32,
    pub recent_cpu: FixedPoint,

    /// Absolute tick at which a sleeping thread wakes
    pub wake_tick: u64,
    pub exit_status: Option<i32>,
    pub stats: ThreadStats,

    pub magic: u32,
}

impl Thread {
    pub(crate) fn new(
        tid: ThreadId,
        name: &str,
        priority: u8,
        page: PageFrame,
        entry: Option<ThreadEntry>,
    ) -> Self {
        assert!(
            priority <= PRI_MAX,
            "priority {} out of range for thread '{}'",
            priority,
            name
        );
        Self {
            tid,
            name: truncate_name(name),
            state: ThreadState::Blocked,
            flags: ThreadFlags::empty(),
            stack: page.top(),
            page,
            entry,
            parent: None,
            base_priority: priority,
            priority,
            held_locks: Vec::new(),
            waiting_on: None,
            blocked_on: None,
            nice: NICE_DEFAULT,
            recent_cpu: FixedPoint::ZERO,
            wake_tick: 0,
            exit_status: None,
            stats: ThreadStats::default(),
            magic: THREAD_MAGIC,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.flags.contains(ThreadFlags::IDLE)
    }

    /// Panic if the control block has been overwritten.
    pub fn check_magic(&self) {
        assert_eq!(
            self.magic, THREAD_MAGIC,
            "thread {} ('{}') control block corrupted: stack overflow?",
            self.tid, self.name
        );
    }

    /// Check the per-thread invariants that hold in every state.
    pub fn check_invariants(&self) {
        self.check_magic();
        assert!(
            self.priority <= PRI_MAX && self.base_priority <= PRI_MAX,
            "thread {} priority out of range: base {} effective {}",
            self.tid,
            self.base_priority,
            self.priority
        );
        assert!(
            self.priority >= self.base_priority,
            "thread {} effective priority {} below base {}",
            self.tid,
            self.priority,
            self.base_priority
        );
        assert!(
            (NICE_MIN..=NICE_MAX).contains(&self.nice),
            "thread {} nice {} out of range",
            self.tid,
            self.nice
        );
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("tid", &self.tid)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("base_priority", &self.base_priority)
            .field("priority", &self.priority)
            .field("nice", &self.nice)
            .field("recent_cpu", &self.recent_cpu)
            .finish()
    }
}

fn truncate_name(name: &str) -> String {
    let mut end = name.len().min(MAX_NAME_LEN);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    String::from(&name[..end])
}

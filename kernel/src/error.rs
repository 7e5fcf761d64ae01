//! Error types for the Kestrel kernel
//!
//! Only recoverable conditions are modelled here: resource exhaustion while
//! creating threads, lookups of objects that do not exist, and faults caused
//! by user programs. Violated scheduler invariants are not errors; they halt
//! the kernel through `assert!`/`panic!`.

use core::fmt;

/// Main kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Memory-related errors
    OutOfMemory {
        requested: usize,
        available: usize,
    },
    UnmappedMemory {
        addr: usize,
    },

    /// Thread-related errors
    ThreadNotFound {
        tid: u64,
    },

    /// Scheduler-related errors
    SchedulerError(SchedError),

    /// System call errors
    SyscallError(SyscallError),

    /// Generic errors
    InvalidArgument {
        name: &'static str,
        value: &'static str,
    },
    ResourceExhausted {
        resource: &'static str,
    },
}

/// Scheduler-specific errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    ThreadNotFound { tid: u64 },
    LockNotFound { id: u64 },
    SemaphoreNotFound { id: u64 },
    CondvarNotFound { id: u64 },
    /// The exit status of this thread was already collected, or dropped
    /// when its parent exited.
    AlreadyWaited { tid: u64 },
    /// Only a thread's parent may wait for it.
    NotChild { tid: u64 },
    /// A thread may not wait for itself.
    WaitOnSelf,
    NotInitialized,
    AlreadyInitialized,
}

/// System call errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    InvalidSyscall { nr: u32 },
    InvalidPointer { addr: usize },
    UnmappedMemory { addr: usize },
    BadFileDescriptor { fd: i32 },
}

/// Result type alias for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory {
                requested,
                available,
            } => {
                write!(
                    f,
                    "Out of memory: requested {} bytes, {} available",
                    requested, available
                )
            }
            Self::UnmappedMemory { addr } => write!(f, "Unmapped memory at 0x{:x}", addr),
            Self::ThreadNotFound { tid } => write!(f, "Thread {} not found", tid),
            Self::SchedulerError(e) => write!(f, "Scheduler error: {}", e),
            Self::SyscallError(e) => write!(f, "Syscall error: {}", e),
            Self::InvalidArgument { name, value } => {
                write!(f, "Invalid argument '{}': {}", name, value)
            }
            Self::ResourceExhausted { resource } => write!(f, "Resource exhausted: {}", resource),
        }
    }
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ThreadNotFound { tid } => write!(f, "no thread with tid {}", tid),
            Self::LockNotFound { id } => write!(f, "no lock with id {}", id),
            Self::SemaphoreNotFound { id } => write!(f, "no semaphore with id {}", id),
            Self::CondvarNotFound { id } => write!(f, "no condition variable with id {}", id),
            Self::AlreadyWaited { tid } => write!(f, "thread {} was already waited for", tid),
            Self::NotChild { tid } => write!(f, "thread {} is not a child of the caller", tid),
            Self::WaitOnSelf => write!(f, "a thread cannot wait for itself"),
            Self::NotInitialized => write!(f, "scheduler not initialized"),
            Self::AlreadyInitialized => write!(f, "scheduler already initialized"),
        }
    }
}

impl fmt::Display for SyscallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSyscall { nr } => write!(f, "invalid system call number {}", nr),
            Self::InvalidPointer { addr } => write!(f, "invalid user pointer 0x{:x}", addr),
            Self::UnmappedMemory { addr } => write!(f, "unmapped user address 0x{:x}", addr),
            Self::BadFileDescriptor { fd } => write!(f, "bad file descriptor {}", fd),
        }
    }
}

// Conversion implementations
impl From<SchedError> for KernelError {
    fn from(err: SchedError) -> Self {
        match err {
            SchedError::ThreadNotFound { tid } => Self::ThreadNotFound { tid },
            other => Self::SchedulerError(other),
        }
    }
}

impl From<SyscallError> for KernelError {
    fn from(err: SyscallError) -> Self {
        match err {
            SyscallError::UnmappedMemory { addr } => Self::UnmappedMemory { addr },
            other => Self::SyscallError(other),
        }
    }
}

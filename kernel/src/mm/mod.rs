//! Memory management boundary
//!
//! The scheduling core needs two things from the memory subsystem: a page
//! for every thread control block and its kernel stack, and a way to read
//! user memory without faulting the kernel. Paging itself is owned by the
//! architecture layer; these modules model just enough of it.

pub mod page_pool;
pub mod user;

pub use page_pool::{PageFrame, PagePool};
pub use user::{AddressSpace, PageFlags, UserMemory};

/// Size of a page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// First kernel virtual address; everything below belongs to user space.
pub const PHYS_BASE: usize = 0xC000_0000;

/// Page number containing `addr`.
#[inline]
pub const fn page_number(addr: usize) -> usize {
    addr / PAGE_SIZE
}

/// Offset of `addr` within its page.
#[inline]
pub const fn page_offset(addr: usize) -> usize {
    addr % PAGE_SIZE
}

/// True when `addr` lies in the user half of the address space.
#[inline]
pub const fn is_user_vaddr(addr: usize) -> bool {
    addr < PHYS_BASE
}

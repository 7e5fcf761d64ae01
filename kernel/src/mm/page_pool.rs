//! Kernel page pool
//!
//! Every thread control block occupies one page; its kernel stack grows
//! down from the top of the same page. The pool hands out frames from a
//! fixed-size region so that running out of pages is an ordinary error for
//! `thread create` rather than a crash.

use alloc::vec::Vec;

use super::{PAGE_SIZE, PHYS_BASE};
use crate::error::{KernelError, KernelResult};

/// Kernel virtual address of the first pool page.
const POOL_BASE: usize = PHYS_BASE + 0x0010_0000;

/// A page handed out by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFrame {
    index: usize,
}

impl PageFrame {
    /// Kernel virtual address of the start of the page.
    pub fn base(&self) -> usize {
        POOL_BASE + self.index * PAGE_SIZE
    }

    /// One past the last byte of the page; initial stack pointer.
    pub fn top(&self) -> usize {
        self.base() + PAGE_SIZE
    }
}

/// Fixed-capacity allocator of kernel pages.
pub struct PagePool {
    /// One bit per page, set when in use
    bitmap: Vec<u64>,
    capacity: usize,
    used: usize,
}

impl PagePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            bitmap: alloc::vec![0; capacity.div_ceil(64)],
            capacity,
            used: 0,
        }
    }

    pub fn used(&self) -> usize {
        self.used
    }

    /// Allocate the lowest free page.
    pub fn alloc(&mut self) -> KernelResult<PageFrame> {
        for (word_idx, word) in self.bitmap.iter_mut().enumerate() {
            if *word == u64::MAX {
                continue;
            }
            let bit = word.trailing_ones() as usize;
            let index = word_idx * 64 + bit;
            if index >= self.capacity {
                break;
            }
            *word |= 1 << bit;
            self.used += 1;
            return Ok(PageFrame { index });
        }
        Err(KernelError::OutOfMemory {
            requested: PAGE_SIZE,
            available: 0,
        })
    }

    /// Return a page to the pool. Freeing a page twice is fatal.
    pub fn free(&mut self, frame: PageFrame) {
        let (word, bit) = (frame.index / 64, frame.index % 64);
        assert!(
            self.bitmap[word] & (1 << bit) != 0,
            "double free of kernel page {}",
            frame.index
        );
        self.bitmap[word] &= !(1 << bit);
        self.used -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_until_exhausted() {
        let mut pool = PagePool::new(3);
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        let c = pool.alloc().unwrap();
        assert_eq!((a.index, b.index, c.index), (0, 1, 2));
        assert_eq!(pool.used(), 3);
        assert!(matches!(
            pool.alloc(),
            Err(KernelError::OutOfMemory { .. })
        ));
    }

    #[test]
    fn test_free_recycles_lowest_page() {
        let mut pool = PagePool::new(70);
        let frames: Vec<_> = (0..70).map(|_| pool.alloc().unwrap()).collect();
        pool.free(frames[65]);
        pool.free(frames[3]);
        assert_eq!(pool.used(), 68);
        assert_eq!(pool.alloc().unwrap().index, 3);
        assert_eq!(pool.alloc().unwrap().index, 65);
    }

    #[test]
    fn test_stack_top_is_end_of_page() {
        let mut pool = PagePool::new(2);
        let frame = pool.alloc().unwrap();
        assert_eq!(frame.top() - frame.base(), PAGE_SIZE);
        assert!(frame.base() >= PHYS_BASE);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn test_double_free_is_fatal() {
        let mut pool = PagePool::new(1);
        let frame = pool.alloc().unwrap();
        pool.free(frame);
        pool.free(frame);
    }
}

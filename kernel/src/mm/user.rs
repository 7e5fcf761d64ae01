//! User address spaces and safe user-memory reads
//!
//! [`UserMemory::read_byte`] is the only way the kernel touches user
//! memory. It never faults: a null pointer, a kernel address or an unmapped
//! page all come back as `None`, and the caller decides what to do with the
//! offending thread.

use alloc::{boxed::Box, collections::BTreeMap};

use bitflags::bitflags;

use super::{is_user_vaddr, page_number, page_offset, PAGE_SIZE};
use crate::error::SyscallError;

bitflags! {
    /// Page table entry flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
    }
}

/// Capability to read bytes of a user address space. Readability is
/// decided per page: every byte of a page is readable or none is.
pub trait UserMemory {
    /// Read one byte at `addr`, or `None` if the access would fault.
    fn read_byte(&self, addr: usize) -> Option<u8>;
}

struct UserPage {
    flags: PageFlags,
    data: Box<[u8; PAGE_SIZE]>,
}

/// A process page directory: user pages keyed by page number.
#[derive(Default)]
pub struct AddressSpace {
    pages: BTreeMap<usize, UserPage>,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a zero-filled page containing `addr`.
    pub fn map_page(&mut self, addr: usize, flags: PageFlags) -> Result<(), SyscallError> {
        if !is_user_vaddr(addr) {
            return Err(SyscallError::InvalidPointer { addr });
        }
        self.pages.insert(
            page_number(addr),
            UserPage {
                flags: flags | PageFlags::PRESENT | PageFlags::USER,
                data: Box::new([0; PAGE_SIZE]),
            },
        );
        Ok(())
    }

    pub fn unmap_page(&mut self, addr: usize) -> bool {
        self.pages.remove(&page_number(addr)).is_some()
    }

    pub fn is_mapped(&self, addr: usize) -> bool {
        self.lookup(addr).is_some()
    }

    fn lookup(&self, addr: usize) -> Option<&UserPage> {
        if addr == 0 || !is_user_vaddr(addr) {
            return None;
        }
        self.pages
            .get(&page_number(addr))
            .filter(|p| p.flags.contains(PageFlags::PRESENT | PageFlags::USER))
    }

    /// Copy `bytes` into mapped pages starting at `addr`, as a loader would.
    pub fn write_bytes(&mut self, addr: usize, bytes: &[u8]) -> Result<(), SyscallError> {
        for (i, &byte) in bytes.iter().enumerate() {
            let at = addr
                .checked_add(i)
                .ok_or(SyscallError::InvalidPointer { addr })?;
            if at == 0 || !is_user_vaddr(at) {
                return Err(SyscallError::InvalidPointer { addr: at });
            }
            let page = self
                .pages
                .get_mut(&page_number(at))
                .ok_or(SyscallError::UnmappedMemory { addr: at })?;
            page.data[page_offset(at)] = byte;
        }
        Ok(())
    }
}

impl UserMemory for AddressSpace {
    fn read_byte(&self, addr: usize) -> Option<u8> {
        self.lookup(addr).map(|page| page.data[page_offset(addr)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::PHYS_BASE;

    #[test]
    fn test_read_mapped_byte() {
        let mut space = AddressSpace::new();
        space.map_page(0x0804_8000, PageFlags::WRITABLE).unwrap();
        space.write_bytes(0x0804_8010, b"hi").unwrap();

        assert_eq!(space.read_byte(0x0804_8010), Some(b'h'));
        assert_eq!(space.read_byte(0x0804_8011), Some(b'i'));
        assert_eq!(space.read_byte(0x0804_8012), Some(0));
    }

    #[test]
    fn test_faulting_reads_return_none() {
        let mut space = AddressSpace::new();
        space.map_page(0x1000, PageFlags::empty()).unwrap();

        assert_eq!(space.read_byte(0), None);
        assert_eq!(space.read_byte(0x2000), None);
        assert_eq!(space.read_byte(PHYS_BASE), None);
        assert_eq!(space.read_byte(usize::MAX), None);
    }

    #[test]
    fn test_kernel_pages_cannot_be_mapped() {
        let mut space = AddressSpace::new();
        assert_eq!(
            space.map_page(PHYS_BASE + 0x1000, PageFlags::WRITABLE),
            Err(SyscallError::InvalidPointer {
                addr: PHYS_BASE + 0x1000
            })
        );
    }

    #[test]
    fn test_write_stops_at_unmapped_page() {
        let mut space = AddressSpace::new();
        space.map_page(0x1000, PageFlags::WRITABLE).unwrap();
        let err = space.write_bytes(0x1ffe, b"abcd").unwrap_err();
        assert_eq!(err, SyscallError::UnmappedMemory { addr: 0x2000 });

        assert!(space.unmap_page(0x1000));
        assert!(!space.is_mapped(0x1ffe));
    }
}

//! System call interface
//!
//! User programs trap into [`dispatch`] with the call number on top of
//! their stack and the arguments above it, one 32-bit word each. The return
//! value goes back in `eax`.
//!
//! # User-Space Pointer Contract
//!
//! Every handler reads user memory only through [`copy_in`], which goes
//! byte by byte through [`UserMemory::read_byte`] and stops at the first
//! byte that would fault. Buffers whose length comes from the user are
//! checked with [`check_user_range`] first and then copied through a
//! fixed-size kernel buffer. A bad pointer anywhere, including the stack
//! pointer itself, terminates the calling thread with status -1; the kernel
//! is never brought down by a user program.

use alloc::format;

use log::{debug, warn};

use crate::{
    error::SyscallError,
    mm::{is_user_vaddr, page_number, UserMemory, PAGE_SIZE},
    sched::{Scheduler, ThreadId, WaitOutcome},
};

/// File descriptor of the console output.
pub const STDOUT_FILENO: i32 = 1;

/// Bytes moved to the console per copy in `write`.
const WRITE_CHUNK: usize = 256;

/// System call numbers
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Halt = 0,
    Exit = 1,
    Exec = 2,
    Wait = 3,
    Create = 4,
    Remove = 5,
    Open = 6,
    Filesize = 7,
    Read = 8,
    Write = 9,
    Seek = 10,
    Tell = 11,
    Close = 12,
}

impl TryFrom<u32> for Syscall {
    type Error = SyscallError;

    fn try_from(nr: u32) -> Result<Self, Self::Error> {
        match nr {
            0 => Ok(Self::Halt),
            1 => Ok(Self::Exit),
            2 => Ok(Self::Exec),
            3 => Ok(Self::Wait),
            4 => Ok(Self::Create),
            5 => Ok(Self::Remove),
            6 => Ok(Self::Open),
            7 => Ok(Self::Filesize),
            8 => Ok(Self::Read),
            9 => Ok(Self::Write),
            10 => Ok(Self::Seek),
            11 => Ok(Self::Tell),
            12 => Ok(Self::Close),
            _ => Err(SyscallError::InvalidSyscall { nr }),
        }
    }
}

impl Syscall {
    /// Number of argument words the call takes.
    pub const fn arg_count(self) -> usize {
        match self {
            Self::Halt => 0,
            Self::Exit
            | Self::Exec
            | Self::Wait
            | Self::Remove
            | Self::Open
            | Self::Filesize
            | Self::Tell
            | Self::Close => 1,
            Self::Create | Self::Seek => 2,
            Self::Read | Self::Write => 3,
        }
    }
}

/// The part of the interrupt frame system calls use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IntrFrame {
    /// User stack pointer at the trap
    pub esp: usize,
    /// Return value register
    pub eax: u32,
}

/// Console output device.
pub trait Console {
    fn put_buf(&mut self, buf: &[u8]);
}

impl Console for alloc::vec::Vec<u8> {
    fn put_buf(&mut self, buf: &[u8]) {
        self.extend_from_slice(buf);
    }
}

/// What happened to the calling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallOutcome {
    /// The call completed; the result is in `eax`
    Returned,
    /// The calling thread was terminated with this status
    Exited(i32),
    /// The machine should power off
    Halted,
    /// The caller blocked; the call runs again when it is redispatched
    Restart,
}

/// Copy `dst.len()` bytes of user memory starting at `src` into `dst`.
pub fn copy_in<M>(mem: &M, dst: &mut [u8], src: usize) -> Result<(), SyscallError>
where
    M: UserMemory + ?Sized,
{
    for (i, byte) in dst.iter_mut().enumerate() {
        let addr = src
            .checked_add(i)
            .ok_or(SyscallError::InvalidPointer { addr: src })?;
        *byte = read_user_byte(mem, addr)?;
    }
    Ok(())
}

/// Check that all of `[src, src + len)` is readable without copying any
/// of it. Mappings are per page, so one byte of each page is probed.
pub fn check_user_range<M>(mem: &M, src: usize, len: usize) -> Result<(), SyscallError>
where
    M: UserMemory + ?Sized,
{
    if len == 0 {
        return Ok(());
    }
    let end = src
        .checked_add(len)
        .ok_or(SyscallError::InvalidPointer { addr: src })?;
    let mut addr = src;
    while addr < end {
        read_user_byte(mem, addr)?;
        addr = (page_number(addr) + 1) * PAGE_SIZE;
    }
    Ok(())
}

fn read_user_byte<M>(mem: &M, addr: usize) -> Result<u8, SyscallError>
where
    M: UserMemory + ?Sized,
{
    mem.read_byte(addr).ok_or_else(|| {
        if addr == 0 || !is_user_vaddr(addr) {
            SyscallError::InvalidPointer { addr }
        } else {
            SyscallError::UnmappedMemory { addr }
        }
    })
}

fn read_word<M>(mem: &M, addr: usize) -> Result<u32, SyscallError>
where
    M: UserMemory + ?Sized,
{
    let mut word = [0u8; 4];
    copy_in(mem, &mut word, addr)?;
    Ok(u32::from_le_bytes(word))
}

/// Handle the system call described by `frame` for the running thread.
pub fn dispatch<M, C>(
    sched: &mut Scheduler,
    mem: &M,
    console: &mut C,
    frame: &mut IntrFrame,
) -> SyscallOutcome
where
    M: UserMemory + ?Sized,
    C: Console + ?Sized,
{
    match try_dispatch(sched, mem, console, frame) {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!("[SYSCALL] thread {} killed: {}", sched.current(), err);
            terminate(sched, console, -1)
        }
    }
}

fn try_dispatch<M, C>(
    sched: &mut Scheduler,
    mem: &M,
    console: &mut C,
    frame: &mut IntrFrame,
) -> Result<SyscallOutcome, SyscallError>
where
    M: UserMemory + ?Sized,
    C: Console + ?Sized,
{
    let call = Syscall::try_from(read_word(mem, frame.esp)?)?;
    let mut args = [0u32; 3];
    for (i, arg) in args.iter_mut().take(call.arg_count()).enumerate() {
        let addr = frame
            .esp
            .checked_add(4 * (i + 1))
            .ok_or(SyscallError::InvalidPointer { addr: frame.esp })?;
        *arg = read_word(mem, addr)?;
    }
    debug!("[SYSCALL] thread {}: {:?} {:?}", sched.current(), call, args);

    match call {
        Syscall::Halt => Ok(SyscallOutcome::Halted),
        Syscall::Exit => Ok(terminate(sched, console, args[0] as i32)),
        Syscall::Wait => Ok(sys_wait(sched, frame, args[0])),
        Syscall::Write => {
            let (fd, buf, size) = (args[0] as i32, args[1] as usize, args[2]);
            sys_write(mem, console, frame, fd, buf, size)
        }
        Syscall::Exec
        | Syscall::Create
        | Syscall::Remove
        | Syscall::Open
        | Syscall::Filesize
        | Syscall::Read
        | Syscall::Seek
        | Syscall::Tell
        | Syscall::Close => {
            // No file system at this layer.
            frame.eax = -1i32 as u32;
            Ok(SyscallOutcome::Returned)
        }
    }
}

/// Report and end the running thread.
fn terminate<C>(sched: &mut Scheduler, console: &mut C, status: i32) -> SyscallOutcome
where
    C: Console + ?Sized,
{
    let line = format!("{}: exit({})\n", sched.current_thread().name, status);
    console.put_buf(line.as_bytes());
    sched.exit(status);
    SyscallOutcome::Exited(status)
}

fn sys_wait(sched: &mut Scheduler, frame: &mut IntrFrame, tid: u32) -> SyscallOutcome {
    match sched.wait(ThreadId(u64::from(tid))) {
        Ok(WaitOutcome::Exited(status)) => {
            frame.eax = status as u32;
            SyscallOutcome::Returned
        }
        Ok(WaitOutcome::Blocked) => SyscallOutcome::Restart,
        Err(_) => {
            frame.eax = -1i32 as u32;
            SyscallOutcome::Returned
        }
    }
}

/// The whole buffer is validated before anything reaches the console, so a
/// bad pointer late in the buffer produces no partial output.
fn sys_write<M, C>(
    mem: &M,
    console: &mut C,
    frame: &mut IntrFrame,
    fd: i32,
    buf: usize,
    size: u32,
) -> Result<SyscallOutcome, SyscallError>
where
    M: UserMemory + ?Sized,
    C: Console + ?Sized,
{
    if size == 0 {
        frame.eax = 0;
        return Ok(SyscallOutcome::Returned);
    }
    let size = size as usize;
    check_user_range(mem, buf, size)?;

    if fd != STDOUT_FILENO {
        debug!("[SYSCALL] write: {}", SyscallError::BadFileDescriptor { fd });
        frame.eax = -1i32 as u32;
        return Ok(SyscallOutcome::Returned);
    }

    let mut chunk = [0u8; WRITE_CHUNK];
    let mut done = 0;
    while done < size {
        let n = (size - done).min(WRITE_CHUNK);
        copy_in(mem, &mut chunk[..n], buf + done)?;
        console.put_buf(&chunk[..n]);
        done += n;
    }
    frame.eax = size as u32;
    Ok(SyscallOutcome::Returned)
}

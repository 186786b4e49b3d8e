//! User-space oriented syscall wrappers around the raw `int 0x80` ABI.

use super::abi;
use super::types::{FD_CONSOLE, FD_KEYBOARD, SyscallId};

/// Reads up to `buf.len()` bytes from the keyboard, blocking until at least
/// one byte is available. Returns the number of bytes actually read.
#[inline(always)]
pub fn sys_read(buf: &mut [u8]) -> i32 {
    // SAFETY: `buf` is a valid, exclusively-borrowed slice in this task's
    // own address space.
    unsafe {
        abi::syscall3(
            SyscallId::Read as u32,
            FD_KEYBOARD,
            buf.as_mut_ptr() as u32,
            buf.len() as u32,
        ) as i32
    }
}

/// Writes `buf` to the console (mirrored to serial). Returns the number of
/// bytes actually written.
#[inline(always)]
pub fn sys_write(buf: &[u8]) -> i32 {
    // SAFETY: `buf` is a valid slice in this task's own address space.
    unsafe {
        abi::syscall3(
            SyscallId::Write as u32,
            FD_CONSOLE,
            buf.as_ptr() as u32,
            buf.len() as u32,
        ) as i32
    }
}

/// Terminates the calling task with `exit_code`. Never returns.
#[inline(always)]
pub fn sys_exit(exit_code: i32) -> ! {
    // SAFETY: `Exit` never returns control to the caller.
    unsafe {
        abi::syscall1(SyscallId::Exit as u32, exit_code as u32);
    }
    unreachable!("exit syscall returned")
}

/// Replaces the calling process's image with `filename` (an 8.3 name).
/// Returns 0 on success; a negative value if the load failed, in which
/// case the caller's image and execution continue unchanged.
#[inline(always)]
pub fn sys_exec(filename_ptr: *const u8) -> i32 {
    // SAFETY: caller guarantees `filename_ptr` addresses a readable,
    // NUL-terminated 8.3 name in this task's own address space.
    unsafe { abi::syscall1(SyscallId::Exec as u32, filename_ptr as u32) as i32 }
}

/// Forks the calling process. Returns the child's pid to the parent, `0`
/// to the child, or a negative value on failure.
#[inline(always)]
pub fn sys_fork() -> i32 {
    // SAFETY: no arguments to validate.
    unsafe { abi::syscall0(SyscallId::Fork as u32) as i32 }
}

/// Blocks until a child terminates, then reaps it. If `status` is
/// `Some`, the child's exit code is written there. Returns the reaped
/// child's pid, or `-1` if the caller has no children.
#[inline(always)]
pub fn sys_wait(status: Option<&mut i32>) -> i32 {
    let ptr = match status {
        Some(slot) => slot as *mut i32 as u32,
        None => 0,
    };
    // SAFETY: `ptr` is either null or a valid pointer into this task's own
    // stack/data, matching the kernel's status-pointer contract.
    unsafe { abi::syscall1(SyscallId::Wait as u32, ptr) as i32 }
}

/// Creates a new thread sharing the calling process's address space,
/// running at `entry` with the given initial stack pointer. Passing 0 for
/// either leaves the corresponding value copied from the caller.
#[inline(always)]
pub fn sys_clone(new_stack: u32, entry: u32) -> i32 {
    // SAFETY: `new_stack`/`entry` are plain integers validated kernel-side.
    unsafe { abi::syscall2(SyscallId::Clone as u32, new_stack, entry) as i32 }
}

/// Blocks the caller while `*addr == expected`, same as Linux `FUTEX_WAIT`.
#[inline(always)]
pub fn sys_futex_wait(addr: u32, expected: u32) {
    // SAFETY: `addr` is validated/dereferenced kernel-side.
    unsafe {
        abi::syscall2(SyscallId::FutexWait as u32, addr, expected);
    }
}

/// Wakes every task blocked on `addr`, same as Linux `FUTEX_WAKE`.
#[inline(always)]
pub fn sys_futex_wake(addr: u32) {
    // SAFETY: `addr` is validated/dereferenced kernel-side.
    unsafe {
        abi::syscall1(SyscallId::FutexWake as u32, addr);
    }
}

/// Prints the FAT12 root directory listing to the console.
#[inline(always)]
pub fn sys_ls() {
    // SAFETY: no arguments to validate.
    unsafe {
        abi::syscall0(SyscallId::Ls as u32);
    }
}

//! Kernel-side syscall dispatcher (`int 0x80` path).
//!
//! ABI: `eax` = syscall number, `ebx`/`ecx`/`edx` = up to three arguments,
//! return value written back into `eax`. An unrecognized syscall number is
//! logged and leaves `eax` completely untouched — not even set to an error
//! code — matching the diagnostic-and-fall-through behavior of the original
//! dispatcher this one is modeled on.

use core::slice;
use core::str;

use crate::arch::interrupts::TrapFrame;
use crate::drivers::keyboard;
use crate::drivers::screen::with_screen;
use crate::drivers::serial::Serial;
use crate::io::fat12;
use crate::logging;
use crate::memory::vmm;
use crate::process::lifecycle;
use crate::sync::futex;

use super::types::{SyscallId, FD_CONSOLE, FD_KEYBOARD, SYSCALL_ERR};

/// Longest single READ/WRITE this kernel services in one syscall.
const MAX_IO_LEN: usize = 4096;
/// Longest 8.3 filename (8 + '.' + 3 + NUL) accepted from user memory.
const MAX_FILENAME_LEN: usize = 13;

/// Checks that `[ptr, ptr+len)` lies entirely above the null-pointer guard
/// page and below the kernel's direct-map window, with no overflow. Does
/// not confirm the range is actually mapped — a bad pointer still faults
/// when dereferenced, same as the original kernel's behavior.
fn is_valid_user_range(ptr: u32, len: usize) -> bool {
    if ptr == 0 {
        return false;
    }
    if len == 0 {
        return true;
    }
    match ptr.checked_add(len as u32) {
        Some(end) => ptr >= vmm::PAGE_SIZE && end <= vmm::DIRECT_MAP_BASE,
        None => false,
    }
}

/// Copies a NUL-terminated (or length-capped) 8.3 filename out of user
/// memory into `buf`, returning the number of bytes copied.
fn read_user_filename(ptr: u32, buf: &mut [u8; MAX_FILENAME_LEN]) -> Option<usize> {
    if !is_valid_user_range(ptr, MAX_FILENAME_LEN) {
        return None;
    }
    // SAFETY: `is_valid_user_range` confirmed this span lies in user space
    // reachable through the caller's active page directory.
    let src = unsafe { slice::from_raw_parts(ptr as *const u8, MAX_FILENAME_LEN) };
    let len = src.iter().position(|&b| b == 0).unwrap_or(MAX_FILENAME_LEN);
    buf[..len].copy_from_slice(&src[..len]);
    Some(len)
}

/// `READ(fd, buf, count)`: blocking read from fd 0 (keyboard) only.
fn sys_read(fd: u32, buf_ptr: u32, count: u32) -> u32 {
    if fd != FD_KEYBOARD {
        return SYSCALL_ERR;
    }
    let count = (count as usize).min(MAX_IO_LEN);
    if count == 0 {
        return 0;
    }
    if !is_valid_user_range(buf_ptr, count) {
        return SYSCALL_ERR;
    }

    // SAFETY: `is_valid_user_range` confirmed the destination span.
    let dest = unsafe { slice::from_raw_parts_mut(buf_ptr as *mut u8, count) };
    for slot in dest.iter_mut() {
        *slot = keyboard::read_char_blocking();
    }
    count as u32
}

/// `WRITE(fd, buf, count)`: fd 1 writes to both the VGA console and serial.
fn sys_write(fd: u32, buf_ptr: u32, count: u32) -> u32 {
    if fd != FD_CONSOLE {
        return SYSCALL_ERR;
    }
    let count = (count as usize).min(MAX_IO_LEN);
    if count == 0 {
        return 0;
    }
    if !is_valid_user_range(buf_ptr, count) {
        return SYSCALL_ERR;
    }

    // SAFETY: `is_valid_user_range` confirmed the source span.
    let bytes = unsafe { slice::from_raw_parts(buf_ptr as *const u8, count) };
    with_screen(|screen| {
        for &b in bytes {
            screen.print_char(b);
        }
    });
    let serial = Serial::new();
    for &b in bytes {
        serial.write_byte(b);
    }
    count as u32
}

/// `EXEC(filename)`: reads an 8.3 name out of user memory and hands it to
/// `process::lifecycle::exec`.
fn sys_exec(filename_ptr: u32, frame: &mut TrapFrame) -> u32 {
    let mut buf = [0u8; MAX_FILENAME_LEN];
    let Some(len) = read_user_filename(filename_ptr, &mut buf) else {
        return SYSCALL_ERR;
    };
    let Ok(name) = str::from_utf8(&buf[..len]) else {
        return SYSCALL_ERR;
    };

    match lifecycle::exec(name, frame) {
        Ok(()) => 0,
        Err(err) => {
            logging::logln("syscall", format_args!("exec {} failed: {}", name, err));
            SYSCALL_ERR
        }
    }
}

/// `WAIT(status_ptr)`: validates the output pointer (if non-null) before
/// blocking on a child.
fn sys_wait(status_ptr_raw: u32) -> u32 {
    let status_ptr = if status_ptr_raw == 0 {
        core::ptr::null_mut()
    } else if is_valid_user_range(status_ptr_raw, 4) {
        status_ptr_raw as *mut i32
    } else {
        return SYSCALL_ERR;
    };
    lifecycle::wait(status_ptr) as u32
}

/// Resolves the syscall number in `frame.regs.eax` and dispatches to the
/// corresponding kernel implementation, writing the result back into
/// `frame.regs.eax`. Leaves `eax` untouched for unrecognized numbers.
pub fn dispatch(frame: &mut TrapFrame) {
    let nr = frame.regs.eax;
    let ebx = frame.regs.ebx;
    let ecx = frame.regs.ecx;
    let edx = frame.regs.edx;

    let result: Option<u32> = match SyscallId::from_u32(nr) {
        Some(SyscallId::Read) => Some(sys_read(ebx, ecx, edx)),
        Some(SyscallId::Write) => Some(sys_write(ebx, ecx, edx)),
        Some(SyscallId::Exit) => lifecycle::exit(ebx as i32),
        Some(SyscallId::Exec) => Some(sys_exec(ebx, frame)),
        Some(SyscallId::Fork) => Some(lifecycle::fork(frame) as u32),
        Some(SyscallId::Wait) => Some(sys_wait(ebx)),
        Some(SyscallId::Clone) => Some(lifecycle::clone_task(ebx, ecx, frame) as u32),
        Some(SyscallId::FutexWait) => {
            futex::futex_wait(ebx, ecx);
            Some(0)
        }
        Some(SyscallId::FutexWake) => {
            futex::futex_wake(ebx);
            Some(0)
        }
        Some(SyscallId::Ls) => {
            fat12::print_root_directory();
            Some(0)
        }
        None => {
            logging::logln("syscall", format_args!("unknown syscall number {}", nr));
            None
        }
    };

    if let Some(value) = result {
        frame.regs.eax = value;
    }
}

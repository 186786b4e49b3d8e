//! `int 0x80` dispatcher contract tests.
//!
//! Exercises `syscall::dispatch` directly against hand-built `TrapFrame`
//! values, without an actual `int 0x80` trap (the hardware entry path itself
//! is covered by `interrupts_layout_test.rs`). Focuses on the argument
//! validation every handler performs before touching memory or hardware:
//! fd checks, zero-length shortcuts, and user pointer range checks.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(kaos_kernel::testing::test_runner)]
#![reexport_test_harness_main = "test_main"]

use core::panic::PanicInfo;
use kaos_kernel::arch::interrupts::{self, SavedRegisters, TrapFrame};
use kaos_kernel::drivers::ata;
use kaos_kernel::memory::{heap, pmm, vmm};
use kaos_kernel::process::pcb;
use kaos_kernel::scheduler;
use kaos_kernel::syscall::{self, SyscallId, FD_CONSOLE, FD_KEYBOARD, SYSCALL_ERR};

#[no_mangle]
#[link_section = ".text.boot"]
pub extern "C" fn KernelMain(_kernel_size: u64) -> ! {
    kaos_kernel::drivers::serial::init();
    pmm::init(false);
    interrupts::init();
    vmm::init();
    heap::init();
    ata::init();

    // `WAIT` dereferences the current PCB to find the caller's pid, so a
    // process table with a live "current" task must exist before any
    // dispatch() call that might reach sys_wait.
    let boot_pcb = pcb::alloc_pcb();
    // SAFETY: `boot_pcb` was just allocated and is exclusively owned here.
    unsafe {
        (*boot_pcb).page_directory = vmm::kernel_directory();
    }
    scheduler::init(boot_pcb);

    test_main();

    loop {
        core::hint::spin_loop();
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    kaos_kernel::testing::test_panic_handler(info)
}

/// A frame with every general-purpose register zeroed; individual tests
/// overwrite `regs.eax/ebx/ecx/edx` to set up a specific syscall call.
fn blank_frame() -> TrapFrame {
    TrapFrame {
        regs: SavedRegisters {
            ds: 0,
            es: 0,
            fs: 0,
            gs: 0,
            edi: 0,
            esi: 0,
            ebp: 0,
            esp_dummy: 0,
            ebx: 0,
            edx: 0,
            ecx: 0,
            eax: 0,
            vector: 0,
            error_code: 0,
        },
        eip: 0,
        cs: 0,
        eflags: 0,
        esp: 0,
        ss: 0,
    }
}

/// Contract: an unrecognized syscall number leaves `eax` completely
/// untouched (not even overwritten with an error code).
#[test_case]
fn test_dispatch_leaves_eax_untouched_for_unknown_number() {
    let mut frame = blank_frame();
    frame.regs.eax = 0xDEAD_BEEF;
    syscall::dispatch(&mut frame);
    assert_eq!(frame.regs.eax, 0xDEAD_BEEF);
}

/// Contract: `READ` against the console fd (not the keyboard) is rejected.
#[test_case]
fn test_read_wrong_fd_is_rejected() {
    let mut frame = blank_frame();
    frame.regs.eax = SyscallId::Read as u32;
    frame.regs.ebx = FD_CONSOLE;
    frame.regs.ecx = 0x0040_0000;
    frame.regs.edx = 4;
    syscall::dispatch(&mut frame);
    assert_eq!(frame.regs.eax, SYSCALL_ERR);
}

/// Contract: `WRITE` against the keyboard fd (not the console) is rejected.
#[test_case]
fn test_write_wrong_fd_is_rejected() {
    let mut frame = blank_frame();
    frame.regs.eax = SyscallId::Write as u32;
    frame.regs.ebx = FD_KEYBOARD;
    frame.regs.ecx = 0x0040_0000;
    frame.regs.edx = 4;
    syscall::dispatch(&mut frame);
    assert_eq!(frame.regs.eax, SYSCALL_ERR);
}

/// Contract: a zero-length `WRITE` on the right fd short-circuits to `0`
/// without ever touching `ecx` as a pointer — a null pointer is fine here.
#[test_case]
fn test_write_zero_length_returns_zero_even_with_null_pointer() {
    let mut frame = blank_frame();
    frame.regs.eax = SyscallId::Write as u32;
    frame.regs.ebx = FD_CONSOLE;
    frame.regs.ecx = 0;
    frame.regs.edx = 0;
    syscall::dispatch(&mut frame);
    assert_eq!(frame.regs.eax, 0);
}

/// Contract: a null buffer pointer with a nonzero length is rejected.
#[test_case]
fn test_write_null_pointer_nonzero_length_is_rejected() {
    let mut frame = blank_frame();
    frame.regs.eax = SyscallId::Write as u32;
    frame.regs.ebx = FD_CONSOLE;
    frame.regs.ecx = 0;
    frame.regs.edx = 10;
    syscall::dispatch(&mut frame);
    assert_eq!(frame.regs.eax, SYSCALL_ERR);
}

/// Contract: a buffer that runs into the kernel's direct-map window is
/// rejected, even though the starting pointer itself looks plausible.
#[test_case]
fn test_write_buffer_crossing_into_kernel_space_is_rejected() {
    let mut frame = blank_frame();
    frame.regs.eax = SyscallId::Write as u32;
    frame.regs.ebx = FD_CONSOLE;
    frame.regs.ecx = vmm::DIRECT_MAP_BASE - 2;
    frame.regs.edx = 16;
    syscall::dispatch(&mut frame);
    assert_eq!(frame.regs.eax, SYSCALL_ERR);
}

/// Contract: a pointer/length pair that overflows `u32` arithmetic is
/// rejected rather than wrapping into a "valid-looking" range.
#[test_case]
fn test_write_buffer_with_overflowing_length_is_rejected() {
    let mut frame = blank_frame();
    frame.regs.eax = SyscallId::Write as u32;
    frame.regs.ebx = FD_CONSOLE;
    frame.regs.ecx = 0xFFFF_FFF0;
    frame.regs.edx = 0x20;
    syscall::dispatch(&mut frame);
    assert_eq!(frame.regs.eax, SYSCALL_ERR);
}

/// Contract: a well-formed `WRITE` to the console with a genuine in-bounds
/// kernel-owned buffer succeeds and reports the full byte count.
#[test_case]
fn test_write_valid_buffer_reports_full_length() {
    let mut payload = [b'o', b'k', b'\n'];
    let mut frame = blank_frame();
    frame.regs.eax = SyscallId::Write as u32;
    frame.regs.ebx = FD_CONSOLE;
    frame.regs.ecx = payload.as_mut_ptr() as u32;
    frame.regs.edx = payload.len() as u32;
    syscall::dispatch(&mut frame);
    assert_eq!(frame.regs.eax, payload.len() as u32);
}

/// Contract: `WAIT` with a null status pointer and no children reports `-1`
/// rather than blocking forever (the scheduler is never initialized in this
/// test binary, so a block-until-reaped path would hang).
#[test_case]
fn test_wait_null_status_pointer_with_no_children_reports_no_child() {
    let mut frame = blank_frame();
    frame.regs.eax = SyscallId::Wait as u32;
    frame.regs.ebx = 0;
    syscall::dispatch(&mut frame);
    assert_eq!(frame.regs.eax, SYSCALL_ERR, "no children to reap must report -1");
}

/// Contract: `WAIT` with a garbage non-null status pointer (here, a
/// kernel-space address) is rejected before any blocking/reaping logic
/// runs.
#[test_case]
fn test_wait_out_of_range_status_pointer_is_rejected() {
    let mut frame = blank_frame();
    frame.regs.eax = SyscallId::Wait as u32;
    frame.regs.ebx = vmm::DIRECT_MAP_BASE;
    syscall::dispatch(&mut frame);
    assert_eq!(frame.regs.eax, SYSCALL_ERR);
}

/// Contract: `FUTEX_WAKE` on an address with no waiters still reports
/// success (`0`) — there is no spurious-failure path for either futex call.
#[test_case]
fn test_futex_wake_with_no_waiters_reports_success() {
    let mut frame = blank_frame();
    frame.regs.eax = SyscallId::FutexWake as u32;
    frame.regs.ebx = 0x0040_1000;
    syscall::dispatch(&mut frame);
    assert_eq!(frame.regs.eax, 0);
}

/// Contract: `LS` always writes a result back into `eax` (distinguishing it
/// from an unrecognized syscall number) regardless of whether the backing
/// disk media actually has a readable FAT12 root directory.
#[test_case]
fn test_ls_reports_success_regardless_of_disk_contents() {
    let mut frame = blank_frame();
    frame.regs.eax = SyscallId::Ls as u32;
    syscall::dispatch(&mut frame);
    assert_eq!(frame.regs.eax, 0);
}

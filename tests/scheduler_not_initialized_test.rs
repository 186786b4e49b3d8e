//! Scheduler contract tests that require a pristine non-initialized state.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(kaos_kernel::testing::test_runner)]
#![reexport_test_harness_main = "test_main"]

use core::panic::PanicInfo;
use kaos_kernel::arch::interrupts;
use kaos_kernel::scheduler;

#[no_mangle]
#[link_section = ".text.boot"]
pub extern "C" fn KernelMain(_kernel_size: u64) -> ! {
    kaos_kernel::drivers::serial::init();
    interrupts::init();

    test_main();

    loop {
        core::hint::spin_loop();
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    kaos_kernel::testing::test_panic_handler(info)
}

/// Contract: the scheduler reports uninitialized before `init()` runs.
#[test_case]
fn test_scheduler_not_initialized_before_init() {
    assert!(
        !scheduler::is_initialized(),
        "scheduler must start out uninitialized"
    );
}

/// Contract: `current()` returns a null pointer before `init()`.
#[test_case]
fn test_current_is_null_before_init() {
    assert!(
        scheduler::current().is_null(),
        "current() must return null before the scheduler has a process table"
    );
}

/// Contract: calling `yield_now()` before `init()` must not panic, must not
/// touch a nonexistent process list, and must leave the scheduler
/// uninitialized (it has nothing to switch to).
#[test_case]
fn test_yield_now_without_scheduler_init_is_a_safe_no_op() {
    scheduler::yield_now();

    assert!(
        !scheduler::is_initialized(),
        "yield_now must not implicitly initialize the scheduler"
    );
    assert!(
        scheduler::current().is_null(),
        "current() must still be null after a pre-init yield_now"
    );
}

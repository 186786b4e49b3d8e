//! Kernel entry point.
//!
//! Boot order: serial (so every later init can log), screen, GDT/TSS,
//! interrupt tables, physical memory, virtual memory, heap, then the
//! bootstrap process and round-robin scheduler. Interrupts stay masked
//! until every subsystem they could touch is live.

#![no_std]
#![no_main]

extern crate alloc;

use core::panic::PanicInfo;

use kaos_kernel::arch::{gdt, interrupts};
use kaos_kernel::drivers::screen;
use kaos_kernel::drivers::serial;
use kaos_kernel::logging;
use kaos_kernel::memory::{heap, pmm, vmm};
use kaos_kernel::process::pcb;
use kaos_kernel::scheduler;

/// Timer tick rate for scheduler preemption.
const TIMER_HZ: u32 = 100;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    serial::_debug_print(format_args!("KERNEL PANIC: {}\n", info));
    loop {
        unsafe {
            core::arch::asm!("cli", "hlt", options(nomem, nostack, preserves_flags));
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn _start() -> ! {
    serial::init();
    logging::logln("boot", format_args!("KAOS starting"));

    screen::init();
    gdt::init();
    interrupts::init();

    pmm::init(true);
    vmm::init();
    heap::init();

    let boot_pcb = pcb::alloc_pcb();
    // SAFETY: `boot_pcb` was just allocated and is exclusively owned here.
    unsafe {
        (*boot_pcb).page_directory = vmm::kernel_directory();
    }
    scheduler::init(boot_pcb);

    interrupts::init_periodic_timer(TIMER_HZ);
    interrupts::register_irq_handler(interrupts::IRQ0_PIT_TIMER_VECTOR, |_vector, _frame| {
        scheduler::on_timer_tick();
    });

    logging::logln("boot", format_args!("KAOS ready"));
    interrupts::enable();

    loop {
        core::hint::spin_loop();
    }
}

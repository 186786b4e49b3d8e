//! Ring-3 entry smoke test.
//!
//! Forges a child task whose initial trap frame points at a tiny hand
//! written user-mode program, switches to it, and lets it `int 0x80` its
//! way back out through `sys_exit`. If the fork/`iret`/syscall plumbing is
//! wired correctly, control returns to this test right where it called
//! `scheduler::schedule()` — the forked child's own `exit` loop only ever
//! reschedules back to whichever task is next `Ready`, which is us.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(kaos_kernel::testing::test_runner)]
#![reexport_test_harness_main = "test_main"]

use core::panic::PanicInfo;
use kaos_kernel::arch::gdt;
use kaos_kernel::arch::interrupts::{self, SavedRegisters, TrapFrame};
use kaos_kernel::memory::{heap, pmm, vmm};
use kaos_kernel::process::lifecycle;
use kaos_kernel::process::pcb;
use kaos_kernel::scheduler;

#[no_mangle]
#[link_section = ".text.boot"]
pub extern "C" fn KernelMain(_kernel_size: u64) -> ! {
    kaos_kernel::drivers::serial::init();

    pmm::init(false);
    interrupts::init();
    vmm::init();
    heap::init();

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

/// `mov eax, 2` (sys_exit) ; `mov ebx, 42` ; `int 0x80` ; `jmp $` (unreached
/// safety net — `sys_exit` never returns).
const USER_PROGRAM: [u8; 14] = [
    0xB8, 0x02, 0x00, 0x00, 0x00, // mov eax, 2
    0xBB, 0x2A, 0x00, 0x00, 0x00, // mov ebx, 42
    0xCD, 0x80, // int 0x80
    0xEB, 0xFE, // jmp $
];

const USER_CODE_VIRT: u32 = 0x0040_0000;

fn install_user_program() {
    let dir = vmm::kernel_directory();
    let frame = pmm::with_pmm(|mgr| mgr.alloc().expect("alloc should succeed"));
    let phys = frame.physical_address();
    // SAFETY: `phys` was just allocated and is reachable through the
    // direct-map window.
    unsafe {
        core::ptr::write_bytes((phys + vmm::DIRECT_MAP_BASE) as *mut u8, 0, vmm::PAGE_SIZE as usize);
        core::ptr::copy_nonoverlapping(
            USER_PROGRAM.as_ptr(),
            (phys + vmm::DIRECT_MAP_BASE) as *mut u8,
            USER_PROGRAM.len(),
        );
    }
    assert!(
        vmm::map_page_in_dir(dir, USER_CODE_VIRT, phys, vmm::PTE_PRESENT | vmm::PTE_USER),
        "mapping the user code page must succeed"
    );
}

fn forged_ring3_entry_frame() -> TrapFrame {
    let user_data = gdt::USER_DATA_SELECTOR as u32;
    TrapFrame {
        regs: SavedRegisters {
            ds: user_data,
            es: user_data,
            fs: user_data,
            gs: user_data,
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
        eip: USER_CODE_VIRT,
        cs: gdt::USER_CODE_SELECTOR as u32,
        // IF set (bit 9) plus the always-one reserved bit 1.
        eflags: 0x202,
        // Never dereferenced: the 3-instruction program never touches the
        // stack, and `int 0x80` switches to the kernel stack from the TSS
        // rather than using this value.
        esp: 0x1000,
        ss: user_data,
    }
}

/// Contract: a forged child task can be scheduled into ring 3, execute a
/// software interrupt, and have its `sys_exit` hand control back to the
/// parent through the ordinary round-robin reschedule path.
#[test_case]
fn test_forked_user_task_exits_back_to_parent_via_int80() {
    assert!(scheduler::is_initialized(), "scheduler must be initialized");

    install_user_program();
    let frame = forged_ring3_entry_frame();

    let child_pid = lifecycle::fork(&frame);
    assert!(child_pid > 0, "fork should produce a valid child pid");

    // Switches to the child, which runs the user program, traps back into
    // `sys_exit`, and reschedules to us — this call only returns once that
    // happens.
    scheduler::schedule();

    let mut status: i32 = 0;
    let reaped_pid = lifecycle::wait(&mut status as *mut i32);
    assert_eq!(
        reaped_pid, child_pid,
        "wait should reap the child that just ran in ring 3"
    );
    assert_eq!(
        status, 42,
        "exit code from the ring-3 sys_exit call must propagate to the parent"
    );
}

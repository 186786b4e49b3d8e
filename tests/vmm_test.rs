//! Virtual Memory Manager Integration Tests
//!
//! Boots a dedicated kernel, initializes PMM/IDT/VMM, and exercises page
//! mapping, copy-on-write address-space cloning, and page-fault resolution.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(kaos_kernel::testing::test_runner)]
#![reexport_test_harness_main = "test_main"]

use core::panic::PanicInfo;
use kaos_kernel::arch::interrupts;
use kaos_kernel::memory::{pmm, vmm};

/// Entry point for the VMM integration test kernel.
#[no_mangle]
#[link_section = ".text.boot"]
pub extern "C" fn KernelMain(_kernel_size: u64) -> ! {
    kaos_kernel::drivers::serial::init();

    pmm::init(false);
    interrupts::init();
    vmm::init();

    test_main();

    loop {
        core::hint::spin_loop();
    }
}

/// Panic handler for integration tests.
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    kaos_kernel::testing::test_panic_handler(info)
}

/// Contract: a fresh mapping is present and round-trips through memory.
#[test_case]
fn test_map_page_round_trips_through_direct_map() {
    let dir = vmm::kernel_directory();
    let frame = pmm::with_pmm(|mgr| mgr.alloc().expect("alloc should succeed"));
    let virt = 0x0040_0000u32;

    assert!(
        vmm::map_page_in_dir(dir, virt, frame.physical_address(), vmm::PTE_PRESENT | vmm::PTE_WRITABLE),
        "map_page_in_dir should succeed with a fresh frame"
    );
    assert!(vmm::is_mapped(dir, virt), "mapped page must report as present");

    // SAFETY: `virt` was just mapped present+writable in the active directory.
    unsafe {
        core::ptr::write_volatile(virt as *mut u32, 0xDEAD_BEEF);
        assert_eq!(core::ptr::read_volatile(virt as *const u32), 0xDEAD_BEEF);
    }
}

/// Contract: an address with no PDE/PTE present is not mapped.
#[test_case]
fn test_unmapped_address_reports_not_mapped() {
    let dir = vmm::kernel_directory();
    assert!(
        !vmm::is_mapped(dir, 0x0080_0000),
        "an address never mapped must report as not present"
    );
}

/// Contract: cloning an address space shares frames copy-on-write and bumps
/// the PMM refcount for every shared page.
#[test_case]
fn test_clone_directory_shares_frames_cow() {
    let src_dir = vmm::kernel_directory();
    let frame = pmm::with_pmm(|mgr| mgr.alloc().expect("alloc should succeed"));
    let virt = 0x0050_0000u32;
    let phys = frame.physical_address();
    vmm::map_page_in_dir(src_dir, virt, phys, vmm::PTE_PRESENT | vmm::PTE_WRITABLE);

    let pfn = phys / vmm::PAGE_SIZE;
    let refs_before = pmm::with_pmm(|mgr| mgr.get_ref(pfn));

    let new_dir = vmm::clone_directory(src_dir).expect("clone should succeed");

    let refs_after = pmm::with_pmm(|mgr| mgr.get_ref(pfn));
    assert_eq!(
        refs_after,
        refs_before + 1,
        "cloning a writable page must bump its PMM refcount"
    );
    assert!(
        vmm::is_mapped(new_dir, virt),
        "cloned directory must carry forward the same user mapping"
    );

    vmm::free_directory(new_dir);
}

/// Contract: a COW write fault with refcount 1 just reclaims write access.
#[test_case]
fn test_handle_page_fault_resolves_sole_owner_cow() {
    let dir = vmm::kernel_directory();
    let frame = pmm::with_pmm(|mgr| mgr.alloc().expect("alloc should succeed"));
    let virt = 0x0060_0000u32;
    let phys = frame.physical_address();

    // Map present but not writable, with the COW bit set, mimicking a clone
    // where this process turned out to be the sole remaining owner.
    vmm::map_page_in_dir(dir, virt, phys, vmm::PTE_PRESENT | vmm::PTE_COW);

    const ERR_PRESENT: u32 = 1 << 0;
    const ERR_WRITE: u32 = 1 << 1;
    let outcome = vmm::handle_page_fault(dir, virt, ERR_PRESENT | ERR_WRITE);
    assert_eq!(
        outcome,
        vmm::PageFaultOutcome::Resolved,
        "a write fault on a sole-owner COW page must resolve"
    );

    // SAFETY: the fault handler just reinstated write access to this page.
    unsafe {
        core::ptr::write_volatile(virt as *mut u32, 0x1234);
    }
}

/// Contract: a fault on a genuinely unmapped page is fatal (not a write
/// fault at all — the present bit in the error code is clear).
#[test_case]
fn test_handle_page_fault_is_fatal_for_unmapped_page() {
    let dir = vmm::kernel_directory();
    const ERR_WRITE: u32 = 1 << 1;
    let outcome = vmm::handle_page_fault(dir, 0x00A0_0000, ERR_WRITE);
    assert_eq!(
        outcome,
        vmm::PageFaultOutcome::Fatal,
        "a fault with the present bit clear must be treated as fatal"
    );
}

//! Interrupt ABI/Layout Integration Tests
//!
//! Verifies the register-save layout used by IRQ trampolines and
//! basic PIT divisor calculations.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(kaos_kernel::testing::test_runner)]
#![reexport_test_harness_main = "test_main"]

use core::mem::{size_of, MaybeUninit};
use core::panic::PanicInfo;
use core::ptr::addr_of;
use kaos_kernel::arch::interrupts::{self, SavedRegisters};
use kaos_kernel::syscall::SyscallId;

/// Entry point for the interrupt-layout test kernel.
#[no_mangle]
#[link_section = ".text.boot"]
pub extern "C" fn KernelMain(_kernel_size: u64) -> ! {
    kaos_kernel::drivers::serial::init();

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

/// Contract: saved register frame size and offsets.
/// Given: The subsystem is initialized with the explicit preconditions in this test body, including any literal addresses, vectors, sizes, flags, and constants used below.
/// When: The exact operation sequence in this function is executed against that state.
/// Then: All assertions must hold for the checked values and state transitions, preserving the contract "saved register frame size and offsets".
/// Failure Impact: Indicates a regression in subsystem behavior, ABI/layout, synchronization, or lifecycle semantics and should be treated as release-blocking until understood.
#[test_case]
fn test_saved_registers_size_and_offsets() {
    assert!(
        size_of::<SavedRegisters>() == 14 * 4,
        "SavedRegisters must contain exactly 14 saved dwords"
    );

    let regs = MaybeUninit::<SavedRegisters>::uninit();
    let base = regs.as_ptr() as usize;

    // SAFETY:
    // - `addr_of!` does not dereference memory; it only computes field addresses.
    // - `regs` is `MaybeUninit`, which is valid for offset computations.
    unsafe {
        assert!((addr_of!((*regs.as_ptr()).ds) as usize) - base == 0);
        assert!((addr_of!((*regs.as_ptr()).es) as usize) - base == 4);
        assert!((addr_of!((*regs.as_ptr()).fs) as usize) - base == 8);
        assert!((addr_of!((*regs.as_ptr()).gs) as usize) - base == 12);
        assert!((addr_of!((*regs.as_ptr()).edi) as usize) - base == 16);
        assert!((addr_of!((*regs.as_ptr()).esi) as usize) - base == 20);
        assert!((addr_of!((*regs.as_ptr()).ebp) as usize) - base == 24);
        assert!((addr_of!((*regs.as_ptr()).esp_dummy) as usize) - base == 28);
        assert!((addr_of!((*regs.as_ptr()).ebx) as usize) - base == 32);
        assert!((addr_of!((*regs.as_ptr()).edx) as usize) - base == 36);
        assert!((addr_of!((*regs.as_ptr()).ecx) as usize) - base == 40);
        assert!((addr_of!((*regs.as_ptr()).eax) as usize) - base == 44);
        assert!((addr_of!((*regs.as_ptr()).vector) as usize) - base == 48);
        assert!((addr_of!((*regs.as_ptr()).error_code) as usize) - base == 52);
    }
}

/// Contract: irq vector constants are contiguous.
/// Given: The subsystem is initialized with the explicit preconditions in this test body, including any literal addresses, vectors, sizes, flags, and constants used below.
/// When: The exact operation sequence in this function is executed against that state.
/// Then: All assertions must hold for the checked values and state transitions, preserving the contract "irq vector constants are contiguous".
/// Failure Impact: Indicates a regression in subsystem behavior, ABI/layout, synchronization, or lifecycle semantics and should be treated as release-blocking until understood.
#[test_case]
fn test_irq_vector_constants_are_contiguous() {
    assert!(
        interrupts::IRQ1_KEYBOARD_VECTOR == interrupts::IRQ0_PIT_TIMER_VECTOR + 1,
        "IRQ1 vector must follow IRQ0 vector"
    );
}

/// Contract: exception vector constants match x86 spec.
/// Given: The subsystem is initialized with the explicit preconditions in this test body, including any literal addresses, vectors, sizes, flags, and constants used below.
/// When: The exact operation sequence in this function is executed against that state.
/// Then: All assertions must hold for the checked values and state transitions, preserving the contract "exception vector constants match x86 spec".
/// Failure Impact: Indicates a regression in subsystem behavior, ABI/layout, synchronization, or lifecycle semantics and should be treated as release-blocking until understood.
#[test_case]
fn test_exception_vector_constants_match_x86_spec() {
    assert!(
        interrupts::EXCEPTION_DIVIDE_ERROR == 0,
        "divide error vector must be 0"
    );
    assert!(
        interrupts::EXCEPTION_INVALID_OPCODE == 6,
        "invalid opcode vector must be 6"
    );
    assert!(
        interrupts::EXCEPTION_DEVICE_NOT_AVAILABLE == 7,
        "device-not-available vector must be 7"
    );
    assert!(
        interrupts::EXCEPTION_DOUBLE_FAULT == 8,
        "double-fault vector must be 8"
    );
    assert!(
        interrupts::EXCEPTION_GENERAL_PROTECTION == 13,
        "general-protection vector must be 13"
    );
    assert!(
        interrupts::EXCEPTION_PAGE_FAULT == 14,
        "page-fault vector must be 14"
    );
    assert!(
        interrupts::SYSCALL_INT80_VECTOR == 0x80,
        "syscall vector must be 0x80"
    );
}

/// Contract: pit divisor calculation.
/// Given: The subsystem is initialized with the explicit preconditions in this test body, including any literal addresses, vectors, sizes, flags, and constants used below.
/// When: The exact operation sequence in this function is executed against that state.
/// Then: All assertions must hold for the checked values and state transitions, preserving the contract "pit divisor calculation".
/// Failure Impact: Indicates a regression in subsystem behavior, ABI/layout, synchronization, or lifecycle semantics and should be treated as release-blocking until understood.
#[test_case]
fn test_pit_divisor_calculation() {
    assert!(interrupts::pit_divisor_for_hz(0) == 0);
    assert!(interrupts::pit_divisor_for_hz(1) == u16::MAX);
    assert!(interrupts::pit_divisor_for_hz(250) == 4772);
    assert!(interrupts::pit_divisor_for_hz(1000) == 1193);
    assert!(interrupts::pit_divisor_for_hz(2_000_000) == 1);
}

/// Contract: int 0x80 dispatches through the static syscall table and
/// leaves `eax` untouched for an unrecognized syscall number.
/// Given: The subsystem is initialized with the explicit preconditions in this test body, including any literal addresses, vectors, sizes, flags, and constants used below.
/// When: The exact operation sequence in this function is executed against that state.
/// Then: All assertions must hold for the checked values and state transitions, preserving the contract "int 0x80 dispatches through static syscall table".
/// Failure Impact: Indicates a regression in subsystem behavior, ABI/layout, synchronization, or lifecycle semantics and should be treated as release-blocking until understood.
#[test_case]
fn test_int80_unknown_syscall_leaves_eax_untouched() {
    interrupts::init();
    const UNKNOWN_SYSCALL: u32 = 0xFFFF;
    let mut eax: u32 = UNKNOWN_SYSCALL;
    // SAFETY:
    // - `interrupts::init()` loaded an IDT containing the `int 0x80` gate.
    // - The test executes in ring 0, so invoking software interrupt 0x80 is valid.
    // - Register constraints match the syscall ABI used by `syscall::dispatch`.
    unsafe {
        core::arch::asm!(
            "int 0x80",
            inout("eax") eax,
            in("ebx") 0u32,
            in("ecx") 0u32,
            in("edx") 0u32,
        );
    }

    assert!(
        eax == UNKNOWN_SYSCALL,
        "unrecognized syscall number must leave eax untouched"
    );
}

/// Contract: read/write syscall ids round-trip through `from_u32`.
/// Given: The subsystem is initialized with the explicit preconditions in this test body, including any literal addresses, vectors, sizes, flags, and constants used below.
/// When: The exact operation sequence in this function is executed against that state.
/// Then: All assertions must hold for the checked values and state transitions, preserving the contract "syscall id table matches the documented numbers".
/// Failure Impact: Indicates a regression in subsystem behavior, ABI/layout, synchronization, or lifecycle semantics and should be treated as release-blocking until understood.
#[test_case]
fn test_syscall_id_table_matches_documented_numbers() {
    assert_eq!(SyscallId::from_u32(0), Some(SyscallId::Read));
    assert_eq!(SyscallId::from_u32(1), Some(SyscallId::Write));
    assert_eq!(SyscallId::from_u32(2), Some(SyscallId::Exit));
    assert_eq!(SyscallId::from_u32(3), Some(SyscallId::Exec));
    assert_eq!(SyscallId::from_u32(4), Some(SyscallId::Fork));
    assert_eq!(SyscallId::from_u32(5), Some(SyscallId::Wait));
    assert_eq!(SyscallId::from_u32(10), Some(SyscallId::Clone));
    assert_eq!(SyscallId::from_u32(11), Some(SyscallId::FutexWait));
    assert_eq!(SyscallId::from_u32(12), Some(SyscallId::FutexWake));
    assert_eq!(SyscallId::from_u32(13), Some(SyscallId::Ls));
    assert_eq!(SyscallId::from_u32(6), None);
}

//! Process ELF32 loader contract tests.
//!
//! Builds a minimal in-memory ELF32 `ET_EXEC`/`EM_386` image by hand (no
//! FAT12/ATA dependency) and exercises `process::load_elf_into` directly:
//! segment mapping, BSS zero-fill, stack setup, and the loader's rejection
//! paths.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(kaos_kernel::testing::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use alloc::vec::Vec;
use core::panic::PanicInfo;
use kaos_kernel::arch::interrupts;
use kaos_kernel::memory::{heap, pmm, vmm};
use kaos_kernel::process::{self, ExecError};

#[no_mangle]
#[link_section = ".text.boot"]
pub extern "C" fn KernelMain(_kernel_size: u64) -> ! {
    kaos_kernel::drivers::serial::init();
    pmm::init(false);
    interrupts::init();
    vmm::init();
    heap::init();

    test_main();

    loop {
        core::hint::spin_loop();
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    kaos_kernel::testing::test_panic_handler(info)
}

const EHDR_SIZE: u32 = 52;
const PHDR_SIZE: u32 = 32;

/// Hand-assembles a minimal little-endian ELF32 `ET_EXEC`/`EM_386` image
/// with a single `PT_LOAD` segment holding `code`, loaded at `vaddr` with
/// `memsz` bytes reserved (`memsz > code.len()` leaves a zero-filled BSS
/// tail), writable per `writable`.
fn build_elf32(vaddr: u32, code: &[u8], memsz: u32, writable: bool) -> Vec<u8> {
    let p_offset = EHDR_SIZE + PHDR_SIZE;
    let mut image = Vec::with_capacity((p_offset + code.len() as u32) as usize);

    image.extend_from_slice(&[0x7F, b'E', b'L', b'F']); // e_ident magic
    image.push(1); // EI_CLASS = ELFCLASS32
    image.push(1); // EI_DATA = ELFDATA2LSB
    image.push(1); // EI_VERSION
    image.extend_from_slice(&[0u8; 9]); // EI_OSABI..EI_PAD
    image.extend_from_slice(&2u16.to_le_bytes()); // e_type = ET_EXEC
    image.extend_from_slice(&3u16.to_le_bytes()); // e_machine = EM_386
    image.extend_from_slice(&1u32.to_le_bytes()); // e_version
    image.extend_from_slice(&vaddr.to_le_bytes()); // e_entry
    image.extend_from_slice(&EHDR_SIZE.to_le_bytes()); // e_phoff
    image.extend_from_slice(&0u32.to_le_bytes()); // e_shoff
    image.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    image.extend_from_slice(&(EHDR_SIZE as u16).to_le_bytes()); // e_ehsize
    image.extend_from_slice(&(PHDR_SIZE as u16).to_le_bytes()); // e_phentsize
    image.extend_from_slice(&1u16.to_le_bytes()); // e_phnum
    image.extend_from_slice(&0u16.to_le_bytes()); // e_shentsize
    image.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
    image.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx
    assert_eq!(image.len() as u32, EHDR_SIZE);

    image.extend_from_slice(&1u32.to_le_bytes()); // p_type = PT_LOAD
    image.extend_from_slice(&p_offset.to_le_bytes()); // p_offset
    image.extend_from_slice(&vaddr.to_le_bytes()); // p_vaddr
    image.extend_from_slice(&vaddr.to_le_bytes()); // p_paddr (unused by this loader)
    image.extend_from_slice(&(code.len() as u32).to_le_bytes()); // p_filesz
    image.extend_from_slice(&memsz.to_le_bytes()); // p_memsz
    let flags: u32 = if writable { 1 << 1 } else { 0 };
    image.extend_from_slice(&flags.to_le_bytes()); // p_flags
    image.extend_from_slice(&(vmm::PAGE_SIZE).to_le_bytes()); // p_align
    assert_eq!(image.len() as u32, EHDR_SIZE + PHDR_SIZE);

    image.extend_from_slice(code);
    image
}

const CODE_VIRT: u32 = 0x0040_0000;

/// Contract: a single-segment image maps its entry point present+user,
/// copies its bytes verbatim, and returns the shared stack-top constant.
#[test_case]
fn test_load_elf_into_maps_code_segment_and_stack() {
    let code = [0x90u8, 0x90, 0xCC, 0x90]; // nop; nop; int3; nop
    let image = build_elf32(CODE_VIRT, &code, code.len() as u32, false);

    let dir = vmm::clone_directory(vmm::kernel_directory()).expect("clone should succeed");
    let loaded = process::load_elf_into(dir, &image).expect("well-formed image must load");

    assert_eq!(loaded.entry_point, CODE_VIRT);
    assert_eq!(loaded.user_esp, process::USER_STACK_TOP);
    assert!(vmm::is_mapped(dir, CODE_VIRT), "entry page must be mapped");
    assert!(
        vmm::is_mapped(dir, process::USER_STACK_BASE),
        "stack page must be mapped"
    );

    // SAFETY: `dir` is fully populated (kernel half cloned, code/stack
    // mapped above); switching to it and back leaves no dangling mapping.
    unsafe {
        vmm::switch_directory(dir);
        for (i, expected) in code.iter().enumerate() {
            let actual = core::ptr::read_volatile((CODE_VIRT as usize + i) as *const u8);
            assert_eq!(actual, *expected, "code byte {} mismatch after mapping", i);
        }
        vmm::switch_directory(vmm::kernel_directory());
    }

    vmm::free_directory(dir);
}

/// Contract: `p_memsz > p_filesz` zero-fills the BSS tail rather than
/// leaving it uninitialized.
#[test_case]
fn test_load_elf_into_zero_fills_bss_tail() {
    let code = [0xAAu8, 0xBB];
    let memsz = vmm::PAGE_SIZE; // force a BSS tail well past the file bytes
    let image = build_elf32(CODE_VIRT, &code, memsz, true);

    let dir = vmm::clone_directory(vmm::kernel_directory()).expect("clone should succeed");
    process::load_elf_into(dir, &image).expect("image with bss tail must load");

    // SAFETY: see above.
    unsafe {
        vmm::switch_directory(dir);
        assert_eq!(core::ptr::read_volatile(CODE_VIRT as *const u8), 0xAA);
        assert_eq!(core::ptr::read_volatile((CODE_VIRT + 1) as *const u8), 0xBB);
        assert_eq!(core::ptr::read_volatile((CODE_VIRT + 2) as *const u8), 0);
        assert_eq!(
            core::ptr::read_volatile((CODE_VIRT + vmm::PAGE_SIZE - 1) as *const u8),
            0
        );
        vmm::switch_directory(vmm::kernel_directory());
    }

    vmm::free_directory(dir);
}

/// Contract: a truncated header is rejected before any mapping happens.
#[test_case]
fn test_load_elf_into_rejects_truncated_header() {
    let dir = vmm::clone_directory(vmm::kernel_directory()).expect("clone should succeed");
    let short_image = [0x7F, b'E', b'L', b'F'];
    let result = process::load_elf_into(dir, &short_image);
    assert!(
        matches!(result, Err(ExecError::NotAnElfExecutable)),
        "truncated image must be rejected as not a recognized ELF executable"
    );
    vmm::free_directory(dir);
}

/// Contract: a bad magic number is rejected.
#[test_case]
fn test_load_elf_into_rejects_bad_magic() {
    let code = [0x90u8];
    let mut image = build_elf32(CODE_VIRT, &code, 1, false);
    image[0] = 0x00;

    let dir = vmm::clone_directory(vmm::kernel_directory()).expect("clone should succeed");
    let result = process::load_elf_into(dir, &image);
    assert!(
        matches!(result, Err(ExecError::NotAnElfExecutable)),
        "corrupted ELF magic must be rejected"
    );
    vmm::free_directory(dir);
}

/// Contract: a segment whose virtual range collides with the fixed user
/// stack window is rejected.
#[test_case]
fn test_load_elf_into_rejects_segment_overlapping_stack() {
    let code = [0x90u8; 4];
    let vaddr = process::USER_STACK_BASE;
    let image = build_elf32(vaddr, &code, code.len() as u32, false);

    let dir = vmm::clone_directory(vmm::kernel_directory()).expect("clone should succeed");
    let result = process::load_elf_into(dir, &image);
    assert!(
        matches!(result, Err(ExecError::SegmentOutOfBounds)),
        "a segment overlapping the user stack window must be rejected"
    );
    vmm::free_directory(dir);
}

/// Contract: `ExecError` variants are discriminant-distinct.
#[test_case]
fn test_exec_error_variant_distinction() {
    assert_ne!(ExecError::InvalidName, ExecError::NotFound);
    assert_eq!(ExecError::Io, ExecError::Io);
}

/// Contract: the loader's max image size bound matches its documented
/// constant (guards against accidental redefinition drift).
#[test_case]
fn test_max_image_size_constant_is_positive() {
    assert!(process::USER_PROGRAM_MAX_IMAGE_SIZE > 0);
}

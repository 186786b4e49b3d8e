//! FAT12-backed ELF32 loader for user-mode programs.
//!
//! Reads a flat file from FAT12, parses it as a 32-bit little-endian
//! `ET_EXEC` ELF image for the `EM_386` machine, maps every `PT_LOAD`
//! segment into a target page directory (zero-filling the BSS portion —
//! the bytes between `p_filesz` and `p_memsz`), and maps a single-page
//! initial user stack.

use alloc::vec::Vec;

use crate::io::fat12::{self, Fat12Error};
use crate::memory::pmm;
use crate::memory::vmm::{self, PTE_PRESENT, PTE_USER, PTE_WRITABLE};

use super::types::{
    ExecError, ExecResult, LoadedProgram, USER_PROGRAM_MAX_IMAGE_SIZE, USER_STACK_BASE,
    USER_STACK_PAGES, USER_STACK_TOP,
};

const EI_MAG0: usize = 0;
const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ELFCLASS32: u8 = 1;
const ELFDATA2LSB: u8 = 1;
const ET_EXEC: u16 = 2;
const EM_386: u16 = 3;
const PT_LOAD: u32 = 1;
const PF_W: u32 = 1 << 1;

const EHDR_SIZE: usize = 52;
const PHDR_SIZE: usize = 32;

/// First page of user address space is left unmapped so a null-pointer
/// dereference faults instead of silently reading/writing real data.
const USER_LOW_GUARD: u32 = vmm::PAGE_SIZE;

/// Loads a flat file from FAT12 and validates its length before any ELF
/// parsing happens.
pub fn load_program_image(file_name_8_3: &str) -> ExecResult<Vec<u8>> {
    let image = fat12::read_file(file_name_8_3).map_err(map_fat12_error)?;
    if image.is_empty() {
        return Err(ExecError::EmptyImage);
    }
    if image.len() > USER_PROGRAM_MAX_IMAGE_SIZE {
        return Err(ExecError::FileTooLarge);
    }
    Ok(image)
}

fn map_fat12_error(error: Fat12Error) -> ExecError {
    match error {
        Fat12Error::InvalidFileName => ExecError::InvalidName,
        Fat12Error::NotFound => ExecError::NotFound,
        Fat12Error::IsDirectory => ExecError::IsDirectory,
        Fat12Error::Ata(_)
        | Fat12Error::CorruptDirectoryEntry
        | Fat12Error::CorruptFatChain
        | Fat12Error::UnexpectedEof => ExecError::Io,
    }
}

#[inline]
fn read_u16(image: &[u8], offset: usize) -> Option<u16> {
    let b = image.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([b[0], b[1]]))
}

#[inline]
fn read_u32(image: &[u8], offset: usize) -> Option<u32> {
    let b = image.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[inline]
fn align_down(x: u32, align: u32) -> u32 {
    x & !(align - 1)
}

#[inline]
fn align_up(x: u32, align: u32) -> u32 {
    (x + align - 1) & !(align - 1)
}

struct ProgramHeader {
    p_offset: u32,
    p_vaddr: u32,
    p_filesz: u32,
    p_memsz: u32,
    p_flags: u32,
}

fn parse_program_headers(image: &[u8]) -> ExecResult<(u32, Vec<ProgramHeader>)> {
    if image.len() < EHDR_SIZE {
        return Err(ExecError::NotAnElfExecutable);
    }
    if image[EI_MAG0..EI_MAG0 + 4] != ELF_MAGIC {
        return Err(ExecError::NotAnElfExecutable);
    }
    if image[EI_CLASS] != ELFCLASS32 || image[EI_DATA] != ELFDATA2LSB {
        return Err(ExecError::NotAnElfExecutable);
    }

    let e_type = read_u16(image, 16).ok_or(ExecError::NotAnElfExecutable)?;
    let e_machine = read_u16(image, 18).ok_or(ExecError::NotAnElfExecutable)?;
    if e_type != ET_EXEC || e_machine != EM_386 {
        return Err(ExecError::NotAnElfExecutable);
    }

    let e_entry = read_u32(image, 24).ok_or(ExecError::NotAnElfExecutable)?;
    let e_phoff = read_u32(image, 28).ok_or(ExecError::NotAnElfExecutable)? as usize;
    let e_phentsize = read_u16(image, 42).ok_or(ExecError::NotAnElfExecutable)? as usize;
    let e_phnum = read_u16(image, 44).ok_or(ExecError::NotAnElfExecutable)? as usize;

    if e_phentsize < PHDR_SIZE {
        return Err(ExecError::NotAnElfExecutable);
    }

    let mut headers = Vec::with_capacity(e_phnum);
    for i in 0..e_phnum {
        let base = e_phoff + i * e_phentsize;
        let entry = image
            .get(base..base + PHDR_SIZE)
            .ok_or(ExecError::NotAnElfExecutable)?;
        let p_type = u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]);
        let p_offset = u32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]);
        let p_vaddr = u32::from_le_bytes([entry[8], entry[9], entry[10], entry[11]]);
        let p_filesz = u32::from_le_bytes([entry[16], entry[17], entry[18], entry[19]]);
        let p_memsz = u32::from_le_bytes([entry[20], entry[21], entry[22], entry[23]]);
        let p_flags = u32::from_le_bytes([entry[24], entry[25], entry[26], entry[27]]);

        if p_type != PT_LOAD {
            continue;
        }
        headers.push(ProgramHeader {
            p_offset,
            p_vaddr,
            p_filesz,
            p_memsz,
            p_flags,
        });
    }

    Ok((e_entry, headers))
}

/// Zeroes and maps one fresh physical frame at `virt` in `dir`, returning
/// its physical address so the caller can write through the direct map
/// without a second lookup.
fn map_fresh_page(dir: u32, virt: u32, writable: bool) -> ExecResult<u32> {
    let frame = pmm::alloc_frame().ok_or(ExecError::OutOfMemory)?;
    let phys = frame.physical_address();
    // SAFETY: the frame was just allocated and is reachable through the
    // direct-map window, which covers all physical memory this PMM tracks.
    unsafe {
        core::ptr::write_bytes((phys + vmm::DIRECT_MAP_BASE) as *mut u8, 0, vmm::PAGE_SIZE as usize);
    }
    let mut flags = PTE_PRESENT | PTE_USER;
    if writable {
        flags |= PTE_WRITABLE;
    }
    if !vmm::map_page_in_dir(dir, virt, phys, flags) {
        pmm::free_frame(phys / vmm::PAGE_SIZE);
        return Err(ExecError::MappingFailed);
    }
    Ok(phys)
}

/// Validates that a segment's virtual range is entirely within user space
/// and does not collide with the fixed stack window.
fn validate_segment_bounds(vaddr: u32, memsz: u32) -> ExecResult<()> {
    if memsz == 0 {
        return Ok(());
    }
    let end = vaddr.checked_add(memsz).ok_or(ExecError::SegmentOutOfBounds)?;
    if vaddr < USER_LOW_GUARD {
        return Err(ExecError::SegmentOutOfBounds);
    }
    if end > vmm::DIRECT_MAP_BASE {
        return Err(ExecError::SegmentOutOfBounds);
    }
    if vaddr < USER_STACK_TOP && end > USER_STACK_BASE {
        return Err(ExecError::SegmentOutOfBounds);
    }
    Ok(())
}

/// Maps one `PT_LOAD` segment page by page, copying `p_filesz` bytes from
/// the image and zero-filling the remainder up to `p_memsz` (the BSS tail).
fn map_segment(dir: u32, image: &[u8], header: &ProgramHeader) -> ExecResult<()> {
    validate_segment_bounds(header.p_vaddr, header.p_memsz)?;

    if header.p_filesz > header.p_memsz {
        return Err(ExecError::SegmentOutOfBounds);
    }
    let file_end = (header.p_offset as usize)
        .checked_add(header.p_filesz as usize)
        .ok_or(ExecError::SegmentOutOfBounds)?;
    if file_end > image.len() {
        return Err(ExecError::SegmentOutOfBounds);
    }

    let writable = header.p_flags & PF_W != 0;
    let page_start = align_down(header.p_vaddr, vmm::PAGE_SIZE);
    let page_end = align_up(header.p_vaddr + header.p_memsz, vmm::PAGE_SIZE);

    let mut page = page_start;
    while page < page_end {
        let page_phys = map_fresh_page(dir, page, writable)?;

        // Copy whatever portion of this page overlaps [vaddr, vaddr+filesz).
        let seg_file_start = header.p_vaddr;
        let seg_file_end = header.p_vaddr + header.p_filesz;
        let copy_start = page.max(seg_file_start);
        let copy_end = (page + vmm::PAGE_SIZE).min(seg_file_end);
        if copy_start < copy_end {
            let file_offset = header.p_offset + (copy_start - header.p_vaddr);
            let len = (copy_end - copy_start) as usize;
            let src = &image[file_offset as usize..file_offset as usize + len];
            let dest_virt = page_phys + vmm::DIRECT_MAP_BASE + (copy_start - page);
            // SAFETY: `dest_virt` falls within the freshly mapped, zeroed
            // frame reached through the direct-map window.
            unsafe {
                core::ptr::copy_nonoverlapping(src.as_ptr(), dest_virt as *mut u8, len);
            }
        }

        page += vmm::PAGE_SIZE;
    }

    Ok(())
}

/// Maps the single-page initial user stack and returns the initial `esp`.
fn map_user_stack(dir: u32) -> ExecResult<u32> {
    for i in 0..USER_STACK_PAGES {
        let page = USER_STACK_BASE + i * vmm::PAGE_SIZE;
        let _ = map_fresh_page(dir, page, true)?;
    }
    Ok(USER_STACK_TOP)
}

/// Parses `image` as an ELF32 executable and maps its segments plus a
/// fresh user stack into `dir`. Returns the entry point and initial `esp`.
pub fn load_elf_into(dir: u32, image: &[u8]) -> ExecResult<LoadedProgram> {
    let (entry_point, headers) = parse_program_headers(image)?;
    if entry_point < USER_LOW_GUARD || entry_point >= vmm::DIRECT_MAP_BASE {
        return Err(ExecError::SegmentOutOfBounds);
    }

    for header in &headers {
        map_segment(dir, image, header)?;
    }

    let user_esp = map_user_stack(dir)?;

    Ok(LoadedProgram {
        entry_point,
        user_esp,
    })
}

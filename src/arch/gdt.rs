//! Global Descriptor Table (GDT) and Task-State Segment (TSS) setup.
//!
//! Installs a flat 32-bit protected-mode GDT with kernel code/data, user
//! code/data, and one available 32-bit TSS descriptor. The TSS is used only
//! to hold `esp0`/`ss0`, the stack the CPU loads on a ring3 -> ring0
//! transition; the scheduler updates `esp0` on every context switch.

use core::arch::{asm, global_asm};
use core::cell::UnsafeCell;
use core::mem::size_of;
use core::sync::atomic::{AtomicBool, Ordering};

// Layout of our GDT array:
//   [0] null
//   [1] kernel code
//   [2] kernel data
//   [3] user code
//   [4] user data
//   [5] TSS descriptor
const GDT_ENTRY_COUNT: usize = 6;
const KERNEL_CODE_INDEX: u16 = 1;
const KERNEL_DATA_INDEX: u16 = 2;
const USER_CODE_INDEX: u16 = 3;
const USER_DATA_INDEX: u16 = 4;
const TSS_INDEX: u16 = 5;

/// Requested Privilege Level (RPL) for ring 3.
const RPL_RING3: u16 = 0x3;

/// Kernel code segment selector (ring 0). Matches the hardcoded `0x08` used
/// throughout the original kernel's ring-3 entry sequence.
pub const KERNEL_CODE_SELECTOR: u16 = KERNEL_CODE_INDEX << 3;

/// Kernel data segment selector (ring 0). Matches `0x10`.
pub const KERNEL_DATA_SELECTOR: u16 = KERNEL_DATA_INDEX << 3;

/// User code segment selector (ring 3). Matches `0x1B`.
pub const USER_CODE_SELECTOR: u16 = (USER_CODE_INDEX << 3) | RPL_RING3;

/// User data segment selector (ring 3). Matches `0x23`.
pub const USER_DATA_SELECTOR: u16 = (USER_DATA_INDEX << 3) | RPL_RING3;

/// TSS selector. Matches `0x28`.
pub const TSS_SELECTOR: u16 = TSS_INDEX << 3;

// x86 descriptor access-byte bits.
const ACCESS_PRESENT: u8 = 1 << 7;
const ACCESS_SEGMENT: u8 = 1 << 4; // 1 = code/data segment, 0 = system segment
const ACCESS_EXECUTABLE: u8 = 1 << 3; // code=1, data=0
const ACCESS_RW: u8 = 1 << 1; // readable code / writable data
const ACCESS_RING3: u8 = 0b11 << 5; // DPL=3
const ACCESS_TSS_32_AVAILABLE: u8 = 0x9;

// Granularity-byte upper nibble: G=1 (limit in 4K units), DB=1 (32-bit
// default operand size) for code/data; TSS descriptors leave these clear.
const FLAGS_PROTECTED_32: u8 = (1 << 7) | (1 << 6);

#[repr(C, packed)]
struct DescriptorTablePointer {
    limit: u16,
    base: u32,
}

/// 32-bit Task State Segment. Only `ss0`/`esp0` are used by this kernel
/// (loaded by the CPU on a ring3 -> ring0 transition); the rest of the
/// fields exist purely to satisfy the hardware-mandated TSS layout.
#[repr(C, packed)]
struct TaskStateSegment {
    link: u16,
    _link_hi: u16,
    esp0: u32,
    ss0: u16,
    _ss0_hi: u16,
    esp1: u32,
    ss1: u16,
    _ss1_hi: u16,
    esp2: u32,
    ss2: u16,
    _ss2_hi: u16,
    cr3: u32,
    eip: u32,
    eflags: u32,
    eax: u32,
    ecx: u32,
    edx: u32,
    ebx: u32,
    esp: u32,
    ebp: u32,
    esi: u32,
    edi: u32,
    es: u16,
    _es_hi: u16,
    cs: u16,
    _cs_hi: u16,
    ss: u16,
    _ss_hi: u16,
    ds: u16,
    _ds_hi: u16,
    fs: u16,
    _fs_hi: u16,
    gs: u16,
    _gs_hi: u16,
    ldtr: u16,
    _ldtr_hi: u16,
    _reserved: u16,
    io_map_base: u16,
}

impl TaskStateSegment {
    const fn new() -> Self {
        Self {
            link: 0,
            _link_hi: 0,
            esp0: 0,
            ss0: 0,
            _ss0_hi: 0,
            esp1: 0,
            ss1: 0,
            _ss1_hi: 0,
            esp2: 0,
            ss2: 0,
            _ss2_hi: 0,
            cr3: 0,
            eip: 0,
            eflags: 0,
            eax: 0,
            ecx: 0,
            edx: 0,
            ebx: 0,
            esp: 0,
            ebp: 0,
            esi: 0,
            edi: 0,
            es: 0,
            _es_hi: 0,
            cs: 0,
            _cs_hi: 0,
            ss: 0,
            _ss_hi: 0,
            ds: 0,
            _ds_hi: 0,
            fs: 0,
            _fs_hi: 0,
            gs: 0,
            _gs_hi: 0,
            ldtr: 0,
            _ldtr_hi: 0,
            _reserved: 0,
            io_map_base: 0,
        }
    }
}

struct GdtState {
    gdt: UnsafeCell<[u64; GDT_ENTRY_COUNT]>,
    tss: UnsafeCell<TaskStateSegment>,
}

impl GdtState {
    const fn new() -> Self {
        Self {
            gdt: UnsafeCell::new([0; GDT_ENTRY_COUNT]),
            tss: UnsafeCell::new(TaskStateSegment::new()),
        }
    }
}

// SAFETY: single-core kernel; mutation happens only during boot init or
// through the dedicated setter below.
unsafe impl Sync for GdtState {}

static STATE: GdtState = GdtState::new();
static INITIALIZED: AtomicBool = AtomicBool::new(false);

extern "C" {
    // Arguments follow cdecl: pushed right-to-left.
    fn gdt_flush_and_reload(
        gdt_ptr: *const DescriptorTablePointer,
        data_selector: u16,
        code_selector: u16,
        tss_selector: u16,
    );
}

global_asm!(
    r#"
    .section .text
    .global gdt_flush_and_reload
    .type gdt_flush_and_reload, @function
gdt_flush_and_reload:
    push ebp
    mov ebp, esp

    mov eax, [ebp + 8]
    lgdt [eax]

    movzx eax, word ptr [ebp + 12]
    mov ds, ax
    mov es, ax
    mov fs, ax
    mov gs, ax
    mov ss, ax

    movzx eax, word ptr [ebp + 20]
    ltr ax

    movzx eax, word ptr [ebp + 16]
    push eax
    push offset 1f
    retf
1:
    pop ebp
    ret
"#,
);

#[inline]
const fn build_code_or_data_descriptor(access: u8, flags: u8) -> u64 {
    let base: u64 = 0;
    let limit: u64 = 0xF_FFFF;
    let mut desc = 0u64;
    desc |= limit & 0xFFFF;
    desc |= (base & 0xFFFF) << 16;
    desc |= ((base >> 16) & 0xFF) << 32;
    desc |= (access as u64) << 40;
    desc |= ((limit >> 16) & 0xF) << 48;
    desc |= ((flags as u64) & 0xF0) << 48;
    desc |= ((base >> 24) & 0xFF) << 56;
    desc
}

#[inline]
const fn build_tss_descriptor(base: u32, limit: u32) -> u64 {
    let mut desc = 0u64;
    desc |= (limit as u64) & 0xFFFF;
    desc |= ((base as u64) & 0xFFFF) << 16;
    desc |= (((base as u64) >> 16) & 0xFF) << 32;
    desc |= ((ACCESS_PRESENT | ACCESS_TSS_32_AVAILABLE) as u64) << 40;
    desc |= (((limit >> 16) as u64) & 0x0F) << 48;
    desc |= (((base as u64) >> 24) & 0xFF) << 56;
    desc
}

#[inline]
fn read_esp() -> u32 {
    let esp: u32;
    // SAFETY: reading esp into a register is side-effect free.
    unsafe {
        asm!("mov {0}, esp", out(reg) esp, options(nomem, nostack, preserves_flags));
    }
    esp
}

/// Initializes and loads the kernel GDT/TSS. Idempotent.
pub fn init() {
    let current_esp = read_esp();

    // SAFETY: `STATE` is a process-wide singleton mutated only here, during
    // controlled boot sequencing, before any other code depends on it.
    unsafe {
        let gdt = &mut *STATE.gdt.get();
        let tss = &mut *STATE.tss.get();

        *gdt = [0; GDT_ENTRY_COUNT];
        *tss = TaskStateSegment::new();

        tss.esp0 = current_esp;
        tss.ss0 = KERNEL_DATA_SELECTOR;
        tss.io_map_base = size_of::<TaskStateSegment>() as u16;

        gdt[KERNEL_CODE_INDEX as usize] = build_code_or_data_descriptor(
            ACCESS_PRESENT | ACCESS_SEGMENT | ACCESS_EXECUTABLE | ACCESS_RW,
            FLAGS_PROTECTED_32,
        );
        gdt[KERNEL_DATA_INDEX as usize] = build_code_or_data_descriptor(
            ACCESS_PRESENT | ACCESS_SEGMENT | ACCESS_RW,
            FLAGS_PROTECTED_32,
        );
        gdt[USER_CODE_INDEX as usize] = build_code_or_data_descriptor(
            ACCESS_PRESENT | ACCESS_RING3 | ACCESS_SEGMENT | ACCESS_EXECUTABLE | ACCESS_RW,
            FLAGS_PROTECTED_32,
        );
        gdt[USER_DATA_INDEX as usize] = build_code_or_data_descriptor(
            ACCESS_PRESENT | ACCESS_RING3 | ACCESS_SEGMENT | ACCESS_RW,
            FLAGS_PROTECTED_32,
        );

        let tss_base = tss as *const TaskStateSegment as u32;
        let tss_limit = (size_of::<TaskStateSegment>() - 1) as u32;
        gdt[TSS_INDEX as usize] = build_tss_descriptor(tss_base, tss_limit);

        let ptr = DescriptorTablePointer {
            limit: (size_of::<u64>() * GDT_ENTRY_COUNT - 1) as u16,
            base: gdt.as_ptr() as u32,
        };

        gdt_flush_and_reload(
            &ptr,
            KERNEL_DATA_SELECTOR,
            KERNEL_CODE_SELECTOR,
            TSS_SELECTOR,
        );
    }

    INITIALIZED.store(true, Ordering::Release);
}

pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::Acquire)
}

/// Updates `esp0` in the loaded TSS, called by the scheduler on every
/// context switch so the next ring3 -> ring0 transition lands on the
/// now-current task's kernel stack.
pub fn set_kernel_esp0(esp0: u32) {
    // SAFETY: `STATE.tss` is the singleton active TSS for this CPU.
    unsafe {
        (*STATE.tss.get()).esp0 = esp0;
    }
}

pub fn kernel_esp0() -> u32 {
    // SAFETY: reading from the singleton TSS returns a plain value copy.
    unsafe { (*STATE.tss.get()).esp0 }
}

/// Returns a snapshot copy of the active GDT entries.
pub fn descriptor_snapshot() -> [u64; GDT_ENTRY_COUNT] {
    // SAFETY: reading the table into a by-value array copy does not create
    // aliasing issues.
    unsafe { *STATE.gdt.get() }
}

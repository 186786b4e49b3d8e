//! Interrupt and PIC wiring for Rust-side IRQ/exception/syscall handling.

use core::arch::asm;
use core::cell::UnsafeCell;
use core::mem::size_of;

use crate::arch::port::PortByte;

const IDT_ENTRIES: usize = 256;
const IRQ_BASE: u8 = 32;
pub const IRQ0_PIT_TIMER_VECTOR: u8 = IRQ_BASE;
pub const IRQ1_KEYBOARD_VECTOR: u8 = IRQ_BASE + 1;
const IRQ2_PIC_CASCADE_VECTOR: u8 = IRQ_BASE + 2;
const IRQ3_COM2_VECTOR: u8 = IRQ_BASE + 3;
const IRQ4_COM1_VECTOR: u8 = IRQ_BASE + 4;
const IRQ5_LPT2_OR_SOUND_VECTOR: u8 = IRQ_BASE + 5;
const IRQ6_FLOPPY_VECTOR: u8 = IRQ_BASE + 6;
const IRQ7_LPT1_OR_SPURIOUS_VECTOR: u8 = IRQ_BASE + 7;
const IRQ8_CMOS_RTC_VECTOR: u8 = IRQ_BASE + 8;
const IRQ9_ACPI_OR_LEGACY_VECTOR: u8 = IRQ_BASE + 9;
const IRQ10_FREE_VECTOR: u8 = IRQ_BASE + 10;
const IRQ11_FREE_VECTOR: u8 = IRQ_BASE + 11;
const IRQ12_PS2_MOUSE_VECTOR: u8 = IRQ_BASE + 12;
const IRQ13_FPU_VECTOR: u8 = IRQ_BASE + 13;
const IRQ14_PRIMARY_ATA_VECTOR: u8 = IRQ_BASE + 14;
const IRQ15_SECONDARY_ATA_VECTOR: u8 = IRQ_BASE + 15;
pub const SYSCALL_INT80_VECTOR: u8 = 0x80;
pub const EXCEPTION_DIVIDE_ERROR: u8 = 0;
pub const EXCEPTION_INVALID_OPCODE: u8 = 6;
pub const EXCEPTION_DEVICE_NOT_AVAILABLE: u8 = 7;
pub const EXCEPTION_DOUBLE_FAULT: u8 = 8;
pub const EXCEPTION_GENERAL_PROTECTION: u8 = 13;
pub const EXCEPTION_PAGE_FAULT: u8 = 14;

const IDT_PRESENT: u8 = 0x80;
const IDT_INTERRUPT_GATE_32: u8 = 0x0E;

const PIC1_COMMAND: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_COMMAND: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;
const PIC_EOI: u8 = 0x20;

const PIC_ICW1_INIT: u8 = 0x10;
const PIC_ICW1_ICW4: u8 = 0x01;
const PIC_ICW4_8086: u8 = 0x01;

const PIT_COMMAND: u16 = 0x43;
const PIT_CHANNEL0: u16 = 0x40;
const PIT_MODE_RATE_GENERATOR: u8 = 0x36;
const PIT_INPUT_HZ: u32 = 1_193_182;
const VGA_TEXT_BUFFER: usize = 0xC00B_8000;
const VGA_COLS: usize = 80;

/// Register/segment state saved by every stub before calling into Rust.
///
/// Layout contract: field order must match the push order in
/// `interrupts_stubs.rs` exactly (`ds` lowest address, `error_code`
/// highest) — `fork_ret` in `scheduler::context_switch` pops the same
/// `ds,es,fs,gs` / `popad` / `add esp,8` sequence for a freshly forked
/// task's copied trap frame.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct SavedRegisters {
    pub ds: u32,
    pub es: u32,
    pub fs: u32,
    pub gs: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp_dummy: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub vector: u32,
    pub error_code: u32,
}

/// Full trap frame for the syscall gate: `SavedRegisters` followed by the
/// hardware `iret` frame. Syscalls always arrive from ring 3, so `esp`/`ss`
/// are guaranteed to be present (unlike an IRQ that could in principle
/// interrupt ring-0 kernel code, where the CPU does not push them).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct TrapFrame {
    pub regs: SavedRegisters,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub esp: u32,
    pub ss: u32,
}

#[path = "interrupts_stubs.rs"]
mod interrupts_stubs;

extern "C" {
    fn irq0_pit_timer_stub();
    fn irq1_keyboard_stub();
    fn irq2_pic_cascade_stub();
    fn irq3_com2_stub();
    fn irq4_com1_stub();
    fn irq5_lpt2_or_sound_stub();
    fn irq6_floppy_stub();
    fn irq7_lpt1_or_spurious_stub();
    fn irq8_cmos_rtc_stub();
    fn irq9_acpi_or_legacy_stub();
    fn irq10_free_stub();
    fn irq11_free_stub();
    fn irq12_ps2_mouse_stub();
    fn irq13_fpu_stub();
    fn irq14_primary_ata_stub();
    fn irq15_secondary_ata_stub();
    fn isr0_divide_by_zero_stub();
    fn isr6_invalid_opcode_stub();
    fn isr7_device_not_available_stub();
    fn isr8_double_fault_stub();
    fn isr13_general_protection_fault_stub();
    fn isr14_page_fault_stub();
    fn int80_syscall_stub();
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl IdtEntry {
    const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            zero: 0,
            type_attr: 0,
            offset_high: 0,
        }
    }

    fn set_handler(&mut self, handler: usize) {
        self.set_handler_with_dpl(handler, 0);
    }

    fn set_handler_with_dpl(&mut self, handler: usize, dpl: u8) {
        self.offset_low = handler as u16;
        self.selector = crate::arch::gdt::KERNEL_CODE_SELECTOR;
        self.zero = 0;
        self.type_attr = IDT_PRESENT | IDT_INTERRUPT_GATE_32 | ((dpl & 0x03) << 5);
        self.offset_high = (handler >> 16) as u16;
    }
}

#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u32,
}

type IrqHandler = fn(u8, &mut SavedRegisters);

/// Holds the IDT and IRQ handler table behind `UnsafeCell` to avoid
/// `static mut` (which permits aliased `&mut` references and is unsound).
struct InterruptState {
    idt: UnsafeCell<[IdtEntry; IDT_ENTRIES]>,
    handlers: UnsafeCell<[Option<IrqHandler>; IDT_ENTRIES]>,
}

impl InterruptState {
    const fn new() -> Self {
        Self {
            idt: UnsafeCell::new([IdtEntry::missing(); IDT_ENTRIES]),
            handlers: UnsafeCell::new([None; IDT_ENTRIES]),
        }
    }
}

// Safety: The kernel is single-threaded (no SMP). The IDT is written only
// during init() before interrupts are enabled. IRQ handler slots are written
// with interrupts disabled and read from dispatch_irq in interrupt context;
// no concurrent mutation is possible.
unsafe impl Sync for InterruptState {}

static STATE: InterruptState = InterruptState::new();

/// Initialize IDT and PIC for IRQ handling.
pub fn init() {
    disable();
    init_idt();
    remap_pic(IRQ_BASE, IRQ_BASE + 8);
    mask_pic();
    clear_irq_handlers();
}

/// Enable interrupts globally.
pub fn enable() {
    unsafe {
        asm!("sti", options(nomem, nostack, preserves_flags));
    }
}

/// Disable interrupts globally.
pub fn disable() {
    unsafe {
        asm!("cli", options(nomem, nostack, preserves_flags));
    }
}

/// Returns whether interrupts are currently enabled (IF flag set).
#[inline]
pub fn are_enabled() -> bool {
    let eflags: u32;
    // SAFETY: reading EFLAGS via pushfd/pop does not modify flags.
    unsafe {
        asm!(
            "pushfd",
            "pop {}",
            out(reg) eflags,
            options(nomem, preserves_flags)
        );
    }
    (eflags & (1 << 9)) != 0
}

fn init_idt() {
    unsafe {
        let idt = &mut *STATE.idt.get();
        idt[EXCEPTION_DIVIDE_ERROR as usize].set_handler(isr0_divide_by_zero_stub as *const () as usize);
        idt[EXCEPTION_INVALID_OPCODE as usize].set_handler(isr6_invalid_opcode_stub as *const () as usize);
        idt[EXCEPTION_DEVICE_NOT_AVAILABLE as usize]
            .set_handler(isr7_device_not_available_stub as *const () as usize);
        idt[EXCEPTION_DOUBLE_FAULT as usize].set_handler(isr8_double_fault_stub as *const () as usize);
        idt[EXCEPTION_GENERAL_PROTECTION as usize]
            .set_handler(isr13_general_protection_fault_stub as *const () as usize);
        idt[EXCEPTION_PAGE_FAULT as usize].set_handler(isr14_page_fault_stub as *const () as usize);
        idt[SYSCALL_INT80_VECTOR as usize]
            .set_handler_with_dpl(int80_syscall_stub as *const () as usize, 3);
        idt[IRQ0_PIT_TIMER_VECTOR as usize].set_handler(irq0_pit_timer_stub as *const () as usize);
        idt[IRQ1_KEYBOARD_VECTOR as usize].set_handler(irq1_keyboard_stub as *const () as usize);
        idt[IRQ2_PIC_CASCADE_VECTOR as usize].set_handler(irq2_pic_cascade_stub as *const () as usize);
        idt[IRQ3_COM2_VECTOR as usize].set_handler(irq3_com2_stub as *const () as usize);
        idt[IRQ4_COM1_VECTOR as usize].set_handler(irq4_com1_stub as *const () as usize);
        idt[IRQ5_LPT2_OR_SOUND_VECTOR as usize].set_handler(irq5_lpt2_or_sound_stub as *const () as usize);
        idt[IRQ6_FLOPPY_VECTOR as usize].set_handler(irq6_floppy_stub as *const () as usize);
        idt[IRQ7_LPT1_OR_SPURIOUS_VECTOR as usize].set_handler(irq7_lpt1_or_spurious_stub as *const () as usize);
        idt[IRQ8_CMOS_RTC_VECTOR as usize].set_handler(irq8_cmos_rtc_stub as *const () as usize);
        idt[IRQ9_ACPI_OR_LEGACY_VECTOR as usize].set_handler(irq9_acpi_or_legacy_stub as *const () as usize);
        idt[IRQ10_FREE_VECTOR as usize].set_handler(irq10_free_stub as *const () as usize);
        idt[IRQ11_FREE_VECTOR as usize].set_handler(irq11_free_stub as *const () as usize);
        idt[IRQ12_PS2_MOUSE_VECTOR as usize].set_handler(irq12_ps2_mouse_stub as *const () as usize);
        idt[IRQ13_FPU_VECTOR as usize].set_handler(irq13_fpu_stub as *const () as usize);
        idt[IRQ14_PRIMARY_ATA_VECTOR as usize].set_handler(irq14_primary_ata_stub as *const () as usize);
        idt[IRQ15_SECONDARY_ATA_VECTOR as usize].set_handler(irq15_secondary_ata_stub as *const () as usize);

        let idt_ptr = IdtPointer {
            limit: (size_of::<IdtEntry>() * IDT_ENTRIES - 1) as u16,
            base: STATE.idt.get() as u32,
        };

        asm!(
            "lidt [{}]",
            in(reg) &idt_ptr,
            options(readonly, nostack, preserves_flags)
        );
    }
}

/// Resolves a page fault, returning whether the faulting instruction can be
/// retried (`true`) or the fault is fatal (`false`).
#[no_mangle]
pub extern "C" fn page_fault_resolve_rust(error_code: u32, faulting_address: u32) -> bool {
    use crate::memory::vmm::{self, PageFaultOutcome};
    let dir = vmm::active_directory();
    matches!(
        vmm::handle_page_fault(dir, faulting_address, error_code),
        PageFaultOutcome::Resolved
    )
}

/// Terminal sink for an unresolved page fault: logs and halts forever.
#[no_mangle]
pub extern "C" fn page_fault_fatal_rust(error_code: u32, faulting_address: u32) -> ! {
    crate::drivers::serial::_debug_print(format_args!(
        "FATAL PAGE FAULT addr=0x{:08x} err=0x{:08x} (present={} write={} user={})\n",
        faulting_address,
        error_code,
        error_code & 1 != 0,
        error_code & 2 != 0,
        error_code & 4 != 0,
    ));
    write_fault_banner(EXCEPTION_PAGE_FAULT, error_code, faulting_address);
    loop {
        // SAFETY: fatal path, intentionally stops forward progress.
        unsafe {
            asm!("cli", "hlt", options(nomem, nostack, preserves_flags));
        }
    }
}

#[inline]
const fn hex_nibble_ascii(nibble: u8) -> u8 {
    if nibble < 10 {
        b'0' + nibble
    } else {
        b'a' + (nibble - 10)
    }
}

fn write_fault_banner(vector: u8, error_code: u32, address: u32) {
    let mut line = [b' '; VGA_COLS];
    let label = b"!! FAULT vec=";
    line[..label.len()].copy_from_slice(label);
    let mut col = label.len();
    line[col] = hex_nibble_ascii((vector >> 4) & 0x0F);
    line[col + 1] = hex_nibble_ascii(vector & 0x0F);
    col += 3;
    let err_label = b"err=";
    line[col..col + err_label.len()].copy_from_slice(err_label);
    col += err_label.len();
    for i in 0..8 {
        let shift = (7 - i) * 4;
        line[col + i] = hex_nibble_ascii(((error_code >> shift) & 0x0F) as u8);
    }
    col += 9;
    let addr_label = b"addr=";
    line[col..col + addr_label.len()].copy_from_slice(addr_label);
    col += addr_label.len();
    for i in 0..8 {
        let shift = (7 - i) * 4;
        line[col + i] = hex_nibble_ascii(((address >> shift) & 0x0F) as u8);
    }

    // SAFETY: VGA text memory is MMIO-mapped at `VGA_TEXT_BUFFER`; we only
    // write one in-bounds row (0..80 cells) with volatile stores.
    unsafe {
        for (col, ch) in line.iter().enumerate() {
            let cell = VGA_TEXT_BUFFER + col * 2;
            core::ptr::write_volatile(cell as *mut u8, *ch);
            core::ptr::write_volatile((cell + 1) as *mut u8, 0x4F);
        }
    }
}

/// Fatal exception sink for every other vector with a dedicated stub.
/// Called from assembly stubs for faults treated as unrecoverable.
#[no_mangle]
pub extern "C" fn exception_handler_rust(vector: u8, error_code: u32, _frame: *const SavedRegisters) -> ! {
    crate::drivers::serial::_debug_print(format_args!(
        "FATAL EXCEPTION vec=0x{:02x} err=0x{:08x}\n",
        vector, error_code,
    ));
    write_fault_banner(vector, error_code, 0);
    loop {
        // SAFETY: fatal path, intentionally stops forward progress.
        unsafe {
            asm!("cli", "hlt", options(nomem, nostack, preserves_flags));
        }
    }
}

/// Register a callback for a given interrupt vector.
pub fn register_irq_handler(vector: u8, handler: IrqHandler) {
    unsafe {
        let handlers = &mut *STATE.handlers.get();
        handlers[vector as usize] = Some(handler);
    }
}

fn clear_irq_handlers() {
    unsafe {
        let handlers = &mut *STATE.handlers.get();
        for slot in handlers.iter_mut() {
            *slot = None;
        }
    }
}

fn dispatch_irq(vector: u8, frame: &mut SavedRegisters) {
    let handler = unsafe {
        let handlers = &*STATE.handlers.get();
        handlers[vector as usize]
    };
    if let Some(handler) = handler {
        handler(vector, frame);
    }
}

fn remap_pic(offset1: u8, offset2: u8) {
    unsafe {
        let cmd1 = PortByte::new(PIC1_COMMAND);
        let cmd2 = PortByte::new(PIC2_COMMAND);
        let data1 = PortByte::new(PIC1_DATA);
        let data2 = PortByte::new(PIC2_DATA);

        let icw1 = PIC_ICW1_INIT | PIC_ICW1_ICW4;
        cmd1.write(icw1);
        io_wait();
        cmd2.write(icw1);
        io_wait();

        data1.write(offset1);
        io_wait();
        data2.write(offset2);
        io_wait();

        data1.write(0x04);
        io_wait();
        data2.write(0x02);
        io_wait();

        data1.write(PIC_ICW4_8086);
        io_wait();
        data2.write(PIC_ICW4_8086);
        io_wait();
    }
}

/// Small I/O delay by writing to port 0x80 (POST diagnostic port).
#[inline]
fn io_wait() {
    unsafe {
        PortByte::new(0x80).write(0);
    }
}

fn mask_pic() {
    unsafe {
        let data1 = PortByte::new(PIC1_DATA);
        let data2 = PortByte::new(PIC2_DATA);

        data1.write(0xFC); // Unmask IRQ0 + IRQ1.
        data2.write(0xFF); // Mask all slave IRQs.
    }
}

fn end_of_interrupt(irq: u8) {
    unsafe {
        if irq >= 8 {
            PortByte::new(PIC2_COMMAND).write(PIC_EOI);
        }
        PortByte::new(PIC1_COMMAND).write(PIC_EOI);
    }
}

/// Computes the PIT divisor for the requested interrupt frequency.
pub const fn pit_divisor_for_hz(hz: u32) -> u16 {
    if hz == 0 {
        return 0;
    }

    let divisor = PIT_INPUT_HZ / hz;
    if divisor == 0 {
        1
    } else if divisor > u16::MAX as u32 {
        u16::MAX
    } else {
        divisor as u16
    }
}

/// Programs PIT channel 0 as periodic timer with the given frequency.
pub fn init_periodic_timer(hz: u32) {
    let divisor = pit_divisor_for_hz(hz);
    if divisor == 0 {
        return;
    }

    unsafe {
        let cmd = PortByte::new(PIT_COMMAND);
        let data = PortByte::new(PIT_CHANNEL0);
        cmd.write(PIT_MODE_RATE_GENERATOR);
        data.write((divisor & 0xFF) as u8);
        data.write((divisor >> 8) as u8);
    }
}

/// Dispatch entry point called from the IRQ assembly trampolines.
///
/// For the timer IRQ, the PIC is acknowledged *before* the registered
/// handler (which may call into the scheduler) runs — acknowledgment must
/// precede any context switch, or a task that is switched away from mid-IRQ
/// never reaches the normal EOI-then-return path, leaving the PIC believing
/// the interrupt is still in service.
///
/// # Safety
/// - Must be called with interrupts disabled.
/// - `vector` must be a valid IRQ vector number (`IRQ_BASE..IRQ_BASE + 16`).
#[no_mangle]
pub unsafe extern "C" fn irq_rust_dispatch(vector: u8, frame: *mut SavedRegisters) -> *mut SavedRegisters {
    if !(IRQ_BASE..IRQ_BASE + 16).contains(&vector) {
        return frame;
    }

    if vector == IRQ0_PIT_TIMER_VECTOR {
        end_of_interrupt(vector - IRQ_BASE);
        let frame = unsafe { &mut *frame };
        dispatch_irq(vector, frame);
        return frame as *mut SavedRegisters;
    }

    let frame_ref = unsafe {
        // SAFETY: `frame` points to the register-save area pushed by the
        // stub and stays valid until it restores registers and `iret`s.
        &mut *frame
    };
    dispatch_irq(vector, frame_ref);
    end_of_interrupt(vector - IRQ_BASE);
    frame_ref as *mut SavedRegisters
}

/// Dispatch entry point for software interrupt `int 0x80`.
///
/// # Safety
/// - Must be entered only from `int80_syscall_stub`.
/// - `frame` must point to a live `TrapFrame` on the active kernel stack.
#[no_mangle]
pub unsafe extern "C" fn syscall_rust_dispatch(frame: *mut TrapFrame) -> *mut TrapFrame {
    let frame_ref = unsafe { &mut *frame };
    crate::syscall::dispatch(frame_ref);
    frame_ref as *mut TrapFrame
}

const _: () = {
    assert!(size_of::<SavedRegisters>() == 14 * 4);
};

const _: () = {
    assert!(size_of::<TrapFrame>() == 19 * 4);
};

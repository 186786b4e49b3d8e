//! Assembly entry trampolines for every IDT vector we install.
//!
//! Every stub pushes the same `SavedRegisters` layout before loading kernel
//! segment selectors and handing control to Rust: first a 2-dword
//! `vector`/`error_code` pair (error code pushed first, so it ends up at
//! the higher address, matching `SavedRegisters::error_code` sitting after
//! `vector`), then `pushad`, then `gs,fs,es,ds` in that push order so `ds`
//! lands at the lowest address — matching `SavedRegisters` field order
//! (`ds` first) and the `pop ds; pop es; pop fs; pop gs; popad` sequence
//! `fork_ret` in `scheduler::context_switch` already uses to consume a
//! freshly forked task's copied trap frame.

use core::arch::global_asm;

macro_rules! irq_stub_asm {
    ($name:literal, $vector:literal) => {
        concat!(
            ".section .text\n",
            ".global ",
            $name,
            "\n",
            ".type ",
            $name,
            ", @function\n",
            $name,
            ":\n",
            "    cli\n",
            "    push 0\n",
            "    push ",
            $vector,
            "\n",
            "    pushad\n",
            "    push gs\n",
            "    push fs\n",
            "    push es\n",
            "    push ds\n",
            "    mov ax, 0x10\n",
            "    mov ds, ax\n",
            "    mov es, ax\n",
            "    mov fs, ax\n",
            "    mov gs, ax\n",
            "    mov eax, esp\n",
            "    push eax\n",
            "    push ",
            $vector,
            "\n",
            "    call irq_rust_dispatch\n",
            "    add esp, 8\n",
            "    mov esp, eax\n",
            "    pop ds\n",
            "    pop es\n",
            "    pop fs\n",
            "    pop gs\n",
            "    popad\n",
            "    add esp, 8\n",
            "    iret\n",
        )
    };
}

macro_rules! isr_stub_without_error_code_asm {
    ($name:literal, $vector:literal) => {
        concat!(
            ".section .text\n",
            ".global ",
            $name,
            "\n",
            ".type ",
            $name,
            ", @function\n",
            $name,
            ":\n",
            "    cli\n",
            "    push 0\n",
            "    push ",
            $vector,
            "\n",
            "    pushad\n",
            "    push gs\n",
            "    push fs\n",
            "    push es\n",
            "    push ds\n",
            "    mov ax, 0x10\n",
            "    mov ds, ax\n",
            "    mov es, ax\n",
            "    mov fs, ax\n",
            "    mov gs, ax\n",
            "    mov eax, esp\n",
            "    push eax\n",
            "    push 0\n",
            "    push ",
            $vector,
            "\n",
            "    call exception_handler_rust\n",
            "2:\n",
            "    cli\n",
            "    hlt\n",
            "    jmp 2b\n",
        )
    };
}

macro_rules! isr_stub_with_error_code_asm {
    ($name:literal, $vector:literal) => {
        concat!(
            ".section .text\n",
            ".global ",
            $name,
            "\n",
            ".type ",
            $name,
            ", @function\n",
            $name,
            ":\n",
            "    cli\n",
            // Hardware already pushed the error code below our return
            // address; push the vector above it so the two dwords line up
            // with `SavedRegisters::vector`/`error_code` once pushad+segs
            // land on top.
            "    push ",
            $vector,
            "\n",
            "    pushad\n",
            "    push gs\n",
            "    push fs\n",
            "    push es\n",
            "    push ds\n",
            "    mov ax, 0x10\n",
            "    mov ds, ax\n",
            "    mov es, ax\n",
            "    mov fs, ax\n",
            "    mov gs, ax\n",
            "    mov edx, [esp + 52]\n",
            "    mov eax, esp\n",
            "    push eax\n",
            "    push edx\n",
            "    push ",
            $vector,
            "\n",
            "    call exception_handler_rust\n",
            "2:\n",
            "    cli\n",
            "    hlt\n",
            "    jmp 2b\n",
        )
    };
}

global_asm!(irq_stub_asm!("irq0_pit_timer_stub", "32"));
global_asm!(irq_stub_asm!("irq1_keyboard_stub", "33"));
global_asm!(irq_stub_asm!("irq2_pic_cascade_stub", "34"));
global_asm!(irq_stub_asm!("irq3_com2_stub", "35"));
global_asm!(irq_stub_asm!("irq4_com1_stub", "36"));
global_asm!(irq_stub_asm!("irq5_lpt2_or_sound_stub", "37"));
global_asm!(irq_stub_asm!("irq6_floppy_stub", "38"));
global_asm!(irq_stub_asm!("irq7_lpt1_or_spurious_stub", "39"));
global_asm!(irq_stub_asm!("irq8_cmos_rtc_stub", "40"));
global_asm!(irq_stub_asm!("irq9_acpi_or_legacy_stub", "41"));
global_asm!(irq_stub_asm!("irq10_free_stub", "42"));
global_asm!(irq_stub_asm!("irq11_free_stub", "43"));
global_asm!(irq_stub_asm!("irq12_ps2_mouse_stub", "44"));
global_asm!(irq_stub_asm!("irq13_fpu_stub", "45"));
global_asm!(irq_stub_asm!("irq14_primary_ata_stub", "46"));
global_asm!(irq_stub_asm!("irq15_secondary_ata_stub", "47"));

global_asm!(isr_stub_without_error_code_asm!("isr0_divide_by_zero_stub", "0"));
global_asm!(isr_stub_without_error_code_asm!("isr6_invalid_opcode_stub", "6"));
global_asm!(isr_stub_without_error_code_asm!(
    "isr7_device_not_available_stub",
    "7"
));
global_asm!(isr_stub_with_error_code_asm!("isr8_double_fault_stub", "8"));
global_asm!(isr_stub_with_error_code_asm!(
    "isr13_general_protection_fault_stub",
    "13"
));

// Page fault gets its own hand-written stub: it needs `cr2` and the
// hardware error code captured before any other instruction touches them,
// and it branches on whether the fault was resolved instead of always
// `iret`ing or always diverging.
global_asm!(
    r#"
    .section .text
    .global isr14_page_fault_stub
    .type isr14_page_fault_stub, @function
isr14_page_fault_stub:
    cli
    mov eax, [esp]
    mov ebx, cr2
    push 14
    pushad
    push gs
    push fs
    push es
    push ds
    mov cx, 0x10
    mov ds, cx
    mov es, cx
    mov fs, cx
    mov gs, cx
    push ebx
    push eax
    call page_fault_resolve_rust
    add esp, 8
    test al, al
    jz 2f
    pop ds
    pop es
    pop fs
    pop gs
    popad
    add esp, 8
    iret
2:
    mov eax, [esp + 52]
    mov ebx, cr2
    push ebx
    push eax
    call page_fault_fatal_rust
3:
    cli
    hlt
    jmp 3b
"#
);

global_asm!(
    r#"
    .section .text
    .global int80_syscall_stub
    .type int80_syscall_stub, @function
int80_syscall_stub:
    cli
    push 0
    push 0x80
    pushad
    push gs
    push fs
    push es
    push ds
    mov ax, 0x10
    mov ds, ax
    mov es, ax
    mov fs, ax
    mov gs, ax
    mov eax, esp
    push eax
    call syscall_rust_dispatch
    add esp, 4
    mov esp, eax
    pop ds
    pop es
    pop fs
    pop gs
    popad
    add esp, 8
    iret
"#
);

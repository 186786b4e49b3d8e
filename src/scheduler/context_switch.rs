//! The one genuinely architecture-specific primitive in the scheduler: the
//! voluntary context switch between two kernel stacks.
//!
//! `switch_task` saves the outgoing task's callee-saved registers (ebx,
//! esi, edi, ebp, pushed in that order) onto its own kernel stack, stashes
//! the resulting stack pointer into `*current_esp_store`, loads `next_esp`
//! into `esp`, and restores the incoming task's callee-saved registers
//! (popped ebp, edi, esi, ebx) before returning — control resumes wherever
//! the incoming task last called `switch_task` from, or at `fork_ret` /
//! `task_wrapper` if it has never run before.
//!
//! Every forged initial stack (`fork`, `clone`, `create_task`) must lay out
//! its frame in the same word order this routine expects: from the saved
//! `esp` upward, `[ebp, edi, esi, ebx, return_address]`.

use core::arch::global_asm;

extern "C" {
    /// Switches from the calling task onto `next_esp`, saving the current
    /// stack pointer into `*current_esp_store` first.
    pub fn switch_task(next_esp: u32, current_esp_store: *mut u32);

    /// Trampoline a freshly created kernel task's forged stack frame
    /// returns into. Reads the entry function pointer out of the restored
    /// `ebp` (the first of the four forged callee-saved slots) and calls
    /// it; the task is expected never to return.
    pub fn task_wrapper() -> !;

    /// Trampoline a freshly forked/cloned task's forged stack frame
    /// returns into. Pops the trap frame pushed on top of it and performs
    /// the ring 3 return via `iret`.
    pub fn fork_ret();
}

global_asm!(
    r#"
    .section .text
    .global switch_task
    .type switch_task, @function
switch_task:
    push ebx
    push esi
    push edi
    push ebp

    mov eax, [esp + 24]
    mov [eax], esp

    mov eax, [esp + 20]
    mov esp, eax

    pop ebp
    pop edi
    pop esi
    pop ebx
    ret
"#
);

global_asm!(
    r#"
    .section .text
    .global task_wrapper
    .type task_wrapper, @function
task_wrapper:
    sti
    call ebp
1:
    cli
    hlt
    jmp 1b
"#
);

global_asm!(
    r#"
    .section .text
    .global fork_ret
    .type fork_ret, @function
fork_ret:
    pop ds
    pop es
    pop fs
    pop gs
    popad
    add esp, 8
    iret
"#
);

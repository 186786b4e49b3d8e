//! Process lifecycle operations: `fork`, `clone`, `exec`, `exit`, `wait`.
//!
//! Every operation here runs as a plain nested Rust call underneath a
//! syscall's trap frame (see `arch::interrupts::syscall_rust_dispatch`). None
//! of them perform the context switch themselves beyond calling
//! `scheduler::schedule` — the forged stack frames they build are only
//! ever consumed later, by `switch_task` and `fork_ret`.

use core::mem::size_of;

use crate::arch::gdt;
use crate::arch::interrupts::TrapFrame;
use crate::memory::pmm;
use crate::memory::vmm;
use crate::process::pcb::{self, Pcb, ProcessState};
use crate::process::types::{ExecError, ExecResult};
use crate::scheduler;
use crate::scheduler::fork_ret;

use super::loader;

/// Forges the 5-word context-switch frame (`ebp, edi, esi, ebx, fork_ret`)
/// immediately below `trapframe_addr` on a child's kernel stack, and returns
/// the resulting `esp` the child should be scheduled with.
///
/// # Safety
/// `trapframe_addr` must point at a live, fully-initialized `TrapFrame`
/// sitting within the bounds of the child PCB's own kernel stack, with at
/// least 20 bytes of stack space below it.
unsafe fn forge_fork_frame(trapframe_addr: *mut TrapFrame) -> u32 {
    let frame_base = (trapframe_addr as u32) - 5 * 4;
    let words = frame_base as *mut u32;
    core::ptr::write(words, 0); // ebp
    core::ptr::write(words.add(1), 0); // edi
    core::ptr::write(words.add(2), 0); // esi
    core::ptr::write(words.add(3), 0); // ebx
    core::ptr::write(words.add(4), fork_ret as usize as u32); // return address
    frame_base
}

/// Copies `parent_frame` onto the top of `child`'s kernel stack, forcing the
/// return-value register to 0, and returns a pointer to the copy so the
/// caller can apply further adjustments (used by `clone` to retarget the
/// user stack/entry point).
///
/// # Safety
/// `child` must be a freshly allocated, exclusively-owned PCB.
unsafe fn install_child_trap_frame(child: *mut Pcb, parent_frame: &TrapFrame) -> *mut TrapFrame {
    let top = (*child).stack_top();
    let trapframe_addr = (top - size_of::<TrapFrame>() as u32) as *mut TrapFrame;
    core::ptr::write(trapframe_addr, *parent_frame);
    (*trapframe_addr).regs.eax = 0;
    trapframe_addr
}

/// Copy-on-write fork. Returns the child's pid to the parent (the parent's
/// own `eax` — its syscall return value — is set by the caller/dispatcher).
pub fn fork(parent_frame: &TrapFrame) -> i32 {
    let parent = pcb::with_table(|t| t.current());
    if parent.is_null() {
        return -1;
    }
    // SAFETY: `parent` is the live current task.
    let parent_dir = unsafe { (*parent).page_directory };
    let child_dir = match vmm::clone_directory(parent_dir) {
        Some(d) => d,
        None => return -1,
    };

    let child = pcb::alloc_pcb();
    // SAFETY: `child` was just allocated and is exclusively owned here.
    unsafe {
        (*child).page_directory = child_dir;
        (*child).parent_pid = (*parent).pid as i32;

        let trapframe_addr = install_child_trap_frame(child, parent_frame);
        (*child).esp = forge_fork_frame(trapframe_addr);
        (*child).state = ProcessState::Ready;
    }

    let child_pid = unsafe { (*child).pid };
    pcb::with_table(|t| t.append(child));
    child_pid as i32
}

/// Shared-address-space thread creation. `new_stack`/`entry` of 0 leave the
/// corresponding trap-frame field copied verbatim from the parent.
///
/// The child's directory is shared, not cloned: `free_directory` on a
/// terminated thread still frees every user frame unconditionally, so a
/// `clone`d thread whose sibling is still running and reaped via `wait`
/// before its sibling exits would prematurely release shared pages. None of
/// this kernel's own task graphs hit that path (`clone` is only used for
/// single-address-space worker threads that exit together), but it is a
/// real sharp edge for a more general thread model.
pub fn clone_task(new_stack: u32, entry: u32, parent_frame: &TrapFrame) -> i32 {
    let parent = pcb::with_table(|t| t.current());
    if parent.is_null() {
        return -1;
    }
    // SAFETY: `parent` is the live current task.
    let parent_dir = unsafe { (*parent).page_directory };
    pmm::inc_ref(parent_dir / vmm::PAGE_SIZE);

    let child = pcb::alloc_pcb();
    // SAFETY: `child` was just allocated and is exclusively owned here.
    unsafe {
        (*child).page_directory = parent_dir;
        (*child).parent_pid = (*parent).pid as i32;

        let trapframe_addr = install_child_trap_frame(child, parent_frame);
        let tf = &mut *trapframe_addr;
        if new_stack != 0 {
            tf.esp = new_stack;
            tf.regs.ebp = 0;
        }
        if entry != 0 {
            tf.eip = entry;
        }

        (*child).esp = forge_fork_frame(trapframe_addr);
        (*child).state = ProcessState::Ready;
    }

    let child_pid = unsafe { (*child).pid };
    pcb::with_table(|t| t.append(child));
    child_pid as i32
}

/// Loads `filename` and replaces the calling process's image in place. On
/// failure, the caller's address space and trap frame are left untouched.
/// On success, `frame` is rewritten so the syscall's `iret` drops straight
/// into the new program's entry point with a fresh stack; every
/// general-purpose register except `eax` (left for the dispatcher to set to
/// 0) is cleared.
pub fn exec(filename: &str, frame: &mut TrapFrame) -> ExecResult<()> {
    let image = loader::load_program_image(filename)?;

    // A fresh directory cloned from the bare kernel directory has no
    // present user-space PDEs to walk, so this is just a cheap way to get a
    // blank address space with the kernel half already installed.
    let new_dir = vmm::clone_directory(vmm::kernel_directory()).ok_or(ExecError::OutOfMemory)?;

    let loaded = match loader::load_elf_into(new_dir, &image) {
        Ok(loaded) => loaded,
        Err(e) => {
            vmm::free_directory(new_dir);
            return Err(e);
        }
    };

    let current = pcb::with_table(|t| t.current());
    // SAFETY: `current` is the live current task; swapping its directory
    // while resident must not be preempted mid-update.
    let old_dir = unsafe {
        crate::arch::interrupts::disable();
        let old = (*current).page_directory;
        (*current).page_directory = new_dir;
        vmm::switch_directory(new_dir);
        crate::arch::interrupts::enable();
        old
    };
    vmm::free_directory(old_dir);

    let user_data = (gdt::USER_DATA_SELECTOR) as u32;
    frame.eip = loaded.entry_point;
    frame.esp = loaded.user_esp;
    frame.cs = gdt::USER_CODE_SELECTOR as u32;
    frame.ss = user_data;
    frame.regs.ds = user_data;
    frame.regs.es = user_data;
    frame.regs.fs = user_data;
    frame.regs.gs = user_data;
    frame.regs.edi = 0;
    frame.regs.esi = 0;
    frame.regs.ebp = 0;
    frame.regs.ebx = 0;
    frame.regs.edx = 0;
    frame.regs.ecx = 0;
    Ok(())
}

/// Terminates the calling task, waking a `wait`-blocked parent if there is
/// one, and never returns: the scheduler is called in a loop until some
/// other task is selected to run, since a `Terminated` PCB is never chosen.
pub fn exit(code: i32) -> ! {
    let current = pcb::with_table(|t| t.current());
    // SAFETY: `current` is the live current task.
    let parent_pid = unsafe {
        (*current).state = ProcessState::Terminated;
        (*current).exit_code = code;
        (*current).parent_pid
    };

    if parent_pid >= 0 {
        pcb::with_table(|t| {
            let parent = t.find_by_pid(parent_pid as u32);
            if !parent.is_null() {
                // SAFETY: `parent` is a live PCB from the table.
                unsafe {
                    if (*parent).state == ProcessState::Blocked {
                        (*parent).state = ProcessState::Ready;
                    }
                }
            }
        });
    }

    loop {
        scheduler::schedule();
    }
}

enum WaitOutcome {
    NoChildren,
    Block,
    Reaped { pid: u32, exit_code: i32, pcb: *mut Pcb },
}

/// Scans the process list for a child of the caller. Blocks and re-scans
/// (Mesa semantics) until a `Terminated` child turns up, or returns -1
/// immediately if the caller has no children at all.
pub fn wait(status_ptr: *mut i32) -> i32 {
    loop {
        let outcome = pcb::with_table(|t| {
            let current = t.current();
            // SAFETY: `current` is the live current task.
            let my_pid = unsafe { (*current).pid };
            let head = t.head();
            if head.is_null() {
                return WaitOutcome::NoChildren;
            }

            let mut cursor = head;
            let mut has_child = false;
            loop {
                // SAFETY: `cursor` is always a live list member while the
                // table lock is held.
                let (pid, parent_pid, state, exit_code) = unsafe {
                    ((*cursor).pid, (*cursor).parent_pid, (*cursor).state, (*cursor).exit_code)
                };
                if parent_pid == my_pid as i32 {
                    has_child = true;
                    if state == ProcessState::Terminated {
                        t.unlink(cursor);
                        return WaitOutcome::Reaped { pid, exit_code, pcb: cursor };
                    }
                }
                cursor = t.next_of(cursor);
                if cursor == head {
                    break;
                }
            }

            if has_child {
                // SAFETY: `current` is the live current task.
                unsafe {
                    (*current).state = ProcessState::Blocked;
                }
                WaitOutcome::Block
            } else {
                WaitOutcome::NoChildren
            }
        });

        match outcome {
            WaitOutcome::NoChildren => return -1,
            WaitOutcome::Reaped { pid, exit_code, pcb: zombie } => {
                if !status_ptr.is_null() {
                    // SAFETY: `status_ptr` is a user-space pointer the
                    // caller supplied; it is resolved through the caller's
                    // own still-active address space.
                    unsafe {
                        core::ptr::write(status_ptr, exit_code);
                    }
                }
                // SAFETY: `zombie` was just unlinked and is unreachable
                // from any other code path.
                let dir = unsafe { (*zombie).page_directory };
                vmm::free_directory(dir);
                unsafe {
                    pcb::free_pcb(zombie);
                }
                return pid as i32;
            }
            WaitOutcome::Block => scheduler::schedule(),
        }
    }
}

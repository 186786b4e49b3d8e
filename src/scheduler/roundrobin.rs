//! Round-robin preemptive scheduler over the PCB process table.
//!
//! `schedule()` is the single reschedule primitive shared by voluntary
//! blocking (semaphores, mutexes, futexes) and the timer-tick preemption
//! path: both reach it as a plain nested Rust call sitting on the calling
//! task's own kernel stack, underneath whatever trap frame (or none, for a
//! deep syscall) a stub already pushed. `switch_task` only ever saves and
//! restores the four callee-saved registers and the return address of that
//! call chain — the task's own stub, whenever it is eventually resumed,
//! performs its own `iret` from its own untouched frame, unaware that a
//! switch happened in between.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch::gdt;
use crate::arch::interrupts;
use crate::memory::vmm;
use crate::process::pcb::{self, Pcb, ProcessState};
use crate::scheduler::context_switch::{switch_task, task_wrapper};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Registers `first` as the scheduler's bootstrap task: appends it to the
/// process table and marks it current and running. The caller must already
/// be executing on `first`'s kernel stack (this does not perform a switch).
pub fn init(first: *mut Pcb) {
    pcb::with_table(|t| {
        t.append(first);
        t.set_current(first);
    });
    // SAFETY: `first` was just appended and is exclusively owned here.
    unsafe {
        (*first).state = ProcessState::Running;
    }
    gdt::set_kernel_esp0(unsafe { (*first).stack_top() });
    INITIALIZED.store(true, Ordering::Release);
}

pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::Acquire)
}

/// Returns the PCB pointer of the currently running task, or null if the
/// scheduler has not been initialized yet.
pub fn current() -> *mut Pcb {
    pcb::with_table(|t| t.current())
}

/// Allocates a fresh PCB for a kernel-only bootstrap task: clones the
/// current address space, and forges a stack frame that resumes into
/// `task_wrapper`, which calls `entry` and never returns. Appends the PCB
/// to the process list in `Ready` state and returns it.
pub fn create_task(entry: extern "C" fn() -> !) -> *mut Pcb {
    let current_dir = pcb::with_table(|t| {
        let cur = t.current();
        if cur.is_null() {
            vmm::kernel_directory()
        } else {
            // SAFETY: `cur` is the live current task.
            unsafe { (*cur).page_directory }
        }
    });
    let new_dir = vmm::clone_directory(current_dir).expect("out of memory cloning address space");

    let pcb = pcb::alloc_pcb();
    // SAFETY: `pcb` was just allocated and is exclusively owned here.
    unsafe {
        (*pcb).page_directory = new_dir;

        let top = (*pcb).stack_top();
        let frame_base = top - 5 * 4;
        let words = frame_base as *mut u32;
        core::ptr::write(words, entry as usize as u32); // ebp slot: entry fn ptr
        core::ptr::write(words.add(1), 0); // edi
        core::ptr::write(words.add(2), 0); // esi
        core::ptr::write(words.add(3), 0); // ebx
        core::ptr::write(words.add(4), task_wrapper as usize as u32); // return address

        (*pcb).esp = frame_base;
        (*pcb).state = ProcessState::Ready;
    }

    pcb::with_table(|t| t.append(pcb));
    pcb
}

/// Core reschedule primitive. Disables interrupts, picks the next
/// `Ready`/`Running` task after the current one (wrapping around the
/// process list), and switches to it. If the list has fewer than two
/// schedulable entries, or cycles back to the current task without finding
/// a different one, returns immediately without switching. Always
/// re-enables interrupts before returning, regardless of whether a switch
/// happened.
pub fn schedule() {
    interrupts::disable();

    let (current, next) = pcb::with_table(|t| {
        let current = t.current();
        if current.is_null() {
            return (current, core::ptr::null_mut());
        }
        let mut candidate = t.next_of(current);
        let mut found: *mut Pcb = core::ptr::null_mut();
        while candidate != current {
            // SAFETY: `candidate` is always a live member of the process
            // list while we hold the table lock.
            let state = unsafe { (*candidate).state };
            if state == ProcessState::Ready || state == ProcessState::Running {
                found = candidate;
                break;
            }
            candidate = t.next_of(candidate);
        }
        (current, found)
    });

    if current.is_null() || next.is_null() {
        interrupts::enable();
        return;
    }

    // SAFETY: both are live PCBs from the process table.
    unsafe {
        if (*current).state == ProcessState::Running {
            (*current).state = ProcessState::Ready;
        }
        (*next).state = ProcessState::Running;
    }

    pcb::with_table(|t| t.set_current(next));

    // SAFETY: `next` is a live PCB.
    let next_stack_top = unsafe { (*next).stack_top() };
    gdt::set_kernel_esp0(next_stack_top);

    // SAFETY: both are live PCBs.
    let (current_dir, next_dir) = unsafe { ((*current).page_directory, (*next).page_directory) };
    if current_dir != next_dir {
        // SAFETY: `next_dir` is a fully-populated directory cloned from (or
        // shared with) the kernel directory.
        unsafe {
            vmm::switch_directory(next_dir);
        }
    }

    // SAFETY: `current`/`next` are live PCBs; their kernel stacks either
    // hold a previously-saved `switch_task` frame or a forged one matching
    // the same callee-saved-register layout.
    let current_esp_store: *mut u32 = unsafe { &mut (*current).esp };
    let next_esp = unsafe { (*next).esp };
    unsafe {
        switch_task(next_esp, current_esp_store);
    }

    // Resumed here, possibly much later and by a different call path than
    // the one that invoked `schedule()` originally. Interrupts must end up
    // enabled unconditionally before returning to whichever caller this is.
    interrupts::enable();
}

/// Voluntarily gives up the remainder of the current timeslice.
pub fn yield_now() {
    schedule();
}

/// Called from the timer IRQ handler after it has already acknowledged the
/// PIC. Invokes the scheduler as a plain nested call.
pub fn on_timer_tick() {
    schedule();
}

//! Minimal user-space futex: a fixed-size, linearly-scanned table mapping a
//! user virtual address to a FIFO wait queue.
//!
//! `futex_wait` performs the classic atomic check-then-sleep: the value at
//! `addr` is compared against `expected` while the table lock (which
//! disables interrupts) is held, so no wakeup can be lost between the check
//! and the task actually going to sleep. `futex_wake` wakes at most one
//! waiter per call.

use crate::process::pcb::{self, Pcb, ProcessState};
use crate::scheduler;
use crate::sync::spinlock::SpinLock;

const MAX_FUTEXES: usize = 16;

#[derive(Clone, Copy)]
struct FutexEntry {
    used: bool,
    addr: u32,
    wait_head: *mut Pcb,
    wait_tail: *mut Pcb,
}

impl FutexEntry {
    const fn empty() -> Self {
        Self {
            used: false,
            addr: 0,
            wait_head: core::ptr::null_mut(),
            wait_tail: core::ptr::null_mut(),
        }
    }
}

struct FutexTable {
    entries: [FutexEntry; MAX_FUTEXES],
}

// SAFETY: PCB pointers in the wait chains are touched only under the table
// lock, which disables interrupts on this single-core kernel.
unsafe impl Send for FutexTable {}

static TABLE: SpinLock<FutexTable> = SpinLock::new(FutexTable {
    entries: [FutexEntry::empty(); MAX_FUTEXES],
});

fn enqueue(entry: &mut FutexEntry, pcb: *mut Pcb) {
    // SAFETY: `pcb` is the currently running task.
    unsafe {
        (*pcb).wait_next = core::ptr::null_mut();
    }
    if entry.wait_tail.is_null() {
        entry.wait_head = pcb;
    } else {
        // SAFETY: `wait_tail` is a live PCB already on this queue.
        unsafe {
            (*entry.wait_tail).wait_next = pcb;
        }
    }
    entry.wait_tail = pcb;
}

fn dequeue(entry: &mut FutexEntry) -> *mut Pcb {
    let pcb = entry.wait_head;
    if pcb.is_null() {
        return core::ptr::null_mut();
    }
    // SAFETY: `pcb` is a live member of this queue.
    unsafe {
        entry.wait_head = (*pcb).wait_next;
        (*pcb).wait_next = core::ptr::null_mut();
    }
    if entry.wait_head.is_null() {
        entry.wait_tail = core::ptr::null_mut();
    }
    pcb
}

fn find_or_alloc(table: &mut FutexTable, addr: u32) -> Option<usize> {
    if let Some(idx) = (0..MAX_FUTEXES).find(|&i| table.entries[i].used && table.entries[i].addr == addr) {
        return Some(idx);
    }
    let idx = (0..MAX_FUTEXES).find(|&i| !table.entries[i].used)?;
    table.entries[idx] = FutexEntry {
        used: true,
        addr,
        wait_head: core::ptr::null_mut(),
        wait_tail: core::ptr::null_mut(),
    };
    Some(idx)
}

/// Blocks the calling task on `addr` if the word stored there still equals
/// `expected`. Returns immediately (without blocking) if the value has
/// already changed, or if the futex table is full.
pub fn futex_wait(addr: u32, expected: u32) {
    let mut guard = TABLE.lock();

    // SAFETY: `addr` is a user virtual address in the calling task's own
    // active address space (this syscall runs with that task's page
    // directory still loaded in CR3).
    let current_value = unsafe { core::ptr::read_volatile(addr as *const u32) };
    if current_value != expected {
        return;
    }

    let idx = match find_or_alloc(&mut guard, addr) {
        Some(idx) => idx,
        None => return,
    };

    let current = pcb::with_table(|t| t.current());
    enqueue(&mut guard.entries[idx], current);
    // SAFETY: `current` is the running task.
    unsafe {
        (*current).state = ProcessState::Blocked;
    }
    guard.unlock_for_block();
    scheduler::schedule();
}

/// Wakes at most one task waiting on `addr`.
pub fn futex_wake(addr: u32) {
    let mut guard = TABLE.lock();
    let idx = match (0..MAX_FUTEXES).find(|&i| guard.entries[i].used && guard.entries[i].addr == addr) {
        Some(idx) => idx,
        None => return,
    };

    let woken = dequeue(&mut guard.entries[idx]);
    if guard.entries[idx].wait_head.is_null() {
        guard.entries[idx].used = false;
    }
    drop(guard);

    if !woken.is_null() {
        // SAFETY: `woken` was dequeued and is not touched by anyone else.
        unsafe {
            (*woken).state = ProcessState::Ready;
        }
    }
}

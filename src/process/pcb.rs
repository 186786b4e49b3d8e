//! Process control block and the global process table.
//!
//! PCBs are heap-allocated (`alloc::boxed::Box` turned into a raw pointer,
//! mirroring the original kernel's `kmalloc`'d `process_t`) and chained into
//! one global doubly-linked list (`next`/`prev`). A PCB also has a singly
//! linked `wait_next` field, used only while the PCB sits on a semaphore's
//! or futex's FIFO wait queue — never both chains at once.

use alloc::boxed::Box;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::sync::spinlock::SpinLock;

/// Size of each process's embedded kernel stack.
pub const KERNEL_STACK_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready,
    Running,
    Blocked,
    Terminated,
}

#[repr(C)]
pub struct Pcb {
    pub pid: u32,
    pub parent_pid: i32,
    pub state: ProcessState,
    pub exit_code: i32,
    /// Saved kernel stack pointer; valid only while this PCB is not the
    /// currently running task.
    pub esp: u32,
    /// Physical address of this process's page directory.
    pub page_directory: u32,
    pub kernel_stack: [u8; KERNEL_STACK_SIZE],
    pub next: *mut Pcb,
    pub prev: *mut Pcb,
    /// Next PCB on a semaphore/futex wait queue; unused while on the
    /// process list.
    pub wait_next: *mut Pcb,
}

impl Pcb {
    /// Address one past the top of this PCB's kernel stack (stacks grow
    /// down, so this is the initial stack pointer for a freshly created
    /// task).
    pub fn stack_top(&self) -> u32 {
        (self.kernel_stack.as_ptr() as u32) + KERNEL_STACK_SIZE as u32
    }
}

// SAFETY: PCBs are only ever touched while the process-table lock (which
// disables interrupts) is held, or by the single-threaded context-switch
// assembly routine.
unsafe impl Send for Pcb {}

struct ProcessTable {
    list_head: *mut Pcb,
    current: *mut Pcb,
}

// SAFETY: guarded by `PROCESS_TABLE_LOCK`.
unsafe impl Send for ProcessTable {}

static PROCESS_TABLE_LOCK: SpinLock<ProcessTable> = SpinLock::new(ProcessTable {
    list_head: core::ptr::null_mut(),
    current: core::ptr::null_mut(),
});

static NEXT_PID: AtomicU32 = AtomicU32::new(0);

/// Executes `f` with exclusive access to the process table. The lock
/// disables interrupts for the duration.
pub fn with_table<R>(f: impl FnOnce(&mut ProcessTableHandle) -> R) -> R {
    let mut guard = PROCESS_TABLE_LOCK.lock();
    let mut handle = ProcessTableHandle { inner: &mut guard };
    f(&mut handle)
}

/// A narrow, safe-ish view over the process list for callers holding the
/// table lock.
pub struct ProcessTableHandle<'a> {
    inner: &'a mut ProcessTable,
}

impl<'a> ProcessTableHandle<'a> {
    pub fn current(&self) -> *mut Pcb {
        self.inner.current
    }

    pub fn set_current(&mut self, pcb: *mut Pcb) {
        self.inner.current = pcb;
    }

    pub fn head(&self) -> *mut Pcb {
        self.inner.list_head
    }

    /// Appends `pcb` to the tail of the process list.
    pub fn append(&mut self, pcb: *mut Pcb) {
        if self.inner.list_head.is_null() {
            self.inner.list_head = pcb;
            // SAFETY: `pcb` is a freshly allocated, exclusively-owned PCB.
            unsafe {
                (*pcb).next = pcb;
                (*pcb).prev = pcb;
            }
            return;
        }
        let head = self.inner.list_head;
        // SAFETY: `head` is a live PCB already on the list.
        unsafe {
            let tail = (*head).prev;
            (*tail).next = pcb;
            (*pcb).prev = tail;
            (*pcb).next = head;
            (*head).prev = pcb;
        }
    }

    /// Unlinks `pcb` from the process list. `pcb` must currently be on it.
    pub fn unlink(&mut self, pcb: *mut Pcb) {
        // SAFETY: caller guarantees `pcb` is a live member of the list.
        unsafe {
            let next = (*pcb).next;
            let prev = (*pcb).prev;
            if next == pcb {
                // Only element.
                self.inner.list_head = core::ptr::null_mut();
            } else {
                (*prev).next = next;
                (*next).prev = prev;
                if self.inner.list_head == pcb {
                    self.inner.list_head = next;
                }
            }
        }
    }

    /// Returns the next PCB after `pcb` in list order, wrapping to the
    /// head.
    pub fn next_of(&self, pcb: *mut Pcb) -> *mut Pcb {
        // SAFETY: `pcb` is a live member of the list.
        unsafe { (*pcb).next }
    }

    /// Finds a live (non-freed) PCB by pid, or null if none matches.
    pub fn find_by_pid(&self, pid: u32) -> *mut Pcb {
        let head = self.inner.list_head;
        if head.is_null() {
            return core::ptr::null_mut();
        }
        let mut cursor = head;
        loop {
            // SAFETY: `cursor` is always a live list member.
            unsafe {
                if (*cursor).pid == pid {
                    return cursor;
                }
                cursor = (*cursor).next;
            }
            if cursor == head {
                return core::ptr::null_mut();
            }
        }
    }
}

/// Allocates a fresh PCB on the kernel heap with the next pid, zeroed
/// kernel stack, and `Ready` state. Does not add it to the process list.
pub fn alloc_pcb() -> *mut Pcb {
    let pid = NEXT_PID.fetch_add(1, Ordering::AcqRel);
    let pcb = Box::new(Pcb {
        pid,
        parent_pid: -1,
        state: ProcessState::Ready,
        exit_code: 0,
        esp: 0,
        page_directory: 0,
        kernel_stack: [0; KERNEL_STACK_SIZE],
        next: core::ptr::null_mut(),
        prev: core::ptr::null_mut(),
        wait_next: core::ptr::null_mut(),
    });
    Box::into_raw(pcb)
}

/// Frees a PCB's storage. Caller must have already unlinked it from every
/// chain it was part of.
///
/// # Safety
/// `pcb` must be a pointer previously returned by `alloc_pcb` and not
/// already freed.
pub unsafe fn free_pcb(pcb: *mut Pcb) {
    drop(Box::from_raw(pcb));
}

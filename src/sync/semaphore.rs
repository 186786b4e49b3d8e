//! FIFO blocking counting semaphore.
//!
//! Waiters are chained through `Pcb::wait_next`, the same singly-linked field
//! used by the futex wait queues. `signal` only ever wakes the
//! longest-waiting task — waking it is a hint to recheck the count, not a
//! guarantee the unit is still there (Mesa semantics): a task that raced in
//! through `wait` on another path could have already consumed it, so the
//! woken task loops back and retries instead of assuming success.

use crate::process::pcb::{self, Pcb, ProcessState};
use crate::scheduler;
use crate::sync::spinlock::SpinLock;

struct SemaphoreState {
    value: i32,
    wait_head: *mut Pcb,
    wait_tail: *mut Pcb,
}

// SAFETY: all PCB pointers in the wait chain are touched only while holding
// the semaphore's own lock, which disables interrupts on this single-core
// kernel.
unsafe impl Send for SemaphoreState {}

pub struct Semaphore {
    inner: SpinLock<SemaphoreState>,
}

impl Semaphore {
    pub const fn new(initial: i32) -> Self {
        Self {
            inner: SpinLock::new(SemaphoreState {
                value: initial,
                wait_head: core::ptr::null_mut(),
                wait_tail: core::ptr::null_mut(),
            }),
        }
    }

    fn enqueue(state: &mut SemaphoreState, pcb: *mut Pcb) {
        // SAFETY: `pcb` is the currently running task, not on any other chain.
        unsafe {
            (*pcb).wait_next = core::ptr::null_mut();
        }
        if state.wait_tail.is_null() {
            state.wait_head = pcb;
        } else {
            // SAFETY: `wait_tail` is a live PCB already on this queue.
            unsafe {
                (*state.wait_tail).wait_next = pcb;
            }
        }
        state.wait_tail = pcb;
    }

    fn dequeue(state: &mut SemaphoreState) -> *mut Pcb {
        let pcb = state.wait_head;
        if pcb.is_null() {
            return core::ptr::null_mut();
        }
        // SAFETY: `pcb` is a live member of this queue.
        unsafe {
            state.wait_head = (*pcb).wait_next;
            (*pcb).wait_next = core::ptr::null_mut();
        }
        if state.wait_head.is_null() {
            state.wait_tail = core::ptr::null_mut();
        }
        pcb
    }

    /// Blocks the calling task until a unit is available, then consumes it.
    pub fn wait(&self) {
        loop {
            let mut guard = self.inner.lock();
            if guard.value > 0 {
                guard.value -= 1;
                return;
            }

            let current = pcb::with_table(|t| t.current());
            Self::enqueue(&mut guard, current);
            // SAFETY: `current` is the running task; no one else mutates its
            // state while we hold the semaphore lock.
            unsafe {
                (*current).state = ProcessState::Blocked;
            }
            // Keep interrupts disabled across the switch; `schedule()`
            // re-enables them unconditionally once this task runs again.
            guard.unlock_for_block();
            scheduler::schedule();
        }
    }

    /// Releases one unit, waking the longest-waiting blocked task if any.
    pub fn signal(&self) {
        let mut guard = self.inner.lock();
        guard.value += 1;
        let woken = Self::dequeue(&mut guard);
        drop(guard);
        if !woken.is_null() {
            // SAFETY: `woken` was dequeued and is not touched by anyone else.
            unsafe {
                (*woken).state = ProcessState::Ready;
            }
        }
    }
}

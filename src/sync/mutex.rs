//! Blocking mutex: a binary semaphore plus an owner pid.
//!
//! `unlock` is a no-op unless the caller is the recorded owner, matching the
//! original kernel's safety check against releasing a lock you don't hold.

use core::sync::atomic::{AtomicI32, Ordering};

use crate::process::pcb;
use crate::sync::semaphore::Semaphore;

const NO_OWNER: i32 = -1;

pub struct Mutex {
    sem: Semaphore,
    owner: AtomicI32,
}

impl Mutex {
    pub const fn new() -> Self {
        Self {
            sem: Semaphore::new(1),
            owner: AtomicI32::new(NO_OWNER),
        }
    }

    pub fn lock(&self) {
        self.sem.wait();
        let pid = pcb::with_table(|t| {
            // SAFETY: `current()` is always a live PCB once scheduling has
            // started.
            unsafe { (*t.current()).pid }
        });
        self.owner.store(pid as i32, Ordering::Release);
    }

    /// No-op unless the calling task is the recorded owner.
    pub fn unlock(&self) {
        let pid = pcb::with_table(|t| {
            // SAFETY: `current()` is always a live PCB once scheduling has
            // started.
            unsafe { (*t.current()).pid }
        }) as i32;
        if self
            .owner
            .compare_exchange(pid, NO_OWNER, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.sem.signal();
    }

    /// Returns the pid currently holding the mutex, if any.
    pub fn owner_pid(&self) -> Option<u32> {
        let pid = self.owner.load(Ordering::Acquire);
        if pid < 0 {
            None
        } else {
            Some(pid as u32)
        }
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

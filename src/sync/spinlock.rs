//! Simple spinlock with interrupt masking.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch::interrupts;

pub struct SpinLock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let interrupts_were_enabled = interrupts::are_enabled();
        interrupts::disable();

        while self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }

        SpinLockGuard {
            lock: self,
            interrupts_were_enabled,
        }
    }
}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
    interrupts_were_enabled: bool,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY:
        // - The spinlock guarantees exclusive access while the guard lives.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY:
        // - The spinlock guarantees exclusive access while the guard lives.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
        if self.interrupts_were_enabled {
            interrupts::enable();
        }
    }
}

impl<'a, T> SpinLockGuard<'a, T> {
    /// Releases the underlying flag without restoring the caller's prior
    /// interrupt state, leaving interrupts disabled across a subsequent
    /// voluntary context switch.
    ///
    /// Used by blocking primitives (semaphore/mutex/futex) that must enqueue
    /// the current task and call `scheduler::schedule()` without reopening a
    /// wakeup race between releasing the lock and actually suspending the
    /// task. `scheduler::schedule()` re-enables interrupts unconditionally
    /// before it returns, so the disabled state here is only ever transient.
    pub fn unlock_for_block(self) {
        self.lock.locked.store(false, Ordering::Release);
        core::mem::forget(self);
    }
}

// SAFETY:
// - Access to `data` is synchronized via the spinlock.
// - `T: Send` ensures it is safe to transfer ownership across threads/CPUs.
unsafe impl<T: Send> Sync for SpinLock<T> {}
unsafe impl<T: Send> Send for SpinLock<T> {}

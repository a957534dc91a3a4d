//! Module `spinlock` implement a latch-and-spin read-write lock.
//!
//! Structural operations on a container, touching the `id2children` and
//! `id2subtree` namespaces, are multi-key read-modify-write sequences that
//! the store's per-key transaction isolation alone does not make atomic
//! with respect to concurrent structural changes in the same subtree. The
//! critical sections are short, so instead of parking the thread we spin:
//!
//! * A reader enters when no writer holds, or is waiting for, the latch.
//! * A writer first flips the latch bit, locking out new readers, then
//!   spins until the active readers drain before taking the lock bit.

use std::{
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicU32, Ordering::SeqCst},
};

/// Spinlock implements a latch-and-spin mechanism for non-blocking
/// read-write exclusion.
///
/// Layout of the control word:
/// * bits 0-29, count of active readers.
/// * bit 30, latch flag, set while a writer is waiting or active.
/// * bit 31, lock flag, set while a writer is active.
pub struct Spinlock<T> {
    latchlock: AtomicU32,
    conflicts: AtomicU32,

    value: T,
}

impl<T> Spinlock<T> {
    const LATCH_FLAG: u32 = 0x40000000;
    const LOCK_FLAG: u32 = 0x80000000;
    const LATCH_LOCK_FLAG: u32 = 0xC0000000;
    const READERS_FLAG: u32 = 0x3FFFFFFF;

    pub fn new(value: T) -> Spinlock<T> {
        Spinlock {
            latchlock: AtomicU32::new(0),
            conflicts: AtomicU32::new(0),
            value,
        }
    }

    /// Acquire latch for shared read permission.
    pub fn read(&self) -> ReadGuard<T> {
        loop {
            let old = self.latchlock.load(SeqCst);
            if (old & Self::LATCH_LOCK_FLAG) == 0 {
                // no writer waiting or active
                if self
                    .latchlock
                    .compare_exchange(old, old + 1, SeqCst, SeqCst)
                    .is_ok()
                {
                    break ReadGuard { door: self };
                }
            }
            self.conflicts.fetch_add(1, SeqCst);
        }
    }

    /// Acquire latch-and-lock for exclusive write permission.
    pub fn write(&self) -> WriteGuard<T> {
        // latch first, locking out new readers
        loop {
            let old = self.latchlock.load(SeqCst);
            if (old & Self::LATCH_FLAG) == 0 {
                if (old & Self::LOCK_FLAG) != 0 {
                    panic!("spinlock: lock without latch, call the programmer");
                }
                let new = old | Self::LATCH_FLAG;
                if self.latchlock.compare_exchange(old, new, SeqCst, SeqCst).is_ok() {
                    break;
                }
            }
            self.conflicts.fetch_add(1, SeqCst);
        }
        // then wait for active readers to drain
        loop {
            let old = self.latchlock.load(SeqCst);
            if (old & Self::READERS_FLAG) == 0 {
                let new = old | Self::LOCK_FLAG;
                if self.latchlock.compare_exchange(old, new, SeqCst, SeqCst).is_ok() {
                    let door = unsafe {
                        let door = self as *const Self as *mut Self;
                        door.as_mut().unwrap()
                    };
                    break WriteGuard { door };
                }
                panic!("spinlock: latched with zero readers, yet lock failed");
            }
            self.conflicts.fetch_add(1, SeqCst);
        }
    }

    /// Number of spin retries so far, a contention indicator.
    pub fn to_conflicts(&self) -> u32 {
        self.conflicts.load(SeqCst)
    }
}

/// Handle for read permission, drop to release the latch.
pub struct ReadGuard<'a, T> {
    door: &'a Spinlock<T>,
}

impl<'a, T> Deref for ReadGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.door.value
    }
}

impl<'a, T> Drop for ReadGuard<'a, T> {
    fn drop(&mut self) {
        self.door.latchlock.fetch_sub(1, SeqCst);
    }
}

/// Handle for write permission, drop to release latch and lock.
pub struct WriteGuard<'a, T> {
    door: &'a mut Spinlock<T>,
}

impl<'a, T> Deref for WriteGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.door.value
    }
}

impl<'a, T> DerefMut for WriteGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.door.value
    }
}

impl<'a, T> Drop for WriteGuard<'a, T> {
    fn drop(&mut self) {
        let old = self.door.latchlock.load(SeqCst);
        if (old & Spinlock::<T>::READERS_FLAG) > 0 {
            panic!("spinlock: active readers while lock held, call the programmer");
        }
        if self
            .door
            .latchlock
            .compare_exchange(old, 0, SeqCst, SeqCst)
            .is_err()
        {
            panic!("spinlock: release failed, control word raced");
        }
    }
}

#[cfg(test)]
#[path = "spinlock_test.rs"]
mod spinlock_test;

//! Kernel spinlock.
//!
//! A FIFO ticket lock: acquirers take a ticket and spin until the serving
//! counter reaches it, so the lock is granted strictly in arrival order.
//! Fairness matters here more than raw throughput. The hottest lock in the
//! kernel is a process's SPT lock, where the page's owner and an evictor
//! working on the owner's behalf meet; with an unfair test-and-set lock a
//! tight eviction loop can win the lock repeatedly and starve the owner's
//! fault path, which is exactly the liveness failure the paging layer must
//! not have. Arrival order makes every waiter's progress bounded by the
//! critical sections ahead of it.
//!
//! The repo-wide acquisition order is: SPT before frame table before the
//! leaf locks (page directory, swap bitmap, filesystem). A spinlock cannot
//! check that order without per-thread state, but in a spin-only kernel an
//! ordering mistake has one observable symptom: some ticket never gets
//! served. The kernel's long-lived locks are therefore constructed with
//! [`SpinLock::named`], and a waiter that has spun for an implausibly long
//! time reports the lock's name once, turning a silent deadlock into a
//! pointed log line.

use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicU32, Ordering},
};

/// Spin count after which a waiter assumes something upstream is wedged and
/// says so. Large enough that a long-but-legitimate critical section (a
/// whole-page swap write) passes silently.
const STALL_REPORT_SPINS: u32 = 50_000_000;

/// FIFO ticket spinlock.
pub struct SpinLock<T> {
    /// Next ticket to hand to an arriving waiter.
    next: AtomicU32,
    /// Ticket currently admitted to the critical section.
    serving: AtomicU32,
    /// Diagnostic name; set for the kernel's long-lived locks.
    name: Option<&'static str>,
    data: UnsafeCell<T>,
}

// SAFETY: the ticket/serving pair admits exactly one holder at a time, and
// that holder is the only path to `data`.
unsafe impl<T: Send> Sync for SpinLock<T> {}
unsafe impl<T: Send> Send for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Create an unlocked, unnamed lock.
    pub const fn new(data: T) -> Self {
        Self::build(None, data)
    }

    /// Create an unlocked lock that identifies itself in stall reports.
    pub const fn named(name: &'static str, data: T) -> Self {
        Self::build(Some(name), data)
    }

    const fn build(name: Option<&'static str>, data: T) -> Self {
        SpinLock {
            next: AtomicU32::new(0),
            serving: AtomicU32::new(0),
            name,
            data: UnsafeCell::new(data),
        }
    }

    /// Take a ticket and spin until it is served.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let ticket = self.next.fetch_add(1, Ordering::Relaxed);
        let mut spins: u32 = 0;
        while self.serving.load(Ordering::Acquire) != ticket {
            spins = spins.wrapping_add(1);
            if spins == STALL_REPORT_SPINS {
                log::warn!(
                    "{} lock: ticket {} has not been served; suspect an acquisition-order cycle",
                    self.name.unwrap_or("anonymous"),
                    ticket
                );
            }
            core::hint::spin_loop();
        }
        SpinLockGuard { lock: self }
    }

    /// Acquire without waiting: succeeds only when nobody holds the lock
    /// and nobody is queued ahead.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        let serving = self.serving.load(Ordering::Acquire);
        // Taking the ticket and entering are one step iff our ticket is the
        // one being served.
        if self
            .next
            .compare_exchange(
                serving,
                serving.wrapping_add(1),
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_ok()
        {
            Some(SpinLockGuard { lock: self })
        } else {
            None
        }
    }

    /// Consume the lock and return the inner value.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.try_lock() {
            Some(guard) => f.debug_tuple("SpinLock").field(&*guard).finish(),
            None => f.write_str("SpinLock(<locked>)"),
        }
    }
}

/// RAII guard; dropping it serves the next ticket.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: our ticket is the one being served, so access is exclusive.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as in `deref`.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.serving.fetch_add(1, Ordering::Release);
    }
}

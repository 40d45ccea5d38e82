//! Synchronization primitives: the ticket spinlock everything else builds on.

mod spinlock;

pub use spinlock::{SpinLock, SpinLockGuard};

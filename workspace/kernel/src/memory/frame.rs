//! Frame table: which frame backs which user page, and who to evict.
//!
//! One entry per frame that currently backs a user page, kept in insertion
//! order for the clock hand. The entry stores the owning process handle and
//! the user page key, never a pointer into the owner's SPT; the descriptor
//! is reached by locking the owner when needed.
//!
//! ## Eviction protocol
//!
//! 1. **Select** under the table lock: rotate the clock, skipping pinned
//!    frames and second-chancing frames whose accessed bit is set; pop the
//!    victim's entry so no other evictor can see it.
//! 2. **Confirm and evict** under the victim owner's SPT lock, with the
//!    table lock released: if the descriptor got pinned in the meantime the
//!    entry is put back and the clock continues; if the descriptor vanished
//!    the page was destroyed concurrently and the orphaned frame is simply
//!    claimed; otherwise the hardware mapping is cleared, the contents are
//!    written back (file pages) or swapped out, and the descriptor is
//!    retargeted.
//! 3. The frame is scrubbed and handed to the caller of `alloc` directly,
//!    without a round trip through the pool.
//!
//! Holding the victim's SPT lock across the swap/file write is what makes
//! the owner's next touch of that page block until the contents are safe.
//! Lock order: an SPT lock may be held when the table lock is taken, never
//! the other way around; selection releases the table lock before the
//! confirm step locks the victim's SPT.

use alloc::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Weak},
    vec::Vec,
};
use core::sync::atomic::{AtomicBool, Ordering};

use super::{
    addr::VirtPage,
    page::{self, PageLocation},
    pool::{KPage, UserPool},
};
use crate::{
    process::{Pid, Process},
    sync::SpinLock,
    Kernel,
};

struct FrameEntry {
    upage: VirtPage,
    owner: Weak<Process>,
    pid: Pid,
}

struct FrameList {
    /// Clock order: front is the next eviction candidate.
    queue: VecDeque<KPage>,
    entries: BTreeMap<KPage, FrameEntry>,
}

/// Diagnostic snapshot of one frame table entry.
#[derive(Debug, Clone, Copy)]
pub struct FrameInfo {
    pub kpage: KPage,
    pub upage: VirtPage,
    pub pid: Pid,
    pub pinned: bool,
}

pub struct FrameTable {
    pool: UserPool,
    inner: SpinLock<FrameList>,
    /// Eviction-exempt flags, one per frame. Kept outside the table lock so
    /// the pin path never orders the SPT lock against it.
    pinned: Vec<AtomicBool>,
}

impl FrameTable {
    pub fn new(frame_count: usize) -> Self {
        let mut pinned = Vec::with_capacity(frame_count);
        pinned.resize_with(frame_count, || AtomicBool::new(false));
        FrameTable {
            pool: UserPool::new(frame_count),
            inner: SpinLock::named(
                "frame table",
                FrameList {
                    queue: VecDeque::new(),
                    entries: BTreeMap::new(),
                },
            ),
            pinned,
        }
    }

    pub fn pool(&self) -> &UserPool {
        &self.pool
    }

    /// Obtain a frame for `upage`, evicting if the pool is dry.
    ///
    /// The caller must not hold any SPT lock (eviction takes the victim's)
    /// or the filesystem lock (eviction may write file pages back).
    pub fn alloc(
        &self,
        kernel: &Kernel,
        owner: &Arc<Process>,
        upage: VirtPage,
        pinned: bool,
    ) -> KPage {
        let kpage = match self.pool.try_alloc() {
            Some(kpage) => kpage,
            None => self.evict(kernel),
        };
        self.pinned[kpage.index()].store(pinned, Ordering::Release);
        let mut inner = self.inner.lock();
        inner.entries.insert(
            kpage,
            FrameEntry {
                upage,
                owner: Arc::downgrade(owner),
                pid: owner.pid(),
            },
        );
        inner.queue.push_back(kpage);
        kpage
    }

    /// Release a frame to the pool (page descriptor destruction).
    ///
    /// If an evictor has already popped this frame's entry, ownership has
    /// passed to it: the evictor will find the descriptor gone, claim the
    /// frame, and reuse it, so the pool must not see it here.
    pub fn free(&self, kpage: KPage) {
        let mut inner = self.inner.lock();
        if inner.entries.remove(&kpage).is_some() {
            inner.queue.retain(|&k| k != kpage);
            self.pinned[kpage.index()].store(false, Ordering::Release);
            self.pool.dealloc(kpage);
        } else {
            log::trace!("{kpage} handed to in-flight eviction");
        }
    }

    /// Toggle the eviction-exempt flag.
    pub fn set_pinned(&self, kpage: KPage, pinned: bool) {
        self.pinned[kpage.index()].store(pinned, Ordering::Release);
    }

    pub fn is_pinned(&self, kpage: KPage) -> bool {
        self.pinned[kpage.index()].load(Ordering::Acquire)
    }

    /// Clock selection plus eviction. Returns a scrubbed frame owned by the
    /// caller and registered nowhere.
    fn evict(&self, kernel: &Kernel) -> KPage {
        loop {
            enum Picked {
                /// Entry popped; descriptor must be confirmed and evicted.
                Victim(KPage, VirtPage, Arc<Process>),
                /// Owner is gone; the frame is already ours.
                Orphan(KPage),
            }

            let picked = {
                let mut inner = self.inner.lock();
                let mut pinned_streak = 0usize;
                loop {
                    let len = inner.queue.len();
                    let Some(kpage) = inner.queue.pop_front() else {
                        // Another thread drew the last pool frame but has
                        // not registered it yet; let it make progress.
                        drop(inner);
                        core::hint::spin_loop();
                        break None;
                    };

                    if self.pinned[kpage.index()].load(Ordering::Acquire) {
                        inner.queue.push_back(kpage);
                        pinned_streak += 1;
                        if pinned_streak > len {
                            if len == self.pool.frame_count() {
                                panic!("every user frame is pinned; nothing can be evicted");
                            }
                            // The rest of the frames are mid-registration on
                            // other threads; back off and rescan.
                            drop(inner);
                            core::hint::spin_loop();
                            break None;
                        }
                        continue;
                    }
                    pinned_streak = 0;

                    let (upage, owner) = {
                        let entry = inner.entries.get(&kpage).expect("queued frame without entry");
                        (entry.upage, entry.owner.upgrade())
                    };
                    let Some(owner) = owner else {
                        inner.entries.remove(&kpage);
                        break Some(Picked::Orphan(kpage));
                    };

                    if owner.pagedir().is_accessed(upage) {
                        // Second chance.
                        owner.pagedir().set_accessed(upage, false);
                        inner.queue.push_back(kpage);
                        continue;
                    }

                    inner.entries.remove(&kpage);
                    break Some(Picked::Victim(kpage, upage, owner));
                }
            };
            let Some(picked) = picked else {
                // Retry: the pool may have refilled while we waited.
                if let Some(kpage) = self.pool.try_alloc() {
                    return kpage;
                }
                continue;
            };

            let kpage = match picked {
                Picked::Orphan(kpage) => kpage,
                Picked::Victim(kpage, upage, owner) => {
                    let mut spt = owner.spt().lock();
                    match spt.get_mut(upage) {
                        Some(desc) if desc.pinned => {
                            // Pinned between selection and confirmation: put
                            // the frame back and keep looking.
                            drop(spt);
                            let mut inner = self.inner.lock();
                            inner.entries.insert(
                                kpage,
                                FrameEntry {
                                    upage,
                                    owner: Arc::downgrade(&owner),
                                    pid: owner.pid(),
                                },
                            );
                            inner.queue.push_back(kpage);
                            continue;
                        }
                        Some(desc) => {
                            debug_assert_eq!(desc.location, PageLocation::InFrame(kpage));
                            let entry = owner.pagedir().clear(upage);
                            let dirty = entry.is_some_and(|e| e.is_dirty());

                            match &desc.file {
                                Some(backing) if desc.writable && dirty => {
                                    page::write_back(kernel, backing, kpage);
                                    desc.location = PageLocation::InFile;
                                }
                                Some(_) => {
                                    // Clean file page: the file already has
                                    // these bytes.
                                    desc.location = PageLocation::InFile;
                                }
                                None => {
                                    let slot = kernel.swap.write_page(&self.pool, kpage);
                                    desc.location = PageLocation::InSwap(slot);
                                }
                            }
                            log::trace!(
                                "evicted {upage} (pid {}) from {kpage} -> {:?}",
                                owner.pid(),
                                desc.location
                            );
                            kpage
                        }
                        None => {
                            // Destroyed while we were selecting it. The
                            // destroyer saw the entry missing and left the
                            // frame to us.
                            kpage
                        }
                    }
                }
            };

            // Scrub before reuse; poison in debug builds to surface
            // use-after-eviction bugs.
            let scrub = if cfg!(debug_assertions) { 0xCC } else { 0x00 };
            // SAFETY: the frame's entry is removed and its old mapping
            // cleared, so no process and no other evictor can reach it.
            unsafe { self.pool.fill_frame(kpage, scrub) };
            return kpage;
        }
    }

    /// Snapshot of all entries, for diagnostics and invariant checks.
    pub fn snapshot(&self) -> Vec<FrameInfo> {
        let inner = self.inner.lock();
        inner
            .queue
            .iter()
            .filter_map(|&kpage| {
                inner.entries.get(&kpage).map(|entry| FrameInfo {
                    kpage,
                    upage: entry.upage,
                    pid: entry.pid,
                    pinned: self.pinned[kpage.index()].load(Ordering::Acquire),
                })
            })
            .collect()
    }

    /// Number of frames currently charged to `pid`.
    pub fn frames_owned_by(&self, pid: Pid) -> usize {
        self.inner
            .lock()
            .entries
            .values()
            .filter(|entry| entry.pid == pid)
            .count()
    }
}

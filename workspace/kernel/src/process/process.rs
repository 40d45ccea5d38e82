//! The process object.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::{
    fs::FdTable,
    memory::{page::MmapTable, pagedir::PageDir, SuppPageTable},
    sync::SpinLock,
};

/// Process identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pid(pub u32);

impl Pid {
    pub fn as_raw(self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for Pid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One user process: its page directory, supplementary page table, open
/// files and mmap regions.
///
/// The SPT lock is the synchronization point between the owning process and
/// evictors working on its pages; everything else is private to the owner
/// (the user model is single-threaded) or has its own lock.
pub struct Process {
    pid: Pid,
    pagedir: PageDir,
    spt: SpinLock<SuppPageTable>,
    fds: SpinLock<FdTable>,
    mappings: SpinLock<MmapTable>,
    dead: AtomicBool,
}

impl Process {
    pub(crate) fn new(pid: Pid) -> Self {
        Process {
            pid,
            pagedir: PageDir::new(),
            spt: SpinLock::named("spt", SuppPageTable::new()),
            fds: SpinLock::new(FdTable::new()),
            mappings: SpinLock::new(MmapTable::new()),
            dead: AtomicBool::new(false),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn pagedir(&self) -> &PageDir {
        &self.pagedir
    }

    pub fn spt(&self) -> &SpinLock<SuppPageTable> {
        &self.spt
    }

    pub fn fds(&self) -> &SpinLock<FdTable> {
        &self.fds
    }

    pub fn mappings(&self) -> &SpinLock<MmapTable> {
        &self.mappings
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    /// Latch the dead flag; returns true if it was already set.
    pub(crate) fn mark_dead(&self) -> bool {
        self.dead.swap(true, Ordering::AcqRel)
    }
}

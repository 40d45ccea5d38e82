//! Per-process page directory.
//!
//! Software model of the hardware page table: the mapping a process's loads
//! and stores actually go through. The VM layer installs an entry when a
//! page is demand-loaded and clears it on eviction or teardown; the access
//! path maintains the accessed and dirty bits the way the MMU would.
//!
//! Every user access runs its byte copy *under the directory lock*. That is
//! the simulation's analogue of the atomicity of a hardware TLB fill: an
//! evictor that wants to clear a mapping must wait until an in-flight access
//! to that page has finished, and once the entry is gone any later access
//! faults instead of touching the frame.

use alloc::collections::BTreeMap;

use bitflags::bitflags;

use super::{
    addr::{VirtPage, PAGE_SIZE},
    pool::{KPage, UserPool},
};
use crate::sync::SpinLock;

bitflags! {
    /// Flag bits of one page directory entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PdFlags: u8 {
        const WRITABLE = 1 << 0;
        const ACCESSED = 1 << 1;
        const DIRTY = 1 << 2;
    }
}

/// One installed translation.
#[derive(Debug, Clone, Copy)]
pub struct PdEntry {
    pub kpage: KPage,
    pub flags: PdFlags,
}

impl PdEntry {
    pub fn is_dirty(&self) -> bool {
        self.flags.contains(PdFlags::DIRTY)
    }
}

/// Reason a simulated user access did not go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdMiss {
    /// No translation installed for the page.
    NotMapped,
    /// Store attempted through a read-only translation.
    ReadOnly,
}

/// A process's page directory.
pub struct PageDir {
    map: SpinLock<BTreeMap<VirtPage, PdEntry>>,
}

impl PageDir {
    pub fn new() -> Self {
        PageDir {
            map: SpinLock::named("pagedir", BTreeMap::new()),
        }
    }

    /// Install a translation. The page must not already be mapped.
    pub fn install(&self, upage: VirtPage, kpage: KPage, writable: bool) {
        let mut flags = PdFlags::empty();
        if writable {
            flags |= PdFlags::WRITABLE;
        }
        let prev = self.map.lock().insert(upage, PdEntry { kpage, flags });
        debug_assert!(prev.is_none(), "double install at {upage}");
    }

    /// Remove the translation for `upage`, returning it (with its final
    /// accessed/dirty bits) if one was installed.
    pub fn clear(&self, upage: VirtPage) -> Option<PdEntry> {
        self.map.lock().remove(&upage)
    }

    /// Current translation for `upage`, if any.
    pub fn translate(&self, upage: VirtPage) -> Option<PdEntry> {
        self.map.lock().get(&upage).copied()
    }

    pub fn is_accessed(&self, upage: VirtPage) -> bool {
        self.map
            .lock()
            .get(&upage)
            .is_some_and(|e| e.flags.contains(PdFlags::ACCESSED))
    }

    pub fn set_accessed(&self, upage: VirtPage, accessed: bool) {
        if let Some(entry) = self.map.lock().get_mut(&upage) {
            entry.flags.set(PdFlags::ACCESSED, accessed);
        }
    }

    pub fn is_dirty(&self, upage: VirtPage) -> bool {
        self.map
            .lock()
            .get(&upage)
            .is_some_and(|e| e.flags.contains(PdFlags::DIRTY))
    }

    /// Perform one page-sized (or smaller) user access.
    ///
    /// Looks up the translation, applies the write-permission check, sets
    /// the accessed (and, for stores, dirty) bit, and runs `f` over the
    /// frame's bytes, all under the directory lock.
    pub fn with_page<R>(
        &self,
        pool: &UserPool,
        upage: VirtPage,
        write: bool,
        f: impl FnOnce(&mut [u8; PAGE_SIZE]) -> R,
    ) -> Result<R, PdMiss> {
        let mut map = self.map.lock();
        let entry = map.get_mut(&upage).ok_or(PdMiss::NotMapped)?;
        if write && !entry.flags.contains(PdFlags::WRITABLE) {
            return Err(PdMiss::ReadOnly);
        }
        entry.flags |= PdFlags::ACCESSED;
        if write {
            entry.flags |= PdFlags::DIRTY;
        }
        let kpage = entry.kpage;
        // SAFETY: the translation is present while we hold the directory
        // lock, so the frame is owned by this process and eviction cannot
        // clear-and-reuse it until the lock is released. The reference dies
        // before the lock guard does.
        let bytes = unsafe { &mut *pool.frame_array_ptr(kpage) };
        Ok(f(bytes))
    }

    /// Number of installed translations, for diagnostics.
    pub fn mapped_count(&self) -> usize {
        self.map.lock().len()
    }
}

impl Default for PageDir {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_translate_clear() {
        let pool = UserPool::new(2);
        let pd = PageDir::new();
        let k = pool.try_alloc().unwrap();
        let up = VirtPage::containing(0x8000_0000);

        assert!(pd.translate(up).is_none());
        pd.install(up, k, true);
        assert_eq!(pd.translate(up).unwrap().kpage, k);

        let entry = pd.clear(up).unwrap();
        assert_eq!(entry.kpage, k);
        assert!(pd.translate(up).is_none());
    }

    #[test]
    fn access_sets_bits() {
        let pool = UserPool::new(1);
        let pd = PageDir::new();
        let k = pool.try_alloc().unwrap();
        let up = VirtPage::containing(0x10_000);
        pd.install(up, k, true);

        assert!(!pd.is_accessed(up));
        pd.with_page(&pool, up, false, |bytes| bytes[0]).unwrap();
        assert!(pd.is_accessed(up));
        assert!(!pd.is_dirty(up));

        pd.set_accessed(up, false);
        assert!(!pd.is_accessed(up));

        pd.with_page(&pool, up, true, |bytes| bytes[0] = 7).unwrap();
        assert!(pd.is_accessed(up));
        assert!(pd.is_dirty(up));
    }

    #[test]
    fn readonly_store_is_refused() {
        let pool = UserPool::new(1);
        let pd = PageDir::new();
        let k = pool.try_alloc().unwrap();
        let up = VirtPage::containing(0x10_000);
        pd.install(up, k, false);

        assert_eq!(
            pd.with_page(&pool, up, true, |_| ()).unwrap_err(),
            PdMiss::ReadOnly
        );
        assert!(pd.with_page(&pool, up, false, |_| ()).is_ok());
        assert_eq!(
            pd.with_page(&pool, VirtPage::containing(0x20_000), false, |_| ())
                .unwrap_err(),
            PdMiss::NotMapped
        );
    }
}

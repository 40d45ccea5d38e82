//! Supplementary page table: where each user page's contents actually live.
//!
//! Every user page a process may touch has a [`PageDescriptor`] here keyed
//! by its page address. The descriptor records the page's current residence
//! ([`PageLocation`]), its backing source (zero-filled or a file range), its
//! writability, the mmap region it belongs to, and the pin flag that keeps
//! it out of eviction's reach.
//!
//! The table itself is a plain map; everything that moves page contents
//! around (demand load, stack growth, destruction, unmapping) lives in the
//! free functions below, which coordinate the frame table, swap and
//! filesystem through the kernel context.

use alloc::{collections::BTreeMap, sync::Arc, vec::Vec};

use super::{
    addr::{VirtPage, PAGE_SIZE, STACK_LIMIT, STACK_SLOP, USER_TOP},
    pool::KPage,
    swap::SwapSlot,
};
use crate::{fs::OpenFile, process::Process, Kernel};

/// Opaque identifier of one mmap region, process-local.
///
/// The raw value is what `MMAP` returns to user space; `MAP_FAILED` is
/// reserved and never allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MapId(u32);

impl MapId {
    pub fn from_raw(raw: u32) -> Option<MapId> {
        (raw != silica_abi::MAP_FAILED).then_some(MapId(raw))
    }

    pub fn as_raw(self) -> u32 {
        self.0
    }
}

/// File range backing a page. `bytes` of real file data from `offset`; the
/// rest of the page reads as zero and is never written back.
#[derive(Clone)]
pub struct FileBacking {
    pub file: Arc<OpenFile>,
    pub offset: usize,
    pub bytes: usize,
}

/// Where the page's contents currently are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLocation {
    /// Never loaded; contents are defined by the backing source.
    NotPresent,
    /// Resident in the given frame.
    InFrame(KPage),
    /// Swapped out to the given slot.
    InSwap(SwapSlot),
    /// Contents live (only) in the backing file.
    InFile,
}

/// One entry of a process's supplementary page table.
pub struct PageDescriptor {
    pub location: PageLocation,
    /// `None` means zero-backed.
    pub file: Option<FileBacking>,
    pub writable: bool,
    pub mapping: Option<MapId>,
    /// While set, the page must stay resident and eviction must skip it.
    pub pinned: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SptError {
    #[error("page already mapped")]
    AlreadyMapped,
    #[error("no mapping with that id")]
    UnknownMapping,
}

/// Per-process map from user page to descriptor.
pub struct SuppPageTable {
    pages: BTreeMap<VirtPage, PageDescriptor>,
}

impl SuppPageTable {
    pub fn new() -> Self {
        SuppPageTable {
            pages: BTreeMap::new(),
        }
    }

    /// Descriptor covering `addr`, if any.
    pub fn lookup(&self, addr: usize) -> Option<&PageDescriptor> {
        self.pages.get(&VirtPage::containing(addr))
    }

    pub(crate) fn get(&self, upage: VirtPage) -> Option<&PageDescriptor> {
        self.pages.get(&upage)
    }

    pub(crate) fn get_mut(&mut self, upage: VirtPage) -> Option<&mut PageDescriptor> {
        self.pages.get_mut(&upage)
    }

    /// Install a zero-backed, not-yet-loaded descriptor.
    pub fn alloc_zero(&mut self, upage: VirtPage, writable: bool) -> Result<(), SptError> {
        self.install(
            upage,
            PageDescriptor {
                location: PageLocation::NotPresent,
                file: None,
                writable,
                mapping: None,
                pinned: false,
            },
        )
    }

    /// Install a file-backed, not-yet-loaded descriptor.
    pub fn alloc_file(
        &mut self,
        upage: VirtPage,
        backing: FileBacking,
        mapping: Option<MapId>,
        writable: bool,
    ) -> Result<(), SptError> {
        assert!(
            backing.bytes >= 1 && backing.bytes <= PAGE_SIZE,
            "file backing must cover 1..=PAGE_SIZE bytes"
        );
        self.install(
            upage,
            PageDescriptor {
                location: PageLocation::NotPresent,
                file: Some(backing),
                writable,
                mapping,
                pinned: false,
            },
        )
    }

    fn install(&mut self, upage: VirtPage, desc: PageDescriptor) -> Result<(), SptError> {
        if self.pages.contains_key(&upage) {
            return Err(SptError::AlreadyMapped);
        }
        self.pages.insert(upage, desc);
        Ok(())
    }

    pub(crate) fn remove(&mut self, upage: VirtPage) -> Option<PageDescriptor> {
        self.pages.remove(&upage)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VirtPage, &PageDescriptor)> {
        self.pages.iter().map(|(&upage, desc)| (upage, desc))
    }

    pub(crate) fn page_keys(&self) -> Vec<VirtPage> {
        self.pages.keys().copied().collect()
    }
}

impl Default for SuppPageTable {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Mmap bookkeeping ────────────────────────────────────────────────────────

/// One established mmap region.
pub struct MmapRegion {
    pub start: VirtPage,
    pub page_count: usize,
    /// The file reopened for this mapping; closed when the region dies.
    pub file: Arc<OpenFile>,
}

/// Per-process registry of mmap regions, keyed by opaque id.
pub struct MmapTable {
    next_id: u32,
    regions: BTreeMap<MapId, MmapRegion>,
}

impl MmapTable {
    pub fn new() -> Self {
        MmapTable {
            next_id: 0,
            regions: BTreeMap::new(),
        }
    }

    /// Reserve the next mapping id. Ids are never reused within a process.
    pub fn allocate_id(&mut self) -> MapId {
        let id = MapId(self.next_id);
        self.next_id += 1;
        debug_assert_ne!(id.as_raw(), silica_abi::MAP_FAILED);
        id
    }

    pub fn insert(&mut self, id: MapId, region: MmapRegion) {
        let prev = self.regions.insert(id, region);
        debug_assert!(prev.is_none());
    }

    pub fn remove(&mut self, id: MapId) -> Option<MmapRegion> {
        self.regions.remove(&id)
    }

    pub fn get(&self, id: MapId) -> Option<&MmapRegion> {
        self.regions.get(&id)
    }

    pub fn ids(&self) -> Vec<MapId> {
        self.regions.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

impl Default for MmapTable {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Demand load ─────────────────────────────────────────────────────────────

/// Make the page resident, returning its frame.
///
/// Idempotent for already-resident pages. The caller must have set the
/// descriptor's `pinned` flag beforehand; the frame is registered pinned so
/// eviction cannot take it while it is being filled, and only the caller
/// clears the flag afterwards.
///
/// The caller must not hold the process's SPT lock, the frame table lock or
/// the filesystem lock.
pub fn force_load(kernel: &Kernel, proc: &Arc<Process>, upage: VirtPage) -> KPage {
    // Snapshot the descriptor. The owner is single-threaded and the page is
    // pinned, so nobody else will move it between here and the install.
    let (location, backing, writable) = {
        let spt = proc.spt().lock();
        let desc = spt.get(upage).expect("force_load of an unmapped page");
        debug_assert!(desc.pinned, "force_load requires the descriptor pinned");
        if let PageLocation::InFrame(kpage) = desc.location {
            kernel.frames.set_pinned(kpage, true);
            return kpage;
        }
        (desc.location, desc.file.clone(), desc.writable)
    };

    let kpage = kernel.frames.alloc(kernel, proc, upage, true);

    match location {
        PageLocation::InFrame(_) => unreachable!(),
        PageLocation::NotPresent => {
            // SAFETY: the frame is freshly allocated and registered pinned;
            // no other thread can reach it yet.
            unsafe { kernel.frames.pool().fill_frame(kpage, 0) };
        }
        PageLocation::InSwap(slot) => {
            let ok = kernel.swap.load_page(kernel.frames.pool(), slot, kpage);
            assert!(ok, "stale swap {slot} referenced by {upage}");
        }
        PageLocation::InFile => {
            let backing = backing.as_ref().expect("InFile page without a file source");
            // A short read past end-of-file leaves the tail zeroed.
            let mut buf = [0u8; PAGE_SIZE];
            {
                let _fs = kernel.filesys.lock();
                backing.file.read_at(backing.offset, &mut buf[..backing.bytes]);
            }
            // SAFETY: as above; the frame is ours until the caller unpins it.
            unsafe { kernel.frames.pool().copy_into_frame(kpage, 0, &buf) };
        }
    }

    {
        let mut spt = proc.spt().lock();
        let desc = spt.get_mut(upage).expect("descriptor vanished during load");
        desc.location = PageLocation::InFrame(kpage);
        proc.pagedir().install(upage, kpage, writable);
    }
    log::trace!("load {upage} -> {kpage} (pid {})", proc.pid());
    kpage
}

// ─── Stack growth ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackGrowth {
    /// A fresh zero-backed writable page was installed.
    Grew,
    /// The address was already covered; nothing to do.
    AlreadyMapped,
    /// Not a plausible stack access.
    Refused,
}

/// Grow the stack if `addr` looks like a stack access relative to `esp`.
///
/// An access within [`STACK_SLOP`] bytes below the stack pointer (or at or
/// above it) inside the stack region gets a page; anything deeper is a stray
/// pointer and is refused.
pub fn grow_stack_if_necessary(
    spt: &mut SuppPageTable,
    esp: usize,
    addr: usize,
) -> StackGrowth {
    let upage = VirtPage::containing(addr);
    if spt.get(upage).is_some() {
        return StackGrowth::AlreadyMapped;
    }
    if addr < STACK_LIMIT || addr >= USER_TOP {
        return StackGrowth::Refused;
    }
    if addr + STACK_SLOP < esp {
        return StackGrowth::Refused;
    }
    spt.alloc_zero(upage, true).expect("checked absent above");
    log::trace!("stack grew to {upage} (esp {esp:#x})");
    StackGrowth::Grew
}

// ─── Page fault entry ────────────────────────────────────────────────────────

/// Resolve a user page fault. Returns false if the access is invalid and
/// the process must be terminated.
///
/// Exactly one of three things happens: a known page is demand-loaded; an
/// unknown address inside the stack-growth window gets a fresh page and is
/// then loaded; or the fault is refused.
pub fn handle_page_fault(
    kernel: &Kernel,
    proc: &Arc<Process>,
    addr: usize,
    write: bool,
    esp: usize,
) -> bool {
    if addr >= USER_TOP {
        return false;
    }
    let upage = VirtPage::containing(addr);

    {
        let mut spt = proc.spt().lock();
        match spt.get_mut(upage) {
            Some(desc) => {
                if write && !desc.writable {
                    log::warn!("write fault on read-only {upage} (pid {})", proc.pid());
                    return false;
                }
                desc.pinned = true;
            }
            None => match grow_stack_if_necessary(&mut spt, esp, addr) {
                StackGrowth::Grew | StackGrowth::AlreadyMapped => {
                    spt.get_mut(upage).expect("just grown").pinned = true;
                }
                StackGrowth::Refused => {
                    log::warn!(
                        "page fault at {addr:#x} (esp {esp:#x}, pid {}): no mapping",
                        proc.pid()
                    );
                    return false;
                }
            },
        }
    }

    let kpage = force_load(kernel, proc, upage);

    let mut spt = proc.spt().lock();
    if let Some(desc) = spt.get_mut(upage) {
        desc.pinned = false;
    }
    kernel.frames.set_pinned(kpage, false);
    true
}

// ─── Destruction ─────────────────────────────────────────────────────────────

/// Destroy one descriptor: flush dirty file-backed contents, release the
/// frame if resident, release the swap slot if swapped.
pub fn destroy_page(kernel: &Kernel, proc: &Arc<Process>, upage: VirtPage) {
    let mut spt = proc.spt().lock();
    let Some(desc) = spt.remove(upage) else {
        return;
    };

    match desc.location {
        PageLocation::InFrame(kpage) => {
            let entry = proc.pagedir().clear(upage);
            let dirty = entry.is_some_and(|e| e.is_dirty());
            if let Some(backing) = &desc.file {
                if desc.writable && dirty {
                    write_back(kernel, backing, kpage);
                }
            }
            kernel.frames.free(kpage);
        }
        PageLocation::InSwap(slot) => kernel.swap.release(slot),
        PageLocation::NotPresent | PageLocation::InFile => {}
    }
}

/// Flush a resident file-backed page to its file range.
///
/// Called with the owning SPT lock held (destruction or eviction), which is
/// what gives us exclusive access to the frame contents.
pub(crate) fn write_back(kernel: &Kernel, backing: &FileBacking, kpage: KPage) {
    let mut buf = [0u8; PAGE_SIZE];
    // SAFETY: see above; the caller's SPT lock orders us against the owner
    // and against other evictors of this page.
    unsafe {
        kernel
            .frames
            .pool()
            .copy_from_frame(kpage, 0, &mut buf[..backing.bytes]);
    }
    let _fs = kernel.filesys.lock();
    let written = backing.file.write_at(backing.offset, &buf[..backing.bytes]);
    debug_assert_eq!(written, backing.bytes, "short mmap write-back");
}

/// Tear down a whole mapping: flush and destroy every page carrying `id`,
/// then close the file that was reopened for it.
pub fn munmap(kernel: &Kernel, proc: &Arc<Process>, id: MapId) -> Result<(), SptError> {
    let Some(region) = proc.mappings().lock().remove(id) else {
        return Err(SptError::UnknownMapping);
    };
    for i in 0..region.page_count {
        destroy_page(kernel, proc, region.start.add(i));
    }
    log::debug!(
        "munmap id {} [{} pages at {}] (pid {})",
        id.as_raw(),
        region.page_count,
        region.start,
        proc.pid()
    );
    drop(region); // closes the reopened file
    Ok(())
}

/// Destroy the process's entire address space: every descriptor (with dirty
/// file-backed flushes) and every mmap region.
pub(crate) fn teardown(kernel: &Kernel, proc: &Arc<Process>) {
    let pages = proc.spt().lock().page_keys();
    for upage in pages {
        destroy_page(kernel, proc, upage);
    }
    let mut mappings = proc.mappings().lock();
    let ids = mappings.ids();
    for id in ids {
        mappings.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_pages_are_rejected() {
        let mut spt = SuppPageTable::new();
        let up = VirtPage::containing(0x4000);
        assert!(spt.alloc_zero(up, true).is_ok());
        assert_eq!(spt.alloc_zero(up, false), Err(SptError::AlreadyMapped));
        assert_eq!(spt.len(), 1);
    }

    #[test]
    fn lookup_rounds_to_page() {
        let mut spt = SuppPageTable::new();
        spt.alloc_zero(VirtPage::containing(0x4000), true).unwrap();
        assert!(spt.lookup(0x4123).is_some());
        assert!(spt.lookup(0x4fff).is_some());
        assert!(spt.lookup(0x5000).is_none());
    }

    #[test]
    fn stack_growth_window() {
        let esp = USER_TOP - 3 * PAGE_SIZE;

        // Pushes just below the stack pointer are plausible.
        for delta in [4usize, 32] {
            let mut spt = SuppPageTable::new();
            assert_eq!(
                grow_stack_if_necessary(&mut spt, esp, esp - delta),
                StackGrowth::Grew
            );
        }

        // At or above esp is also fine.
        let mut spt = SuppPageTable::new();
        assert_eq!(grow_stack_if_necessary(&mut spt, esp, esp), StackGrowth::Grew);

        // More than STACK_SLOP below esp is a stray pointer.
        let mut spt = SuppPageTable::new();
        assert_eq!(
            grow_stack_if_necessary(&mut spt, esp, esp - 33),
            StackGrowth::Refused
        );

        // Below the stack region entirely.
        let mut spt = SuppPageTable::new();
        assert_eq!(
            grow_stack_if_necessary(&mut spt, esp, STACK_LIMIT - PAGE_SIZE),
            StackGrowth::Refused
        );

        // Already-mapped pages report success without change.
        let mut spt = SuppPageTable::new();
        spt.alloc_zero(VirtPage::containing(esp), true).unwrap();
        assert_eq!(
            grow_stack_if_necessary(&mut spt, esp, esp),
            StackGrowth::AlreadyMapped
        );
        assert_eq!(spt.len(), 1);
    }

    #[test]
    fn mmap_ids_are_not_reused() {
        let mut table = MmapTable::new();
        let a = table.allocate_id();
        let b = table.allocate_id();
        assert_ne!(a, b);
        assert!(MapId::from_raw(silica_abi::MAP_FAILED).is_none());
        assert_eq!(MapId::from_raw(a.as_raw()), Some(a));
    }
}

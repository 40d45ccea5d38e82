//! Swap manager.
//!
//! A fixed pool of page-sized slots on the swap block device. Slot occupancy
//! lives in a bitmap under one lock; the sector I/O itself runs outside that
//! lock. The bitmap flip and the block transfer are therefore not atomic:
//! a slot's contents are trusted only while the owning page descriptor still
//! references it, and a load clears the bit only *after* the read completes
//! so the slot cannot be reused out from under the reader.

use alloc::{boxed::Box, vec, vec::Vec};

use super::{
    addr::PAGE_SIZE,
    pool::{KPage, UserPool},
};
use crate::{
    drivers::block::{BlockDevice, SECTOR_SIZE},
    sync::SpinLock,
};

/// Sectors occupied by one page.
pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;

/// Index of one page-sized slot on the swap device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SwapSlot(pub usize);

impl core::fmt::Display for SwapSlot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

pub struct SwapManager {
    device: Box<dyn BlockDevice + Send + Sync>,
    slots: SpinLock<SlotBitmap>,
    slot_count: usize,
}

impl SwapManager {
    /// Size the slot pool from the device capacity.
    pub fn new(device: Box<dyn BlockDevice + Send + Sync>) -> Self {
        let slot_count = (device.sector_count() as usize) / SECTORS_PER_PAGE;
        log::info!("swap: {} slots on a {}-sector device", slot_count, device.sector_count());
        SwapManager {
            device,
            slots: SpinLock::named("swap bitmap", SlotBitmap::new(slot_count)),
            slot_count,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Write the frame's contents to a free slot and return it.
    ///
    /// Panics when the swap device is full: running out of swap is a system
    /// capacity failure, not a user error.
    ///
    /// The caller must have exclusive access to the frame (it holds the
    /// frame out of the frame table during eviction).
    pub fn write_page(&self, pool: &UserPool, kpage: KPage) -> SwapSlot {
        let slot = self
            .slots
            .lock()
            .scan_and_flip()
            .unwrap_or_else(|| panic!("swap is full ({} slots)", self.slot_count));

        let mut sector_buf = [0u8; SECTOR_SIZE];
        for i in 0..SECTORS_PER_PAGE {
            // SAFETY: per the contract above, the evicting thread is the
            // only one touching this frame.
            unsafe {
                pool.copy_from_frame(kpage, i * SECTOR_SIZE, &mut sector_buf);
            }
            self.device
                .write_sector((slot.0 * SECTORS_PER_PAGE + i) as u64, &sector_buf)
                .expect("swap device write failed");
        }
        log::trace!("swap: wrote {kpage} to {slot}");
        slot
    }

    /// Read a slot back into the frame and release the slot.
    ///
    /// Returns false iff `slot` is out of range or not currently in use.
    ///
    /// The caller must have exclusive access to the frame (demand load runs
    /// with the page descriptor pinned and the frame freshly allocated).
    pub fn load_page(&self, pool: &UserPool, slot: SwapSlot, kpage: KPage) -> bool {
        {
            let slots = self.slots.lock();
            if slot.0 >= self.slot_count || !slots.test(slot.0) {
                return false;
            }
        }

        let mut sector_buf = [0u8; SECTOR_SIZE];
        for i in 0..SECTORS_PER_PAGE {
            self.device
                .read_sector((slot.0 * SECTORS_PER_PAGE + i) as u64, &mut sector_buf)
                .expect("swap device read failed");
            // SAFETY: per the contract above, the loading thread is the only
            // one touching this frame.
            unsafe {
                pool.copy_into_frame(kpage, i * SECTOR_SIZE, &sector_buf);
            }
        }

        // Only now may the slot be handed to someone else.
        self.slots.lock().clear(slot.0);
        log::trace!("swap: loaded {slot} into {kpage}");
        true
    }

    /// Release a slot without reading it (page descriptor destruction).
    pub fn release(&self, slot: SwapSlot) {
        let mut slots = self.slots.lock();
        debug_assert!(slots.test(slot.0), "releasing free swap {slot}");
        slots.clear(slot.0);
    }

    /// Indices of all in-use slots, for diagnostics and invariant checks.
    pub fn used_slots(&self) -> Vec<usize> {
        let slots = self.slots.lock();
        (0..self.slot_count).filter(|&i| slots.test(i)).collect()
    }

    pub fn used_count(&self) -> usize {
        self.slots.lock().used
    }
}

// ─── Slot bitmap ─────────────────────────────────────────────────────────────

struct SlotBitmap {
    words: Vec<u64>,
    len: usize,
    used: usize,
}

impl SlotBitmap {
    fn new(len: usize) -> Self {
        SlotBitmap {
            words: vec![0u64; len.div_ceil(64)],
            len,
            used: 0,
        }
    }

    /// Find the lowest clear bit, set it, and return its index.
    fn scan_and_flip(&mut self) -> Option<SwapSlot> {
        for (w, word) in self.words.iter_mut().enumerate() {
            if *word != u64::MAX {
                let bit = word.trailing_ones() as usize;
                let idx = w * 64 + bit;
                if idx >= self.len {
                    return None;
                }
                *word |= 1 << bit;
                self.used += 1;
                return Some(SwapSlot(idx));
            }
        }
        None
    }

    fn test(&self, idx: usize) -> bool {
        idx < self.len && self.words[idx / 64] & (1 << (idx % 64)) != 0
    }

    fn clear(&mut self, idx: usize) {
        debug_assert!(idx < self.len);
        let mask = 1u64 << (idx % 64);
        if self.words[idx / 64] & mask != 0 {
            self.words[idx / 64] &= !mask;
            self.used -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::drivers::block::RamDisk;

    fn manager(pages: usize) -> SwapManager {
        SwapManager::new(Box::new(RamDisk::new((pages * SECTORS_PER_PAGE) as u64)))
    }

    #[test]
    fn page_roundtrip() {
        let pool = UserPool::new(2);
        let swap = manager(4);
        let src = pool.try_alloc().unwrap();
        let dst = pool.try_alloc().unwrap();

        let payload = [0x5Au8; PAGE_SIZE];
        // SAFETY: freshly allocated frames, single-threaded test.
        unsafe { pool.copy_into_frame(src, 0, &payload) };

        let slot = swap.write_page(&pool, src);
        assert_eq!(swap.used_count(), 1);

        assert!(swap.load_page(&pool, slot, dst));
        assert_eq!(swap.used_count(), 0);

        let mut out = [0u8; PAGE_SIZE];
        // SAFETY: as above.
        unsafe { pool.copy_from_frame(dst, 0, &mut out) };
        assert_eq!(out, payload);
    }

    #[test]
    fn load_of_free_or_bogus_slot_fails() {
        let pool = UserPool::new(1);
        let swap = manager(2);
        let k = pool.try_alloc().unwrap();

        assert!(!swap.load_page(&pool, SwapSlot(0), k));
        assert!(!swap.load_page(&pool, SwapSlot(99), k));

        let slot = swap.write_page(&pool, k);
        assert!(swap.load_page(&pool, slot, k));
        // Slot was released by the successful load.
        assert!(!swap.load_page(&pool, slot, k));
    }

    #[test]
    fn release_frees_without_reading() {
        let pool = UserPool::new(1);
        let swap = manager(1);
        let k = pool.try_alloc().unwrap();
        let slot = swap.write_page(&pool, k);
        assert_eq!(swap.used_slots(), alloc::vec![slot.0]);
        swap.release(slot);
        assert!(swap.used_slots().is_empty());
    }

    #[test]
    #[should_panic(expected = "swap is full")]
    fn exhaustion_panics() {
        let pool = UserPool::new(1);
        let swap = manager(1);
        let k = pool.try_alloc().unwrap();
        let _ = swap.write_page(&pool, k);
        let _ = swap.write_page(&pool, k);
    }

    proptest! {
        /// Arbitrary allocate/free interleavings never hand out a slot that
        /// is already in use, and the used count always matches the bitmap.
        #[test]
        fn slot_accounting_is_exact(ops in proptest::collection::vec(0u8..3, 1..64)) {
            let mut bitmap = SlotBitmap::new(16);
            let mut held: Vec<usize> = Vec::new();
            for op in ops {
                match op {
                    0 => {
                        if let Some(slot) = bitmap.scan_and_flip() {
                            prop_assert!(!held.contains(&slot.0));
                            held.push(slot.0);
                        } else {
                            prop_assert_eq!(held.len(), 16);
                        }
                    }
                    _ => {
                        if let Some(slot) = held.pop() {
                            prop_assert!(bitmap.test(slot));
                            bitmap.clear(slot);
                        }
                    }
                }
                prop_assert_eq!(bitmap.used, held.len());
                for &slot in &held {
                    prop_assert!(bitmap.test(slot));
                }
            }
        }
    }
}

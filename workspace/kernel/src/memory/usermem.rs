//! User pointer validation and pinning for the syscall boundary.
//!
//! Before a syscall body touches user memory, every page it will reference
//! is checked against the caller's address space, made resident, and pinned
//! so eviction cannot move it while kernel I/O is in flight. The pin set is
//! an RAII value: dropping it unpins exactly the pages that were pinned, on
//! the success path, on an error detected mid-call, and on the way out of a
//! call that terminates the process.
//!
//! Validation of an address that is not covered by a descriptor first gives
//! the stack a chance to grow, so a syscall whose buffer argument points
//! just below the caller's stack pointer behaves like the equivalent user
//! store would.

use alloc::{string::String, sync::Arc, vec::Vec};

use super::{
    addr::{self, VirtPage, PAGE_SIZE, USER_TOP},
    page::{self, PageLocation, StackGrowth},
};
use crate::{process::Process, syscall::Termination, Kernel};

/// What the syscall body will do with the memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// The kernel reads from user memory.
    Read,
    /// The kernel writes into user memory; pages must be writable.
    Write,
}

/// An RAII set of pinned user pages belonging to one process.
pub struct PinnedPages<'a> {
    kernel: &'a Kernel,
    proc: Arc<Process>,
    pages: Vec<VirtPage>,
}

impl<'a> PinnedPages<'a> {
    fn new(kernel: &'a Kernel, proc: &Arc<Process>) -> Self {
        PinnedPages {
            kernel,
            proc: Arc::clone(proc),
            pages: Vec::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn pages(&self) -> &[VirtPage] {
        &self.pages
    }
}

impl Drop for PinnedPages<'_> {
    fn drop(&mut self) {
        for &upage in &self.pages {
            unpin_page(self.kernel, &self.proc, upage);
        }
    }
}

fn unpin_page(kernel: &Kernel, proc: &Arc<Process>, upage: VirtPage) {
    let mut spt = proc.spt().lock();
    if let Some(desc) = spt.get_mut(upage) {
        desc.pinned = false;
        if let PageLocation::InFrame(kpage) = desc.location {
            kernel.frames.set_pinned(kpage, false);
        }
    }
}

/// Validate and pin the single page containing `addr`.
pub fn pin_ptr<'a>(
    kernel: &'a Kernel,
    proc: &Arc<Process>,
    addr: usize,
    esp: usize,
    access: Access,
) -> Result<PinnedPages<'a>, Termination> {
    pin_range(kernel, proc, addr, 1, esp, access)
}

/// Validate and pin every page intersecting `[addr, addr + len)`.
///
/// On failure all pages pinned so far are unpinned and the caller's process
/// is to be terminated with status −1.
pub fn pin_range<'a>(
    kernel: &'a Kernel,
    proc: &Arc<Process>,
    addr: usize,
    len: usize,
    esp: usize,
    access: Access,
) -> Result<PinnedPages<'a>, Termination> {
    let mut pins = PinnedPages::new(kernel, proc);
    if len == 0 {
        return Ok(pins);
    }
    if !addr::is_user_range(addr, len) {
        log::warn!("rejected user range {addr:#x}+{len} (pid {})", proc.pid());
        return Err(Termination::FAULT);
    }
    for upage in addr::pages_covering(addr, len) {
        // Stack growth keys off the lowest referenced byte in this page.
        let probe = addr.max(upage.start());
        pin_page(kernel, proc, upage, probe, esp, access)?;
        pins.pages.push(upage);
    }
    Ok(pins)
}

/// Validate and pin successive pages from `addr` until a NUL byte, returning
/// the string read. Each page is validated before it is read.
pub fn pin_cstr<'a>(
    kernel: &'a Kernel,
    proc: &Arc<Process>,
    addr: usize,
    esp: usize,
) -> Result<(PinnedPages<'a>, String), Termination> {
    let mut pins = PinnedPages::new(kernel, proc);
    let mut bytes: Vec<u8> = Vec::new();
    let mut cursor = addr;

    loop {
        if cursor >= USER_TOP {
            log::warn!("user string ran past the top of user space (pid {})", proc.pid());
            return Err(Termination::FAULT);
        }
        let upage = VirtPage::containing(cursor);
        pin_page(kernel, proc, upage, cursor, esp, Access::Read)?;
        pins.pages.push(upage);

        let span = upage.end() - cursor;
        let start = bytes.len();
        bytes.resize(start + span, 0);
        copy_from_user(kernel, proc, cursor, &mut bytes[start..])?;

        if let Some(nul) = bytes[start..].iter().position(|&b| b == 0) {
            bytes.truncate(start + nul);
            break;
        }
        cursor = upage.end();
    }

    match String::from_utf8(bytes) {
        Ok(s) => Ok((pins, s)),
        Err(_) => {
            log::warn!("user string at {addr:#x} is not UTF-8 (pid {})", proc.pid());
            Err(Termination::FAULT)
        }
    }
}

/// Validate one page and leave it resident and pinned.
fn pin_page(
    kernel: &Kernel,
    proc: &Arc<Process>,
    upage: VirtPage,
    probe_addr: usize,
    esp: usize,
    access: Access,
) -> Result<(), Termination> {
    {
        let mut spt = proc.spt().lock();
        let desc = match spt.get_mut(upage) {
            Some(desc) => desc,
            None => match page::grow_stack_if_necessary(&mut spt, esp, probe_addr) {
                StackGrowth::Grew | StackGrowth::AlreadyMapped => {
                    spt.get_mut(upage).expect("installed by stack growth")
                }
                StackGrowth::Refused => {
                    log::warn!("no mapping for {upage} (pid {})", proc.pid());
                    return Err(Termination::FAULT);
                }
            },
        };
        if access == Access::Write && !desc.writable {
            log::warn!("write through read-only {upage} (pid {})", proc.pid());
            return Err(Termination::FAULT);
        }
        desc.pinned = true;
    }
    // The frame comes back pinned; force_load is a no-op when already
    // resident apart from pinning the frame.
    page::force_load(kernel, proc, upage);
    Ok(())
}

// ─── Kernel access to pinned user memory ─────────────────────────────────────

/// Copy user memory into a kernel buffer. The whole range must already be
/// resident; syscall bodies call this on pinned pages only.
pub fn copy_from_user(
    kernel: &Kernel,
    proc: &Arc<Process>,
    addr: usize,
    buf: &mut [u8],
) -> Result<(), Termination> {
    walk(kernel, proc, addr, buf.len(), false, |offset, page_off, n, bytes| {
        buf[offset..offset + n].copy_from_slice(&bytes[page_off..page_off + n]);
    })
}

/// Copy a kernel buffer into user memory. Same residency requirement as
/// [`copy_from_user`].
pub fn copy_to_user(
    kernel: &Kernel,
    proc: &Arc<Process>,
    addr: usize,
    data: &[u8],
) -> Result<(), Termination> {
    walk(kernel, proc, addr, data.len(), true, |offset, page_off, n, bytes| {
        bytes[page_off..page_off + n].copy_from_slice(&data[offset..offset + n]);
    })
}

fn walk(
    kernel: &Kernel,
    proc: &Arc<Process>,
    addr: usize,
    len: usize,
    write: bool,
    mut per_page: impl FnMut(usize, usize, usize, &mut [u8; PAGE_SIZE]),
) -> Result<(), Termination> {
    let mut done = 0;
    while done < len {
        let cur = addr + done;
        let upage = VirtPage::containing(cur);
        let page_off = cur - upage.start();
        let n = (PAGE_SIZE - page_off).min(len - done);
        let hit = proc
            .pagedir()
            .with_page(kernel.frames.pool(), upage, write, |bytes| {
                per_page(done, page_off, n, bytes)
            });
        if hit.is_err() {
            // Pinned pages cannot be evicted, so a miss here means the
            // caller skipped validation.
            debug_assert!(false, "kernel access to unpinned user page {upage}");
            return Err(Termination::FAULT);
        }
        done += n;
    }
    Ok(())
}

//! Memory-mapping syscall handlers.

use alloc::sync::Arc;

use silica_abi::{MAP_FAILED, STDIN_FILENO, STDOUT_FILENO};

use crate::memory::{
    addr::{STACK_LIMIT, PAGE_SIZE},
    page::{self, FileBacking, MapId, MmapRegion},
    VirtPage,
};

use super::{gate::SyscallCtx, Termination};

/// Map the file behind `fd` at `addr`, page by page.
///
/// Preconditions (any failure returns [`MAP_FAILED`], not termination): the
/// descriptor names a real file of nonzero length, `addr` is a nonzero
/// page-aligned user address, the mapping ends at or below the stack
/// region's floor, and no target page is already in use. On success the
/// file is reopened for the mapping's lifetime and an opaque mapping id is
/// returned.
pub(super) fn sys_mmap(ctx: &SyscallCtx<'_>, fd: u32, addr: usize) -> Result<u32, Termination> {
    if fd == STDIN_FILENO || fd == STDOUT_FILENO {
        return Ok(MAP_FAILED);
    }
    let Ok(file) = ctx.proc.fds().lock().get(fd) else {
        return Ok(MAP_FAILED);
    };

    let len = {
        let _fs = ctx.kernel.filesys.lock();
        file.len()
    };
    if len == 0 || addr == 0 {
        return Ok(MAP_FAILED);
    }
    let Some(start) = VirtPage::from_start(addr) else {
        return Ok(MAP_FAILED);
    };
    let page_count = len.div_ceil(PAGE_SIZE);
    let Some(end) = addr.checked_add(page_count * PAGE_SIZE) else {
        return Ok(MAP_FAILED);
    };
    if end > STACK_LIMIT {
        return Ok(MAP_FAILED);
    }

    let mapped = {
        let _fs = ctx.kernel.filesys.lock();
        Arc::new(file.reopen())
    };

    let id = ctx.proc.mappings().lock().allocate_id();
    {
        let mut spt = ctx.proc.spt().lock();
        for i in 0..page_count {
            let bytes = if i == page_count - 1 {
                len - i * PAGE_SIZE
            } else {
                PAGE_SIZE
            };
            let backing = FileBacking {
                file: Arc::clone(&mapped),
                offset: i * PAGE_SIZE,
                bytes,
            };
            if spt.alloc_file(start.add(i), backing, Some(id), true).is_err() {
                // Roll back the pages installed so far; dropping `mapped`
                // closes the reopened file.
                for j in 0..i {
                    spt.remove(start.add(j));
                }
                log::debug!("mmap at {start} collides with an existing page");
                return Ok(MAP_FAILED);
            }
        }
    }

    ctx.proc.mappings().lock().insert(
        id,
        MmapRegion {
            start,
            page_count,
            file: mapped,
        },
    );
    log::debug!(
        "mmap fd {} -> id {} [{} pages at {}] (pid {})",
        fd,
        id.as_raw(),
        page_count,
        start,
        ctx.proc.pid()
    );
    Ok(id.as_raw())
}

/// Tear down the mapping `raw`. An id that was never returned by `MMAP` (or
/// was already unmapped) terminates the caller.
pub(super) fn sys_munmap(ctx: &SyscallCtx<'_>, raw: u32) -> Result<u32, Termination> {
    let Some(id) = MapId::from_raw(raw) else {
        return Err(Termination::FAULT);
    };
    match page::munmap(ctx.kernel, ctx.proc, id) {
        Ok(()) => Ok(0),
        Err(_) => Err(Termination::FAULT),
    }
}

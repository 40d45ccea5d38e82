//! Filesystem and console syscall handlers.
//!
//! Locking discipline: user buffers are validated and pinned *before* the
//! filesystem lock is taken, so no page fault (and hence no eviction, which
//! may itself need the filesystem lock for write-back) can occur while it is
//! held. The lock is held only around the spans that actually touch the
//! filesystem and is released before data is copied out to user memory.

use alloc::{sync::Arc, vec};

use silica_abi::{STDIN_FILENO, STDOUT_FILENO};

use crate::memory::{
    usermem::{self, Access},
    PAGE_SIZE,
};

use super::{gate::SyscallCtx, Termination};

const NEG_ONE: u32 = -1i32 as u32;

pub(super) fn sys_create(ctx: &SyscallCtx<'_>, name_ptr: usize, size: usize) -> Result<u32, Termination> {
    let (_pins, name) = usermem::pin_cstr(ctx.kernel, ctx.proc, name_ptr, ctx.esp)?;
    let created = ctx.kernel.filesys.lock().create(&name, size);
    Ok(created as u32)
}

pub(super) fn sys_remove(ctx: &SyscallCtx<'_>, name_ptr: usize) -> Result<u32, Termination> {
    let (_pins, name) = usermem::pin_cstr(ctx.kernel, ctx.proc, name_ptr, ctx.esp)?;
    let removed = ctx.kernel.filesys.lock().remove(&name);
    Ok(removed as u32)
}

pub(super) fn sys_open(ctx: &SyscallCtx<'_>, name_ptr: usize) -> Result<u32, Termination> {
    let (_pins, name) = usermem::pin_cstr(ctx.kernel, ctx.proc, name_ptr, ctx.esp)?;
    let opened = ctx.kernel.filesys.lock().open(&name);
    match opened {
        Some(file) => Ok(ctx.proc.fds().lock().insert(Arc::new(file))),
        None => Ok(NEG_ONE),
    }
}

pub(super) fn sys_filesize(ctx: &SyscallCtx<'_>, fd: u32) -> Result<u32, Termination> {
    let file = ctx.proc.fds().lock().get(fd)?;
    let _fs = ctx.kernel.filesys.lock();
    Ok(file.len() as u32)
}

pub(super) fn sys_read(
    ctx: &SyscallCtx<'_>,
    fd: u32,
    buf: usize,
    len: usize,
) -> Result<u32, Termination> {
    if fd == STDOUT_FILENO {
        return Err(Termination::FAULT);
    }
    let _pins = usermem::pin_range(ctx.kernel, ctx.proc, buf, len, ctx.esp, Access::Write)?;

    if fd == STDIN_FILENO {
        let mut keys = vec![0u8; len];
        for slot in keys.iter_mut() {
            *slot = ctx.kernel.console.getc();
        }
        usermem::copy_to_user(ctx.kernel, ctx.proc, buf, &keys)?;
        return Ok(len as u32);
    }

    let file = ctx.proc.fds().lock().get(fd)?;
    let mut chunk = [0u8; PAGE_SIZE];
    let mut total = 0;
    while total < len {
        let want = (len - total).min(PAGE_SIZE);
        let n = {
            let _fs = ctx.kernel.filesys.lock();
            file.read(&mut chunk[..want])
        };
        if n == 0 {
            break;
        }
        usermem::copy_to_user(ctx.kernel, ctx.proc, buf + total, &chunk[..n])?;
        total += n;
    }
    Ok(total as u32)
}

pub(super) fn sys_write(
    ctx: &SyscallCtx<'_>,
    fd: u32,
    buf: usize,
    len: usize,
) -> Result<u32, Termination> {
    if fd == STDIN_FILENO {
        return Err(Termination::FAULT);
    }
    let _pins = usermem::pin_range(ctx.kernel, ctx.proc, buf, len, ctx.esp, Access::Read)?;

    let mut chunk = [0u8; PAGE_SIZE];

    if fd == STDOUT_FILENO {
        let mut done = 0;
        while done < len {
            let n = (len - done).min(PAGE_SIZE);
            usermem::copy_from_user(ctx.kernel, ctx.proc, buf + done, &mut chunk[..n])?;
            ctx.kernel.console.putbuf(&chunk[..n]);
            done += n;
        }
        return Ok(len as u32);
    }

    let file = ctx.proc.fds().lock().get(fd)?;
    let mut total = 0;
    while total < len {
        let want = (len - total).min(PAGE_SIZE);
        usermem::copy_from_user(ctx.kernel, ctx.proc, buf + total, &mut chunk[..want])?;
        let n = {
            let _fs = ctx.kernel.filesys.lock();
            file.write(&chunk[..want])
        };
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total as u32)
}

pub(super) fn sys_seek(ctx: &SyscallCtx<'_>, fd: u32, pos: usize) -> Result<u32, Termination> {
    let file = ctx.proc.fds().lock().get(fd)?;
    let _fs = ctx.kernel.filesys.lock();
    file.seek(pos);
    Ok(0)
}

pub(super) fn sys_tell(ctx: &SyscallCtx<'_>, fd: u32) -> Result<u32, Termination> {
    let file = ctx.proc.fds().lock().get(fd)?;
    let _fs = ctx.kernel.filesys.lock();
    Ok(file.tell() as u32)
}

pub(super) fn sys_close(ctx: &SyscallCtx<'_>, fd: u32) -> Result<u32, Termination> {
    ctx.proc.fds().lock().remove(fd)?;
    Ok(0)
}

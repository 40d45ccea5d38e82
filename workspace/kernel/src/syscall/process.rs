//! Process-control syscall handlers.

use crate::process::{self, Pid};
use crate::memory::usermem;

use super::{gate::SyscallCtx, Termination};

pub(super) fn sys_halt(ctx: &SyscallCtx<'_>) -> Result<u32, Termination> {
    log::info!("halt requested by pid {}", ctx.proc.pid());
    ctx.kernel.request_shutdown();
    // The machine stops; the calling program never resumes.
    Err(Termination::exit(0))
}

pub(super) fn sys_exit(_ctx: &SyscallCtx<'_>, status: i32) -> Result<u32, Termination> {
    Err(Termination::exit(status))
}

pub(super) fn sys_exec(ctx: &SyscallCtx<'_>, cmd_ptr: usize) -> Result<u32, Termination> {
    let (_pins, name) = usermem::pin_cstr(ctx.kernel, ctx.proc, cmd_ptr, ctx.esp)?;
    match process::execute(ctx.kernel, &name) {
        Some(pid) => Ok(pid.as_raw()),
        None => {
            log::debug!("exec {:?}: no such program", name);
            Ok(-1i32 as u32)
        }
    }
}

pub(super) fn sys_wait(ctx: &SyscallCtx<'_>, pid: u32) -> Result<u32, Termination> {
    Ok(ctx.kernel.processes.wait(Pid(pid)) as u32)
}

//! Syscall decode and dispatch.

use alloc::sync::Arc;

use zerocopy::{byteorder::little_endian, FromBytes};

use silica_abi::{number::Syscall, MAX_ARGS, WORD_SIZE};

use crate::{
    memory::usermem::{self, Access},
    process::Process,
    Kernel,
};

use super::{fs, mmap, process as process_calls, Termination, TrapFrame};

/// Everything a handler needs: the kernel context, the calling process and
/// its stack pointer at trap time (for stack-growth decisions).
pub(super) struct SyscallCtx<'a> {
    pub kernel: &'a Kernel,
    pub proc: &'a Arc<Process>,
    pub esp: usize,
}

/// Decode the trap and run the handler.
pub(super) fn dispatch(
    kernel: &Kernel,
    proc: &Arc<Process>,
    frame: &TrapFrame,
) -> Result<u32, Termination> {
    let esp = frame.esp;

    let nr = read_user_word(kernel, proc, esp, esp)?;
    let Ok(call) = Syscall::try_from(nr) else {
        log::warn!("unknown syscall {nr} (pid {})", proc.pid());
        return Err(Termination::FAULT);
    };

    let mut args = [0u32; MAX_ARGS];
    for (i, slot) in args.iter_mut().enumerate().take(call.arg_count()) {
        *slot = read_user_word(kernel, proc, esp + (i + 1) * WORD_SIZE, esp)?;
    }
    log::trace!("pid {}: {:?}{:?}", proc.pid(), call, &args[..call.arg_count()]);

    let ctx = SyscallCtx { kernel, proc, esp };
    match call {
        Syscall::Halt => process_calls::sys_halt(&ctx),
        Syscall::Exit => process_calls::sys_exit(&ctx, args[0] as i32),
        Syscall::Exec => process_calls::sys_exec(&ctx, args[0] as usize),
        Syscall::Wait => process_calls::sys_wait(&ctx, args[0]),
        Syscall::Create => fs::sys_create(&ctx, args[0] as usize, args[1] as usize),
        Syscall::Remove => fs::sys_remove(&ctx, args[0] as usize),
        Syscall::Open => fs::sys_open(&ctx, args[0] as usize),
        Syscall::Filesize => fs::sys_filesize(&ctx, args[0]),
        Syscall::Read => fs::sys_read(&ctx, args[0], args[1] as usize, args[2] as usize),
        Syscall::Write => fs::sys_write(&ctx, args[0], args[1] as usize, args[2] as usize),
        Syscall::Seek => fs::sys_seek(&ctx, args[0], args[1] as usize),
        Syscall::Tell => fs::sys_tell(&ctx, args[0]),
        Syscall::Close => fs::sys_close(&ctx, args[0]),
        Syscall::Mmap => mmap::sys_mmap(&ctx, args[0], args[1] as usize),
        Syscall::Munmap => mmap::sys_munmap(&ctx, args[0]),
        Syscall::Chdir
        | Syscall::Mkdir
        | Syscall::Readdir
        | Syscall::Isdir
        | Syscall::Inumber => {
            log::warn!("directory syscall {:?} not supported (pid {})", call, proc.pid());
            Err(Termination::FAULT)
        }
    }
}

/// Read one 32-bit word from the user stack, validating (and pinning, for
/// the duration of the copy) the bytes it occupies.
fn read_user_word(
    kernel: &Kernel,
    proc: &Arc<Process>,
    addr: usize,
    esp: usize,
) -> Result<u32, Termination> {
    let _pins = usermem::pin_range(kernel, proc, addr, WORD_SIZE, esp, Access::Read)?;
    let mut raw = [0u8; WORD_SIZE];
    usermem::copy_from_user(kernel, proc, addr, &mut raw)?;
    Ok(little_endian::U32::read_from_bytes(&raw)
        .expect("word-sized buffer")
        .get())
}

//! Processes: address-space ownership, the process table, and the
//! run-to-completion program model.

mod process;
mod table;
mod user;

pub use process::{Pid, Process};
pub use table::ProcessTable;
pub use user::{Exited, UserEnv};

use alloc::sync::Arc;

use crate::{
    memory::{self, addr::USER_TOP, VirtPage},
    Kernel,
};

/// A user program body. Runs against a [`UserEnv`] that performs its memory
/// accesses and traps.
pub type Program = Arc<dyn Fn(&mut UserEnv<'_>) + Send + Sync>;

/// Create a process and run `name`'s program body to completion.
///
/// The scheduler stand-in: the child executes on the caller's thread and has
/// exited by the time this returns. Returns `None` when no program with that
/// name is registered.
pub fn execute(kernel: &Kernel, name: &str) -> Option<Pid> {
    let program: Program = kernel.program(name)?;
    let proc = kernel.processes.create();
    log::debug!("exec {:?} as pid {}", name, proc.pid());

    // The initial stack page: lazily populated like every other page.
    proc.spt()
        .lock()
        .alloc_zero(VirtPage::containing(USER_TOP - 1), true)
        .expect("fresh address space");

    let mut env = UserEnv::new(kernel, Arc::clone(&proc));
    program(&mut env);

    // A program body that returns without trapping exits cleanly.
    if !proc.is_dead() {
        terminate(kernel, &proc, 0);
    }
    Some(proc.pid())
}

/// Terminate `proc` with `status`: flush and free its address space, close
/// its descriptors, and publish the status for `wait`. Idempotent.
pub fn terminate(kernel: &Kernel, proc: &Arc<Process>, status: i32) {
    if proc.mark_dead() {
        return;
    }
    log::debug!("pid {} exit({})", proc.pid(), status);
    memory::page::teardown(kernel, proc);
    proc.fds().lock().close_all();
    kernel.processes.record_exit(proc.pid(), status);
}

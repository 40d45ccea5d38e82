//! The syscall boundary.
//!
//! A trap delivers a [`TrapFrame`]; the gate decodes the syscall number and
//! arguments off the user stack (validating every word first), dispatches to
//! a typed handler, and either writes the result into the frame's
//! accumulator or terminates the process.
//!
//! Handlers return `Result<u32, Termination>`. `Termination` is the explicit
//! "this process stops now" value: user-induced faults carry status −1, and
//! `exit`/`halt` carry the requested status. It propagates with `?` to
//! [`handle_trap`], which is the single place process teardown runs; by the
//! time it does, every RAII pin set and lock guard acquired in the handler
//! chain has already been dropped.

pub mod error;
mod fs;
mod gate;
mod mmap;
mod process;

pub use error::SyscallError;

use alloc::sync::Arc;

use crate::{process as proc_ctl, process::Process, Kernel};

/// The register state a trap delivers: the user stack pointer and the
/// accumulator the result goes back in.
#[derive(Debug, Clone, Copy)]
pub struct TrapFrame {
    pub esp: usize,
    pub eax: u32,
}

/// What became of the trapping process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapOutcome {
    /// The syscall completed; the value is also in `frame.eax`.
    Return(u32),
    /// The process was terminated with this status.
    Terminated(i32),
}

/// Terminal control value: the process stops with this status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Termination {
    pub status: i32,
}

impl Termination {
    /// A user-induced fault: invalid pointer, bad descriptor, unknown call.
    pub const FAULT: Termination = Termination { status: -1 };

    /// A voluntary exit with the given status.
    pub fn exit(status: i32) -> Termination {
        Termination { status }
    }
}

impl From<SyscallError> for Termination {
    fn from(err: SyscallError) -> Self {
        log::warn!("syscall failed with {}: terminating caller", err.name());
        Termination::FAULT
    }
}

/// Entry point from the trap layer.
pub fn handle_trap(kernel: &Kernel, proc: &Arc<Process>, frame: &mut TrapFrame) -> TrapOutcome {
    match gate::dispatch(kernel, proc, frame) {
        Ok(value) => {
            frame.eax = value;
            TrapOutcome::Return(value)
        }
        Err(termination) => {
            proc_ctl::terminate(kernel, proc, termination.status);
            TrapOutcome::Terminated(termination.status)
        }
    }
}

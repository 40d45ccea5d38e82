//! Silica kernel core.
//!
//! The user-process memory subsystem of a teaching kernel, runnable on a
//! simulated machine:
//! - Demand paging over a supplementary page table
//! - A frame table with clock eviction and pinning
//! - A swap manager on a block device
//! - The syscall boundary that validates and pins user memory
//!
//! Hardware is modelled in software (a fixed user frame pool, a per-process
//! page directory with accessed/dirty bits, and user programs written as
//! Rust closures that trap through [`process::UserEnv`]), so every paging
//! invariant is exercisable on a development host.
//!
//! There are no global singletons: the [`Kernel`] struct owns the frame
//! table, swap manager, filesystem, console and process table, and is passed
//! to every operation that needs them.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod drivers;
pub mod fs;
pub mod memory;
pub mod process;
pub mod sync;
pub mod syscall;

use alloc::{boxed::Box, collections::BTreeMap, string::String, sync::Arc};
use core::sync::atomic::{AtomicBool, Ordering};

use drivers::{block::BlockDevice, console::Console, RamDisk};
use fs::FileSys;
use memory::{swap::SECTORS_PER_PAGE, FrameTable, SwapManager};
use process::{Pid, Process, ProcessTable, Program, UserEnv};
use sync::SpinLock;

/// Sizing knobs for a kernel instance.
#[derive(Debug, Clone, Copy)]
pub struct KernelConfig {
    /// Frames in the user pool.
    pub user_frames: usize,
    /// Page-sized slots on the swap device.
    pub swap_pages: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            user_frames: 64,
            swap_pages: 256,
        }
    }
}

/// The kernel context: every process-wide structure, initialised together
/// at construction and shared by reference everywhere.
pub struct Kernel {
    pub frames: FrameTable,
    pub swap: SwapManager,
    /// The single global filesystem lock; holding the guard *is* holding
    /// the lock.
    pub filesys: SpinLock<FileSys>,
    pub console: Console,
    pub processes: ProcessTable,
    programs: SpinLock<BTreeMap<String, Program>>,
    shutdown: AtomicBool,
}

impl Kernel {
    /// Build a kernel with a RAM-backed swap device sized per `config`.
    pub fn new(config: KernelConfig) -> Self {
        let disk = RamDisk::new((config.swap_pages * SECTORS_PER_PAGE) as u64);
        Self::with_swap_device(config, Box::new(disk))
    }

    /// Build a kernel over a caller-provided swap device.
    pub fn with_swap_device(
        config: KernelConfig,
        swap_device: Box<dyn BlockDevice + Send + Sync>,
    ) -> Self {
        log::info!(
            "kernel: {} user frames, {} swap sectors",
            config.user_frames,
            swap_device.sector_count()
        );
        Kernel {
            frames: FrameTable::new(config.user_frames),
            swap: SwapManager::new(swap_device),
            filesys: SpinLock::named("filesys", FileSys::new()),
            console: Console::new(),
            processes: ProcessTable::new(),
            programs: SpinLock::new(BTreeMap::new()),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Register a program body under `name`, making it reachable by `exec`
    /// and [`Kernel::run`].
    pub fn register_program(
        &self,
        name: &str,
        body: impl Fn(&mut UserEnv<'_>) + Send + Sync + 'static,
    ) {
        self.programs
            .lock()
            .insert(String::from(name), Arc::new(body));
    }

    pub(crate) fn program(&self, name: &str) -> Option<Program> {
        self.programs.lock().get(name).cloned()
    }

    /// Create a process running `name` and drive it to completion.
    pub fn run(&self, name: &str) -> Option<Pid> {
        process::execute(self, name)
    }

    /// Collect a process's exit status (−1 if unknown or already collected).
    pub fn wait(&self, pid: Pid) -> i32 {
        self.processes.wait(pid)
    }

    /// Look up a process, zombies included.
    pub fn find_process(&self, pid: Pid) -> Option<Arc<Process>> {
        self.processes.get(pid)
    }

    pub(crate) fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Whether `halt` has been invoked.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

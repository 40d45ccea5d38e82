//! The process table.
//!
//! Keeps every process from creation until its exit status is collected.
//! A slot with a recorded status is a zombie: the `Process` stays reachable
//! (its teardown already ran) so diagnostics and the parent can still look
//! at it; `wait` consumes the status and drops the slot.

use alloc::{collections::BTreeMap, sync::Arc};
use core::sync::atomic::{AtomicU32, Ordering};

use super::{Pid, Process};
use crate::sync::SpinLock;

struct Slot {
    proc: Arc<Process>,
    status: Option<i32>,
}

pub struct ProcessTable {
    slots: SpinLock<BTreeMap<Pid, Slot>>,
    next_pid: AtomicU32,
}

impl ProcessTable {
    pub fn new() -> Self {
        ProcessTable {
            slots: SpinLock::new(BTreeMap::new()),
            next_pid: AtomicU32::new(1),
        }
    }

    pub(crate) fn create(&self) -> Arc<Process> {
        let pid = Pid(self.next_pid.fetch_add(1, Ordering::Relaxed));
        let proc = Arc::new(Process::new(pid));
        self.slots.lock().insert(
            pid,
            Slot {
                proc: Arc::clone(&proc),
                status: None,
            },
        );
        proc
    }

    pub(crate) fn record_exit(&self, pid: Pid, status: i32) {
        if let Some(slot) = self.slots.lock().get_mut(&pid) {
            slot.status = Some(status);
        }
    }

    /// Collect an exit status. Each pid can be waited on at most once;
    /// unknown, already-collected or still-running pids yield −1.
    pub fn wait(&self, pid: Pid) -> i32 {
        let mut slots = self.slots.lock();
        let exited = matches!(slots.get(&pid), Some(slot) if slot.status.is_some());
        if !exited {
            return -1;
        }
        let slot = slots.remove(&pid).expect("checked above");
        slot.status.expect("checked above")
    }

    /// Look a process up, zombies included.
    pub fn get(&self, pid: Pid) -> Option<Arc<Process>> {
        self.slots.lock().get(&pid).map(|slot| Arc::clone(&slot.proc))
    }

    /// Number of table slots (running + zombie), for diagnostics.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

//! File descriptor table (per-process).
//!
//! Maps small integers to open files. Descriptors 0 and 1 are the console
//! and never appear in the table; real files start at [`FD_BASE`].

use alloc::{sync::Arc, vec::Vec};

use super::OpenFile;
use crate::syscall::SyscallError;

/// First descriptor handed out for regular files.
pub const FD_BASE: u32 = 2;

/// Per-process file descriptor table.
pub struct FdTable {
    // Index 0 corresponds to descriptor FD_BASE.
    fds: Vec<Option<Arc<OpenFile>>>,
}

impl FdTable {
    pub fn new() -> Self {
        FdTable { fds: Vec::new() }
    }

    fn slot(fd: u32) -> Result<usize, SyscallError> {
        fd.checked_sub(FD_BASE)
            .map(|i| i as usize)
            .ok_or(SyscallError::BadHandle)
    }

    /// Insert an open file at the lowest free descriptor.
    pub fn insert(&mut self, file: Arc<OpenFile>) -> u32 {
        for (i, entry) in self.fds.iter_mut().enumerate() {
            if entry.is_none() {
                *entry = Some(file);
                return FD_BASE + i as u32;
            }
        }
        self.fds.push(Some(file));
        FD_BASE + (self.fds.len() - 1) as u32
    }

    /// Get the open file behind `fd`.
    pub fn get(&self, fd: u32) -> Result<Arc<OpenFile>, SyscallError> {
        let slot = Self::slot(fd)?;
        self.fds
            .get(slot)
            .and_then(|entry| entry.clone())
            .ok_or(SyscallError::BadHandle)
    }

    /// Remove `fd`, returning the file it referenced.
    pub fn remove(&mut self, fd: u32) -> Result<Arc<OpenFile>, SyscallError> {
        let slot = Self::slot(fd)?;
        self.fds
            .get_mut(slot)
            .and_then(|entry| entry.take())
            .ok_or(SyscallError::BadHandle)
    }

    /// Drop every descriptor (process exit).
    pub fn close_all(&mut self) {
        self.fds.clear();
    }

    /// Number of live descriptors, for diagnostics.
    pub fn open_count(&self) -> usize {
        self.fds.iter().filter(|entry| entry.is_some()).count()
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;

    use super::*;
    use crate::fs::FileSys;

    fn open_one(fs: &mut FileSys, name: &str) -> Arc<OpenFile> {
        fs.create(name, 4);
        Arc::new(fs.open(name).unwrap())
    }

    #[test]
    fn lowest_free_descriptor_first() {
        let mut fs = FileSys::new();
        let mut table = FdTable::new();
        let a = table.insert(open_one(&mut fs, "a"));
        let b = table.insert(open_one(&mut fs, "b"));
        assert_eq!((a, b), (FD_BASE, FD_BASE + 1));

        table.remove(a).unwrap();
        let c = table.insert(open_one(&mut fs, "c"));
        assert_eq!(c, FD_BASE);
    }

    #[test]
    fn console_descriptors_are_never_files() {
        let table = FdTable::new();
        assert!(table.get(0).is_err());
        assert!(table.get(1).is_err());
    }

    #[test]
    fn remove_then_get_fails() {
        let mut fs = FileSys::new();
        let mut table = FdTable::new();
        let fd = table.insert(open_one(&mut fs, "a"));
        assert!(table.get(fd).is_ok());
        table.remove(fd).unwrap();
        assert!(table.get(fd).is_err());
        assert!(table.remove(fd).is_err());
    }
}

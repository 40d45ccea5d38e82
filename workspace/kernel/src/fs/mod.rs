//! In-kernel flat filesystem.
//!
//! ## Design
//!
//! The namespace is a single `BTreeMap<String, Arc<Inode>>`; there are no
//! directories. Files are created at a fixed size and never grow: reads and
//! writes clamp at end-of-file. Removing a name unlinks it immediately, but
//! the inode stays alive for as long as any [`OpenFile`] still references it.
//!
//! All namespace operations go through the kernel's single filesystem lock
//! (`Kernel::filesys`); callers hold that lock only around the narrow span
//! that touches the filesystem, per the syscall-layer locking discipline.
//! File *contents* additionally sit behind a per-inode spinlock so that the
//! eviction write-back path is memory-safe regardless of the caller.

use alloc::{collections::BTreeMap, string::String, sync::Arc, vec};

mod fd;
mod file;

pub use fd::{FdTable, FD_BASE};
pub use file::{Inode, OpenFile};

/// The filesystem namespace. Lives behind the kernel's filesystem lock.
pub struct FileSys {
    files: BTreeMap<String, Arc<Inode>>,
}

impl FileSys {
    pub fn new() -> Self {
        FileSys {
            files: BTreeMap::new(),
        }
    }

    /// Create `name` with `initial_size` zero bytes.
    ///
    /// Returns false if the name is already taken.
    pub fn create(&mut self, name: &str, initial_size: usize) -> bool {
        if name.is_empty() || self.files.contains_key(name) {
            return false;
        }
        let inode = Arc::new(Inode::with_contents(vec![0u8; initial_size]));
        self.files.insert(String::from(name), inode);
        log::debug!("filesys: created {:?} ({} bytes)", name, initial_size);
        true
    }

    /// Unlink `name`. Open handles keep the contents reachable.
    pub fn remove(&mut self, name: &str) -> bool {
        self.files.remove(name).is_some()
    }

    /// Open `name`, yielding a handle with its own seek position.
    pub fn open(&self, name: &str) -> Option<OpenFile> {
        let inode = self.files.get(name)?;
        Some(OpenFile::new(Arc::clone(inode)))
    }

    /// Number of linked files, for diagnostics.
    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

impl Default for FileSys {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_open() {
        let mut fs = FileSys::new();
        assert!(fs.create("a.txt", 16));
        assert!(!fs.create("a.txt", 16));
        let file = fs.open("a.txt").expect("open");
        assert_eq!(file.len(), 16);
        assert!(fs.open("b.txt").is_none());
    }

    #[test]
    fn files_never_grow() {
        let mut fs = FileSys::new();
        fs.create("fixed", 4);
        let file = fs.open("fixed").unwrap();
        assert_eq!(file.write(b"123456"), 4);
        assert_eq!(file.len(), 4);
        let mut buf = [0u8; 8];
        file.seek(0);
        assert_eq!(file.read(&mut buf), 4);
        assert_eq!(&buf[..4], b"1234");
    }

    #[test]
    fn remove_keeps_open_handles_alive() {
        let mut fs = FileSys::new();
        fs.create("gone", 8);
        let file = fs.open("gone").unwrap();
        file.write(b"payload!");
        assert!(fs.remove("gone"));
        assert!(!fs.remove("gone"));
        assert!(fs.open("gone").is_none());

        // The unlinked contents are still readable through the handle.
        let mut buf = [0u8; 8];
        assert_eq!(file.read_at(0, &mut buf), 8);
        assert_eq!(&buf, b"payload!");
    }

    #[test]
    fn independent_offsets_per_open() {
        let mut fs = FileSys::new();
        fs.create("shared", 8);
        let a = fs.open("shared").unwrap();
        let b = fs.open("shared").unwrap();
        a.write(b"AAAA");
        assert_eq!(a.tell(), 4);
        assert_eq!(b.tell(), 0);
        let mut buf = [0u8; 4];
        assert_eq!(b.read(&mut buf), 4);
        assert_eq!(&buf, b"AAAA");
    }
}

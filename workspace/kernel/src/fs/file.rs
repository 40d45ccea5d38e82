//! Open file state.

use alloc::{sync::Arc, vec::Vec};

use crate::sync::SpinLock;

/// File contents. Fixed-size byte storage shared by every open of the file.
pub struct Inode {
    data: SpinLock<Vec<u8>>,
}

impl Inode {
    pub fn with_contents(data: Vec<u8>) -> Self {
        Inode {
            data: SpinLock::new(data),
        }
    }

    fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// Copy bytes out of the file starting at `offset`. Returns the number
    /// of bytes copied, clamped at end-of-file.
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let data = self.data.lock();
        if offset >= data.len() {
            return 0;
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        n
    }

    /// Copy bytes into the file starting at `offset`. Returns the number of
    /// bytes written, clamped at end-of-file (files never grow).
    fn write_at(&self, offset: usize, buf: &[u8]) -> usize {
        let mut data = self.data.lock();
        if offset >= data.len() {
            return 0;
        }
        let n = buf.len().min(data.len() - offset);
        data[offset..offset + n].copy_from_slice(&buf[..n]);
        n
    }
}

/// An open file handle: a shared inode plus a private seek position.
///
/// `reopen` produces an independent handle on the same inode, which is how
/// mmap keeps a mapping readable after the user closes the original
/// descriptor.
pub struct OpenFile {
    inode: Arc<Inode>,
    pos: SpinLock<usize>,
}

impl OpenFile {
    pub(super) fn new(inode: Arc<Inode>) -> Self {
        OpenFile {
            inode,
            pos: SpinLock::new(0),
        }
    }

    /// A fresh handle on the same contents with its own position at 0.
    pub fn reopen(&self) -> OpenFile {
        OpenFile::new(Arc::clone(&self.inode))
    }

    pub fn len(&self) -> usize {
        self.inode.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read at the current position, advancing it.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let mut pos = self.pos.lock();
        let n = self.inode.read_at(*pos, buf);
        *pos += n;
        n
    }

    /// Write at the current position, advancing it.
    pub fn write(&self, buf: &[u8]) -> usize {
        let mut pos = self.pos.lock();
        let n = self.inode.write_at(*pos, buf);
        *pos += n;
        n
    }

    /// Positioned read; does not move the seek position.
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        self.inode.read_at(offset, buf)
    }

    /// Positioned write; does not move the seek position.
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> usize {
        self.inode.write_at(offset, buf)
    }

    pub fn seek(&self, pos: usize) {
        *self.pos.lock() = pos;
    }

    pub fn tell(&self) -> usize {
        *self.pos.lock()
    }
}

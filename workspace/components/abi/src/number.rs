//! Silica syscall numbers.
//!
//! The numbering and per-call argument counts are fixed ABI: changing either
//! breaks every compiled user program.

use num_enum::TryFromPrimitive;

/// Maximum number of argument words any syscall takes.
pub const MAX_ARGS: usize = 3;

/// Argument word count for each syscall number, indexed by id.
///
/// Covers the directory calls (`CHDIR`..`INUMBER`) as well even though the
/// kernel terminates processes that invoke them; the decoder still needs to
/// know how many words the caller pushed.
pub const ARG_COUNT: [u8; 20] = [0, 1, 1, 1, 2, 1, 1, 1, 3, 3, 2, 1, 1, 2, 1, 1, 1, 2, 1, 1];

/// Syscall identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum Syscall {
    /// Shut the machine down.
    Halt = 0,
    /// Terminate the calling process with a status code.
    Exit = 1,
    /// Run a registered program; returns its pid or -1.
    Exec = 2,
    /// Collect a child's exit status.
    Wait = 3,
    /// Create a file with a fixed initial size.
    Create = 4,
    /// Remove a file by name.
    Remove = 5,
    /// Open a file; returns a descriptor or -1.
    Open = 6,
    /// Size in bytes of an open file.
    Filesize = 7,
    /// Read from a descriptor into a user buffer.
    Read = 8,
    /// Write a user buffer to a descriptor.
    Write = 9,
    /// Set the read/write position of an open file.
    Seek = 10,
    /// Report the read/write position of an open file.
    Tell = 11,
    /// Close a descriptor.
    Close = 12,
    /// Map an open file into user memory; returns a mapping id.
    Mmap = 13,
    /// Tear down a mapping by id.
    Munmap = 14,

    // Directory calls, declared for ABI completeness. Silica's flat
    // filesystem does not implement them; invoking one terminates the
    // caller.
    Chdir = 15,
    Mkdir = 16,
    Readdir = 17,
    Isdir = 18,
    Inumber = 19,
}

impl Syscall {
    /// Number of argument words this call reads off the user stack.
    #[inline]
    pub fn arg_count(self) -> usize {
        ARG_COUNT[self as usize] as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arg_count_matches_table() {
        assert_eq!(Syscall::Halt.arg_count(), 0);
        assert_eq!(Syscall::Read.arg_count(), 3);
        assert_eq!(Syscall::Write.arg_count(), 3);
        assert_eq!(Syscall::Mmap.arg_count(), 2);
        assert_eq!(Syscall::Seek.arg_count(), 2);
    }

    #[test]
    fn unknown_numbers_are_rejected() {
        assert!(Syscall::try_from(20u32).is_err());
        assert!(Syscall::try_from(u32::MAX).is_err());
        assert_eq!(Syscall::try_from(14u32).unwrap(), Syscall::Munmap);
    }
}

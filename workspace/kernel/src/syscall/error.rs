//! Kernel-internal error codes for the syscall layer.
//!
//! Errno-style negative values. These never reach user space directly: the
//! user-visible contract is in-band (−1 return values, `MAP_FAILED`) or
//! termination. The kernel layers underneath the handlers report failures
//! with them.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::drivers::block::BlockError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive, thiserror::Error)]
#[must_use]
#[repr(i32)]
pub enum SyscallError {
    #[error("No such file or directory")]
    NotFound = -2,
    #[error("Input/output error")]
    IoError = -5,
    #[error("Bad file descriptor")]
    BadHandle = -9,
    #[error("Cannot allocate memory")]
    OutOfMemory = -12,
    #[error("Bad address")]
    Fault = -14,
    #[error("File exists")]
    AlreadyExists = -17,
    #[error("Invalid argument")]
    InvalidArgument = -22,
    #[error("No space left on device")]
    NoSpace = -28,
    #[error("Function not implemented")]
    NotImplemented = -38,
}

impl SyscallError {
    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            SyscallError::NotFound => "ENOENT",
            SyscallError::IoError => "EIO",
            SyscallError::BadHandle => "EBADF",
            SyscallError::OutOfMemory => "ENOMEM",
            SyscallError::Fault => "EFAULT",
            SyscallError::AlreadyExists => "EEXIST",
            SyscallError::InvalidArgument => "EINVAL",
            SyscallError::NoSpace => "ENOSPC",
            SyscallError::NotImplemented => "ENOSYS",
        }
    }
}

impl From<BlockError> for SyscallError {
    fn from(err: BlockError) -> Self {
        match err {
            BlockError::IoError => SyscallError::IoError,
            BlockError::InvalidSector => SyscallError::InvalidArgument,
            BlockError::BadBuffer => SyscallError::InvalidArgument,
        }
    }
}

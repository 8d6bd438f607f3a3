// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Error types for I/O multiplexing.
//!
//! Every failure a multiplex call can surface maps onto one [`KError`]
//! variant, and every variant maps onto the Linux errno a syscall layer would
//! hand back to user space.
#![cfg_attr(not(test), no_std)]

use linux_raw_sys::errno::{EBADF, EFAULT, EINTR, EINVAL, ENOMEM};

/// Possible errors of a multiplex call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KError {
    /// Negative or over-limit descriptor count, malformed interest mask or
    /// malformed timeout.
    InvalidInput,
    /// An entry names a handle the caller does not own.
    BadFileDescriptor,
    /// A registration record, chunk or bitmap could not be allocated.
    NoMemory,
    /// A cancellation arrived while waiting. The caller may retry.
    Interrupted,
    /// Copying results back to caller-owned memory failed. The engine
    /// works on borrowed slices and never returns this; it is reserved for
    /// the syscall layer that copies from and to user memory.
    BadAddress,
}

impl KError {
    /// Returns the positive Linux errno for this error.
    pub const fn as_errno(self) -> i32 {
        (match self {
            KError::InvalidInput => EINVAL,
            KError::BadFileDescriptor => EBADF,
            KError::NoMemory => ENOMEM,
            KError::Interrupted => EINTR,
            KError::BadAddress => EFAULT,
        }) as i32
    }

    /// Whether retrying the same call may succeed.
    pub const fn is_recoverable(self) -> bool {
        matches!(self, KError::Interrupted)
    }
}

impl core::fmt::Display for KError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            KError::InvalidInput => write!(f, "invalid argument"),
            KError::BadFileDescriptor => write!(f, "bad file descriptor"),
            KError::NoMemory => write!(f, "out of memory"),
            KError::Interrupted => write!(f, "interrupted while waiting"),
            KError::BadAddress => write!(f, "bad address"),
        }
    }
}

impl core::error::Error for KError {}

/// Convenience type alias for Result with KError.
pub type KResult<T = ()> = core::result::Result<T, KError>;

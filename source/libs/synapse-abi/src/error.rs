// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy carried in negative syscall return words.

/// Errors returned by kernel primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum SysError {
    /// Handle does not name a live environment, or the caller may not modify it.
    #[error("bad environment")]
    BadEnv,
    /// Malformed address, permission set or status value.
    #[error("invalid parameter")]
    Inval,
    /// Physical page or page-table page exhausted.
    #[error("out of memory")]
    NoMem,
    /// Environment table exhausted.
    #[error("out of environments")]
    NoFreeEnv,
    /// Target is not blocked in a matching receive.
    #[error("env is not recving")]
    IpcNotRecv,
}

impl SysError {
    /// Negative return word for this error.
    pub const fn code(self) -> isize {
        match self {
            Self::BadEnv => -2,
            Self::Inval => -3,
            Self::NoMem => -4,
            Self::NoFreeEnv => -5,
            Self::IpcNotRecv => -7,
        }
    }

    /// Decodes a negative return word.
    pub const fn from_code(code: isize) -> Option<Self> {
        match code {
            -2 => Some(Self::BadEnv),
            -3 => Some(Self::Inval),
            -4 => Some(Self::NoMem),
            -5 => Some(Self::NoFreeEnv),
            -7 => Some(Self::IpcNotRecv),
            _ => None,
        }
    }
}

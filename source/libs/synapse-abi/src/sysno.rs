// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Stable syscall numbers.
//!
//! Arguments travel in up to five machine words; the return value is one signed word.

/// Syscall selector.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sysno {
    /// `cputs(va, len)`: print a user string on the kernel console.
    Cputs = 0,
    /// `getenvid()`: handle of the caller.
    Getenvid = 1,
    /// `env_destroy(target)`.
    EnvDestroy = 2,
    /// `page_alloc(target, va, perm)`.
    PageAlloc = 3,
    /// `page_map(src, src_va, dst, dst_va, perm)`.
    PageMap = 4,
    /// `page_unmap(target, va)`.
    PageUnmap = 5,
    /// `exofork()`: returns the child handle to the parent and 0 to the child.
    Exofork = 6,
    /// `env_set_status(target, status)`.
    EnvSetStatus = 7,
    /// `env_set_pgfault_upcall(target, entry)`.
    EnvSetPgfaultUpcall = 8,
    /// `yield()`.
    Yield = 9,
    /// `ipc_try_send(target, value, src_va, perm)`.
    IpcTrySend = 10,
    /// `ipc_recv(dst_va)`: wait for a message from anyone.
    IpcRecv = 11,
    /// `ipc_recv_from(from, dst_va)`: wait for a message from one sender.
    IpcRecvFrom = 12,
}

impl Sysno {
    /// Number of defined syscalls.
    pub const COUNT: usize = 13;

    /// Decodes a raw syscall number.
    pub const fn from_raw(raw: usize) -> Option<Self> {
        Some(match raw {
            0 => Self::Cputs,
            1 => Self::Getenvid,
            2 => Self::EnvDestroy,
            3 => Self::PageAlloc,
            4 => Self::PageMap,
            5 => Self::PageUnmap,
            6 => Self::Exofork,
            7 => Self::EnvSetStatus,
            8 => Self::EnvSetPgfaultUpcall,
            9 => Self::Yield,
            10 => Self::IpcTrySend,
            11 => Self::IpcRecv,
            12 => Self::IpcRecvFrom,
            _ => return None,
        })
    }

    /// Raw number placed in the syscall register.
    #[inline]
    pub const fn raw(self) -> usize {
        self as usize
    }
}

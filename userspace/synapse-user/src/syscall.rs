// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Syscall stubs. A target of `None` names the calling environment (raw handle 0).

use synapse::Completion;
use synapse_abi::{decode_return, layout::UTOP, EnvId, EnvStatus, Perm, SysError, Sysno};

use crate::{Process, Result, UserError};

fn target(id: Option<EnvId>) -> usize {
    id.map_or(0, EnvId::raw)
}

impl Process {
    fn syscall(&self, number: Sysno, args: [usize; 5]) -> Completion {
        self.kernel.syscall(self.id, number.raw(), args)
    }

    fn call(&self, number: Sysno, args: [usize; 5]) -> Result<usize> {
        match self.syscall(number, args) {
            Completion::Return(word) => Ok(decode_return(word)?),
            Completion::Blocked => Err(UserError::Blocked),
            Completion::Exited => Err(UserError::Exited),
        }
    }

    /// Prints `len` bytes at `va` on the kernel console.
    pub fn sys_cputs(&self, va: usize, len: usize) -> Result<()> {
        self.call(Sysno::Cputs, [va, len, 0, 0, 0]).map(drop)
    }

    /// Handle of the calling environment.
    pub fn sys_getenvid(&self) -> Result<EnvId> {
        let raw = self.call(Sysno::Getenvid, [0; 5])?;
        EnvId::from_raw(raw).ok_or(UserError::Sys(SysError::BadEnv))
    }

    /// Destroys `env`. Destroying oneself succeeds without returning to the caller.
    pub fn sys_env_destroy(&self, env: Option<EnvId>) -> Result<()> {
        match self.call(Sysno::EnvDestroy, [target(env), 0, 0, 0, 0]) {
            Ok(_) | Err(UserError::Exited) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Maps a fresh zeroed page at `va` in `env`.
    pub fn sys_page_alloc(&self, env: Option<EnvId>, va: usize, perm: Perm) -> Result<()> {
        self.call(Sysno::PageAlloc, [target(env), va, perm.raw(), 0, 0]).map(drop)
    }

    /// Maps the page at `src_va` in `src` at `dst_va` in `dst`.
    pub fn sys_page_map(
        &self,
        src: Option<EnvId>,
        src_va: usize,
        dst: Option<EnvId>,
        dst_va: usize,
        perm: Perm,
    ) -> Result<()> {
        let args = [target(src), src_va, target(dst), dst_va, perm.raw()];
        self.call(Sysno::PageMap, args).map(drop)
    }

    /// Unmaps `va` in `env`.
    pub fn sys_page_unmap(&self, env: Option<EnvId>, va: usize) -> Result<()> {
        self.call(Sysno::PageUnmap, [target(env), va, 0, 0, 0]).map(drop)
    }

    /// Creates a blank child that will resume where the caller is now.
    pub fn sys_exofork(&self) -> Result<EnvId> {
        let raw = self.call(Sysno::Exofork, [0; 5])?;
        EnvId::from_raw(raw).ok_or(UserError::Sys(SysError::Inval))
    }

    /// Sets the scheduling status of `env`.
    pub fn sys_env_set_status(&self, env: Option<EnvId>, status: EnvStatus) -> Result<()> {
        self.call(Sysno::EnvSetStatus, [target(env), status.raw(), 0, 0, 0]).map(drop)
    }

    /// Registers the page-fault upcall entry of `env`.
    pub fn sys_env_set_pgfault_upcall(&self, env: Option<EnvId>, entry: usize) -> Result<()> {
        self.call(Sysno::EnvSetPgfaultUpcall, [target(env), entry, 0, 0, 0]).map(drop)
    }

    /// Gives up the processor.
    pub fn sys_yield(&self) -> Result<()> {
        self.call(Sysno::Yield, [0; 5]).map(drop)
    }

    /// Attempts a single delivery to `to`, optionally sharing the page at `page.0`.
    pub fn sys_ipc_try_send(&self, to: EnvId, value: usize, page: Option<(usize, Perm)>) -> Result<()> {
        let (src_va, perm) = page.map_or((UTOP, 0), |(va, perm)| (va, perm.raw()));
        self.call(Sysno::IpcTrySend, [to.raw(), value, src_va, perm, 0]).map(drop)
    }

    /// Starts a receive from any sender. `Ok` means the caller is now blocked.
    pub fn sys_ipc_recv(&self, dst_va: Option<usize>) -> Result<()> {
        self.begin_recv(Sysno::IpcRecv, [dst_va.unwrap_or(UTOP), 0, 0, 0, 0])
    }

    /// Starts a receive that only `from` may complete (`None` accepts anyone).
    pub fn sys_ipc_recv_from(&self, from: Option<EnvId>, dst_va: Option<usize>) -> Result<()> {
        self.begin_recv(Sysno::IpcRecvFrom, [target(from), dst_va.unwrap_or(UTOP), 0, 0, 0])
    }

    fn begin_recv(&self, number: Sysno, args: [usize; 5]) -> Result<()> {
        match self.syscall(number, args) {
            Completion::Blocked => Ok(()),
            Completion::Return(word) => {
                decode_return(word)?;
                // A receive only comes back through the sender writing our frame.
                Err(UserError::Sys(SysError::Inval))
            }
            Completion::Exited => Err(UserError::Exited),
        }
    }
}

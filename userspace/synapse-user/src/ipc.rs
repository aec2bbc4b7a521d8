// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! IPC wrappers.
//!
//! A receive suspends the caller; its outcome is written into the saved frame and mailbox by the
//! matching send. [`RecvWait`] is the continuation that reads it back once that has happened.

use std::task::Poll;

use synapse::env::IpcState;
use synapse_abi::{decode_return, EnvId, EnvStatus, Perm, SysError};

use crate::{Process, Result, UserError};

/// A delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    /// Sender.
    pub from: EnvId,
    /// Value word.
    pub value: usize,
    /// Permission of the transferred page, if one arrived.
    pub perm: Option<Perm>,
}

/// A receive in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a receive completes only when polled"]
pub struct RecvWait {
    env: EnvId,
}

impl RecvWait {
    /// Environment blocked in this receive.
    pub fn env(&self) -> EnvId {
        self.env
    }

    /// Returns the message once a sender has completed the receive.
    pub fn poll(&self, process: &Process) -> Result<Poll<Message>> {
        let view = process.kernel.env_view(self.env).ok_or(UserError::Exited)?;
        if view.status == EnvStatus::NotRunnable && view.ipc.state != IpcState::Idle {
            return Ok(Poll::Pending);
        }
        decode_return(view.frame.ret() as isize)?;
        let from = view.ipc.from.ok_or(UserError::Sys(SysError::BadEnv))?;
        Ok(Poll::Ready(Message { from, value: view.ipc.value, perm: view.ipc.perm }))
    }
}

impl Process {
    /// Receives from anyone. A page, if sent, lands at `dst_va`.
    pub fn recv(&self, dst_va: Option<usize>) -> Result<RecvWait> {
        self.sys_ipc_recv(dst_va)?;
        Ok(RecvWait { env: self.id })
    }

    /// Receives only from `from`.
    pub fn recv_from(&self, from: EnvId, dst_va: Option<usize>) -> Result<RecvWait> {
        self.sys_ipc_recv_from(Some(from), dst_va)?;
        Ok(RecvWait { env: self.id })
    }

    /// One delivery attempt. When `to` is not receiving, yields and reports `Pending`.
    ///
    /// Any other failure is a user panic.
    pub fn send(&self, to: EnvId, value: usize, page: Option<(usize, Perm)>) -> Result<Poll<()>> {
        match self.sys_ipc_try_send(to, value, page) {
            Ok(()) => Ok(Poll::Ready(())),
            Err(UserError::Sys(SysError::IpcNotRecv)) => {
                log::trace!(target: "ipc", "[{}] {to} not receiving", self.id);
                self.sys_yield()?;
                Ok(Poll::Pending)
            }
            Err(err) => Err(self.fatal("ipc send", err)),
        }
    }
}

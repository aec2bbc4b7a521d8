// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Synchronous single-slot IPC rendezvous
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: recv(ctx, wait, dst_va), try_send(ctx, target, value, src_va, perm)
//! DEPENDS_ON: env::{EnvTable, Mailbox, IpcState}, mm, sched::Scheduler
//! INVARIANTS: A receive never returns on its own stack: the matching send writes the result
//!             into the receiver's saved frame; delivery clears the wait state so a second send
//!             before the receiver runs fails with IpcNotRecv; a page moves only when both sides
//!             name an address below UTOP

use synapse_abi::{
    layout::{page_aligned, UTOP},
    EnvStatus, Perm, SysError,
};

use crate::env::{IpcState, Mailbox};
use crate::syscall::{api::Context, Error, SysResult};

/// Blocks the caller until a matching [`try_send`].
///
/// `dst_raw` below `UTOP` asks for a page at that address; anything at or above `UTOP` means no
/// page is wanted.
pub(crate) fn recv(ctx: &mut Context<'_>, wait: IpcState, dst_raw: usize) -> SysResult<usize> {
    let dst_va = if dst_raw < UTOP {
        if !page_aligned(dst_raw) {
            return Err(SysError::Inval.into());
        }
        Some(dst_raw)
    } else {
        None
    };
    let env = ctx.envs.get_mut(ctx.caller).ok_or(SysError::BadEnv)?;
    env.ipc = Mailbox { state: wait, dst_va, ..Mailbox::default() };
    env.status = EnvStatus::NotRunnable;
    ctx.scheduler.purge(ctx.caller);
    log::debug!(target: "ipc", "[{}] recv {:?} dst={:?}", ctx.caller, wait, dst_va);
    Err(Error::Reschedule)
}

/// Delivers `value` (and optionally the page at `src_va`) to a waiting `target`.
pub(crate) fn try_send(
    ctx: &mut Context<'_>,
    target: usize,
    value: usize,
    src_va: usize,
    perm: usize,
) -> SysResult<usize> {
    let caller = ctx.caller;
    let target = ctx.envs.resolve(target, caller, false)?;
    let receiver = ctx.envs.get(target).ok_or(SysError::BadEnv)?;
    if !receiver.ipc.state.accepts(caller) {
        log::debug!(target: "ipc", "[{caller}] {target} not receiving ({:?})", receiver.ipc.state);
        return Err(SysError::IpcNotRecv.into());
    }
    let dst_va = receiver.ipc.dst_va;

    let mut page = None;
    if src_va < UTOP {
        if !page_aligned(src_va) {
            return Err(SysError::Inval.into());
        }
        let perm = Perm::checked(perm).ok_or(SysError::Inval)?;
        let pte = ctx
            .envs
            .get(caller)
            .and_then(|env| env.pgdir.lookup(src_va))
            .ok_or(SysError::Inval)?;
        if perm.writable() && !pte.perm.writable() {
            return Err(SysError::Inval.into());
        }
        page = dst_va.map(|dst_va| (pte.frame, dst_va, perm));
    }

    let receiver = ctx.envs.get_mut(target).ok_or(SysError::BadEnv)?;
    if let Some((frame, dst_va, perm)) = page {
        receiver.pgdir.insert(ctx.frames, frame, dst_va, perm)?;
    }
    receiver.ipc = Mailbox {
        state: IpcState::Idle,
        dst_va,
        from: Some(caller),
        value,
        perm: page.map(|(_, _, perm)| perm),
    };
    receiver.frame.set_ret(0);
    receiver.status = EnvStatus::Runnable;
    ctx.scheduler.enqueue(target);
    log::debug!(target: "ipc", "[{caller}] sent {value:#x} to {target}");
    Ok(0)
}

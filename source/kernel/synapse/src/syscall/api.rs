// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Syscall handlers exposed to the dispatcher
//! OWNERS: @kernel-team
//! PUBLIC API: install_handlers(table), Context
//! DEPENDS_ON: env::EnvTable, mm::{FrameAllocator, uaccess}, sched::Scheduler, ipc, console
//! INVARIANTS: Decode→Check→Execute; targets are resolved before any argument is acted upon;
//!             a freshly allocated frame is never leaked when installation fails;
//!             a read-only source is never re-exposed as writable

extern crate alloc;

use alloc::vec;

use synapse_abi::{layout::user_page, EnvId, EnvStatus, Perm, SysError, Sysno};

use super::{Args, Error, SysResult, SyscallTable};
use crate::{
    console::Console,
    env::{EnvTable, IpcState},
    ipc,
    mm::{uaccess, FrameAllocator},
    sched::Scheduler,
};

/// Kernel state a handler may touch, borrowed for the duration of one syscall.
pub struct Context<'a> {
    /// Environment that trapped.
    pub caller: EnvId,
    /// Environment table.
    pub envs: &'a mut EnvTable,
    /// Physical frame pool.
    pub frames: &'a mut FrameAllocator,
    /// Scheduler collaborator.
    pub scheduler: &'a mut dyn Scheduler,
    /// Console sink.
    pub console: &'a mut Console,
}

impl Context<'_> {
    /// Destroys `id`. The caller destroying itself lingers as Dying until trap exit.
    pub(crate) fn destroy(&mut self, id: EnvId) {
        self.scheduler.purge(id);
        self.envs.destroy(self.frames, id, id == self.caller);
    }
}

// Typed decoders for Decode→Check→Execute

#[derive(Copy, Clone)]
struct PageAllocArgsTyped {
    target: usize,
    va: usize,
    perm: usize,
}

impl PageAllocArgsTyped {
    #[inline]
    fn decode(args: &Args) -> Self {
        Self { target: args.get(0), va: args.get(1), perm: args.get(2) }
    }

    #[inline]
    fn check(&self, ctx: &Context<'_>) -> Result<(EnvId, Perm), Error> {
        let target = ctx.envs.resolve(self.target, ctx.caller, true)?;
        if !user_page(self.va) {
            return Err(SysError::Inval.into());
        }
        let perm = Perm::checked(self.perm).ok_or(SysError::Inval)?;
        Ok((target, perm))
    }
}

#[derive(Copy, Clone)]
struct PageMapArgsTyped {
    src: usize,
    src_va: usize,
    dst: usize,
    dst_va: usize,
    perm: usize,
}

struct PageMapChecked {
    dst: EnvId,
    dst_va: usize,
    pte: crate::mm::Pte,
    perm: Perm,
}

impl PageMapArgsTyped {
    #[inline]
    fn decode(args: &Args) -> Self {
        Self {
            src: args.get(0),
            src_va: args.get(1),
            dst: args.get(2),
            dst_va: args.get(3),
            perm: args.get(4),
        }
    }

    #[inline]
    fn check(&self, ctx: &Context<'_>) -> Result<PageMapChecked, Error> {
        let src = ctx.envs.resolve(self.src, ctx.caller, true)?;
        let dst = ctx.envs.resolve(self.dst, ctx.caller, true)?;
        if !user_page(self.src_va) || !user_page(self.dst_va) {
            return Err(SysError::Inval.into());
        }
        let pte = ctx
            .envs
            .get(src)
            .and_then(|env| env.pgdir.lookup(self.src_va))
            .ok_or(SysError::Inval)?;
        let perm = Perm::checked(self.perm).ok_or(SysError::Inval)?;
        if perm.writable() && !pte.perm.writable() {
            log::debug!(
                target: "syscall",
                "[{}] refused writable alias of read-only {:08x} in {src}",
                ctx.caller,
                self.src_va
            );
            return Err(SysError::Inval.into());
        }
        Ok(PageMapChecked { dst, dst_va: self.dst_va, pte, perm })
    }
}

/// Registers every syscall handler.
pub fn install_handlers(table: &mut SyscallTable) {
    table.register(Sysno::Cputs, sys_cputs);
    table.register(Sysno::Getenvid, sys_getenvid);
    table.register(Sysno::EnvDestroy, sys_env_destroy);
    table.register(Sysno::PageAlloc, sys_page_alloc);
    table.register(Sysno::PageMap, sys_page_map);
    table.register(Sysno::PageUnmap, sys_page_unmap);
    table.register(Sysno::Exofork, sys_exofork);
    table.register(Sysno::EnvSetStatus, sys_env_set_status);
    table.register(Sysno::EnvSetPgfaultUpcall, sys_env_set_pgfault_upcall);
    table.register(Sysno::Yield, sys_yield);
    table.register(Sysno::IpcTrySend, sys_ipc_try_send);
    table.register(Sysno::IpcRecv, sys_ipc_recv);
    table.register(Sysno::IpcRecvFrom, sys_ipc_recv_from);
}

fn sys_cputs(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let (va, len) = (args.get(0), args.get(1));
    let env = ctx.envs.get(ctx.caller).ok_or(SysError::BadEnv)?;
    let mut buf = vec![];
    let copied = uaccess::check(&env.pgdir, va, len, uaccess::Access::Read).and_then(|()| {
        buf.resize(len, 0);
        uaccess::copy_in(&env.pgdir, ctx.frames, va, &mut buf)
    });
    if let Err(fault) = copied {
        log::warn!(
            target: "syscall",
            "[{}] user_mem_check assertion failure for va {:08x}",
            ctx.caller,
            fault.va
        );
        ctx.destroy(ctx.caller);
        return Err(Error::Exit);
    }
    ctx.console.write(&buf);
    Ok(0)
}

fn sys_getenvid(ctx: &mut Context<'_>, _args: &Args) -> SysResult<usize> {
    Ok(ctx.caller.raw())
}

fn sys_env_destroy(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let target = ctx.envs.resolve(args.get(0), ctx.caller, true)?;
    if target == ctx.caller {
        log::info!(target: "env", "[{target}] exiting gracefully");
        ctx.destroy(target);
        return Err(Error::Exit);
    }
    log::info!(target: "env", "[{}] destroying {target}", ctx.caller);
    ctx.destroy(target);
    Ok(0)
}

fn sys_page_alloc(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let typed = PageAllocArgsTyped::decode(args);
    let (target, perm) = typed.check(ctx)?;
    let env = ctx.envs.get_mut(target).ok_or(SysError::BadEnv)?;
    let frame = ctx.frames.alloc(true).ok_or(SysError::NoMem)?;
    if let Err(err) = env.pgdir.insert(ctx.frames, frame, typed.va, perm) {
        ctx.frames.release_unused(frame);
        return Err(err.into());
    }
    Ok(0)
}

fn sys_page_map(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let checked = PageMapArgsTyped::decode(args).check(ctx)?;
    let dst = ctx.envs.get_mut(checked.dst).ok_or(SysError::BadEnv)?;
    dst.pgdir.insert(ctx.frames, checked.pte.frame, checked.dst_va, checked.perm)?;
    Ok(0)
}

fn sys_page_unmap(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let target = ctx.envs.resolve(args.get(0), ctx.caller, true)?;
    let va = args.get(1);
    if !user_page(va) {
        return Err(SysError::Inval.into());
    }
    let env = ctx.envs.get_mut(target).ok_or(SysError::BadEnv)?;
    env.pgdir.remove(ctx.frames, va);
    Ok(0)
}

fn sys_exofork(ctx: &mut Context<'_>, _args: &Args) -> SysResult<usize> {
    let frame = ctx.envs.get(ctx.caller).ok_or(SysError::BadEnv)?.frame;
    let child = ctx.envs.alloc(ctx.frames, Some(ctx.caller))?;
    let env = ctx.envs.get_mut(child).ok_or(SysError::BadEnv)?;
    env.frame = frame;
    env.frame.set_ret(0);
    Ok(child.raw())
}

fn sys_env_set_status(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let target = ctx.envs.resolve(args.get(0), ctx.caller, true)?;
    let status = EnvStatus::settable(args.get(1)).ok_or(SysError::Inval)?;
    let env = ctx.envs.get_mut(target).ok_or(SysError::BadEnv)?;
    env.status = status;
    match status {
        EnvStatus::Runnable => ctx.scheduler.enqueue(target),
        _ => ctx.scheduler.purge(target),
    }
    Ok(0)
}

fn sys_env_set_pgfault_upcall(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let target = ctx.envs.resolve(args.get(0), ctx.caller, true)?;
    let env = ctx.envs.get_mut(target).ok_or(SysError::BadEnv)?;
    env.pgfault_upcall = Some(args.get(1));
    Ok(0)
}

fn sys_yield(ctx: &mut Context<'_>, _args: &Args) -> SysResult<usize> {
    if let Some(env) = ctx.envs.get_mut(ctx.caller) {
        env.frame.set_ret(0);
    }
    Err(Error::Reschedule)
}

fn sys_ipc_try_send(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    ipc::try_send(ctx, args.get(0), args.get(1), args.get(2), args.get(3))
}

fn sys_ipc_recv(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    ipc::recv(ctx, IpcState::WaitingAny, args.get(0))
}

fn sys_ipc_recv_from(ctx: &mut Context<'_>, args: &Args) -> SysResult<usize> {
    let wait = match args.get(0) {
        0 => IpcState::WaitingAny,
        raw => IpcState::WaitingFor(raw),
    };
    ipc::recv(ctx, wait, args.get(1))
}

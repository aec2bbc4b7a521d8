// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Saved user register state and user-mode page-fault delivery.

use synapse_abi::{
    layout::{PGSIZE, UXSTACKTOP},
    utrap::NREGS,
    EnvId, UTrapframe,
};
use static_assertions::const_assert;

use crate::env::EnvTable;
use crate::mm::{uaccess, FrameAllocator, PageFault};

// Register slots, in push order.
pub const REG_EDI: usize = 0;
pub const REG_ESI: usize = 1;
pub const REG_EBP: usize = 2;
pub const REG_OESP: usize = 3;
pub const REG_EBX: usize = 4;
pub const REG_EDX: usize = 5;
pub const REG_ECX: usize = 6;
/// Syscall number on entry, return value on exit.
pub const REG_EAX: usize = 7;

// Argument registers a1..a5 of the syscall convention.
const ARG_REGS: [usize; 5] = [REG_EDX, REG_ECX, REG_EBX, REG_EDI, REG_ESI];

/// Scratch word left between nested exception-stack frames.
const NESTED_GAP: usize = core::mem::size_of::<usize>();

// A nested frame plus its gap must fit on the one-page exception stack.
const_assert!(UTrapframe::SIZE + NESTED_GAP <= PGSIZE);
const_assert!(ARG_REGS.len() <= NREGS);

/// Saved register state of a suspended environment.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapFrame {
    /// General registers.
    pub regs: [usize; NREGS],
    /// Program counter to resume at.
    pub pc: usize,
    /// Flags register.
    pub flags: usize,
    /// Stack pointer to resume with.
    pub sp: usize,
}

impl TrapFrame {
    /// Value the environment observes as its syscall result.
    #[inline]
    pub const fn ret(&self) -> usize {
        self.regs[REG_EAX]
    }

    /// Overwrites the syscall result the environment will observe when resumed.
    #[inline]
    pub fn set_ret(&mut self, value: usize) {
        self.regs[REG_EAX] = value;
    }

    /// Records the syscall number and arguments the way the trap entry saves them.
    pub fn save_syscall(&mut self, number: usize, args: &[usize; 5]) {
        self.regs[REG_EAX] = number;
        for (reg, arg) in ARG_REGS.iter().zip(args) {
            self.regs[*reg] = *arg;
        }
    }
}

/// Where a page-fault upcall starts executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upcall {
    /// Registered entry point.
    pub entry: usize,
    /// Address of the [`UTrapframe`] on the exception stack.
    pub utf_va: usize,
}

/// Why a fault could not be reflected to user mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Unhandled {
    /// No upcall registered.
    #[error("no page fault upcall")]
    NoUpcall,
    /// Exception stack missing, read-only or exhausted.
    #[error("exception stack unusable")]
    BadExceptionStack,
    /// Environment is not live.
    #[error("environment gone")]
    Gone,
    /// Environment is live but not Runnable, so it cannot be executing.
    #[error("environment not runnable")]
    Blocked,
}

/// Reflects `fault` to the environment's upcall.
///
/// Pushes a [`UTrapframe`] at the top of the exception stack, or below the current one for a
/// fault raised while already on it, then redirects the saved `pc`/`sp` to the upcall.
pub(crate) fn reflect_page_fault(
    envs: &mut EnvTable,
    frames: &mut FrameAllocator,
    id: EnvId,
    fault: PageFault,
) -> Result<Upcall, Unhandled> {
    let env = envs.get_mut(id).ok_or(Unhandled::Gone)?;
    let entry = env.pgfault_upcall.ok_or(Unhandled::NoUpcall)?;

    let xstack = UXSTACKTOP - PGSIZE..UXSTACKTOP;
    let top = if xstack.contains(&env.frame.sp) { env.frame.sp - NESTED_GAP } else { UXSTACKTOP };
    let utf_va = top
        .checked_sub(UTrapframe::SIZE)
        .filter(|va| *va >= xstack.start)
        .ok_or(Unhandled::BadExceptionStack)?;

    let utf = UTrapframe {
        fault_va: fault.va,
        err: fault.err,
        regs: env.frame.regs,
        pc: env.frame.pc,
        flags: env.frame.flags,
        sp: env.frame.sp,
    };
    uaccess::copy_out(&env.pgdir, frames, utf_va, &utf.to_bytes())
        .map_err(|_| Unhandled::BadExceptionStack)?;
    env.frame.pc = entry;
    env.frame.sp = utf_va;
    Ok(Upcall { entry, utf_va })
}

/// Restores the registers captured in `utf`, as the upcall trampoline does on return.
pub(crate) fn restore_from_upcall(frame: &mut TrapFrame, utf: &UTrapframe) {
    frame.regs = utf.regs;
    frame.pc = utf.pc;
    frame.flags = utf.flags;
    frame.sp = utf.sp;
}

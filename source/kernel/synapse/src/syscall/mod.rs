// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Syscall dispatcher and error handling
//! OWNERS: @kernel-team
//! PUBLIC API: SyscallTable, Args, Error, Handler, SysResult
//! DEPENDS_ON: env, mm, syscall::api, synapse_abi::{Sysno, SysError}
//! INVARIANTS: Unknown numbers fail with Inval; the dispatcher never validates arguments itself;
//!             handlers never switch environments directly (they return Reschedule/Exit)

pub mod api;

use core::fmt;

use synapse_abi::{SysError, Sysno};

use crate::{env::EnvError, mm::MapError};

/// Size of the dispatch window.
const MAX_SYSCALL: usize = 32;

/// Result type used by syscall handlers.
pub type SysResult<T> = Result<T, Error>;

/// Up to five argument words, in ABI order.
#[derive(Default, Clone, Copy)]
pub struct Args {
    regs: [usize; 5],
}

impl Args {
    /// Creates a new argument pack.
    pub const fn new(regs: [usize; 5]) -> Self {
        Self { regs }
    }

    /// Returns argument `index` (0-based).
    pub fn get(&self, index: usize) -> usize {
        self.regs[index]
    }
}

/// Error returned by the dispatcher and handler stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Syscall number not present in the dispatch table.
    InvalidSyscall,
    /// A primitive failed; the code goes back to the caller.
    Sys(SysError),
    /// The caller destroyed itself and must not resume.
    Exit,
    /// The caller gave up the processor. Its return register is either already written (yield)
    /// or will be written by whoever resumes it (receive); trap exit must not touch it.
    Reschedule,
}

impl Error {
    /// Negative return word for errors that go back to the caller.
    pub fn code(self) -> Option<isize> {
        match self {
            Error::InvalidSyscall => Some(SysError::Inval.code()),
            Error::Sys(err) => Some(err.code()),
            Error::Exit | Error::Reschedule => None,
        }
    }
}

impl From<SysError> for Error {
    fn from(value: SysError) -> Self {
        Self::Sys(value)
    }
}

impl From<EnvError> for Error {
    fn from(value: EnvError) -> Self {
        Self::Sys(value.into())
    }
}

impl From<MapError> for Error {
    fn from(value: MapError) -> Self {
        Self::Sys(value.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Sys(err) => write!(f, "{err}"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Type alias for a syscall handler.
pub type Handler = fn(&mut api::Context<'_>, &Args) -> SysResult<usize>;

/// Dispatch table storing handlers by syscall number.
pub struct SyscallTable {
    handlers: [Option<Handler>; MAX_SYSCALL],
}

impl Default for SyscallTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SyscallTable {
    /// Creates an empty dispatch table.
    pub const fn new() -> Self {
        const NONE: Option<Handler> = None;
        Self { handlers: [NONE; MAX_SYSCALL] }
    }

    /// Creates a table with every syscall installed.
    pub fn with_default_handlers() -> Self {
        let mut table = Self::new();
        api::install_handlers(&mut table);
        table
    }

    /// Registers a handler.
    pub fn register(&mut self, number: Sysno, handler: Handler) {
        if let Some(slot) = self.handlers.get_mut(number.raw()) {
            *slot = Some(handler);
        }
    }

    /// Executes the handler referenced by `number`.
    #[must_use]
    pub fn dispatch(
        &self,
        number: usize,
        ctx: &mut api::Context<'_>,
        args: &Args,
    ) -> SysResult<usize> {
        let handler = self.handlers.get(number).and_then(|entry| *entry).ok_or_else(|| {
            log::debug!(target: "syscall", "[{}] unknown syscall {number}", ctx.caller);
            Error::InvalidSyscall
        })?;
        handler(ctx, args)
    }
}

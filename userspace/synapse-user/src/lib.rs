// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: User-space process library built purely on synapse syscalls
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//!
//! PUBLIC API:
//!   - Process: running environment handle (syscall stubs, memory access, fault dispatch)
//!   - fork/sfork/dumbfork/duppage: process duplication on top of exofork + page_map
//!   - cow_fault: copy-on-write page-fault handler
//!   - ipc: send/recv wrappers returning Poll-style continuations
//!   - pipeline: cooperative driver for sfork'd workers
//!
//! DEPENDENCIES:
//!   - synapse: kernel façade the stubs trap into
//!   - synapse-abi: syscall numbers, error codes, layout constants
//!   - parking_lot: per-process user globals
//!
//! INVARIANTS:
//!   - A user panic destroys the calling environment and surfaces as UserError::Panic
//!   - Nothing here reaches kernel state except through syscalls, the MMU and fault delivery

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

mod fork;
pub mod ipc;
mod pgfault;
pub mod pipeline;
mod process;
mod syscall;

pub use ipc::{Message, RecvWait};
pub use pgfault::{cow_fault, PgfaultHandler, PGFAULT_UPCALL};
pub use pipeline::{Pipeline, Worker};
pub use process::Process;

use synapse::Unhandled;
use synapse_abi::{EnvId, SysError};

/// Result type returned by the user library.
pub type Result<T> = core::result::Result<T, UserError>;

/// Errors surfaced to user code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UserError {
    /// A syscall returned an error code.
    #[error("syscall failed: {0}")]
    Sys(#[from] SysError),
    /// The calling environment is blocked and cannot execute.
    #[error("environment is blocked")]
    Blocked,
    /// The calling environment no longer exists.
    #[error("environment has exited")]
    Exited,
    /// The kernel could not deliver a page fault and destroyed the environment.
    #[error("unhandled page fault: {0}")]
    Killed(#[from] Unhandled),
    /// A fatal user condition; the environment has been destroyed.
    #[error("user panic: {0}")]
    Panic(String),
    /// The environment did not come out of exofork.
    #[error("{0} is not a fresh fork child")]
    NotForked(EnvId),
    /// A pipeline stopped making progress.
    #[error("pipeline unfinished after {rounds} rounds")]
    Stalled {
        /// Rounds driven before giving up.
        rounds: usize,
    },
}

impl UserError {
    /// True if the environment that hit this error is gone.
    pub fn is_fatal(&self) -> bool {
        matches!(self, UserError::Exited | UserError::Killed(_) | UserError::Panic(_))
    }
}

// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]

//! CONTEXT: Synapse privilege-separation core
//! OWNERS: @kernel-team
//! PUBLIC API: Kernel, Completion, UserImage, KernelConfig, syscall::SyscallTable, env::EnvTable
//! DEPENDS_ON: synapse_abi, log, spin, thiserror
//! INVARIANTS: User code reaches kernel state only through Kernel::syscall and fault delivery;
//!             every user-supplied handle, address and permission is validated before use

extern crate alloc;

pub mod config;
pub mod console;
pub mod env;
mod ipc;
pub mod kernel;
pub mod mm;
pub mod sched;
pub mod syscall;
pub mod trap;

pub use config::{ConfigError, KernelConfig};
pub use kernel::{Completion, EnvView, Kernel, Mapping, Segment, UserImage};
pub use synapse_abi as abi;
pub use trap::{TrapFrame, Unhandled, Upcall};

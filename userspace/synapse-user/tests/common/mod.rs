// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared setup for user-library integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use synapse::{Kernel, KernelConfig, UserImage};
use synapse_abi::layout::{PGSIZE, UTEXT};
use synapse_user::Process;

/// Writable data segment of the test program.
pub const DATA: usize = 0x0100_0000;
/// Pages in the data segment.
pub const DATA_PAGES: usize = 2;

pub fn boot(max_envs: usize) -> Arc<Kernel> {
    let config = KernelConfig::default().with_max_envs(max_envs).with_phys_pages(512);
    Arc::new(Kernel::new(config).expect("valid config"))
}

pub fn image() -> UserImage {
    UserImage::new(UTEXT)
        .segment(UTEXT, b"\x55\x89\xe5\xc3", false)
        .zeroed(DATA, DATA_PAGES * PGSIZE, true)
}

pub fn spawn(kernel: &Arc<Kernel>) -> Process {
    Process::spawn(kernel, &image()).expect("spawn")
}

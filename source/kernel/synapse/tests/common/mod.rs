// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared harness for kernel integration tests.

#![allow(dead_code)]

use synapse::{
    abi::{decode_return, layout::UTEXT, EnvId, Perm, SysError, Sysno},
    Completion, Kernel, KernelConfig, UserImage,
};

/// Scratch region used by tests for data pages.
pub const DATA: usize = 0x1000_0000;

pub fn boot(max_envs: usize, phys_pages: usize) -> Kernel {
    let config = KernelConfig::default().with_max_envs(max_envs).with_phys_pages(phys_pages);
    Kernel::new(config).expect("valid config")
}

pub fn spawn(kernel: &Kernel) -> EnvId {
    let image = UserImage::new(UTEXT).segment(UTEXT, b"\x90\x90\xcc", false);
    kernel.create_env(&image).expect("create env")
}

/// Issues a syscall that is expected to return to the caller.
pub fn sys(kernel: &Kernel, caller: EnvId, number: Sysno, args: [usize; 5]) -> Result<usize, SysError> {
    match kernel.syscall(caller, number.raw(), args) {
        Completion::Return(word) => decode_return(word),
        other => panic!("{number:?} by {caller} did not return: {other:?}"),
    }
}

pub fn page_alloc(kernel: &Kernel, caller: EnvId, target: EnvId, va: usize, perm: Perm) -> Result<usize, SysError> {
    sys(kernel, caller, Sysno::PageAlloc, [target.raw(), va, perm.raw(), 0, 0])
}

pub fn page_map(
    kernel: &Kernel,
    caller: EnvId,
    src: (EnvId, usize),
    dst: (EnvId, usize),
    perm: usize,
) -> Result<usize, SysError> {
    sys(kernel, caller, Sysno::PageMap, [src.0.raw(), src.1, dst.0.raw(), dst.1, perm])
}

pub fn page_unmap(kernel: &Kernel, caller: EnvId, target: EnvId, va: usize) -> Result<usize, SysError> {
    sys(kernel, caller, Sysno::PageUnmap, [target.raw(), va, 0, 0, 0])
}

pub fn exofork(kernel: &Kernel, caller: EnvId) -> Result<EnvId, SysError> {
    let raw = sys(kernel, caller, Sysno::Exofork, [0; 5])?;
    Ok(EnvId::from_raw(raw).expect("child handle"))
}

pub fn set_status(kernel: &Kernel, caller: EnvId, target: EnvId, status: usize) -> Result<usize, SysError> {
    sys(kernel, caller, Sysno::EnvSetStatus, [target.raw(), status, 0, 0, 0])
}

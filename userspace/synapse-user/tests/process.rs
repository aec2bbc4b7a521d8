// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Integration tests for the Process handle and syscall stubs
//! OWNERS: @runtime
//! STATUS: Functional
//! TEST_SCOPE:
//!   - Stubs decode kernel results into UserError
//!   - Handler installation, user panics and console output
//!   - COW isolation for arbitrary writes (property)
//! TEST_SCENARIOS:
//!   - handler_installation_is_idempotent(): the exception stack is allocated once
//!   - panic_destroys_environment(): later syscalls report Exited
//!   - blocked_receiver_cannot_touch_memory(): loads and stores report Blocked until a send lands
//!   - cow_writes_never_leak(): random child writes leave parent memory untouched

mod common;

use common::*;
use proptest::prelude::*;
use std::task::Poll;
use synapse::UserImage;
use synapse_abi::{
    layout::{PGSIZE, UTEXT, UTOP, UXSTACKTOP},
    EnvStatus, Perm, SysError,
};
use synapse_user::{cow_fault, Process, UserError};

#[test]
fn stubs_report_identity_and_errors() {
    let kernel = boot(8);
    let process = spawn(&kernel);
    assert_eq!(process.sys_getenvid(), Ok(process.id()));
    assert_eq!(
        process.sys_page_alloc(None, UTOP, Perm::USER_RW),
        Err(UserError::Sys(SysError::Inval))
    );
    assert_eq!(
        process.sys_page_map(None, UTEXT, None, DATA, Perm::USER_RW),
        Err(UserError::Sys(SysError::Inval))
    );
    process.sys_yield().expect("yield");
}

#[test]
fn cputs_prints_user_buffer() {
    let kernel = boot(8);
    let process = spawn(&kernel);
    process.write(DATA, b"hello from user\n").expect("write");
    process.sys_cputs(DATA, 16).expect("cputs");
    assert_eq!(kernel.console_output(), b"hello from user\n");
}

#[test]
fn handler_installation_is_idempotent() {
    let kernel = boot(8);
    let process = spawn(&kernel);
    process.set_pgfault_handler(cow_fault).expect("first");
    let xstack = process.uvpt(UXSTACKTOP - PGSIZE).expect("exception stack");
    process.set_pgfault_handler(cow_fault).expect("second");
    assert_eq!(process.uvpt(UXSTACKTOP - PGSIZE), Some(xstack));
    assert_eq!(
        kernel.env_view(process.id()).expect("view").pgfault_upcall,
        Some(synapse_user::PGFAULT_UPCALL)
    );
}

#[test]
fn panic_destroys_environment() {
    let kernel = boot(8);
    let process = spawn(&kernel);
    let err = process.panic("assertion failed");
    assert_eq!(err, UserError::Panic("assertion failed".into()));
    assert!(err.is_fatal());
    assert_eq!(kernel.status(process.id()), EnvStatus::Free);
    assert_eq!(process.sys_getenvid(), Err(UserError::Exited));
}

#[test]
fn blocked_receiver_cannot_touch_memory() {
    let kernel = boot(8);
    let receiver = spawn(&kernel);
    let sender = spawn(&kernel);
    receiver.set_pgfault_handler(cow_fault).expect("handler");
    receiver.write(DATA, b"before").expect("write");

    let wait = receiver.recv(None).expect("recv");
    let mut seen = [0u8; 6];
    assert_eq!(receiver.read(DATA, &mut seen), Err(UserError::Blocked));
    assert_eq!(receiver.write(DATA, b"during"), Err(UserError::Blocked));
    assert_eq!(kernel.status(receiver.id()), EnvStatus::NotRunnable);

    assert_eq!(sender.send(receiver.id(), 9, None).expect("send"), Poll::Ready(()));
    assert!(matches!(wait.poll(&receiver), Ok(Poll::Ready(_))));
    receiver.read(DATA, &mut seen).expect("read");
    assert_eq!(&seen, b"before");
}

#[test]
fn child_can_destroy_itself_and_parent_can_destroy_child() {
    let kernel = boot(8);
    let parent = spawn(&kernel);
    let child = parent.resume_child(parent.fork().expect("fork")).expect("child");
    child.sys_env_destroy(None).expect("exit");
    assert_eq!(kernel.status(child.id()), EnvStatus::Free);

    let other = parent.fork().expect("fork");
    parent.sys_env_destroy(Some(other)).expect("destroy child");
    assert_eq!(kernel.status(other), EnvStatus::Free);
    assert_eq!(parent.sys_env_destroy(Some(other)), Err(UserError::Sys(SysError::BadEnv)));
}

#[test]
fn spawn_rejects_images_above_ceiling() {
    let kernel = boot(8);
    let image = UserImage::new(UTEXT).segment(UTOP - 4, b"12345678", true);
    assert_eq!(Process::spawn(&kernel, &image).err(), Some(UserError::Sys(SysError::Inval)));
    assert_eq!(kernel.env_count(), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn cow_writes_never_leak(
        offset in 0usize..(DATA_PAGES * PGSIZE - 32),
        bytes in prop::collection::vec(any::<u8>(), 1..32),
    ) {
        let kernel = boot(4);
        let parent = spawn(&kernel);
        let original: Vec<u8> = (0..bytes.len()).map(|i| i as u8 ^ 0x5a).collect();
        parent.write(DATA + offset, &original).expect("seed");

        let child = parent.resume_child(parent.fork().expect("fork")).expect("child");
        child.write(DATA + offset, &bytes).expect("child write");

        let mut seen = vec![0u8; bytes.len()];
        parent.read(DATA + offset, &mut seen).expect("parent read");
        prop_assert_eq!(&seen, &original);
        child.read(DATA + offset, &mut seen).expect("child read");
        prop_assert_eq!(&seen, &bytes);
    }
}

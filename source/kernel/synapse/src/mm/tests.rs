// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use synapse_abi::{
    layout::{PGSIZE, PTSIZE, UTEXT, UTOP},
    Perm, FEC_PR, FEC_U, FEC_WR,
};

use super::uaccess::{self, Access};
use super::*;

const RO: Perm = Perm::REQUIRED;
const RW: Perm = Perm::USER_RW;

fn setup(frames: usize) -> (FrameAllocator, PageDirectory) {
    let mut pool = FrameAllocator::new(frames);
    let pgdir = PageDirectory::new(&mut pool).expect("directory");
    (pool, pgdir)
}

#[test]
fn rejects_unaligned_and_kernel_addresses() {
    let (mut pool, mut pgdir) = setup(8);
    let frame = pool.alloc(true).expect("frame");
    assert_eq!(pgdir.insert(&mut pool, frame, UTEXT + 8, RW), Err(MapError::Unaligned));
    assert_eq!(pgdir.insert(&mut pool, frame, UTOP, RW), Err(MapError::OutOfRange));
    assert_eq!(pool.refcount(frame), 0);
}

#[test]
fn table_page_is_charged_to_the_pool() {
    // Directory + one data frame leave nothing for the table page.
    let (mut pool, mut pgdir) = setup(2);
    let frame = pool.alloc(true).expect("frame");
    assert_eq!(pgdir.insert(&mut pool, frame, UTEXT, RW), Err(MapError::OutOfMemory));
    assert_eq!(pool.refcount(frame), 0);
    pool.release_unused(frame);
    assert_eq!(pool.free_count(), 1);
}

#[test]
fn reinserting_same_frame_only_changes_permission() {
    let (mut pool, mut pgdir) = setup(8);
    let frame = pool.alloc(true).expect("frame");
    pgdir.insert(&mut pool, frame, UTEXT, RW).expect("map");
    pgdir.insert(&mut pool, frame, UTEXT, RO | Perm::COW).expect("remap");
    assert_eq!(pool.refcount(frame), 1);
    assert_eq!(pgdir.lookup(UTEXT).map(|pte| pte.perm), Some(RO | Perm::COW));
}

#[test]
fn replacing_a_mapping_drops_the_old_frame() {
    let (mut pool, mut pgdir) = setup(8);
    let first = pool.alloc(true).expect("frame");
    let second = pool.alloc(true).expect("frame");
    pgdir.insert(&mut pool, first, UTEXT, RW).expect("map");
    let free_before = pool.free_count();
    pgdir.insert(&mut pool, second, UTEXT, RW).expect("replace");
    assert_eq!(pool.refcount(first), 0);
    assert_eq!(pool.free_count(), free_before + 1);
}

#[test]
fn remove_is_idempotent() {
    let (mut pool, mut pgdir) = setup(8);
    let frame = pool.alloc(true).expect("frame");
    pgdir.insert(&mut pool, frame, UTEXT, RW).expect("map");
    pgdir.remove(&mut pool, UTEXT);
    pgdir.remove(&mut pool, UTEXT);
    pgdir.remove(&mut pool, UTEXT + 64 * PTSIZE);
    assert_eq!(pgdir.lookup(UTEXT), None);
    assert_eq!(pgdir.mapped_pages(), 0);
}

#[test]
fn teardown_returns_every_frame() {
    let (mut pool, mut pgdir) = setup(16);
    for i in 0..3 {
        let frame = pool.alloc(true).expect("frame");
        pgdir.insert(&mut pool, frame, UTEXT + i * PTSIZE, RW).expect("map");
    }
    assert!(pgdir.pde_present(synapse_abi::layout::pdx(UTEXT)));
    pgdir.teardown(&mut pool);
    assert_eq!(pool.free_count(), 16);
    assert_eq!(pgdir.root(), None);
}

#[test]
fn mappings_iterate_in_address_order() {
    let (mut pool, mut pgdir) = setup(16);
    for va in [UTEXT + PTSIZE, UTEXT + PGSIZE, UTEXT] {
        let frame = pool.alloc(true).expect("frame");
        pgdir.insert(&mut pool, frame, va, RW).expect("map");
    }
    let vas: std::vec::Vec<usize> = pgdir.mappings().map(|(va, _)| va).collect();
    assert_eq!(vas, [UTEXT, UTEXT + PGSIZE, UTEXT + PTSIZE]);
}

#[test]
fn user_access_reports_first_faulting_page() {
    let (mut pool, mut pgdir) = setup(8);
    let frame = pool.alloc(true).expect("frame");
    pgdir.insert(&mut pool, frame, UTEXT, RO).expect("map");

    assert_eq!(uaccess::check(&pgdir, UTEXT, PGSIZE, Access::Read), Ok(()));
    assert_eq!(
        uaccess::check(&pgdir, UTEXT + 16, 8, Access::Write),
        Err(PageFault { va: UTEXT + 16, err: FEC_PR | FEC_WR | FEC_U })
    );
    assert_eq!(
        uaccess::check(&pgdir, UTEXT + PGSIZE - 4, 8, Access::Read),
        Err(PageFault { va: UTEXT + PGSIZE, err: FEC_U })
    );
    assert_eq!(
        uaccess::check(&pgdir, UTOP, 1, Access::Read),
        Err(PageFault { va: UTOP, err: FEC_PR | FEC_U })
    );
}

#[test]
fn copies_span_page_boundaries() {
    let (mut pool, mut pgdir) = setup(8);
    for va in [UTEXT, UTEXT + PGSIZE] {
        let frame = pool.alloc(true).expect("frame");
        pgdir.insert(&mut pool, frame, va, RW).expect("map");
    }
    let payload = [0x5au8; 32];
    uaccess::copy_out(&pgdir, &mut pool, UTEXT + PGSIZE - 16, &payload).expect("store");
    let mut back = [0u8; 32];
    uaccess::copy_in(&pgdir, &pool, UTEXT + PGSIZE - 16, &mut back).expect("load");
    assert_eq!(back, payload);
}

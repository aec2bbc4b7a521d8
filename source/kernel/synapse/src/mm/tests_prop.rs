// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Property tests for page-directory reference counting
//! OWNERS: @kernel-mm-team
//! NOTE: Tests only; operates on a private frame pool.
//!
//! TEST_SCOPE:
//!   - Frame reference counts track the number of live mappings
//!   - Removal is idempotent and teardown returns the pool to its initial size
//!
//! TEST_SCENARIOS:
//!   - insert_remove_restores_pool(): any page maps then unmaps cleanly
//!   - refcounts_match_mappings(): random insert/remove sequences over a shared frame set

#![cfg(test)]

extern crate alloc;

use alloc::vec::Vec;

use proptest::prelude::*;
use synapse_abi::{
    layout::{PGSIZE, UTOP},
    Perm,
};

use super::*;

const POOL: usize = 64;

fn arb_user_page() -> impl Strategy<Value = usize> {
    (0usize..UTOP / PGSIZE).prop_map(|vpn| vpn * PGSIZE)
}

#[derive(Debug, Clone)]
enum Op {
    Insert { frame: usize, va: usize },
    Remove { va: usize },
}

fn arb_op() -> impl Strategy<Value = Op> {
    // A handful of addresses spread over a few directory slots so entries collide.
    let va = (0usize..6).prop_map(|i| 0x0080_0000 + (i % 3) * PGSIZE + (i / 3) * 0x0040_0000);
    prop_oneof![
        (0usize..4, va.clone()).prop_map(|(frame, va)| Op::Insert { frame, va }),
        va.prop_map(|va| Op::Remove { va }),
    ]
}

proptest! {
    #[test]
    fn insert_remove_restores_pool(va in arb_user_page()) {
        let mut pool = FrameAllocator::new(POOL);
        let mut pgdir = PageDirectory::new(&mut pool).expect("directory");
        let frame = pool.alloc(true).expect("frame");
        pgdir.insert(&mut pool, frame, va, Perm::USER_RW).expect("map");
        prop_assert_eq!(pgdir.lookup(va).map(|pte| pte.frame), Some(frame));
        pgdir.remove(&mut pool, va);
        prop_assert_eq!(pgdir.lookup(va), None);
        pgdir.remove(&mut pool, va);
        prop_assert_eq!(pool.refcount(frame), 0);
        pgdir.teardown(&mut pool);
        prop_assert_eq!(pool.free_count(), POOL);
    }

    #[test]
    fn refcounts_match_mappings(ops in proptest::collection::vec(arb_op(), 1..40)) {
        let mut pool = FrameAllocator::new(POOL);
        let mut pgdir = PageDirectory::new(&mut pool).expect("directory");
        let frames: Vec<FrameId> = (0..4).map(|_| pool.alloc(true).expect("frame")).collect();
        // Pin every frame so none is recycled while the sequence runs.
        for &frame in &frames {
            pool.incref(frame);
        }
        for op in ops {
            match op {
                Op::Insert { frame, va } => {
                    pgdir.insert(&mut pool, frames[frame], va, Perm::USER_RW).expect("map");
                }
                Op::Remove { va } => pgdir.remove(&mut pool, va),
            }
            for &frame in &frames {
                let mapped = pgdir.mappings().filter(|(_, pte)| pte.frame == frame).count() as u32;
                prop_assert_eq!(pool.refcount(frame), mapped + 1);
            }
        }
    }
}

// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Virtual address-space layout shared by the kernel and user space.
//!
//! ```text
//!   UTOP, UXSTACKTOP -> +------------------------------+ 0xeec00000
//!                       |      user exception stack    |  PGSIZE
//!                       +------------------------------+ 0xeebff000
//!                       |        empty guard page      |  PGSIZE
//!   USTACKTOP --------> +------------------------------+ 0xeebfe000
//!                       |       normal user stack      |  PGSIZE
//!                       +------------------------------+ 0xeebfd000
//!                       .                              .
//!   UTEXT ------------> +------------------------------+ 0x00800000
//!   PFTEMP -----------> |     COW handler scratch      |  PGSIZE
//!                       .                              .
//!   UTEMP ------------> +------------------------------+ 0x00400000
//! ```

use static_assertions::const_assert;

/// Bytes per page.
pub const PGSIZE: usize = 4096;
/// log2(PGSIZE).
pub const PGSHIFT: usize = 12;
/// Entries per page table.
pub const NPTENTRIES: usize = 1024;
/// Entries per page directory.
pub const NPDENTRIES: usize = 1024;
/// Bytes mapped by one page directory entry.
pub const PTSIZE: usize = PGSIZE * NPTENTRIES;
/// Shift of the page directory index within a virtual address.
pub const PDXSHIFT: usize = 22;

/// Ceiling of the user-manipulable address space.
pub const UTOP: usize = 0xeec0_0000;
/// Top of the user exception stack.
pub const UXSTACKTOP: usize = UTOP;
/// Top of the normal user stack; one guard page sits between it and the exception stack.
pub const USTACKTOP: usize = UTOP - 2 * PGSIZE;
/// Where user programs are linked.
pub const UTEXT: usize = 2 * PTSIZE;
/// Scratch window used when copying pages between address spaces.
pub const UTEMP: usize = PTSIZE;
/// Scratch page used by the copy-on-write fault handler.
pub const PFTEMP: usize = UTEMP + PTSIZE - PGSIZE;

const_assert!(UTOP % PTSIZE == 0);
const_assert!(USTACKTOP % PGSIZE == 0);
const_assert!(PFTEMP < UTEXT);
const_assert!(1 << PGSHIFT == PGSIZE);

/// Page number of `va`.
#[inline]
pub const fn pgnum(va: usize) -> usize {
    va >> PGSHIFT
}

/// Page directory index of `va`.
#[inline]
pub const fn pdx(va: usize) -> usize {
    (va >> PDXSHIFT) & (NPDENTRIES - 1)
}

/// Page table index of `va`.
#[inline]
pub const fn ptx(va: usize) -> usize {
    (va >> PGSHIFT) & (NPTENTRIES - 1)
}

/// Virtual address of the first byte of page number `vpn`.
#[inline]
pub const fn page_va(vpn: usize) -> usize {
    vpn << PGSHIFT
}

/// Rounds `va` down to its page boundary.
#[inline]
pub const fn round_down(va: usize) -> usize {
    va & !(PGSIZE - 1)
}

/// Returns true if `va` is page aligned.
#[inline]
pub const fn page_aligned(va: usize) -> bool {
    va % PGSIZE == 0
}

/// Returns true if `va` is a valid page address a syscall may name: aligned and below [`UTOP`].
#[inline]
pub const fn user_page(va: usize) -> bool {
    va < UTOP && page_aligned(va)
}

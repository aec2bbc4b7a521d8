// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Page permission bits accepted by the address-space syscalls.

bitflags::bitflags! {
    /// Permission set attached to a user mapping.
    ///
    /// `COW` lives in the software-available range; the kernel propagates it verbatim and never
    /// interprets it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Perm: u32 {
        /// Mapping is present.
        const PRESENT = 0x001;
        /// Mapping is writable.
        const WRITE = 0x002;
        /// Mapping is accessible from user mode.
        const USER = 0x004;
        /// Software-available bits.
        const AVAIL = 0xe00;
        /// Copy-on-write marker used by the user-space fork protocol.
        const COW = 0x800;
    }
}

impl Perm {
    /// Bits a syscall may set on a mapping.
    pub const SYSCALL: Perm = Perm::PRESENT.union(Perm::WRITE).union(Perm::USER).union(Perm::AVAIL);
    /// Bits every syscall-installed mapping must carry.
    pub const REQUIRED: Perm = Perm::PRESENT.union(Perm::USER);
    /// Ordinary private read/write user page.
    pub const USER_RW: Perm = Perm::REQUIRED.union(Perm::WRITE);

    /// Validates a raw permission word coming from a syscall argument.
    ///
    /// Rejects bits outside [`Perm::SYSCALL`] and sets missing `PRESENT | USER`.
    pub fn checked(raw: usize) -> Option<Perm> {
        let raw = u32::try_from(raw).ok()?;
        let perm = Perm::from_bits(raw)?;
        if !Perm::SYSCALL.contains(perm) || !perm.contains(Perm::REQUIRED) {
            return None;
        }
        Some(perm)
    }

    /// Raw word suitable for a syscall argument.
    #[inline]
    pub const fn raw(self) -> usize {
        self.bits() as usize
    }

    /// Returns true for a writable mapping.
    #[inline]
    pub const fn writable(self) -> bool {
        self.contains(Perm::WRITE)
    }

    /// Returns true for a mapping carrying the copy-on-write marker.
    #[inline]
    pub const fn is_cow(self) -> bool {
        self.contains(Perm::COW)
    }
}

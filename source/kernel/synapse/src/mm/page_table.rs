// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Two-level user page table backed by frames from the pool.

extern crate alloc;

use alloc::collections::{btree_map::Entry, BTreeMap};

use synapse_abi::{
    layout::{page_va, pdx, ptx, NPTENTRIES, PGSIZE, UTOP},
    Perm,
};

use super::{FrameAllocator, FrameId, MapError};

/// A present page-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pte {
    /// Mapped frame.
    pub frame: FrameId,
    /// Permission bits of this mapping.
    pub perm: Perm,
}

struct TablePage {
    frame: FrameId,
    entries: BTreeMap<usize, Pte>,
}

/// Per-environment page directory.
///
/// The directory page and each second-level table page occupy one frame of the pool.
pub struct PageDirectory {
    root: Option<FrameId>,
    tables: BTreeMap<usize, TablePage>,
}

impl PageDirectory {
    /// Allocates an empty directory.
    pub fn new(frames: &mut FrameAllocator) -> Result<Self, MapError> {
        let root = frames.alloc(true).ok_or(MapError::OutOfMemory)?;
        frames.incref(root);
        Ok(Self { root: Some(root), tables: BTreeMap::new() })
    }

    /// Frame holding the directory, `None` after teardown.
    pub fn root(&self) -> Option<FrameId> {
        self.root
    }

    fn check(va: usize) -> Result<(), MapError> {
        if va >= UTOP {
            return Err(MapError::OutOfRange);
        }
        if va % PGSIZE != 0 {
            return Err(MapError::Unaligned);
        }
        Ok(())
    }

    // pgdir_walk with create: allocates the table page on demand.
    fn table_mut(
        &mut self,
        frames: &mut FrameAllocator,
        index: usize,
    ) -> Result<&mut TablePage, MapError> {
        match self.tables.entry(index) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let frame = frames.alloc(true).ok_or(MapError::OutOfMemory)?;
                frames.incref(frame);
                Ok(entry.insert(TablePage { frame, entries: BTreeMap::new() }))
            }
        }
    }

    /// Returns the entry mapping `va`, if any.
    pub fn lookup(&self, va: usize) -> Option<Pte> {
        self.tables.get(&pdx(va))?.entries.get(&ptx(va)).copied()
    }

    /// True if the directory slot `index` points at a table page.
    pub fn pde_present(&self, index: usize) -> bool {
        self.tables.contains_key(&index)
    }

    /// Maps `frame` at `va`, replacing whatever was there.
    ///
    /// The new frame is referenced before the old one is dropped, so re-inserting the frame that
    /// is already mapped at `va` only changes the permission.
    pub fn insert(
        &mut self,
        frames: &mut FrameAllocator,
        frame: FrameId,
        va: usize,
        perm: Perm,
    ) -> Result<(), MapError> {
        Self::check(va)?;
        let table = self.table_mut(frames, pdx(va))?;
        frames.incref(frame);
        if let Some(old) = table.entries.insert(ptx(va), Pte { frame, perm }) {
            frames.decref(old.frame);
        }
        Ok(())
    }

    /// Removes the mapping at `va`. Absent mappings are ignored.
    pub fn remove(&mut self, frames: &mut FrameAllocator, va: usize) {
        if let Some(table) = self.tables.get_mut(&pdx(va)) {
            if let Some(old) = table.entries.remove(&ptx(va)) {
                frames.decref(old.frame);
            }
        }
    }

    /// Drops every mapping, every table page and the directory page itself.
    pub fn teardown(&mut self, frames: &mut FrameAllocator) {
        for (_, table) in core::mem::take(&mut self.tables) {
            for pte in table.entries.values() {
                frames.decref(pte.frame);
            }
            frames.decref(table.frame);
        }
        if let Some(root) = self.root.take() {
            frames.decref(root);
        }
    }

    /// Present mappings in ascending address order.
    pub fn mappings(&self) -> impl Iterator<Item = (usize, Pte)> + '_ {
        self.tables.iter().flat_map(|(&dir, table)| {
            table
                .entries
                .iter()
                .map(move |(&slot, &pte)| (page_va(dir * NPTENTRIES + slot), pte))
        })
    }

    /// Number of present mappings.
    pub fn mapped_pages(&self) -> usize {
        self.tables.values().map(|table| table.entries.len()).sum()
    }
}

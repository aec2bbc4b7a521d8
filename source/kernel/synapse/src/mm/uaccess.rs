// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Simulated MMU: user-mode loads and stores checked against a page directory.

use synapse_abi::{
    layout::{round_down, PGSIZE, UTOP},
    Perm, FEC_PR, FEC_U, FEC_WR,
};

use super::{FrameAllocator, PageDirectory};

/// A user access that the MMU refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFault {
    /// First faulting address.
    pub va: usize,
    /// Reason bits (`FEC_*`).
    pub err: usize,
}

/// Access kind being checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Load.
    Read,
    /// Store.
    Write,
}

/// Verifies that user mode may touch `[va, va + len)`.
///
/// Every page must be present and user accessible, and writable for stores. The first page that
/// fails is reported.
pub fn check(pgdir: &PageDirectory, va: usize, len: usize, access: Access) -> Result<(), PageFault> {
    let wr = if access == Access::Write { FEC_WR } else { 0 };
    if len == 0 {
        return Ok(());
    }
    let end = va.checked_add(len).ok_or(PageFault { va, err: FEC_U | wr })?;
    let mut page = round_down(va);
    while page < end {
        let at = page.max(va);
        if page >= UTOP {
            // Kernel half: present, never user accessible.
            return Err(PageFault { va: at, err: FEC_PR | FEC_U | wr });
        }
        let pte = pgdir.lookup(page).ok_or(PageFault { va: at, err: FEC_U | wr })?;
        let denied = !pte.perm.contains(Perm::USER)
            || (access == Access::Write && !pte.perm.contains(Perm::WRITE));
        if denied {
            return Err(PageFault { va: at, err: FEC_PR | FEC_U | wr });
        }
        page += PGSIZE;
    }
    Ok(())
}

/// Walks `[va, va + len)` page by page, yielding (page address, offset in page, chunk length,
/// offset in the caller buffer).
fn chunks(va: usize, len: usize) -> impl Iterator<Item = (usize, usize, usize, usize)> {
    let mut done = 0;
    core::iter::from_fn(move || {
        if done >= len {
            return None;
        }
        let cur = va + done;
        let page = round_down(cur);
        let offset = cur - page;
        let n = (PGSIZE - offset).min(len - done);
        let item = (page, offset, n, done);
        done += n;
        Some(item)
    })
}

/// Copies user memory at `va` into `buf` after a read check.
pub fn copy_in(
    pgdir: &PageDirectory,
    frames: &FrameAllocator,
    va: usize,
    buf: &mut [u8],
) -> Result<(), PageFault> {
    check(pgdir, va, buf.len(), Access::Read)?;
    for (page, offset, n, at) in chunks(va, buf.len()) {
        let data = pgdir.lookup(page).and_then(|pte| frames.bytes(pte.frame));
        match data {
            Some(data) => buf[at..at + n].copy_from_slice(&data[offset..offset + n]),
            None => return Err(PageFault { va: page, err: FEC_U }),
        }
    }
    Ok(())
}

/// Copies `data` into user memory at `va` after a write check. Nothing is written on failure.
pub fn copy_out(
    pgdir: &PageDirectory,
    frames: &mut FrameAllocator,
    va: usize,
    data: &[u8],
) -> Result<(), PageFault> {
    check(pgdir, va, data.len(), Access::Write)?;
    poke(pgdir, frames, va, data)
}

/// Kernel-privileged store: only requires the pages to be present.
pub fn poke(
    pgdir: &PageDirectory,
    frames: &mut FrameAllocator,
    va: usize,
    data: &[u8],
) -> Result<(), PageFault> {
    for (page, offset, n, at) in chunks(va, data.len()) {
        let dst = pgdir.lookup(page).and_then(|pte| frames.bytes_mut(pte.frame));
        match dst {
            Some(dst) => dst[offset..offset + n].copy_from_slice(&data[at..at + n]),
            None => return Err(PageFault { va: page, err: FEC_WR }),
        }
    }
    Ok(())
}

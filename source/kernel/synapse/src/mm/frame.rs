// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Physical frame pool with per-frame reference counts
//! OWNERS: @kernel-mm-team
//! PUBLIC API: FrameId, FrameAllocator (alloc/incref/decref/release_unused/bytes)
//! DEPENDS_ON: synapse_abi::layout
//! INVARIANTS: A frame returns to the free list exactly once, when its last mapping goes away
//!             or when a never-mapped frame is released; frames are handed out lowest-first

extern crate alloc;

use alloc::{boxed::Box, vec::Vec};
use core::fmt;

use synapse_abi::layout::PGSIZE;

/// Handle of a physical frame (its physical page number).
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(u32);

impl FrameId {
    /// Physical page number.
    #[inline]
    pub const fn ppn(self) -> usize {
        self.0 as usize
    }

    /// Physical address of the first byte of the frame.
    #[inline]
    pub const fn paddr(self) -> usize {
        self.ppn() * PGSIZE
    }
}

impl fmt::Debug for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ppn:{:#x}", self.0)
    }
}

struct Frame {
    refs: u32,
    in_use: bool,
    data: Option<Box<[u8; PGSIZE]>>,
}

/// Fixed-capacity arena of 4 KiB frames.
pub struct FrameAllocator {
    frames: Vec<Frame>,
    // Stack of free frame numbers; the lowest number sits on top.
    free: Vec<FrameId>,
}

impl FrameAllocator {
    /// Creates a pool of `count` frames. Backing storage is allocated lazily.
    pub fn new(count: usize) -> Self {
        let count = count.min(u32::MAX as usize);
        let frames = (0..count).map(|_| Frame { refs: 0, in_use: false, data: None }).collect();
        let free = (0..count as u32).rev().map(FrameId).collect();
        Self { frames, free }
    }

    /// Total number of frames.
    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    /// Frames currently on the free list.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Takes a frame off the free list with a reference count of zero.
    ///
    /// The caller owns the frame until it either maps it (see [`FrameAllocator::incref`]) or hands
    /// it back with [`FrameAllocator::release_unused`].
    pub fn alloc(&mut self, zeroed: bool) -> Option<FrameId> {
        let id = self.free.pop()?;
        let frame = &mut self.frames[id.ppn()];
        frame.in_use = true;
        match frame.data.as_mut() {
            Some(data) if zeroed => data.fill(0),
            Some(_) => {}
            None => frame.data = Some(Box::new([0u8; PGSIZE])),
        }
        log::trace!(target: "mm", "frame alloc {:?}", id);
        Some(id)
    }

    /// Records one more mapping of `id`.
    pub fn incref(&mut self, id: FrameId) {
        if let Some(frame) = self.frames.get_mut(id.ppn()) {
            debug_assert!(frame.in_use, "incref on free frame {id:?}");
            frame.refs += 1;
        }
    }

    /// Drops one mapping of `id`; the frame returns to the pool when none remain.
    pub fn decref(&mut self, id: FrameId) {
        let Some(frame) = self.frames.get_mut(id.ppn()) else {
            return;
        };
        debug_assert!(frame.refs > 0, "decref underflow on {id:?}");
        frame.refs = frame.refs.saturating_sub(1);
        if frame.refs == 0 {
            self.release(id);
        }
    }

    /// Returns a frame that was allocated but never mapped.
    pub fn release_unused(&mut self, id: FrameId) {
        if self.refcount(id) == 0 {
            self.release(id);
        }
    }

    fn release(&mut self, id: FrameId) {
        let frame = &mut self.frames[id.ppn()];
        if frame.in_use {
            frame.in_use = false;
            self.free.push(id);
            log::trace!(target: "mm", "frame free {:?}", id);
        }
    }

    /// Number of mappings referencing `id`.
    pub fn refcount(&self, id: FrameId) -> u32 {
        self.frames.get(id.ppn()).map_or(0, |frame| frame.refs)
    }

    /// Frame handle for a physical page number, if that frame is currently allocated.
    pub fn frame_at(&self, ppn: usize) -> Option<FrameId> {
        let frame = self.frames.get(ppn)?;
        frame.in_use.then_some(FrameId(ppn as u32))
    }

    /// Contents of an allocated frame.
    pub fn bytes(&self, id: FrameId) -> Option<&[u8; PGSIZE]> {
        let frame = self.frames.get(id.ppn())?;
        if !frame.in_use {
            return None;
        }
        frame.data.as_deref()
    }

    /// Mutable contents of an allocated frame.
    pub fn bytes_mut(&mut self, id: FrameId) -> Option<&mut [u8; PGSIZE]> {
        let frame = self.frames.get_mut(id.ppn())?;
        if !frame.in_use {
            return None;
        }
        frame.data.as_deref_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hands_out_lowest_frame_first() {
        let mut pool = FrameAllocator::new(4);
        assert_eq!(pool.alloc(true).map(FrameId::ppn), Some(0));
        assert_eq!(pool.alloc(true).map(FrameId::ppn), Some(1));
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn last_decref_frees() {
        let mut pool = FrameAllocator::new(1);
        let frame = pool.alloc(true).expect("frame");
        pool.incref(frame);
        pool.incref(frame);
        pool.decref(frame);
        assert_eq!(pool.free_count(), 0);
        pool.decref(frame);
        assert_eq!(pool.free_count(), 1);
        assert!(pool.bytes(frame).is_none());
    }

    #[test]
    fn release_unused_ignores_mapped_frames() {
        let mut pool = FrameAllocator::new(2);
        let frame = pool.alloc(false).expect("frame");
        pool.incref(frame);
        pool.release_unused(frame);
        assert_eq!(pool.free_count(), 1);
        pool.decref(frame);
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn zeroed_alloc_scrubs_reused_frame() {
        let mut pool = FrameAllocator::new(1);
        let frame = pool.alloc(true).expect("frame");
        pool.bytes_mut(frame).expect("data")[7] = 0xaa;
        pool.release_unused(frame);
        let again = pool.alloc(true).expect("frame");
        assert_eq!(again, frame);
        assert!(pool.bytes(again).expect("data").iter().all(|&b| b == 0));
    }

    #[test]
    fn exhaustion_returns_none() {
        let mut pool = FrameAllocator::new(1);
        assert!(pool.alloc(true).is_some());
        assert!(pool.alloc(true).is_none());
    }
}

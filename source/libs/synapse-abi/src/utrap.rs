// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fault record pushed onto the user exception stack.

use static_assertions::const_assert_eq;

/// Fault on a present page (protection violation) rather than a missing one.
pub const FEC_PR: usize = 0x1;
/// Fault caused by a write.
pub const FEC_WR: usize = 0x2;
/// Fault raised while in user mode.
pub const FEC_U: usize = 0x4;

/// Number of general-purpose registers saved in a frame.
pub const NREGS: usize = 8;

const WORDS: usize = 2 + NREGS + 3;

/// User-visible trap frame delivered to a page-fault upcall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UTrapframe {
    /// Faulting virtual address.
    pub fault_va: usize,
    /// Fault reason bits (`FEC_*`).
    pub err: usize,
    /// General registers at the time of the fault.
    pub regs: [usize; NREGS],
    /// Faulting program counter.
    pub pc: usize,
    /// Flags register.
    pub flags: usize,
    /// Stack pointer at the time of the fault.
    pub sp: usize,
}

const_assert_eq!(UTrapframe::SIZE, 104);

impl UTrapframe {
    /// Bytes occupied on the exception stack.
    pub const SIZE: usize = WORDS * 8;

    /// True if the fault was a write.
    #[inline]
    pub const fn is_write(&self) -> bool {
        self.err & FEC_WR != 0
    }

    /// Little-endian image as stored in user memory.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut words = [0usize; WORDS];
        words[0] = self.fault_va;
        words[1] = self.err;
        words[2..2 + NREGS].copy_from_slice(&self.regs);
        words[2 + NREGS] = self.pc;
        words[3 + NREGS] = self.flags;
        words[4 + NREGS] = self.sp;
        let mut out = [0u8; Self::SIZE];
        for (chunk, word) in out.chunks_exact_mut(8).zip(words) {
            chunk.copy_from_slice(&(word as u64).to_le_bytes());
        }
        out
    }

    /// Parses a record read back from user memory.
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let mut words = [0usize; WORDS];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(8)) {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            *word = u64::from_le_bytes(raw) as usize;
        }
        let mut regs = [0usize; NREGS];
        regs.copy_from_slice(&words[2..2 + NREGS]);
        Self {
            fault_va: words[0],
            err: words[1],
            regs,
            pc: words[2 + NREGS],
            flags: words[3 + NREGS],
            sp: words[4 + NREGS],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_address_leads_the_record() {
        let utf = UTrapframe { fault_va: 0x0080_1234, err: FEC_WR | FEC_U, ..Default::default() };
        let bytes = utf.to_bytes();
        assert_eq!(&bytes[..8], &0x0080_1234u64.to_le_bytes());
        assert!(UTrapframe::from_bytes(&bytes).is_write());
    }
}

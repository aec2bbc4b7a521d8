// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Environment handles and status codes.

use core::fmt;

/// Bits of a handle used for the slot index.
pub const ENV_INDEX_BITS: u32 = 12;
/// Upper bound on the number of environment slots a handle can address.
pub const MAX_ENVS: usize = 1 << ENV_INDEX_BITS;
/// Generations stay below this bound so every handle is a positive `i32`.
const GENERATION_LIMIT: u32 = 1 << (31 - ENV_INDEX_BITS);

/// Generation-tagged environment handle: `generation << 12 | index`.
///
/// A handle is valid only while its generation matches the slot's. The raw value `0` never names
/// an environment; syscalls read it as "the caller".
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnvId(u32);

impl EnvId {
    /// Builds a handle from a slot index and a non-zero generation.
    #[inline]
    pub const fn new(index: usize, generation: u32) -> Option<Self> {
        if index >= MAX_ENVS || generation == 0 || generation >= GENERATION_LIMIT {
            return None;
        }
        Some(Self((generation << ENV_INDEX_BITS) | index as u32))
    }

    /// Decodes a raw handle word. Returns `None` for `0` and malformed words.
    #[inline]
    pub const fn from_raw(raw: usize) -> Option<Self> {
        if raw > u32::MAX as usize {
            return None;
        }
        let raw = raw as u32;
        Self::new((raw & (MAX_ENVS as u32 - 1)) as usize, raw >> ENV_INDEX_BITS)
    }

    /// Raw handle word.
    #[inline]
    pub const fn raw(self) -> usize {
        self.0 as usize
    }

    /// Slot index.
    #[inline]
    pub const fn index(self) -> usize {
        (self.0 as usize) & (MAX_ENVS - 1)
    }

    /// Slot generation.
    #[inline]
    pub const fn generation(self) -> u32 {
        self.0 >> ENV_INDEX_BITS
    }

    /// Generation that follows `generation` when a slot is reused. Wraps to 1, skipping 0.
    #[inline]
    pub const fn next_generation(generation: u32) -> u32 {
        let next = generation.wrapping_add(1);
        if next == 0 || next >= GENERATION_LIMIT {
            1
        } else {
            next
        }
    }
}

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl fmt::Debug for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnvId({}#{})", self.index(), self.generation())
    }
}

/// Scheduling status of an environment slot.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvStatus {
    /// Slot is unused.
    Free = 0,
    /// Destroyed while running; the slot is reclaimed at the next reschedule.
    Dying = 1,
    /// Eligible to run.
    Runnable = 2,
    /// Suspended: freshly created, blocked in receive, or parked by its owner.
    NotRunnable = 4,
}

impl EnvStatus {
    /// Decodes a status word passed to `env_set_status`. Only the two settable values decode.
    pub const fn settable(raw: usize) -> Option<Self> {
        match raw {
            2 => Some(Self::Runnable),
            4 => Some(Self::NotRunnable),
            _ => None,
        }
    }

    /// Raw status word.
    #[inline]
    pub const fn raw(self) -> usize {
        self as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_never_a_handle() {
        assert_eq!(EnvId::from_raw(0), None);
        assert_eq!(EnvId::new(0, 0), None);
        assert_eq!(EnvId::from_raw(5), None, "generation 0 is reserved");
    }

    #[test]
    fn handles_are_positive_words() {
        let id = EnvId::new(MAX_ENVS - 1, GENERATION_LIMIT - 1).expect("largest handle");
        assert!(id.raw() <= i32::MAX as usize);
        assert_eq!(EnvId::from_raw(id.raw()), Some(id));
        assert_eq!(EnvId::new(MAX_ENVS, 1), None);
    }

    #[test]
    fn generation_wraps_to_one() {
        assert_eq!(EnvId::next_generation(1), 2);
        assert_eq!(EnvId::next_generation(GENERATION_LIMIT - 1), 1);
    }

    #[test]
    fn display_matches_console_format() {
        let id = EnvId::new(1, 1).expect("handle");
        assert_eq!(format!("{id}"), "00001001");
    }

    #[test]
    fn only_runnable_states_are_settable() {
        assert_eq!(EnvStatus::settable(2), Some(EnvStatus::Runnable));
        assert_eq!(EnvStatus::settable(4), Some(EnvStatus::NotRunnable));
        for raw in [0, 1, 3, 5, usize::MAX] {
            assert_eq!(EnvStatus::settable(raw), None);
        }
    }
}

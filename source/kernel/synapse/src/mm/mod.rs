// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Memory management for user address spaces
//! OWNERS: @kernel-mm-team
//! PUBLIC API: FrameAllocator, FrameId, PageDirectory, Pte, MapError, uaccess::{check, copy_in, copy_out}
//! DEPENDS_ON: synapse_abi::{layout, Perm}
//! INVARIANTS: Frames are shared by reference count; every user mapping lies below UTOP and is
//!             page aligned; page-table pages are charged to the same frame pool as data pages

mod frame;
mod page_table;
pub mod uaccess;

pub use frame::{FrameAllocator, FrameId};
pub use page_table::{PageDirectory, Pte};
pub use uaccess::PageFault;

/// Errors reported by page-table operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    /// Address is not page aligned.
    #[error("address not page aligned")]
    Unaligned,
    /// Address lies at or above the user ceiling.
    #[error("address above user ceiling")]
    OutOfRange,
    /// No frame left for a page-table page.
    #[error("out of page-table memory")]
    OutOfMemory,
}

impl From<MapError> for synapse_abi::SysError {
    fn from(value: MapError) -> Self {
        match value {
            MapError::OutOfMemory => synapse_abi::SysError::NoMem,
            MapError::Unaligned | MapError::OutOfRange => synapse_abi::SysError::Inval,
        }
    }
}

#[cfg(test)]
mod tests;

#[cfg(test)]
mod tests_prop;

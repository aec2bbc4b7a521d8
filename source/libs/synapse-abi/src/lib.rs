// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: Shared ABI definitions between the synapse kernel core and user space
//! OWNERS: @runtime
//! PUBLIC API: Sysno, SysError, Perm, EnvId, EnvStatus, UTrapframe, layout constants
//! DEPENDS_ON: no_std, bitflags, static_assertions, thiserror
//! INVARIANTS: Negative return words are reserved for SysError codes; EnvId raw 0 means "caller";
//!             Perm construction rejects undefined bits

pub mod env;
pub mod error;
pub mod layout;
pub mod perm;
pub mod sysno;
pub mod utrap;

pub use env::{EnvId, EnvStatus};
pub use error::SysError;
pub use perm::Perm;
pub use sysno::Sysno;
pub use utrap::{UTrapframe, FEC_PR, FEC_U, FEC_WR};

/// Result type returned by ABI helpers and user-side syscall stubs.
pub type Result<T> = core::result::Result<T, SysError>;

/// Decodes a raw syscall return word.
///
/// Non-negative words are success values. Negative words map onto [`SysError`]; codes outside
/// the taxonomy decode as [`SysError::Inval`].
pub fn decode_return(word: isize) -> Result<usize> {
    if word >= 0 {
        Ok(word as usize)
    } else {
        Err(SysError::from_code(word).unwrap_or(SysError::Inval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_return_splits_on_sign() {
        assert_eq!(decode_return(0), Ok(0));
        assert_eq!(decode_return(4097), Ok(4097));
        assert_eq!(decode_return(SysError::IpcNotRecv.code()), Err(SysError::IpcNotRecv));
        assert_eq!(decode_return(-1), Err(SysError::Inval));
    }
}

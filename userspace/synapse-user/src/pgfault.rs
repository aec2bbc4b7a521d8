// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: User-level page-fault handling
//! OWNERS: @runtime
//! PUBLIC API: Process::set_pgfault_handler, cow_fault, PGFAULT_UPCALL
//! DEPENDS_ON: syscall stubs (page_alloc/page_map/page_unmap/env_set_pgfault_upcall)
//! INVARIANTS: Only a write to a COW-marked page is repaired; anything else is a user panic.
//!             The repaired page is private, writable and no longer COW

use synapse_abi::{
    layout::{round_down, PFTEMP, PGSIZE, UXSTACKTOP},
    Perm, UTrapframe,
};

use crate::{Process, Result};

/// Entry address of the library's upcall trampoline, registered with the kernel.
pub const PGFAULT_UPCALL: usize = 0x0080_0020;

/// A user page-fault handler, called on the exception stack with the fault record.
pub type PgfaultHandler = fn(&Process, &UTrapframe) -> Result<()>;

impl Process {
    /// Installs `handler`.
    ///
    /// The first installation allocates the exception stack and registers the upcall trampoline.
    pub fn set_pgfault_handler(&self, handler: PgfaultHandler) -> Result<()> {
        let first = self.globals.lock().pgfault_handler.is_none();
        if first {
            self.sys_page_alloc(None, UXSTACKTOP - PGSIZE, Perm::USER_RW)?;
            self.sys_env_set_pgfault_upcall(None, PGFAULT_UPCALL)?;
        }
        self.globals.lock().pgfault_handler = Some(handler);
        Ok(())
    }
}

/// Copy-on-write repair: gives the faulting page a private writable copy.
pub fn cow_fault(process: &Process, utf: &UTrapframe) -> Result<()> {
    let va = round_down(utf.fault_va);
    let cow = process.uvpt(va).is_some_and(|m| m.perm.is_cow());
    if !utf.is_write() || !cow {
        return Err(process.panic(format_args!(
            "page fault on va {:08x} err {:#x} ip {:08x}",
            utf.fault_va, utf.err, utf.pc
        )));
    }

    let copy = || -> Result<()> {
        process.sys_page_alloc(None, PFTEMP, Perm::USER_RW)?;
        let mut page = vec![0u8; PGSIZE];
        process.read(va, &mut page)?;
        process.write(PFTEMP, &page)?;
        process.sys_page_map(None, PFTEMP, None, va, Perm::USER_RW)?;
        process.sys_page_unmap(None, PFTEMP)
    };
    copy().map_err(|err| process.fatal("cow fault", err))?;
    log::trace!(target: "pgfault", "[{}] private copy of {va:08x}", process.id());
    Ok(())
}

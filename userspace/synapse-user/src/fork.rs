// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Process duplication built from exofork, page_map and the COW fault handler
//! OWNERS: @runtime
//! PUBLIC API: Process::{fork, sfork, dumbfork, duppage, resume_child, present_pages}
//! DEPENDS_ON: pgfault::cow_fault, syscall stubs
//! INVARIANTS: The exception stack is never shared: every child gets a fresh one.
//!             After duppage both sides of a writable page are COW, never just the child.
//!             A failed exofork is returned to the caller; any later failure is a user panic

use synapse::Mapping;
use synapse_abi::{
    layout::{page_va, pdx, pgnum, NPTENTRIES, PGSIZE, USTACKTOP, UTEMP, UTOP, UXSTACKTOP},
    EnvId, EnvStatus, Perm, SysError,
};

use crate::pgfault::{cow_fault, PGFAULT_UPCALL};
use crate::{Process, Result, UserError};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Sharing {
    // Every page copy-on-write.
    Cow,
    // Pages shared as they are; only the stack is copy-on-write.
    Shared,
}

impl Process {
    /// Every present page below `UTOP`, read through the page-table window.
    pub fn present_pages(&self) -> Vec<(usize, Mapping)> {
        let mut pages = Vec::new();
        for dir in 0..pdx(UTOP) {
            if !self.uvpd(dir) {
                continue;
            }
            for slot in 0..NPTENTRIES {
                let va = page_va(dir * NPTENTRIES + slot);
                if let Some(mapping) = self.uvpt(va) {
                    pages.push((va, mapping));
                }
            }
        }
        pages
    }

    /// Maps our page `pn` into `child` at the same address.
    ///
    /// Writable and COW pages become COW in the child and then in the caller too; anything else
    /// is shared read-only.
    pub fn duppage(&self, child: EnvId, pn: usize) -> Result<()> {
        let va = page_va(pn);
        let mapping = self.uvpt(va).ok_or(UserError::Sys(SysError::Inval))?;
        if mapping.perm.intersects(Perm::WRITE | Perm::COW) {
            let perm = Perm::REQUIRED | Perm::COW;
            self.sys_page_map(None, va, Some(child), va, perm)?;
            self.sys_page_map(None, va, None, va, perm)
        } else {
            self.sys_page_map(None, va, Some(child), va, Perm::REQUIRED)
        }
    }

    /// Copy-on-write fork. Returns the child handle; the child runs once resumed.
    pub fn fork(&self) -> Result<EnvId> {
        self.fork_with(Sharing::Cow)
    }

    /// Shared-memory fork: the child shares every page except its stack.
    pub fn sfork(&self) -> Result<EnvId> {
        self.fork_with(Sharing::Shared)
    }

    fn fork_with(&self, sharing: Sharing) -> Result<EnvId> {
        self.set_pgfault_handler(cow_fault)?;
        let child = self.sys_exofork()?;
        self.populate_child(child, sharing).map_err(|err| self.fatal("fork", err))?;
        log::info!(target: "fork", "[{}] forked {child}", self.id);
        Ok(child)
    }

    fn populate_child(&self, child: EnvId, sharing: Sharing) -> Result<()> {
        let xstack = UXSTACKTOP - PGSIZE;
        let stack = USTACKTOP - PGSIZE;
        for (va, mapping) in self.present_pages() {
            if va == xstack {
                continue;
            }
            match sharing {
                Sharing::Shared if va != stack => {
                    let perm = mapping.perm & Perm::SYSCALL;
                    self.sys_page_map(None, va, Some(child), va, perm)?;
                }
                _ => self.duppage(child, pgnum(va))?,
            }
        }
        self.sys_page_alloc(Some(child), xstack, Perm::USER_RW)?;
        self.sys_env_set_pgfault_upcall(Some(child), PGFAULT_UPCALL)?;
        self.sys_env_set_status(Some(child), EnvStatus::Runnable)
    }

    /// Eager fork: every present page is copied into the child through the `UTEMP` window.
    pub fn dumbfork(&self) -> Result<EnvId> {
        let child = self.sys_exofork()?;
        let copy = || -> Result<()> {
            for (va, _) in self.present_pages() {
                self.sys_page_alloc(Some(child), va, Perm::USER_RW)?;
                self.sys_page_map(Some(child), va, None, UTEMP, Perm::USER_RW)?;
                let mut page = vec![0u8; PGSIZE];
                self.read(va, &mut page)?;
                self.write(UTEMP, &page)?;
                self.sys_page_unmap(None, UTEMP)?;
            }
            self.sys_env_set_status(Some(child), EnvStatus::Runnable)
        };
        copy().map_err(|err| self.fatal("dumbfork", err))?;
        log::info!(target: "fork", "[{}] dumbforked {child}", self.id);
        Ok(child)
    }

    /// The child half of a fork: runs `child`, checks it is fresh out of exofork and fixes its
    /// `thisenv`. The returned process inherits our user globals.
    pub fn resume_child(&self, child: EnvId) -> Result<Process> {
        match self.kernel.status(child) {
            EnvStatus::Runnable => {}
            EnvStatus::NotRunnable => return Err(UserError::Blocked),
            EnvStatus::Free | EnvStatus::Dying => return Err(UserError::Exited),
        }
        let frame = self.kernel.run(child).ok_or(UserError::Exited)?;
        if frame.ret() != 0 {
            return Err(UserError::NotForked(child));
        }
        let globals = *self.globals.lock();
        let process = Process::with_globals(&self.kernel, child, globals);
        let me = process.sys_getenvid()?;
        process.globals.lock().thisenv = me;
        log::debug!(target: "fork", "[{me}] child running");
        Ok(process)
    }
}

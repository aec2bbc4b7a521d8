// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Running environment as seen from user mode.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use synapse::{mm::PageFault, Kernel, Mapping, Unhandled, UserImage};
use synapse_abi::{layout::PGSIZE, EnvId, UTrapframe};

use crate::pgfault::{PgfaultHandler, PGFAULT_UPCALL};
use crate::{Result, UserError};

/// User globals: the part of a program's data segment this library manages.
#[derive(Clone, Copy)]
pub(crate) struct Globals {
    pub(crate) thisenv: EnvId,
    pub(crate) pgfault_handler: Option<PgfaultHandler>,
}

/// A running environment.
///
/// `id` is who the processor is executing as; [`Process::thisenv`] is what the program believes,
/// which in a fresh fork child still names the parent until [`Process::resume_child`] fixes it.
pub struct Process {
    pub(crate) kernel: Arc<Kernel>,
    pub(crate) id: EnvId,
    pub(crate) globals: Mutex<Globals>,
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process").field("id", &self.id).finish_non_exhaustive()
    }
}

impl Process {
    /// Loads `image` as a new environment.
    pub fn spawn(kernel: &Arc<Kernel>, image: &UserImage) -> Result<Self> {
        let id = kernel.create_env(image)?;
        Ok(Self::attach(kernel, id))
    }

    /// Wraps an existing environment.
    pub fn attach(kernel: &Arc<Kernel>, id: EnvId) -> Self {
        Self {
            kernel: Arc::clone(kernel),
            id,
            globals: Mutex::new(Globals { thisenv: id, pgfault_handler: None }),
        }
    }

    pub(crate) fn with_globals(kernel: &Arc<Kernel>, id: EnvId, globals: Globals) -> Self {
        Self { kernel: Arc::clone(kernel), id, globals: Mutex::new(globals) }
    }

    /// Environment this process executes as.
    pub fn id(&self) -> EnvId {
        self.id
    }

    /// The program's own notion of its identity.
    pub fn thisenv(&self) -> EnvId {
        self.globals.lock().thisenv
    }

    /// Kernel this process runs on.
    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    /// Page-table entry for `va` through the read-only page-table window.
    pub fn uvpt(&self, va: usize) -> Option<Mapping> {
        self.kernel.lookup(self.id, va)
    }

    /// True if page-directory slot `pdx` is present.
    pub fn uvpd(&self, pdx: usize) -> bool {
        self.kernel.pde_present(self.id, pdx)
    }

    /// Loads `buf.len()` bytes from `va`, taking page faults as needed.
    pub fn read(&self, va: usize, buf: &mut [u8]) -> Result<()> {
        let budget = buf.len().div_ceil(PGSIZE) + 2;
        self.access(budget, || self.kernel.read_user(self.id, va, &mut *buf))
    }

    /// Stores `data` at `va`, taking page faults as needed.
    pub fn write(&self, va: usize, data: &[u8]) -> Result<()> {
        let budget = data.len().div_ceil(PGSIZE) + 2;
        self.access(budget, || self.kernel.write_user(self.id, va, data))
    }

    /// Reads one machine word.
    pub fn read_word(&self, va: usize) -> Result<usize> {
        let mut raw = [0u8; core::mem::size_of::<usize>()];
        self.read(va, &mut raw)?;
        Ok(usize::from_le_bytes(raw))
    }

    /// Writes one machine word.
    pub fn write_word(&self, va: usize, value: usize) -> Result<()> {
        self.write(va, &value.to_le_bytes())
    }

    fn access<F>(&self, budget: usize, mut op: F) -> Result<()>
    where
        F: FnMut() -> core::result::Result<(), PageFault>,
    {
        for _ in 0..budget {
            match op() {
                Ok(()) => return Ok(()),
                Err(fault) => self.take_fault(fault)?,
            }
        }
        Err(self.panic("page fault not resolved by handler"))
    }

    // Fault delivery plus the upcall trampoline: read the record, call the handler, resume.
    fn take_fault(&self, fault: PageFault) -> Result<()> {
        let upcall = self.kernel.page_fault(self.id, fault).map_err(|reason| match reason {
            Unhandled::Blocked => UserError::Blocked,
            reason => {
                log::warn!(target: "pgfault", "[{}] killed by fault at {:08x}: {reason}", self.id, fault.va);
                UserError::Killed(reason)
            }
        })?;
        if upcall.entry != PGFAULT_UPCALL {
            return Err(self.panic(format_args!("upcall entry {:08x} is not ours", upcall.entry)));
        }
        let mut raw = [0u8; UTrapframe::SIZE];
        if let Err(nested) = self.kernel.read_user(self.id, upcall.utf_va, &mut raw) {
            return Err(self.panic(format_args!("fault record unreadable at {:08x}", nested.va)));
        }
        let utf = UTrapframe::from_bytes(&raw);
        let handler = self.globals.lock().pgfault_handler;
        let Some(handler) = handler else {
            return Err(self.panic("page fault with no handler installed"));
        };
        handler(self, &utf)?;
        if !self.kernel.return_from_upcall(self.id, &utf) {
            return Err(UserError::Exited);
        }
        Ok(())
    }

    /// Fatal user condition: logs, destroys the environment and returns the error to surface.
    pub fn panic(&self, msg: impl fmt::Display) -> UserError {
        let msg = msg.to_string();
        log::error!(target: "user", "[{}] user panic: {msg}", self.id);
        if let Err(err) = self.sys_env_destroy(None) {
            log::debug!(target: "user", "[{}] destroy after panic: {err}", self.id);
        }
        UserError::Panic(msg)
    }

    /// Escalates `err` to a panic unless the environment is already gone.
    pub(crate) fn fatal(&self, what: &str, err: UserError) -> UserError {
        if err.is_fatal() {
            err
        } else {
            self.panic(format_args!("{what}: {err}"))
        }
    }
}

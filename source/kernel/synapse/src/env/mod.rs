// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Environment (process) table with generation-tagged handles
//! OWNERS: @kernel-team
//! PUBLIC API: EnvTable (alloc/resolve/get/get_mut/destroy/reap), Env, Mailbox, IpcState, EnvError
//! DEPENDS_ON: mm::{FrameAllocator, PageDirectory}, trap::TrapFrame, synapse_abi::{EnvId, EnvStatus}
//! INVARIANTS: A handle resolves only while its generation matches the slot; Dying and Free
//!             environments never resolve; slots are reused most-recently-freed first

extern crate alloc;

use alloc::vec::Vec;

use synapse_abi::{EnvId, EnvStatus, Perm, SysError};

use crate::mm::{FrameAllocator, PageDirectory};
use crate::trap::TrapFrame;

/// Rendezvous state of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpcState {
    /// Not waiting for a message.
    #[default]
    Idle,
    /// Blocked in receive, any sender accepted.
    WaitingAny,
    /// Blocked in receive, only the sender whose raw handle equals this word is accepted.
    ///
    /// The word is kept as given; one that names no live environment blocks until the receiver is
    /// destroyed.
    WaitingFor(usize),
}

impl IpcState {
    /// True while blocked in a receive.
    pub const fn is_waiting(self) -> bool {
        !matches!(self, IpcState::Idle)
    }

    /// True if `sender` may complete this wait.
    pub fn accepts(self, sender: EnvId) -> bool {
        match self {
            IpcState::Idle => false,
            IpcState::WaitingAny => true,
            IpcState::WaitingFor(expected) => expected == sender.raw(),
        }
    }
}

/// Single-slot IPC mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mailbox {
    /// Current wait state.
    pub state: IpcState,
    /// Where a transferred page should land, if the receiver wants one.
    pub dst_va: Option<usize>,
    /// Sender of the last delivered message.
    pub from: Option<EnvId>,
    /// Value of the last delivered message.
    pub value: usize,
    /// Permission of the page delivered with the last message, if one was transferred.
    pub perm: Option<Perm>,
}

/// Errors from environment-table operations.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnvError {
    /// Handle is stale, unknown, or not owned by the caller.
    #[error("bad environment")]
    BadEnv,
    /// Every slot is in use.
    #[error("no free environment")]
    NoFreeEnv,
    /// No frame for the new page directory.
    #[error("out of memory")]
    NoMem,
}

impl From<EnvError> for SysError {
    fn from(value: EnvError) -> Self {
        match value {
            EnvError::BadEnv => SysError::BadEnv,
            EnvError::NoFreeEnv => SysError::NoFreeEnv,
            EnvError::NoMem => SysError::NoMem,
        }
    }
}

/// An environment.
pub struct Env {
    /// Handle of this instance.
    pub id: EnvId,
    /// Creator, if any. The creator may manipulate this environment.
    pub parent: Option<EnvId>,
    /// Scheduling status.
    pub status: EnvStatus,
    /// Saved user registers.
    pub frame: TrapFrame,
    /// Address space.
    pub pgdir: PageDirectory,
    /// User-mode page-fault entry point.
    pub pgfault_upcall: Option<usize>,
    /// IPC state.
    pub ipc: Mailbox,
    /// Times this environment was switched to.
    pub runs: u64,
}

struct Slot {
    generation: u32,
    env: Option<Env>,
}

/// Arena of environment slots.
pub struct EnvTable {
    slots: Vec<Slot>,
    // Free slot indices; the next one to hand out is on top.
    free: Vec<usize>,
}

impl EnvTable {
    /// Creates a table with `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| Slot { generation: 0, env: None }).collect();
        let free = (0..capacity).rev().collect();
        Self { slots, free }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Allocates a fresh environment in state `NotRunnable` with an empty address space.
    pub fn alloc(
        &mut self,
        frames: &mut FrameAllocator,
        parent: Option<EnvId>,
    ) -> Result<EnvId, EnvError> {
        let index = *self.free.last().ok_or(EnvError::NoFreeEnv)?;
        let generation = EnvId::next_generation(self.slots[index].generation);
        let id = EnvId::new(index, generation).ok_or(EnvError::NoFreeEnv)?;
        let pgdir = PageDirectory::new(frames).map_err(|_| EnvError::NoMem)?;
        self.free.pop();
        let slot = &mut self.slots[index];
        slot.generation = generation;
        slot.env = Some(Env {
            id,
            parent,
            status: EnvStatus::NotRunnable,
            frame: TrapFrame::default(),
            pgdir,
            pgfault_upcall: None,
            ipc: Mailbox::default(),
            runs: 0,
        });
        match parent {
            Some(parent) => log::info!(target: "env", "[{parent}] new env {id}"),
            None => log::info!(target: "env", "[00000000] new env {id}"),
        }
        Ok(id)
    }

    fn slot_env(&self, id: EnvId) -> Option<&Env> {
        self.slots.get(id.index())?.env.as_ref().filter(|env| env.id == id)
    }

    /// Looks up a live (not Free, not Dying) environment.
    pub fn get(&self, id: EnvId) -> Option<&Env> {
        self.slot_env(id).filter(|env| env.status != EnvStatus::Dying)
    }

    /// Mutable variant of [`EnvTable::get`].
    pub fn get_mut(&mut self, id: EnvId) -> Option<&mut Env> {
        self.slots
            .get_mut(id.index())?
            .env
            .as_mut()
            .filter(|env| env.id == id && env.status != EnvStatus::Dying)
    }

    /// Status of the instance named by `id`; `Free` once the handle is stale.
    pub fn status(&self, id: EnvId) -> EnvStatus {
        self.slot_env(id).map_or(EnvStatus::Free, |env| env.status)
    }

    /// True if `id` is live and runnable.
    pub fn is_runnable(&self, id: EnvId) -> bool {
        self.status(id) == EnvStatus::Runnable
    }

    /// Converts a raw handle argument into a live environment handle.
    ///
    /// Raw `0` names `caller`. With `check_owner`, the target must be `caller` itself or an
    /// environment whose parent is `caller`.
    pub fn resolve(&self, raw: usize, caller: EnvId, check_owner: bool) -> Result<EnvId, EnvError> {
        if raw == 0 {
            return self.get(caller).map(|env| env.id).ok_or(EnvError::BadEnv);
        }
        let id = EnvId::from_raw(raw).ok_or(EnvError::BadEnv)?;
        let env = self.get(id).ok_or(EnvError::BadEnv)?;
        if check_owner && env.id != caller && env.parent != Some(caller) {
            log::debug!(target: "env", "[{caller}] denied access to {id}");
            return Err(EnvError::BadEnv);
        }
        Ok(env.id)
    }

    /// Destroys `id`, reclaiming its address space.
    ///
    /// A `running` environment cannot release its slot while it is still on the processor: it
    /// becomes `Dying` and the slot is freed by the next [`EnvTable::reap`].
    pub fn destroy(&mut self, frames: &mut FrameAllocator, id: EnvId, running: bool) {
        let Some(slot) = self.slots.get_mut(id.index()) else {
            return;
        };
        let Some(env) = slot.env.as_mut().filter(|env| env.id == id) else {
            return;
        };
        env.pgdir.teardown(frames);
        env.ipc = Mailbox::default();
        if running {
            env.status = EnvStatus::Dying;
        } else {
            slot.env = None;
            self.free.push(id.index());
        }
        log::info!(target: "env", "free env {id}");
    }

    /// Releases the slots of every Dying environment.
    pub fn reap(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.env.as_ref().is_some_and(|env| env.status == EnvStatus::Dying) {
                slot.env = None;
                self.free.push(index);
            }
        }
    }

    /// Live environments in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Env> + '_ {
        self.slots
            .iter()
            .filter_map(|slot| slot.env.as_ref())
            .filter(|env| env.status != EnvStatus::Dying)
    }
}

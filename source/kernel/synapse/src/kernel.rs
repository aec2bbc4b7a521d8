// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel façade owning all mutable kernel state behind the big kernel lock
//! OWNERS: @kernel-team
//! PUBLIC API: Kernel (new/create_env/syscall/run/schedule/read_user/write_user/page_fault/
//!             return_from_upcall/env_view/lookup/pde_present), Completion, UserImage, Segment
//! DEPENDS_ON: env, mm, sched, syscall, trap, console, config
//! INVARIANTS: Every entry point holds the lock for its whole body; only a Runnable environment
//!             executes; a Dying environment's slot is reclaimed at the next reschedule

extern crate alloc;

use alloc::{boxed::Box, vec::Vec};

use spin::Mutex;
use synapse_abi::{
    layout::{round_down, PGSIZE, USTACKTOP, UTOP},
    EnvId, EnvStatus, Perm, SysError, UTrapframe,
};

use crate::{
    config::{ConfigError, KernelConfig},
    console::Console,
    env::{EnvTable, Mailbox},
    mm::{uaccess, FrameAllocator, PageFault},
    sched::{RunQueue, Scheduler},
    syscall::{api::Context, Args, SyscallTable},
    trap::{self, TrapFrame, Unhandled, Upcall},
};

/// What the trapping environment observes when a syscall finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The environment continues with this value in its return register.
    Return(isize),
    /// The environment is suspended; its result is produced when something resumes it.
    Blocked,
    /// The environment no longer exists.
    Exited,
}

/// One loadable region of a user program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Start address.
    pub va: usize,
    /// Initialized bytes at `va`.
    pub data: Vec<u8>,
    /// Size in memory; the tail past `data` is zero-filled.
    pub mem_size: usize,
    /// Map writable.
    pub writable: bool,
}

/// A user program handed to [`Kernel::create_env`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserImage {
    /// Initial program counter.
    pub entry: usize,
    /// Regions to map.
    pub segments: Vec<Segment>,
}

impl UserImage {
    /// Empty image starting at `entry`.
    pub fn new(entry: usize) -> Self {
        Self { entry, segments: Vec::new() }
    }

    /// Adds a segment whose memory size equals its data.
    pub fn segment(mut self, va: usize, data: &[u8], writable: bool) -> Self {
        self.segments.push(Segment { va, data: data.to_vec(), mem_size: data.len(), writable });
        self
    }

    /// Adds a zero-filled segment.
    pub fn zeroed(mut self, va: usize, mem_size: usize, writable: bool) -> Self {
        self.segments.push(Segment { va, data: Vec::new(), mem_size, writable });
        self
    }
}

/// Read-only snapshot of an environment, as user code sees it through the environment window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvView {
    /// Handle.
    pub id: EnvId,
    /// Creator.
    pub parent: Option<EnvId>,
    /// Status.
    pub status: EnvStatus,
    /// Registered page-fault upcall.
    pub pgfault_upcall: Option<usize>,
    /// IPC mailbox.
    pub ipc: Mailbox,
    /// Saved registers.
    pub frame: TrapFrame,
    /// Times switched to.
    pub runs: u64,
}

/// Page-table entry as exposed through the self-mapped page-table window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    /// Physical page number.
    pub ppn: usize,
    /// Permission bits.
    pub perm: Perm,
}

struct KernelState {
    frames: FrameAllocator,
    envs: EnvTable,
    scheduler: Box<dyn Scheduler>,
    console: Console,
    current: Option<EnvId>,
}

impl KernelState {
    fn context(&mut self, caller: EnvId) -> Context<'_> {
        Context {
            caller,
            envs: &mut self.envs,
            frames: &mut self.frames,
            scheduler: &mut *self.scheduler,
            console: &mut self.console,
        }
    }

    fn enter(&mut self, id: EnvId) {
        self.current = Some(id);
        if let Some(env) = self.envs.get_mut(id) {
            env.runs += 1;
        }
        log::trace!(target: "sched", "run {id}");
    }

    // env_run: the previous environment, if still runnable, goes back in line.
    fn switch_to(&mut self, id: EnvId) {
        if self.current == Some(id) {
            return;
        }
        if let Some(prev) = self.current.filter(|prev| self.envs.is_runnable(*prev)) {
            self.scheduler.enqueue(prev);
        }
        self.scheduler.purge(id);
        self.enter(id);
    }

    // sched_yield: reclaims Dying slots and picks the next environment.
    fn reschedule(&mut self) -> Option<EnvId> {
        self.envs.reap();
        let next = self.scheduler.pick_next(&self.envs, self.current);
        self.current = None;
        if let Some(next) = next {
            self.enter(next);
        }
        next
    }

    fn set_return(&mut self, id: EnvId, value: usize) {
        if let Some(env) = self.envs.get_mut(id) {
            env.frame.set_ret(value);
        }
    }

    fn completion(&self, id: EnvId) -> Completion {
        match self.envs.get(id) {
            Some(env) if env.status == EnvStatus::Runnable => {
                Completion::Return(env.frame.ret() as isize)
            }
            Some(_) => Completion::Blocked,
            None => Completion::Exited,
        }
    }

    fn kill(&mut self, id: EnvId) {
        let running = self.current == Some(id);
        self.scheduler.purge(id);
        self.envs.destroy(&mut self.frames, id, running);
        if running {
            self.reschedule();
        }
    }

    fn load(&mut self, id: EnvId, image: &UserImage) -> Result<(), SysError> {
        let env = self.envs.get_mut(id).ok_or(SysError::BadEnv)?;
        let frames = &mut self.frames;
        for seg in &image.segments {
            let end = seg
                .va
                .checked_add(seg.mem_size)
                .filter(|end| *end <= UTOP && seg.data.len() <= seg.mem_size)
                .ok_or(SysError::Inval)?;
            let perm = if seg.writable { Perm::USER_RW } else { Perm::REQUIRED };
            let mut page = round_down(seg.va);
            while page < end {
                match env.pgdir.lookup(page) {
                    Some(pte) if perm.writable() && !pte.perm.writable() => {
                        env.pgdir.insert(frames, pte.frame, page, pte.perm | Perm::WRITE)?;
                    }
                    Some(_) => {}
                    None => {
                        let frame = frames.alloc(true).ok_or(SysError::NoMem)?;
                        if let Err(err) = env.pgdir.insert(frames, frame, page, perm) {
                            frames.release_unused(frame);
                            return Err(err.into());
                        }
                    }
                }
                page += PGSIZE;
            }
            uaccess::poke(&env.pgdir, frames, seg.va, &seg.data).map_err(|_| SysError::Inval)?;
        }

        let stack = frames.alloc(true).ok_or(SysError::NoMem)?;
        if let Err(err) = env.pgdir.insert(frames, stack, USTACKTOP - PGSIZE, Perm::USER_RW) {
            frames.release_unused(stack);
            return Err(err.into());
        }
        env.frame.pc = image.entry;
        env.frame.sp = USTACKTOP;
        env.status = EnvStatus::Runnable;
        Ok(())
    }
}

/// The kernel: environment table, frame pool, scheduler and syscall table behind one lock.
pub struct Kernel {
    state: Mutex<KernelState>,
    table: SyscallTable,
}

impl Kernel {
    /// Boots a kernel with the round-robin scheduler.
    pub fn new(config: KernelConfig) -> Result<Self, ConfigError> {
        Self::with_scheduler(config, Box::new(RunQueue::new()))
    }

    /// Boots a kernel with a caller-provided scheduler.
    pub fn with_scheduler(
        config: KernelConfig,
        scheduler: Box<dyn Scheduler>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        log::info!(
            target: "boot",
            "synapse: {} env slots, {} frames ({} KiB)",
            config.max_envs,
            config.phys_pages,
            config.phys_pages * PGSIZE / 1024
        );
        Ok(Self {
            state: Mutex::new(KernelState {
                frames: FrameAllocator::new(config.phys_pages),
                envs: EnvTable::new(config.max_envs),
                scheduler,
                console: Console::new(),
                current: None,
            }),
            table: SyscallTable::with_default_handlers(),
        })
    }

    /// Creates a runnable environment from `image`, with one stack page below `USTACKTOP`.
    pub fn create_env(&self, image: &UserImage) -> Result<EnvId, SysError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let id = state.envs.alloc(&mut state.frames, None)?;
        if let Err(err) = state.load(id, image) {
            state.envs.destroy(&mut state.frames, id, false);
            return Err(err);
        }
        state.scheduler.enqueue(id);
        log::info!(target: "env", "[{id}] loaded, entry {:08x}", image.entry);
        Ok(id)
    }

    /// Trap entry for a syscall issued by `caller`.
    ///
    /// Only a Runnable environment can execute; a blocked one gets [`Completion::Blocked`] and a
    /// dead one [`Completion::Exited`] without anything being dispatched.
    pub fn syscall(&self, caller: EnvId, number: usize, args: [usize; 5]) -> Completion {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match state.envs.status(caller) {
            EnvStatus::Runnable => {}
            EnvStatus::NotRunnable => return Completion::Blocked,
            EnvStatus::Free | EnvStatus::Dying => return Completion::Exited,
        }
        state.switch_to(caller);
        if let Some(env) = state.envs.get_mut(caller) {
            env.frame.save_syscall(number, &args);
        }

        let result = self.table.dispatch(number, &mut state.context(caller), &Args::new(args));
        let mut resched = false;
        match result {
            Ok(value) => state.set_return(caller, value),
            Err(err) => match err.code() {
                Some(code) => {
                    log::debug!(target: "syscall", "[{caller}] syscall {number} failed: {err}");
                    state.set_return(caller, code as usize);
                }
                None => resched = true,
            },
        }
        if resched || !state.envs.is_runnable(caller) {
            state.reschedule();
        }
        state.completion(caller)
    }

    /// Makes a Runnable environment current and returns its saved registers.
    pub fn run(&self, id: EnvId) -> Option<TrapFrame> {
        let mut state = self.state.lock();
        if !state.envs.is_runnable(id) {
            return None;
        }
        state.switch_to(id);
        state.envs.get(id).map(|env| env.frame)
    }

    /// Lets the scheduler pick the next environment; returns it.
    pub fn schedule(&self) -> Option<EnvId> {
        self.state.lock().reschedule()
    }

    /// Environment currently on the processor.
    pub fn current(&self) -> Option<EnvId> {
        self.state.lock().current
    }

    /// User-mode load from `env`'s address space. Only a Runnable environment executes loads.
    pub fn read_user(&self, env: EnvId, va: usize, buf: &mut [u8]) -> Result<(), PageFault> {
        let state = self.state.lock();
        let Some(e) = state.envs.get(env).filter(|e| e.status == EnvStatus::Runnable) else {
            return Err(PageFault { va, err: synapse_abi::FEC_U });
        };
        uaccess::copy_in(&e.pgdir, &state.frames, va, buf)
    }

    /// User-mode store into `env`'s address space. Nothing is written if any page faults, or if
    /// `env` is not Runnable.
    pub fn write_user(&self, env: EnvId, va: usize, data: &[u8]) -> Result<(), PageFault> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(e) = state.envs.get(env).filter(|e| e.status == EnvStatus::Runnable) else {
            return Err(PageFault { va, err: synapse_abi::FEC_U | synapse_abi::FEC_WR });
        };
        uaccess::copy_out(&e.pgdir, &mut state.frames, va, data)
    }

    /// Delivers a user page fault.
    ///
    /// On success the environment must run its upcall at [`Upcall::entry`] with the fault record
    /// at [`Upcall::utf_va`]. [`Unhandled::Blocked`] leaves a NotRunnable environment untouched;
    /// any other error means the environment has been destroyed.
    pub fn page_fault(&self, env: EnvId, fault: PageFault) -> Result<Upcall, Unhandled> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match state.envs.status(env) {
            EnvStatus::Runnable => {}
            EnvStatus::NotRunnable => return Err(Unhandled::Blocked),
            EnvStatus::Free | EnvStatus::Dying => return Err(Unhandled::Gone),
        }
        state.switch_to(env);
        match trap::reflect_page_fault(&mut state.envs, &mut state.frames, env, fault) {
            Ok(upcall) => {
                log::debug!(target: "trap", "[{env}] page fault va {:08x} err {:#x}", fault.va, fault.err);
                Ok(upcall)
            }
            Err(reason) => {
                let pc = state.envs.get(env).map_or(0, |e| e.frame.pc);
                log::warn!(
                    target: "trap",
                    "[{env}] user fault va {:08x} ip {pc:08x}: {reason}",
                    fault.va
                );
                state.kill(env);
                Err(reason)
            }
        }
    }

    /// Resumes the interrupted context recorded in `utf` after an upcall returns.
    pub fn return_from_upcall(&self, env: EnvId, utf: &UTrapframe) -> bool {
        let mut state = self.state.lock();
        match state.envs.get_mut(env) {
            Some(e) => {
                trap::restore_from_upcall(&mut e.frame, utf);
                true
            }
            None => false,
        }
    }

    /// Snapshot of a live environment.
    pub fn env_view(&self, id: EnvId) -> Option<EnvView> {
        let state = self.state.lock();
        state.envs.get(id).map(|env| EnvView {
            id: env.id,
            parent: env.parent,
            status: env.status,
            pgfault_upcall: env.pgfault_upcall,
            ipc: env.ipc,
            frame: env.frame,
            runs: env.runs,
        })
    }

    /// Status of `id`; `Free` for stale handles.
    pub fn status(&self, id: EnvId) -> EnvStatus {
        self.state.lock().envs.status(id)
    }

    /// Page-table entry for `va` in `env`.
    pub fn lookup(&self, env: EnvId, va: usize) -> Option<Mapping> {
        let state = self.state.lock();
        let pte = state.envs.get(env)?.pgdir.lookup(round_down(va))?;
        Some(Mapping { ppn: pte.frame.ppn(), perm: pte.perm })
    }

    /// True if directory slot `pdx` of `env` points at a page table.
    pub fn pde_present(&self, env: EnvId, pdx: usize) -> bool {
        let state = self.state.lock();
        state.envs.get(env).is_some_and(|e| e.pgdir.pde_present(pdx))
    }

    /// Every present mapping of `env`, in address order.
    pub fn mappings(&self, env: EnvId) -> Vec<(usize, Mapping)> {
        let state = self.state.lock();
        state.envs.get(env).map_or_else(Vec::new, |e| {
            e.pgdir
                .mappings()
                .map(|(va, pte)| (va, Mapping { ppn: pte.frame.ppn(), perm: pte.perm }))
                .collect()
        })
    }

    /// Number of mappings referencing physical page `ppn`.
    pub fn frame_refcount(&self, ppn: usize) -> u32 {
        let state = self.state.lock();
        state.frames.frame_at(ppn).map_or(0, |frame| state.frames.refcount(frame))
    }

    /// Frames on the free list.
    pub fn free_frames(&self) -> usize {
        self.state.lock().frames.free_count()
    }

    /// Live environments.
    pub fn env_count(&self) -> usize {
        self.state.lock().envs.iter().count()
    }

    /// Console output captured so far.
    pub fn console_output(&self) -> Vec<u8> {
        self.state.lock().console.output().to_vec()
    }

    /// Drains captured console output; later writes start from an empty buffer.
    pub fn take_console_output(&self) -> Vec<u8> {
        self.state.lock().console.take()
    }
}

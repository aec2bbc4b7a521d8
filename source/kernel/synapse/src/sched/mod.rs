// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Scheduler collaborator used by the syscall trap-exit path
//! OWNERS: @kernel-sched-team
//! PUBLIC API: Scheduler (enqueue/purge/pick_next), RunQueue
//! DEPENDS_ON: env::EnvTable
//! INVARIANTS: pick_next only returns Runnable environments; stale queue entries are dropped
//!             lazily; a still-runnable current environment goes to the back of the queue

extern crate alloc;

use alloc::collections::VecDeque;

use synapse_abi::EnvId;

use crate::env::EnvTable;

/// Chooses which environment runs next.
///
/// The kernel calls [`Scheduler::enqueue`] whenever an environment becomes runnable and
/// [`Scheduler::purge`] when one stops being eligible. Policy is up to the implementation.
pub trait Scheduler: Send {
    /// Marks `id` as ready to run.
    fn enqueue(&mut self, id: EnvId);

    /// Forgets `id`.
    fn purge(&mut self, id: EnvId);

    /// Picks the environment to run after `current` gives up the processor.
    fn pick_next(&mut self, envs: &EnvTable, current: Option<EnvId>) -> Option<EnvId>;
}

/// FIFO round-robin run queue.
#[derive(Debug, Default)]
pub struct RunQueue {
    queue: VecDeque<EnvId>,
}

impl RunQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self { queue: VecDeque::new() }
    }

    /// Number of queued entries, stale ones included.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Scheduler for RunQueue {
    fn enqueue(&mut self, id: EnvId) {
        if !self.queue.contains(&id) {
            self.queue.push_back(id);
        }
    }

    fn purge(&mut self, id: EnvId) {
        self.queue.retain(|queued| *queued != id);
    }

    fn pick_next(&mut self, envs: &EnvTable, current: Option<EnvId>) -> Option<EnvId> {
        if let Some(current) = current.filter(|id| envs.is_runnable(*id)) {
            self.enqueue(current);
        }
        while let Some(id) = self.queue.pop_front() {
            if envs.is_runnable(id) {
                return Some(id);
            }
            log::trace!(target: "sched", "dropping stale entry {id}");
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::FrameAllocator;
    use synapse_abi::EnvStatus;

    fn runnable(envs: &mut EnvTable, frames: &mut FrameAllocator) -> EnvId {
        let id = envs.alloc(frames, None).expect("env");
        envs.get_mut(id).expect("live").status = EnvStatus::Runnable;
        id
    }

    #[test]
    fn rotates_in_fifo_order() {
        let mut frames = FrameAllocator::new(16);
        let mut envs = EnvTable::new(4);
        let a = runnable(&mut envs, &mut frames);
        let b = runnable(&mut envs, &mut frames);
        let mut rq = RunQueue::new();
        rq.enqueue(b);
        assert_eq!(rq.pick_next(&envs, Some(a)), Some(b));
        assert_eq!(rq.pick_next(&envs, Some(b)), Some(a));
    }

    #[test]
    fn current_keeps_running_when_alone() {
        let mut frames = FrameAllocator::new(16);
        let mut envs = EnvTable::new(4);
        let a = runnable(&mut envs, &mut frames);
        let mut rq = RunQueue::new();
        assert_eq!(rq.pick_next(&envs, Some(a)), Some(a));
        assert!(rq.is_empty());
    }

    #[test]
    fn skips_environments_that_stopped_being_runnable() {
        let mut frames = FrameAllocator::new(16);
        let mut envs = EnvTable::new(4);
        let a = runnable(&mut envs, &mut frames);
        let b = runnable(&mut envs, &mut frames);
        let mut rq = RunQueue::new();
        rq.enqueue(a);
        rq.enqueue(b);
        envs.get_mut(a).expect("live").status = EnvStatus::NotRunnable;
        assert_eq!(rq.pick_next(&envs, None), Some(b));
        assert_eq!(rq.pick_next(&envs, None), None);
    }

    #[test]
    fn enqueue_is_deduplicated() {
        let id = EnvId::new(1, 1).expect("id");
        let mut rq = RunQueue::new();
        rq.enqueue(id);
        rq.enqueue(id);
        assert_eq!(rq.len(), 1);
        rq.purge(id);
        assert!(rq.is_empty());
    }
}

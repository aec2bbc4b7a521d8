// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Cooperative driver for groups of environments.
//!
//! Each [`Worker`] is one environment's program written as a state machine. The driver steps them
//! round-robin, which stands in for the time slicing the environments would get on hardware.

use std::task::Poll;

use crate::{Result, UserError};

/// One environment's program.
pub trait Worker {
    /// Runs until the next suspension point. `Ready` means the program is done.
    fn step(&mut self) -> Result<Poll<()>>;
}

/// Round-robin driver.
pub struct Pipeline<'a> {
    workers: Vec<Box<dyn Worker + 'a>>,
    max_rounds: usize,
}

impl<'a> Pipeline<'a> {
    /// Empty pipeline giving up after `max_rounds`.
    pub fn new(max_rounds: usize) -> Self {
        Self { workers: Vec::new(), max_rounds }
    }

    /// Adds a worker; workers are stepped in insertion order.
    pub fn add(&mut self, worker: impl Worker + 'a) -> &mut Self {
        self.workers.push(Box::new(worker));
        self
    }

    /// Number of workers.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// True if no worker was added.
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Steps every unfinished worker once per round until all are done.
    ///
    /// Returns the number of rounds used. The first worker error aborts the run.
    pub fn run(&mut self) -> Result<usize> {
        let mut done = vec![false; self.workers.len()];
        for round in 1..=self.max_rounds {
            for (worker, finished) in self.workers.iter_mut().zip(done.iter_mut()) {
                if !*finished && worker.step()?.is_ready() {
                    *finished = true;
                }
            }
            if done.iter().all(|finished| *finished) {
                log::debug!(target: "pipeline", "{} workers finished in {round} rounds", done.len());
                return Ok(round);
            }
        }
        Err(UserError::Stalled { rounds: self.max_rounds })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Countdown {
        left: usize,
        steps: usize,
    }

    impl Worker for &mut Countdown {
        fn step(&mut self) -> Result<Poll<()>> {
            self.steps += 1;
            if self.left == 0 {
                return Ok(Poll::Ready(()));
            }
            self.left -= 1;
            Ok(Poll::Pending)
        }
    }

    #[test]
    fn finished_workers_are_not_stepped_again() {
        let mut short = Countdown { left: 1, steps: 0 };
        let mut long = Countdown { left: 4, steps: 0 };
        let mut pipeline = Pipeline::new(10);
        pipeline.add(&mut short).add(&mut long);
        assert_eq!(pipeline.run(), Ok(5));
        drop(pipeline);
        assert_eq!(short.steps, 2);
        assert_eq!(long.steps, 5);
    }

    #[test]
    fn gives_up_after_round_limit() {
        let mut stuck = Countdown { left: usize::MAX, steps: 0 };
        let mut pipeline = Pipeline::new(3);
        pipeline.add(&mut stuck);
        assert_eq!(pipeline.run(), Err(UserError::Stalled { rounds: 3 }));
    }

    #[test]
    fn empty_pipeline_finishes_immediately() {
        let mut pipeline = Pipeline::new(1);
        assert!(pipeline.is_empty());
        assert_eq!(pipeline.run(), Ok(1));
    }

    struct Failing;

    impl Worker for Failing {
        fn step(&mut self) -> Result<Poll<()>> {
            Err(UserError::Exited)
        }
    }

    #[test]
    fn worker_errors_abort_the_run() {
        let mut pipeline = Pipeline::new(5);
        pipeline.add(Failing);
        assert_eq!(pipeline.run(), Err(UserError::Exited));
    }
}

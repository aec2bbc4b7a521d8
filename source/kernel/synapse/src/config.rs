// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Boot-time sizing knobs.

use static_assertions::const_assert;
use synapse_abi::env::MAX_ENVS;

/// Default number of environment slots.
pub const DEFAULT_MAX_ENVS: usize = 1024;
/// Default size of the physical frame pool (32 MiB).
pub const DEFAULT_PHYS_PAGES: usize = 8192;
/// Frames one minimal environment needs: directory, table page, text page, stack page.
pub const MIN_PHYS_PAGES: usize = 4;

const_assert!(DEFAULT_MAX_ENVS <= MAX_ENVS);
const_assert!(MIN_PHYS_PAGES <= DEFAULT_PHYS_PAGES);

/// Kernel configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Environment table capacity.
    pub max_envs: usize,
    /// Physical frames available to user address spaces and their page tables.
    pub phys_pages: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self { max_envs: DEFAULT_MAX_ENVS, phys_pages: DEFAULT_PHYS_PAGES }
    }
}

/// Rejected configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// No environment slots.
    #[error("max_envs must be at least 1")]
    NoEnvs,
    /// More slots than an environment handle can index.
    #[error("max_envs {requested} exceeds handle limit {limit}")]
    TooManyEnvs {
        /// Requested capacity.
        requested: usize,
        /// Largest supported capacity.
        limit: usize,
    },
    /// Not enough frames to run even one environment.
    #[error("phys_pages {requested} below minimum {minimum}")]
    TooFewPages {
        /// Requested pool size.
        requested: usize,
        /// Smallest usable pool.
        minimum: usize,
    },
}

impl KernelConfig {
    /// Sets the environment table capacity.
    pub const fn with_max_envs(mut self, max_envs: usize) -> Self {
        self.max_envs = max_envs;
        self
    }

    /// Sets the frame pool size.
    pub const fn with_phys_pages(mut self, phys_pages: usize) -> Self {
        self.phys_pages = phys_pages;
        self
    }

    /// Checks the knobs against hard limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_envs == 0 {
            return Err(ConfigError::NoEnvs);
        }
        if self.max_envs > MAX_ENVS {
            return Err(ConfigError::TooManyEnvs { requested: self.max_envs, limit: MAX_ENVS });
        }
        if self.phys_pages < MIN_PHYS_PAGES {
            return Err(ConfigError::TooFewPages {
                requested: self.phys_pages,
                minimum: MIN_PHYS_PAGES,
            });
        }
        Ok(())
    }
}

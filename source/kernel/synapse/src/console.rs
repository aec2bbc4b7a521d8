// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Kernel console sink for `cputs`.

extern crate alloc;

use alloc::vec::Vec;

/// Captured console output. Each completed line is also logged on target `console`.
#[derive(Default)]
pub struct Console {
    output: Vec<u8>,
    line: Vec<u8>,
}

impl Console {
    /// Creates an empty console.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes written by an environment.
    pub fn write(&mut self, bytes: &[u8]) {
        self.output.extend_from_slice(bytes);
        for &byte in bytes {
            if byte == b'\n' {
                self.flush_line();
            } else {
                self.line.push(byte);
            }
        }
    }

    fn flush_line(&mut self) {
        let line = core::mem::take(&mut self.line);
        log::info!(target: "console", "{}", core::str::from_utf8(&line).unwrap_or("<non-utf8>"));
    }

    /// Everything written so far.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Drains the captured output.
    pub fn take(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.output)
    }
}

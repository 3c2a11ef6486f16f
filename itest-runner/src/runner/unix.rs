// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use libc::{SIGKILL, SIGTERM};
use std::os::unix::process::{CommandExt, ExitStatusExt};

/// Pre-execution configuration on Unix.
///
/// This sets up just the process group ID.
pub(super) fn set_process_group(cmd: &mut std::process::Command) {
    cmd.process_group(0);
}

/// Asks the test's process group to exit.
pub(super) fn request_terminate(child: &mut tokio::process::Child) {
    if let Some(pid) = child.id() {
        unsafe {
            // We set up a process group in set_process_group -- now send a signal to that group.
            libc::kill(-(pid as i32), SIGTERM);
        }
    }
    // Otherwise the child exited already -- don't send a signal.
}

/// Returns the signal that terminated the process, if any.
pub(super) fn abort_signal(status: std::process::ExitStatus) -> Option<i32> {
    status.signal()
}

/// Kills the test's entire process group when dropped, unless disarmed.
///
/// `kill_on_drop` only reaches the direct child. This also reaches anything the test spawned.
#[derive(Debug)]
pub(super) struct ProcessGroupGuard {
    pgid: Option<i32>,
}

impl ProcessGroupGuard {
    pub(super) fn new(child: &tokio::process::Child) -> Self {
        Self {
            pgid: child.id().map(|pid| pid as i32),
        }
    }

    /// Called once the process has been reaped.
    pub(super) fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid {
            unsafe {
                // Send SIGKILL to the entire process group.
                libc::kill(-pgid, SIGKILL);
            }
        }
    }
}

// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

// Process groups aren't available on Windows; the child is killed directly.
pub(super) fn set_process_group(_cmd: &mut std::process::Command) {}

/// Asks the test to exit. Windows has no graceful equivalent of SIGTERM for console processes, so
/// this kills the process.
pub(super) fn request_terminate(child: &mut tokio::process::Child) {
    // Ignore the error here -- it's likely due to the process exiting.
    let _ = child.start_kill();
}

pub(super) fn abort_signal(_status: std::process::ExitStatus) -> Option<i32> {
    None
}

#[derive(Debug)]
pub(super) struct ProcessGroupGuard(());

impl ProcessGroupGuard {
    pub(super) fn new(_child: &tokio::process::Child) -> Self {
        Self(())
    }

    pub(super) fn disarm(&mut self) {}
}

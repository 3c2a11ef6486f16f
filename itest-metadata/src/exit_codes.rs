// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `itest` failures.
///
/// `itest` runs may fail for a variety of reasons. This structure documents the exit codes that
/// may occur in case of expected failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum ItestExitCode {}

impl ItestExitCode {
    /// No errors occurred and all selected tests passed or were intentionally skipped.
    pub const OK: i32 = 0;

    /// One or more tests failed, errored, or were skipped because a dependency did not pass.
    pub const TEST_RUN_FAILED: i32 = 1;

    /// Discovering or planning tests produced an error, or the invocation was misconfigured.
    pub const SETUP_ERROR: i32 = 2;

    /// An internal invariant was violated while collecting results.
    ///
    /// This indicates a bug in itest rather than in the tests being run.
    pub const INTERNAL_ERROR: i32 = 3;

    /// The run was cancelled by the user, the host, or a termination signal.
    ///
    /// Matches the conventional shell exit code for a process interrupted by SIGINT.
    pub const CANCELLED: i32 = 130;
}

// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The interface through which the runner launches tests.

use crate::{catalog::TestCase, config::Environment};
use bytes::BytesMut;
use camino::Utf8Path;
use itest_metadata::{ErrorCause, OutcomeKind, RunUuid};
use std::{
    collections::BTreeMap,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio_util::sync::CancellationToken;

/// Launches a single test and waits for it to finish.
///
/// The runner owns timeouts and cancellation: it asks the executor to stop through
/// [`ExecuteContext::terminate_requested`], and drops the returned future if the test doesn't
/// stop within the grace period. Implementations must therefore release any resources they hold
/// (for example, kill child processes) when dropped.
///
/// Output written to [`ExecuteContext::output`] as it arrives is kept for tests that are dropped
/// this way.
pub trait TestExecutor: Send + Sync {
    /// Runs `test` to completion.
    fn execute(
        &self,
        test: &TestCase,
        cx: ExecuteContext<'_>,
    ) -> impl Future<Output = ExecuteOutput> + Send;
}

impl<E: TestExecutor> TestExecutor for &E {
    fn execute(
        &self,
        test: &TestCase,
        cx: ExecuteContext<'_>,
    ) -> impl Future<Output = ExecuteOutput> + Send {
        (**self).execute(test, cx)
    }
}

/// Run-scoped information passed to a [`TestExecutor`].
#[derive(Clone, Debug)]
pub struct ExecuteContext<'a> {
    run_id: RunUuid,
    workspace_root: &'a Utf8Path,
    environment: Environment,
    env: &'a BTreeMap<String, String>,
    terminate: CancellationToken,
    output: OutputCapture,
}

impl<'a> ExecuteContext<'a> {
    pub(crate) fn new(
        run_id: RunUuid,
        workspace_root: &'a Utf8Path,
        environment: Environment,
        env: &'a BTreeMap<String, String>,
        terminate: CancellationToken,
        output: OutputCapture,
    ) -> Self {
        Self {
            run_id,
            workspace_root,
            environment,
            env,
            terminate,
            output,
        }
    }

    /// Returns the identifier of the run.
    pub fn run_id(&self) -> RunUuid {
        self.run_id
    }

    /// Returns the workspace root.
    pub fn workspace_root(&self) -> &'a Utf8Path {
        self.workspace_root
    }

    /// Returns whether the test should use real services or mocks.
    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Returns extra environment variables to set for the test.
    pub fn env(&self) -> &'a BTreeMap<String, String> {
        self.env
    }

    /// Returns the buffer that the test's output should be streamed into.
    pub fn output(&self) -> &OutputCapture {
        &self.output
    }

    /// Returns true if the runner has asked the test to stop.
    pub fn is_terminate_requested(&self) -> bool {
        self.terminate.is_cancelled()
    }

    /// Waits until the runner asks the test to stop.
    ///
    /// Executors should react by asking the test to exit, for example by sending it `SIGTERM`,
    /// and keep collecting its output until it does.
    pub async fn terminate_requested(&self) {
        self.terminate.cancelled().await
    }
}

/// Output captured from a running test, shared between the executor and the runner.
///
/// Standard output and standard error are kept apart, and rendered with stdout first.
#[derive(Clone, Debug, Default)]
pub struct OutputCapture {
    inner: Arc<Mutex<CapturedStreams>>,
}

#[derive(Debug, Default)]
struct CapturedStreams {
    stdout: BytesMut,
    stderr: BytesMut,
}

impl OutputCapture {
    /// Appends bytes read from the test's standard output.
    pub fn extend_stdout(&self, data: &[u8]) {
        self.lock().stdout.extend_from_slice(data);
    }

    /// Appends bytes read from the test's standard error.
    pub fn extend_stderr(&self, data: &[u8]) {
        self.lock().stderr.extend_from_slice(data);
    }

    /// Returns everything captured so far, with invalid UTF-8 replaced.
    pub fn to_string_lossy(&self) -> String {
        let streams = self.lock();
        let mut output = String::from_utf8_lossy(&streams.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&streams.stderr));
        output
    }

    fn lock(&self) -> MutexGuard<'_, CapturedStreams> {
        // Appends can't leave the buffers half-written.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The result of executing a test, as reported by a [`TestExecutor`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecuteOutput {
    /// How the test finished.
    pub result: ExecutionResult,

    /// Captured output.
    pub output: String,
}

impl ExecuteOutput {
    /// Creates a new `ExecuteOutput`.
    pub fn new(result: ExecutionResult, output: impl Into<String>) -> Self {
        Self {
            result,
            output: output.into(),
        }
    }
}

/// How a test finished.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExecutionResult {
    /// The test passed.
    Pass,

    /// The test ran and reported a failure.
    Fail {
        /// A description of the failure.
        reason: String,
    },

    /// The test was aborted, for example by a signal.
    Abort {
        /// The signal that terminated the test, if known.
        signal: Option<i32>,
    },

    /// The test could not be started.
    ExecFail {
        /// The error message.
        message: String,
    },

    /// An I/O error occurred while collecting the test's output or status.
    IoError {
        /// The error message.
        message: String,
    },
}

impl ExecutionResult {
    /// Returns true if the test passed.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Pass)
    }

    /// Converts this result into the outcome recorded for the test.
    pub fn into_outcome_kind(self) -> OutcomeKind {
        match self {
            Self::Pass => OutcomeKind::Passed,
            Self::Fail { reason } => OutcomeKind::Failed { reason },
            Self::Abort { signal } => OutcomeKind::Errored {
                cause: ErrorCause::Crashed { signal },
            },
            Self::ExecFail { message } => OutcomeKind::Errored {
                cause: ErrorCause::SpawnFailed { message },
            },
            Self::IoError { message } => OutcomeKind::Errored {
                cause: ErrorCause::Io { message },
            },
        }
    }
}

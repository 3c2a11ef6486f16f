// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::ItestExitCode;
use camino::Utf8PathBuf;
use chrono::{DateTime, FixedOffset};
use newtype_uuid::{TypedUuid, TypedUuidKind, TypedUuidTag};
use serde::{Deserialize, Serialize};
use std::{borrow::Borrow, collections::BTreeMap, fmt, time::Duration};

/// The identifier of a test, unique within a workspace.
///
/// Identifiers are formed from an optional suite name and the test name, separated by `::`, for
/// example `payments::charge-card`.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestId(String);

impl TestId {
    /// The separator between a suite name and a test name.
    pub const SUITE_SEPARATOR: &'static str = "::";

    /// Creates a new test identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the suite portion of the identifier, if any.
    pub fn suite(&self) -> Option<&str> {
        self.0
            .rsplit_once(Self::SUITE_SEPARATOR)
            .map(|(suite, _)| suite)
    }

    /// Returns the test name without its suite prefix.
    pub fn name(&self) -> &str {
        match self.0.rsplit_once(Self::SUITE_SEPARATOR) {
            Some((_, name)) => name,
            None => &self.0,
        }
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for TestId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TestId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for TestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The kind for [`RunUuid`].
pub enum RunKind {}

impl TypedUuidKind for RunKind {
    fn tag() -> TypedUuidTag {
        const TAG: TypedUuidTag = TypedUuidTag::new("run");
        TAG
    }
}

/// A unique identifier for an itest run.
pub type RunUuid = TypedUuid<RunKind>;

/// The terminal result of executing, or deciding not to execute, one test.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Outcome {
    /// What happened to the test.
    pub result: OutcomeKind,

    /// Captured output (standard output followed by standard error).
    ///
    /// Empty for tests that were not executed.
    pub output: String,

    /// The time it took to run the test. Zero for tests that were not executed.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

impl Outcome {
    /// Creates a new outcome.
    pub fn new(result: OutcomeKind, output: impl Into<String>, duration: Duration) -> Self {
        Self {
            result,
            output: output.into(),
            duration,
        }
    }

    /// Creates an outcome for a test that was not executed.
    pub fn skipped(reason: SkipReason) -> Self {
        Self::new(OutcomeKind::Skipped { reason }, String::new(), Duration::ZERO)
    }

    /// Creates an outcome for a test that was not executed because the run was cancelled.
    pub fn cancelled() -> Self {
        Self::skipped(SkipReason::Cancelled)
    }
}

/// Describes what happened to a test.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum OutcomeKind {
    /// The test passed.
    Passed,

    /// The test ran and reported a failure.
    Failed {
        /// A description of the failure.
        reason: String,
    },

    /// The test was not executed.
    Skipped {
        /// The reason the test was not executed.
        reason: SkipReason,
    },

    /// An infrastructure problem prevented the test from producing a result.
    Errored {
        /// The cause of the error.
        cause: ErrorCause,
    },
}

impl OutcomeKind {
    /// Returns true if the test passed.
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }

    /// Returns true if the test failed or errored.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::Errored { .. })
    }

    /// Returns true if this outcome is acceptable for a successful run: the test passed, or it
    /// was skipped on purpose.
    pub fn is_acceptable(&self) -> bool {
        match self {
            Self::Passed => true,
            Self::Skipped { reason } => reason.is_intentional(),
            Self::Failed { .. } | Self::Errored { .. } => false,
        }
    }

    /// Returns the skip reason, if the test was skipped.
    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match self {
            Self::Skipped { reason } => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
            Self::Skipped { reason } => write!(f, "skipped: {reason}"),
            Self::Errored { cause } => write!(f, "errored: {cause}"),
        }
    }
}

/// The reason a test was not executed.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SkipReason {
    /// The run was cancelled or aborted before the test started.
    Cancelled,

    /// The test, or the suite it belongs to, is declared as disabled.
    Disabled,

    /// The test does not match the filters for this run.
    FilteredOut,

    /// A test this test depends on did not pass.
    DependencyFailed {
        /// The first dependency that did not pass.
        dependency: TestId,
    },
}

impl SkipReason {
    /// Returns true if the test was skipped on purpose rather than as a consequence of a failure
    /// or a cancellation.
    pub fn is_intentional(&self) -> bool {
        matches!(self, Self::Disabled | Self::FilteredOut)
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "run cancelled"),
            Self::Disabled => write!(f, "disabled"),
            Self::FilteredOut => write!(f, "does not match the provided filters"),
            Self::DependencyFailed { dependency } => {
                write!(f, "dependency `{dependency}` did not pass")
            }
        }
    }
}

/// The cause of an [`OutcomeKind::Errored`] outcome.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ErrorCause {
    /// The test did not finish within its timeout.
    Timeout {
        /// The timeout that was exceeded.
        #[serde(with = "humantime_serde")]
        after: Duration,
    },

    /// The test could not be started.
    SpawnFailed {
        /// The error message.
        message: String,
    },

    /// The test was aborted, for example by a signal it did not expect.
    Crashed {
        /// The signal that terminated the test, if known.
        signal: Option<i32>,
    },

    /// An I/O error occurred while collecting the test's output or status.
    Io {
        /// The error message.
        message: String,
    },

    /// The test was still running when the run was cancelled, and was terminated after the grace
    /// period.
    Terminated,
}

impl fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { after } => {
                write!(f, "timed out after {}", humantime::format_duration(*after))
            }
            Self::SpawnFailed { message } => write!(f, "failed to start: {message}"),
            Self::Crashed {
                signal: Some(signal),
            } => write!(f, "aborted by signal {signal}"),
            Self::Crashed { signal: None } => write!(f, "aborted"),
            Self::Io { message } => write!(f, "I/O error: {message}"),
            Self::Terminated => write!(f, "terminated after cancellation"),
        }
    }
}

/// Aggregate counts for a run.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunCounts {
    /// The total number of tests discovered.
    pub total: usize,

    /// The number of tests that passed.
    pub passed: usize,

    /// The number of tests that failed.
    pub failed: usize,

    /// The number of tests that errored.
    pub errored: usize,

    /// The number of tests that were skipped, for any reason. Includes `cancelled`.
    pub skipped: usize,

    /// The number of tests that were skipped because the run was cancelled.
    pub cancelled: usize,
}

impl RunCounts {
    /// Adds an outcome to the counts.
    pub fn add(&mut self, kind: &OutcomeKind) {
        self.total += 1;
        match kind {
            OutcomeKind::Passed => self.passed += 1,
            OutcomeKind::Failed { .. } => self.failed += 1,
            OutcomeKind::Errored { .. } => self.errored += 1,
            OutcomeKind::Skipped { reason } => {
                self.skipped += 1;
                if *reason == SkipReason::Cancelled {
                    self.cancelled += 1;
                }
            }
        }
    }

    /// Returns the number of tests that have a terminal outcome other than a cancellation skip.
    pub fn finished(&self) -> usize {
        self.total - self.cancelled
    }
}

// Note: the order here matters -- it indicates severity of cancellation
/// The reason why a run was cancelled.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CancelReason {
    /// A test failed and fail-fast was enabled.
    TestFailure,

    /// The host requested cancellation through the cancellation token.
    Host,

    /// A termination signal (on Unix, SIGTERM or SIGHUP) was received.
    Signal,

    /// An interrupt (on Unix, Ctrl-C) was received.
    Interrupt,
}

impl CancelReason {
    /// Returns true if this cancellation was requested by the user or the host, rather than
    /// triggered by a test failure.
    pub fn is_user_requested(self) -> bool {
        !matches!(self, Self::TestFailure)
    }

    /// Returns a short description of the reason.
    pub fn to_static_str(self) -> &'static str {
        match self {
            Self::TestFailure => "test failure",
            Self::Host => "host request",
            Self::Signal => "signal",
            Self::Interrupt => "interrupt",
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_static_str())
    }
}

/// The kind of fatal error that aborted a run.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FatalErrorKind {
    /// Test declarations could not be discovered.
    Discovery,

    /// The discovered tests could not be ordered.
    Planning,

    /// An internal invariant was violated.
    Internal,
}

/// The overall status of a run.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum RunStatus {
    /// Every test passed or was intentionally skipped.
    Success,

    /// At least one test failed, errored, or was skipped because of a failed dependency.
    Failed,

    /// The run was cancelled before all tests finished.
    Cancelled {
        /// Why the run was cancelled.
        reason: CancelReason,
    },

    /// A fatal error aborted the run.
    Errored {
        /// The phase of the run the error occurred in.
        kind: FatalErrorKind,

        /// A description of the error, including its causes.
        cause: String,
    },
}

impl RunStatus {
    /// Returns true if the run was successful.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns the process exit code corresponding to this status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Success => ItestExitCode::OK,
            Self::Failed => ItestExitCode::TEST_RUN_FAILED,
            Self::Cancelled { .. } => ItestExitCode::CANCELLED,
            Self::Errored {
                kind: FatalErrorKind::Discovery | FatalErrorKind::Planning,
                ..
            } => ItestExitCode::SETUP_ERROR,
            Self::Errored {
                kind: FatalErrorKind::Internal,
                ..
            } => ItestExitCode::INTERNAL_ERROR,
        }
    }
}

/// The final, structured summary of an itest run.
///
/// This is the format written by `itest run --report-file`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunReport {
    /// A unique identifier for this run.
    pub run_id: RunUuid,

    /// The workspace root the tests were discovered in.
    pub workspace_root: Utf8PathBuf,

    /// The time at which the run started.
    pub started_at: DateTime<FixedOffset>,

    /// The time the run took, from discovery to aggregation.
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,

    /// The overall status of the run.
    pub status: RunStatus,

    /// Aggregate counts, computed from `outcomes`.
    pub counts: RunCounts,

    /// Outcomes for every discovered test, keyed by test identifier.
    pub outcomes: BTreeMap<TestId, Outcome>,
}

impl RunReport {
    /// Parses a report from JSON.
    pub fn parse_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serializes this report to pretty-printed JSON.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Returns the outcome for the given test.
    pub fn outcome(&self, id: &str) -> Option<&Outcome> {
        self.outcomes.get(id)
    }

    /// Returns the process exit code corresponding to this report.
    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }
}

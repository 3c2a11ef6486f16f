// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by itest.

use crate::catalog::SourceLocation;
use camino::Utf8PathBuf;
use config::ConfigError;
use itertools::Itertools;
use itest_metadata::TestId;
use std::{error::Error, fmt};
use thiserror::Error;

/// An error that occurred while discovering tests in a workspace.
///
/// Discovery errors are fatal to a run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DiscoveryError {
    /// The workspace root could not be accessed.
    #[error("workspace root `{root}` is not accessible")]
    WorkspaceRootInaccessible {
        /// The workspace root.
        root: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: std::io::Error,
    },

    /// The workspace root is not a directory.
    #[error("workspace root `{root}` is not a directory")]
    WorkspaceRootNotDirectory {
        /// The workspace root.
        root: Utf8PathBuf,
    },

    /// An error occurred while walking the workspace.
    #[error("error walking workspace `{root}`")]
    Walk {
        /// The workspace root.
        root: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: walkdir::Error,
    },

    /// A path in the workspace is not valid UTF-8.
    #[error("path in workspace is not valid UTF-8: {}", path.display())]
    NonUtf8Path {
        /// The path.
        path: std::path::PathBuf,
    },

    /// A declaration file could not be read.
    #[error("failed to read test declarations at `{path}`")]
    ReadDeclarations {
        /// The declaration file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: std::io::Error,
    },

    /// A declaration file could not be parsed.
    #[error("failed to parse test declarations at `{path}`")]
    ParseDeclarations {
        /// The declaration file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: Box<toml::de::Error>,
    },

    /// A declaration was parsed but is not valid.
    #[error("invalid test declaration at {location}: {reason}")]
    InvalidDeclaration {
        /// Where the declaration is.
        location: SourceLocation,

        /// What is wrong with it.
        reason: String,
    },

    /// Two declarations produce the same test identifier.
    #[error("duplicate test `{id}`: declared at {first} and {second}")]
    DuplicateTestId {
        /// The duplicated identifier.
        id: TestId,

        /// The first declaration.
        first: SourceLocation,

        /// The second declaration.
        second: SourceLocation,
    },
}

/// An error that occurred while ordering tests into batches.
///
/// Planning errors are fatal to a run.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[non_exhaustive]
pub enum PlanningError {
    /// The declared dependencies contain one or more cycles.
    #[error(
        "dependency cycle detected: {}",
        cycles.iter().map(|cycle| format!("[{}]", cycle.iter().join(", "))).join(", ")
    )]
    Cycle {
        /// The members of each cycle, in discovery order.
        cycles: Vec<Vec<TestId>>,
    },

    /// A test depends on a test that does not exist.
    #[error("test `{test}` depends on unknown test `{dependency}`")]
    UnknownDependency {
        /// The test with the dependency.
        test: TestId,

        /// The unknown dependency.
        dependency: TestId,
    },

    /// The same identifier was passed in more than once.
    #[error("test `{test}` appears more than once")]
    DuplicateTest {
        /// The duplicated identifier.
        test: TestId,
    },
}

/// A result was recorded twice for the same test.
///
/// This indicates a bug in the runner.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("a result was already recorded for test `{id}`")]
pub struct DuplicateResultError {
    id: TestId,
}

impl DuplicateResultError {
    pub(crate) fn new(id: TestId) -> Self {
        Self { id }
    }

    /// Returns the identifier of the test.
    pub fn id(&self) -> &TestId {
        &self.id
    }
}

/// An error that occurred while recording a result.
///
/// Both variants indicate an internal invariant violation.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum RecordError {
    /// A result was recorded twice for the same test.
    #[error(transparent)]
    Duplicate(#[from] DuplicateResultError),

    /// A result was recorded for a test that was not discovered.
    #[error("a result was recorded for unknown test `{id}`")]
    UnknownTest {
        /// The identifier of the test.
        id: TestId,
    },
}

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse itest config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    err: ConfigError,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, err: ConfigError) -> Self {
        Self {
            config_file: config_file.into(),
            err,
        }
    }

    /// Returns the config file that failed to parse.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }
}

/// An error which indicates that a profile was requested but not known to itest.
#[derive(Clone, Debug, Error)]
#[error("profile `{profile}` not found (known profiles: {})", .all_profiles.join(", "))]
pub struct ProfileNotFound {
    profile: String,
    all_profiles: Vec<String>,
}

impl ProfileNotFound {
    pub(crate) fn new(
        profile: impl Into<String>,
        all_profiles: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut all_profiles: Vec<_> = all_profiles.into_iter().map(|s| s.into()).collect();
        all_profiles.sort_unstable();
        Self {
            profile: profile.into(),
            all_profiles,
        }
    }
}

/// Error returned while parsing a [`TestThreads`](crate::config::TestThreads) value.
#[derive(Clone, Debug, Error)]
#[error("unrecognized value for test-threads: {input}")]
pub struct TestThreadsParseError {
    input: String,
}

impl TestThreadsParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// An error occurred while setting up the signal handler.
#[derive(Debug, Error)]
#[error("error setting up signal handler")]
pub struct SignalHandlerSetupError(#[from] std::io::Error);

/// An error that occurred while building an
/// [`Orchestrator`](crate::orchestrator::Orchestrator).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OrchestratorBuildError {
    /// An error occurred while creating the Tokio runtime.
    #[error("error creating Tokio runtime")]
    TokioRuntimeCreate(#[source] std::io::Error),

    /// An error occurred while setting up signals.
    #[error("error setting up signals")]
    SignalHandlerSetupError(#[from] SignalHandlerSetupError),
}

/// An error that occurred while writing a report to disk.
#[derive(Debug, Error)]
#[error("error writing {kind} report to `{path}`")]
pub struct WriteReportError {
    kind: &'static str,
    path: Utf8PathBuf,
    #[source]
    err: WriteReportErrorKind,
}

impl WriteReportError {
    pub(crate) fn new(
        kind: &'static str,
        path: impl Into<Utf8PathBuf>,
        err: impl Into<WriteReportErrorKind>,
    ) -> Self {
        Self {
            kind,
            path: path.into(),
            err: err.into(),
        }
    }
}

/// The underlying cause of a [`WriteReportError`].
#[derive(Debug, Error)]
pub enum WriteReportErrorKind {
    /// An I/O error.
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// An error serializing JSON.
    #[error("error serializing JSON")]
    Json(#[from] serde_json::Error),

    /// An error serializing JUnit XML.
    #[error("error serializing JUnit XML")]
    Junit(#[from] quick_junit::SerializeError),
}

/// Displays an error and its chain of sources.
///
/// The error is printed on the first line, followed by `caused by:` and one indented line per
/// source.
pub struct DisplayErrorChain<E> {
    error: E,
}

impl<E: Error> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E: Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        let mut source = self.error.source();
        if source.is_some() {
            write!(f, "\ncaused by:")?;
        }
        while let Some(err) = source {
            write!(f, "\n  - {err}")?;
            source = err.source();
        }

        Ok(())
    }
}

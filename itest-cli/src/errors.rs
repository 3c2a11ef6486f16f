// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING, StderrStyles};
use camino::Utf8PathBuf;
use itest_metadata::ItestExitCode;
use itest_runner::errors::*;
use owo_colors::OwoColorize;
use std::error::Error;
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// Note that the #[error()] strings are mostly placeholder messages -- the expected way to print out
// errors is with the display_to_stderr method, which colorizes errors.

/// An error that itest expects may happen, as opposed to a bug in itest itself.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("workspace root is invalid")]
    WorkspaceRootInvalid {
        workspace_root: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("workspace root is not a directory")]
    WorkspaceRootNotDir { workspace_root: Utf8PathBuf },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("profile not found")]
    ProfileNotFound {
        #[from]
        err: ProfileNotFound,
    },
    #[error("test discovery error")]
    DiscoveryError {
        #[from]
        err: DiscoveryError,
    },
    #[error("orchestrator build error")]
    OrchestratorBuildError {
        #[from]
        err: OrchestratorBuildError,
    },
    #[error("error writing report")]
    WriteReportError {
        #[from]
        err: WriteReportError,
    },
    #[error("error writing output")]
    WriteOutputError {
        #[source]
        err: std::io::Error,
    },
}

impl ExpectedError {
    pub(crate) fn workspace_root_invalid(
        workspace_root: impl Into<Utf8PathBuf>,
        err: std::io::Error,
    ) -> Self {
        Self::WorkspaceRootInvalid {
            workspace_root: workspace_root.into(),
            err,
        }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::WorkspaceRootInvalid { .. }
            | Self::WorkspaceRootNotDir { .. }
            | Self::ConfigParseError { .. }
            | Self::ProfileNotFound { .. }
            | Self::DiscoveryError { .. }
            | Self::OrchestratorBuildError { .. } => ItestExitCode::SETUP_ERROR,
            Self::WriteReportError { .. } | Self::WriteOutputError { .. } => {
                ItestExitCode::INTERNAL_ERROR
            }
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match self {
            Self::WorkspaceRootInvalid {
                workspace_root,
                err,
            } => {
                error!(
                    "workspace root `{}` is invalid",
                    workspace_root.style(styles.bold)
                );
                Some(err as &dyn Error)
            }
            Self::WorkspaceRootNotDir { workspace_root } => {
                error!(
                    "workspace root `{}` is not a directory",
                    workspace_root.style(styles.bold)
                );
                None
            }
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse itest config at `{}`",
                    err.config_file().style(styles.bold)
                );
                err.source()
            }
            Self::ProfileNotFound { err } => {
                error!("{err}");
                None
            }
            Self::DiscoveryError { err } => {
                error!("failed to discover tests");
                Some(err as &dyn Error)
            }
            Self::OrchestratorBuildError { err } => {
                error!("failed to set up the test run");
                Some(err as &dyn Error)
            }
            Self::WriteReportError { err } => {
                error!("{err}");
                err.source()
            }
            Self::WriteOutputError { err } => {
                error!("failed to write output");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}

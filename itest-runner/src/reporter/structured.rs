// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Machine-readable report files.

use super::junit::MetadataJunit;
use crate::errors::WriteReportError;
use camino::{Utf8Path, Utf8PathBuf};
use itest_metadata::RunReport;
use std::{
    fs::File,
    io::{BufWriter, Write},
};
use tracing::debug;

/// Writes report files once a run has finished.
#[derive(Clone, Debug, Default)]
pub struct StructuredReporter {
    json_path: Option<Utf8PathBuf>,
    junit_path: Option<Utf8PathBuf>,
    junit_report_name: Option<String>,
}

impl StructuredReporter {
    /// The default name for the top-level `testsuites` element of a JUnit report.
    pub const DEFAULT_JUNIT_REPORT_NAME: &'static str = "itest-run";

    /// Creates a reporter that writes nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes the [`RunReport`] as JSON to `path`.
    pub fn set_json_path(&mut self, path: impl Into<Utf8PathBuf>) -> &mut Self {
        self.json_path = Some(path.into());
        self
    }

    /// Writes a JUnit XML report to `path`.
    pub fn set_junit_path(&mut self, path: impl Into<Utf8PathBuf>) -> &mut Self {
        self.junit_path = Some(path.into());
        self
    }

    /// Sets the name of the JUnit report.
    pub fn set_junit_report_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.junit_report_name = Some(name.into());
        self
    }

    /// Returns true if no report files are configured.
    pub fn is_empty(&self) -> bool {
        self.json_path.is_none() && self.junit_path.is_none()
    }

    /// Writes every configured report file, creating parent directories as needed.
    pub fn write(&self, report: &RunReport) -> Result<(), WriteReportError> {
        if let Some(path) = &self.json_path {
            debug!(%path, "writing JSON report");
            let mut writer = create_report_file("JSON", path)?;
            serde_json::to_writer_pretty(&mut writer, report)
                .map_err(|err| WriteReportError::new("JSON", path, err))?;
            writer
                .write_all(b"\n")
                .and_then(|()| writer.flush())
                .map_err(|err| WriteReportError::new("JSON", path, err))?;
        }

        if let Some(path) = &self.junit_path {
            debug!(%path, "writing JUnit report");
            let name = self
                .junit_report_name
                .as_deref()
                .unwrap_or(Self::DEFAULT_JUNIT_REPORT_NAME);
            let junit = MetadataJunit::new(name).build(report);
            let mut writer = create_report_file("JUnit", path)?;
            junit
                .serialize(&mut writer)
                .map_err(|err| WriteReportError::new("JUnit", path, err))?;
            writer
                .flush()
                .map_err(|err| WriteReportError::new("JUnit", path, err))?;
        }

        Ok(())
    }
}

fn create_report_file(
    kind: &'static str,
    path: &Utf8Path,
) -> Result<BufWriter<File>, WriteReportError> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|err| WriteReportError::new(kind, dir, err))?;
    }
    let f = File::create(path).map_err(|err| WriteReportError::new(kind, path, err))?;
    Ok(BufWriter::new(f))
}

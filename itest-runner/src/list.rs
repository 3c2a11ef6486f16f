// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Listing discovered tests without running them.

use crate::{
    catalog::TestCase,
    planner::Isolation,
    test_filter::{FilterMatch, TestFilter},
};
use camino::{Utf8Path, Utf8PathBuf};
use itest_metadata::{TestCaseSummary, TestListSummary};
use owo_colors::{OwoColorize, Style};
use serde::Serialize;
use std::io::{self, Write};

/// Output formats for `itest list`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum OutputFormat {
    /// A human-readable output format.
    Human {
        /// Whether to produce verbose output.
        verbose: bool,
    },

    /// Machine-readable output format.
    Serializable(SerializableFormat),
}

/// A serialized, machine-readable output format.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum SerializableFormat {
    /// JSON with no whitespace.
    Json,
    /// JSON, prettified.
    JsonPretty,
}

impl SerializableFormat {
    /// Write this data in the given format to the writer.
    pub fn to_writer(
        self,
        value: &impl Serialize,
        writer: impl io::Write,
    ) -> serde_json::Result<()> {
        match self {
            SerializableFormat::Json => serde_json::to_writer(writer, value),
            SerializableFormat::JsonPretty => serde_json::to_writer_pretty(writer, value),
        }
    }
}

/// Discovered tests along with the filter decision for each.
#[derive(Debug)]
pub struct TestList<'a> {
    workspace_root: Utf8PathBuf,
    tests: Vec<(&'a TestCase, FilterMatch)>,
}

impl<'a> TestList<'a> {
    /// Creates a new test list by applying `filter` to `tests`.
    pub fn new(
        workspace_root: impl Into<Utf8PathBuf>,
        tests: &'a [TestCase],
        filter: &TestFilter,
    ) -> Self {
        let mut tests: Vec<_> = tests
            .iter()
            .map(|test| (test, filter.filter_match(test)))
            .collect();
        tests.sort_by(|a, b| a.0.id().cmp(b.0.id()));
        Self {
            workspace_root: workspace_root.into(),
            tests,
        }
    }

    /// Returns the workspace root.
    pub fn workspace_root(&self) -> &Utf8Path {
        &self.workspace_root
    }

    /// Returns the total number of tests.
    pub fn test_count(&self) -> usize {
        self.tests.len()
    }

    /// Returns the number of tests that match the filter.
    pub fn run_count(&self) -> usize {
        self.tests
            .iter()
            .filter(|(_, filter_match)| filter_match.is_match())
            .count()
    }

    /// Constructs a serializable summary for this test list.
    pub fn to_summary(&self) -> TestListSummary {
        let test_cases = self
            .tests
            .iter()
            .map(|(test, filter_match)| {
                let skip_reason = match filter_match {
                    FilterMatch::Matches => None,
                    FilterMatch::Mismatch { reason } => Some(reason.to_skip_reason()),
                };
                let summary = TestCaseSummary {
                    source: test.location().file().to_owned(),
                    index: test.location().index(),
                    tags: test.tags().clone(),
                    depends_on: test.dependencies().to_vec(),
                    serial: test.isolation() == Isolation::Serial,
                    disabled: test.is_disabled(),
                    skip_reason,
                };
                (test.id().clone(), summary)
            })
            .collect();

        TestListSummary {
            workspace_root: self.workspace_root.clone(),
            test_count: self.test_count(),
            run_count: self.run_count(),
            test_cases,
        }
    }

    /// Outputs this list to the given writer.
    pub fn write(
        &self,
        output_format: OutputFormat,
        writer: impl Write,
        colorize: bool,
    ) -> io::Result<()> {
        match output_format {
            OutputFormat::Human { verbose } => self.write_human(writer, verbose, colorize),
            OutputFormat::Serializable(format) => {
                let mut writer = writer;
                format
                    .to_writer(&self.to_summary(), &mut writer)
                    .map_err(io::Error::other)?;
                writeln!(writer)
            }
        }
    }

    fn write_human(&self, mut writer: impl Write, verbose: bool, colorize: bool) -> io::Result<()> {
        let mut styles = Styles::default();
        if colorize {
            styles.colorize();
        }

        if self.tests.is_empty() {
            return writeln!(writer, "(no tests)");
        }

        for (test, filter_match) in &self.tests {
            match (verbose, filter_match) {
                (_, FilterMatch::Matches) => {
                    writeln!(writer, "{}", test.id().style(styles.test_id))?;
                }
                (true, FilterMatch::Mismatch { reason }) => {
                    writeln!(
                        writer,
                        "{} ({})",
                        test.id().style(styles.test_id),
                        reason.to_skip_reason().style(styles.skipped),
                    )?;
                }
                // Tests that won't run are only shown in verbose mode.
                (false, FilterMatch::Mismatch { .. }) => continue,
            }

            if verbose {
                writeln!(
                    writer,
                    "    {} {} (test #{})",
                    "source:".style(styles.field),
                    test.location().file(),
                    test.location().index(),
                )?;
                if !test.tags().is_empty() {
                    let tags: Vec<_> = test.tags().iter().map(String::as_str).collect();
                    writeln!(writer, "    {} {}", "tags:".style(styles.field), tags.join(", "))?;
                }
                if !test.dependencies().is_empty() {
                    let deps: Vec<_> = test.dependencies().iter().map(|id| id.as_str()).collect();
                    writeln!(
                        writer,
                        "    {} {}",
                        "depends on:".style(styles.field),
                        deps.join(", ")
                    )?;
                }
                if test.isolation() == Isolation::Serial {
                    writeln!(writer, "    {} serial", "isolation:".style(styles.field))?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
struct Styles {
    test_id: Style,
    field: Style,
    skipped: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.test_id = Style::new().blue().bold();
        self.field = Style::new().yellow().bold();
        self.skipped = Style::new().dimmed();
    }
}

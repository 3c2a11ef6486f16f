// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{SkipReason, TestId};
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A serializable list of the tests in a workspace.
///
/// This is the format printed by `itest list --message-format json`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestListSummary {
    /// The workspace root the tests were discovered in.
    pub workspace_root: Utf8PathBuf,

    /// The number of tests discovered.
    pub test_count: usize,

    /// The number of tests that would run with the current filters.
    pub run_count: usize,

    /// Discovered tests, keyed by identifier.
    pub test_cases: BTreeMap<TestId, TestCaseSummary>,
}

impl TestListSummary {
    /// Parses a test list from JSON.
    pub fn parse_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Information about a single discovered test.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestCaseSummary {
    /// The declaration file, relative to the workspace root.
    pub source: Utf8PathBuf,

    /// The 1-based position of the test within its declaration file.
    pub index: usize,

    /// Tags carried by the test, including its suite's tags.
    pub tags: BTreeSet<String>,

    /// Tests that must pass before this one runs.
    pub depends_on: Vec<TestId>,

    /// True if the test must not run concurrently with any other test.
    pub serial: bool,

    /// True if the test or its suite is declared as disabled.
    pub disabled: bool,

    /// If the test would not run with the current filters, the reason it would be skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
}

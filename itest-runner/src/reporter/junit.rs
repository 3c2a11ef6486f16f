// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Code to generate JUnit XML reports from run reports.

use debug_ignore::DebugIgnore;
use indexmap::IndexMap;
use itest_metadata::{ErrorCause, Outcome, OutcomeKind, RunReport, TestId};
use newtype_uuid::GenericUuid;
use quick_junit::{NonSuccessKind, Report, ReportUuid, TestCase, TestCaseStatus, TestSuite};
use std::fmt;

/// The suite that tests without a `suite::` prefix are placed in.
const ROOT_SUITE: &str = "@root";

#[derive(Clone, Debug)]
pub(super) struct MetadataJunit {
    report_name: String,
    test_suites: DebugIgnore<IndexMap<SuiteKey, TestSuite>>,
}

impl MetadataJunit {
    pub(super) fn new(report_name: impl Into<String>) -> Self {
        Self {
            report_name: report_name.into(),
            test_suites: DebugIgnore(IndexMap::new()),
        }
    }

    /// Builds the JUnit report. Suites and their test cases are ordered by test identifier.
    pub(super) fn build(mut self, run_report: &RunReport) -> Report {
        for (id, outcome) in &run_report.outcomes {
            let testcase = make_testcase(id, outcome);
            self.testsuite_for(id).add_test_case(testcase);
        }

        let mut report = Report::new(self.report_name);
        report
            .set_report_uuid(ReportUuid::from_untyped_uuid(
                run_report.run_id.into_untyped_uuid(),
            ))
            .set_timestamp(run_report.started_at)
            .set_time(run_report.elapsed)
            .add_test_suites(self.test_suites.0.into_values());
        report
    }

    fn testsuite_for(&mut self, id: &TestId) -> &mut TestSuite {
        let key = match id.suite() {
            Some(suite) => SuiteKey::Suite(suite.to_owned()),
            None => SuiteKey::Root,
        };
        self.test_suites
            .entry(key.clone())
            .or_insert_with(|| TestSuite::new(key.to_string()))
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
enum SuiteKey {
    Root,
    Suite(String),
}

impl fmt::Display for SuiteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuiteKey::Root => write!(f, "{ROOT_SUITE}"),
            SuiteKey::Suite(suite) => write!(f, "{suite}"),
        }
    }
}

fn make_testcase(id: &TestId, outcome: &Outcome) -> TestCase {
    let status = match &outcome.result {
        OutcomeKind::Passed => TestCaseStatus::success(),
        OutcomeKind::Failed { reason } => {
            let mut status = TestCaseStatus::non_success(NonSuccessKind::Failure);
            status.set_type("test failure").set_message(reason.as_str());
            status
        }
        OutcomeKind::Errored { cause } => {
            let (kind, ty) = non_success_kind_and_type(cause);
            let mut status = TestCaseStatus::non_success(kind);
            status.set_type(ty).set_message(cause.to_string());
            status
        }
        OutcomeKind::Skipped { reason } => {
            let mut status = TestCaseStatus::skipped();
            status.set_message(reason.to_string());
            status
        }
    };

    let mut testcase = TestCase::new(id.name(), status);
    testcase
        .set_classname(id.suite().unwrap_or(ROOT_SUITE))
        .set_time(outcome.duration);
    // Output is only useful for tests that didn't pass.
    if outcome.result.is_failure() && !outcome.output.is_empty() {
        testcase.set_system_out(&outcome.output);
    }
    testcase
}

fn non_success_kind_and_type(cause: &ErrorCause) -> (NonSuccessKind, &'static str) {
    match cause {
        // A timeout or a crash is the test's own failure.
        ErrorCause::Timeout { .. } => (NonSuccessKind::Failure, "test timeout"),
        ErrorCause::Crashed { .. } => (NonSuccessKind::Failure, "test abort"),
        ErrorCause::SpawnFailed { .. } => (NonSuccessKind::Error, "execution failure"),
        ErrorCause::Io { .. } => (NonSuccessKind::Error, "I/O error"),
        ErrorCause::Terminated => (NonSuccessKind::Error, "terminated after cancellation"),
    }
}

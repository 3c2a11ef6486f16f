// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Collection of per-test outcomes into a [`RunReport`].

use crate::errors::{DuplicateResultError, RecordError};
use camino::Utf8PathBuf;
use chrono::{DateTime, FixedOffset};
use indexmap::{IndexMap, IndexSet};
use itest_metadata::{
    CancelReason, FatalErrorKind, Outcome, OutcomeKind, RunCounts, RunReport, RunStatus, RunUuid,
    TestId,
};
use std::{
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// Collects per-test outcomes for a run.
///
/// The aggregator is shared by every worker in a run. Each test may be recorded exactly once.
#[derive(Debug)]
pub struct ResultAggregator {
    expected: IndexSet<TestId>,
    // Outcomes in completion order.
    outcomes: Mutex<IndexMap<TestId, Outcome>>,
}

impl ResultAggregator {
    /// Creates a new aggregator expecting outcomes for exactly the given tests.
    pub fn new(expected: impl IntoIterator<Item = TestId>) -> Self {
        Self {
            expected: expected.into_iter().collect(),
            outcomes: Mutex::new(IndexMap::new()),
        }
    }

    /// Records the outcome for a test.
    ///
    /// Returns an error if an outcome was already recorded for the test, or if the test isn't one
    /// of the expected tests. Both indicate a bug in the caller.
    pub fn record(&self, id: &TestId, outcome: Outcome) -> Result<(), RecordError> {
        if !self.expected.contains(id) {
            return Err(RecordError::UnknownTest { id: id.clone() });
        }

        let mut outcomes = self.lock();
        if outcomes.contains_key(id) {
            return Err(DuplicateResultError::new(id.clone()).into());
        }
        outcomes.insert(id.clone(), outcome);
        Ok(())
    }

    /// Returns the kind of outcome recorded for a test, if any.
    pub fn outcome_kind(&self, id: &TestId) -> Option<OutcomeKind> {
        self.lock().get(id).map(|outcome| outcome.result.clone())
    }

    /// Returns the identifiers of recorded tests, in the order their outcomes were recorded.
    pub fn completion_order(&self) -> Vec<TestId> {
        self.lock().keys().cloned().collect()
    }

    /// Returns the number of tests expected.
    pub fn expected_count(&self) -> usize {
        self.expected.len()
    }

    /// Returns the number of outcomes recorded so far.
    pub fn recorded_count(&self) -> usize {
        self.lock().len()
    }

    /// Returns the counts for the outcomes recorded so far.
    pub fn current_counts(&self) -> RunCounts {
        let mut counts = RunCounts::default();
        for outcome in self.lock().values() {
            counts.add(&outcome.result);
        }
        counts
    }

    /// Finalizes the run into a report.
    ///
    /// Every expected test without an outcome is marked as skipped due to cancellation.
    pub fn finalize(self, summary: RunSummary) -> RunReport {
        let mut outcomes = self
            .outcomes
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        for id in &self.expected {
            if !outcomes.contains_key(id) {
                outcomes.insert(id.clone(), Outcome::cancelled());
            }
        }

        let mut counts = RunCounts::default();
        for outcome in outcomes.values() {
            counts.add(&outcome.result);
        }

        let status = if let Some((kind, cause)) = summary.fatal_error {
            RunStatus::Errored { kind, cause }
        } else if let Some(reason) = summary
            .cancel_reason
            .filter(|reason| reason.is_user_requested())
        {
            RunStatus::Cancelled { reason }
        } else if outcomes
            .values()
            .all(|outcome| outcome.result.is_acceptable())
        {
            RunStatus::Success
        } else {
            RunStatus::Failed
        };

        RunReport {
            run_id: summary.run_id,
            workspace_root: summary.workspace_root,
            started_at: summary.started_at,
            elapsed: summary.elapsed,
            status,
            counts,
            outcomes: outcomes.into_iter().collect(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<TestId, Outcome>> {
        self.outcomes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run-level information passed to [`ResultAggregator::finalize`].
#[derive(Clone, Debug)]
pub struct RunSummary {
    /// The identifier of the run.
    pub run_id: RunUuid,

    /// The workspace root.
    pub workspace_root: Utf8PathBuf,

    /// When the run started.
    pub started_at: DateTime<FixedOffset>,

    /// How long the run took.
    pub elapsed: Duration,

    /// Why the run was cancelled, if it was.
    pub cancel_reason: Option<CancelReason>,

    /// The fatal error that aborted the run, if any.
    pub fatal_error: Option<(FatalErrorKind, String)>,
}

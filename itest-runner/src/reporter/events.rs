// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    catalog::TestCase,
    orchestrator::State,
    planner::{Batch, ExecutionPlan},
};
use camino::Utf8Path;
use chrono::{DateTime, FixedOffset};
use itest_metadata::{CancelReason, Outcome, RunCounts, RunReport, RunUuid, SkipReason};
use std::time::Duration;

/// A progress event for a run.
///
/// Events are produced by an [`Orchestrator`](crate::orchestrator::Orchestrator) and delivered to
/// the callback passed to [`execute`](crate::orchestrator::Orchestrator::execute).
#[derive(Clone, Debug)]
pub struct RunEvent<'a> {
    /// The time at which the event was generated, including the offset from UTC.
    pub timestamp: DateTime<FixedOffset>,

    /// The amount of time elapsed since the start of the run.
    pub elapsed: Duration,

    /// The kind of event this is.
    pub kind: RunEventKind<'a>,
}

/// The kind of run event this is.
///
/// Forms part of [`RunEvent`].
#[derive(Clone, Debug)]
pub enum RunEventKind<'a> {
    /// The run started.
    RunStarted {
        /// The UUID for this run.
        run_id: RunUuid,

        /// The workspace being tested.
        workspace_root: &'a Utf8Path,
    },

    /// The orchestrator moved to a new state.
    StateChanged {
        /// The previous state.
        from: State,

        /// The new state.
        to: State,
    },

    /// Tests were discovered and ordered into batches.
    PlanReady {
        /// The plan.
        plan: &'a ExecutionPlan,

        /// The number of tests that will be handed to the runner. The rest are skipped.
        run_count: usize,
    },

    /// A batch started.
    BatchStarted {
        /// The batch.
        batch: &'a Batch,

        /// The total number of batches in the plan.
        batch_count: usize,
    },

    /// A test started running.
    TestStarted {
        /// The test.
        test: &'a TestCase,

        /// Counts for the tests finished so far.
        current_counts: RunCounts,

        /// The number of tests currently running, including this one.
        running: usize,
    },

    /// A test finished running, or was skipped because the run was cancelled before it started.
    TestFinished {
        /// The test.
        test: &'a TestCase,

        /// The outcome.
        outcome: &'a Outcome,

        /// Counts for the tests finished so far, including this one.
        current_counts: RunCounts,

        /// The number of tests still running.
        running: usize,
    },

    /// A test was skipped without being handed to the runner.
    TestSkipped {
        /// The test.
        test: &'a TestCase,

        /// The reason the test was skipped.
        reason: &'a SkipReason,
    },

    /// A cancellation notice was received.
    RunBeginCancel {
        /// The number of tests still running.
        running: usize,

        /// The reason this run was cancelled.
        reason: CancelReason,
    },

    /// A forcible kill was requested: in-flight tests are terminated without waiting for the
    /// grace period.
    RunBeginKill {
        /// The number of tests still running.
        running: usize,

        /// The reason this run was killed.
        reason: CancelReason,
    },

    /// The run finished.
    RunFinished {
        /// The final report.
        report: &'a RunReport,
    },
}

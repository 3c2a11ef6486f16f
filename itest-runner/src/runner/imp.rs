// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::executor::{ExecuteContext, ExecuteOutput, OutputCapture, TestExecutor};
use crate::{
    aggregator::ResultAggregator,
    cancel::CancelToken,
    catalog::TestCase,
    config::{Environment, TestThreads},
    errors::RecordError,
    planner::BatchIsolation,
    time::stopwatch,
};
use camino::{Utf8Path, Utf8PathBuf};
use futures::prelude::*;
use itest_metadata::{CancelReason, ErrorCause, Outcome, OutcomeKind, RunUuid, SkipReason};
use std::{collections::BTreeMap, time::Duration};
use tokio::{sync::mpsc::UnboundedSender, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Test runner options.
#[derive(Debug, Default)]
pub struct RunnerBuilder {
    test_threads: Option<TestThreads>,
    timeout: Option<Duration>,
    grace_period: Option<Duration>,
    environment: Environment,
    env: BTreeMap<String, String>,
    fail_fast: bool,
}

impl RunnerBuilder {
    /// The default per-test timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    /// The default grace period.
    pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

    /// Sets the number of tests to run simultaneously within a parallel batch.
    pub fn set_test_threads(&mut self, test_threads: TestThreads) -> &mut Self {
        self.test_threads = Some(test_threads);
        self
    }

    /// Sets the timeout for tests that don't declare their own.
    pub fn set_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the time a test is given to exit after it is asked to stop.
    pub fn set_grace_period(&mut self, grace_period: Duration) -> &mut Self {
        self.grace_period = Some(grace_period);
        self
    }

    /// Sets whether tests use real services or mocks.
    pub fn set_environment(&mut self, environment: Environment) -> &mut Self {
        self.environment = environment;
        self
    }

    /// Sets extra environment variables for every test.
    pub fn set_env(&mut self, env: BTreeMap<String, String>) -> &mut Self {
        self.env = env;
        self
    }

    /// Sets whether the first failed or errored test cancels the run.
    pub fn set_fail_fast(&mut self, fail_fast: bool) -> &mut Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Creates a new runner that launches tests through `executor`.
    pub fn build<E: TestExecutor>(
        &self,
        executor: E,
        run_id: RunUuid,
        workspace_root: impl Into<Utf8PathBuf>,
    ) -> Runner<E> {
        let test_threads = self
            .test_threads
            .unwrap_or(TestThreads::NumCpus)
            .compute()
            .max(1);

        Runner {
            executor,
            test_threads,
            timeout: self.timeout.unwrap_or(Self::DEFAULT_TIMEOUT),
            grace_period: self.grace_period.unwrap_or(Self::DEFAULT_GRACE_PERIOD),
            environment: self.environment,
            env: self.env.clone(),
            fail_fast: self.fail_fast,
            run_id,
            workspace_root: workspace_root.into(),
        }
    }
}

/// Executes batches of tests.
///
/// Created with [`RunnerBuilder::build`].
#[derive(Debug)]
pub struct Runner<E> {
    executor: E,
    test_threads: usize,
    timeout: Duration,
    grace_period: Duration,
    environment: Environment,
    env: BTreeMap<String, String>,
    fail_fast: bool,
    run_id: RunUuid,
    workspace_root: Utf8PathBuf,
}

/// A progress event produced by a [`Runner`].
#[derive(Debug)]
pub enum RunnerEvent<'t> {
    /// A test was handed to the executor.
    Started {
        /// The test.
        test: &'t TestCase,
    },

    /// A test reached a terminal outcome, or was skipped because the run was cancelled before it
    /// started.
    Finished {
        /// The test.
        test: &'t TestCase,

        /// The outcome.
        outcome: Outcome,

        /// The result of recording the outcome into the aggregator.
        recorded: Result<(), RecordError>,
    },
}

impl<E: TestExecutor> Runner<E> {
    /// Returns the number of tests run simultaneously within a parallel batch.
    pub fn test_threads(&self) -> usize {
        self.test_threads
    }

    /// Returns true if the first failing test cancels the run.
    pub fn fail_fast(&self) -> bool {
        self.fail_fast
    }

    /// Returns the grace period.
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Returns the workspace root.
    pub fn workspace_root(&self) -> &Utf8Path {
        &self.workspace_root
    }

    /// Runs one batch of tests.
    ///
    /// Tests in a parallel batch run concurrently, up to the configured number of test threads;
    /// sequential batches run one test at a time, in order. Each outcome is recorded into
    /// `aggregator` and reported through `events` as soon as the test finishes.
    ///
    /// Once `cancel` is triggered, tests that haven't started yet are recorded as skipped, and
    /// in-flight tests are given the grace period to finish.
    ///
    /// `events` may carry any type that runner events convert into, so callers can interleave
    /// their own events on the same channel.
    pub async fn run<'t, Ev>(
        &self,
        isolation: BatchIsolation,
        tests: &[&'t TestCase],
        cancel: &CancelToken,
        aggregator: &ResultAggregator,
        events: &UnboundedSender<Ev>,
    ) -> Vec<(&'t TestCase, Outcome)>
    where
        Ev: From<RunnerEvent<'t>>,
    {
        let limit = match isolation {
            BatchIsolation::Parallel => self.test_threads,
            BatchIsolation::Sequential => 1,
        };

        futures::stream::iter(tests.iter().copied())
            .map(move |test| async move {
                let outcome = if cancel.is_cancelled() {
                    Outcome::cancelled()
                } else {
                    // Failure to send means the receiver was dropped.
                    let _ = events.send(RunnerEvent::Started { test }.into());
                    self.run_test(test, cancel).await
                };

                let recorded = aggregator.record(test.id(), outcome.clone());
                if self.fail_fast && outcome.result.is_failure() {
                    // Checked before the next test in the batch starts.
                    cancel.cancel(CancelReason::TestFailure);
                }
                let _ = events.send(
                    RunnerEvent::Finished {
                        test,
                        outcome: outcome.clone(),
                        recorded,
                    }
                    .into(),
                );
                (test, outcome)
            })
            // buffer_unordered means tests are started in order but finish in any order.
            .buffer_unordered(limit)
            .collect()
            .await
    }

    /// Runs an individual test through the executor, enforcing its timeout.
    async fn run_test(&self, test: &TestCase, cancel: &CancelToken) -> Outcome {
        let stopwatch = stopwatch();
        let timeout = test.timeout().unwrap_or(self.timeout);
        let terminate = CancellationToken::new();
        let capture = OutputCapture::default();
        let cx = ExecuteContext::new(
            self.run_id,
            &self.workspace_root,
            self.environment,
            &self.env,
            terminate.clone(),
            capture.clone(),
        );

        let execute_fut = self.executor.execute(test, cx);
        tokio::pin!(execute_fut);

        let deadline = Instant::now() + timeout;
        let mut state = UnitState::Running;

        loop {
            let grace_deadline = match state {
                UnitState::Running => deadline,
                UnitState::TimingOut { until } | UnitState::Draining { until } => until,
            };

            tokio::select! {
                biased;

                output = &mut execute_fut => {
                    return state.finished(output, timeout, stopwatch.elapsed());
                }
                () = cancel.killed() => {
                    debug!(test = %test.id(), "terminating test immediately");
                    return state.abandoned(&capture, timeout, stopwatch.elapsed());
                }
                () = tokio::time::sleep_until(deadline), if !matches!(state, UnitState::TimingOut { .. }) => {
                    debug!(test = %test.id(), ?timeout, "test timed out, asking it to stop");
                    terminate.cancel();
                    state = UnitState::TimingOut {
                        until: Instant::now() + self.grace_period,
                    };
                }
                () = cancel.cancelled(), if matches!(state, UnitState::Running) => {
                    state = UnitState::Draining {
                        until: Instant::now() + self.grace_period,
                    };
                }
                () = tokio::time::sleep_until(grace_deadline), if !matches!(state, UnitState::Running) => {
                    debug!(test = %test.id(), "grace period elapsed, terminating test");
                    return state.abandoned(&capture, timeout, stopwatch.elapsed());
                }
            }
        }
        // Dropping `execute_fut` here releases the executor's resources, which for processes
        // means killing them.
    }
}

#[derive(Copy, Clone, Debug)]
enum UnitState {
    Running,
    // The timeout elapsed and the test was asked to stop.
    TimingOut { until: Instant },
    // The run was cancelled; the test may finish on its own until the grace period ends.
    Draining { until: Instant },
}

impl UnitState {
    fn finished(self, output: ExecuteOutput, timeout: Duration, elapsed: Duration) -> Outcome {
        let result = match self {
            Self::TimingOut { .. } => OutcomeKind::Errored {
                cause: ErrorCause::Timeout { after: timeout },
            },
            Self::Running | Self::Draining { .. } => output.result.into_outcome_kind(),
        };
        Outcome::new(result, output.output, elapsed)
    }

    /// The outcome of a test dropped before it finished, keeping whatever it printed.
    fn abandoned(self, capture: &OutputCapture, timeout: Duration, elapsed: Duration) -> Outcome {
        let cause = match self {
            Self::TimingOut { .. } => ErrorCause::Timeout { after: timeout },
            Self::Running | Self::Draining { .. } => ErrorCause::Terminated,
        };
        Outcome::new(
            OutcomeKind::Errored { cause },
            capture.to_string_lossy(),
            elapsed,
        )
    }
}

/// Returns the skip reason for a test whose dependency didn't pass, if any.
///
/// Dependencies that were skipped on purpose don't block their dependents.
pub(crate) fn dependency_skip_reason(
    test: &TestCase,
    aggregator: &ResultAggregator,
) -> Option<SkipReason> {
    test.dependencies().iter().find_map(|dep| {
        let kind = aggregator.outcome_kind(dep)?;
        (!kind.is_acceptable()).then(|| SkipReason::DependencyFailed {
            dependency: dep.clone(),
        })
    })
}

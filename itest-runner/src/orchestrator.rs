// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Drives a full run: discovery, planning, execution and aggregation.
//!
//! The main structure in this module is [`Orchestrator`], which is built per invocation with an
//! [`OrchestratorBuilder`] and consumed by [`Orchestrator::execute`].

use crate::{
    aggregator::{ResultAggregator, RunSummary},
    cancel::CancelToken,
    catalog::{TestCase, TestCatalog},
    errors::{DiscoveryError, DisplayErrorChain, OrchestratorBuildError, RecordError},
    planner::{Batch, ExecutionPlanner},
    reporter::{RunEvent, RunEventKind},
    runner::{Runner, RunnerBuilder, RunnerEvent, TestExecutor, dependency_skip_reason},
    signal::{SignalHandler, SignalHandlerKind},
    test_filter::{FilterMatch, TestFilter},
    time::{StopwatchStart, stopwatch},
};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Local;
use itest_metadata::{
    CancelReason, FatalErrorKind, Outcome, RunReport, RunUuid, SkipReason, TestId,
};
use std::{collections::HashMap, fmt};
use tokio::{runtime::Runtime, sync::mpsc::UnboundedSender};
use tracing::{debug, error, warn};

/// The phase of a run.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum State {
    /// The orchestrator has been built but not started.
    Idle,

    /// Tests are being discovered.
    Discovering,

    /// Discovered tests are being ordered into batches.
    Planning,

    /// Batches are being executed.
    Running,

    /// Outcomes are being collected into the final report.
    Aggregating,

    /// The run was cancelled, and in-flight tests are winding down.
    Cancelling,

    /// The report is ready.
    Done,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Idle => "idle",
            State::Discovering => "discovering",
            State::Planning => "planning",
            State::Running => "running",
            State::Aggregating => "aggregating",
            State::Cancelling => "cancelling",
            State::Done => "done",
        };
        f.write_str(s)
    }
}

/// Orchestrator options.
#[derive(Debug)]
pub struct OrchestratorBuilder {
    workspace_root: Utf8PathBuf,
    filter: TestFilter,
    runner: RunnerBuilder,
    signal_handler_kind: SignalHandlerKind,
}

impl OrchestratorBuilder {
    /// Creates a builder for a run over the given workspace.
    ///
    /// By default every enabled test is selected, runner settings are the defaults and the
    /// standard signal handler is installed.
    pub fn new(workspace_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            filter: TestFilter::any(),
            runner: RunnerBuilder::default(),
            signal_handler_kind: SignalHandlerKind::Standard,
        }
    }

    /// Sets the filter that selects tests to run.
    pub fn set_filter(&mut self, filter: TestFilter) -> &mut Self {
        self.filter = filter;
        self
    }

    /// Sets the runner settings.
    pub fn set_runner_builder(&mut self, runner: RunnerBuilder) -> &mut Self {
        self.runner = runner;
        self
    }

    /// Sets the signal handler to install.
    pub fn set_signal_handler_kind(&mut self, kind: SignalHandlerKind) -> &mut Self {
        self.signal_handler_kind = kind;
        self
    }

    /// Creates the orchestrator, with its own Tokio runtime.
    pub fn build<E: TestExecutor>(
        &self,
        executor: E,
    ) -> Result<Orchestrator<E>, OrchestratorBuildError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("itest-worker")
            .build()
            .map_err(OrchestratorBuildError::TokioRuntimeCreate)?;

        let signal_handler = {
            let _guard = runtime.enter();
            // signal_handler_kind.build() must be called from within the guard.
            self.signal_handler_kind.build()?
        };

        let run_id = RunUuid::new_v4();
        let runner = self
            .runner
            .build(executor, run_id, self.workspace_root.clone());

        Ok(Orchestrator {
            workspace_root: self.workspace_root.clone(),
            filter: self.filter.clone(),
            runner,
            run_id,
            cancel: CancelToken::new(),
            signal_handler,
            runtime,
        })
    }
}

/// Runs the tests in a workspace.
///
/// Created with [`OrchestratorBuilder::build`]. Holds all state for a single run.
#[derive(Debug)]
pub struct Orchestrator<E> {
    workspace_root: Utf8PathBuf,
    filter: TestFilter,
    runner: Runner<E>,
    run_id: RunUuid,
    cancel: CancelToken,
    signal_handler: SignalHandler,
    runtime: Runtime,
}

impl<E: TestExecutor> Orchestrator<E> {
    /// Returns the identifier of this run.
    pub fn run_id(&self) -> RunUuid {
        self.run_id
    }

    /// Returns the workspace root.
    pub fn workspace_root(&self) -> &Utf8Path {
        &self.workspace_root
    }

    /// Returns a token that cancels this run.
    ///
    /// The token can be used from any thread, before or during [`execute`](Self::execute).
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Runs the full cycle, calling `callback` with progress events, and returns the final
    /// report.
    ///
    /// Fatal errors don't cause this to fail: they're recorded in the report's status.
    pub fn execute<F>(self, mut callback: F) -> RunReport
    where
        F: FnMut(RunEvent<'_>),
    {
        let Self {
            workspace_root,
            filter,
            runner,
            run_id,
            cancel,
            mut signal_handler,
            runtime,
        } = self;

        let mut ecx = EventContext {
            stopwatch: stopwatch(),
            state: State::Idle,
            callback: &mut callback,
        };
        ecx.emit(RunEventKind::RunStarted {
            run_id,
            workspace_root: &workspace_root,
        });
        let summary = |ecx: &EventContext<'_, F>, fatal_error| RunSummary {
            run_id,
            workspace_root: workspace_root.clone(),
            started_at: ecx.stopwatch.start_time().fixed_offset(),
            elapsed: ecx.stopwatch.elapsed(),
            cancel_reason: cancel.reason(),
            fatal_error,
        };

        // Signals that arrive before tests start running are picked up between steps.
        let mut poll_signals = || {
            let _guard = runtime.enter();
            if let Some(request) = signal_handler.try_recv() {
                request.apply(&cancel);
            }
        };

        ecx.transition(State::Discovering);
        let tests = match discover(&workspace_root, &cancel, &mut poll_signals) {
            Ok(tests) => tests,
            Err(err) => {
                let cause = DisplayErrorChain::new(&err).to_string();
                debug!("discovery failed: {cause}");
                let report = ResultAggregator::new(std::iter::empty())
                    .finalize(summary(&ecx, Some((FatalErrorKind::Discovery, cause))));
                return ecx.finish(report, runtime);
            }
        };
        let aggregator = ResultAggregator::new(tests.iter().map(|test| test.id().clone()));
        if cancel.is_cancelled() {
            ecx.transition(State::Cancelling);
            let report = aggregator.finalize(summary(&ecx, None));
            return ecx.finish(report, runtime);
        }

        ecx.transition(State::Planning);
        let planned = ExecutionPlanner.plan(&tests);
        poll_signals();
        let plan = match planned {
            Ok(plan) => plan,
            Err(err) => {
                let cause = DisplayErrorChain::new(&err).to_string();
                debug!("planning failed: {cause}");
                // Every discovered test is reported as cancelled.
                let report =
                    aggregator.finalize(summary(&ecx, Some((FatalErrorKind::Planning, cause))));
                return ecx.finish(report, runtime);
            }
        };
        if cancel.is_cancelled() {
            ecx.transition(State::Cancelling);
            let report = aggregator.finalize(summary(&ecx, None));
            return ecx.finish(report, runtime);
        }

        let by_id: HashMap<&TestId, &TestCase> =
            tests.iter().map(|test| (test.id(), test)).collect();
        let run_count = tests
            .iter()
            .filter(|test| filter.filter_match(test).is_match())
            .count();
        debug!(
            batches = plan.batches().len(),
            tests = tests.len(),
            run_count,
            "execution plan ready"
        );
        ecx.emit(RunEventKind::PlanReady {
            plan: &plan,
            run_count,
        });

        ecx.transition(State::Running);
        let mut fatal_error = None;
        let dispatch = Dispatch {
            runner: &runner,
            filter: &filter,
            cancel: &cancel,
            aggregator: &aggregator,
            by_id: &by_id,
        };

        runtime.block_on(async {
            // The channel borrows from the aggregator, so it must not outlive this block.
            let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();
            let run_fut = dispatch.run_batches(plan.batches(), sender);
            tokio::pin!(run_fut);
            let mut run_done = false;

            let mut running = 0_usize;
            let mut cancel_reported = false;
            let mut kill_reported = false;

            loop {
                tokio::select! {
                    biased;

                    Some(event) = receiver.recv() => {
                        if let Err(err) = handle_event(&mut ecx, event, &aggregator, &mut running) {
                            let cause = DisplayErrorChain::new(&err).to_string();
                            error!("recording outcome failed: {cause}");
                            fatal_error.get_or_insert((FatalErrorKind::Internal, cause));
                            // The run can't produce a trustworthy report, so stop it right away.
                            cancel.kill(CancelReason::TestFailure);
                        }
                    }
                    () = cancel.killed(), if !kill_reported => {
                        kill_reported = true;
                        cancel_reported = true;
                        ecx.transition(State::Cancelling);
                        ecx.emit(RunEventKind::RunBeginKill {
                            running,
                            reason: cancel.reason().unwrap_or(CancelReason::Host),
                        });
                    }
                    () = cancel.cancelled(), if !cancel_reported => {
                        cancel_reported = true;
                        ecx.transition(State::Cancelling);
                        ecx.emit(RunEventKind::RunBeginCancel {
                            running,
                            reason: cancel.reason().unwrap_or(CancelReason::Host),
                        });
                    }
                    () = &mut run_fut, if !run_done => {
                        run_done = true;
                    }
                    Some(request) = signal_handler.recv(), if !run_done => {
                        request.apply(&cancel);
                    }
                }

                if run_done {
                    break;
                }
            }

            // Events sent while the run future completed.
            while let Ok(event) = receiver.try_recv() {
                if let Err(err) = handle_event(&mut ecx, event, &aggregator, &mut running) {
                    let cause = DisplayErrorChain::new(&err).to_string();
                    error!("recording outcome failed: {cause}");
                    fatal_error.get_or_insert((FatalErrorKind::Internal, cause));
                }
            }

            // Cancellation raised while the last batch was finishing, such as by fail-fast, is
            // only observed here.
            if cancel.is_cancelled() && !cancel_reported {
                ecx.transition(State::Cancelling);
                ecx.emit(RunEventKind::RunBeginCancel {
                    running,
                    reason: cancel.reason().unwrap_or(CancelReason::Host),
                });
            }
        });

        if ecx.state != State::Cancelling {
            ecx.transition(State::Aggregating);
        }
        let report = aggregator.finalize(summary(&ecx, fatal_error));
        ecx.finish(report, runtime)
    }
}

/// Discovers tests, stopping early if the run is cancelled.
///
/// `poll_signals` is called before each test is read.
fn discover(
    root: &Utf8Path,
    cancel: &CancelToken,
    mut poll_signals: impl FnMut(),
) -> Result<Vec<TestCase>, DiscoveryError> {
    let catalog = TestCatalog::new(root)?;
    let mut tests = Vec::new();
    for test in catalog.iter() {
        poll_signals();
        if cancel.is_cancelled() {
            debug!(discovered = tests.len(), "run cancelled during discovery");
            break;
        }
        tests.push(test?);
    }
    debug!(tests = tests.len(), "discovered tests");
    Ok(tests)
}

struct EventContext<'f, F> {
    stopwatch: StopwatchStart,
    state: State,
    callback: &'f mut F,
}

impl<F> EventContext<'_, F>
where
    F: FnMut(RunEvent<'_>),
{
    fn emit(&mut self, kind: RunEventKind<'_>) {
        let event = RunEvent {
            timestamp: Local::now().fixed_offset(),
            elapsed: self.stopwatch.elapsed(),
            kind,
        };
        (self.callback)(event);
    }

    fn transition(&mut self, to: State) {
        if self.state == to {
            return;
        }
        let from = std::mem::replace(&mut self.state, to);
        debug!(%from, %to, "orchestrator state changed");
        self.emit(RunEventKind::StateChanged { from, to });
    }

    fn finish(mut self, report: RunReport, runtime: Runtime) -> RunReport {
        // Processes left behind by a test can keep runtime tasks alive. Don't wait for them.
        runtime.shutdown_background();
        self.transition(State::Done);
        self.emit(RunEventKind::RunFinished { report: &report });
        report
    }
}

/// Events flowing from the batch loop to the orchestrator.
#[derive(Debug)]
enum DispatchEvent<'t> {
    BatchStarted {
        batch: &'t Batch,
        batch_count: usize,
    },
    Skipped {
        test: &'t TestCase,
        reason: SkipReason,
        recorded: Result<(), RecordError>,
    },
    Runner(RunnerEvent<'t>),
}

impl<'t> From<RunnerEvent<'t>> for DispatchEvent<'t> {
    fn from(event: RunnerEvent<'t>) -> Self {
        Self::Runner(event)
    }
}

fn handle_event<F>(
    ecx: &mut EventContext<'_, F>,
    event: DispatchEvent<'_>,
    aggregator: &ResultAggregator,
    running: &mut usize,
) -> Result<(), RecordError>
where
    F: FnMut(RunEvent<'_>),
{
    match event {
        DispatchEvent::BatchStarted { batch, batch_count } => {
            debug!(
                batch = batch.index(),
                isolation = %batch.isolation(),
                tests = batch.len(),
                "starting batch"
            );
            ecx.emit(RunEventKind::BatchStarted { batch, batch_count });
            Ok(())
        }
        DispatchEvent::Skipped {
            test,
            reason,
            recorded,
        } => {
            ecx.emit(RunEventKind::TestSkipped {
                test,
                reason: &reason,
            });
            recorded
        }
        DispatchEvent::Runner(RunnerEvent::Started { test }) => {
            *running += 1;
            ecx.emit(RunEventKind::TestStarted {
                test,
                current_counts: aggregator.current_counts(),
                running: *running,
            });
            Ok(())
        }
        DispatchEvent::Runner(RunnerEvent::Finished {
            test,
            outcome,
            recorded,
        }) => {
            // Tests that never started are skipped, and only started tests count as running.
            if outcome.result.skip_reason().is_none() {
                *running = running.saturating_sub(1);
            }
            ecx.emit(RunEventKind::TestFinished {
                test,
                outcome: &outcome,
                current_counts: aggregator.current_counts(),
                running: *running,
            });
            recorded
        }
    }
}

/// State shared by the batch loop.
struct Dispatch<'a, E> {
    runner: &'a Runner<E>,
    filter: &'a TestFilter,
    cancel: &'a CancelToken,
    aggregator: &'a ResultAggregator,
    by_id: &'a HashMap<&'a TestId, &'a TestCase>,
}

impl<'a, E: TestExecutor> Dispatch<'a, E> {
    /// Runs batches in order until they're exhausted or the run is cancelled.
    ///
    /// Tests in batches that never start are left unrecorded, and are reported as cancelled when
    /// the run is finalized.
    async fn run_batches(
        &self,
        batches: &'a [Batch],
        sender: UnboundedSender<DispatchEvent<'a>>,
    ) {
        let batch_count = batches.len();
        for batch in batches {
            if self.cancel.is_cancelled() {
                debug!(batch = batch.index(), "run cancelled, not starting batch");
                break;
            }
            let _ = sender.send(DispatchEvent::BatchStarted { batch, batch_count });

            let mut to_run = Vec::with_capacity(batch.len());
            for id in batch.tests() {
                let Some(&test) = self.by_id.get(id) else {
                    // Plans are built from the same tests, so this can't happen.
                    warn!(%id, "planned test not found in catalog");
                    continue;
                };

                match self.disposition(test) {
                    Some(reason) => {
                        let recorded = self
                            .aggregator
                            .record(test.id(), Outcome::skipped(reason.clone()));
                        let _ = sender.send(DispatchEvent::Skipped {
                            test,
                            reason,
                            recorded,
                        });
                    }
                    None => to_run.push(test),
                }
            }

            if !to_run.is_empty() {
                self.runner
                    .run(
                        batch.isolation(),
                        &to_run,
                        self.cancel,
                        self.aggregator,
                        &sender,
                    )
                    .await;
            }
        }
    }

    /// Returns the reason a test is skipped without running, if any.
    fn disposition(&self, test: &TestCase) -> Option<SkipReason> {
        match self.filter.filter_match(test) {
            FilterMatch::Mismatch { reason } => Some(reason.to_skip_reason()),
            FilterMatch::Matches => dependency_skip_reason(test, self.aggregator),
        }
    }
}

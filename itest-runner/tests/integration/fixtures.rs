// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8Path;
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::Result;
use itest_metadata::{CancelReason, OutcomeKind, RunReport, SkipReason, TestId};
use itest_runner::{
    catalog::TestCase,
    orchestrator::{Orchestrator, OrchestratorBuilder, State},
    reporter::{RunEvent, RunEventKind},
    runner::{ExecuteContext, ExecuteOutput, ExecutionResult, RunnerBuilder, TestExecutor},
    signal::SignalHandlerKind,
};
use std::{
    sync::{
        Mutex, Once,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

pub(crate) fn test_init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        color_eyre::install().expect("color-eyre installed once");
    });
}

/// A scratch workspace with test declaration files.
pub(crate) struct Workspace {
    dir: Utf8TempDir,
}

impl Workspace {
    pub(crate) fn new() -> Result<Self> {
        let dir = Utf8TempDir::with_prefix("itest-integration-")?;
        Ok(Self { dir })
    }

    pub(crate) fn root(&self) -> &Utf8Path {
        self.dir.path()
    }

    /// Writes a declaration file at `relative`, creating parent directories.
    pub(crate) fn declare(&self, relative: &str, contents: &str) -> Result<&Self> {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, contents)?;
        Ok(self)
    }

    /// A builder for a run over this workspace with the no-op signal handler.
    pub(crate) fn builder(&self) -> OrchestratorBuilder {
        let mut builder = OrchestratorBuilder::new(self.root());
        builder.set_signal_handler_kind(SignalHandlerKind::Noop);
        builder
    }
}

/// An executor whose behavior is driven by the test's first argument:
///
/// * `pass`: passes after a short sleep
/// * `slow-pass`: passes after a longer sleep
/// * `fail`: fails immediately
/// * `hang`: never finishes on its own, but stops when asked
#[derive(Debug, Default)]
pub(crate) struct ScriptedExecutor {
    running: AtomicUsize,
    pub(crate) max_running: AtomicUsize,
    pub(crate) started: Mutex<Vec<TestId>>,
}

impl TestExecutor for ScriptedExecutor {
    async fn execute(&self, test: &TestCase, cx: ExecuteContext<'_>) -> ExecuteOutput {
        self.started.lock().unwrap().push(test.id().clone());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        let script = test.command().args().first().map_or("pass", String::as_str);
        let output = match script {
            "pass" => {
                tokio::time::sleep(Duration::from_millis(20)).await;
                ExecuteOutput::new(ExecutionResult::Pass, format!("{} ok", test.id()))
            }
            "slow-pass" => {
                tokio::time::sleep(Duration::from_millis(200)).await;
                ExecuteOutput::new(ExecutionResult::Pass, "")
            }
            "fail" => ExecuteOutput::new(
                ExecutionResult::Fail {
                    reason: "exited with code 1".to_owned(),
                },
                "assertion failed",
            ),
            "hang" => {
                cx.terminate_requested().await;
                ExecuteOutput::new(ExecutionResult::Abort { signal: Some(15) }, "")
            }
            other => panic!("unknown script {other}"),
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        output
    }
}

/// A summary of a [`RunEvent`] that outlives the run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum RecordedEvent {
    RunStarted,
    StateChanged(State),
    PlanReady { batches: Vec<Vec<TestId>>, run_count: usize },
    BatchStarted(usize),
    TestStarted(TestId),
    TestFinished(TestId, OutcomeKind),
    TestSkipped(TestId, SkipReason),
    RunBeginCancel(CancelReason),
    RunBeginKill(CancelReason),
    RunFinished,
}

impl From<&RunEvent<'_>> for RecordedEvent {
    fn from(event: &RunEvent<'_>) -> Self {
        match &event.kind {
            RunEventKind::RunStarted { .. } => Self::RunStarted,
            RunEventKind::StateChanged { to, .. } => Self::StateChanged(*to),
            RunEventKind::PlanReady { plan, run_count } => Self::PlanReady {
                batches: plan
                    .batches()
                    .iter()
                    .map(|batch| batch.tests().to_vec())
                    .collect(),
                run_count: *run_count,
            },
            RunEventKind::BatchStarted { batch, .. } => Self::BatchStarted(batch.index()),
            RunEventKind::TestStarted { test, .. } => Self::TestStarted(test.id().clone()),
            RunEventKind::TestFinished { test, outcome, .. } => {
                Self::TestFinished(test.id().clone(), outcome.result.clone())
            }
            RunEventKind::TestSkipped { test, reason } => {
                Self::TestSkipped(test.id().clone(), (*reason).clone())
            }
            RunEventKind::RunBeginCancel { reason, .. } => Self::RunBeginCancel(*reason),
            RunEventKind::RunBeginKill { reason, .. } => Self::RunBeginKill(*reason),
            RunEventKind::RunFinished { .. } => Self::RunFinished,
        }
    }
}

/// Runs `orchestrator` to completion, recording its events.
pub(crate) fn execute<E: TestExecutor>(
    orchestrator: Orchestrator<E>,
) -> (RunReport, Vec<RecordedEvent>) {
    let mut events = Vec::new();
    let report = orchestrator.execute(|event| events.push(RecordedEvent::from(&event)));
    (report, events)
}

pub(crate) fn runner_builder(threads: usize, timeout: Duration) -> RunnerBuilder {
    let mut builder = RunnerBuilder::default();
    builder
        .set_test_threads(itest_runner::config::TestThreads::Count(threads))
        .set_timeout(timeout)
        .set_grace_period(Duration::from_millis(500));
    builder
}

pub(crate) fn states(events: &[RecordedEvent]) -> Vec<State> {
    events
        .iter()
        .filter_map(|event| match event {
            RecordedEvent::StateChanged(state) => Some(*state),
            _ => None,
        })
        .collect()
}

pub(crate) fn ids(ids: &[&str]) -> Vec<TestId> {
    ids.iter().copied().map(TestId::new).collect()
}

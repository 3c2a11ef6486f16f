// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::{Result, ensure};
use indoc::indoc;
use itest_metadata::{
    CancelReason, ErrorCause, FatalErrorKind, ItestExitCode, OutcomeKind, RunCounts, RunStatus,
    SkipReason, TestId,
};
use itest_runner::{orchestrator::State, test_filter::TestFilterBuilder};
use pretty_assertions::assert_eq;
use std::{sync::atomic::Ordering, time::Duration};

const THREE_TESTS: &str = indoc! {r#"
    [[test]]
    name = "a"
    command = ["scripted", "pass"]
    depends-on = ["b"]

    [[test]]
    name = "b"
    command = ["scripted", "pass"]

    [[test]]
    name = "c"
    command = ["scripted", "pass"]
"#};

#[test]
fn dependent_test_runs_after_its_dependency() -> Result<()> {
    test_init();

    let workspace = Workspace::new()?;
    workspace.declare("tests/basic.itest.toml", THREE_TESTS)?;
    let executor = ScriptedExecutor::default();
    let orchestrator = workspace
        .builder()
        .set_runner_builder(runner_builder(2, Duration::from_secs(30)))
        .build(&executor)?;

    let (report, events) = execute(orchestrator);

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.exit_code(), ItestExitCode::OK);
    assert_eq!(
        report.counts,
        RunCounts {
            total: 3,
            passed: 3,
            ..RunCounts::default()
        }
    );
    assert_eq!(
        events[3],
        RecordedEvent::PlanReady {
            batches: vec![ids(&["b", "c"]), ids(&["a"])],
            run_count: 3,
        },
        "events: {events:#?}"
    );
    assert_eq!(
        states(&events),
        vec![
            State::Discovering,
            State::Planning,
            State::Running,
            State::Aggregating,
            State::Done,
        ]
    );
    assert_eq!(events.first(), Some(&RecordedEvent::RunStarted));
    assert_eq!(events.last(), Some(&RecordedEvent::RunFinished));

    // `a` starts only once `b` has finished.
    let started = executor.started.lock().unwrap().clone();
    assert_eq!(started.last(), Some(&TestId::new("a")));
    let b_finished = events
        .iter()
        .position(|event| matches!(event, RecordedEvent::TestFinished(id, _) if id.as_str() == "b"));
    let a_started = events
        .iter()
        .position(|event| *event == RecordedEvent::TestStarted(TestId::new("a")));
    ensure!(b_finished < a_started, "b finished before a started: {events:#?}");
    assert!(executor.max_running.load(Ordering::SeqCst) <= 2);

    Ok(())
}

#[test]
fn cancellation_after_start_skips_the_rest() -> Result<()> {
    test_init();

    let workspace = Workspace::new()?;
    workspace.declare(
        "serial.itest.toml",
        indoc! {r#"
            [suite]
            name = "serial"

            [[test]]
            name = "one"
            command = ["scripted", "slow-pass"]
            isolation = "serial"

            [[test]]
            name = "two"
            command = ["scripted", "pass"]
            isolation = "serial"

            [[test]]
            name = "three"
            command = ["scripted", "pass"]
            isolation = "serial"

            [[test]]
            name = "after"
            command = ["scripted", "pass"]
            depends-on = ["serial::one"]
        "#},
    )?;
    let executor = ScriptedExecutor::default();
    let orchestrator = workspace
        .builder()
        .set_runner_builder(runner_builder(4, Duration::from_secs(30)))
        .build(&executor)?;
    let cancel = orchestrator.cancel_token();

    let mut events = Vec::new();
    let report = orchestrator.execute(|event| {
        let event = RecordedEvent::from(&event);
        if matches!(event, RecordedEvent::TestStarted(_)) {
            cancel.cancel(CancelReason::Host);
        }
        events.push(event);
    });

    assert_eq!(
        report.status,
        RunStatus::Cancelled {
            reason: CancelReason::Host
        }
    );
    assert_eq!(report.exit_code(), ItestExitCode::CANCELLED);
    assert_eq!(report.counts.total, 4);
    assert_eq!(report.outcomes.len(), 4);
    for (id, outcome) in &report.outcomes {
        ensure!(
            outcome.result.is_passed()
                || outcome.result
                    == OutcomeKind::Skipped {
                        reason: SkipReason::Cancelled
                    },
            "{id}: unexpected outcome {:?}",
            outcome.result
        );
    }
    assert_eq!(
        report.outcome("serial::one").map(|outcome| &outcome.result),
        Some(&OutcomeKind::Passed),
        "the in-flight test finishes within the grace period"
    );
    assert_eq!(report.counts.cancelled, 3);
    assert!(events.contains(&RecordedEvent::RunBeginCancel(CancelReason::Host)));
    assert!(states(&events).contains(&State::Cancelling));
    assert!(!states(&events).contains(&State::Aggregating));

    Ok(())
}

#[test]
fn cancellation_before_execute_runs_nothing() -> Result<()> {
    test_init();

    let workspace = Workspace::new()?;
    workspace.declare("basic.itest.toml", THREE_TESTS)?;
    let executor = ScriptedExecutor::default();
    let orchestrator = workspace.builder().build(&executor)?;
    orchestrator.cancel_token().cancel(CancelReason::Interrupt);

    let (report, _) = execute(orchestrator);

    assert_eq!(
        report.status,
        RunStatus::Cancelled {
            reason: CancelReason::Interrupt
        }
    );
    assert!(executor.started.lock().unwrap().is_empty());
    assert_eq!(report.counts.total, report.counts.cancelled);

    Ok(())
}

#[test]
fn dependency_cycle_is_a_setup_error() -> Result<()> {
    test_init();

    let workspace = Workspace::new()?;
    workspace.declare(
        "cycle.itest.toml",
        indoc! {r#"
            [[test]]
            name = "x"
            command = ["scripted", "pass"]
            depends-on = ["y"]

            [[test]]
            name = "y"
            command = ["scripted", "pass"]
            depends-on = ["x"]
        "#},
    )?;
    let executor = ScriptedExecutor::default();
    let (report, events) = execute(workspace.builder().build(&executor)?);

    let RunStatus::Errored { kind, cause } = &report.status else {
        panic!("expected an errored run, got {:?}", report.status);
    };
    assert_eq!(*kind, FatalErrorKind::Planning);
    ensure!(cause.contains("[x, y]"), "cause: {cause}");
    assert_eq!(report.exit_code(), ItestExitCode::SETUP_ERROR);
    assert_eq!(report.counts.total, 2);
    assert_eq!(report.counts.cancelled, 2);
    assert!(executor.started.lock().unwrap().is_empty());
    assert_eq!(
        states(&events),
        vec![State::Discovering, State::Planning, State::Done]
    );

    Ok(())
}

#[test]
fn invalid_declarations_are_a_setup_error() -> Result<()> {
    test_init();

    let workspace = Workspace::new()?;
    workspace
        .declare("good.itest.toml", THREE_TESTS)?
        .declare("nested/bad.itest.toml", "[[test]]\nname = ")?;
    let executor = ScriptedExecutor::default();
    let (report, _) = execute(workspace.builder().build(&executor)?);

    assert!(matches!(
        report.status,
        RunStatus::Errored {
            kind: FatalErrorKind::Discovery,
            ..
        }
    ));
    assert_eq!(report.exit_code(), ItestExitCode::SETUP_ERROR);
    assert_eq!(report.counts, RunCounts::default());
    assert!(report.outcomes.is_empty());

    Ok(())
}

#[test]
fn timeout_is_recorded_and_run_continues() -> Result<()> {
    test_init();

    let workspace = Workspace::new()?;
    workspace.declare(
        "timeouts.itest.toml",
        indoc! {r#"
            [[test]]
            name = "a"
            command = ["scripted", "pass"]

            [[test]]
            name = "b"
            command = ["scripted", "pass"]

            [[test]]
            name = "c"
            command = ["scripted", "hang"]
            timeout = "200ms"

            [[test]]
            name = "d"
            command = ["scripted", "pass"]
            depends-on = ["a"]
        "#},
    )?;
    let executor = ScriptedExecutor::default();
    let orchestrator = workspace
        .builder()
        .set_runner_builder(runner_builder(2, Duration::from_secs(30)))
        .build(&executor)?;
    let (report, _) = execute(orchestrator);

    assert_eq!(
        report.outcome("c").map(|outcome| &outcome.result),
        Some(&OutcomeKind::Errored {
            cause: ErrorCause::Timeout {
                after: Duration::from_millis(200)
            }
        })
    );
    for id in ["a", "b", "d"] {
        assert_eq!(
            report.outcome(id).map(|outcome| &outcome.result),
            Some(&OutcomeKind::Passed),
            "{id}"
        );
    }
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.exit_code(), ItestExitCode::TEST_RUN_FAILED);

    Ok(())
}

#[test]
fn failed_dependency_skips_dependents() -> Result<()> {
    test_init();

    let workspace = Workspace::new()?;
    workspace.declare(
        "deps.itest.toml",
        indoc! {r#"
            [[test]]
            name = "setup"
            command = ["scripted", "fail"]

            [[test]]
            name = "use"
            command = ["scripted", "pass"]
            depends-on = ["setup"]

            [[test]]
            name = "use-again"
            command = ["scripted", "pass"]
            depends-on = ["use"]
        "#},
    )?;
    let executor = ScriptedExecutor::default();
    let (report, events) = execute(workspace.builder().build(&executor)?);

    assert_eq!(
        report.outcome("use").map(|outcome| &outcome.result),
        Some(&OutcomeKind::Skipped {
            reason: SkipReason::DependencyFailed {
                dependency: TestId::new("setup")
            }
        })
    );
    assert_eq!(
        report.outcome("use-again").map(|outcome| &outcome.result),
        Some(&OutcomeKind::Skipped {
            reason: SkipReason::DependencyFailed {
                dependency: TestId::new("use")
            }
        })
    );
    assert!(events.contains(&RecordedEvent::TestSkipped(
        TestId::new("use"),
        SkipReason::DependencyFailed {
            dependency: TestId::new("setup")
        }
    )));
    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(*executor.started.lock().unwrap(), ids(&["setup"]));

    Ok(())
}

#[test]
fn fail_fast_cancels_remaining_tests() -> Result<()> {
    test_init();

    let workspace = Workspace::new()?;
    workspace.declare(
        "fail-fast.itest.toml",
        indoc! {r#"
            [[test]]
            name = "first"
            command = ["scripted", "fail"]
            isolation = "serial"

            [[test]]
            name = "second"
            command = ["scripted", "pass"]
            isolation = "serial"
        "#},
    )?;
    let executor = ScriptedExecutor::default();
    let mut runner = runner_builder(1, Duration::from_secs(30));
    runner.set_fail_fast(true);
    let orchestrator = workspace.builder().set_runner_builder(runner).build(&executor)?;
    let (report, events) = execute(orchestrator);

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.exit_code(), ItestExitCode::TEST_RUN_FAILED);
    assert_eq!(
        report.outcome("second").map(|outcome| &outcome.result),
        Some(&OutcomeKind::Skipped {
            reason: SkipReason::Cancelled
        })
    );
    assert!(events.contains(&RecordedEvent::RunBeginCancel(CancelReason::TestFailure)));
    // The failure lands in the last batch, so cancellation is noticed after it finishes.
    assert_eq!(
        states(&events),
        vec![
            State::Discovering,
            State::Planning,
            State::Running,
            State::Cancelling,
            State::Done,
        ]
    );

    Ok(())
}

#[test]
fn filters_and_disabled_tests_are_skipped_intentionally() -> Result<()> {
    test_init();

    let workspace = Workspace::new()?;
    workspace
        .declare(
            "api.itest.toml",
            indoc! {r#"
                [suite]
                name = "api"
                tags = ["api"]

                [[test]]
                name = "login"
                command = ["scripted", "pass"]
                tags = ["smoke"]

                [[test]]
                name = "export"
                command = ["scripted", "pass"]
            "#},
        )?
        .declare(
            "legacy.itest.toml",
            indoc! {r#"
                [suite]
                name = "legacy"
                disabled = true
                tags = ["smoke"]

                [[test]]
                name = "import"
                command = ["scripted", "fail"]
            "#},
        )?;
    let executor = ScriptedExecutor::default();
    let filter = TestFilterBuilder::new().add_tags(["smoke"]).build();
    let orchestrator = workspace.builder().set_filter(filter).build(&executor)?;
    let (report, events) = execute(orchestrator);

    assert_eq!(report.status, RunStatus::Success);
    let kinds: Vec<_> = report
        .outcomes
        .iter()
        .map(|(id, outcome)| (id.as_str(), outcome.result.clone()))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (
                "api::export",
                OutcomeKind::Skipped {
                    reason: SkipReason::FilteredOut
                }
            ),
            ("api::login", OutcomeKind::Passed),
            (
                "legacy::import",
                OutcomeKind::Skipped {
                    reason: SkipReason::Disabled
                }
            ),
        ]
    );
    assert_eq!(report.counts.skipped, 2);
    assert_eq!(report.counts.cancelled, 0);
    ensure!(
        events.iter().any(|event| matches!(
            event,
            RecordedEvent::PlanReady { run_count: 1, .. }
        )),
        "events: {events:#?}"
    );

    Ok(())
}

#[test]
fn mock_environment_and_env_reach_executor() -> Result<()> {
    use itest_runner::{
        catalog::TestCase,
        config::Environment,
        runner::{ExecuteContext, ExecuteOutput, ExecutionResult, RunnerBuilder, TestExecutor},
    };
    use std::collections::BTreeMap;

    #[derive(Debug)]
    struct EnvChecker;

    impl TestExecutor for EnvChecker {
        async fn execute(&self, _test: &TestCase, cx: ExecuteContext<'_>) -> ExecuteOutput {
            let ok = cx.environment() == Environment::Mock
                && cx.env().get("SERVICE_URL").map(String::as_str) == Some("http://localhost");
            let result = if ok {
                ExecutionResult::Pass
            } else {
                ExecutionResult::Fail {
                    reason: format!("{:?} {:?}", cx.environment(), cx.env()),
                }
            };
            ExecuteOutput::new(result, "")
        }
    }

    let workspace = Workspace::new()?;
    workspace.declare("basic.itest.toml", THREE_TESTS)?;
    let mut runner = RunnerBuilder::default();
    runner
        .set_environment(Environment::Mock)
        .set_env(BTreeMap::from([(
            "SERVICE_URL".to_owned(),
            "http://localhost".to_owned(),
        )]));
    let orchestrator = workspace.builder().set_runner_builder(runner).build(EnvChecker)?;
    let (report, _) = execute(orchestrator);

    assert_eq!(report.status, RunStatus::Success, "{:#?}", report.outcomes);

    Ok(())
}

// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs real child processes through `sh`.

use crate::fixtures::*;
use color_eyre::eyre::{Result, ensure};
use indoc::indoc;
use itest_metadata::{ErrorCause, ItestExitCode, OutcomeKind, RunStatus};
use itest_runner::{config::Environment, runner::ProcessExecutor};
use pretty_assertions::assert_eq;
use std::time::Duration;

#[test]
fn process_outcomes() -> Result<()> {
    test_init();

    let workspace = Workspace::new()?;
    workspace.declare(
        "process.itest.toml",
        indoc! {r#"
            [suite]
            name = "process"

            [[test]]
            name = "pass"
            command = ["sh", "-c", "exit 0"]

            [[test]]
            name = "fail"
            command = ["sh", "-c", "echo out; echo err >&2; exit 3"]

            [[test]]
            name = "hang"
            command = ["sh", "-c", "sleep 30"]
            timeout = "300ms"

            [[test]]
            name = "abort"
            command = ["sh", "-c", "kill -ABRT $$"]

            [[test]]
            name = "missing"
            command = ["itest-program-that-does-not-exist"]
        "#},
    )?;
    let orchestrator = workspace
        .builder()
        .set_runner_builder(runner_builder(4, Duration::from_secs(30)))
        .build(ProcessExecutor::new())?;

    let (report, _) = execute(orchestrator);

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.exit_code(), ItestExitCode::TEST_RUN_FAILED);
    assert_eq!(report.counts.total, 5);
    assert_eq!(report.counts.passed, 1);
    assert_eq!(report.counts.failed, 1);
    assert_eq!(report.counts.errored, 3);

    let outcome = |id: &str| {
        report
            .outcome(id)
            .unwrap_or_else(|| panic!("no outcome for {id}"))
    };

    assert_eq!(outcome("process::pass").result, OutcomeKind::Passed);

    let fail = outcome("process::fail");
    assert_eq!(
        fail.result,
        OutcomeKind::Failed {
            reason: "exited with code 3".to_owned()
        }
    );
    ensure!(
        fail.output.contains("out\n") && fail.output.contains("err\n"),
        "output: {:?}",
        fail.output
    );

    let hang = outcome("process::hang");
    assert_eq!(
        hang.result,
        OutcomeKind::Errored {
            cause: ErrorCause::Timeout {
                after: Duration::from_millis(300)
            }
        }
    );
    ensure!(
        hang.duration < Duration::from_secs(10),
        "timed out test was stopped promptly: {:?}",
        hang.duration
    );

    assert_eq!(
        outcome("process::abort").result,
        OutcomeKind::Errored {
            cause: ErrorCause::Crashed {
                signal: Some(6)
            }
        }
    );

    ensure!(
        matches!(
            outcome("process::missing").result,
            OutcomeKind::Errored {
                cause: ErrorCause::SpawnFailed { .. }
            }
        ),
        "missing: {:?}",
        outcome("process::missing").result
    );

    Ok(())
}

#[test]
fn process_sees_run_environment() -> Result<()> {
    test_init();

    let workspace = Workspace::new()?;
    workspace.declare(
        "env.itest.toml",
        indoc! {r#"
            [[test]]
            name = "mocked"
            command = ["sh", "-c", "test \"$ITEST_ENVIRONMENT\" = mock && test \"$GREETING\" = hello && test -n \"$ITEST_RUN_ID\" && test \"$ITEST_TEST_ID\" = mocked"]
            env = { GREETING = "hello" }
        "#},
    )?;
    let mut runner = runner_builder(1, Duration::from_secs(30));
    runner.set_environment(Environment::Mock);
    let orchestrator = workspace
        .builder()
        .set_runner_builder(runner)
        .build(ProcessExecutor::new())?;

    let (report, _) = execute(orchestrator);

    assert_eq!(report.status, RunStatus::Success, "{report:#?}");
    Ok(())
}

#[test]
fn stuck_process_keeps_partial_output() -> Result<()> {
    test_init();

    let workspace = Workspace::new()?;
    workspace.declare(
        "stuck.itest.toml",
        indoc! {r#"
            [[test]]
            name = "ignores-term"
            command = ["sh", "-c", "trap '' TERM; echo partial-output; sleep 30"]
            timeout = "300ms"
        "#},
    )?;
    let orchestrator = workspace
        .builder()
        .set_runner_builder(runner_builder(1, Duration::from_secs(30)))
        .build(ProcessExecutor::new())?;

    let (report, _) = execute(orchestrator);

    let outcome = report
        .outcome("ignores-term")
        .unwrap_or_else(|| panic!("no outcome for ignores-term"));
    assert_eq!(
        outcome.result,
        OutcomeKind::Errored {
            cause: ErrorCause::Timeout {
                after: Duration::from_millis(300)
            }
        }
    );
    assert_eq!(outcome.output, "partial-output\n");
    ensure!(
        outcome.duration < Duration::from_secs(10),
        "test was dropped after the grace period: {:?}",
        outcome.duration
    );
    Ok(())
}

// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Human-readable progress output for a run.

use super::events::{RunEvent, RunEventKind};
use crate::catalog::TestCase;
use itest_metadata::{
    ErrorCause, FatalErrorKind, Outcome, OutcomeKind, RunReport, RunStatus, SkipReason,
};
use owo_colors::{OwoColorize, Style};
use std::{
    fmt,
    io::{self, Write},
    time::Duration,
};
use swrite::{SWrite, swrite};

/// Where a [`Displayer`] writes its output.
pub enum DisplayerStderr<'a> {
    /// Write output to standard error.
    Terminal,

    /// Write output to a buffer.
    Buffer(&'a mut Vec<u8>),
}

/// Builder for a [`Displayer`].
#[derive(Debug)]
pub struct DisplayerBuilder {
    colorize: bool,
    failure_output: bool,
}

impl Default for DisplayerBuilder {
    fn default() -> Self {
        Self {
            colorize: false,
            failure_output: true,
        }
    }
}

impl DisplayerBuilder {
    /// Sets whether output is colorized.
    pub fn set_colorize(&mut self, colorize: bool) -> &mut Self {
        self.colorize = colorize;
        self
    }

    /// Sets whether the captured output of failed and errored tests is printed.
    pub fn set_failure_output(&mut self, failure_output: bool) -> &mut Self {
        self.failure_output = failure_output;
        self
    }

    /// Creates a new displayer writing to `output`.
    pub fn build<'a>(&self, output: DisplayerStderr<'a>) -> Displayer<'a> {
        let mut styles = Styles::default();
        if self.colorize {
            styles.colorize();
        }
        Displayer {
            styles: Box::new(styles),
            failure_output: self.failure_output,
            output,
            run_count: 0,
        }
    }
}

/// Writes human-readable status lines for [`RunEvent`]s.
pub struct Displayer<'a> {
    styles: Box<Styles>,
    failure_output: bool,
    output: DisplayerStderr<'a>,
    run_count: usize,
}

impl Displayer<'_> {
    /// Writes output for an event.
    pub fn report_event(&mut self, event: &RunEvent<'_>) -> io::Result<()> {
        match &mut self.output {
            DisplayerStderr::Terminal => {
                let mut stderr = io::stderr().lock();
                Self::write_event(
                    &self.styles,
                    self.failure_output,
                    &mut self.run_count,
                    event,
                    &mut stderr,
                )?;
                stderr.flush()
            }
            DisplayerStderr::Buffer(buf) => Self::write_event(
                &self.styles,
                self.failure_output,
                &mut self.run_count,
                event,
                *buf,
            ),
        }
    }

    fn write_event(
        styles: &Styles,
        failure_output: bool,
        run_count: &mut usize,
        event: &RunEvent<'_>,
        writer: &mut dyn Write,
    ) -> io::Result<()> {
        match &event.kind {
            RunEventKind::RunStarted { .. } | RunEventKind::StateChanged { .. } => {}
            RunEventKind::PlanReady { plan, run_count: count } => {
                *run_count = *count;
                write!(writer, "{:>12} ", "Starting".style(styles.pass))?;
                write!(
                    writer,
                    "{} {} in {} {}",
                    count.style(styles.count),
                    tests_str(*count),
                    plan.batches().len().style(styles.count),
                    if plan.batches().len() == 1 {
                        "batch"
                    } else {
                        "batches"
                    },
                )?;
                let skipped = plan.test_count() - count;
                if skipped > 0 {
                    write!(writer, " ({} skipped)", skipped.style(styles.count))?;
                }
                writeln!(writer)?;
            }
            RunEventKind::BatchStarted { batch, batch_count } => {
                if *batch_count > 1 {
                    writeln!(
                        writer,
                        "{:>12} {}/{} ({}, {} {})",
                        "Batch".style(styles.count),
                        (batch.index() + 1).style(styles.count),
                        batch_count.style(styles.count),
                        batch.isolation(),
                        batch.len(),
                        tests_str(batch.len()),
                    )?;
                }
            }
            RunEventKind::TestStarted { .. } => {}
            RunEventKind::TestFinished {
                test,
                outcome,
                current_counts,
                running: _,
            } => {
                let counter = (current_counts.finished(), *run_count);
                write_status_line(styles, test, outcome, counter, writer)?;
                if failure_output && outcome.result.is_failure() && !outcome.output.is_empty() {
                    write_output(styles, test, outcome, writer)?;
                }
            }
            RunEventKind::TestSkipped { test, reason } => {
                // Intentional skips can be numerous, and are summarized at the end.
                if !reason.is_intentional() {
                    write!(writer, "{:>12} ", "SKIP".style(styles.skip))?;
                    writeln!(
                        writer,
                        "[{:>9}] {}: {reason}",
                        "",
                        test.id().style(styles.test_id)
                    )?;
                }
            }
            RunEventKind::RunBeginCancel { running, reason } => {
                write!(writer, "{:>12} ", "Cancelling".style(styles.fail))?;
                writeln!(
                    writer,
                    "due to {}: {} {} still running",
                    reason.to_static_str().style(styles.fail),
                    running.style(styles.count),
                    tests_str(*running),
                )?;
            }
            RunEventKind::RunBeginKill { running, reason } => {
                write!(writer, "{:>12} ", "Killing".style(styles.fail))?;
                writeln!(
                    writer,
                    "due to {}: {} {} still running",
                    reason.to_static_str().style(styles.fail),
                    running.style(styles.count),
                    tests_str(*running),
                )?;
            }
            RunEventKind::RunFinished { report } => {
                write_summary(styles, *run_count, report, writer)?;
            }
        }

        Ok(())
    }
}

impl fmt::Debug for Displayer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Displayer")
            .field("failure_output", &self.failure_output)
            .field("run_count", &self.run_count)
            .finish_non_exhaustive()
    }
}

fn write_status_line(
    styles: &Styles,
    test: &TestCase,
    outcome: &Outcome,
    (finished, total): (usize, usize),
    writer: &mut dyn Write,
) -> io::Result<()> {
    match &outcome.result {
        OutcomeKind::Passed => write!(writer, "{:>12} ", "PASS".style(styles.pass))?,
        OutcomeKind::Failed { .. } => write!(writer, "{:>12} ", "FAIL".style(styles.fail))?,
        OutcomeKind::Errored { cause } => {
            let label = match cause {
                ErrorCause::Timeout { .. } => "TIMEOUT",
                ErrorCause::Crashed { .. } => "ABORT",
                _ => "ERROR",
            };
            write!(writer, "{:>12} ", label.style(styles.fail))?
        }
        OutcomeKind::Skipped { .. } => write!(writer, "{:>12} ", "SKIP".style(styles.skip))?,
    }

    write!(writer, "{}", DisplayBracketedDuration(outcome.duration))?;
    let width = total.to_string().len();
    write!(
        writer,
        "({:>width$}/{}) ",
        finished.style(styles.count),
        total.style(styles.count),
    )?;
    write!(writer, "{}", test.id().style(styles.test_id))?;
    match &outcome.result {
        OutcomeKind::Passed => {}
        OutcomeKind::Failed { reason } => write!(writer, ": {reason}")?,
        OutcomeKind::Skipped { reason } => write!(writer, ": {reason}")?,
        OutcomeKind::Errored { cause } => write!(writer, ": {cause}")?,
    }
    writeln!(writer)
}

fn write_output(
    styles: &Styles,
    test: &TestCase,
    outcome: &Outcome,
    writer: &mut dyn Write,
) -> io::Result<()> {
    writeln!(
        writer,
        "\n{} {}",
        "--- OUTPUT:".style(styles.fail),
        test.id().style(styles.test_id)
    )?;
    for line in outcome.output.lines() {
        writeln!(writer, "    {line}")?;
    }
    writeln!(writer)
}

fn write_summary(
    styles: &Styles,
    run_count: usize,
    report: &RunReport,
    writer: &mut dyn Write,
) -> io::Result<()> {
    let summary_style = match &report.status {
        RunStatus::Success => styles.pass,
        RunStatus::Failed | RunStatus::Cancelled { .. } | RunStatus::Errored { .. } => styles.fail,
    };

    if let RunStatus::Errored { kind, cause } = &report.status {
        let heading = match kind {
            FatalErrorKind::Discovery => "discovery failed",
            FatalErrorKind::Planning => "planning failed",
            FatalErrorKind::Internal => "internal error",
        };
        writeln!(writer, "{:>12} {heading}: {cause}", "Error".style(styles.fail))?;
    }

    let counts = &report.counts;
    let executed = counts.passed + counts.failed + counts.errored;
    write!(
        writer,
        "------------\n{:>12} {}",
        "Summary".style(summary_style),
        DisplayBracketedDuration(report.elapsed),
    )?;
    write!(writer, "{}", executed.style(styles.count))?;
    if executed != run_count {
        write!(writer, "/{}", run_count.style(styles.count))?;
    }

    let mut summary_str = String::new();
    swrite!(
        summary_str,
        " {} run: {} passed",
        tests_str(run_count.max(executed)),
        counts.passed.style(styles.pass),
    );
    if counts.failed > 0 {
        swrite!(summary_str, ", {} failed", counts.failed.style(styles.fail));
    }
    if counts.errored > 0 {
        swrite!(summary_str, ", {} errored", counts.errored.style(styles.fail));
    }
    if counts.skipped > 0 {
        swrite!(summary_str, ", {} skipped", counts.skipped.style(styles.skip));
        if counts.cancelled > 0 {
            swrite!(
                summary_str,
                " ({} cancelled)",
                counts.cancelled.style(styles.skip)
            );
        }
    }
    writeln!(writer, "{summary_str}")?;

    // Failing tests are listed last, so they're the first thing seen after the run.
    for (id, outcome) in &report.outcomes {
        let blocked = matches!(
            outcome.result.skip_reason(),
            Some(SkipReason::DependencyFailed { .. })
        );
        if outcome.result.is_failure() || blocked {
            let label = if blocked { "SKIP" } else { "FAIL" };
            let style = if blocked { styles.skip } else { styles.fail };
            writeln!(
                writer,
                "{:>12} {}{}: {}",
                label.style(style),
                DisplayBracketedDuration(outcome.duration),
                id.style(styles.test_id),
                outcome.result,
            )?;
        }
    }

    Ok(())
}

fn tests_str(count: usize) -> &'static str {
    if count == 1 { "test" } else { "tests" }
}

struct DisplayBracketedDuration(Duration);

impl fmt::Display for DisplayBracketedDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // * > means right-align.
        // * 8 is the number of characters to pad to.
        // * .3 means print three digits after the decimal point.
        write!(f, "[{:>8.3?}s] ", self.0.as_secs_f64())
    }
}

#[derive(Debug, Default)]
struct Styles {
    count: Style,
    pass: Style,
    fail: Style,
    skip: Style,
    test_id: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.count = Style::new().bold();
        self.pass = Style::new().green().bold();
        self.fail = Style::new().red().bold();
        self.skip = Style::new().yellow().bold();
        self.test_id = Style::new().blue().bold();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::{SourceLocation, TestCommand},
        orchestrator::State,
        planner::{Batch, BatchIsolation, ExecutionPlan},
    };
    use chrono::Local;
    use itest_metadata::{CancelReason, RunCounts, RunUuid, TestId};
    use std::collections::BTreeMap;

    fn make_test(id: &str) -> TestCase {
        TestCase::new(
            id,
            SourceLocation::new("display.itest.toml", 1),
            TestCommand::new("true", Vec::<String>::new(), "/"),
        )
    }

    fn event(kind: RunEventKind<'_>) -> RunEvent<'_> {
        RunEvent {
            timestamp: Local::now().fixed_offset(),
            elapsed: Duration::ZERO,
            kind,
        }
    }

    fn render(events: &[RunEvent<'_>]) -> String {
        let mut buf = Vec::new();
        let mut displayer = DisplayerBuilder::default().build(DisplayerStderr::Buffer(&mut buf));
        for event in events {
            displayer.report_event(event).unwrap();
        }
        drop(displayer);
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn status_lines_and_summary() {
        let a = make_test("api::a");
        let b = make_test("api::b");
        let plan = ExecutionPlan::new(vec![Batch::new(
            0,
            BatchIsolation::Parallel,
            vec![TestId::new("api::a"), TestId::new("api::b")],
        )]);
        let pass = Outcome::new(OutcomeKind::Passed, "", Duration::from_millis(1500));
        let fail = Outcome::new(
            OutcomeKind::Failed {
                reason: "exited with code 1".to_owned(),
            },
            "assertion failed\n",
            Duration::from_millis(20),
        );
        let report = RunReport {
            run_id: RunUuid::nil(),
            workspace_root: "/ws".into(),
            started_at: Local::now().fixed_offset(),
            elapsed: Duration::from_secs(2),
            status: RunStatus::Failed,
            counts: RunCounts {
                total: 2,
                passed: 1,
                failed: 1,
                ..RunCounts::default()
            },
            outcomes: BTreeMap::from([
                (TestId::new("api::a"), pass.clone()),
                (TestId::new("api::b"), fail.clone()),
            ]),
        };

        let output = render(&[
            event(RunEventKind::StateChanged {
                from: State::Planning,
                to: State::Running,
            }),
            event(RunEventKind::PlanReady {
                plan: &plan,
                run_count: 2,
            }),
            event(RunEventKind::TestFinished {
                test: &a,
                outcome: &pass,
                current_counts: RunCounts {
                    total: 1,
                    passed: 1,
                    ..RunCounts::default()
                },
                running: 1,
            }),
            event(RunEventKind::TestFinished {
                test: &b,
                outcome: &fail,
                current_counts: RunCounts {
                    total: 2,
                    passed: 1,
                    failed: 1,
                    ..RunCounts::default()
                },
                running: 0,
            }),
            event(RunEventKind::RunFinished { report: &report }),
        ]);

        assert!(output.contains("    Starting 2 tests in 1 batch\n"), "{output}");
        assert!(output.contains("        PASS [   1.500s] (1/2) api::a\n"), "{output}");
        assert!(
            output.contains("        FAIL [   0.020s] (2/2) api::b: exited with code 1\n"),
            "{output}"
        );
        assert!(output.contains("--- OUTPUT: api::b\n    assertion failed\n"), "{output}");
        assert!(
            output.contains("     Summary [   2.000s] 2 tests run: 1 passed, 1 failed\n"),
            "{output}"
        );
        assert!(
            output.ends_with("        FAIL [   0.020s] api::b: failed: exited with code 1\n"),
            "{output}"
        );
    }

    #[test]
    fn cancellation_and_skips() {
        let test = make_test("db::migrate");
        let dependent = make_test("db::query");
        let timeout = Outcome::new(
            OutcomeKind::Errored {
                cause: ErrorCause::Timeout {
                    after: Duration::from_secs(5),
                },
            },
            "",
            Duration::from_secs(5),
        );
        let reason = SkipReason::DependencyFailed {
            dependency: TestId::new("db::migrate"),
        };
        let filtered = SkipReason::FilteredOut;
        let plan = ExecutionPlan::new(vec![
            Batch::new(0, BatchIsolation::Sequential, vec![TestId::new("db::migrate")]),
            Batch::new(1, BatchIsolation::Parallel, vec![TestId::new("db::query")]),
        ]);

        let output = render(&[
            event(RunEventKind::PlanReady {
                plan: &plan,
                run_count: 2,
            }),
            event(RunEventKind::BatchStarted {
                batch: &plan.batches()[0],
                batch_count: 2,
            }),
            event(RunEventKind::TestFinished {
                test: &test,
                outcome: &timeout,
                current_counts: RunCounts {
                    total: 1,
                    errored: 1,
                    ..RunCounts::default()
                },
                running: 0,
            }),
            event(RunEventKind::TestSkipped {
                test: &dependent,
                reason: &reason,
            }),
            event(RunEventKind::TestSkipped {
                test: &dependent,
                reason: &filtered,
            }),
            event(RunEventKind::RunBeginCancel {
                running: 1,
                reason: CancelReason::Interrupt,
            }),
        ]);

        assert_eq!(
            output,
            "    Starting 2 tests in 2 batches\n\
             \x20      Batch 1/2 (sequential, 1 test)\n\
             \x20    TIMEOUT [   5.000s] (1/2) db::migrate: timed out after 5s\n\
             \x20       SKIP [         ] db::query: dependency `db::migrate` did not pass\n\
             \x20 Cancelling due to interrupt: 1 test still running\n"
        );
    }
}

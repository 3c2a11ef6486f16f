// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    executor::{ExecuteContext, ExecuteOutput, ExecutionResult, OutputCapture, TestExecutor},
    os,
};
use crate::catalog::TestCase;
use bytes::BytesMut;
use std::{process::Stdio, time::Duration};
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tracing::debug;

/// How long to wait for stdout and stderr to close after the test process exits.
///
/// Pipes can stay open if the test spawned grandchildren that inherited them.
const LEAK_TIMEOUT: Duration = Duration::from_millis(100);

/// Runs each test as a child process.
///
/// The process is started in the test's working directory with stdin closed and stdout and
/// stderr streamed into [`ExecuteContext::output`]. On Unix, it is placed in its own process
/// group so that termination reaches everything it spawned. The following environment variables
/// are set, in addition to the profile's and the test's own:
///
/// * `ITEST_TEST_ID`: the test identifier
/// * `ITEST_RUN_ID`: the run identifier
/// * `ITEST_WORKSPACE_ROOT`: the workspace root
/// * `ITEST_ENVIRONMENT`: `real` or `mock`
#[derive(Clone, Debug, Default)]
pub struct ProcessExecutor {
    _private: (),
}

impl ProcessExecutor {
    /// Creates a new `ProcessExecutor`.
    pub fn new() -> Self {
        Self::default()
    }

    fn make_command(test: &TestCase, cx: &ExecuteContext<'_>) -> tokio::process::Command {
        let command = test.command();
        let mut cmd = std::process::Command::new(command.program());
        cmd.args(command.args())
            .current_dir(command.cwd())
            .envs(cx.env())
            .envs(command.env())
            .env("ITEST_TEST_ID", test.id().as_str())
            .env("ITEST_RUN_ID", cx.run_id().to_string())
            .env("ITEST_WORKSPACE_ROOT", cx.workspace_root())
            .env("ITEST_ENVIRONMENT", cx.environment().as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        os::set_process_group(&mut cmd);

        let mut cmd = tokio::process::Command::from(cmd);
        cmd.kill_on_drop(true);
        cmd
    }

    async fn run_process(
        test: &TestCase,
        cx: &ExecuteContext<'_>,
    ) -> Result<ExecuteOutput, ExecuteOutput> {
        let mut cmd = Self::make_command(test, cx);
        let mut child = cmd.spawn().map_err(|err| {
            ExecuteOutput::new(
                ExecutionResult::ExecFail {
                    message: format!("`{}`: {err}", test.command().program()),
                },
                String::new(),
            )
        })?;
        let mut guard = os::ProcessGroupGuard::new(&child);
        debug!(test = %test.id(), pid = ?child.id(), "started test process");

        let child_stdout = child.stdout.take().map(BufReader::new);
        let child_stderr = child.stderr.take().map(BufReader::new);

        let res = {
            let stdout_fut = read_all(child_stdout, cx.output(), Stream::Stdout);
            tokio::pin!(stdout_fut);
            let mut stdout_done = false;

            let stderr_fut = read_all(child_stderr, cx.output(), Stream::Stderr);
            tokio::pin!(stderr_fut);
            let mut stderr_done = false;

            let mut terminate_sent = false;

            let res = loop {
                tokio::select! {
                    res = &mut stdout_fut, if !stdout_done => {
                        stdout_done = true;
                        if let Err(err) = res {
                            break Err(err);
                        }
                    }
                    res = &mut stderr_fut, if !stderr_done => {
                        stderr_done = true;
                        if let Err(err) = res {
                            break Err(err);
                        }
                    }
                    res = child.wait() => {
                        // The test finished executing.
                        break res;
                    }
                    () = cx.terminate_requested(), if !terminate_sent => {
                        terminate_sent = true;
                        os::request_terminate(&mut child);
                        // Don't break here to give the wait task a chance to finish.
                    }
                }
            };

            // Once the process is done executing, wait up to LEAK_TIMEOUT for the pipes to shut
            // down.
            if res.is_ok() {
                let sleep = tokio::time::sleep(LEAK_TIMEOUT);
                tokio::pin!(sleep);
                loop {
                    tokio::select! {
                        _ = &mut stdout_fut, if !stdout_done => stdout_done = true,
                        _ = &mut stderr_fut, if !stderr_done => stderr_done = true,
                        () = &mut sleep, if !(stdout_done && stderr_done) => {
                            debug!(test = %test.id(), "test output pipes still open after exit");
                            break;
                        }
                        else => break,
                    }
                }
            }

            res
        };

        let output = cx.output().to_string_lossy();

        let status = res.map_err(|err| {
            ExecuteOutput::new(
                ExecutionResult::IoError {
                    message: err.to_string(),
                },
                output.clone(),
            )
        })?;
        // The process has been reaped, so its pid may be reused.
        guard.disarm();

        let result = if status.success() {
            ExecutionResult::Pass
        } else if let Some(code) = status.code() {
            ExecutionResult::Fail {
                reason: format!("exited with code {code}"),
            }
        } else {
            ExecutionResult::Abort {
                signal: os::abort_signal(status),
            }
        };

        Ok(ExecuteOutput::new(result, output))
    }
}

impl TestExecutor for ProcessExecutor {
    async fn execute(&self, test: &TestCase, cx: ExecuteContext<'_>) -> ExecuteOutput {
        match Self::run_process(test, &cx).await {
            Ok(output) | Err(output) => output,
        }
    }
}

#[derive(Copy, Clone, Debug)]
enum Stream {
    Stdout,
    Stderr,
}

async fn read_all<R: AsyncRead + Unpin>(
    reader: Option<R>,
    capture: &OutputCapture,
    stream: Stream,
) -> std::io::Result<()> {
    if let Some(mut reader) = reader {
        let mut buf = BytesMut::with_capacity(4096);
        loop {
            buf.clear();
            buf.reserve(4096);
            let bytes_read = reader.read_buf(&mut buf).await?;
            if bytes_read == 0 {
                break;
            }
            // Streamed as it arrives, so a test dropped mid-run keeps what it printed.
            match stream {
                Stream::Stdout => capture.extend_stdout(&buf),
                Stream::Stderr => capture.extend_stderr(&buf),
            }
        }
    }
    Ok(())
}

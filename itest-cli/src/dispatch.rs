// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ExpectedError, Result,
    output::{OutputContext, OutputOpts, OutputWriter},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand, ValueEnum};
use itest_runner::{
    catalog::TestCatalog,
    config::{Environment, ItestConfig, ItestProfile, TestThreads},
    list::{OutputFormat, SerializableFormat, TestList},
    orchestrator::OrchestratorBuilder,
    reporter::{DisplayerBuilder, StructuredReporter},
    runner::{ProcessExecutor, RunnerBuilder},
    test_filter::{RunDisabled, TestFilter, TestFilterBuilder},
};
use std::{io::Write, time::Duration};
use tracing::{debug, warn};

/// An integration-test orchestrator.
///
/// Discovers tests declared in `*.itest.toml` files, orders them by dependency and isolation, and
/// runs them with a worker limit and per-test timeouts.
#[derive(Debug, Parser)]
#[command(
    name = "itest",
    version,
    styles = crate::output::clap_styles::style(),
    max_term_width = 100,
)]
pub struct ItestApp {
    #[clap(flatten)]
    output: OutputOpts,

    #[clap(subcommand)]
    command: Command,
}

impl ItestApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app.
    ///
    /// Returns the exit code.
    pub fn exec(self, output: OutputContext, output_writer: &mut OutputWriter) -> Result<i32> {
        match self.command {
            Command::List(opts) => {
                opts.exec(output, output_writer)?;
                Ok(0)
            }
            Command::Run(opts) => opts.exec(output, output_writer),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List tests in the workspace
    ///
    /// Use --message-format json to get machine-readable output.
    List(ListOpts),

    /// Discover, plan and run tests
    ///
    /// The exit code is 0 if every selected test passed, 1 if any test failed or errored, 2 on a
    /// setup error, 3 on an internal error and 130 if the run was cancelled.
    Run(RunOpts),
}

#[derive(Debug, Args)]
struct WorkspaceOpts {
    /// Workspace root to discover tests in
    #[arg(long, value_name = "PATH", default_value = ".", env = "ITEST_WORKSPACE")]
    workspace: Utf8PathBuf,

    /// Config file [default: <workspace>/.config/itest.toml]
    #[arg(long, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,
}

impl WorkspaceOpts {
    /// Returns the absolute path to the workspace root, checking that it is a directory.
    fn workspace_root(&self) -> Result<Utf8PathBuf> {
        let root = self
            .workspace
            .canonicalize_utf8()
            .map_err(|err| ExpectedError::workspace_root_invalid(&self.workspace, err))?;
        if !root.is_dir() {
            return Err(ExpectedError::WorkspaceRootNotDir {
                workspace_root: root,
            });
        }
        Ok(root)
    }

    fn make_config(&self, workspace_root: &Utf8Path) -> Result<ItestConfig> {
        Ok(ItestConfig::from_sources(
            workspace_root,
            self.config_file.as_deref(),
        )?)
    }
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Filter options")]
struct FilterOpts {
    /// Only select tests carrying any of these tags
    #[arg(long, value_name = "TAGS", value_delimiter = ',')]
    tags: Vec<String>,

    /// Run disabled tests
    #[arg(long, value_parser = RunDisabled::variants(), default_value = "default", value_name = "WHICH")]
    run_disabled: String,

    /// Test identifier filters (substring match)
    #[arg(name = "FILTERS", help_heading = None)]
    filters: Vec<String>,
}

impl FilterOpts {
    fn build(&self) -> TestFilter {
        let mut builder = TestFilterBuilder::new();
        // The value parser only admits known variants.
        let run_disabled = self.run_disabled.parse().unwrap_or_default();
        builder
            .set_run_disabled(run_disabled)
            .add_patterns(self.filters.iter().cloned())
            .add_tags(self.tags.iter().cloned());
        builder.build()
    }
}

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum MessageFormatOpts {
    #[default]
    Human,
    Json,
    JsonPretty,
}

impl MessageFormatOpts {
    fn to_output_format(self, verbose: bool) -> OutputFormat {
        match self {
            Self::Human => OutputFormat::Human { verbose },
            Self::Json => OutputFormat::Serializable(SerializableFormat::Json),
            Self::JsonPretty => OutputFormat::Serializable(SerializableFormat::JsonPretty),
        }
    }
}

#[derive(Debug, Args)]
struct ListOpts {
    #[clap(flatten)]
    workspace: WorkspaceOpts,

    #[clap(flatten)]
    filter: FilterOpts,

    /// Output format
    #[arg(
        short = 'T',
        long,
        value_enum,
        default_value_t,
        help_heading = "Output options",
        value_name = "FMT"
    )]
    message_format: MessageFormatOpts,
}

impl ListOpts {
    fn exec(&self, output: OutputContext, output_writer: &mut OutputWriter) -> Result<()> {
        let workspace_root = self.workspace.workspace_root()?;
        let tests = TestCatalog::new(&workspace_root)?.discover()?;
        let filter = self.filter.build();
        let list = TestList::new(&workspace_root, &tests, &filter);

        let mut writer = output_writer.stdout_writer();
        list.write(
            self.message_format.to_output_format(output.verbose),
            &mut writer,
            output.color.should_colorize(supports_color::Stream::Stdout),
        )
        .and_then(|()| writer.flush())
        .map_err(|err| ExpectedError::WriteOutputError { err })
    }
}

#[derive(Debug, Args)]
struct RunOpts {
    #[clap(flatten)]
    workspace: WorkspaceOpts,

    /// Configuration profile to use
    #[arg(long, short = 'P', env = "ITEST_PROFILE", default_value = ItestConfig::DEFAULT_PROFILE)]
    profile: String,

    #[clap(flatten)]
    filter: FilterOpts,

    #[clap(flatten)]
    runner: RunnerOpts,

    #[clap(flatten)]
    reporter: ReporterOpts,
}

impl RunOpts {
    fn exec(&self, output: OutputContext, output_writer: &mut OutputWriter) -> Result<i32> {
        let workspace_root = self.workspace.workspace_root()?;
        let config = self.workspace.make_config(&workspace_root)?;
        let profile = config.profile(&self.profile)?;
        debug!(profile = profile.name(), %workspace_root, "starting run");

        let mut builder = OrchestratorBuilder::new(&workspace_root);
        builder
            .set_filter(self.filter.build())
            .set_runner_builder(self.runner.to_builder(&profile));
        let orchestrator = builder.build(ProcessExecutor::new())?;

        let structured = self.reporter.to_structured(&profile);
        let mut displayer = DisplayerBuilder::default()
            .set_colorize(output.color.should_colorize(supports_color::Stream::Stderr))
            .set_failure_output(!self.reporter.hide_failure_output)
            .build(output_writer.displayer_output());

        let mut display_failed = false;
        let report = orchestrator.execute(|event| {
            if display_failed {
                return;
            }
            if let Err(err) = displayer.report_event(&event) {
                // The run carries on; its outcome is still reported through the exit code and
                // report files.
                warn!("failed to write run progress: {err}");
                display_failed = true;
            }
        });

        structured.write(&report)?;
        Ok(report.exit_code())
    }
}

#[derive(Debug, Default, Args)]
#[command(next_help_heading = "Runner options")]
struct RunnerOpts {
    /// Number of tests to run simultaneously [default: from profile]
    #[arg(
        long,
        short = 'j',
        visible_alias = "test-threads",
        value_name = "N",
        env = "ITEST_WORKERS",
        allow_negative_numbers = true
    )]
    workers: Option<TestThreads>,

    /// Default per-test timeout, in seconds or as a duration like `90s` [default: from profile]
    #[arg(long, value_name = "SECS", value_parser = parse_duration)]
    timeout: Option<Duration>,

    /// Time a test is given to exit after it is asked to stop [default: from profile]
    #[arg(long, value_name = "SECS", value_parser = parse_duration)]
    grace_period: Option<Duration>,

    /// Run tests against real services or mocks [default: from profile]
    #[arg(long, value_name = "ENV", value_parser = ["real", "mock"])]
    environment: Option<String>,

    /// Cancel the run after the first test failure
    #[arg(long, name = "fail-fast")]
    fail_fast: bool,

    /// Run all tests regardless of failure
    #[arg(long, name = "no-fail-fast", overrides_with = "fail-fast")]
    no_fail_fast: bool,
}

impl RunnerOpts {
    fn to_builder(&self, profile: &ItestProfile<'_>) -> RunnerBuilder {
        let mut builder = RunnerBuilder::default();
        builder
            .set_test_threads(self.workers.unwrap_or_else(|| profile.test_threads()))
            .set_timeout(self.timeout.unwrap_or_else(|| profile.timeout()))
            .set_grace_period(self.grace_period.unwrap_or_else(|| profile.grace_period()))
            .set_environment(self.environment().unwrap_or_else(|| profile.environment()))
            .set_env(profile.env());

        let fail_fast = if self.no_fail_fast {
            false
        } else {
            self.fail_fast || profile.fail_fast()
        };
        builder.set_fail_fast(fail_fast);
        debug!(fail_fast, "configured runner");

        builder
    }

    fn environment(&self) -> Option<Environment> {
        // The value parser only admits known environments.
        self.environment.as_deref().and_then(|env| env.parse().ok())
    }
}

#[derive(Debug, Default, Args)]
#[command(next_help_heading = "Reporter options")]
struct ReporterOpts {
    /// Write the run report as JSON to this path [default: from profile]
    #[arg(long, value_name = "PATH")]
    report_file: Option<Utf8PathBuf>,

    /// Write a JUnit XML report to this path [default: from profile]
    #[arg(long, value_name = "PATH")]
    junit: Option<Utf8PathBuf>,

    /// Don't print the captured output of failed tests
    #[arg(long)]
    hide_failure_output: bool,
}

impl ReporterOpts {
    fn to_structured(&self, profile: &ItestProfile<'_>) -> StructuredReporter {
        let mut reporter = StructuredReporter::new();
        if let Some(path) = self.report_file.clone().or_else(|| profile.json_report_path()) {
            reporter.set_json_path(path);
        }
        if let Some(path) = self.junit.clone().or_else(|| profile.junit_report_path()) {
            reporter.set_junit_path(path);
        }
        reporter
    }
}

/// Parses a duration given either as a number of seconds or in humantime format.
fn parse_duration(input: &str) -> Result<Duration, String> {
    if let Ok(secs) = input.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(input).map_err(|err| format!("invalid duration `{input}`: {err}"))
}

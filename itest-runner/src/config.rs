// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for itest.
//!
//! Configuration is read from the embedded [default config](ItestConfig::DEFAULT_CONFIG), with the
//! workspace's `.config/itest.toml` (or an explicitly specified file) layered on top of it. Most
//! settings are grouped into [profiles](ItestProfile).

use crate::errors::{ConfigParseError, ProfileNotFound, TestThreadsParseError};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use std::{
    cmp::Ordering,
    collections::BTreeMap,
    fmt,
    str::FromStr,
    sync::LazyLock,
    time::Duration,
};
use tracing::warn;

/// Gets the number of available CPUs and caches the value.
#[inline]
pub fn get_num_cpus() -> usize {
    static NUM_CPUS: LazyLock<usize> =
        LazyLock::new(|| match std::thread::available_parallelism() {
            Ok(count) => count.into(),
            Err(err) => {
                warn!("unable to determine num-cpus ({err}), assuming 1 logical CPU");
                1
            }
        });

    *NUM_CPUS
}

/// Overall configuration for itest.
///
/// Most settings are managed through profiles, obtained through the [`profile`](Self::profile)
/// method.
#[derive(Clone, Debug)]
pub struct ItestConfig {
    workspace_root: Utf8PathBuf,
    profiles: BTreeMap<String, ProfileImpl>,
}

impl ItestConfig {
    /// The default location of the config within the workspace: `.config/itest.toml`.
    pub const CONFIG_PATH: &'static str = ".config/itest.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// The name of the default profile.
    pub const DEFAULT_PROFILE: &'static str = "default";

    /// Reads the config from the given file, or if not specified from `.config/itest.toml` in the
    /// workspace root.
    ///
    /// If the file isn't specified and the workspace doesn't have `.config/itest.toml`, uses the
    /// default config options.
    pub fn from_sources(
        workspace_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let workspace_root = workspace_root.into();
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = workspace_root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let deserialized = Self::make_default_config()
            .add_source(source)
            .build()
            .and_then(|config| config.try_deserialize::<ItestConfigDeserialize>())
            .map_err(|err| ConfigParseError::new(config_file, err))?;

        Ok(Self {
            workspace_root,
            profiles: deserialized.profiles,
        })
    }

    /// Returns the default config, without any repository-specific settings.
    pub fn default_config(workspace_root: impl Into<Utf8PathBuf>) -> Self {
        let profiles = Self::make_default_config()
            .build()
            .and_then(|config| config.try_deserialize::<ItestConfigDeserialize>())
            .map(|deserialized| deserialized.profiles)
            // The default config is covered by tests, so this only triggers on a broken build.
            .unwrap_or_else(|err| panic!("default config is always valid: {err}"));

        Self {
            workspace_root: workspace_root.into(),
            profiles,
        }
    }

    /// Returns the profile with the given name, or an error if a profile was specified but not
    /// found.
    pub fn profile(&self, name: impl AsRef<str>) -> Result<ItestProfile<'_>, ProfileNotFound> {
        let name = name.as_ref();
        let custom = self
            .profiles
            .get(name)
            .ok_or_else(|| ProfileNotFound::new(name, self.profiles.keys()))?;
        let default = self.profiles.get(Self::DEFAULT_PROFILE).unwrap_or(custom);

        Ok(ItestProfile {
            name: name.to_owned(),
            workspace_root: &self.workspace_root,
            custom,
            default,
        })
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }
}

/// A configuration profile for itest. Contains most configuration used by the runner.
///
/// Returned by [`ItestConfig::profile`]. Settings that aren't set in the profile are inherited
/// from the default profile.
#[derive(Clone, Debug)]
pub struct ItestProfile<'cfg> {
    name: String,
    workspace_root: &'cfg Utf8Path,
    custom: &'cfg ProfileImpl,
    default: &'cfg ProfileImpl,
}

impl<'cfg> ItestProfile<'cfg> {
    /// Returns the name of the profile.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of tests that may run simultaneously.
    pub fn test_threads(&self) -> TestThreads {
        self.custom
            .test_threads
            .or(self.default.test_threads)
            .unwrap_or(TestThreads::NumCpus)
    }

    /// Returns the default per-test timeout.
    pub fn timeout(&self) -> Duration {
        self.custom
            .timeout
            .or(self.default.timeout)
            .unwrap_or(Duration::from_secs(60))
    }

    /// Returns the time a test is given to exit on its own after it is asked to stop.
    pub fn grace_period(&self) -> Duration {
        self.custom
            .grace_period
            .or(self.default.grace_period)
            .unwrap_or(Duration::from_secs(10))
    }

    /// Returns true if the run should be cancelled after the first failure.
    pub fn fail_fast(&self) -> bool {
        self.custom
            .fail_fast
            .or(self.default.fail_fast)
            .unwrap_or(false)
    }

    /// Returns whether tests run against real services or mocks.
    pub fn environment(&self) -> Environment {
        self.custom
            .environment
            .or(self.default.environment)
            .unwrap_or_default()
    }

    /// Returns the extra environment variables set for every test.
    pub fn env(&self) -> BTreeMap<String, String> {
        let mut env = self.default.env.clone();
        if !std::ptr::eq(self.custom, self.default) {
            env.extend(self.custom.env.clone());
        }
        env
    }

    /// Returns the absolute path the JSON report is written to, if configured.
    pub fn json_report_path(&self) -> Option<Utf8PathBuf> {
        self.custom
            .report
            .json
            .as_ref()
            .or(self.default.report.json.as_ref())
            .map(|path| self.workspace_root.join(path))
    }

    /// Returns the absolute path the JUnit report is written to, if configured.
    pub fn junit_report_path(&self) -> Option<Utf8PathBuf> {
        self.custom
            .report
            .junit
            .as_ref()
            .or(self.default.report.junit.as_ref())
            .map(|path| self.workspace_root.join(path))
    }
}

/// Whether tests run against real services or mocks.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Environment {
    /// Tests run against real services.
    #[default]
    Real,

    /// Tests run against mocked services.
    Mock,
}

impl Environment {
    /// Returns the string representation of this environment, as exposed to tests.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Real => "real",
            Self::Mock => "mock",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "real" => Ok(Self::Real),
            "mock" => Ok(Self::Mock),
            other => Err(format!(
                "unrecognized environment: {other} (expected \"real\" or \"mock\")"
            )),
        }
    }
}

/// Type for the test-threads config key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TestThreads {
    /// Run tests with a specified number of threads.
    Count(usize),

    /// Run tests with a number of threads equal to the logical CPU count.
    NumCpus,
}

impl TestThreads {
    /// Gets the actual number of test threads computed at runtime.
    pub fn compute(self) -> usize {
        match self {
            Self::Count(threads) => threads,
            Self::NumCpus => get_num_cpus(),
        }
    }
}

impl FromStr for TestThreads {
    type Err = TestThreadsParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "num-cpus" {
            return Ok(Self::NumCpus);
        }

        match s.parse::<isize>() {
            Err(e) => Err(TestThreadsParseError::new(format!(
                "Error: {e} parsing {s}"
            ))),
            Ok(0) => Err(TestThreadsParseError::new("workers may not be 0")),
            Ok(j) if j < 0 => Ok(TestThreads::Count(
                (get_num_cpus() as isize + j).max(1) as usize
            )),
            Ok(j) => Ok(TestThreads::Count(j as usize)),
        }
    }
}

impl fmt::Display for TestThreads {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(threads) => write!(f, "{threads}"),
            Self::NumCpus => write!(f, "num-cpus"),
        }
    }
}

impl<'de> Deserialize<'de> for TestThreads {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = TestThreads;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "an integer or the string \"num-cpus\"")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v == "num-cpus" {
                    Ok(TestThreads::NumCpus)
                } else {
                    Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Str(v),
                        &self,
                    ))
                }
            }

            // Note that TOML uses i64, not u64.
            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match v.cmp(&0) {
                    Ordering::Greater => Ok(TestThreads::Count(v as usize)),
                    Ordering::Less => Ok(TestThreads::Count(
                        (get_num_cpus() as i64 + v).max(1) as usize
                    )),
                    Ordering::Equal => Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Signed(v),
                        &self,
                    )),
                }
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match v {
                    0 => Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Unsigned(v),
                        &self,
                    )),
                    v => Ok(TestThreads::Count(v as usize)),
                }
            }
        }

        deserializer.deserialize_any(V)
    }
}

// This is the form of `ItestConfig` that gets deserialized.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ItestConfigDeserialize {
    #[serde(rename = "profile")]
    profiles: BTreeMap<String, ProfileImpl>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ProfileImpl {
    #[serde(default)]
    test_threads: Option<TestThreads>,
    #[serde(default, with = "humantime_serde")]
    timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    grace_period: Option<Duration>,
    #[serde(default)]
    fail_fast: Option<bool>,
    #[serde(default)]
    environment: Option<Environment>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    report: ReportConfigImpl,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ReportConfigImpl {
    #[serde(default)]
    json: Option<Utf8PathBuf>,
    #[serde(default)]
    junit: Option<Utf8PathBuf>,
}

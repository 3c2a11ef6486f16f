// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Discovery of integration tests declared in a workspace.
//!
//! Tests are declared in TOML files whose names end with
//! [`TestCatalog::DECLARATION_SUFFIX`]. The main structure in this module is [`TestCatalog`],
//! which walks a workspace and produces [`TestCase`] instances lazily.

use crate::{errors::DiscoveryError, planner::Isolation};
use camino::{Utf8Path, Utf8PathBuf};
use itest_metadata::TestId;
use serde::Deserialize;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap, VecDeque},
    fmt,
    time::Duration,
};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Where a test was declared.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct SourceLocation {
    file: Utf8PathBuf,
    index: usize,
}

impl SourceLocation {
    /// Creates a new source location.
    ///
    /// `file` is the declaration file relative to the workspace root, and `index` is the 1-based
    /// position of the test within that file.
    pub fn new(file: impl Into<Utf8PathBuf>, index: usize) -> Self {
        Self {
            file: file.into(),
            index,
        }
    }

    /// Returns the declaration file, relative to the workspace root.
    pub fn file(&self) -> &Utf8Path {
        &self.file
    }

    /// Returns the 1-based position of the test within the declaration file.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` (test #{})", self.file, self.index)
    }
}

/// The command used to launch a test.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestCommand {
    program: String,
    args: Vec<String>,
    cwd: Utf8PathBuf,
    env: BTreeMap<String, String>,
}

impl TestCommand {
    /// Creates a new command that runs `program` with `args` in `cwd`.
    pub fn new(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
        cwd: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: cwd.into(),
            env: BTreeMap::new(),
        }
    }

    /// Adds an environment variable to the command.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Returns the program.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Returns the arguments.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Returns the working directory.
    pub fn cwd(&self) -> &Utf8Path {
        &self.cwd
    }

    /// Returns the environment variables declared for the test.
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }
}

/// A single integration test.
///
/// Test cases are immutable once discovered.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestCase {
    id: TestId,
    location: SourceLocation,
    tags: BTreeSet<String>,
    dependencies: Vec<TestId>,
    isolation: Isolation,
    command: TestCommand,
    timeout: Option<Duration>,
    disabled: bool,
}

impl TestCase {
    /// Creates a new test case with no tags or dependencies, parallel isolation, and no timeout
    /// override.
    ///
    /// Most test cases are created by [`TestCatalog`]; this is useful for hosts that have their
    /// own source of tests.
    pub fn new(id: impl Into<TestId>, location: SourceLocation, command: TestCommand) -> Self {
        Self {
            id: id.into(),
            location,
            tags: BTreeSet::new(),
            dependencies: Vec::new(),
            isolation: Isolation::Parallel,
            command,
            timeout: None,
            disabled: false,
        }
    }

    /// Sets the tags for this test.
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the dependencies for this test.
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = impl Into<TestId>>) -> Self {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the isolation policy for this test.
    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    /// Sets the timeout override for this test.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Marks this test as disabled.
    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Returns the identifier for this test.
    pub fn id(&self) -> &TestId {
        &self.id
    }

    /// Returns where this test was declared.
    pub fn location(&self) -> &SourceLocation {
        &self.location
    }

    /// Returns the tags for this test, including tags inherited from its suite.
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Returns the tests that must run before this one.
    pub fn dependencies(&self) -> &[TestId] {
        &self.dependencies
    }

    /// Returns the isolation policy for this test.
    pub fn isolation(&self) -> Isolation {
        self.isolation
    }

    /// Returns the command used to launch this test.
    pub fn command(&self) -> &TestCommand {
        &self.command
    }

    /// Returns the timeout override for this test, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns true if this test, or its suite, is declared as disabled.
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }
}

/// Discovers tests declared in a workspace.
///
/// Equivalent to `TestCatalog::new(root)?.discover()`.
pub fn discover(root: impl Into<Utf8PathBuf>) -> Result<Vec<TestCase>, DiscoveryError> {
    TestCatalog::new(root)?.discover()
}

/// An index of the tests declared in a workspace.
#[derive(Clone, Debug)]
pub struct TestCatalog {
    root: Utf8PathBuf,
}

impl TestCatalog {
    /// The suffix that identifies test declaration files.
    pub const DECLARATION_SUFFIX: &'static str = ".itest.toml";

    /// Creates a new catalog rooted at the given workspace root.
    ///
    /// Returns an error if the root is not an accessible directory.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Result<Self, DiscoveryError> {
        let root = root.into();
        let metadata =
            std::fs::metadata(&root).map_err(|err| DiscoveryError::WorkspaceRootInaccessible {
                root: root.clone(),
                err,
            })?;
        if !metadata.is_dir() {
            return Err(DiscoveryError::WorkspaceRootNotDirectory { root });
        }

        Ok(Self { root })
    }

    /// Returns the workspace root.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Returns a lazy iterator over the tests in this workspace, in discovery order.
    ///
    /// Declaration files are read as the iterator advances. Each call starts a fresh walk of the
    /// workspace. After an error is returned, the iterator produces no further items.
    pub fn iter(&self) -> DiscoverIter<'_> {
        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(should_walk as fn(&DirEntry) -> bool);

        DiscoverIter {
            catalog: self,
            walker,
            pending: VecDeque::new(),
            seen: HashMap::new(),
            done: false,
        }
    }

    /// Discovers all tests in this workspace.
    pub fn discover(&self) -> Result<Vec<TestCase>, DiscoveryError> {
        self.iter().collect()
    }
}

fn should_walk(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return true;
    }
    let name = entry.file_name().to_string_lossy();
    !(name.starts_with('.') || name == "target")
}

/// Iterator over the tests in a workspace, returned by [`TestCatalog::iter`].
pub struct DiscoverIter<'a> {
    catalog: &'a TestCatalog,
    walker: walkdir::FilterEntry<walkdir::IntoIter, fn(&DirEntry) -> bool>,
    pending: VecDeque<TestCase>,
    seen: HashMap<TestId, SourceLocation>,
    done: bool,
}

impl fmt::Debug for DiscoverIter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoverIter")
            .field("root", &self.catalog.root)
            .field("pending", &self.pending.len())
            .field("seen", &self.seen.len())
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl Iterator for DiscoverIter<'_> {
    type Item = Result<TestCase, DiscoveryError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if let Some(test) = self.pending.pop_front() {
                return Some(Ok(test));
            }

            let entry = match self.walker.next() {
                Some(Ok(entry)) => entry,
                Some(Err(err)) => {
                    return Some(Err(self.fail(DiscoveryError::Walk {
                        root: self.catalog.root.clone(),
                        err,
                    })));
                }
                None => {
                    self.done = true;
                    return None;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }
            let is_declaration = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.ends_with(TestCatalog::DECLARATION_SUFFIX));
            if !is_declaration {
                continue;
            }

            let path = match Utf8PathBuf::from_path_buf(entry.into_path()) {
                Ok(path) => path,
                Err(path) => return Some(Err(self.fail(DiscoveryError::NonUtf8Path { path }))),
            };

            if let Err(err) = self.load_file(&path) {
                return Some(Err(self.fail(err)));
            }
        }
    }
}

impl DiscoverIter<'_> {
    fn fail(&mut self, err: DiscoveryError) -> DiscoveryError {
        self.done = true;
        self.pending.clear();
        err
    }

    fn load_file(&mut self, path: &Utf8Path) -> Result<(), DiscoveryError> {
        let relative = path
            .strip_prefix(&self.catalog.root)
            .unwrap_or(path)
            .to_owned();
        let contents =
            std::fs::read_to_string(path).map_err(|err| DiscoveryError::ReadDeclarations {
                path: relative.clone(),
                err,
            })?;
        let file: DeclarationFile =
            toml::from_str(&contents).map_err(|err| DiscoveryError::ParseDeclarations {
                path: relative.clone(),
                err: Box::new(err),
            })?;

        let base_dir = path.parent().unwrap_or(&self.catalog.root);
        let suite = file.suite.unwrap_or_default();
        if let Some(name) = &suite.name {
            validate_suite_name(name).map_err(|reason| DiscoveryError::InvalidDeclaration {
                location: SourceLocation::new(relative.clone(), 0),
                reason,
            })?;
        }

        debug!(
            file = %relative,
            tests = file.tests.len(),
            "loaded test declarations",
        );

        for (index, decl) in file.tests.into_iter().enumerate() {
            let location = SourceLocation::new(relative.clone(), index + 1);
            let test = decl
                .into_test_case(&suite, base_dir, location.clone())
                .map_err(|reason| DiscoveryError::InvalidDeclaration {
                    location: location.clone(),
                    reason,
                })?;

            if let Some(first) = self.seen.get(test.id()) {
                return Err(DiscoveryError::DuplicateTestId {
                    id: test.id().clone(),
                    first: first.clone(),
                    second: location,
                });
            }
            self.seen.insert(test.id().clone(), location);
            self.pending.push_back(test);
        }

        Ok(())
    }
}

// ---
// Declaration files
// ---

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct DeclarationFile {
    #[serde(default)]
    suite: Option<SuiteDeclaration>,
    #[serde(default, rename = "test")]
    tests: Vec<TestDeclaration>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct SuiteDeclaration {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct TestDeclaration {
    name: String,
    command: Vec<String>,
    #[serde(default)]
    cwd: Option<Utf8PathBuf>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    isolation: Isolation,
    #[serde(default, with = "humantime_serde")]
    timeout: Option<Duration>,
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

impl TestDeclaration {
    fn into_test_case(
        self,
        suite: &SuiteDeclaration,
        base_dir: &Utf8Path,
        location: SourceLocation,
    ) -> Result<TestCase, String> {
        validate_name_component(&self.name)?;

        let id = match &suite.name {
            Some(suite_name) => TestId::new(format!(
                "{suite_name}{}{}",
                TestId::SUITE_SEPARATOR,
                self.name
            )),
            None => TestId::new(self.name),
        };

        let mut command = self.command.into_iter();
        let program = match command.next() {
            Some(program) if !program.is_empty() => program,
            _ => return Err("`command` must have a non-empty program".to_owned()),
        };
        let cwd = match self.cwd {
            Some(cwd) => base_dir.join(cwd),
            None => base_dir.to_owned(),
        };
        // Relative paths like `./run.sh` are resolved against the working directory, while bare
        // program names are looked up in PATH.
        let program = if Utf8Path::new(&program).is_relative() && program.contains(['/', '\\']) {
            cwd.join(&program).into_string()
        } else {
            program
        };

        if let Some(dep) = self.depends_on.iter().find(|dep| dep.is_empty()) {
            return Err(format!("`depends-on` contains an empty identifier: {dep:?}"));
        }
        if let Some(tag) = self
            .tags
            .iter()
            .chain(&suite.tags)
            .find(|tag| tag.trim().is_empty())
        {
            return Err(format!("tags must not be empty: {tag:?}"));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err("`timeout` must be greater than zero".to_owned());
        }

        Ok(TestCase {
            id,
            location,
            tags: suite.tags.iter().chain(&self.tags).cloned().collect(),
            dependencies: self.depends_on.into_iter().map(TestId::new).collect(),
            isolation: self.isolation,
            command: TestCommand {
                program,
                args: command.collect(),
                cwd,
                env: self.env,
            },
            timeout: self.timeout,
            disabled: suite.disabled || self.disabled,
        })
    }
}

fn validate_suite_name(name: &str) -> Result<(), String> {
    for component in name.split(TestId::SUITE_SEPARATOR) {
        validate_name_component(component)
            .map_err(|reason| format!("invalid suite name {name:?}: {reason}"))?;
    }
    Ok(())
}

fn validate_name_component(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name must not be empty".to_owned());
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(format!(
            "name {name:?} contains invalid character {c:?} \
             (allowed: ASCII letters, digits, `-`, `_` and `.`)"
        ));
    }
    Ok(())
}

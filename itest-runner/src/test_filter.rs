// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Selection of the tests that run.
//!
//! Tests that don't match a [`TestFilter`] are still part of the run: they are recorded as
//! skipped, with a [`SkipReason`] derived from the [`MismatchReason`].

use crate::catalog::TestCase;
use itest_metadata::SkipReason;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt, str::FromStr};

/// Whether to run disabled tests.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum RunDisabled {
    /// Only run tests that aren't disabled.
    ///
    /// This is the default.
    #[default]
    Default,

    /// Only run tests that are disabled.
    DisabledOnly,

    /// Run both disabled and enabled tests.
    All,
}

impl RunDisabled {
    /// Returns the string representations of every variant.
    pub fn variants() -> [&'static str; 3] {
        ["default", "disabled-only", "all"]
    }
}

impl fmt::Display for RunDisabled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunDisabled::Default => write!(f, "default"),
            RunDisabled::DisabledOnly => write!(f, "disabled-only"),
            RunDisabled::All => write!(f, "all"),
        }
    }
}

impl FromStr for RunDisabled {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let val = match s {
            "default" => RunDisabled::Default,
            "disabled-only" => RunDisabled::DisabledOnly,
            "all" => RunDisabled::All,
            other => return Err(format!("unrecognized value for run-disabled: {other}")),
        };
        Ok(val)
    }
}

/// Builds a [`TestFilter`].
#[derive(Clone, Debug, Default)]
pub struct TestFilterBuilder {
    run_disabled: RunDisabled,
    patterns: Vec<String>,
    tags: BTreeSet<String>,
}

impl TestFilterBuilder {
    /// Creates a new builder that matches every enabled test.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether disabled tests are run.
    pub fn set_run_disabled(&mut self, run_disabled: RunDisabled) -> &mut Self {
        self.run_disabled = run_disabled;
        self
    }

    /// Adds substring patterns matched against test identifiers.
    ///
    /// A test matches if its identifier contains any of the patterns. If no patterns are added,
    /// every identifier matches.
    pub fn add_patterns(
        &mut self,
        patterns: impl IntoIterator<Item = impl Into<String>>,
    ) -> &mut Self {
        self.patterns.extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Adds tags. A test matches if it carries any of the tags. If no tags are added, every test
    /// matches.
    pub fn add_tags(&mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Builds the filter.
    pub fn build(&self) -> TestFilter {
        TestFilter {
            run_disabled: self.run_disabled,
            patterns: self.patterns.clone(),
            tags: self.tags.clone(),
        }
    }
}

/// A filter for tests.
#[derive(Clone, Debug, Default)]
pub struct TestFilter {
    run_disabled: RunDisabled,
    patterns: Vec<String>,
    tags: BTreeSet<String>,
}

impl TestFilter {
    /// Creates a filter that matches every enabled test.
    pub fn any() -> Self {
        Self::default()
    }

    /// Returns an enum describing the match status of `test` against this filter.
    pub fn filter_match(&self, test: &TestCase) -> FilterMatch {
        self.filter_match_parts(test.id().as_str(), test.tags(), test.is_disabled())
    }

    fn filter_match_parts(&self, id: &str, tags: &BTreeSet<String>, disabled: bool) -> FilterMatch {
        match (self.run_disabled, disabled) {
            (RunDisabled::Default, true) | (RunDisabled::DisabledOnly, false) => {
                return FilterMatch::Mismatch {
                    reason: MismatchReason::Disabled,
                };
            }
            _ => {}
        }

        if !self.patterns.is_empty() && !self.patterns.iter().any(|p| id.contains(p.as_str())) {
            return FilterMatch::Mismatch {
                reason: MismatchReason::String,
            };
        }

        if !self.tags.is_empty() && self.tags.is_disjoint(tags) {
            return FilterMatch::Mismatch {
                reason: MismatchReason::Tags,
            };
        }

        FilterMatch::Matches
    }
}

/// An enum describing whether a test matches a filter.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", tag = "status")]
pub enum FilterMatch {
    /// This test matches this filter.
    Matches,

    /// This test does not match this filter.
    ///
    /// The `MismatchReason` inside describes the reason this filter isn't matched.
    Mismatch {
        /// The reason the filter isn't matched.
        reason: MismatchReason,
    },
}

impl FilterMatch {
    /// Returns true if the filter matches.
    pub fn is_match(&self) -> bool {
        matches!(self, FilterMatch::Matches)
    }
}

/// The reason for why a test doesn't match a filter.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MismatchReason {
    /// This test does not match the run-disabled option in the filter.
    Disabled,

    /// This test does not match the provided string filters.
    String,

    /// This test does not carry any of the provided tags.
    Tags,
}

impl MismatchReason {
    /// Returns the reason a mismatched test is recorded as skipped.
    pub fn to_skip_reason(self) -> SkipReason {
        match self {
            MismatchReason::Disabled => SkipReason::Disabled,
            MismatchReason::String | MismatchReason::Tags => SkipReason::FilteredOut,
        }
    }
}

impl fmt::Display for MismatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MismatchReason::Disabled => write!(f, "does not match the run-disabled option"),
            MismatchReason::String => write!(f, "does not match the provided string filters"),
            MismatchReason::Tags => write!(f, "does not carry any of the provided tags"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::{collection::vec, prelude::*};
    use test_case::test_case;

    fn no_tags() -> BTreeSet<String> {
        BTreeSet::new()
    }

    proptest! {
        #[test]
        fn proptest_empty(test_names in vec(any::<String>(), 0..16)) {
            let test_filter = TestFilter::any();
            for test_name in test_names {
                prop_assert!(test_filter.filter_match_parts(&test_name, &no_tags(), false).is_match());
            }
        }

        // Test that exact names match.
        #[test]
        fn proptest_exact(test_names in vec(any::<String>(), 0..16)) {
            let test_filter = TestFilterBuilder::new().add_patterns(&test_names).build();
            for test_name in test_names {
                prop_assert!(test_filter.filter_match_parts(&test_name, &no_tags(), false).is_match());
            }
        }

        // Test that substrings match.
        #[test]
        fn proptest_substring(
            substring_prefix_suffixes in vec([any::<String>(); 3], 0..16),
        ) {
            let mut patterns = Vec::with_capacity(substring_prefix_suffixes.len());
            let mut test_names = Vec::with_capacity(substring_prefix_suffixes.len());
            for [substring, prefix, suffix] in substring_prefix_suffixes {
                test_names.push(prefix + &substring + &suffix);
                patterns.push(substring);
            }

            let test_filter = TestFilterBuilder::new().add_patterns(patterns).build();
            for test_name in test_names {
                prop_assert!(test_filter.filter_match_parts(&test_name, &no_tags(), false).is_match());
            }
        }

        // Test that dropping a character from a string doesn't match.
        #[test]
        fn proptest_no_match(
            substring in any::<String>(),
            prefix in any::<String>(),
            suffix in any::<String>(),
        ) {
            prop_assume!(!substring.is_empty() && !(prefix.is_empty() && suffix.is_empty()));
            let pattern = prefix + &substring + &suffix;
            let test_filter = TestFilterBuilder::new().add_patterns([pattern]).build();
            prop_assert_eq!(
                test_filter.filter_match_parts(&substring, &no_tags(), false),
                FilterMatch::Mismatch { reason: MismatchReason::String },
            );
        }
    }

    #[test_case(&[], &["db"], FilterMatch::Matches ; "no tags requested")]
    #[test_case(&["db", "slow"], &["slow"], FilterMatch::Matches ; "any tag matches")]
    #[test_case(
        &["db"],
        &["slow"],
        FilterMatch::Mismatch { reason: MismatchReason::Tags }
        ; "no tag matches"
    )]
    #[test_case(
        &["db"],
        &[],
        FilterMatch::Mismatch { reason: MismatchReason::Tags }
        ; "untagged test"
    )]
    fn tags(requested: &[&str], carried: &[&str], expected: FilterMatch) {
        let filter = TestFilterBuilder::new().add_tags(requested.iter().copied()).build();
        let carried = carried.iter().map(|s| s.to_string()).collect();
        assert_eq!(filter.filter_match_parts("a", &carried, false), expected);
    }

    #[test_case(RunDisabled::Default, false, true ; "default enabled")]
    #[test_case(RunDisabled::Default, true, false ; "default disabled")]
    #[test_case(RunDisabled::DisabledOnly, false, false ; "only enabled")]
    #[test_case(RunDisabled::DisabledOnly, true, true ; "only disabled")]
    #[test_case(RunDisabled::All, false, true ; "all enabled")]
    #[test_case(RunDisabled::All, true, true ; "all disabled")]
    fn run_disabled(run_disabled: RunDisabled, disabled: bool, matches: bool) {
        let filter = TestFilterBuilder::new()
            .set_run_disabled(run_disabled)
            .build();
        let result = filter.filter_match_parts("a", &no_tags(), disabled);
        assert_eq!(result.is_match(), matches);
        if !matches {
            assert_eq!(
                result,
                FilterMatch::Mismatch {
                    reason: MismatchReason::Disabled
                }
            );
        }
    }

    #[test]
    fn skip_reasons() {
        assert_eq!(
            MismatchReason::Disabled.to_skip_reason(),
            SkipReason::Disabled
        );
        assert_eq!(
            MismatchReason::Tags.to_skip_reason(),
            SkipReason::FilteredOut
        );
    }
}

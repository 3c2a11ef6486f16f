// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Machine-readable output for [itest](https://crates.io/crates/itest-cli).
//!
//! The types in this crate describe the report produced at the end of an itest run. Hosts such as
//! IDE integrations and CI tooling can read the JSON report written by `itest run --report-file`
//! into a [`RunReport`], and use [`ItestExitCode`] to interpret the exit code of the process.
//! `itest list --message-format json` produces a [`TestListSummary`].

mod exit_codes;
mod report;
mod test_list;

pub use exit_codes::*;
pub use report::*;
pub use test_list::*;

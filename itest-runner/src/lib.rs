// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for [itest](https://crates.io/crates/itest-cli), an integration-test
//! orchestrator.
//!
//! The basic flow of a run is:
//!
//! 1. [`catalog`] discovers tests declared in `*.itest.toml` files under a workspace root.
//! 2. [`planner`] orders them into batches that respect declared dependencies and isolation.
//! 3. [`runner`] executes one batch at a time, with a worker limit, timeouts and cooperative
//!    cancellation.
//! 4. [`aggregator`] collects outcomes into an [`itest_metadata::RunReport`].
//!
//! [`orchestrator`] drives the whole cycle and reports progress through [`reporter`] events.
//! [`list`] prints discovered tests without running them.

pub mod aggregator;
pub mod cancel;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod list;
pub mod orchestrator;
pub mod planner;
pub mod reporter;
pub mod runner;
pub mod signal;
pub mod test_filter;
mod time;

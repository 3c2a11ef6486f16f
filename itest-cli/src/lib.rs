// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! An integration-test orchestrator.
//!
//! `itest run` discovers tests declared in `*.itest.toml` files under a workspace, orders them by
//! dependency and isolation, runs them, and exits with a code describing the outcome. See
//! [`itest_metadata::ItestExitCode`] for the list of exit codes.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
#[doc(hidden)]
pub use output::{OutputContext, OutputWriter, StderrStyles};

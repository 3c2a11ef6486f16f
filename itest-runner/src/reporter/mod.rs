// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Report the progress and results of a run in human and machine-readable formats.
//!
//! Progress is delivered as [`RunEvent`]s. A [`Displayer`] turns them into status lines on
//! stderr, and a [`StructuredReporter`] writes the final report to JSON and JUnit files.

mod displayer;
mod events;
mod junit;
mod structured;

pub use displayer::*;
pub use events::*;
pub use structured::StructuredReporter;

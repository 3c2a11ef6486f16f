// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test runner.
//!
//! The main structure in this module is [`Runner`], which executes one batch at a time through a
//! [`TestExecutor`]. [`ProcessExecutor`] launches each test as a child process.

mod executor;
mod imp;
mod process;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        #[path = "unix.rs"]
        mod os;
    } else if #[cfg(windows)] {
        #[path = "windows.rs"]
        mod os;
    } else {
        compile_error!("unsupported target platform");
    }
}

pub use executor::*;
pub(crate) use imp::dependency_skip_reason;
pub use imp::{Runner, RunnerBuilder, RunnerEvent};
pub use process::ProcessExecutor;

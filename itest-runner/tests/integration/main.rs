// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

mod fixtures;
mod orchestrator;
#[cfg(unix)]
mod process;

// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cooperative cancellation for test runs.

use itest_metadata::CancelReason;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// A shared signal that a run should stop.
///
/// Cancellation happens in two stages. [`cancel`](Self::cancel) stops new tests from starting and
/// gives in-flight tests the grace period to finish. [`kill`](Self::kill) additionally terminates
/// in-flight tests immediately.
///
/// Clones share state, so a host can keep a clone to cancel a run from another thread.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<CancelTokenInner>,
}

#[derive(Debug, Default)]
struct CancelTokenInner {
    cancel: CancellationToken,
    kill: CancellationToken,
    reason: Mutex<Option<CancelReason>>,
}

impl CancelToken {
    /// Creates a new, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation for the given reason.
    ///
    /// If the token is already cancelled, the more severe of the two reasons is kept. Returns true
    /// if the recorded reason changed.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        let changed = {
            let mut current = self
                .inner
                .reason
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if *current < Some(reason) {
                *current = Some(reason);
                true
            } else {
                false
            }
        };
        // Record the reason before waking waiters, so they always observe it.
        self.inner.cancel.cancel();
        changed
    }

    /// Requests that in-flight tests be terminated immediately. Also cancels the run.
    pub fn kill(&self, reason: CancelReason) {
        self.cancel(reason);
        self.inner.kill.cancel();
    }

    /// Returns true if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Returns true if in-flight tests should be terminated immediately.
    pub fn is_killed(&self) -> bool {
        self.inner.kill.is_cancelled()
    }

    /// Returns the most severe reason cancellation was requested for, if any.
    pub fn reason(&self) -> Option<CancelReason> {
        *self
            .inner
            .reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits until cancellation is requested.
    pub async fn cancelled(&self) {
        self.inner.cancel.cancelled().await
    }

    /// Waits until in-flight tests should be terminated.
    pub async fn killed(&self) {
        self.inner.kill.cancelled().await
    }
}

// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turning shutdown signals into cancellation requests.
//!
//! The first signal cancels the run, the second kills in-flight tests and the third aborts the
//! process.

use crate::{cancel::CancelToken, errors::SignalHandlerSetupError};
use debug_ignore::DebugIgnore;
use futures::{
    FutureExt, StreamExt,
    stream::{BoxStream, SelectAll},
};
use itest_metadata::CancelReason;
use tracing::{debug, warn};

/// The kind of signal handling to set up for a test run.
///
/// A `SignalHandlerKind` can be passed into
/// [`OrchestratorBuilder::set_signal_handler_kind`](crate::orchestrator::OrchestratorBuilder::set_signal_handler_kind).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum SignalHandlerKind {
    /// Listen for SIGINT, SIGTERM and SIGHUP on Unix, and Ctrl-C on Windows.
    Standard,

    /// Don't listen for signals. Useful for tests and for hosts that handle signals themselves.
    Noop,
}

impl SignalHandlerKind {
    /// Must be called from within a Tokio runtime context.
    pub(crate) fn build(self) -> Result<SignalHandler, SignalHandlerSetupError> {
        match self {
            Self::Standard => Ok(SignalHandler::from_streams(os::shutdown_signals()?)),
            Self::Noop => Ok(SignalHandler::from_streams(Vec::new())),
        }
    }
}

/// Each item is the reason the signal cancels the run.
type SignalStream = BoxStream<'static, CancelReason>;

/// Listens for shutdown signals and counts them.
#[derive(Debug)]
pub(crate) struct SignalHandler {
    signals: DebugIgnore<SelectAll<SignalStream>>,
    received: usize,
}

impl SignalHandler {
    fn from_streams(streams: Vec<SignalStream>) -> Self {
        Self {
            signals: DebugIgnore(futures::stream::select_all(streams)),
            received: 0,
        }
    }

    /// Waits for the next signal and returns what it asks for.
    ///
    /// Returns `None` immediately if no signals are being listened for.
    pub(crate) async fn recv(&mut self) -> Option<ShutdownRequest> {
        let reason = self.signals.next().await?;
        self.received += 1;
        Some(match self.received {
            1 => ShutdownRequest::Cancel(reason),
            2 => ShutdownRequest::Kill(reason),
            _ => ShutdownRequest::Abort,
        })
    }

    /// Returns a request for a signal that has already arrived, without waiting.
    ///
    /// Must be called from within a Tokio runtime context.
    pub(crate) fn try_recv(&mut self) -> Option<ShutdownRequest> {
        self.recv().now_or_never().flatten()
    }
}

/// What a shutdown signal asks of the run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum ShutdownRequest {
    /// Stop starting tests, and give in-flight ones the grace period.
    Cancel(CancelReason),
    /// Terminate in-flight tests immediately.
    Kill(CancelReason),
    /// Exit without waiting for anything.
    Abort,
}

impl ShutdownRequest {
    /// Applies this request to a run's cancellation token.
    pub(crate) fn apply(self, cancel: &CancelToken) {
        match self {
            Self::Cancel(reason) => {
                debug!(%reason, "received shutdown signal, cancelling run");
                cancel.cancel(reason);
            }
            Self::Kill(reason) => {
                warn!("received second shutdown signal, terminating running tests");
                cancel.kill(reason);
            }
            Self::Abort => panic!("Signaled 3 times, exiting immediately"),
        }
    }
}

#[cfg(unix)]
mod os {
    use super::SignalStream;
    use futures::StreamExt;
    use itest_metadata::CancelReason;
    use tokio::signal::unix::{SignalKind, signal};

    pub(super) fn shutdown_signals() -> std::io::Result<Vec<SignalStream>> {
        [
            (SignalKind::interrupt(), CancelReason::Interrupt),
            (SignalKind::terminate(), CancelReason::Signal),
            (SignalKind::hangup(), CancelReason::Signal),
        ]
        .into_iter()
        .map(|(kind, reason)| {
            let signal = signal(kind)?;
            Ok(futures::stream::unfold(signal, move |mut signal| async move {
                signal.recv().await.map(|()| (reason, signal))
            })
            .boxed())
        })
        .collect()
    }
}

#[cfg(windows)]
mod os {
    use super::SignalStream;
    use futures::StreamExt;
    use itest_metadata::CancelReason;
    use tokio::signal::windows::ctrl_c;

    pub(super) fn shutdown_signals() -> std::io::Result<Vec<SignalStream>> {
        let ctrl_c = ctrl_c()?;
        let stream = futures::stream::unfold(ctrl_c, |mut ctrl_c| async move {
            ctrl_c.recv().await.map(|()| (CancelReason::Interrupt, ctrl_c))
        });
        Ok(vec![stream.boxed()])
    }
}

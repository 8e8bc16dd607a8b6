//! Termination signal subscription.

use std::io;

use futures_util::future::select_all;
use tokio::signal::unix::{signal, Signal, SignalKind};

use crate::config::DEFAULT_SHUTDOWN_SIGNALS;

/// Subscription to a set of termination signals.
///
/// Signals delivered after [`ShutdownSignals::subscribe`] returns are kept
/// until [`ShutdownSignals::recv`] observes them. Dropping the value ends the
/// subscription.
pub struct ShutdownSignals {
    signals: Vec<i32>,
    streams: Vec<Signal>,
}

impl ShutdownSignals {
    /// Starts listening for every signal in `signals`, or for
    /// [`DEFAULT_SHUTDOWN_SIGNALS`] when `signals` is empty.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(signals: &[i32]) -> io::Result<Self> {
        let signals = if signals.is_empty() {
            DEFAULT_SHUTDOWN_SIGNALS.to_vec()
        } else {
            signals.to_vec()
        };
        let streams = signals
            .iter()
            .map(|raw| signal(SignalKind::from_raw(*raw)))
            .collect::<io::Result<Vec<_>>>()?;

        Ok(Self { signals, streams })
    }

    /// Signal numbers this subscription listens for.
    pub fn signals(&self) -> &[i32] {
        &self.signals
    }

    /// Completes when any of the subscribed signals is received.
    pub async fn recv(&mut self) {
        let waits = self
            .streams
            .iter_mut()
            .map(|stream| Box::pin(stream.recv()));

        select_all(waits).await;
    }
}

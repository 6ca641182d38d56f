//! Interval driver shared by the import loop and the reconciler

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sleeps between loop iterations until cancelled
///
/// Loops call [`wait`](Self::wait) after each iteration and stop once it
/// returns `false`. A tick already in progress is never interrupted.
#[derive(Clone, Debug)]
pub struct Ticker {
    interval: Duration,
    cancel: CancellationToken,
}

impl Ticker {
    /// Ticker firing every `interval` until `cancel` is triggered
    pub fn new(interval: Duration, cancel: CancellationToken) -> Self {
        Self { interval, cancel }
    }

    /// Time between iterations
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the owning loop should stop
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Sleep one interval; `false` means shut down instead of ticking again
    pub async fn wait(&self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.interval) => !self.cancel.is_cancelled(),
        }
    }
}

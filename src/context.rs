use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::Interrupt;

/// Cancellation token plus optional deadline, shared by every fetch, store
/// call and handoff send of one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl RunContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// Bound the run to `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Non-blocking check, used between suspension points.
    pub fn interrupted(&self) -> Option<Interrupt> {
        if self.cancel.is_cancelled() {
            return Some(Interrupt::Cancelled);
        }
        match self.deadline {
            Some(at) if Instant::now() >= at => Some(Interrupt::DeadlineExceeded),
            _ => None,
        }
    }

    /// Drive `fut` unless the run is cancelled or its deadline passes first.
    /// The losing future is dropped.
    pub async fn guard<F>(&self, fut: F) -> Result<F::Output, Interrupt>
    where
        F: Future,
    {
        if let Some(reason) = self.interrupted() {
            return Err(reason);
        }
        tokio::select! {
            biased;
            reason = self.until_interrupted() => Err(reason),
            out = fut => Ok(out),
        }
    }

    /// Resolves once the run is cancelled or its deadline passes.
    pub async fn until_interrupted(&self) -> Interrupt {
        match self.deadline {
            Some(at) => tokio::select! {
                _ = self.cancel.cancelled() => Interrupt::Cancelled,
                _ = tokio::time::sleep_until(at) => Interrupt::DeadlineExceeded,
            },
            None => {
                self.cancel.cancelled().await;
                Interrupt::Cancelled
            }
        }
    }
}

//! Deadline and cancellation aware polling.
//!
//! Every bounded wait in kete is an explicit loop driven by a [`Poller`]:
//!
//! ```ignore
//! let mut poller = Poller::new("pod running", interval, timeout, cancel.clone());
//! loop {
//!     poller.tick().await?;
//!     if done { break; }
//!     poller.note("pod is Pending");
//! }
//! ```
//!
//! `tick` returns immediately on the first call. Later calls fail with
//! `Timeout` (carrying the last noted diagnostic) once the deadline has
//! passed, otherwise sleep one interval. Cancellation is observed before
//! every attempt and while sleeping.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{KeteError, Result};

#[derive(Debug)]
pub struct Poller {
    operation: String,
    interval: Duration,
    deadline: Instant,
    cancel: CancellationToken,
    attempts: u32,
    last_diagnostic: String,
}

impl Poller {
    pub fn new(
        operation: impl Into<String>,
        interval: Duration,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            operation: operation.into(),
            interval,
            deadline: Instant::now() + timeout,
            cancel,
            attempts: 0,
            last_diagnostic: "no attempt completed".to_string(),
        }
    }

    /// Wait for the next attempt.
    pub async fn tick(&mut self) -> Result<()> {
        if self.attempts > 0 {
            if Instant::now() >= self.deadline {
                return Err(KeteError::timeout(
                    self.operation.clone(),
                    self.last_diagnostic.clone(),
                ));
            }

            tokio::select! {
                () = self.cancel.cancelled() => {
                    return Err(KeteError::Cancelled(self.operation.clone()));
                }
                () = tokio::time::sleep(self.interval) => {}
            }
        }

        if self.cancel.is_cancelled() {
            return Err(KeteError::Cancelled(self.operation.clone()));
        }

        self.attempts += 1;
        debug!(
            operation = %self.operation,
            attempt = self.attempts,
            "Polling"
        );
        Ok(())
    }

    /// Record why the current attempt did not finish the wait.
    pub fn note(&mut self, diagnostic: impl Into<String>) {
        self.last_diagnostic = diagnostic.into();
    }

    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_diagnostic(&self) -> &str {
        &self.last_diagnostic
    }
}

//! Shared poll-until-terminal primitive used by every engine.
//!
//! Fixed interval, bounded total time, prompt exit on cancellation. A
//! cancellation is reported distinctly from a timeout so callers can tell
//! "the operator stopped us" from "the cloud never settled".

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{DeployError, Result};

/// One observation of the polled resource.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus<T> {
    /// Terminal success.
    Ready(T),
    /// Terminal failure reported by the control plane.
    Failed { state: String, message: String },
    /// Still converging; the string is the human-readable progress line.
    Pending(String),
}

/// Poll `check` every `interval` until it reports a terminal status or the
/// `budget` elapses.
pub async fn until_terminal<T, F, Fut>(
    cancel: &CancellationToken,
    what: &str,
    interval: Duration,
    budget: Duration,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollStatus<T>>>,
{
    let deadline = Instant::now() + budget;
    loop {
        if cancel.is_cancelled() {
            return Err(DeployError::Cancelled);
        }

        match check().await? {
            PollStatus::Ready(value) => return Ok(value),
            PollStatus::Failed { state, message } => {
                return Err(DeployError::TerminalFailure {
                    what: what.to_string(),
                    state,
                    message,
                });
            }
            PollStatus::Pending(progress) => {
                info!("waiting for {what}: {progress}");
            }
        }

        if Instant::now() + interval > deadline {
            return Err(DeployError::Timeout {
                what: what.to_string(),
                budget,
            });
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(DeployError::Cancelled),
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

//! Bounded polling for server-side media processing
//!
//! Video containers are not publishable until the platform has processed
//! them. [`poll_until_ready`] checks the status every `interval` and gives
//! up at `ceiling`; it never runs past the ceiling, even when a single
//! status check hangs.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};

use crate::config::SchedulerConfig;
use crate::error::Result;

/// How media processing ended, as seen by the poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingOutcome {
    Finished,
    /// The ceiling elapsed before a terminal status was seen
    TimedOut,
    Errored,
}

/// One status check's verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingStatus {
    Ready,
    Failed(String),
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub ceiling: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            ceiling: Duration::from_secs(120),
        }
    }
}

impl PollPolicy {
    pub fn from_config(config: &SchedulerConfig) -> Result<Self> {
        Ok(Self {
            interval: config.poll_interval()?,
            ceiling: config.poll_ceiling()?,
        })
    }
}

/// Poll `check` until it reports a terminal status or the ceiling passes.
///
/// The first check runs immediately.
pub async fn poll_until_ready<F, Fut>(policy: PollPolicy, mut check: F) -> ProcessingOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProcessingStatus>,
{
    let deadline = Instant::now() + policy.ceiling;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match timeout_at(deadline, check()).await {
            Ok(ProcessingStatus::Ready) => return ProcessingOutcome::Finished,
            Ok(ProcessingStatus::Failed(reason)) => {
                tracing::warn!(attempts, reason = %reason, "Media processing failed");
                return ProcessingOutcome::Errored;
            }
            Ok(ProcessingStatus::Pending) => {}
            Err(_) => break,
        }

        let now = Instant::now();
        if now >= deadline {
            break;
        }
        sleep(policy.interval.min(deadline - now)).await;
    }

    tracing::warn!(
        attempts,
        ceiling_secs = policy.ceiling.as_secs(),
        "Media processing did not finish before the ceiling"
    );
    ProcessingOutcome::TimedOut
}

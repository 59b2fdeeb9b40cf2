//! Mock publish adapter for testing
//!
//! Simulates successes, failures, panics and latency, and records every
//! call so scheduler and dispatcher tests can count outbound attempts
//! without network access.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use super::{PublishAdapter, PublishReceipt, PublishRequest, PublishResult};
use crate::credentials::Credential;
use crate::error::PlatformError;
use crate::platforms::ProcessingOutcome;

/// Configuration for mock adapter behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Adapter name reported by `name()`
    pub name: String,

    /// Error to return instead of a receipt
    pub error: Option<PlatformError>,

    /// Panic inside `publish` (exercises the dispatcher's unwind handling)
    pub panics: bool,

    /// Delay before completing (simulates network latency)
    pub delay: Duration,

    /// Processing outcome to report on success
    pub processing: Option<ProcessingOutcome>,

    /// Every request seen, with the instant it arrived
    pub calls: Arc<Mutex<Vec<(DateTime<Utc>, PublishRequest)>>>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            error: None,
            panics: false,
            delay: Duration::from_millis(0),
            processing: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

pub struct MockAdapter {
    config: MockConfig,
}

impl MockAdapter {
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    /// A mock adapter that always succeeds
    pub fn success(name: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            ..Default::default()
        })
    }

    /// A mock adapter that fails every publish with `error`
    pub fn failure(name: &str, error: PlatformError) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            error: Some(error),
            ..Default::default()
        })
    }

    /// A mock adapter that panics mid-publish
    pub fn panicking(name: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            panics: true,
            ..Default::default()
        })
    }

    pub fn with_delay(name: &str, delay: Duration) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            delay,
            ..Default::default()
        })
    }

    /// A successful adapter that reports a processing outcome
    pub fn with_processing(name: &str, outcome: ProcessingOutcome) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            processing: Some(outcome),
            ..Default::default()
        })
    }

    /// Number of times publish was called
    pub fn call_count(&self) -> usize {
        self.config.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Instants at which publish was called
    pub fn call_times(&self) -> Vec<DateTime<Utc>> {
        self.config
            .calls
            .lock()
            .map(|c| c.iter().map(|(at, _)| *at).collect())
            .unwrap_or_default()
    }

    /// Requests that were published (or attempted)
    pub fn requests(&self) -> Vec<PublishRequest> {
        self.config
            .calls
            .lock()
            .map(|c| c.iter().map(|(_, r)| r.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PublishAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn publish(&self, request: &PublishRequest, _credential: &Credential) -> PublishResult {
        if let Ok(mut calls) = self.config.calls.lock() {
            calls.push((Utc::now(), request.clone()));
        }

        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        if self.config.panics {
            panic!("mock adapter '{}' panicked", self.config.name);
        }

        if let Some(error) = &self.config.error {
            return Err(error.clone());
        }

        Ok(PublishReceipt {
            platform_post_id: format!("{}:mock-{}", self.config.name, uuid::Uuid::new_v4()),
            processing: self.config.processing,
        })
    }
}

//! Publish dispatcher
//!
//! Runs one publish attempt for a post whose timer fired:
//!
//! 1. re-read the post; skip if it is gone or already published
//! 2. take the advisory lease, or skip if another attempt holds it
//! 3. resolve credentials and the platform adapter, then publish
//! 4. clear the lease and record the result: `published` on success,
//!    `draft` with `last_error` on any failure (a panicking adapter included)

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::credentials::CredentialResolver;
use crate::db::PostStore;
use crate::error::{PlatformError, PostpilotError, Result};
use crate::events::{Event, EventBus, SkipReason};
use crate::lease::{self, LeaseState};
use crate::platforms::{AdapterRegistry, ProcessingOutcome, PublishReceipt, PublishRequest};
use crate::types::{PostStatus, ScheduledPost};

/// How a single dispatch ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Published { platform_post_id: String },
    /// The post is back in draft with this error recorded
    Failed { error: String },
    NotFound,
    AlreadyPublished,
    /// A live lease from another attempt
    InProgress,
}

#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn PostStore>,
    credentials: CredentialResolver,
    adapters: AdapterRegistry,
    events: EventBus,
    lease_ttl: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn PostStore>,
        credentials: CredentialResolver,
        adapters: AdapterRegistry,
        events: EventBus,
        lease_ttl: Duration,
    ) -> Self {
        Self {
            store,
            credentials,
            adapters,
            events,
            lease_ttl,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Run one publish attempt for `post_id`.
    ///
    /// Adapter failures are not errors here: they end as
    /// [`DispatchOutcome::Failed`] with the post in draft. `Err` means the
    /// store itself could not be read or written.
    pub async fn dispatch(&self, post_id: &str) -> Result<DispatchOutcome> {
        let Some(mut post) = self.store.get_post(post_id).await? else {
            tracing::warn!(post_id = %post_id, "Scheduled post no longer exists");
            return Ok(self.skip(post_id, SkipReason::NotFound, DispatchOutcome::NotFound));
        };

        if post.status == PostStatus::Published {
            tracing::info!(post_id = %post_id, "Post already published, skipping");
            return Ok(self.skip(
                post_id,
                SkipReason::AlreadyPublished,
                DispatchOutcome::AlreadyPublished,
            ));
        }

        let now = Utc::now().timestamp();
        match LeaseState::evaluate(&post.metadata, now, self.lease_ttl) {
            LeaseState::Held { age_secs } => {
                tracing::info!(
                    post_id = %post_id,
                    lease_age_secs = age_secs,
                    "Another attempt holds the publishing lease, skipping"
                );
                return Ok(self.skip(post_id, SkipReason::InProgress, DispatchOutcome::InProgress));
            }
            LeaseState::Stale { age_secs } => {
                tracing::warn!(
                    post_id = %post_id,
                    lease_age_secs = age_secs,
                    "Taking over stale publishing lease"
                );
            }
            LeaseState::Free => {}
        }

        lease::acquire(&mut post.metadata, now);
        self.store.update_metadata(post_id, &post.metadata).await?;

        self.events.emit(Event::PublishStarted {
            post_id: post_id.to_string(),
            platform: post.platform.to_string(),
        });

        let attempt = AssertUnwindSafe(self.attempt(&post)).catch_unwind().await;
        let result = match attempt {
            Ok(result) => result,
            Err(panic) => Err(PlatformError::Protocol(format!(
                "adapter panicked: {}",
                panic_message(panic.as_ref())
            ))
            .into()),
        };

        self.finish(post, result).await
    }

    async fn attempt(&self, post: &ScheduledPost) -> Result<PublishReceipt> {
        let credential = self.credentials.resolve(&post.user_id, post.platform).await?;

        let adapter = self.adapters.get(post.platform).ok_or_else(|| {
            PlatformError::Configuration(format!("No adapter registered for {}", post.platform))
        })?;

        let request = PublishRequest::from_post(post);
        Ok(adapter.publish(&request, &credential).await?)
    }

    async fn finish(
        &self,
        mut post: ScheduledPost,
        result: Result<PublishReceipt>,
    ) -> Result<DispatchOutcome> {
        post.metadata.clear_lease();
        let platform = post.platform.to_string();

        match result {
            Ok(receipt) => {
                if receipt.processing == Some(ProcessingOutcome::TimedOut) {
                    self.events.emit(Event::ProcessingTimedOut {
                        post_id: post.id.clone(),
                        platform: platform.clone(),
                    });
                }

                post.metadata.last_error = None;
                post.metadata.platform_post_id = Some(receipt.platform_post_id.clone());
                self.store
                    .mark_published(&post.id, Utc::now().timestamp(), &post.metadata)
                    .await?;

                tracing::info!(
                    post_id = %post.id,
                    platform = %platform,
                    platform_post_id = %receipt.platform_post_id,
                    "Post published"
                );
                self.events.emit(Event::Published {
                    post_id: post.id.clone(),
                    platform,
                    platform_post_id: receipt.platform_post_id.clone(),
                });

                Ok(DispatchOutcome::Published {
                    platform_post_id: receipt.platform_post_id,
                })
            }
            Err(e) => {
                let error = failure_message(&e);
                post.metadata.last_error = Some(error.clone());
                self.store.mark_draft(&post.id, &post.metadata).await?;

                tracing::error!(
                    post_id = %post.id,
                    platform = %platform,
                    error = %error,
                    "Publish failed, post moved back to draft"
                );
                self.events.emit(Event::PublishFailed {
                    post_id: post.id.clone(),
                    platform,
                    error: error.clone(),
                });

                Ok(DispatchOutcome::Failed { error })
            }
        }
    }

    fn skip(&self, post_id: &str, reason: SkipReason, outcome: DispatchOutcome) -> DispatchOutcome {
        self.events.emit(Event::Skipped {
            post_id: post_id.to_string(),
            reason,
        });
        outcome
    }
}

/// The text stored as `last_error`
fn failure_message(err: &PostpilotError) -> String {
    match err {
        PostpilotError::Platform(e) => e.to_string(),
        other => other.to_string(),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

//! Platform publish adapters
//!
//! Every platform implements [`PublishAdapter`]: take a normalized
//! [`PublishRequest`] plus a resolved [`Credential`] and run that
//! platform's publish protocol to completion. The dispatcher picks the
//! adapter for a post through [`AdapterRegistry`].
//!
//! Protocol shapes:
//! - single call (Facebook text, image and video)
//! - container then publish (Instagram image)
//! - carousel: N child creates, one parent create, one publish
//! - poll then publish (Instagram reels), see [`processing`]
//!
//! # Example
//!
//! ```no_run
//! use libpostpilot::config::Config;
//! use libpostpilot::credentials::Credential;
//! use libpostpilot::platforms::{AdapterRegistry, PublishRequest};
//! use libpostpilot::types::{Platform, ScheduledPost};
//!
//! # async fn example(post: ScheduledPost) -> libpostpilot::error::Result<()> {
//! let registry = AdapterRegistry::from_config(&Config::default())?;
//! let adapter = registry.get(Platform::Facebook).expect("registered");
//!
//! let credential = Credential::new(Platform::Facebook, "page-token", Some("1234"));
//! let receipt = adapter
//!     .publish(&PublishRequest::from_post(&post), &credential)
//!     .await?;
//! println!("Published as {}", receipt.platform_post_id);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::credentials::Credential;
use crate::error::{PlatformError, Result};
use crate::types::{MediaRef, Platform, ScheduledPost};

pub mod facebook;
pub mod graph;
pub mod instagram;
pub mod processing;
pub mod youtube;

// In-memory adapter for driving the scheduler without a network
pub mod mock;

pub use processing::{PollPolicy, ProcessingOutcome};

/// Result type of a single adapter run
pub type PublishResult = std::result::Result<PublishReceipt, PlatformError>;

/// A post, reduced to what a platform needs to publish it
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRequest {
    pub post_id: String,
    pub platform: Platform,
    /// Text with hashtags appended
    pub caption: String,
    pub title: Option<String>,
    pub media: MediaRef,
}

impl PublishRequest {
    pub fn from_post(post: &ScheduledPost) -> Self {
        Self {
            post_id: post.id.clone(),
            platform: post.platform,
            caption: build_caption(&post.text, &post.hashtags),
            title: post.title.clone(),
            media: post.media.clone(),
        }
    }
}

/// Join body text and hashtags, adding the `#` where it is missing
pub fn build_caption(text: &str, hashtags: &[String]) -> String {
    let tags: Vec<String> = hashtags
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty() && *t != "#")
        .map(|t| {
            if t.starts_with('#') {
                t.to_string()
            } else {
                format!("#{}", t)
            }
        })
        .collect();

    let text = text.trim();
    match (text.is_empty(), tags.is_empty()) {
        (_, true) => text.to_string(),
        (true, false) => tags.join(" "),
        (false, false) => format!("{}\n\n{}", text, tags.join(" ")),
    }
}

/// What a successful publish produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub platform_post_id: String,
    /// Set when the protocol waited on media processing
    pub processing: Option<ProcessingOutcome>,
}

impl PublishReceipt {
    pub fn new(platform_post_id: String) -> Self {
        Self {
            platform_post_id,
            processing: None,
        }
    }
}

#[async_trait]
pub trait PublishAdapter: Send + Sync {
    /// Lowercase identifier used in logs
    fn name(&self) -> &str;

    /// Run the platform's publish protocol for one post.
    ///
    /// # Errors
    ///
    /// - `PlatformError::Unsupported` when the platform cannot express the
    ///   post; no request is sent
    /// - `PlatformError::Configuration` when the credential lacks an account id
    /// - `PlatformError::Protocol` / `PlatformError::Network` from the platform
    async fn publish(&self, request: &PublishRequest, credential: &Credential) -> PublishResult;
}

/// Platform to adapter lookup used by the dispatcher
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Platform, Arc<dyn PublishAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Production adapters for every platform
    pub fn from_config(config: &Config) -> Result<Self> {
        let poll = PollPolicy::from_config(&config.scheduler)?;

        let mut registry = Self::new();
        registry.register(
            Platform::Facebook,
            Arc::new(facebook::FacebookAdapter::new(&config.platforms.facebook)?),
        );
        registry.register(
            Platform::Instagram,
            Arc::new(instagram::InstagramAdapter::new(&config.platforms.instagram, poll)?),
        );
        registry.register(Platform::Youtube, Arc::new(youtube::YoutubeAdapter));
        Ok(registry)
    }

    /// Register (or replace) the adapter for a platform
    pub fn register(&mut self, platform: Platform, adapter: Arc<dyn PublishAdapter>) {
        self.adapters.insert(platform, adapter);
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn PublishAdapter>> {
        self.adapters.get(&platform).cloned()
    }
}

/// Build the error for a failed carousel child.
///
/// Children created before the failure are not retracted; their ids are
/// logged and carried in the message.
pub(crate) fn carousel_child_failure(
    platform: &str,
    post_id: &str,
    index: usize,
    total: usize,
    created: &[String],
    err: PlatformError,
) -> PlatformError {
    if !created.is_empty() {
        tracing::warn!(
            post_id = %post_id,
            platform = %platform,
            orphaned_children = ?created,
            "Carousel aborted with children already created"
        );
    }

    let detail = format!(
        "carousel item {} of {} failed: {}; orphaned children: [{}]",
        index + 1,
        total,
        error_detail(&err),
        created.join(", ")
    );

    match err {
        PlatformError::Network(_) => PlatformError::Network(detail),
        PlatformError::Configuration(_) => PlatformError::Configuration(detail),
        PlatformError::Unsupported(_) => PlatformError::Unsupported(detail),
        PlatformError::Protocol(_) => PlatformError::Protocol(detail),
    }
}

/// The message inside an error, without the variant prefix
pub(crate) fn error_detail(err: &PlatformError) -> &str {
    match err {
        PlatformError::Configuration(msg)
        | PlatformError::Protocol(msg)
        | PlatformError::Network(msg)
        | PlatformError::Unsupported(msg) => msg,
    }
}

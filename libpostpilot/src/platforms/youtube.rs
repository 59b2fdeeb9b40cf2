//! YouTube placeholder
//!
//! Channels can be connected, but uploads are not implemented: every
//! publish fails as unsupported before any request is made.

use async_trait::async_trait;

use super::{PublishAdapter, PublishRequest, PublishResult};
use crate::credentials::Credential;
use crate::error::PlatformError;

pub struct YoutubeAdapter;

#[async_trait]
impl PublishAdapter for YoutubeAdapter {
    fn name(&self) -> &str {
        "youtube"
    }

    async fn publish(&self, request: &PublishRequest, _credential: &Credential) -> PublishResult {
        tracing::debug!(post_id = %request.post_id, "YouTube publish requested");
        Err(PlatformError::Unsupported(
            "YouTube publishing is not supported".to_string(),
        ))
    }
}

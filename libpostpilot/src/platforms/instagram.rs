//! Instagram business account publishing
//!
//! Every Instagram publish is container based: create a media container on
//! `/{ig}/media`, then `POST /{ig}/media_publish creation_id=…`. Carousels
//! create one container per image first; reels wait for processing.

use async_trait::async_trait;
use secrecy::SecretString;

use super::graph::{response_id, GraphClient};
use super::processing::{poll_until_ready, PollPolicy, ProcessingOutcome, ProcessingStatus};
use super::{carousel_child_failure, PublishAdapter, PublishReceipt, PublishRequest, PublishResult};
use crate::config::GraphPlatformConfig;
use crate::credentials::Credential;
use crate::error::{PlatformError, Result};
use crate::types::MediaRef;

pub struct InstagramAdapter {
    graph: GraphClient,
    poll: PollPolicy,
}

impl InstagramAdapter {
    pub fn new(config: &GraphPlatformConfig, poll: PollPolicy) -> Result<Self> {
        Ok(Self {
            graph: GraphClient::new(config)?,
            poll,
        })
    }

    async fn create_container(
        &self,
        phase: &str,
        ig_id: &str,
        token: &SecretString,
        params: &[(&str, String)],
    ) -> std::result::Result<String, PlatformError> {
        let value = self
            .graph
            .post(phase, &format!("{}/media", ig_id), token, params)
            .await?;
        response_id(phase, &value, "id")
    }

    async fn publish_container(
        &self,
        ig_id: &str,
        token: &SecretString,
        container_id: &str,
    ) -> std::result::Result<String, PlatformError> {
        let value = self
            .graph
            .post(
                "Instagram media_publish",
                &format!("{}/media_publish", ig_id),
                token,
                &[("creation_id", container_id.to_string())],
            )
            .await?;
        response_id("Instagram media_publish", &value, "id")
    }

    async fn container_status(&self, container_id: &str, token: &SecretString) -> ProcessingStatus {
        let value = match self
            .graph
            .get(
                "Instagram container status",
                container_id,
                token,
                &[("fields", "status_code")],
            )
            .await
        {
            Ok(value) => value,
            Err(e) => {
                // Not ready yet as far as the loop is concerned
                tracing::warn!(container_id = %container_id, error = %e, "Status check failed");
                return ProcessingStatus::Pending;
            }
        };

        match value.get("status_code").and_then(|s| s.as_str()) {
            Some("FINISHED") | Some("PUBLISHED") => ProcessingStatus::Ready,
            Some(code @ ("ERROR" | "EXPIRED")) => ProcessingStatus::Failed(code.to_string()),
            _ => ProcessingStatus::Pending,
        }
    }

    async fn publish_carousel(
        &self,
        request: &PublishRequest,
        ig_id: &str,
        token: &SecretString,
        images: &[String],
    ) -> PublishResult {
        let mut children = Vec::with_capacity(images.len());
        for (index, url) in images.iter().enumerate() {
            let created = self
                .create_container(
                    "Instagram carousel child",
                    ig_id,
                    token,
                    &[
                        ("image_url", url.clone()),
                        ("is_carousel_item", "true".to_string()),
                    ],
                )
                .await;

            match created {
                Ok(id) => children.push(id),
                Err(e) => {
                    return Err(carousel_child_failure(
                        self.name(),
                        &request.post_id,
                        index,
                        images.len(),
                        &children,
                        e,
                    ))
                }
            }
        }

        let parent = self
            .create_container(
                "Instagram carousel parent",
                ig_id,
                token,
                &[
                    ("media_type", "CAROUSEL".to_string()),
                    ("children", children.join(",")),
                    ("caption", request.caption.clone()),
                ],
            )
            .await?;

        let media_id = self.publish_container(ig_id, token, &parent).await?;
        Ok(PublishReceipt::new(media_id))
    }

    async fn publish_reel(
        &self,
        request: &PublishRequest,
        ig_id: &str,
        token: &SecretString,
        video_url: &str,
    ) -> PublishResult {
        let container = self
            .create_container(
                "Instagram reel container",
                ig_id,
                token,
                &[
                    ("media_type", "REELS".to_string()),
                    ("video_url", video_url.to_string()),
                    ("caption", request.caption.clone()),
                ],
            )
            .await?;

        let outcome = poll_until_ready(self.poll, || self.container_status(&container, token)).await;

        match outcome {
            ProcessingOutcome::Errored => {
                return Err(PlatformError::Protocol(format!(
                    "media processing failed for container {}",
                    container
                )))
            }
            ProcessingOutcome::TimedOut => {
                tracing::warn!(
                    post_id = %request.post_id,
                    container_id = %container,
                    "Publishing reel before processing finished"
                );
            }
            ProcessingOutcome::Finished => {}
        }

        let media_id = self.publish_container(ig_id, token, &container).await?;
        Ok(PublishReceipt {
            platform_post_id: media_id,
            processing: Some(outcome),
        })
    }
}

#[async_trait]
impl PublishAdapter for InstagramAdapter {
    fn name(&self) -> &str {
        "instagram"
    }

    async fn publish(&self, request: &PublishRequest, credential: &Credential) -> PublishResult {
        let ig_id = match &request.media {
            MediaRef::None => return Err(text_only()),
            MediaRef::Carousel(images) if images.is_empty() => {
                return Err(PlatformError::Unsupported(
                    "carousel without images".to_string(),
                ))
            }
            _ => credential.require_account("business account id")?,
        };
        let token = &credential.access_token;

        tracing::info!(
            post_id = %request.post_id,
            media = request.media.kind(),
            "Publishing to Instagram account {}",
            ig_id
        );

        match &request.media {
            MediaRef::Image(url) => {
                let container = self
                    .create_container(
                        "Instagram image container",
                        ig_id,
                        token,
                        &[("image_url", url.clone()), ("caption", request.caption.clone())],
                    )
                    .await?;
                let media_id = self.publish_container(ig_id, token, &container).await?;
                Ok(PublishReceipt::new(media_id))
            }
            MediaRef::Video(url) => self.publish_reel(request, ig_id, token, url).await,
            MediaRef::Carousel(images) => {
                self.publish_carousel(request, ig_id, token, images).await
            }
            MediaRef::None => Err(text_only()),
        }
    }
}

fn text_only() -> PlatformError {
    PlatformError::Unsupported("Instagram posts require an image, video or carousel".to_string())
}

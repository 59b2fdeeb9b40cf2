//! Facebook Page publishing
//!
//! - text: `POST /{page}/feed`
//! - image: `POST /{page}/photos`
//! - video: `POST /{page}/videos`
//! - carousel: unpublished photos, then an unpublished feed post with
//!   `attached_media`, then `POST /{post} is_published=true`

use async_trait::async_trait;
use serde_json::json;

use super::graph::{response_id, GraphClient};
use super::{carousel_child_failure, PublishAdapter, PublishReceipt, PublishRequest, PublishResult};
use crate::config::GraphPlatformConfig;
use crate::credentials::Credential;
use crate::error::{PlatformError, Result};
use crate::types::MediaRef;

pub struct FacebookAdapter {
    graph: GraphClient,
}

impl FacebookAdapter {
    pub fn new(config: &GraphPlatformConfig) -> Result<Self> {
        Ok(Self {
            graph: GraphClient::new(config)?,
        })
    }

    async fn publish_carousel(
        &self,
        request: &PublishRequest,
        credential: &Credential,
        page_id: &str,
        images: &[String],
    ) -> PublishResult {
        let token = &credential.access_token;

        let mut children = Vec::with_capacity(images.len());
        for (index, url) in images.iter().enumerate() {
            let created = self
                .graph
                .post(
                    "Facebook carousel child",
                    &format!("{}/photos", page_id),
                    token,
                    &[("url", url.clone()), ("published", "false".to_string())],
                )
                .await
                .and_then(|v| response_id("Facebook carousel child", &v, "id"));

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

        let attached: Vec<_> = children
            .iter()
            .map(|id| json!({ "media_fbid": id }))
            .collect();

        let parent = self
            .graph
            .post(
                "Facebook carousel parent",
                &format!("{}/feed", page_id),
                token,
                &[
                    ("message", request.caption.clone()),
                    ("attached_media", serde_json::Value::from(attached).to_string()),
                    ("published", "false".to_string()),
                ],
            )
            .await?;
        let parent_id = response_id("Facebook carousel parent", &parent, "id")?;

        self.graph
            .post(
                "Facebook carousel publish",
                &parent_id,
                token,
                &[("is_published", "true".to_string())],
            )
            .await?;

        Ok(PublishReceipt::new(parent_id))
    }
}

#[async_trait]
impl PublishAdapter for FacebookAdapter {
    fn name(&self) -> &str {
        "facebook"
    }

    async fn publish(&self, request: &PublishRequest, credential: &Credential) -> PublishResult {
        let page_id = credential.require_account("page id")?;
        let token = &credential.access_token;

        tracing::info!(
            post_id = %request.post_id,
            media = request.media.kind(),
            "Publishing to Facebook page {}",
            page_id
        );

        match &request.media {
            MediaRef::None => {
                let value = self
                    .graph
                    .post(
                        "Facebook feed",
                        &format!("{}/feed", page_id),
                        token,
                        &[("message", request.caption.clone())],
                    )
                    .await?;
                Ok(PublishReceipt::new(response_id("Facebook feed", &value, "id")?))
            }
            MediaRef::Image(url) => {
                let value = self
                    .graph
                    .post(
                        "Facebook photo",
                        &format!("{}/photos", page_id),
                        token,
                        &[("url", url.clone()), ("caption", request.caption.clone())],
                    )
                    .await?;
                // Photos answer with the photo id and, when it made a feed story, its post id
                let id = response_id("Facebook photo", &value, "post_id")
                    .or_else(|_| response_id("Facebook photo", &value, "id"))?;
                Ok(PublishReceipt::new(id))
            }
            MediaRef::Video(url) => {
                let mut params = vec![
                    ("file_url", url.clone()),
                    ("description", request.caption.clone()),
                ];
                if let Some(title) = &request.title {
                    params.push(("title", title.clone()));
                }
                let value = self
                    .graph
                    .post("Facebook video", &format!("{}/videos", page_id), token, &params)
                    .await?;
                Ok(PublishReceipt::new(response_id("Facebook video", &value, "id")?))
            }
            MediaRef::Carousel(images) if images.is_empty() => Err(PlatformError::Unsupported(
                "carousel without images".to_string(),
            )),
            MediaRef::Carousel(images) => {
                self.publish_carousel(request, credential, page_id, images)
                    .await
            }
        }
    }
}

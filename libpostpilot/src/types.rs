//! Core types for Postpilot

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{PostpilotError, Result};

/// Social platforms a post can target
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Facebook,
    Instagram,
    Youtube,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Facebook => "facebook",
            Platform::Instagram => "instagram",
            Platform::Youtube => "youtube",
        }
    }

    pub fn all() -> [Platform; 3] {
        [Platform::Facebook, Platform::Instagram, Platform::Youtube]
    }
}

impl FromStr for Platform {
    type Err = PostpilotError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "facebook" => Ok(Platform::Facebook),
            "instagram" => Ok(Platform::Instagram),
            "youtube" => Ok(Platform::Youtube),
            other => Err(PostpilotError::InvalidInput(format!(
                "Unknown platform: '{}'. Valid options: facebook, instagram, youtube",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted lifecycle of a post.
///
/// "Publishing" is not a status of its own: it is the lease held in
/// [`PostMetadata`] while the post is still `Scheduled`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    Scheduled,
    Published,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Scheduled => "scheduled",
            PostStatus::Published => "published",
        }
    }
}

impl FromStr for PostStatus {
    type Err = PostpilotError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(PostStatus::Draft),
            "scheduled" => Ok(PostStatus::Scheduled),
            "published" => Ok(PostStatus::Published),
            other => Err(PostpilotError::InvalidInput(format!(
                "Unknown post status: '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The media attached to a post. A post carries at most one kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "kind", content = "url", rename_all = "snake_case")]
pub enum MediaRef {
    #[default]
    None,
    Image(String),
    Video(String),
    Carousel(Vec<String>),
}

impl MediaRef {
    /// Rebuild the media reference from its storage columns.
    ///
    /// A non-empty carousel wins over a video, which wins over an image.
    pub fn from_columns(
        image_url: Option<String>,
        video_url: Option<String>,
        carousel_images: Vec<String>,
    ) -> Self {
        if !carousel_images.is_empty() {
            MediaRef::Carousel(carousel_images)
        } else if let Some(url) = video_url.filter(|u| !u.is_empty()) {
            MediaRef::Video(url)
        } else if let Some(url) = image_url.filter(|u| !u.is_empty()) {
            MediaRef::Image(url)
        } else {
            MediaRef::None
        }
    }

    pub fn image_url(&self) -> Option<&str> {
        match self {
            MediaRef::Image(url) => Some(url),
            _ => None,
        }
    }

    pub fn video_url(&self) -> Option<&str> {
        match self {
            MediaRef::Video(url) => Some(url),
            _ => None,
        }
    }

    pub fn carousel_images(&self) -> &[String] {
        match self {
            MediaRef::Carousel(urls) => urls,
            _ => &[],
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MediaRef::None => "text",
            MediaRef::Image(_) => "image",
            MediaRef::Video(_) => "video",
            MediaRef::Carousel(_) => "carousel",
        }
    }
}

/// Transient publish state stored alongside a post.
///
/// Keys this crate does not know about are kept in `extra` so they survive
/// a read-modify-write by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PostMetadata {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub publishing: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publishing_started_at: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_post_id: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PostMetadata {
    /// Parse the stored JSON. An empty column yields empty metadata.
    pub fn from_json(raw: Option<&str>) -> Result<Self> {
        match raw.map(str::trim) {
            None | Some("") => Ok(Self::default()),
            Some(json) => serde_json::from_str(json).map_err(|e| {
                PostpilotError::InvalidInput(format!("Invalid post metadata: {}", e))
            }),
        }
    }

    pub fn to_json(&self) -> String {
        // A struct of strings, integers and JSON values cannot fail to serialize
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn clear_lease(&mut self) {
        self.publishing = false;
        self.publishing_started_at = None;
    }
}

/// A composed post waiting for (or past) its publish instant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledPost {
    pub id: String,
    pub user_id: String,
    pub platform: Platform,
    pub status: PostStatus,
    /// `YYYY-MM-DD`, interpreted in UTC
    pub scheduled_date: String,
    /// `HH:MM` or `HH:MM:SS`, interpreted in UTC
    pub scheduled_time: String,
    pub text: String,
    pub title: Option<String>,
    pub hashtags: Vec<String>,
    pub media: MediaRef,
    pub metadata: PostMetadata,
    pub published_at: Option<i64>,
    pub created_at: i64,
}

impl ScheduledPost {
    /// A text post in `scheduled` state for the given instant
    pub fn new(user_id: &str, platform: Platform, text: &str, at: DateTime<Utc>) -> Self {
        let (scheduled_date, scheduled_time) = split_instant(at);
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            platform,
            status: PostStatus::Scheduled,
            scheduled_date,
            scheduled_time,
            text: text.to_string(),
            title: None,
            hashtags: Vec::new(),
            media: MediaRef::None,
            metadata: PostMetadata::default(),
            published_at: None,
            created_at: Utc::now().timestamp(),
        }
    }

    pub fn with_media(mut self, media: MediaRef) -> Self {
        self.media = media;
        self
    }

    pub fn with_hashtags(mut self, hashtags: &[&str]) -> Self {
        self.hashtags = hashtags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    /// The instant this post is due, combined from its date and time fields
    pub fn scheduled_at(&self) -> Result<DateTime<Utc>> {
        combine_date_time(&self.scheduled_date, &self.scheduled_time)
    }
}

/// Split an instant into the stored `(date, time)` pair
pub fn split_instant(at: DateTime<Utc>) -> (String, String) {
    (
        at.format("%Y-%m-%d").to_string(),
        at.format("%H:%M:%S").to_string(),
    )
}

/// Combine stored date and time columns into a UTC instant
pub fn combine_date_time(date: &str, time: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").map_err(|e| {
        PostpilotError::InvalidInput(format!("Invalid scheduled_date '{}': {}", date, e))
    })?;

    let time = time.trim();
    let time = NaiveTime::parse_from_str(time, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M"))
        .map_err(|e| {
            PostpilotError::InvalidInput(format!("Invalid scheduled_time '{}': {}", time, e))
        })?;

    Ok(date.and_time(time).and_utc())
}

/// A user's link to a platform account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlatformConnection {
    pub id: Option<i64>,
    pub user_id: String,
    pub platform: Platform,
    /// base64 of the encrypted access token
    pub encrypted_token: String,
    /// Page id, Instagram business account id, or channel id
    pub account_id: Option<String>,
    pub account_name: Option<String>,
    pub is_active: bool,
    pub created_at: i64,
}

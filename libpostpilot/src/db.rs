//! Database operations for Postpilot
//!
//! The scheduler only needs a narrow slice of the data store, captured by
//! [`PostStore`]. [`Database`] implements it on SQLite through sqlx.

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::path::Path;

use crate::error::{DbError, Result};
use crate::types::{MediaRef, Platform, PlatformConnection, PostMetadata, PostStatus, ScheduledPost};

/// Persistent store contract consumed by the scheduler and dispatcher
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Fetch a post by id, fresh from storage.
    ///
    /// Returns `Ok(None)` if the post doesn't exist.
    async fn get_post(&self, post_id: &str) -> Result<Option<ScheduledPost>>;

    /// All posts in the given status, oldest schedule first.
    ///
    /// Each row is decoded on its own: a row that can't be read comes back
    /// as its own `Err` next to the rows that could. Only a failed query is
    /// an outer error.
    async fn list_posts_by_status(
        &self,
        status: PostStatus,
    ) -> Result<Vec<Result<ScheduledPost>>>;

    /// Replace the metadata column without touching the status.
    async fn update_metadata(&self, post_id: &str, metadata: &PostMetadata) -> Result<()>;

    /// Terminal success: status `published` with the given timestamp.
    async fn mark_published(
        &self,
        post_id: &str,
        published_at: i64,
        metadata: &PostMetadata,
    ) -> Result<()>;

    /// Terminal failure for this attempt: status `draft`.
    async fn mark_draft(&self, post_id: &str, metadata: &PostMetadata) -> Result<()>;

    /// Move a post to a new date/time and back to `scheduled`.
    async fn update_schedule(&self, post_id: &str, date: &str, time: &str) -> Result<()>;

    /// The newest active connection for (user, platform).
    async fn get_active_connection(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Option<PlatformConnection>>;
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(db_path: &str) -> Result<Self> {
        // Expand path and create parent directories
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // Forward slashes work on both Windows and Unix; mode=rwc creates the file
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    /// Access the underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a post (used by the authoring flow and by tests)
    pub async fn create_post(&self, post: &ScheduledPost) -> Result<()> {
        let hashtags = serde_json::to_string(&post.hashtags).unwrap_or_else(|_| "[]".to_string());
        let carousel =
            serde_json::to_string(post.media.carousel_images()).unwrap_or_else(|_| "[]".to_string());

        sqlx::query(
            r#"
            INSERT INTO scheduled_posts (
                id, user_id, platform, status, scheduled_date, scheduled_time,
                text, title, hashtags, image_url, video_url, carousel_images,
                metadata, published_at, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.user_id)
        .bind(post.platform.as_str())
        .bind(post.status.as_str())
        .bind(&post.scheduled_date)
        .bind(&post.scheduled_time)
        .bind(&post.text)
        .bind(&post.title)
        .bind(hashtags)
        .bind(post.media.image_url())
        .bind(post.media.video_url())
        .bind(carousel)
        .bind(post.metadata.to_json())
        .bind(post.published_at)
        .bind(post.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Link a platform account; returns the new row id
    pub async fn create_connection(&self, connection: &PlatformConnection) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO platform_connections (
                user_id, platform, encrypted_token, account_id, account_name, is_active, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&connection.user_id)
        .bind(connection.platform.as_str())
        .bind(&connection.encrypted_token)
        .bind(&connection.account_id)
        .bind(&connection.account_name)
        .bind(connection.is_active)
        .bind(connection.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.last_insert_rowid())
    }

    /// Mark every connection of (user, platform) inactive
    pub async fn deactivate_connections(&self, user_id: &str, platform: Platform) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE platform_connections SET is_active = 0
            WHERE user_id = ? AND platform = ?
            "#,
        )
        .bind(user_id)
        .bind(platform.as_str())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }
}

const POST_COLUMNS: &str = r#"
    id, user_id, platform, status, scheduled_date, scheduled_time,
    text, title, hashtags, image_url, video_url, carousel_images,
    metadata, published_at, created_at
"#;

fn corrupt(table: &'static str, reason: String) -> DbError {
    DbError::CorruptRow { table, reason }
}

fn row_to_post(r: &SqliteRow) -> Result<ScheduledPost> {
    let id: String = r.get("id");

    let platform = r
        .get::<String, _>("platform")
        .parse::<Platform>()
        .map_err(|e| corrupt("scheduled_posts", format!("{}: {}", id, e)))?;
    let status = r
        .get::<String, _>("status")
        .parse::<PostStatus>()
        .map_err(|e| corrupt("scheduled_posts", format!("{}: {}", id, e)))?;
    let hashtags: Vec<String> = serde_json::from_str(&r.get::<String, _>("hashtags"))
        .map_err(|e| corrupt("scheduled_posts", format!("{}: hashtags: {}", id, e)))?;
    let carousel: Vec<String> = serde_json::from_str(&r.get::<String, _>("carousel_images"))
        .map_err(|e| corrupt("scheduled_posts", format!("{}: carousel_images: {}", id, e)))?;
    let metadata = PostMetadata::from_json(r.get::<Option<String>, _>("metadata").as_deref())
        .map_err(|e| corrupt("scheduled_posts", format!("{}: {}", id, e)))?;

    Ok(ScheduledPost {
        user_id: r.get("user_id"),
        platform,
        status,
        scheduled_date: r.get("scheduled_date"),
        scheduled_time: r.get("scheduled_time"),
        text: r.get("text"),
        title: r.get("title"),
        hashtags,
        media: MediaRef::from_columns(r.get("image_url"), r.get("video_url"), carousel),
        metadata,
        published_at: r.get("published_at"),
        created_at: r.get("created_at"),
        id,
    })
}

fn row_to_connection(r: &SqliteRow) -> Result<PlatformConnection> {
    let platform = r
        .get::<String, _>("platform")
        .parse::<Platform>()
        .map_err(|e| corrupt("platform_connections", e.to_string()))?;

    Ok(PlatformConnection {
        id: r.get("id"),
        user_id: r.get("user_id"),
        platform,
        encrypted_token: r.get("encrypted_token"),
        account_id: r.get("account_id"),
        account_name: r.get("account_name"),
        is_active: r.get::<i64, _>("is_active") != 0,
        created_at: r.get("created_at"),
    })
}

#[async_trait]
impl PostStore for Database {
    async fn get_post(&self, post_id: &str) -> Result<Option<ScheduledPost>> {
        let query = format!("SELECT {} FROM scheduled_posts WHERE id = ?", POST_COLUMNS);
        let row = sqlx::query(&query)
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(row_to_post).transpose()
    }

    async fn list_posts_by_status(
        &self,
        status: PostStatus,
    ) -> Result<Vec<Result<ScheduledPost>>> {
        let query = format!(
            "SELECT {} FROM scheduled_posts WHERE status = ? \
             ORDER BY scheduled_date ASC, scheduled_time ASC",
            POST_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(rows.iter().map(row_to_post).collect())
    }

    async fn update_metadata(&self, post_id: &str, metadata: &PostMetadata) -> Result<()> {
        sqlx::query("UPDATE scheduled_posts SET metadata = ? WHERE id = ?")
            .bind(metadata.to_json())
            .bind(post_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(())
    }

    async fn mark_published(
        &self,
        post_id: &str,
        published_at: i64,
        metadata: &PostMetadata,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET status = 'published', published_at = ?, metadata = ?
            WHERE id = ?
            "#,
        )
        .bind(published_at)
        .bind(metadata.to_json())
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    async fn mark_draft(&self, post_id: &str, metadata: &PostMetadata) -> Result<()> {
        sqlx::query("UPDATE scheduled_posts SET status = 'draft', metadata = ? WHERE id = ?")
            .bind(metadata.to_json())
            .bind(post_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(())
    }

    async fn update_schedule(&self, post_id: &str, date: &str, time: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET status = 'scheduled', scheduled_date = ?, scheduled_time = ?
            WHERE id = ? AND status != 'published'
            "#,
        )
        .bind(date)
        .bind(time)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    async fn get_active_connection(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Option<PlatformConnection>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, platform, encrypted_token, account_id, account_name,
                   is_active, created_at
            FROM platform_connections
            WHERE user_id = ? AND platform = ? AND is_active = 1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(row_to_connection).transpose()
    }
}

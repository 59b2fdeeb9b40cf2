//! Service layer for Postpilot
//!
//! `SchedulingService` is the registration surface the rest of the system
//! calls when a post is scheduled, rescheduled, or removed. It owns the
//! shared pieces (database, scheduler, event bus) and wires the dispatcher
//! with credentials and platform adapters.
//!
//! # Example
//!
//! ```no_run
//! use chrono::{Duration, Utc};
//! use libpostpilot::service::SchedulingService;
//! use libpostpilot::types::{Platform, ScheduledPost};
//!
//! # async fn example() -> libpostpilot::Result<()> {
//! let service = SchedulingService::new().await?;
//! let report = service.start().await?;
//! println!("Recovered {} posts", report.total());
//!
//! let post = ScheduledPost::new(
//!     "user-1",
//!     Platform::Facebook,
//!     "Doors open at nine!",
//!     Utc::now() + Duration::hours(1),
//! );
//! service.schedule(&post).await?;
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::credentials::{AgeCipher, CredentialResolver, TokenCipher};
use crate::db::{Database, PostStore};
use crate::dispatcher::Dispatcher;
use crate::error::{PostpilotError, Result};
use crate::events::{EventBus, EventReceiver};
use crate::platforms::AdapterRegistry;
use crate::recovery::{self, RecoveryReport};
use crate::scheduler::{RegisterOutcome, Scheduler};
use crate::types::{split_instant, Platform, PostStatus, ScheduledPost};
use crate::Config;

pub struct SchedulingService {
    db: Database,
    scheduler: Scheduler,
    event_bus: EventBus,
}

impl SchedulingService {
    /// Create a service from the default configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration cannot be loaded
    /// - The master password is missing or too weak
    /// - Database cannot be initialized or migrated
    pub async fn new() -> Result<Self> {
        let config = Config::load()?;
        Self::from_config(config).await
    }

    /// Create a service with a pre-built configuration
    pub async fn from_config(config: Config) -> Result<Self> {
        let cipher = AgeCipher::from_config(&config.credentials)?;
        let adapters = AdapterRegistry::from_config(&config)?;
        let lease_ttl = config.scheduler.lease_ttl()?;
        let db = Database::new(&config.database_path()).await?;

        Ok(Self::with_components(db, Arc::new(cipher), adapters, lease_ttl))
    }

    /// Assemble a service from explicit parts (custom adapters, test ciphers)
    pub fn with_components(
        db: Database,
        cipher: Arc<dyn TokenCipher>,
        adapters: AdapterRegistry,
        lease_ttl: Duration,
    ) -> Self {
        let store: Arc<dyn PostStore> = Arc::new(db.clone());
        let event_bus = EventBus::new(100);

        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            CredentialResolver::new(Arc::clone(&store), cipher),
            adapters,
            event_bus.clone(),
            lease_ttl,
        );
        let scheduler = Scheduler::new(store, dispatcher);

        Self {
            db,
            scheduler,
            event_bus,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Receive publish events from now on
    pub fn subscribe(&self) -> EventReceiver {
        self.event_bus.subscribe()
    }

    /// Re-register every persisted `scheduled` post
    pub async fn start(&self) -> Result<RecoveryReport> {
        recovery::recover(&self.db, &self.scheduler).await
    }

    /// Persist a new post and register it for its instant
    pub async fn schedule(&self, post: &ScheduledPost) -> Result<RegisterOutcome> {
        if post.status != PostStatus::Scheduled {
            return Err(PostpilotError::InvalidInput(format!(
                "Only scheduled posts can be scheduled (post {} is {})",
                post.id, post.status
            )));
        }
        let scheduled_at = post.scheduled_at()?;

        self.db.create_post(post).await?;
        self.scheduler
            .register(&post.id, scheduled_at, post.platform, &post.user_id)
            .await
    }

    /// Register an already-persisted post
    pub async fn register(
        &self,
        post_id: &str,
        scheduled_at: DateTime<Utc>,
        platform: Platform,
        user_id: &str,
    ) -> Result<RegisterOutcome> {
        self.scheduler
            .register(post_id, scheduled_at, platform, user_id)
            .await
    }

    /// Move a post to a new instant.
    ///
    /// Cancels any live task, stores the new date/time with status
    /// `scheduled`, then registers again.
    pub async fn reschedule(
        &self,
        post_id: &str,
        scheduled_at: DateTime<Utc>,
    ) -> Result<RegisterOutcome> {
        let post = self
            .db
            .get_post(post_id)
            .await?
            .ok_or_else(|| PostpilotError::InvalidInput(format!("Unknown post: {}", post_id)))?;

        if post.status == PostStatus::Published {
            return Err(PostpilotError::InvalidInput(format!(
                "Post {} is already published",
                post_id
            )));
        }

        self.scheduler.cancel(post_id);

        let (date, time) = split_instant(scheduled_at);
        self.db.update_schedule(post_id, &date, &time).await?;

        tracing::info!(post_id = %post_id, %scheduled_at, "Post rescheduled");
        self.scheduler
            .register(post_id, scheduled_at, post.platform, &post.user_id)
            .await
    }

    /// Forget the in-memory task for a post; the stored row is untouched
    pub fn cancel(&self, post_id: &str) -> bool {
        self.scheduler.cancel(post_id)
    }

    /// Stop scheduling and give running dispatches up to `grace` to finish.
    ///
    /// Returns whether every dispatch finished in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.scheduler.shutdown();

        let idle = self.scheduler.wait_idle(grace).await;
        if !idle {
            tracing::warn!(
                in_flight = self.scheduler.in_flight(),
                "Dispatches still running at shutdown; their leases will expire"
            );
        }
        idle
    }
}

//! End-to-end scheduling tests: real database, real Graph adapters, mock Graph API

use chrono::{Duration as ChronoDuration, Utc};
use libpostpilot::config::GraphPlatformConfig;
use libpostpilot::events::{EventReceiver, SkipReason};
use libpostpilot::platforms::facebook::FacebookAdapter;
use libpostpilot::platforms::instagram::InstagramAdapter;
use libpostpilot::platforms::{AdapterRegistry, PollPolicy};
use libpostpilot::types::PlatformConnection;
use libpostpilot::{
    Database, Event, MediaRef, Platform, PostStatus, PostStore, Result, ScheduledPost,
    SchedulingService, TokenCipher,
};
use secrecy::SecretString;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::broadcast::error::RecvError;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Stores tokens reversed so a raw column never equals the token
struct ReverseCipher;

impl TokenCipher for ReverseCipher {
    fn seal(&self, token: &str) -> Result<String> {
        Ok(token.chars().rev().collect())
    }

    fn open(&self, stored: &str) -> Result<SecretString> {
        Ok(SecretString::from(stored.chars().rev().collect::<String>()))
    }
}

struct Env {
    _temp: TempDir,
    server: MockServer,
    service: SchedulingService,
}

impl Env {
    async fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let db = Database::new(&temp.path().join("posts.db").to_string_lossy())
            .await
            .unwrap();
        let server = MockServer::start().await;
        let service = build_service(db, &server);
        Self {
            _temp: temp,
            server,
            service,
        }
    }

    fn db(&self) -> &Database {
        self.service.database()
    }

    async fn connect(&self, platform: Platform, token: &str, account_id: &str) {
        self.db()
            .create_connection(&PlatformConnection {
                id: None,
                user_id: "user-1".to_string(),
                platform,
                encrypted_token: ReverseCipher.seal(token).unwrap(),
                account_id: Some(account_id.to_string()),
                account_name: None,
                is_active: true,
                created_at: Utc::now().timestamp(),
            })
            .await
            .unwrap();
    }

    async fn stored(&self, post_id: &str) -> ScheduledPost {
        self.db().get_post(post_id).await.unwrap().unwrap()
    }
}

fn build_service(db: Database, server: &MockServer) -> SchedulingService {
    let graph = GraphPlatformConfig {
        graph_url: server.uri(),
        request_timeout_secs: 5,
    };
    let poll = PollPolicy {
        interval: Duration::from_millis(20),
        ceiling: Duration::from_millis(500),
    };

    let mut adapters = AdapterRegistry::new();
    adapters.register(
        Platform::Facebook,
        Arc::new(FacebookAdapter::new(&graph).unwrap()),
    );
    adapters.register(
        Platform::Instagram,
        Arc::new(InstagramAdapter::new(&graph, poll).unwrap()),
    );

    SchedulingService::with_components(
        db,
        Arc::new(ReverseCipher),
        adapters,
        Duration::from_secs(300),
    )
}

async fn wait_terminal(events: &mut EventReceiver, post_id: &str) -> Event {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) if event.post_id() == post_id && event.is_terminal() => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event bus closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(15), wait)
        .await
        .expect("no terminal event for post")
}

#[tokio::test]
async fn test_facebook_text_post_publishes_at_its_instant() {
    let env = Env::new().await;
    env.connect(Platform::Facebook, "fb-token", "page-1").await;

    Mock::given(method("POST"))
        .and(path("/page-1/feed"))
        .and(body_string_contains("access_token=fb-token"))
        .and(body_string_contains("message=Doors+open"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "page-1_42"})))
        .expect(1)
        .mount(&env.server)
        .await;

    let mut events = env.service.subscribe();
    let post = ScheduledPost::new(
        "user-1",
        Platform::Facebook,
        "Doors open",
        Utc::now() + ChronoDuration::seconds(2),
    );
    let due = post.scheduled_at().unwrap();
    let started = Instant::now();
    env.service.schedule(&post).await.unwrap();

    let event = wait_terminal(&mut events, &post.id).await;
    assert!(Utc::now() >= due, "published before its instant");
    assert!(started.elapsed() >= Duration::from_millis(900));
    assert_eq!(
        event,
        Event::Published {
            post_id: post.id.clone(),
            platform: "facebook".to_string(),
            platform_post_id: "page-1_42".to_string(),
        }
    );

    let stored = env.stored(&post.id).await;
    assert_eq!(stored.status, PostStatus::Published);
    assert_eq!(stored.metadata.platform_post_id.as_deref(), Some("page-1_42"));
    assert!(stored.published_at.is_some());
    assert!(!stored.metadata.publishing);
    assert!(stored.metadata.publishing_started_at.is_none());
    assert!(!env.service.scheduler().is_scheduled(&post.id));
}

#[tokio::test]
async fn test_instagram_carousel_creates_children_then_publishes() {
    let env = Env::new().await;
    env.connect(Platform::Instagram, "ig-token", "ig-1").await;

    Mock::given(method("POST"))
        .and(path("/ig-1/media"))
        .and(body_string_contains("is_carousel_item=true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "child"})))
        .expect(3)
        .mount(&env.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/ig-1/media"))
        .and(body_string_contains("media_type=CAROUSEL"))
        .and(body_string_contains("children=child%2Cchild%2Cchild"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "parent-1"})))
        .expect(1)
        .mount(&env.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/ig-1/media_publish"))
        .and(body_string_contains("creation_id=parent-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "ig-media-9"})))
        .expect(1)
        .mount(&env.server)
        .await;

    let mut events = env.service.subscribe();
    let post = ScheduledPost::new(
        "user-1",
        Platform::Instagram,
        "Three looks",
        Utc::now() - ChronoDuration::seconds(5),
    )
    .with_media(MediaRef::Carousel(vec![
        "https://cdn.example.com/1.jpg".to_string(),
        "https://cdn.example.com/2.jpg".to_string(),
        "https://cdn.example.com/3.jpg".to_string(),
    ]))
    .with_hashtags(&["fall", "#style"]);
    env.service.schedule(&post).await.unwrap();

    let event = wait_terminal(&mut events, &post.id).await;
    assert!(matches!(event, Event::Published { .. }), "got {:?}", event);

    let stored = env.stored(&post.id).await;
    assert_eq!(stored.status, PostStatus::Published);
    assert_eq!(stored.metadata.platform_post_id.as_deref(), Some("ig-media-9"));

    env.server.verify().await;
}

#[tokio::test]
async fn test_missing_connection_returns_post_to_draft() {
    let env = Env::new().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "nope"})))
        .expect(0)
        .mount(&env.server)
        .await;

    let mut events = env.service.subscribe();
    let post = ScheduledPost::new("user-1", Platform::Facebook, "Hello", Utc::now());
    env.service.schedule(&post).await.unwrap();

    let event = wait_terminal(&mut events, &post.id).await;
    assert_eq!(
        event,
        Event::PublishFailed {
            post_id: post.id.clone(),
            platform: "facebook".to_string(),
            error: "No active connection".to_string(),
        }
    );

    let stored = env.stored(&post.id).await;
    assert_eq!(stored.status, PostStatus::Draft);
    assert_eq!(
        stored.metadata.last_error.as_deref(),
        Some("No active connection")
    );
    assert!(!stored.metadata.publishing);

    env.server.verify().await;
}

#[tokio::test]
async fn test_graph_rejection_is_recorded_on_the_post() {
    let env = Env::new().await;
    env.connect(Platform::Facebook, "fb-token", "page-1").await;

    Mock::given(method("POST"))
        .and(path("/page-1/feed"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"message": "Permissions error", "code": 200}
        })))
        .expect(1)
        .mount(&env.server)
        .await;

    let mut events = env.service.subscribe();
    let post = ScheduledPost::new("user-1", Platform::Facebook, "Hello", Utc::now());
    env.service.schedule(&post).await.unwrap();

    let event = wait_terminal(&mut events, &post.id).await;
    assert!(matches!(event, Event::PublishFailed { .. }), "got {:?}", event);

    let stored = env.stored(&post.id).await;
    assert_eq!(stored.status, PostStatus::Draft);
    let error = stored.metadata.last_error.unwrap();
    assert!(error.contains("Permissions error"), "last_error: {}", error);
    assert!(!error.contains("fb-token"));
}

#[tokio::test]
async fn test_held_lease_skips_without_calling_platform() {
    let env = Env::new().await;
    env.connect(Platform::Facebook, "fb-token", "page-1").await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "nope"})))
        .expect(0)
        .mount(&env.server)
        .await;

    let mut post = ScheduledPost::new("user-1", Platform::Facebook, "Hello", Utc::now());
    post.metadata.publishing = true;
    post.metadata.publishing_started_at = Some(Utc::now().timestamp() - 60);

    let mut events = env.service.subscribe();
    env.service.schedule(&post).await.unwrap();

    let event = wait_terminal(&mut events, &post.id).await;
    assert_eq!(
        event,
        Event::Skipped {
            post_id: post.id.clone(),
            reason: SkipReason::InProgress,
        }
    );

    let stored = env.stored(&post.id).await;
    assert_eq!(stored.status, PostStatus::Scheduled);
    assert!(stored.metadata.publishing);
}

#[tokio::test]
async fn test_stale_lease_is_taken_over() {
    let env = Env::new().await;
    env.connect(Platform::Facebook, "fb-token", "page-1").await;

    Mock::given(method("POST"))
        .and(path("/page-1/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "page-1_7"})))
        .expect(1)
        .mount(&env.server)
        .await;

    let mut post = ScheduledPost::new("user-1", Platform::Facebook, "Hello", Utc::now());
    post.metadata.publishing = true;
    post.metadata.publishing_started_at = Some(Utc::now().timestamp() - 600);

    let mut events = env.service.subscribe();
    env.service.schedule(&post).await.unwrap();

    let event = wait_terminal(&mut events, &post.id).await;
    assert!(matches!(event, Event::Published { .. }), "got {:?}", event);
    assert_eq!(env.stored(&post.id).await.status, PostStatus::Published);
}

#[tokio::test]
async fn test_restart_recovers_persisted_schedule() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("posts.db").to_string_lossy().to_string();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/page-1/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "page-1_1"})))
        .expect(1)
        .mount(&server)
        .await;

    let overdue = ScheduledPost::new(
        "user-1",
        Platform::Facebook,
        "Missed while down",
        Utc::now() - ChronoDuration::minutes(30),
    );
    let future = ScheduledPost::new(
        "user-1",
        Platform::Facebook,
        "Tomorrow",
        Utc::now() + ChronoDuration::days(1),
    );

    // First process: persist and go away without publishing anything
    {
        let db = Database::new(&db_path).await.unwrap();
        db.create_connection(&PlatformConnection {
            id: None,
            user_id: "user-1".to_string(),
            platform: Platform::Facebook,
            encrypted_token: ReverseCipher.seal("fb-token").unwrap(),
            account_id: Some("page-1".to_string()),
            account_name: None,
            is_active: true,
            created_at: 1,
        })
        .await
        .unwrap();
        db.create_post(&overdue).await.unwrap();
        db.create_post(&future).await.unwrap();
    }

    let db = Database::new(&db_path).await.unwrap();
    let service = build_service(db, &server);
    let mut events = service.subscribe();

    let report = service.start().await.unwrap();
    assert_eq!(report.registered, 1);
    assert_eq!(report.overdue, 1);
    assert_eq!(report.skipped, 0);

    let event = wait_terminal(&mut events, &overdue.id).await;
    assert!(matches!(event, Event::Published { .. }), "got {:?}", event);
    assert!(service.scheduler().is_scheduled(&future.id));

    // A second recovery pass doesn't duplicate the live task
    let again = service.start().await.unwrap();
    assert_eq!(again.registered, 1);
    assert_eq!(again.overdue, 0);
    assert_eq!(service.scheduler().pending_count(), 1);

    assert!(service.shutdown(Duration::from_secs(5)).await);
    server.verify().await;
}

#[tokio::test]
async fn test_reschedule_replaces_pending_task() {
    let env = Env::new().await;
    env.connect(Platform::Facebook, "fb-token", "page-1").await;

    Mock::given(method("POST"))
        .and(path("/page-1/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "page-1_3"})))
        .expect(1)
        .mount(&env.server)
        .await;

    let post = ScheduledPost::new(
        "user-1",
        Platform::Facebook,
        "Moved up",
        Utc::now() + ChronoDuration::hours(6),
    );
    env.service.schedule(&post).await.unwrap();

    let mut events = env.service.subscribe();
    env.service
        .reschedule(&post.id, Utc::now() - ChronoDuration::seconds(1))
        .await
        .unwrap();

    let event = wait_terminal(&mut events, &post.id).await;
    assert!(matches!(event, Event::Published { .. }), "got {:?}", event);
    assert_eq!(env.service.scheduler().pending_count(), 0);
    env.server.verify().await;
}

#[tokio::test]
async fn test_cancelled_post_never_publishes() {
    let env = Env::new().await;
    env.connect(Platform::Facebook, "fb-token", "page-1").await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "nope"})))
        .expect(0)
        .mount(&env.server)
        .await;

    let post = ScheduledPost::new(
        "user-1",
        Platform::Facebook,
        "Pulled",
        Utc::now() + ChronoDuration::seconds(1),
    );
    env.service.schedule(&post).await.unwrap();
    assert!(env.service.cancel(&post.id));

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let stored = env.stored(&post.id).await;
    assert_eq!(stored.status, PostStatus::Scheduled);
    env.server.verify().await;
}

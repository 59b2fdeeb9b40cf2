//! Scheduler core
//!
//! One tokio task per registered post sleeps until the post's instant and
//! then hands it to the [`Dispatcher`]. The registry maps post id to the
//! live task; it is only touched under a short synchronous lock, never
//! across an `.await`.
//!
//! Each entry carries a generation number. A finishing task removes its
//! entry only if the generation still matches, so a cancel followed by a
//! fresh registration is never clobbered by the old task's cleanup.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{oneshot, Notify};
use tokio::time::{sleep_until, Instant};
use tracing::Instrument;

use crate::db::PostStore;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::error::{PostpilotError, Result};
use crate::types::{Platform, PostStatus};

/// What `register` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// A task is sleeping until the scheduled instant
    Scheduled,
    /// The instant has passed; dispatching right away
    Overdue,
    /// A live task already exists; nothing changed
    AlreadyScheduled,
    /// The post is already published; nothing changed
    AlreadyPublished,
}

/// The data a live task was registered with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub post_id: String,
    pub scheduled_at: DateTime<Utc>,
    pub platform: Platform,
    pub user_id: String,
}

struct TaskEntry {
    generation: u64,
    registration: Registration,
    cancel: oneshot::Sender<()>,
}

struct Inner {
    store: Arc<dyn PostStore>,
    dispatcher: Dispatcher,
    tasks: Mutex<HashMap<String, TaskEntry>>,
    next_generation: AtomicU64,
    closed: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
}

impl Inner {
    fn tasks(&self) -> MutexGuard<'_, HashMap<String, TaskEntry>> {
        // Entries stay consistent even if a holder panicked; keep going
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remove_if_generation(&self, post_id: &str, generation: u64) {
        let mut tasks = self.tasks();
        if tasks.get(post_id).map(|e| e.generation) == Some(generation) {
            tasks.remove(post_id);
        }
    }
}

/// Removes the task's entry however the task ends, panics included
struct EntryGuard {
    inner: Arc<Inner>,
    post_id: String,
    generation: u64,
}

impl Drop for EntryGuard {
    fn drop(&mut self) {
        self.inner.remove_if_generation(&self.post_id, self.generation);
    }
}

/// Counts a dispatch in flight for `wait_idle`
struct InFlightGuard {
    inner: Arc<Inner>,
}

impl InFlightGuard {
    fn new(inner: Arc<Inner>) -> Self {
        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        Self { inner }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn PostStore>, dispatcher: Dispatcher) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                dispatcher,
                tasks: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Arrange for `post_id` to be dispatched at `scheduled_at`.
    ///
    /// Instants in the past dispatch immediately, still as a tracked task.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for an unknown post or after [`Scheduler::shutdown`];
    /// store errors pass through.
    pub async fn register(
        &self,
        post_id: &str,
        scheduled_at: DateTime<Utc>,
        platform: Platform,
        user_id: &str,
    ) -> Result<RegisterOutcome> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(PostpilotError::InvalidInput(
                "Scheduler is shut down".to_string(),
            ));
        }

        if self.is_scheduled(post_id) {
            tracing::debug!(post_id = %post_id, "Already scheduled, ignoring registration");
            return Ok(RegisterOutcome::AlreadyScheduled);
        }

        let post = self
            .inner
            .store
            .get_post(post_id)
            .await?
            .ok_or_else(|| PostpilotError::InvalidInput(format!("Unknown post: {}", post_id)))?;

        if post.status == PostStatus::Published {
            tracing::debug!(post_id = %post_id, "Already published, ignoring registration");
            return Ok(RegisterOutcome::AlreadyPublished);
        }

        let registration = Registration {
            post_id: post_id.to_string(),
            scheduled_at,
            platform,
            user_id: user_id.to_string(),
        };
        let overdue = scheduled_at <= Utc::now();

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        {
            let mut tasks = self.inner.tasks();
            // Another register may have won while the store was read
            if tasks.contains_key(post_id) {
                return Ok(RegisterOutcome::AlreadyScheduled);
            }
            tasks.insert(
                post_id.to_string(),
                TaskEntry {
                    generation,
                    registration: registration.clone(),
                    cancel: cancel_tx,
                },
            );
        }

        let span = tracing::info_span!(
            "scheduled_post",
            post_id = %post_id,
            platform = %platform,
            user_id = %user_id
        );
        tokio::spawn(
            run_task(self.inner.clone(), registration, generation, cancel_rx).instrument(span),
        );

        if overdue {
            tracing::info!(post_id = %post_id, %scheduled_at, "Overdue, dispatching now");
            Ok(RegisterOutcome::Overdue)
        } else {
            tracing::info!(post_id = %post_id, %scheduled_at, "Scheduled");
            Ok(RegisterOutcome::Scheduled)
        }
    }

    /// Drop the live task for `post_id`.
    ///
    /// A task still sleeping exits without dispatching; one already
    /// dispatching runs to completion. Returns whether a task existed.
    pub fn cancel(&self, post_id: &str) -> bool {
        let entry = self.inner.tasks().remove(post_id);
        match entry {
            Some(entry) => {
                let _ = entry.cancel.send(());
                tracing::info!(post_id = %post_id, "Scheduled task cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, post_id: &str) -> bool {
        self.inner.tasks().contains_key(post_id)
    }

    /// Snapshot of live registrations, soonest first
    pub fn pending(&self) -> Vec<Registration> {
        let mut pending: Vec<_> = self
            .inner
            .tasks()
            .values()
            .map(|e| e.registration.clone())
            .collect();
        pending.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at));
        pending
    }

    pub fn pending_count(&self) -> usize {
        self.inner.tasks().len()
    }

    /// Cancel every sleeping task and refuse new registrations.
    ///
    /// Dispatches already running are left to finish; see
    /// [`Scheduler::wait_idle`]. Returns the number of entries dropped.
    pub fn shutdown(&self) -> usize {
        self.inner.closed.store(true, Ordering::SeqCst);

        let drained: Vec<_> = self.inner.tasks().drain().collect();
        let count = drained.len();
        for (_, entry) in drained {
            let _ = entry.cancel.send(());
        }

        tracing::info!(cancelled = count, "Scheduler shut down");
        count
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until no dispatch is running, up to `timeout`. Returns whether
    /// the scheduler went idle.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.inner.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if self.in_flight() == 0 {
                    return;
                }
                notified.await;
            }
        };

        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

async fn run_task(
    inner: Arc<Inner>,
    registration: Registration,
    generation: u64,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let entry = EntryGuard {
        inner: inner.clone(),
        post_id: registration.post_id.clone(),
        generation,
    };

    // Re-check against the wall clock after each wake so a clock step never
    // fires the post early
    while let Some(remaining) = until(registration.scheduled_at) {
        tokio::select! {
            _ = sleep_until(Instant::now() + remaining) => {}
            _ = &mut cancel_rx => {
                tracing::debug!("Cancelled before firing");
                return;
            }
        }
    }

    // Overdue tasks skip the loop, and select! may pick the sleep while a
    // cancel is also ready
    if !matches!(cancel_rx.try_recv(), Err(TryRecvError::Empty)) {
        tracing::debug!("Cancelled before firing");
        return;
    }

    let in_flight = InFlightGuard::new(inner.clone());
    tracing::debug!("Firing");

    match inner.dispatcher.dispatch(&registration.post_id).await {
        Ok(DispatchOutcome::Published { platform_post_id }) => {
            tracing::debug!(platform_post_id = %platform_post_id, "Dispatch finished")
        }
        Ok(outcome) => tracing::debug!(?outcome, "Dispatch finished"),
        Err(e) => tracing::error!(error = %e, "Dispatch could not update the store"),
    }

    // Leave the registry before reporting idle
    drop(entry);
    drop(in_flight);
}

/// Time left until `at`, or `None` once it has passed
fn until(at: DateTime<Utc>) -> Option<Duration> {
    (at - Utc::now()).to_std().ok().filter(|d| !d.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{CredentialResolver, TokenCipher};
    use crate::db::Database;
    use crate::events::EventBus;
    use crate::platforms::mock::MockAdapter;
    use crate::platforms::AdapterRegistry;
    use crate::types::{PlatformConnection, ScheduledPost};
    use chrono::Duration as ChronoDuration;
    use secrecy::SecretString;
    use tempfile::TempDir;

    struct PlainCipher;

    impl TokenCipher for PlainCipher {
        fn seal(&self, token: &str) -> Result<String> {
            Ok(token.to_string())
        }

        fn open(&self, stored: &str) -> Result<SecretString> {
            Ok(SecretString::from(stored.to_string()))
        }
    }

    async fn setup(adapter: Arc<MockAdapter>) -> (TempDir, Database, Scheduler) {
        let temp = TempDir::new().unwrap();
        let db = Database::new(&temp.path().join("scheduler.db").to_string_lossy())
            .await
            .unwrap();
        db.create_connection(&PlatformConnection {
            id: None,
            user_id: "user-1".to_string(),
            platform: Platform::Facebook,
            encrypted_token: "token".to_string(),
            account_id: Some("page-1".to_string()),
            account_name: None,
            is_active: true,
            created_at: 1,
        })
        .await
        .unwrap();

        let store: Arc<dyn PostStore> = Arc::new(db.clone());
        let mut adapters = AdapterRegistry::new();
        adapters.register(Platform::Facebook, adapter);
        let dispatcher = Dispatcher::new(
            store.clone(),
            CredentialResolver::new(store.clone(), Arc::new(PlainCipher)),
            adapters,
            EventBus::new(16),
            Duration::from_secs(300),
        );

        (temp, db, Scheduler::new(store, dispatcher))
    }

    async fn post_at(db: &Database, at: DateTime<Utc>) -> ScheduledPost {
        let post = ScheduledPost::new("user-1", Platform::Facebook, "Hello", at);
        db.create_post(&post).await.unwrap();
        post
    }

    async fn wait_for_status(db: &Database, post_id: &str, status: PostStatus) {
        for _ in 0..200 {
            if db.get_post(post_id).await.unwrap().unwrap().status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("post {} never reached {}", post_id, status);
    }

    #[tokio::test]
    async fn test_fires_at_instant_never_before() {
        let adapter = Arc::new(MockAdapter::success("facebook"));
        let (_temp, db, scheduler) = setup(adapter.clone()).await;
        let at = Utc::now() + ChronoDuration::milliseconds(400);
        let post = post_at(&db, at).await;

        let outcome = scheduler
            .register(&post.id, at, Platform::Facebook, "user-1")
            .await
            .unwrap();
        assert_eq!(outcome, RegisterOutcome::Scheduled);
        assert!(scheduler.is_scheduled(&post.id));

        wait_for_status(&db, &post.id, PostStatus::Published).await;

        let times = adapter.call_times();
        assert_eq!(times.len(), 1);
        assert!(times[0] >= at, "fired at {} before {}", times[0], at);
        assert!(times[0] - at < ChronoDuration::seconds(1));
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_noop() {
        let adapter = Arc::new(MockAdapter::success("facebook"));
        let (_temp, db, scheduler) = setup(adapter.clone()).await;
        let at = Utc::now() + ChronoDuration::milliseconds(200);
        let post = post_at(&db, at).await;

        assert_eq!(
            scheduler.register(&post.id, at, Platform::Facebook, "user-1").await.unwrap(),
            RegisterOutcome::Scheduled
        );
        assert_eq!(
            scheduler.register(&post.id, at, Platform::Facebook, "user-1").await.unwrap(),
            RegisterOutcome::AlreadyScheduled
        );
        assert_eq!(scheduler.pending_count(), 1);

        wait_for_status(&db, &post.id, PostStatus::Published).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(adapter.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_fire_prevents_dispatch() {
        let adapter = Arc::new(MockAdapter::success("facebook"));
        let (_temp, db, scheduler) = setup(adapter.clone()).await;
        let at = Utc::now() + ChronoDuration::milliseconds(200);
        let post = post_at(&db, at).await;

        scheduler
            .register(&post.id, at, Platform::Facebook, "user-1")
            .await
            .unwrap();
        assert!(scheduler.cancel(&post.id));
        assert!(!scheduler.cancel(&post.id));
        assert!(!scheduler.is_scheduled(&post.id));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(adapter.call_count(), 0);
        assert_eq!(db.get_post(&post.id).await.unwrap().unwrap(), post);
    }

    #[tokio::test]
    async fn test_cancel_overdue_before_it_runs() {
        let adapter = Arc::new(MockAdapter::success("facebook"));
        let (_temp, db, scheduler) = setup(adapter.clone()).await;
        let at = Utc::now() - ChronoDuration::seconds(5);
        let post = post_at(&db, at).await;

        let outcome = scheduler
            .register(&post.id, at, Platform::Facebook, "user-1")
            .await
            .unwrap();
        assert_eq!(outcome, RegisterOutcome::Overdue);
        assert!(scheduler.cancel(&post.id));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(adapter.call_count(), 0);
        assert_eq!(scheduler.in_flight(), 0);
        let stored = db.get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Scheduled);
        assert!(!stored.metadata.publishing);
    }

    #[tokio::test]
    async fn test_cancel_during_dispatch_does_not_interrupt() {
        let adapter = Arc::new(MockAdapter::with_delay("facebook", Duration::from_millis(300)));
        let (_temp, db, scheduler) = setup(adapter.clone()).await;
        let post = post_at(&db, Utc::now()).await;

        let outcome = scheduler
            .register(&post.id, Utc::now(), Platform::Facebook, "user-1")
            .await
            .unwrap();
        assert_eq!(outcome, RegisterOutcome::Overdue);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(adapter.call_count(), 1);
        assert!(scheduler.cancel(&post.id));

        wait_for_status(&db, &post.id, PostStatus::Published).await;
    }

    #[tokio::test]
    async fn test_overdue_stays_tracked_while_dispatching() {
        let adapter = Arc::new(MockAdapter::with_delay("facebook", Duration::from_millis(300)));
        let (_temp, db, scheduler) = setup(adapter.clone()).await;
        let past = Utc::now() - ChronoDuration::hours(1);
        let post = post_at(&db, past).await;

        assert_eq!(
            scheduler.register(&post.id, past, Platform::Facebook, "user-1").await.unwrap(),
            RegisterOutcome::Overdue
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            scheduler.register(&post.id, past, Platform::Facebook, "user-1").await.unwrap(),
            RegisterOutcome::AlreadyScheduled
        );
        assert_eq!(scheduler.in_flight(), 1);

        assert!(scheduler.wait_idle(Duration::from_secs(5)).await);
        assert_eq!(adapter.call_count(), 1);
        assert!(!scheduler.is_scheduled(&post.id));
    }

    #[tokio::test]
    async fn test_entry_removed_after_failure() {
        let adapter = Arc::new(MockAdapter::panicking("facebook"));
        let (_temp, db, scheduler) = setup(adapter).await;
        let post = post_at(&db, Utc::now()).await;

        scheduler
            .register(&post.id, Utc::now(), Platform::Facebook, "user-1")
            .await
            .unwrap();

        wait_for_status(&db, &post.id, PostStatus::Draft).await;
        assert!(scheduler.wait_idle(Duration::from_secs(5)).await);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_published_post_is_not_registered() {
        let adapter = Arc::new(MockAdapter::success("facebook"));
        let (_temp, db, scheduler) = setup(adapter.clone()).await;
        let mut post = ScheduledPost::new("user-1", Platform::Facebook, "Hello", Utc::now());
        post.status = PostStatus::Published;
        db.create_post(&post).await.unwrap();

        let outcome = scheduler
            .register(&post.id, Utc::now(), Platform::Facebook, "user-1")
            .await
            .unwrap();
        assert_eq!(outcome, RegisterOutcome::AlreadyPublished);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_post_is_rejected() {
        let adapter = Arc::new(MockAdapter::success("facebook"));
        let (_temp, _db, scheduler) = setup(adapter).await;

        let err = scheduler
            .register("ghost", Utc::now(), Platform::Facebook, "user-1")
            .await
            .unwrap_err();
        assert!(matches!(err, PostpilotError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_reregister_after_cancel_survives_old_cleanup() {
        let adapter = Arc::new(MockAdapter::success("facebook"));
        let (_temp, db, scheduler) = setup(adapter.clone()).await;
        let first = Utc::now() + ChronoDuration::seconds(30);
        let post = post_at(&db, first).await;

        scheduler
            .register(&post.id, first, Platform::Facebook, "user-1")
            .await
            .unwrap();
        scheduler.cancel(&post.id);

        let second = Utc::now() + ChronoDuration::seconds(60);
        scheduler
            .register(&post.id, second, Platform::Facebook, "user-1")
            .await
            .unwrap();

        // Give the cancelled task time to run its cleanup
        tokio::time::sleep(Duration::from_millis(100)).await;
        let pending = scheduler.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].scheduled_at, second);
        assert_eq!(adapter.call_count(), 0);
    }

    #[tokio::test]
    async fn test_pending_snapshot_is_sorted() {
        let adapter = Arc::new(MockAdapter::success("facebook"));
        let (_temp, db, scheduler) = setup(adapter).await;
        let later = Utc::now() + ChronoDuration::hours(2);
        let sooner = Utc::now() + ChronoDuration::hours(1);
        let a = post_at(&db, later).await;
        let b = post_at(&db, sooner).await;

        scheduler.register(&a.id, later, Platform::Facebook, "user-1").await.unwrap();
        scheduler.register(&b.id, sooner, Platform::Facebook, "user-1").await.unwrap();

        let ids: Vec<_> = scheduler.pending().into_iter().map(|r| r.post_id).collect();
        assert_eq!(ids, vec![b.id.clone(), a.id.clone()]);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_and_refuses_new_work() {
        let adapter = Arc::new(MockAdapter::success("facebook"));
        let (_temp, db, scheduler) = setup(adapter.clone()).await;
        let at = Utc::now() + ChronoDuration::milliseconds(200);
        let post = post_at(&db, at).await;
        scheduler.register(&post.id, at, Platform::Facebook, "user-1").await.unwrap();

        assert_eq!(scheduler.shutdown(), 1);
        assert_eq!(scheduler.pending_count(), 0);
        assert!(scheduler
            .register(&post.id, at, Platform::Facebook, "user-1")
            .await
            .is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(adapter.call_count(), 0);
        assert!(scheduler.wait_idle(Duration::from_millis(10)).await);
    }
}

//! Re-register persisted schedules after a restart

use crate::db::PostStore;
use crate::error::Result;
use crate::scheduler::{RegisterOutcome, Scheduler};
use crate::types::PostStatus;

/// What a recovery pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Posts now waiting for their instant
    pub registered: usize,
    /// Posts whose instant had passed and were dispatched immediately
    pub overdue: usize,
    /// Rows that could not be registered (undecodable, bad date/time, vanished)
    pub skipped: usize,
}

impl RecoveryReport {
    pub fn total(&self) -> usize {
        self.registered + self.overdue + self.skipped
    }
}

/// Register every post still in `scheduled` state with the scheduler.
///
/// A bad row is logged and counted, never fatal; only failing to list the
/// posts at all is an error.
pub async fn recover(store: &dyn PostStore, scheduler: &Scheduler) -> Result<RecoveryReport> {
    let posts = store.list_posts_by_status(PostStatus::Scheduled).await?;
    let mut report = RecoveryReport::default();

    tracing::info!(count = posts.len(), "Recovering scheduled posts");

    for post in posts {
        let post = match post {
            Ok(post) => post,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable scheduled post");
                report.skipped += 1;
                continue;
            }
        };

        let scheduled_at = match post.scheduled_at() {
            Ok(at) => at,
            Err(e) => {
                tracing::warn!(post_id = %post.id, error = %e, "Skipping post with unusable schedule");
                report.skipped += 1;
                continue;
            }
        };

        match scheduler
            .register(&post.id, scheduled_at, post.platform, &post.user_id)
            .await
        {
            Ok(RegisterOutcome::Scheduled) => report.registered += 1,
            Ok(RegisterOutcome::Overdue) => report.overdue += 1,
            // Already live in this process; counts as registered
            Ok(RegisterOutcome::AlreadyScheduled) => report.registered += 1,
            Ok(RegisterOutcome::AlreadyPublished) => report.skipped += 1,
            Err(e) => {
                tracing::warn!(post_id = %post.id, error = %e, "Could not register post");
                report.skipped += 1;
            }
        }
    }

    tracing::info!(
        registered = report.registered,
        overdue = report.overdue,
        skipped = report.skipped,
        "Recovery complete"
    );

    Ok(report)
}

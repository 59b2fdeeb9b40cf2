//! Advisory publishing lease
//!
//! The lease lives in a post's metadata (`publishing`,
//! `publishing_started_at`). It only guards against a second attempt inside
//! one scheduler process; after `ttl` a lease left behind by a crash is
//! treated as stale and a fresh attempt may take it over.

use std::time::Duration;

use crate::types::PostMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Free,
    /// Held, started `age_secs` ago
    Held { age_secs: i64 },
    /// Held longer than the ttl; may be taken over
    Stale { age_secs: i64 },
}

impl LeaseState {
    /// Inspect the lease at `now` (unix seconds)
    pub fn evaluate(metadata: &PostMetadata, now: i64, ttl: Duration) -> Self {
        if !metadata.publishing {
            return LeaseState::Free;
        }

        // A flag without a start time can't be aged; treat it as abandoned
        let Some(started_at) = metadata.publishing_started_at else {
            return LeaseState::Stale { age_secs: i64::MAX };
        };

        let age_secs = now.saturating_sub(started_at);
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);

        if age_secs >= ttl_secs {
            LeaseState::Stale { age_secs }
        } else {
            LeaseState::Held { age_secs }
        }
    }
}

/// Mark the lease as held from `now`
pub fn acquire(metadata: &mut PostMetadata, now: i64) {
    metadata.publishing = true;
    metadata.publishing_started_at = Some(now);
}

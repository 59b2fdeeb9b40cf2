//! Event bus for publish progress
//!
//! Dispatch results are broadcast over `tokio::sync::broadcast` so the
//! hosting process (or a test) can observe them without coupling to the
//! dispatcher.
//!
//! If nobody subscribed, events are dropped immediately. Slow subscribers
//! lag and lose the oldest events; emitters never block.
//!
//! # Example
//!
//! ```no_run
//! use libpostpilot::events::{Event, EventBus};
//!
//! # async fn example() {
//! let event_bus = EventBus::new(100);
//! let mut receiver = event_bus.subscribe();
//!
//! event_bus.emit(Event::PublishStarted {
//!     post_id: "abc123".to_string(),
//!     platform: "facebook".to_string(),
//! });
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Event receiver type alias
pub type EventReceiver = broadcast::Receiver<Event>;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus buffering `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Receive every event emitted after this call
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Emit an event to all subscribers without blocking
    pub fn emit(&self, event: Event) {
        // send() only fails when there are no receivers
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Why a fired task did not attempt a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotFound,
    AlreadyPublished,
    InProgress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Lease acquired, adapter about to run
    PublishStarted { post_id: String, platform: String },

    /// Post went live
    Published {
        post_id: String,
        platform: String,
        platform_post_id: String,
    },

    /// Attempt ended with the post back in draft
    PublishFailed {
        post_id: String,
        platform: String,
        error: String,
    },

    /// Media processing did not finish within the ceiling; publish went ahead anyway
    ProcessingTimedOut { post_id: String, platform: String },

    /// Fired, but nothing was attempted
    Skipped { post_id: String, reason: SkipReason },
}

impl Event {
    pub fn post_id(&self) -> &str {
        match self {
            Event::PublishStarted { post_id, .. }
            | Event::Published { post_id, .. }
            | Event::PublishFailed { post_id, .. }
            | Event::ProcessingTimedOut { post_id, .. }
            | Event::Skipped { post_id, .. } => post_id,
        }
    }

    /// Whether this event ends an attempt
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::Published { .. } | Event::PublishFailed { .. } | Event::Skipped { .. }
        )
    }
}

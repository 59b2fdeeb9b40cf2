//! Postpilot - scheduled publishing to social platforms
//!
//! This library keeps one timer per scheduled post, publishes it through the
//! matching platform adapter when the instant arrives, and records the
//! outcome back on the post.

pub mod config;
pub mod credentials;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod lease;
pub mod logging;
pub mod platforms;
pub mod recovery;
pub mod scheduler;
pub mod service;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use credentials::{AgeCipher, CredentialResolver, TokenCipher};
pub use db::{Database, PostStore};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::{PlatformError, PostpilotError, Result};
pub use events::{Event, EventBus};
pub use recovery::RecoveryReport;
pub use scheduler::{RegisterOutcome, Scheduler};
pub use service::SchedulingService;
pub use types::{MediaRef, Platform, PostStatus, ScheduledPost};

//! Error types for Postpilot

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PostpilotError>;

#[derive(Error, Debug)]
pub enum PostpilotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl PostpilotError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            PostpilotError::InvalidInput(_) => 3,
            PostpilotError::Config(_) => 2,
            PostpilotError::Credential(_) => 2,
            PostpilotError::Platform(_) => 1,
            PostpilotError::Database(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Master password not set")]
    MasterPasswordNotSet,

    #[error("Master password must be at least 8 characters")]
    WeakPassword,

    #[error("Failed to decrypt credential (wrong master password?)")]
    DecryptionFailed,

    #[error("Encryption error: {0}")]
    Encryption(String),
}

/// Failures of a single publish attempt.
///
/// These map onto the dispatcher's terminal states: every variant ends the
/// attempt with the post back in `draft` and the message recorded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// No usable connection or account configuration. Never reaches the network.
    #[error("{0}")]
    Configuration(String),

    /// The platform answered but rejected a phase of the protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Timeout or connection failure while talking to the platform.
    #[error("Network error: {0}")]
    Network(String),

    /// The adapter cannot express this kind of post.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl PlatformError {
    /// Network failures are the only ones a caller may reasonably re-register for.
    ///
    /// The scheduler itself never retries.
    pub fn is_transient(&self) -> bool {
        matches!(self, PlatformError::Network(_))
    }
}

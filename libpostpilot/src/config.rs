//! Configuration management for Postpilot

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

pub const DEFAULT_GRAPH_URL: &str = "https://graph.facebook.com/v19.0";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub platforms: PlatformsConfig,
    #[serde(default)]
    pub credentials: CredentialConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/postpilot/posts.db".to_string(),
        }
    }
}

/// Timing knobs, written as human durations ("5m", "120s")
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How long a publishing lease blocks another attempt
    pub lease_ttl: String,
    /// Interval between media processing status checks
    pub poll_interval: String,
    /// Hard ceiling on media processing polling
    pub poll_ceiling: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lease_ttl: "5m".to_string(),
            poll_interval: "5s".to_string(),
            poll_ceiling: "120s".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn lease_ttl(&self) -> Result<Duration> {
        parse_duration_field("scheduler.lease_ttl", &self.lease_ttl)
    }

    pub fn poll_interval(&self) -> Result<Duration> {
        parse_duration_field("scheduler.poll_interval", &self.poll_interval)
    }

    pub fn poll_ceiling(&self) -> Result<Duration> {
        parse_duration_field("scheduler.poll_ceiling", &self.poll_ceiling)
    }
}

fn parse_duration_field(field: &str, value: &str) -> Result<Duration> {
    let duration = humantime::parse_duration(value).map_err(|e| ConfigError::InvalidValue {
        field: field.to_string(),
        reason: format!("'{}' is not a duration: {}", value, e),
    })?;

    if duration.is_zero() {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: "must be greater than zero".to_string(),
        }
        .into());
    }

    Ok(duration)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformsConfig {
    #[serde(default)]
    pub facebook: GraphPlatformConfig,
    #[serde(default)]
    pub instagram: GraphPlatformConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphPlatformConfig {
    /// Versioned Graph API base URL
    pub graph_url: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for GraphPlatformConfig {
    fn default() -> Self {
        Self {
            graph_url: DEFAULT_GRAPH_URL.to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Passphrase the stored access tokens are encrypted with
    #[serde(default)]
    pub master_password: Option<String>,
}

impl CredentialConfig {
    /// Prefer `POSTPILOT_MASTER_PASSWORD` over the config file
    pub fn load_master_password_from_env(&mut self) {
        if let Ok(password) = std::env::var("POSTPILOT_MASTER_PASSWORD") {
            if !password.is_empty() {
                self.master_password = Some(password);
            }
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        config.credentials.load_master_password_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Check every field that is parsed lazily
    pub fn validate(&self) -> Result<()> {
        self.scheduler.lease_ttl()?;
        let interval = self.scheduler.poll_interval()?;
        let ceiling = self.scheduler.poll_ceiling()?;
        if interval > ceiling {
            return Err(ConfigError::InvalidValue {
                field: "scheduler.poll_interval".to_string(),
                reason: "must not exceed scheduler.poll_ceiling".to_string(),
            }
            .into());
        }
        for (field, graph) in [
            ("platforms.facebook.request_timeout_secs", &self.platforms.facebook),
            ("platforms.instagram.request_timeout_secs", &self.platforms.instagram),
        ] {
            if graph.request_timeout_secs == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: "must be greater than zero".to_string(),
                }
                .into());
            }
        }
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::MissingField("database.path".to_string()).into());
        }
        Ok(())
    }

    /// Expanded database path
    pub fn database_path(&self) -> String {
        shellexpand::tilde(&self.database.path).to_string()
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("POSTPILOT_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("postpilot").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_empty_config_uses_defaults() {
        std::env::remove_var("POSTPILOT_MASTER_PASSWORD");
        let config = Config::from_toml("").unwrap();

        assert_eq!(config.scheduler.lease_ttl().unwrap(), Duration::from_secs(300));
        assert_eq!(config.scheduler.poll_interval().unwrap(), Duration::from_secs(5));
        assert_eq!(config.scheduler.poll_ceiling().unwrap(), Duration::from_secs(120));
        assert_eq!(config.platforms.instagram.graph_url, DEFAULT_GRAPH_URL);
        assert!(config.credentials.master_password.is_none());
    }

    #[test]
    #[serial]
    fn test_full_config_parses() {
        std::env::remove_var("POSTPILOT_MASTER_PASSWORD");
        let config = Config::from_toml(
            r#"
[database]
path = "/tmp/postpilot.db"

[scheduler]
lease_ttl = "10m"
poll_interval = "2s"
poll_ceiling = "1m"

[platforms.facebook]
graph_url = "http://localhost:9000"

[credentials]
master_password = "correct horse battery"
"#,
        )
        .unwrap();

        assert_eq!(config.database_path(), "/tmp/postpilot.db");
        assert_eq!(config.scheduler.lease_ttl().unwrap(), Duration::from_secs(600));
        assert_eq!(config.scheduler.poll_ceiling().unwrap(), Duration::from_secs(60));
        assert_eq!(config.platforms.facebook.graph_url, "http://localhost:9000");
        assert_eq!(config.platforms.facebook.request_timeout_secs, 30);
        assert_eq!(
            config.credentials.master_password.as_deref(),
            Some("correct horse battery")
        );
    }

    #[test]
    #[serial]
    fn test_master_password_env_overrides_file() {
        std::env::set_var("POSTPILOT_MASTER_PASSWORD", "from-the-environment");
        let config = Config::from_toml(
            r#"
[credentials]
master_password = "from-the-file"
"#,
        )
        .unwrap();
        std::env::remove_var("POSTPILOT_MASTER_PASSWORD");

        assert_eq!(
            config.credentials.master_password.as_deref(),
            Some("from-the-environment")
        );
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let err = Config::from_toml(
            r#"
[scheduler]
lease_ttl = "forever"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("scheduler.lease_ttl"));
    }

    #[test]
    fn test_zero_request_timeout_rejected() {
        let err = Config::from_toml(
            r#"
[platforms.instagram]
request_timeout_secs = 0
"#,
        )
        .unwrap_err();
        assert!(err
            .to_string()
            .contains("platforms.instagram.request_timeout_secs"));
    }

    #[test]
    fn test_poll_interval_longer_than_ceiling_rejected() {
        let err = Config::from_toml(
            r#"
[scheduler]
poll_interval = "3m"
poll_ceiling = "2m"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("poll_interval"));
    }

    #[test]
    #[serial]
    fn test_resolve_config_path_from_env() {
        std::env::set_var("POSTPILOT_CONFIG", "/etc/postpilot/config.toml");
        let path = resolve_config_path().unwrap();
        std::env::remove_var("POSTPILOT_CONFIG");

        assert_eq!(path, PathBuf::from("/etc/postpilot/config.toml"));
    }
}

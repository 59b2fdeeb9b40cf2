//! Logging setup for the scheduler daemon
//!
//! Every scheduled post runs inside a `scheduled_post` span carrying
//! `post_id`, `platform` and `user_id`, so each line a dispatch logs can be
//! traced back to its post. The JSON format flattens those span fields into
//! each line. Text output has no ANSI colours, so journald and log files
//! stay clean. Output always goes to stderr.
//!
//! `RUST_LOG` wins over everything; then `--verbose`; then
//! `POSTPILOT_LOG_LEVEL`.
//!
//! ```no_run
//! use libpostpilot::logging::{LogFormat, LoggingConfig};
//!
//! let mut logging = LoggingConfig::from_env(false);
//! logging.format = LogFormat::Json;
//! logging.init();
//! ```

use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable text output (no colors, for journald and pipes)
    Text,
    /// Machine-parseable JSON (one JSON object per line)
    Json,
    /// Pretty-printed with colors (for development)
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!(
                "Invalid log format: '{}'. Valid options: text, json, pretty",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
            LogFormat::Pretty => write!(f, "pretty"),
        }
    }
}

/// Configuration for logging initialization
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
    pub verbose: bool,
}

impl LoggingConfig {
    /// `level` is an `EnvFilter` directive such as `info` or
    /// `libpostpilot::platforms=debug`; `verbose` forces `debug`.
    pub fn new(format: LogFormat, level: String, verbose: bool) -> Self {
        Self {
            format,
            level,
            verbose,
        }
    }

    /// Build from `POSTPILOT_LOG_FORMAT` / `POSTPILOT_LOG_LEVEL`, text + info otherwise
    pub fn from_env(verbose: bool) -> Self {
        let format = std::env::var("POSTPILOT_LOG_FORMAT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(LogFormat::Text);

        let level = std::env::var("POSTPILOT_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Self::new(format, level, verbose)
    }

    fn filter_directive(&self) -> &str {
        if self.verbose {
            "debug"
        } else {
            &self.level
        }
    }

    /// Install the global subscriber. Call once, before the service starts.
    ///
    /// # Panics
    ///
    /// Panics if a global subscriber is already set
    pub fn init(&self) {
        use tracing_subscriber::EnvFilter;

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.filter_directive()));

        match self.format {
            LogFormat::Json => {
                // One object per line; scheduled_post span fields are flattened in
                tracing_subscriber::fmt()
                    .json()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_span_list(true)
                    .flatten_event(true)
                    .with_target(true)
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::fmt()
                    .pretty()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_line_number(true)
                    .with_file(true)
                    .init();
            }
            LogFormat::Text => {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .with_ansi(false)
                    .with_target(false)
                    .with_level(true)
                    .init();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
    }

    #[test]
    fn test_log_format_from_str_invalid() {
        let result = "syslog".parse::<LogFormat>();
        assert!(result.unwrap_err().contains("Invalid log format: 'syslog'"));
    }

    #[test]
    fn test_verbose_forces_debug() {
        let config = LoggingConfig::new(LogFormat::Text, "warn".to_string(), true);
        assert_eq!(config.filter_directive(), "debug");

        let config = LoggingConfig::new(LogFormat::Text, "warn".to_string(), false);
        assert_eq!(config.filter_directive(), "warn");
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("POSTPILOT_LOG_FORMAT", "json");
        std::env::set_var("POSTPILOT_LOG_LEVEL", "trace");
        let config = LoggingConfig::from_env(false);
        std::env::remove_var("POSTPILOT_LOG_FORMAT");
        std::env::remove_var("POSTPILOT_LOG_LEVEL");

        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "trace");

        let config = LoggingConfig::from_env(false);
        assert_eq!(config.format, LogFormat::Text);
        assert_eq!(config.level, "info");
    }
}

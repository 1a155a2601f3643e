//! Structured logging and security event emission
//!
//! All logging flows through `tracing`. Security-relevant happenings (logins,
//! lockouts, CSRF rejections, session lifecycle) are emitted as typed
//! [`SecurityEvent`]s via the [`security_event!`] macro, which picks the
//! tracing level from the event's severity so operators can filter on it.
//!
//! # Usage
//!
//! ```ignore
//! use triage::observability::{ObservabilityConfig, SecurityEvent};
//! use triage::security_event;
//!
//! // At startup
//! ObservabilityConfig::from_env().init();
//!
//! // Anywhere
//! security_event!(SecurityEvent::AuthenticationFailure,
//!     identifier = %identifier, ip = %ip, "Login failed");
//! ```

mod events;

pub use events::{SecurityEvent, Severity};

use std::env;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable format for development
    #[default]
    Pretty,
    /// JSON format for production/log aggregation
    Json,
    /// Compact single-line format
    Compact,
}

impl LogFormat {
    fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "compact" => Self::Compact,
            _ => Self::Pretty,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Log output format
    pub log_format: LogFormat,
    /// Log level filter (e.g. "info", "triage=debug,sqlx=warn")
    pub log_filter: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            log_filter: "info".to_string(),
        }
    }
}

impl ObservabilityConfig {
    /// Create configuration from environment variables.
    ///
    /// - `LOG_FORMAT`: "pretty", "json", or "compact" (default: "pretty")
    /// - `RUST_LOG`: filter directive (default: "info")
    pub fn from_env() -> Self {
        Self {
            log_format: env::var("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or_default(),
            log_filter: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }

    /// Install the global tracing subscriber.
    ///
    /// Safe to call more than once; later calls are ignored.
    pub fn init(&self) {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_new(&self.log_filter)
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let result = match self.log_format {
            LogFormat::Pretty => fmt().with_env_filter(filter).pretty().try_init(),
            LogFormat::Json => fmt().with_env_filter(filter).json().try_init(),
            LogFormat::Compact => fmt().with_env_filter(filter).compact().try_init(),
        };

        if result.is_err() {
            tracing::debug!("tracing subscriber already installed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("COMPACT"), LogFormat::Compact);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("unknown"), LogFormat::Pretty);
    }

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.log_filter, "info");
    }
}

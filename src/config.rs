//! Application configuration
//!
//! Central configuration for the dispatch and security core. All knobs have
//! safe defaults, can be overridden through the builder, or loaded from the
//! environment at startup.
//!
//! # Usage
//!
//! ```ignore
//! use triage::config::AppConfig;
//!
//! // From environment (APP_ENV, BASE_URL, SESSION_*, LOGIN_*, THROTTLE_*)
//! let config = AppConfig::from_env();
//!
//! // Or explicitly
//! let config = AppConfig::builder()
//!     .base_url("https://app.example.org")
//!     .session_idle_timeout(std::time::Duration::from_secs(7200))
//!     .build();
//! ```

use std::env;
use std::time::Duration;

use crate::parse::parse_duration;

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    /// Parse from an `APP_ENV`-style string
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("production") || s.eq_ignore_ascii_case("prod") {
            Self::Production
        } else {
            Self::Development
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Application-wide configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Deployment environment; controls cookie `Secure` flag and error detail
    pub environment: Environment,

    /// External base URL, used when building absolute redirects
    pub base_url: String,

    /// Path browsers are redirected to when authentication is required
    pub login_path: String,

    /// Session cookie name
    pub session_cookie: String,

    /// Idle timeout before a session is destroyed (default 2h)
    pub session_idle_timeout: Duration,

    /// Interval after which the session ID is regenerated (default 30m)
    pub session_regenerate_interval: Duration,

    /// Failed login attempts tolerated inside the lockout window (default 5)
    pub login_max_attempts: u32,

    /// Window over which failed logins are counted (default 15m)
    pub login_lockout_window: Duration,

    /// Requests per client allowed inside the throttle window (default 100)
    pub throttle_max_requests: u32,

    /// Throttle window (default 60s)
    pub throttle_window: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            base_url: String::new(),
            login_path: "/auth/login".to_string(),
            session_cookie: "APP_SESSION".to_string(),
            session_idle_timeout: Duration::from_secs(7200),
            session_regenerate_interval: Duration::from_secs(1800),
            login_max_attempts: 5,
            login_lockout_window: Duration::from_secs(900),
            throttle_max_requests: 100,
            throttle_window: Duration::from_secs(60),
        }
    }
}

impl AppConfig {
    /// Start building a configuration from defaults
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::default()
    }

    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `APP_ENV`: "production" or "development" (default: development)
    /// - `BASE_URL`: external base URL (default: empty, relative redirects)
    /// - `LOGIN_PATH`: login redirect target (default: "/auth/login")
    /// - `SESSION_NAME`: cookie name (default: "APP_SESSION")
    /// - `SESSION_LIFETIME`: idle timeout, e.g. "2h" (default: 2h)
    /// - `SESSION_REGENERATE`: ID regeneration interval (default: 30m)
    /// - `LOGIN_MAX_ATTEMPTS`: lockout threshold (default: 5)
    /// - `LOGIN_LOCKOUT_WINDOW`: lockout window, e.g. "15m" (default: 15m)
    /// - `THROTTLE_MAX_REQUESTS`: requests per window (default: 100)
    /// - `THROTTLE_WINDOW`: throttle window, e.g. "60s" (default: 60s)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            environment: env::var("APP_ENV")
                .map(|v| Environment::parse(&v))
                .unwrap_or(defaults.environment),
            base_url: env::var("BASE_URL").unwrap_or(defaults.base_url),
            login_path: env::var("LOGIN_PATH").unwrap_or(defaults.login_path),
            session_cookie: env::var("SESSION_NAME").unwrap_or(defaults.session_cookie),
            session_idle_timeout: env::var("SESSION_LIFETIME")
                .map(|v| parse_duration(&v))
                .unwrap_or(defaults.session_idle_timeout),
            session_regenerate_interval: env::var("SESSION_REGENERATE")
                .map(|v| parse_duration(&v))
                .unwrap_or(defaults.session_regenerate_interval),
            login_max_attempts: env::var("LOGIN_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.login_max_attempts),
            login_lockout_window: env::var("LOGIN_LOCKOUT_WINDOW")
                .map(|v| parse_duration(&v))
                .unwrap_or(defaults.login_lockout_window),
            throttle_max_requests: env::var("THROTTLE_MAX_REQUESTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.throttle_max_requests),
            throttle_window: env::var("THROTTLE_WINDOW")
                .map(|v| parse_duration(&v))
                .unwrap_or(defaults.throttle_window),
        }
    }

    /// URL browsers are sent to when a session times out
    pub fn timeout_redirect(&self) -> String {
        format!("{}{}?timeout=1", self.base_url, self.login_path)
    }

    /// URL browsers are sent to when authentication is required
    pub fn login_redirect(&self) -> String {
        format!("{}{}", self.base_url, self.login_path)
    }
}

/// Builder for [`AppConfig`]
#[derive(Debug, Default)]
pub struct AppConfigBuilder {
    config: AppConfig,
}

impl AppConfigBuilder {
    pub fn environment(mut self, env: Environment) -> Self {
        self.config.environment = env;
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn login_path(mut self, path: impl Into<String>) -> Self {
        self.config.login_path = path.into();
        self
    }

    pub fn session_cookie(mut self, name: impl Into<String>) -> Self {
        self.config.session_cookie = name.into();
        self
    }

    pub fn session_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.session_idle_timeout = timeout;
        self
    }

    pub fn session_regenerate_interval(mut self, interval: Duration) -> Self {
        self.config.session_regenerate_interval = interval;
        self
    }

    pub fn login_max_attempts(mut self, max: u32) -> Self {
        self.config.login_max_attempts = max;
        self
    }

    pub fn login_lockout_window(mut self, window: Duration) -> Self {
        self.config.login_lockout_window = window;
        self
    }

    pub fn throttle(mut self, max_requests: u32, window: Duration) -> Self {
        self.config.throttle_max_requests = max_requests;
        self.config.throttle_window = window;
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.session_idle_timeout, Duration::from_secs(7200));
        assert_eq!(config.session_regenerate_interval, Duration::from_secs(1800));
        assert_eq!(config.login_max_attempts, 5);
        assert_eq!(config.login_lockout_window, Duration::from_secs(900));
        assert_eq!(config.throttle_max_requests, 100);
    }

    #[test]
    fn test_environment_parse() {
        assert_eq!(Environment::parse("production"), Environment::Production);
        assert_eq!(Environment::parse("PROD"), Environment::Production);
        assert_eq!(Environment::parse("development"), Environment::Development);
        assert_eq!(Environment::parse("staging"), Environment::Development);
    }

    #[test]
    fn test_builder() {
        let config = AppConfig::builder()
            .environment(Environment::Production)
            .base_url("https://app.example.org")
            .session_idle_timeout(Duration::from_secs(600))
            .login_max_attempts(3)
            .build();

        assert!(config.environment.is_production());
        assert_eq!(config.base_url, "https://app.example.org");
        assert_eq!(config.session_idle_timeout, Duration::from_secs(600));
        assert_eq!(config.login_max_attempts, 3);
    }

    #[test]
    fn test_timeout_redirect() {
        let config = AppConfig::builder()
            .base_url("https://app.example.org")
            .build();
        assert_eq!(
            config.timeout_redirect(),
            "https://app.example.org/auth/login?timeout=1"
        );
    }
}

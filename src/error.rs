//! Application error handling
//!
//! A single error type that maps failures onto the HTTP taxonomy the
//! framework guarantees: missing routes become 404, unauthenticated access
//! becomes a login redirect (or 401 for API clients), authorization and CSRF
//! failures become distinct 403s, validation failures become 422 with a
//! per-field map, and everything else becomes a 500 whose details are hidden
//! in production.
//!
//! # Usage
//!
//! ```ignore
//! use triage::error::{AppError, ErrorConfig};
//!
//! async fn handler() -> Result<String, AppError> {
//!     let record = load_record()
//!         .map_err(|e| AppError::internal("Failed to load record", e))?;
//!     Ok(record)
//! }
//!
//! // At startup:
//! triage::error::init(ErrorConfig::from_env());
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Error Configuration
// ============================================================================

/// Controls how much failure detail leaves the server.
///
/// A clinical deployment never shows database or internal messages to the
/// browser; a developer workstation wants them verbatim.
#[derive(Debug, Clone)]
pub struct ErrorConfig {
    /// When true, internal error details appear in the response body.
    /// Production deployments keep this off.
    pub expose_details: bool,

    /// Log each error as it is rendered into a response
    pub log_errors: bool,

    /// What a client sees for a 500 when details are hidden
    pub internal_error_message: String,
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl ErrorConfig {
    /// Locked-down settings: generic 500 body, details only in the logs.
    pub fn production() -> Self {
        Self {
            expose_details: false,
            log_errors: true,
            internal_error_message: "An internal error occurred".to_string(),
        }
    }

    /// Workstation settings: full detail in the response body.
    pub fn development() -> Self {
        Self {
            expose_details: true,
            log_errors: true,
            internal_error_message: "Internal server error".to_string(),
        }
    }

    /// Pick a mode from `APP_ENV` (falling back to `RUST_ENV`):
    /// "production"/"prod" selects the locked-down settings, anything
    /// else the development ones.
    pub fn from_env() -> Self {
        let env = std::env::var("APP_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        if env.eq_ignore_ascii_case("production") || env.eq_ignore_ascii_case("prod") {
            Self::production()
        } else {
            Self::development()
        }
    }
}

// Process-wide config, fixed at startup
static ERROR_CONFIG: std::sync::OnceLock<ErrorConfig> = std::sync::OnceLock::new();

/// Install the error configuration. Call once at startup; later calls lose.
pub fn init(config: ErrorConfig) {
    let _ = ERROR_CONFIG.set(config);
}

/// The active error configuration (production defaults if `init` never ran)
pub fn config() -> &'static ErrorConfig {
    ERROR_CONFIG.get_or_init(ErrorConfig::default)
}

// ============================================================================
// Error Types
// ============================================================================

/// Application error
///
/// Carries a user-facing message, optional internal details (logged but not
/// exposed in production), and the validation error map when the kind is
/// [`ErrorKind::Validation`].
#[derive(Debug)]
pub struct AppError {
    /// Error kind determines HTTP status and handling
    pub kind: ErrorKind,
    /// User-facing message (safe to expose)
    pub message: String,
    /// Internal details (logged, not exposed in production)
    pub details: Option<String>,
    /// Field -> message map for validation errors
    pub field_errors: Option<BTreeMap<String, String>>,
    /// Original error (for logging)
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// Error categories with their HTTP status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad request (400) - malformed input, safe to expose details
    BadRequest,
    /// Unauthorized (401) - no authenticated session; browsers get a
    /// login redirect instead (see the front controller)
    Unauthorized,
    /// Forbidden (403) - authenticated but lacking the role/permission
    Forbidden,
    /// CSRF token mismatch (403) - kept distinct from Forbidden so the
    /// client message differs
    Csrf,
    /// Not found (404) - no route or resource
    NotFound,
    /// Unprocessable entity (422) - validation failure with field map
    Validation,
    /// Too many requests (429) - rate limited
    RateLimited,
    /// Internal server error (500) - details hidden in production
    Internal,
    /// Service unavailable (503) - temporary failure
    Unavailable,
}

impl ErrorKind {
    /// Get the HTTP status code for this error kind
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden | Self::Csrf => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Whether details can be safely exposed for this error kind
    pub fn expose_details(&self) -> bool {
        matches!(self, Self::BadRequest | Self::Validation | Self::NotFound)
    }
}

impl AppError {
    /// Create a new error
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            field_errors: None,
            source: None,
        }
    }

    /// Create a bad request error (400)
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    /// Create an unauthorized error (401 / login redirect)
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    /// Create a forbidden error (403)
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    /// Create a CSRF failure (403 with a token-specific message)
    pub fn csrf() -> Self {
        Self::new(ErrorKind::Csrf, "Invalid or missing CSRF token")
    }

    /// Create a not found error (404)
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Create a validation error (422) from a field -> message map
    pub fn validation(errors: BTreeMap<String, String>) -> Self {
        Self {
            kind: ErrorKind::Validation,
            message: "The given data was invalid".to_string(),
            details: None,
            field_errors: Some(errors),
            source: None,
        }
    }

    /// Create a rate limited error (429)
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    /// Create an internal error (500) with source
    ///
    /// The message is what users see in development; the source is logged
    /// but never exposed in production.
    pub fn internal(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind: ErrorKind::Internal,
            message: message.into(),
            details: Some(source.to_string()),
            field_errors: None,
            source: Some(Box::new(source)),
        }
    }

    /// Create an internal error without a source
    pub fn internal_msg(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Create a service unavailable error (503)
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    /// Add internal details (logged but not exposed)
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// The message a client is allowed to see under the current config
    pub fn client_message(&self) -> String {
        let cfg = config();
        if cfg.expose_details || self.kind.expose_details() {
            self.message.clone()
        } else {
            match self.kind {
                ErrorKind::Internal | ErrorKind::Unavailable => {
                    cfg.internal_error_message.clone()
                }
                ErrorKind::Unauthorized => "Authentication required".to_string(),
                ErrorKind::Forbidden => {
                    "You do not have permission to perform this action".to_string()
                }
                ErrorKind::Csrf => "Invalid or missing CSRF token".to_string(),
                _ => self.message.clone(),
            }
        }
    }

    /// Log the error (called automatically on response conversion)
    pub(crate) fn log(&self) {
        let cfg = config();
        if !cfg.log_errors {
            return;
        }

        let details = self.details.as_deref().unwrap_or("none");

        match self.kind {
            ErrorKind::Internal | ErrorKind::Unavailable => {
                tracing::error!(
                    error_kind = %self.kind,
                    message = %self.message,
                    details = %details,
                    "Internal error"
                );
            }
            ErrorKind::Unauthorized | ErrorKind::Forbidden | ErrorKind::Csrf => {
                tracing::warn!(
                    error_kind = %self.kind,
                    message = %self.message,
                    "Access error"
                );
            }
            _ => {
                tracing::debug!(
                    error_kind = %self.kind,
                    message = %self.message,
                    "Client error"
                );
            }
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRequest => write!(f, "bad_request"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::Forbidden => write!(f, "forbidden"),
            Self::Csrf => write!(f, "csrf_mismatch"),
            Self::NotFound => write!(f, "not_found"),
            Self::Validation => write!(f, "validation_error"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::Internal => write!(f, "internal_error"),
            Self::Unavailable => write!(f, "service_unavailable"),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

// ============================================================================
// Error Response
// ============================================================================

/// JSON error envelope: `{"success": false, "message": ..., "data": ...}`
#[derive(Debug, Clone, serde::Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl AppError {
    /// Build the JSON envelope body for this error
    pub fn envelope(&self) -> ErrorEnvelope {
        let cfg = config();

        let data = if let Some(errors) = &self.field_errors {
            serde_json::to_value(errors).ok()
        } else if cfg.expose_details {
            self.details
                .as_ref()
                .map(|d| serde_json::Value::String(d.clone()))
        } else {
            None
        };

        ErrorEnvelope {
            success: false,
            message: self.client_message(),
            data,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.log();
        let status = self.kind.status_code();
        (status, Json(self.envelope())).into_response()
    }
}

// ============================================================================
// Conversions from common error types
// ============================================================================

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::internal("IO error", err)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        // Don't expose database details
        AppError::internal("Database error", err)
    }
}

// ============================================================================
// Result type alias
// ============================================================================

/// Result type alias for handlers returning AppError
pub type Result<T> = std::result::Result<T, AppError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_status_codes() {
        assert_eq!(ErrorKind::BadRequest.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorKind::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorKind::Csrf.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorKind::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorKind::Validation.status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ErrorKind::Internal.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_error_kind_expose_details() {
        assert!(ErrorKind::BadRequest.expose_details());
        assert!(ErrorKind::Validation.expose_details());
        assert!(ErrorKind::NotFound.expose_details());
        assert!(!ErrorKind::Internal.expose_details());
        assert!(!ErrorKind::Unauthorized.expose_details());
        assert!(!ErrorKind::Csrf.expose_details());
    }

    #[test]
    fn test_error_builders() {
        let err = AppError::not_found("Page not found");
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.message, "Page not found");

        let err = AppError::internal_msg("boom").with_details("stack");
        assert_eq!(err.kind, ErrorKind::Internal);
        assert_eq!(err.details, Some("stack".to_string()));
    }

    #[test]
    fn test_validation_error_carries_field_map() {
        let mut errors = BTreeMap::new();
        errors.insert("email".to_string(), "The email field is required".to_string());
        let err = AppError::validation(errors);
        assert_eq!(err.kind, ErrorKind::Validation);
        let env = err.envelope();
        assert!(!env.success);
        assert!(env.data.is_some());
        let data = env.data.unwrap();
        assert_eq!(
            data.get("email").and_then(|v| v.as_str()),
            Some("The email field is required")
        );
    }

    #[test]
    fn test_csrf_distinct_from_forbidden() {
        let csrf = AppError::csrf();
        let forbidden = AppError::forbidden("nope");
        assert_eq!(csrf.kind.status_code(), forbidden.kind.status_code());
        assert_ne!(csrf.kind, forbidden.kind);
        assert!(csrf.message.contains("CSRF"));
    }

    #[test]
    fn test_config_modes() {
        let prod = ErrorConfig::production();
        assert!(!prod.expose_details);

        let dev = ErrorConfig::development();
        assert!(dev.expose_details);
    }

    #[test]
    fn test_error_display() {
        let err = AppError::not_found("Page not found");
        assert_eq!(format!("{}", err), "not_found: Page not found");
    }
}

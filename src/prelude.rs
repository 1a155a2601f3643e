//! Triage Prelude - Common imports for applications on the framework
//!
//! Re-exports the types an application touches on almost every page:
//! configuration, routing, the request context, sessions, authentication,
//! validation, and the response helpers.
//!
//! # Usage
//!
//! ```ignore
//! use triage::prelude::*;
//!
//! async fn show_patient(ctx: RequestContext) -> Result<Response> {
//!     let id = ctx.param("id").ok_or_else(|| AppError::not_found("No such patient"))?;
//!     Ok(respond::json_ok(id, None))
//! }
//! ```

// =============================================================================
// Configuration
// =============================================================================

pub use crate::config::{AppConfig, AppConfigBuilder, Environment};

// =============================================================================
// Dispatch
// =============================================================================

pub use crate::app::App;
pub use crate::request::RequestContext;
pub use crate::router::{Flow, Handler, Middleware, Router};

// =============================================================================
// Sessions
// =============================================================================

pub use crate::session::{
    Flash,
    Session,
    SessionManager,
    SessionPolicy,
    SessionStore,
    UserPayload,
};

// =============================================================================
// Authentication
// =============================================================================

pub use crate::auth::{AuthPolicy, AuthService, PgUserRepo, RequestMeta, UserRepo};
pub use crate::password::{PasswordError, PasswordPolicy};

// =============================================================================
// Request guards
// =============================================================================

pub use crate::middleware::{
    AuthMiddleware,
    CsrfMiddleware,
    PermissionMiddleware,
    RateLimitMiddleware,
    RoleMiddleware,
};

// =============================================================================
// Validation
// =============================================================================

pub use crate::validator::{ValidationResult, Validator};

// =============================================================================
// Errors and responses
// =============================================================================

pub use crate::error::{AppError, ErrorConfig, ErrorKind, Result};
pub use crate::respond;

// =============================================================================
// Database
// =============================================================================

pub use crate::database::{create_pool, DatabaseConfig, Page, SqlValue, Table};

// =============================================================================
// Observability
// =============================================================================

pub use crate::observability::{ObservabilityConfig, SecurityEvent};

// =============================================================================
// External Re-exports for Convenience
// =============================================================================

// Axum types that appear in handler signatures
pub use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

// Tracing for logging
pub use tracing::{debug, error, info, instrument, trace, warn};

//! # Triage
//!
//! Dispatch and security core for session-based web applications on Axum
//! and PostgreSQL, built for clinical back-office systems where every
//! request is attributed and audited.
//!
//! The framework is a front controller: routes are registered explicitly on
//! a [`router::Router`], matched in registration order, and guarded by named
//! middleware that can short-circuit the request before the handler runs.
//!
//! ## Features
//!
//! - **Routing**: explicit route table, `{name}` path parameters,
//!   first-match-wins dispatch, per-route middleware chains
//! - **Sessions**: explicit session objects over a pluggable store, idle
//!   timeout with a login redirect indicator, periodic ID regeneration,
//!   flash messages, hardened cookies
//! - **Authentication**: lockout window checked before credentials,
//!   enumeration-resistant failure messages, roles and permissions cached
//!   at login, single-use password reset tokens
//! - **CSRF**: one lazily-issued token per session, compared in constant
//!   time, rejected with a distinct 403 before the handler
//! - **Validation**: pipe-delimited rule strings with a fixed registry,
//!   first failing rule per field, fail-closed database rules
//! - **Audit**: login attempts and security-relevant actions recorded per
//!   request, structured security events through `tracing`
//!
//! ## Quick Start
//!
//! ```ignore
//! use triage::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     triage::observability::ObservabilityConfig::from_env().init();
//!     triage::error::init(ErrorConfig::from_env());
//!
//!     let config = AppConfig::from_env();
//!     let pool = create_pool(&DatabaseConfig::from_env()).await?;
//!
//!     let mut router = Router::new();
//!     router.register_middleware("auth", AuthMiddleware::default());
//!     router.register_middleware("csrf", CsrfMiddleware);
//!     router.get("/patients/{id}", show_patient).middleware("auth");
//!
//!     let app = App::new(config, router);
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     app.serve(listener).await?;
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod csrf;
pub mod database;
pub mod error;
pub mod middleware;
pub mod observability;
mod parse;
pub mod password;
pub mod prelude;
pub mod request;
pub mod respond;
pub mod router;
pub mod session;
pub mod validator;

// Re-exports
pub use app::App;
pub use config::{AppConfig, AppConfigBuilder, Environment};
pub use crypto::{constant_time_eq, constant_time_str_eq};
pub use error::{AppError, ErrorKind, Result};
pub use parse::parse_duration;
pub use request::RequestContext;
pub use router::{Flow, Handler, Middleware, Router};
pub use session::{Session, SessionManager, SessionPolicy};
pub use validator::Validator;

pub use database::{create_pool, health_check, DatabaseConfig, Page, SqlValue, Table};

//! Built-in named middleware
//!
//! These are the guards routes reference by name: authentication, role and
//! permission checks, the CSRF guard, and the per-client request throttle.
//! Register them under the names your routes use:
//!
//! ```ignore
//! router.register_middleware("auth", AuthMiddleware::default());
//! router.register_middleware("csrf", CsrfMiddleware);
//! router.register_middleware("throttle", RateLimitMiddleware::from_config(&config));
//! router.register_middleware("role:admin", RoleMiddleware::new(&["admin"]));
//! router.register_middleware("permission:patients.edit",
//!     PermissionMiddleware::new("patients.edit"));
//! ```

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, Method, StatusCode};

use crate::config::AppConfig;
use crate::csrf;
use crate::error::{AppError, Result};
use crate::observability::SecurityEvent;
use crate::request::RequestContext;
use crate::respond;
use crate::router::{Flow, Middleware};
use crate::security_event;

// ============================================================================
// Authentication guard
// ============================================================================

/// Requires an authenticated session.
///
/// Browsers are redirected to the login page with a flash message; API
/// clients get a 401.
pub struct AuthMiddleware {
    login_path: String,
}

impl Default for AuthMiddleware {
    fn default() -> Self {
        Self {
            login_path: "/auth/login".to_string(),
        }
    }
}

impl AuthMiddleware {
    pub fn new(login_path: impl Into<String>) -> Self {
        Self {
            login_path: login_path.into(),
        }
    }
}

impl Middleware for AuthMiddleware {
    fn handle(&self, ctx: &mut RequestContext) -> Result<Flow> {
        if ctx.session().is_authenticated() {
            return Ok(Flow::Continue);
        }

        if ctx.wants_json() {
            return Err(AppError::unauthorized("Authentication required"));
        }

        let mut session = ctx.session();
        let resp = respond::redirect_with_flash(
            &mut session,
            "warning",
            "Please sign in to continue",
            &self.login_path,
        );
        Ok(Flow::Halt(resp))
    }
}

// ============================================================================
// Role and permission guards
// ============================================================================

/// Requires any of the listed roles.
pub struct RoleMiddleware {
    roles: Vec<String>,
}

impl RoleMiddleware {
    pub fn new(roles: &[&str]) -> Self {
        Self {
            roles: roles.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Middleware for RoleMiddleware {
    fn handle(&self, ctx: &mut RequestContext) -> Result<Flow> {
        let session = ctx.session();
        if !session.is_authenticated() {
            return Err(AppError::unauthorized("Authentication required"));
        }
        if self.roles.iter().any(|role| session.has_role(role)) {
            return Ok(Flow::Continue);
        }

        let username = session.username().unwrap_or_default();
        drop(session);
        security_event!(SecurityEvent::AccessDenied,
            username = %username,
            path = %ctx.path,
            required_roles = ?self.roles,
            "Role check failed");
        Err(AppError::forbidden(
            "You do not have permission to access this page",
        ))
    }
}

/// Requires a specific permission.
pub struct PermissionMiddleware {
    permission: String,
}

impl PermissionMiddleware {
    pub fn new(permission: impl Into<String>) -> Self {
        Self {
            permission: permission.into(),
        }
    }
}

impl Middleware for PermissionMiddleware {
    fn handle(&self, ctx: &mut RequestContext) -> Result<Flow> {
        let session = ctx.session();
        if !session.is_authenticated() {
            return Err(AppError::unauthorized("Authentication required"));
        }
        if session.has_permission(&self.permission) {
            return Ok(Flow::Continue);
        }

        let username = session.username().unwrap_or_default();
        drop(session);
        security_event!(SecurityEvent::AccessDenied,
            username = %username,
            path = %ctx.path,
            required_permission = %self.permission,
            "Permission check failed");
        Err(AppError::forbidden(
            "You do not have permission to perform this action",
        ))
    }
}

// ============================================================================
// CSRF guard
// ============================================================================

/// Verifies the CSRF token on state-changing requests.
///
/// The token is read from the `_token` form field, falling back to the
/// `X-CSRF-Token` header. Safe methods pass through untouched. A mismatch is
/// a 403 before any handler logic runs.
pub struct CsrfMiddleware;

impl Middleware for CsrfMiddleware {
    fn handle(&self, ctx: &mut RequestContext) -> Result<Flow> {
        if matches!(ctx.method, Method::GET | Method::HEAD | Method::OPTIONS) {
            return Ok(Flow::Continue);
        }

        let submitted = ctx
            .input(csrf::FORM_FIELD)
            .map(str::to_string)
            .or_else(|| ctx.header(csrf::HEADER).map(str::to_string));

        let ok = csrf::verify(&ctx.session(), submitted.as_deref());
        if ok {
            return Ok(Flow::Continue);
        }

        security_event!(SecurityEvent::CsrfRejected,
            path = %ctx.path,
            ip = %ctx.client_ip,
            "CSRF verification failed");
        Err(AppError::csrf())
    }
}

// ============================================================================
// Request throttle
// ============================================================================

struct WindowCounter {
    count: u32,
    reset_at: i64,
}

/// Fixed-window request limiter keyed by client address.
///
/// Within the window each request increments a counter; excess requests get
/// a 429 with `Retry-After`. Successful requests carry `X-RateLimit-Limit`,
/// `X-RateLimit-Remaining`, and `X-RateLimit-Reset` headers. Counters live
/// in process memory and reset on restart.
pub struct RateLimitMiddleware {
    max_requests: u32,
    window: Duration,
    counters: RwLock<HashMap<String, WindowCounter>>,
}

impl RateLimitMiddleware {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            counters: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.throttle_max_requests, config.throttle_window)
    }

    fn cleanup(counters: &mut HashMap<String, WindowCounter>, now: i64) {
        counters.retain(|_, c| c.reset_at > now);
    }
}

impl Middleware for RateLimitMiddleware {
    fn handle(&self, ctx: &mut RequestContext) -> Result<Flow> {
        let now = chrono::Utc::now().timestamp();
        let mut counters = self.counters.write().expect("throttle lock poisoned");

        if counters.len() > 10_000 {
            Self::cleanup(&mut counters, now);
        }

        let window_secs = self.window.as_secs() as i64;
        let counter = counters
            .entry(ctx.client_ip.clone())
            .or_insert(WindowCounter {
                count: 0,
                reset_at: now + window_secs,
            });

        if now > counter.reset_at {
            counter.count = 0;
            counter.reset_at = now + window_secs;
        }

        counter.count += 1;

        if counter.count > self.max_requests {
            let retry_after = (counter.reset_at - now).max(0);
            let reset_at = counter.reset_at;
            drop(counters);

            security_event!(SecurityEvent::RateLimitExceeded,
                ip = %ctx.client_ip,
                path = %ctx.path,
                "Request throttle exceeded");

            let mut resp = respond::json_error(
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests. Please try again later.",
            );
            let headers = resp.headers_mut();
            if let Ok(v) = HeaderValue::from_str(&retry_after.to_string()) {
                headers.insert(axum::http::header::RETRY_AFTER, v);
            }
            insert_rate_headers(headers, self.max_requests, 0, reset_at);
            return Ok(Flow::Halt(resp));
        }

        let remaining = self.max_requests - counter.count;
        let reset_at = counter.reset_at;
        drop(counters);

        let mut queued = axum::http::HeaderMap::new();
        insert_rate_headers(&mut queued, self.max_requests, remaining, reset_at);
        for (name, value) in queued.iter() {
            ctx.add_response_header(name.clone(), value.clone());
        }

        Ok(Flow::Continue)
    }
}

fn insert_rate_headers(
    headers: &mut axum::http::HeaderMap,
    limit: u32,
    remaining: u32,
    reset_at: i64,
) {
    let entries = [
        ("x-ratelimit-limit", limit.to_string()),
        ("x-ratelimit-remaining", remaining.to_string()),
        ("x-ratelimit-reset", reset_at.to_string()),
    ];
    for (name, value) in entries {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            headers.insert(name, value);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::session::{SessionManager, SessionPolicy, UserPayload};
    use axum::http::{HeaderMap, Uri};

    fn make_ctx(method: Method, uri: &str, headers: HeaderMap, body: &[u8]) -> RequestContext {
        let session = SessionManager::in_memory(SessionPolicy::default())
            .open(None)
            .0;
        RequestContext::new(
            method,
            &uri.parse::<Uri>().unwrap(),
            headers,
            body,
            session,
            None,
        )
    }

    fn sign_in(ctx: &RequestContext, roles: &[&str], permissions: &[&str]) {
        ctx.session().sign_in(
            UserPayload {
                id: 1,
                username: "asmith".to_string(),
                full_name: "Alice Smith".to_string(),
                email: "asmith@example.org".to_string(),
                roles: roles.iter().map(|s| s.to_string()).collect(),
                permissions: permissions.iter().map(|s| s.to_string()).collect(),
            },
            None,
        );
    }

    #[test]
    fn test_auth_middleware_redirects_browsers() {
        let mut ctx = make_ctx(Method::GET, "/dashboard", HeaderMap::new(), b"");
        let mw = AuthMiddleware::default();
        match mw.handle(&mut ctx).unwrap() {
            Flow::Halt(resp) => {
                assert_eq!(resp.status(), StatusCode::FOUND);
                assert_eq!(
                    resp.headers().get(axum::http::header::LOCATION).unwrap(),
                    "/auth/login"
                );
            }
            Flow::Continue => panic!("expected halt"),
        }
        // Flash message queued for the login page
        assert!(ctx.session().take_flash().is_some());
    }

    #[test]
    fn test_auth_middleware_401_for_json_clients() {
        let mut headers = HeaderMap::new();
        headers.insert("accept", HeaderValue::from_static("application/json"));
        let mut ctx = make_ctx(Method::GET, "/api/x", headers, b"");
        let err = AuthMiddleware::default().handle(&mut ctx).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthorized);
    }

    #[test]
    fn test_auth_middleware_passes_authenticated() {
        let mut ctx = make_ctx(Method::GET, "/dashboard", HeaderMap::new(), b"");
        sign_in(&ctx, &[], &[]);
        assert!(matches!(
            AuthMiddleware::default().handle(&mut ctx).unwrap(),
            Flow::Continue
        ));
    }

    #[test]
    fn test_role_middleware_any_of() {
        let mut ctx = make_ctx(Method::GET, "/admin", HeaderMap::new(), b"");
        sign_in(&ctx, &["nurse"], &[]);

        let mw = RoleMiddleware::new(&["admin", "nurse"]);
        assert!(matches!(mw.handle(&mut ctx).unwrap(), Flow::Continue));

        let mw = RoleMiddleware::new(&["admin"]);
        let err = mw.handle(&mut ctx).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Forbidden);
    }

    #[test]
    fn test_permission_middleware() {
        let mut ctx = make_ctx(Method::GET, "/patients", HeaderMap::new(), b"");
        sign_in(&ctx, &[], &["patients.view"]);

        let mw = PermissionMiddleware::new("patients.view");
        assert!(matches!(mw.handle(&mut ctx).unwrap(), Flow::Continue));

        let mw = PermissionMiddleware::new("patients.delete");
        assert_eq!(mw.handle(&mut ctx).unwrap_err().kind, ErrorKind::Forbidden);
    }

    #[test]
    fn test_csrf_guard_ignores_safe_methods() {
        let mut ctx = make_ctx(Method::GET, "/patients", HeaderMap::new(), b"");
        assert!(matches!(CsrfMiddleware.handle(&mut ctx).unwrap(), Flow::Continue));
    }

    #[test]
    fn test_csrf_guard_accepts_form_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        // Token must exist in the session first
        let mut session = SessionManager::in_memory(SessionPolicy::default())
            .open(None)
            .0;
        let token = csrf::token(&mut session);

        let body = format!("_token={token}&name=x");
        let mut ctx = RequestContext::new(
            Method::POST,
            &"/save".parse::<Uri>().unwrap(),
            headers,
            body.as_bytes(),
            session,
            None,
        );
        assert!(matches!(CsrfMiddleware.handle(&mut ctx).unwrap(), Flow::Continue));
    }

    #[test]
    fn test_csrf_guard_accepts_header_token() {
        let mut session = SessionManager::in_memory(SessionPolicy::default())
            .open(None)
            .0;
        let token = csrf::token(&mut session);

        let mut headers = HeaderMap::new();
        headers.insert("x-csrf-token", HeaderValue::from_str(&token).unwrap());
        let mut ctx = RequestContext::new(
            Method::DELETE,
            &"/patients/4".parse::<Uri>().unwrap(),
            headers,
            b"",
            session,
            None,
        );
        assert!(matches!(CsrfMiddleware.handle(&mut ctx).unwrap(), Flow::Continue));
    }

    #[test]
    fn test_csrf_guard_rejects_missing_or_wrong_token() {
        let mut ctx = make_ctx(Method::POST, "/save", HeaderMap::new(), b"");
        csrf::token(&mut ctx.session());
        let err = CsrfMiddleware.handle(&mut ctx).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Csrf);

        let mut headers = HeaderMap::new();
        headers.insert("x-csrf-token", HeaderValue::from_static("forged"));
        let mut ctx = make_ctx(Method::POST, "/save", headers, b"");
        csrf::token(&mut ctx.session());
        let err = CsrfMiddleware.handle(&mut ctx).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Csrf);
    }

    #[test]
    fn test_throttle_blocks_after_limit() {
        let mw = RateLimitMiddleware::new(2, Duration::from_secs(60));

        let mut ctx = make_ctx(Method::GET, "/x", HeaderMap::new(), b"");
        assert!(matches!(mw.handle(&mut ctx).unwrap(), Flow::Continue));
        let mut ctx = make_ctx(Method::GET, "/x", HeaderMap::new(), b"");
        assert!(matches!(mw.handle(&mut ctx).unwrap(), Flow::Continue));

        let mut ctx = make_ctx(Method::GET, "/x", HeaderMap::new(), b"");
        match mw.handle(&mut ctx).unwrap() {
            Flow::Halt(resp) => {
                assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
                assert!(resp.headers().contains_key(axum::http::header::RETRY_AFTER));
                assert_eq!(
                    resp.headers().get("x-ratelimit-remaining").unwrap(),
                    "0"
                );
            }
            Flow::Continue => panic!("third request should be throttled"),
        }
    }

    #[test]
    fn test_throttle_counts_per_client() {
        let mw = RateLimitMiddleware::new(1, Duration::from_secs(60));

        let mut headers_a = HeaderMap::new();
        headers_a.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.1"));
        let mut ctx = make_ctx(Method::GET, "/x", headers_a.clone(), b"");
        assert!(matches!(mw.handle(&mut ctx).unwrap(), Flow::Continue));

        // Different client still has budget
        let mut headers_b = HeaderMap::new();
        headers_b.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.2"));
        let mut ctx = make_ctx(Method::GET, "/x", headers_b, b"");
        assert!(matches!(mw.handle(&mut ctx).unwrap(), Flow::Continue));

        // First client is now over
        let mut ctx = make_ctx(Method::GET, "/x", headers_a, b"");
        assert!(matches!(mw.handle(&mut ctx).unwrap(), Flow::Halt(_)));
    }

    #[test]
    fn test_throttle_window_expiry_resets_counter() {
        let mw = RateLimitMiddleware::new(1, Duration::from_secs(60));
        let now = chrono::Utc::now().timestamp();
        mw.counters.write().unwrap().insert(
            "unknown".to_string(),
            WindowCounter {
                count: 99,
                reset_at: now - 1,
            },
        );

        let mut ctx = make_ctx(Method::GET, "/x", HeaderMap::new(), b"");
        assert!(matches!(mw.handle(&mut ctx).unwrap(), Flow::Continue));
    }

    #[test]
    fn test_throttle_queues_headers_on_success() {
        let mw = RateLimitMiddleware::new(5, Duration::from_secs(60));
        let mut ctx = make_ctx(Method::GET, "/x", HeaderMap::new(), b"");
        assert!(matches!(mw.handle(&mut ctx).unwrap(), Flow::Continue));

        let headers = ctx.response_headers_handle();
        let headers = headers.read().unwrap();
        assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "5");
        assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "4");
        assert!(headers.contains_key("x-ratelimit-reset"));
    }
}

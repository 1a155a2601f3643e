//! Front controller
//!
//! [`App`] owns the route table, the middleware registry, the session
//! manager, and the application configuration. Every request flows through
//! [`App::handle`]: the session is opened from the cookie (enforcing the
//! idle timeout and periodic ID regeneration), the route table is scanned in
//! registration order, the route's named middleware run with short-circuit
//! semantics, the handler produces a response, and the session is persisted
//! with its cookie attached.
//!
//! # Usage
//!
//! ```ignore
//! use triage::app::App;
//! use triage::config::AppConfig;
//! use triage::router::Router;
//!
//! let mut router = Router::new();
//! router.get("/patients/{id}", show_patient).middleware("auth");
//!
//! let app = App::new(AppConfig::from_env(), router);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! app.serve(listener).await?;
//! ```

use std::sync::Arc;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::config::AppConfig;
use crate::error::{AppError, ErrorKind, Result};
use crate::request::{cookie_value, RequestContext};
use crate::respond;
use crate::router::{Flow, Router};
use crate::session::{SessionHandle, SessionManager, SessionPolicy};

/// Largest request body the form parser will buffer
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// The application front controller
pub struct App {
    router: Router,
    sessions: SessionManager,
    config: AppConfig,
}

impl App {
    /// Build an app with an in-memory session store derived from the config.
    pub fn new(config: AppConfig, router: Router) -> Self {
        let sessions = SessionManager::in_memory(SessionPolicy::from_config(&config));
        Self::with_sessions(config, router, sessions)
    }

    /// Build an app over an explicit session manager (shared store, tests).
    pub fn with_sessions(config: AppConfig, router: Router, sessions: SessionManager) -> Self {
        Self {
            router,
            sessions,
            config,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Handle one request end to end.
    pub async fn handle(&self, req: axum::extract::Request) -> Response {
        let (parts, body) = req.into_parts();

        let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(_) => {
                return AppError::bad_request("Request body too large or unreadable")
                    .into_response()
            }
        };

        let cookie = cookie_value(&parts.headers, &self.sessions.policy().cookie_name);
        let (session, terminated) = self.sessions.open(cookie.as_deref());

        let ctx = RequestContext::new(
            parts.method.clone(),
            &parts.uri,
            parts.headers,
            &bytes,
            session,
            None,
        );
        let session_handle = ctx.session_handle();
        let extra_headers = ctx.response_headers_handle();
        let wants_json = ctx.wants_json();

        // A timed-out session never reaches a handler; the browser is sent
        // back to login with an indicator.
        if terminated.is_some() {
            let resp = if wants_json {
                respond::json_error(StatusCode::UNAUTHORIZED, "Session expired")
            } else {
                respond::redirect(&self.config.timeout_redirect())
            };
            return self.finalize(resp, &session_handle, &extra_headers);
        }

        let resp = match self.dispatch(ctx).await {
            Ok(resp) => resp,
            Err(err) => self.render_error(err, wants_json),
        };
        self.finalize(resp, &session_handle, &extra_headers)
    }

    async fn dispatch(&self, mut ctx: RequestContext) -> Result<Response> {
        let Some((route, params)) = self.router.find(&ctx.method, &ctx.path) else {
            return Err(AppError::not_found("Page not found"));
        };

        // Resolve the whole chain before running any of it, so a
        // misconfigured route fails closed instead of half-running.
        let chain = self.router.resolve_middleware(route)?;
        let handler = route.handler();
        ctx.params = params;

        for middleware in chain {
            match middleware.handle(&mut ctx)? {
                Flow::Continue => {}
                Flow::Halt(resp) => return Ok(resp),
            }
        }

        handler.call(ctx).await
    }

    fn render_error(&self, err: AppError, wants_json: bool) -> Response {
        if wants_json {
            return err.into_response();
        }
        match err.kind {
            ErrorKind::Unauthorized => {
                err.log();
                respond::redirect(&self.config.login_redirect())
            }
            _ => {
                err.log();
                let status = err.kind.status_code();
                respond::html_error_page(status, &err.client_message())
            }
        }
    }

    /// Persist the session, attach its cookie and any headers queued by
    /// middleware to the response.
    fn finalize(
        &self,
        mut resp: Response,
        session: &SessionHandle,
        extra_headers: &std::sync::RwLock<axum::http::HeaderMap>,
    ) -> Response {
        let mut guard = session.write().expect("session lock poisoned");
        self.sessions.save(&mut guard);

        let cookie = if guard.is_destroyed() {
            self.sessions.clear_cookie_header()
        } else {
            self.sessions.cookie_header(&guard)
        };
        drop(guard);

        if let Ok(extra) = extra_headers.read() {
            for (name, value) in extra.iter() {
                resp.headers_mut().insert(name, value.clone());
            }
        }

        if let Ok(value) = HeaderValue::from_str(&cookie) {
            resp.headers_mut().append(header::SET_COOKIE, value);
        }
        resp
    }

    /// Mount the front controller as an axum service.
    pub fn into_axum(self: Arc<Self>) -> axum::Router {
        let app = self;
        axum::Router::new().fallback(move |req: axum::extract::Request| {
            let app = app.clone();
            async move { app.handle(req).await }
        })
    }

    /// Serve on an already-bound listener until shutdown.
    pub async fn serve(self, listener: tokio::net::TcpListener) -> std::io::Result<()> {
        let service = Arc::new(self).into_axum();
        axum::serve(listener, service).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Middleware;
    use crate::session::SessionData;
    use crate::session::{MemoryStore, SessionManager, SessionStore};
    use axum::body::Body;
    use axum::http::{Method, Request};
    use std::sync::atomic::{AtomicBool, Ordering};

    async fn ok_handler(_ctx: RequestContext) -> Result<Response> {
        Ok(respond::json_ok("ok", None))
    }

    async fn echo_param(ctx: RequestContext) -> Result<Response> {
        let id = ctx.param("id").unwrap_or("none").to_string();
        Ok(respond::json_ok(&id, None))
    }

    struct Halting;
    impl Middleware for Halting {
        fn handle(&self, _ctx: &mut RequestContext) -> Result<Flow> {
            Ok(Flow::Halt(respond::json_error(
                StatusCode::FORBIDDEN,
                "halted",
            )))
        }
    }

    fn get(uri: &str) -> axum::extract::Request {
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn app(router: Router) -> App {
        App::new(AppConfig::default(), router)
    }

    #[tokio::test]
    async fn test_unmatched_path_is_404() {
        let app = app(Router::new());
        let resp = app.handle(get("/nowhere")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_handler_receives_route_params() {
        let mut router = Router::new();
        router.get("/patients/{id}", echo_param);
        let app = app(router);

        let resp = app.handle(get("/patients/42")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["message"], "42");
    }

    #[tokio::test]
    async fn test_method_mismatch_is_404() {
        let mut router = Router::new();
        router.post("/patients", ok_handler);
        let app = app(router);

        let resp = app.handle(get("/patients")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_middleware_short_circuits_handler() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();

        let mut router = Router::new();
        router.register_middleware("deny", Halting);
        router
            .get("/secure", move |_ctx: RequestContext| {
                let ran = ran_clone.clone();
                async move {
                    ran.store(true, Ordering::SeqCst);
                    Ok(respond::json_ok("ok", None))
                }
            })
            .middleware("deny");
        let app = app(router);

        let resp = app.handle(get("/secure")).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert!(!ran.load(Ordering::SeqCst), "handler must not run after a halt");
    }

    #[tokio::test]
    async fn test_unregistered_middleware_is_500() {
        let mut router = Router::new();
        router.get("/broken", ok_handler).middleware("ghost");
        let app = app(router);

        let resp = app.handle(get("/broken")).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_response_carries_session_cookie() {
        let mut router = Router::new();
        router.get("/", ok_handler);
        let app = app(router);

        let resp = app.handle(get("/")).await;
        let cookie = resp
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap();
        assert!(cookie.starts_with("APP_SESSION="));
        assert!(cookie.contains("HttpOnly"));
    }

    #[tokio::test]
    async fn test_timed_out_session_redirects_with_indicator() {
        let store = Arc::new(MemoryStore::new());
        let now = chrono::Utc::now().timestamp();
        let mut data = SessionData::new(now - 10_000);
        data.last_activity = now - 9_000; // beyond the 2h default
        store.save("stale-id", &data);

        let config = AppConfig::default();
        let sessions = SessionManager::new(store, SessionPolicy::from_config(&config));
        let mut router = Router::new();
        router.get("/dashboard", ok_handler);
        let app = App::with_sessions(config, router, sessions);

        let req = Request::builder()
            .method(Method::GET)
            .uri("/dashboard")
            .header(header::COOKIE, "APP_SESSION=stale-id")
            .body(Body::empty())
            .unwrap();

        let resp = app.handle(req).await;
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(
            resp.headers().get(header::LOCATION).unwrap(),
            "/auth/login?timeout=1"
        );
    }

    #[tokio::test]
    async fn test_timed_out_session_json_client_gets_401() {
        let store = Arc::new(MemoryStore::new());
        let now = chrono::Utc::now().timestamp();
        let mut data = SessionData::new(now - 10_000);
        data.last_activity = now - 9_000;
        store.save("stale-id", &data);

        let config = AppConfig::default();
        let sessions = SessionManager::new(store, SessionPolicy::from_config(&config));
        let app = App::with_sessions(config, Router::new(), sessions);

        let req = Request::builder()
            .method(Method::GET)
            .uri("/api/things")
            .header(header::COOKIE, "APP_SESSION=stale-id")
            .header(header::ACCEPT, "application/json")
            .body(Body::empty())
            .unwrap();

        let resp = app.handle(req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}

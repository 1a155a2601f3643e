//! Route table and matching
//!
//! Routes are registered explicitly, in order, against method + path
//! patterns. A pattern is a literal path where `{name}` segments capture
//! exactly one path segment (`/patients/{id}` matches `/patients/42` but not
//! `/patients/42/visits`). Dispatch scans the table in insertion order and
//! the first entry matching both method and pattern wins, so more specific
//! routes must be registered before overlapping general ones.
//!
//! Middleware are attached to routes by name and resolved from an explicit
//! registry. Referencing a name that was never registered is a configuration
//! error surfaced as a 500 at dispatch time.
//!
//! # Usage
//!
//! ```ignore
//! use triage::router::{Router, Flow};
//!
//! let mut router = Router::new();
//! router.register_middleware("auth", AuthMiddleware::default());
//!
//! router.get("/patients/{id}", show_patient).middleware("auth");
//! router.scope("/admin", &["auth", "role:admin"], |r| {
//!     r.get("/users", list_users);
//!     r.post("/users", create_user);
//! });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::http::Method;
use axum::response::Response;
use regex::Regex;

use crate::error::{AppError, Result};
use crate::request::{normalize_path, RequestContext};

// ============================================================================
// Handler and middleware traits
// ============================================================================

/// Boxed future returned by handlers
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Response>> + Send>>;

/// A route handler: consumes the request context, produces a response.
pub trait Handler: Send + Sync {
    fn call(&self, ctx: RequestContext) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    fn call(&self, ctx: RequestContext) -> HandlerFuture {
        Box::pin(self(ctx))
    }
}

/// Outcome of a middleware step
#[derive(Debug)]
pub enum Flow {
    /// Proceed to the next middleware (or the handler)
    Continue,
    /// Stop the chain and return this response; the handler never runs
    Halt(Response),
}

/// Request middleware, run in the order listed on the route.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: &mut RequestContext) -> Result<Flow>;
}

// ============================================================================
// Route patterns
// ============================================================================

/// Compiled route pattern
#[derive(Debug, Clone)]
pub struct RoutePattern {
    raw: String,
    regex: Regex,
    param_names: Vec<String>,
}

impl RoutePattern {
    /// Compile a pattern like `/patients/{id}/visits/{visit}`.
    ///
    /// `{name}` captures one path segment; everything else matches literally.
    pub fn compile(path: &str) -> Self {
        let normalized = normalize_path(path);
        let mut regex_src = String::from("^");
        let mut param_names = Vec::new();

        for segment in normalized.split('/').skip(1) {
            regex_src.push('/');
            if let Some(name) = placeholder_name(segment) {
                param_names.push(name.to_string());
                regex_src.push_str("([^/]+)");
            } else {
                regex_src.push_str(&regex::escape(segment));
            }
        }
        regex_src.push('$');

        // Built from escaped literals and a fixed capture group, so the
        // regex source is always valid.
        let regex = Regex::new(&regex_src).expect("route pattern regex is valid");

        Self {
            raw: normalized,
            regex,
            param_names,
        }
    }

    /// The pattern as registered
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Match a normalized path, returning captured parameters.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let captures = self.regex.captures(path)?;
        let mut params = HashMap::with_capacity(self.param_names.len());
        for (i, name) in self.param_names.iter().enumerate() {
            if let Some(m) = captures.get(i + 1) {
                params.insert(name.clone(), m.as_str().to_string());
            }
        }
        Some(params)
    }
}

fn placeholder_name(segment: &str) -> Option<&str> {
    let inner = segment.strip_prefix('{')?.strip_suffix('}')?;
    let mut chars = inner.chars();
    let first = chars.next()?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return None;
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Some(inner)
    } else {
        None
    }
}

// ============================================================================
// Routes
// ============================================================================

/// One entry in the route table
pub struct Route {
    methods: Vec<Method>,
    pattern: RoutePattern,
    handler: Arc<dyn Handler>,
    middleware: Vec<String>,
}

impl Route {
    /// Middleware names attached to this route, in execution order
    pub fn middleware_names(&self) -> &[String] {
        &self.middleware
    }

    pub fn pattern(&self) -> &RoutePattern {
        &self.pattern
    }

    pub(crate) fn handler(&self) -> Arc<dyn Handler> {
        self.handler.clone()
    }

    fn accepts(&self, method: &Method) -> bool {
        self.methods.is_empty() || self.methods.contains(method)
    }
}

/// Fluent handle for the route just registered
pub struct RouteHandle<'r> {
    route: &'r mut Route,
}

impl RouteHandle<'_> {
    /// Attach a named middleware; order of calls is execution order.
    pub fn middleware(self, name: &str) -> Self {
        self.route.middleware.push(name.to_string());
        self
    }
}

// ============================================================================
// Router
// ============================================================================

/// Explicit route table plus the named middleware registry
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
    registry: HashMap<String, Arc<dyn Middleware>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a middleware under a name routes can reference.
    pub fn register_middleware<M: Middleware + 'static>(&mut self, name: &str, middleware: M) {
        self.registry.insert(name.to_string(), Arc::new(middleware));
    }

    /// Register a route for explicit methods
    pub fn route<H: Handler + 'static>(
        &mut self,
        methods: Vec<Method>,
        path: &str,
        handler: H,
    ) -> RouteHandle<'_> {
        self.routes.push(Route {
            methods,
            pattern: RoutePattern::compile(path),
            handler: Arc::new(handler),
            middleware: Vec::new(),
        });
        RouteHandle {
            route: self.routes.last_mut().expect("route just pushed"),
        }
    }

    pub fn get<H: Handler + 'static>(&mut self, path: &str, handler: H) -> RouteHandle<'_> {
        self.route(vec![Method::GET], path, handler)
    }

    pub fn post<H: Handler + 'static>(&mut self, path: &str, handler: H) -> RouteHandle<'_> {
        self.route(vec![Method::POST], path, handler)
    }

    pub fn put<H: Handler + 'static>(&mut self, path: &str, handler: H) -> RouteHandle<'_> {
        self.route(vec![Method::PUT], path, handler)
    }

    pub fn patch<H: Handler + 'static>(&mut self, path: &str, handler: H) -> RouteHandle<'_> {
        self.route(vec![Method::PATCH], path, handler)
    }

    pub fn delete<H: Handler + 'static>(&mut self, path: &str, handler: H) -> RouteHandle<'_> {
        self.route(vec![Method::DELETE], path, handler)
    }

    /// Register a route matching any method
    pub fn any<H: Handler + 'static>(&mut self, path: &str, handler: H) -> RouteHandle<'_> {
        self.route(Vec::new(), path, handler)
    }

    /// Register a group of routes under a shared prefix and middleware list.
    pub fn scope<F>(&mut self, prefix: &str, middleware: &[&str], build: F)
    where
        F: FnOnce(&mut Scope<'_>),
    {
        let mut scope = Scope {
            router: self,
            prefix: normalize_path(prefix),
            middleware: middleware.iter().map(|s| s.to_string()).collect(),
        };
        build(&mut scope);
    }

    /// Find the first route matching method + path, in registration order.
    pub fn find(&self, method: &Method, path: &str) -> Option<(&Route, HashMap<String, String>)> {
        let path = normalize_path(path);
        for route in &self.routes {
            if !route.accepts(method) {
                continue;
            }
            if let Some(params) = route.pattern.matches(&path) {
                return Some((route, params));
            }
        }
        None
    }

    /// Resolve a route's middleware names against the registry.
    ///
    /// An unknown name is a configuration error: logged at error level and
    /// surfaced as a 500.
    pub fn resolve_middleware(&self, route: &Route) -> Result<Vec<Arc<dyn Middleware>>> {
        let mut chain = Vec::with_capacity(route.middleware.len());
        for name in &route.middleware {
            match self.registry.get(name) {
                Some(mw) => chain.push(mw.clone()),
                None => {
                    tracing::error!(
                        middleware = %name,
                        route = %route.pattern.as_str(),
                        "Route references unregistered middleware"
                    );
                    return Err(AppError::internal_msg(format!(
                        "Unknown middleware: {name}"
                    )));
                }
            }
        }
        Ok(chain)
    }

    /// Number of registered routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Route registration within a [`Router::scope`] call
pub struct Scope<'r> {
    router: &'r mut Router,
    prefix: String,
    middleware: Vec<String>,
}

impl Scope<'_> {
    fn add<H: Handler + 'static>(
        &mut self,
        methods: Vec<Method>,
        path: &str,
        handler: H,
    ) -> RouteHandle<'_> {
        let full = if path == "/" {
            self.prefix.clone()
        } else {
            format!("{}{}", self.prefix, normalize_path(path))
        };
        let handle = self.router.route(methods, &full, handler);
        for name in &self.middleware {
            handle.route.middleware.push(name.clone());
        }
        handle
    }

    pub fn get<H: Handler + 'static>(&mut self, path: &str, handler: H) -> RouteHandle<'_> {
        self.add(vec![Method::GET], path, handler)
    }

    pub fn post<H: Handler + 'static>(&mut self, path: &str, handler: H) -> RouteHandle<'_> {
        self.add(vec![Method::POST], path, handler)
    }

    pub fn put<H: Handler + 'static>(&mut self, path: &str, handler: H) -> RouteHandle<'_> {
        self.add(vec![Method::PUT], path, handler)
    }

    pub fn delete<H: Handler + 'static>(&mut self, path: &str, handler: H) -> RouteHandle<'_> {
        self.add(vec![Method::DELETE], path, handler)
    }
}

// ============================================================================
// Tests
// ============================================================================

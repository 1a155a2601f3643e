//! Per-request context handed to middleware and handlers
//!
//! The front controller parses the query string, the form body (for
//! urlencoded requests), cookies, and the client address once, then hands
//! handlers a [`RequestContext`] with the matched route parameters and the
//! live session.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, Uri};

use crate::session::{Session, SessionHandle};

/// Everything a handler needs to know about the request
pub struct RequestContext {
    pub method: Method,
    /// Normalized request path (no query string)
    pub path: String,
    /// Named captures from the matched route pattern
    pub params: HashMap<String, String>,
    /// Decoded query-string parameters
    pub query: HashMap<String, String>,
    /// Decoded urlencoded form body (empty for other content types)
    pub form: HashMap<String, String>,
    pub headers: HeaderMap,
    /// Best-effort client address (proxy headers, then socket)
    pub client_ip: String,
    session: SessionHandle,
    response_headers: Arc<RwLock<HeaderMap>>,
}

impl RequestContext {
    /// Build a context from request pieces. `params` is filled in by the
    /// router after pattern matching.
    pub fn new(
        method: Method,
        uri: &Uri,
        headers: HeaderMap,
        body: &[u8],
        session: Session,
        remote_addr: Option<IpAddr>,
    ) -> Self {
        let query = uri
            .query()
            .map(parse_urlencoded)
            .unwrap_or_default();

        let form = if is_form_content_type(&headers) {
            std::str::from_utf8(body)
                .map(parse_urlencoded)
                .unwrap_or_default()
        } else {
            HashMap::new()
        };

        let client_ip = extract_client_ip(&headers, remote_addr);

        Self {
            method,
            path: normalize_path(uri.path()),
            params: HashMap::new(),
            query,
            form,
            headers,
            client_ip,
            session: Session::into_handle(session),
            response_headers: Arc::new(RwLock::new(HeaderMap::new())),
        }
    }

    /// Queue a header to be attached to the final response, whatever the
    /// handler returns.
    pub fn add_response_header(&self, name: HeaderName, value: HeaderValue) {
        self.response_headers
            .write()
            .expect("response header lock poisoned")
            .insert(name, value);
    }

    /// Shared handle to the queued response headers
    pub fn response_headers_handle(&self) -> Arc<RwLock<HeaderMap>> {
        self.response_headers.clone()
    }

    /// Lock the session for reading or writing
    pub fn session(&self) -> std::sync::RwLockWriteGuard<'_, Session> {
        self.session.write().expect("session lock poisoned")
    }

    /// Shared handle to the session, outliving this context
    pub fn session_handle(&self) -> SessionHandle {
        self.session.clone()
    }

    /// Route parameter by name
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Request input: form field first, query parameter as fallback
    pub fn input(&self, name: &str) -> Option<&str> {
        self.form
            .get(name)
            .or_else(|| self.query.get(name))
            .map(String::as_str)
    }

    /// Header value as a string, if present and valid UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// XMLHttpRequest-style request
    pub fn is_ajax(&self) -> bool {
        self.header("x-requested-with")
            .map(|v| v.eq_ignore_ascii_case("XMLHttpRequest"))
            .unwrap_or(false)
    }

    /// Whether the client should get a JSON response rather than a
    /// redirect/HTML page
    pub fn wants_json(&self) -> bool {
        if self.is_ajax() {
            return true;
        }
        self.header("accept")
            .map(|accept| accept.contains("application/json"))
            .unwrap_or(false)
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.header("user-agent")
    }
}

/// Normalize a request path: ensure a leading slash, strip a trailing slash
/// (except for the root).
pub fn normalize_path(path: &str) -> String {
    let mut p = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    while p.len() > 1 && p.ends_with('/') {
        p.pop();
    }
    p
}

fn parse_urlencoded(s: &str) -> HashMap<String, String> {
    serde_urlencoded::from_str::<Vec<(String, String)>>(s)
        .map(|pairs| pairs.into_iter().collect())
        .unwrap_or_default()
}

fn is_form_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false)
}

/// Resolve the client address: `X-Forwarded-For` (first hop), then
/// `X-Real-IP`, then the socket address.
pub fn extract_client_ip(headers: &HeaderMap, remote_addr: Option<IpAddr>) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    remote_addr
        .map(|a| a.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Extract a named cookie from the `Cookie` header.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    for pair in raw.split(';') {
        let pair = pair.trim();
        if let Some((k, v)) = pair.split_once('=') {
            if k == name {
                return Some(v.to_string());
            }
        }
    }
    None
}

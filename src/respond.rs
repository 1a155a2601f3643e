//! Response helpers
//!
//! Successful API responses use the same envelope as errors:
//! `{"success": true, "message": ..., "data": ...}`. Browser flows get
//! redirects (optionally carrying a flash message) and minimal HTML error
//! pages.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;

use crate::session::Session;

/// Success envelope
#[derive(Debug, Clone, serde::Serialize)]
pub struct Envelope {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// 200 with the success envelope
pub fn json_ok(message: &str, data: Option<Value>) -> Response {
    let body = Envelope {
        success: true,
        message: message.to_string(),
        data,
    };
    (StatusCode::OK, Json(body)).into_response()
}

/// Arbitrary status with the failure envelope
pub fn json_error(status: StatusCode, message: &str) -> Response {
    let body = Envelope {
        success: false,
        message: message.to_string(),
        data: None,
    };
    (status, Json(body)).into_response()
}

/// 302 redirect
pub fn redirect(location: &str) -> Response {
    let value = HeaderValue::from_str(location)
        .unwrap_or_else(|_| HeaderValue::from_static("/"));
    (StatusCode::FOUND, [(header::LOCATION, value)]).into_response()
}

/// Set a flash message on the session, then redirect
pub fn redirect_with_flash(
    session: &mut Session,
    kind: &str,
    message: &str,
    location: &str,
) -> Response {
    session.set_flash(kind, message);
    redirect(location)
}

/// Minimal HTML error page for non-API clients
pub fn html_error_page(status: StatusCode, message: &str) -> Response {
    let title = format!(
        "{} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Error")
    );
    let body = format!(
        "<!DOCTYPE html>\n<html><head><title>{title}</title></head>\
         <body><h1>{title}</h1><p>{message}</p></body></html>",
        title = html_escape(&title),
        message = html_escape(message),
    );
    (
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"))],
        body,
    )
        .into_response()
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionManager, SessionPolicy};

    #[test]
    fn test_json_ok_shape() {
        let resp = json_ok("Saved", Some(serde_json::json!({"id": 4})));
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn test_redirect_sets_location() {
        let resp = redirect("/patients");
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(
            resp.headers().get(header::LOCATION).unwrap(),
            "/patients"
        );
    }

    #[test]
    fn test_redirect_with_flash_stores_message() {
        let mgr = SessionManager::in_memory(SessionPolicy::default());
        let (mut session, _) = mgr.open(None);
        let resp = redirect_with_flash(&mut session, "success", "Record saved", "/patients");
        assert_eq!(resp.status(), StatusCode::FOUND);
        let flash = session.take_flash().unwrap();
        assert_eq!(flash.kind, "success");
        assert_eq!(flash.message, "Record saved");
    }

    #[test]
    fn test_html_error_page_escapes() {
        let resp = html_error_page(StatusCode::NOT_FOUND, "<script>alert(1)</script>");
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("a<b>&\"c\""), "a&lt;b&gt;&amp;&quot;c&quot;");
    }
}

//! Response builders for the proxy.
//!
//! Functions return `EndpointResponse` instead of writing directly to the
//! session. This keeps response generation testable; the caller writes the
//! result and adds the `X-RequestID` header.

use bytes::Bytes;
use std::time::Instant;

use crate::constants::CACHE_MAX_AGE_SECS;
use crate::error::RequestError;
use crate::image_optimizer::OptimizationCandidate;

/// Response produced by a handler, ready to be written.
#[derive(Debug, Clone)]
pub struct EndpointResponse {
    /// HTTP status code
    pub status: u16,
    /// Extra headers; `Content-Length` is added by the writer
    pub headers: Vec<(&'static str, String)>,
    pub body: Bytes,
}

impl EndpointResponse {
    pub fn html(status: u16, body: String) -> Self {
        Self {
            status,
            headers: vec![("Content-Type", "text/html".to_string())],
            body: Bytes::from(body),
        }
    }

    pub fn json(status: u16, body: String) -> Self {
        Self {
            status,
            headers: vec![("Content-Type", "application/json".to_string())],
            body: Bytes::from(body),
        }
    }

    fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Escape text for inclusion in HTML element content or attribute values.
pub fn html_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Headers for a successful optimized image (body is streamed separately).
pub fn image_headers(candidate: &OptimizationCandidate) -> Vec<(&'static str, String)> {
    vec![
        ("Content-Type", candidate.content_type().to_string()),
        ("Content-Length", candidate.byte_size.to_string()),
        (
            "Cache-Control",
            format!("public, max-age={}", CACHE_MAX_AGE_SECS),
        ),
    ]
}

/// Redirect to the canonical spelling of the request.
pub fn redirect(path: &str, canonical_query: &str) -> EndpointResponse {
    EndpointResponse {
        status: 302,
        headers: Vec::new(),
        body: Bytes::new(),
    }
    .with_header("Location", format!("{}?{}", path, canonical_query))
    .with_header("Cache-Control", "no-cache")
}

/// 500 page. Production mode shows only the message; otherwise the full
/// error chain is included.
pub fn error_page(error: &RequestError, request_id: &str, production: bool) -> EndpointResponse {
    let message = if production {
        error.to_string()
    } else {
        error.detail()
    };

    let body = format!(
        "<html><head><title>Error</title></head><body><pre>{}</pre><pre>RequestID: {}</pre></body></html>",
        html_escape(&message),
        html_escape(request_id)
    );

    EndpointResponse::html(500, body).with_header("Cache-Control", "no-cache")
}

/// Diagnostic page embedding the negotiated optimization URL.
pub fn frame_page(optimized_url: &str, accept: &str) -> EndpointResponse {
    let url = html_escape(optimized_url);
    let body = format!(
        "<html><head><title>Optimized Image</title></head><body><div>{url}</div><div>{}</div><img src=\"{url}\" /></body></html>",
        html_escape(accept)
    );

    EndpointResponse::html(200, body).with_header("Cache-Control", "no-cache")
}

/// Liveness endpoint with uptime and version information.
pub fn health(start_time: Instant) -> EndpointResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "uptime_seconds": start_time.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
    })
    .to_string();

    EndpointResponse::json(200, body).with_header("Cache-Control", "no-cache")
}

pub fn not_found() -> EndpointResponse {
    EndpointResponse::html(
        404,
        "<html><head><title>Not Found</title></head><body><pre>Not Found</pre></body></html>"
            .to_string(),
    )
}

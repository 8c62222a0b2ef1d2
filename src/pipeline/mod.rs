// Request pipeline module - per-request context carried through the proxy hooks

use std::time::Instant;
use uuid::Uuid;

/// Request context that holds all information about an HTTP request
/// as it flows through the proxy hooks.
///
/// The request id doubles as the temp tracker id and the `X-RequestID`
/// response header, so logs, temp files and responses can be joined.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: String,
    method: String,
    path: String,
    query: Option<String>,
    started: Instant,
    outcome: Option<&'static str>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    /// Create a new RequestContext with a fresh UUID v4 request id
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            method: String::new(),
            path: String::new(),
            query: None,
            started: Instant::now(),
            outcome: None,
        }
    }

    /// Record the request line once the header has been read
    pub fn set_request(&mut self, method: &str, path: &str, query: Option<&str>) {
        self.method = method.to_string();
        self.path = path.to_string();
        self.query = query.map(str::to_string);
    }

    /// Get the unique request ID
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw query string, without the leading `?`
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Path plus query, as received
    pub fn url(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    /// Short label for how the request was answered (`optimized`, `redirect`, ...)
    pub fn set_outcome(&mut self, outcome: &'static str) {
        self.outcome = Some(outcome);
    }

    pub fn outcome(&self) -> Option<&'static str> {
        self.outcome
    }
}

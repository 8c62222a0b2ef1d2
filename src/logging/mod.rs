// Logging module for structured logging using the tracing crate
//
// Two layers live here: the process-wide tracing subscriber, and `RequestLog`,
// the structured document that describes a single optimization request and is
// emitted once when the request finishes.

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::RequestError;

/// Initialize the tracing subscriber for structured logging
///
/// The filter comes from `RUST_LOG` and falls back to `info`. Output goes to
/// stdout as JSON lines (default) or human-readable text.
///
/// # Errors
///
/// Returns an error if a global subscriber has already been installed.
pub fn init_subscriber(config: &LoggingConfig) -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init()?,
        LogFormat::Text => registry.with(fmt::layer()).try_init()?,
    }

    Ok(())
}

#[derive(Default)]
struct LogState {
    url: Option<String>,
    fields: Map<String, Value>,
    warnings: Vec<Value>,
    errors: Vec<Value>,
    timings: Map<String, Value>,
}

/// Per-request structured log document.
///
/// Shared by reference between the concurrent codec steps of one request,
/// hence the interior lock. It is never shared across requests.
pub struct RequestLog {
    source: String,
    request_id: String,
    timestamp: String,
    verbose: bool,
    indent: bool,
    state: Mutex<LogState>,
    flushed: AtomicBool,
}

impl RequestLog {
    pub fn new(config: &LoggingConfig, request_id: impl Into<String>) -> Self {
        Self {
            source: config.source_name.clone(),
            request_id: request_id.into(),
            timestamp: chrono::Utc::now().to_rfc2822(),
            verbose: config.verbose,
            indent: config.indent,
            state: Mutex::new(LogState::default()),
            flushed: AtomicBool::new(false),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn set_url(&self, url: impl Into<String>) {
        self.state.lock().url = Some(url.into());
    }

    /// Record an arbitrary field. Values that fail to serialize are stored as null.
    pub fn write<T: Serialize>(&self, key: &str, value: T) {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.state.lock().fields.insert(key.to_string(), value);
    }

    pub fn warning(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(request_id = %self.request_id, "{}", message);
        self.state.lock().warnings.push(Value::String(message));
    }

    pub fn error(&self, error: &RequestError) {
        self.state.lock().errors.push(serde_json::json!({
            "kind": error.kind(),
            "message": error.to_string(),
            "detail": error.detail(),
        }));
    }

    /// Record the duration of a named stage in milliseconds.
    pub fn timing(&self, stage: &str, elapsed: Duration) {
        let millis = elapsed.as_secs_f64() * 1000.0;
        let value = serde_json::Number::from_f64((millis * 1000.0).round() / 1000.0)
            .map(Value::Number)
            .unwrap_or(Value::Null);
        self.state.lock().timings.insert(stage.to_string(), value);
    }

    pub fn has_errors(&self) -> bool {
        !self.state.lock().errors.is_empty()
    }

    /// The full document as JSON
    pub fn to_value(&self) -> Value {
        let state = self.state.lock();
        let mut doc = Map::new();
        doc.insert("source".into(), Value::String(self.source.clone()));
        doc.insert("requestID".into(), Value::String(self.request_id.clone()));
        doc.insert(
            "url".into(),
            state.url.clone().map(Value::String).unwrap_or(Value::Null),
        );
        doc.insert("timestamp".into(), Value::String(self.timestamp.clone()));
        for (key, value) in &state.fields {
            doc.insert(key.clone(), value.clone());
        }
        doc.insert("warnings".into(), Value::Array(state.warnings.clone()));
        doc.insert("errors".into(), Value::Array(state.errors.clone()));
        doc.insert("timings".into(), Value::Object(state.timings.clone()));
        Value::Object(doc)
    }

    pub fn render(&self) -> String {
        let doc = self.to_value();
        let rendered = if self.indent {
            serde_json::to_string_pretty(&doc)
        } else {
            serde_json::to_string(&doc)
        };
        rendered.unwrap_or_default()
    }

    /// Emit the document. Only the first call has any effect.
    ///
    /// Returns whether this call emitted it.
    pub fn flush(&self) -> bool {
        if self.flushed.swap(true, Ordering::SeqCst) {
            return false;
        }

        let rendered = self.render();
        if self.has_errors() {
            tracing::error!(request_id = %self.request_id, request_log = %rendered, "Request failed");
        } else if self.verbose {
            tracing::info!(request_id = %self.request_id, request_log = %rendered, "Request completed");
        } else {
            tracing::debug!(request_id = %self.request_id, request_log = %rendered, "Request completed");
        }
        true
    }
}

impl std::fmt::Debug for RequestLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestLog")
            .field("source", &self.source)
            .field("request_id", &self.request_id)
            .field("flushed", &self.flushed.load(Ordering::SeqCst))
            .finish()
    }
}

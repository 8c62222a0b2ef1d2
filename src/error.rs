// Error types module

use std::error::Error as StdError;
use std::path::PathBuf;

use thiserror::Error;

use crate::image_optimizer::tools::ToolError;

/// Centralized error type for a single optimization request
///
/// Every variant surfaces to the client as a 500 carrying the request's
/// correlation id. Non-canonical parameters are not represented here: they are
/// a redirect, see `image_optimizer::params::Validated`.
#[derive(Error, Debug)]
pub enum RequestError {
    /// A required query parameter is absent or empty
    #[error("{name} parameter required")]
    MissingParameter { name: &'static str },

    /// A numeric query parameter is outside its accepted range
    #[error("{name} parameter out of range: {value} (allowed {min}-{max})")]
    ParameterOutOfRange {
        name: &'static str,
        value: i64,
        min: u32,
        max: u32,
    },

    /// The source URI could not be parsed or has no host
    #[error("Invalid source uri '{uri}': {reason}")]
    InvalidSourceUri { uri: String, reason: String },

    /// The source host is not on the allow-list
    #[error("Origin not allowed: {host}")]
    OriginNotAllowed { host: String },

    /// The host is allowed but the path is outside every allowed prefix
    #[error("Origin allowed, but path segment not allowed: {host} /{segment}")]
    OriginPathNotAllowed { host: String, segment: String },

    /// Connection, timeout or transfer failure while talking to the origin
    #[error("Origin unreachable: {message}")]
    OriginUnreachable {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// The origin answered with something other than 200
    #[error("Requested image failed with status code: {status}")]
    OriginStatusError { status: u16 },

    /// The origin response is missing a content type or is not an image
    #[error("Requested image failed: content type {}", .content_type.as_deref().unwrap_or("not specified"))]
    ContentTypeInvalid { content_type: Option<String> },

    /// The origin body exceeded the configured ceiling
    #[error("Requested image exceeds {limit} bytes (received at least {received})")]
    PayloadTooLarge { limit: u64, received: u64 },

    /// Local filesystem failure on a temp path
    #[error("Temp file error on {}: {source}", .path.display())]
    TempFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A fatal codec step failed
    #[error("{format} generation failed: {source}")]
    CodecFailure {
        format: &'static str,
        #[source]
        source: ToolError,
    },

    /// Every candidate was absent
    #[error("No optimized candidate could be produced")]
    NoViableCandidate,
}

impl RequestError {
    pub fn unreachable(message: impl Into<String>, source: Option<reqwest::Error>) -> Self {
        RequestError::OriginUnreachable {
            message: message.into(),
            source,
        }
    }

    pub fn temp_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RequestError::TempFile {
            path: path.into(),
            source,
        }
    }

    /// Short machine-friendly kind, used as a log field
    pub fn kind(&self) -> &'static str {
        match self {
            RequestError::MissingParameter { .. } => "missing_parameter",
            RequestError::ParameterOutOfRange { .. } => "parameter_out_of_range",
            RequestError::InvalidSourceUri { .. } => "invalid_source_uri",
            RequestError::OriginNotAllowed { .. } => "origin_not_allowed",
            RequestError::OriginPathNotAllowed { .. } => "origin_path_not_allowed",
            RequestError::OriginUnreachable { .. } => "origin_unreachable",
            RequestError::OriginStatusError { .. } => "origin_status_error",
            RequestError::ContentTypeInvalid { .. } => "content_type_invalid",
            RequestError::PayloadTooLarge { .. } => "payload_too_large",
            RequestError::TempFile { .. } => "temp_file",
            RequestError::CodecFailure { .. } => "codec_failure",
            RequestError::NoViableCandidate => "no_viable_candidate",
        }
    }

    /// Full message including the chain of sources, one per line
    pub fn detail(&self) -> String {
        let mut detail = format!("{}: {}", self.kind(), self);
        let mut source = self.source();
        while let Some(err) = source {
            detail.push_str("\n  caused by: ");
            detail.push_str(&err.to_string());
            source = err.source();
        }
        detail
    }
}

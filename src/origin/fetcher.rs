//! Origin fetcher.
//!
//! Streams a source image from an (already validated) origin URL straight to
//! a tracked temp file, enforcing a byte ceiling and a stall timeout. The body
//! is never buffered as a whole in memory.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::AsyncWriteExt;

use crate::config::OriginConfig;
use crate::error::RequestError;
use crate::temp_tracker::TempTracker;

/// A fully downloaded original.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedOriginal {
    /// Tracked temp path holding the body
    pub path: PathBuf,
    /// Extension derived from the content type subtype (`png`, `jpeg`, ...)
    pub extension: String,
    /// Bytes written
    pub bytes: u64,
}

/// Streaming HTTP client for origin images.
#[derive(Clone)]
pub struct OriginFetcher {
    client: reqwest::Client,
    max_bytes: u64,
    timeout: Duration,
}

impl OriginFetcher {
    /// Create a fetcher from origin configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created (TLS backend
    /// initialisation failure).
    pub fn new(config: &OriginConfig) -> Result<Self, String> {
        let timeout = Duration::from_millis(config.timeout_ms);

        // Redirect targets are never allow-list checked: a 3xx is a status error
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            max_bytes: config.max_bytes,
            timeout,
        })
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Download `uri` into a new temp file registered with `tracker`.
    ///
    /// The timeout applies to waiting for response headers and to every
    /// individual body read, so a stalled origin fails fast while a slow but
    /// steady one still completes.
    ///
    /// # Errors
    ///
    /// - `OriginUnreachable` on transport errors and timeouts
    /// - `OriginStatusError` if the status is not 200
    /// - `ContentTypeInvalid` if the content type is missing or not `image/*`
    /// - `PayloadTooLarge` as soon as the body exceeds the ceiling
    /// - `TempFile` if the local file cannot be written
    pub async fn fetch(
        &self,
        uri: &str,
        tracker: &TempTracker,
    ) -> Result<FetchedOriginal, RequestError> {
        let request = self.client.get(uri).send();
        let mut response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| {
                RequestError::unreachable(
                    format!("no response within {}ms", self.timeout.as_millis()),
                    None,
                )
            })?
            .map_err(|e| RequestError::unreachable(format!("request failed: {}", e), Some(e)))?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(RequestError::OriginStatusError { status });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let extension = content_type
            .as_deref()
            .and_then(image_extension)
            .ok_or_else(|| RequestError::ContentTypeInvalid {
                content_type: content_type.clone(),
            })?;

        // Reject up front when the origin announces an oversized body
        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                return Err(RequestError::PayloadTooLarge {
                    limit: self.max_bytes,
                    received: length,
                });
            }
        }

        let path = tracker.create(&extension);
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| RequestError::temp_file(&path, e))?;

        let mut received: u64 = 0;

        loop {
            let chunk = tokio::time::timeout(self.timeout, response.chunk())
                .await
                .map_err(|_| {
                    RequestError::unreachable(
                        format!("origin stalled for {}ms", self.timeout.as_millis()),
                        None,
                    )
                })?
                .map_err(|e| {
                    RequestError::unreachable(format!("body read failed: {}", e), Some(e))
                })?;

            let Some(chunk) = chunk else {
                break;
            };

            received += chunk.len() as u64;
            if received > self.max_bytes {
                // Dropping `response` here aborts the transfer
                return Err(RequestError::PayloadTooLarge {
                    limit: self.max_bytes,
                    received,
                });
            }

            file.write_all(&chunk)
                .await
                .map_err(|e| RequestError::temp_file(&path, e))?;
        }

        file.flush()
            .await
            .map_err(|e| RequestError::temp_file(&path, e))?;

        tracing::debug!(
            request_id = %tracker.id(),
            uri = %uri,
            bytes = received,
            extension = %extension,
            "Origin image downloaded"
        );

        Ok(FetchedOriginal {
            path,
            extension,
            bytes: received,
        })
    }
}

/// File extension for an `image/<subtype>` content type, or `None` if the
/// content type is not an image. Parameters (`; charset=...`) are ignored and
/// characters unsafe in a file name (path separators included) become `_`.
pub fn image_extension(content_type: &str) -> Option<String> {
    let (category, rest) = content_type.split_once('/')?;
    if !category.trim().eq_ignore_ascii_case("image") {
        return None;
    }

    let subtype = rest.split(';').next().unwrap_or_default().trim();
    if subtype.is_empty() {
        return None;
    }

    let extension = subtype
        .chars()
        .map(|c| match c {
            c if c.is_ascii_alphanumeric() => c.to_ascii_lowercase(),
            '-' | '+' | '.' => c,
            _ => '_',
        })
        .collect();

    Some(extension)
}

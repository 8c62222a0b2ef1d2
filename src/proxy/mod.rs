// Proxy module - Pingora ProxyHttp implementation
//
// Every request is answered from `request_filter`; there is no upstream peer.
// The optimization endpoint fetches the original itself, runs the codec
// pipeline and streams the winning file back.

use async_trait::async_trait;
use bytes::Bytes;
use pingora_core::upstreams::peer::HttpPeer;
use pingora_core::Result;
use pingora_http::ResponseHeader;
use pingora_proxy::{ProxyHttp, Session};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncReadExt;

use crate::config::{Config, LoggingConfig};
use crate::constants::DELIVERY_CHUNK_SIZE;
use crate::error::RequestError;
use crate::image_optimizer::{
    negotiate, parse_options, parse_request, OptimizationCandidate, Optimizer, ProcessRunner,
    QueryParams, RequestOptions, ToolRunner, Toolbox, Validated,
};
use crate::logging::RequestLog;
use crate::origin::{OriginAllowList, OriginFetcher};
use crate::pipeline::RequestContext;
use crate::temp_tracker::TempTracker;

pub mod response;

use response::EndpointResponse;

/// Result of a successfully validated optimization request
#[derive(Debug)]
pub enum Outcome {
    /// Parameters were valid but not canonical
    Redirect { canonical: String },
    /// The winning candidate, opened for delivery
    Optimized {
        candidate: OptimizationCandidate,
        file: tokio::fs::File,
    },
}

pub struct ImgsrvProxy {
    allow_list: OriginAllowList,
    fetcher: OriginFetcher,
    optimizer: Optimizer,
    temp_dir: PathBuf,
    production: bool,
    logging: LoggingConfig,
    start_time: Instant,
}

impl ImgsrvProxy {
    /// Create a proxy that runs the configured codec tools as child processes.
    pub fn new(config: &Config) -> std::result::Result<Self, String> {
        let runner = Arc::new(ProcessRunner::new(config.codecs.timeout()));
        Self::with_runner(config, runner)
    }

    /// Create a proxy with a custom tool runner.
    pub fn with_runner(
        config: &Config,
        runner: Arc<dyn ToolRunner>,
    ) -> std::result::Result<Self, String> {
        let allow_list = config.origin.build_allow_list()?;
        let fetcher = OriginFetcher::new(&config.origin)?;
        let optimizer = Optimizer::new(Toolbox::new(config.codecs.tools.clone()), runner);

        Ok(Self {
            allow_list,
            fetcher,
            optimizer,
            temp_dir: config.temp_dir.clone(),
            production: config.server.production,
            logging: config.logging.clone(),
            start_time: Instant::now(),
        })
    }

    pub fn allow_list(&self) -> &OriginAllowList {
        &self.allow_list
    }

    /// Validate, fetch and optimize. Temp files land in `tracker`; the caller
    /// cleans up after delivery.
    pub async fn optimize_request(
        &self,
        query: Option<&str>,
        tracker: &TempTracker,
        log: &RequestLog,
    ) -> std::result::Result<Outcome, RequestError> {
        let options = match parse_request(query)? {
            Validated::Canonical(options) => options,
            Validated::Redirect { canonical, actual } => {
                log.write(
                    "redirect",
                    serde_json::json!({ "canonical": &canonical, "actual": actual }),
                );
                return Ok(Outcome::Redirect { canonical });
            }
        };

        self.allow_list.validate(&options.source_uri)?;

        let started = Instant::now();
        let original = self.fetcher.fetch(&options.source_uri, tracker).await?;
        log.timing("fetch", started.elapsed());
        log.write("originalBytes", original.bytes);

        let candidate = self
            .optimizer
            .optimize(
                &original.path,
                options.width,
                options.capabilities(),
                tracker,
                log,
            )
            .await?;

        let file = tokio::fs::File::open(&candidate.path)
            .await
            .map_err(|e| RequestError::temp_file(&candidate.path, e))?;

        Ok(Outcome::Optimized { candidate, file })
    }

    /// Options for the diagnostic frame view: `u` and `w` from the query,
    /// codec flags from content negotiation.
    pub fn frame_options(
        query: Option<&str>,
        accept: Option<&str>,
        user_agent: Option<&str>,
    ) -> std::result::Result<RequestOptions, RequestError> {
        let params = QueryParams::parse(query.unwrap_or(""));
        let caps = negotiate(accept, user_agent);
        Ok(RequestOptions {
            allow_webp: caps.webp,
            allow_jp2: caps.jp2,
            allow_jxr: caps.jxr,
            ..parse_options(&params)?
        })
    }

    async fn serve_optimized(
        &self,
        session: &mut Session,
        ctx: &mut RequestContext,
        head_only: bool,
    ) -> Result<()> {
        let log = RequestLog::new(&self.logging, ctx.request_id());
        log.set_url(ctx.url());
        let tracker = TempTracker::with_id(&self.temp_dir, ctx.request_id());
        let started = Instant::now();

        let result = self.optimize_request(ctx.query(), &tracker, &log).await;
        let written = match result {
            Ok(Outcome::Redirect { canonical }) => {
                ctx.set_outcome("redirect");
                let response = response::redirect(ctx.path(), &canonical);
                write_response(session, ctx.request_id(), response, head_only).await
            }
            Ok(Outcome::Optimized { candidate, file }) => {
                ctx.set_outcome("optimized");
                tracing::info!(
                    request_id = %ctx.request_id(),
                    path = %candidate.path.display(),
                    bytes = candidate.byte_size,
                    "Optimized file"
                );
                deliver(session, ctx.request_id(), &candidate, file, head_only).await
            }
            Err(e) => {
                ctx.set_outcome("error");
                log.error(&e);
                let response = response::error_page(&e, ctx.request_id(), self.production);
                write_response(session, ctx.request_id(), response, head_only).await
            }
        };

        if let Err(e) = &written {
            log.warning(format!("Response delivery failed: {}", e));
        }
        log.timing("total", started.elapsed());

        let report = tracker.cleanup().await;
        if !report.is_clean() {
            log.warning(format!(
                "Temp cleanup left {} file(s) behind",
                report.failed.len()
            ));
        }

        log.flush();
        written
    }

    fn serve_frame(&self, session: &Session, ctx: &mut RequestContext) -> EndpointResponse {
        let accept = request_header(session, "accept");
        let user_agent = request_header(session, "user-agent");

        match Self::frame_options(ctx.query(), accept, user_agent) {
            Ok(options) => {
                ctx.set_outcome("frame");
                response::frame_page(&options.canonical_url(), accept.unwrap_or(""))
            }
            Err(e) => {
                ctx.set_outcome("error");
                tracing::warn!(request_id = %ctx.request_id(), error = %e, "Invalid frame request");
                response::error_page(&e, ctx.request_id(), self.production)
            }
        }
    }

    /// Extract client IP address from session (X-Forwarded-For aware)
    fn get_client_ip(&self, session: &Session) -> String {
        if let Some(forwarded_for) = session
            .req_header()
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
        {
            // The first entry is the original client
            if let Some(client_ip) = forwarded_for.split(',').next() {
                return client_ip.trim().to_string();
            }
        }

        session
            .client_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

fn request_header<'a>(session: &'a Session, name: &str) -> Option<&'a str> {
    session
        .req_header()
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
}

/// Write a fully built response, adding `Content-Length` and `X-RequestID`.
async fn write_response(
    session: &mut Session,
    request_id: &str,
    response: EndpointResponse,
    head_only: bool,
) -> Result<()> {
    let mut header = ResponseHeader::build(response.status, None)?;
    for (name, value) in &response.headers {
        header.insert_header(*name, value.as_str())?;
    }
    header.insert_header("Content-Length", response.body.len().to_string())?;
    header.insert_header("X-RequestID", request_id)?;

    session
        .write_response_header(Box::new(header), head_only)
        .await?;
    if !head_only {
        session
            .write_response_body(Some(response.body), true)
            .await?;
    }
    Ok(())
}

/// Stream the winning candidate from disk in fixed-size chunks.
async fn deliver(
    session: &mut Session,
    request_id: &str,
    candidate: &OptimizationCandidate,
    mut file: tokio::fs::File,
    head_only: bool,
) -> Result<()> {
    let mut header = ResponseHeader::build(200, None)?;
    for (name, value) in response::image_headers(candidate) {
        header.insert_header(name, value)?;
    }
    header.insert_header("X-RequestID", request_id)?;

    let empty = candidate.byte_size == 0;
    session
        .write_response_header(Box::new(header), head_only || empty)
        .await?;
    if head_only || empty {
        return Ok(());
    }

    let mut remaining = candidate.byte_size;
    let mut buf = vec![0u8; DELIVERY_CHUNK_SIZE];
    while remaining > 0 {
        let n = file.read(&mut buf).await.map_err(|e| {
            pingora_core::Error::because(
                pingora_core::ErrorType::ReadError,
                "reading optimized file",
                e,
            )
        })?;
        if n == 0 {
            // File shorter than its recorded size
            break;
        }
        remaining = remaining.saturating_sub(n as u64);
        session
            .write_response_body(Some(Bytes::copy_from_slice(&buf[..n])), remaining == 0)
            .await?;
    }

    if remaining > 0 {
        tracing::warn!(
            request_id = %request_id,
            missing_bytes = remaining,
            "Optimized file ended early"
        );
        session.write_response_body(None, true).await?;
    }

    Ok(())
}

#[async_trait]
impl ProxyHttp for ImgsrvProxy {
    type CTX = RequestContext;

    /// Create a new request context for each incoming request
    fn new_ctx(&self) -> Self::CTX {
        RequestContext::new()
    }

    /// Never reached: `request_filter` answers every request.
    async fn upstream_peer(
        &self,
        _session: &mut Session,
        _ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>> {
        Err(pingora_core::Error::explain(
            pingora_core::ErrorType::InternalError,
            "imgsrv has no upstream peer",
        ))
    }

    /// Route and answer the request
    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool> {
        let (method, path) = {
            let req = session.req_header();
            ctx.set_request(req.method.as_str(), req.uri.path(), req.uri.query());
            (req.method.as_str().to_string(), req.uri.path().to_string())
        };

        let head_only = method == "HEAD";
        if method != "GET" && !head_only {
            ctx.set_outcome("not_found");
            write_response(session, ctx.request_id(), response::not_found(), false).await?;
            return Ok(true);
        }

        match path.as_str() {
            "/" => self.serve_optimized(session, ctx, head_only).await?,
            "/frame" => {
                let response = self.serve_frame(session, ctx);
                write_response(session, ctx.request_id(), response, head_only).await?;
            }
            "/health" => {
                ctx.set_outcome("health");
                let response = response::health(self.start_time);
                write_response(session, ctx.request_id(), response, head_only).await?;
            }
            _ => {
                ctx.set_outcome("not_found");
                write_response(session, ctx.request_id(), response::not_found(), head_only)
                    .await?;
            }
        }

        // Response already sent
        Ok(true)
    }

    /// Log request completion
    async fn logging(
        &self,
        session: &mut Session,
        e: Option<&pingora_core::Error>,
        ctx: &mut Self::CTX,
    ) {
        let status_code = session
            .response_written()
            .map(|resp| resp.status.as_u16())
            .unwrap_or(500);
        let client_ip = self.get_client_ip(session);

        if let Some(error) = e {
            tracing::warn!(
                request_id = %ctx.request_id(),
                client_ip = %client_ip,
                path = %ctx.path(),
                error = %error,
                "Request ended with a connection error"
            );
        }

        tracing::info!(
            request_id = %ctx.request_id(),
            client_ip = %client_ip,
            method = %ctx.method(),
            path = %ctx.path(),
            status_code = status_code,
            outcome = ctx.outcome().unwrap_or("none"),
            duration_ms = ctx.elapsed_ms(),
            "Request completed"
        );
    }
}

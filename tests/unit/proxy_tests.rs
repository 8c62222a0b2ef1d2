// Proxy endpoint tests that need no network or codec tools

use std::sync::Arc;

use imgsrv::config::{Config, LoggingConfig};
use imgsrv::error::RequestError;
use imgsrv::image_optimizer::ProcessRunner;
use imgsrv::logging::RequestLog;
use imgsrv::proxy::{response, ImgsrvProxy, Outcome};
use imgsrv::temp_tracker::TempTracker;

const SRC: &str = "http%3A%2F%2Fexample.com%2Fimages%2Fa.png";
const SAFARI_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_13_6) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/11.1.2 Safari/605.1.15";

fn proxy_with_allow_list(entries: &[&str]) -> ImgsrvProxy {
    let mut config = Config::default();
    config.origin.allow_list = Some(entries.iter().map(|e| e.to_string()).collect());
    ImgsrvProxy::with_runner(&config, Arc::new(ProcessRunner::default())).unwrap()
}

#[test]
fn test_frame_options_use_negotiated_flags() {
    let query = format!("u={SRC}&w=320&webp=1&jxr=1");

    let options = ImgsrvProxy::frame_options(Some(&query), Some("image/webp,*/*"), None).unwrap();
    assert_eq!(options.width, 320);
    assert!(options.allow_webp);
    // Query flags are ignored in favour of the headers
    assert!(!options.allow_jxr);
    assert_eq!(options.canonical_url(), format!("/?u={SRC}&w=320&webp=1"));

    let options = ImgsrvProxy::frame_options(Some(&query), None, Some(SAFARI_UA)).unwrap();
    assert!(options.allow_jp2);
    assert!(!options.allow_webp);
}

#[test]
fn test_frame_options_require_uri() {
    let err = ImgsrvProxy::frame_options(Some("w=300"), None, None).unwrap_err();
    assert!(matches!(err, RequestError::MissingParameter { .. }));
}

#[test]
fn test_frame_page_embeds_escaped_url() {
    let page = response::frame_page("/?u=a&w=300", "image/webp");
    let body = String::from_utf8(page.body.to_vec()).unwrap();
    assert_eq!(page.status, 200);
    assert!(body.contains("<img src=\"/?u=a&amp;w=300\" />"));
    assert!(body.contains("<div>image/webp</div>"));
}

#[test]
fn test_not_found_page() {
    let page = response::not_found();
    assert_eq!(page.status, 404);
    assert_eq!(page.header("Content-Type"), Some("text/html"));
}

#[test]
fn test_health_reports_version() {
    let page = response::health(std::time::Instant::now());
    let body: serde_json::Value = serde_json::from_slice(&page.body).unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[test]
fn test_construction_rejects_bad_allow_list() {
    let mut config = Config::default();
    config.origin.allow_list = Some(vec!["/no-host".to_string()]);
    assert!(ImgsrvProxy::with_runner(&config, Arc::new(ProcessRunner::default())).is_err());
}

#[tokio::test]
async fn test_non_canonical_request_redirects_before_fetching() {
    let dir = tempfile::tempdir().unwrap();
    let proxy = proxy_with_allow_list(&["example.com"]);
    let tracker = TempTracker::with_id(dir.path(), "req-1");
    let log = RequestLog::new(&LoggingConfig::default(), "req-1");

    let query = format!("w=300&u={SRC}");
    match proxy.optimize_request(Some(&query), &tracker, &log).await {
        Ok(Outcome::Redirect { canonical }) => {
            assert_eq!(canonical, format!("u={SRC}&w=300"));
        }
        other => panic!("expected redirect, got {other:?}"),
    }
    assert!(tracker.paths().is_empty());
    assert!(log.to_value()["redirect"]["canonical"].is_string());
}

#[tokio::test]
async fn test_disallowed_origin_is_rejected_before_fetching() {
    let dir = tempfile::tempdir().unwrap();
    let proxy = proxy_with_allow_list(&["example.com/images"]);
    let tracker = TempTracker::with_id(dir.path(), "req-2");
    let log = RequestLog::new(&LoggingConfig::default(), "req-2");

    let query = "u=http%3A%2F%2Fevil.com%2Fimages%2Fa.png&w=300";
    let err = proxy
        .optimize_request(Some(query), &tracker, &log)
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::OriginNotAllowed { ref host } if host == "evil.com"));
    assert!(tracker.paths().is_empty());

    let page = response::error_page(&err, "req-2", true);
    assert_eq!(page.status, 500);
}

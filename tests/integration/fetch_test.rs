// Origin fetcher against a local HTTP origin

use imgsrv::config::OriginConfig;
use imgsrv::error::RequestError;
use imgsrv::origin::OriginFetcher;
use imgsrv::temp_tracker::TempTracker;

use super::support::{dir_entries, TestOrigin, ORIGIN_IMAGE_LEN};

fn fetcher(max_bytes: u64, timeout_ms: u64) -> OriginFetcher {
    let config = OriginConfig {
        max_bytes,
        timeout_ms,
        ..Default::default()
    };
    OriginFetcher::new(&config).unwrap()
}

#[tokio::test]
async fn test_fetch_streams_image_to_tracked_file() {
    let origin = TestOrigin::start().await;
    let dir = tempfile::tempdir().unwrap();
    let tracker = TempTracker::with_id(dir.path(), "fetch-ok");

    let fetched = fetcher(4096, 2000)
        .fetch(&origin.url("/ok.png"), &tracker)
        .await
        .unwrap();

    assert_eq!(fetched.extension, "png");
    assert_eq!(fetched.bytes, ORIGIN_IMAGE_LEN as u64);
    assert_eq!(fetched.path, dir.path().join("fetch-ok.png"));
    assert_eq!(
        std::fs::metadata(&fetched.path).unwrap().len(),
        ORIGIN_IMAGE_LEN as u64
    );
    assert_eq!(tracker.paths(), vec![fetched.path.clone()]);

    let report = tracker.cleanup().await;
    assert_eq!(report.removed, 1);
    assert_eq!(dir_entries(dir.path()), 0);
}

#[tokio::test]
async fn test_fetch_uses_content_type_subtype_as_extension() {
    let origin = TestOrigin::start().await;
    let dir = tempfile::tempdir().unwrap();
    let tracker = TempTracker::new(dir.path());

    let fetched = fetcher(4096, 2000)
        .fetch(&origin.url("/photo.jpg"), &tracker)
        .await
        .unwrap();
    assert_eq!(fetched.extension, "jpeg");
    assert!(fetched.path.to_string_lossy().ends_with(".jpeg"));

    tracker.cleanup().await;
}

#[tokio::test]
async fn test_fetch_rejects_non_200() {
    let origin = TestOrigin::start().await;
    let dir = tempfile::tempdir().unwrap();
    let tracker = TempTracker::new(dir.path());

    let err = fetcher(4096, 2000)
        .fetch(&origin.url("/missing.png"), &tracker)
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::OriginStatusError { status: 404 }));
    assert_eq!(err.to_string(), "Requested image failed with status code: 404");
    // Nothing is written for a rejected response
    assert!(tracker.paths().is_empty());
}

#[tokio::test]
async fn test_fetch_does_not_follow_redirects() {
    let origin = TestOrigin::start().await;
    let dir = tempfile::tempdir().unwrap();
    let tracker = TempTracker::new(dir.path());

    let err = fetcher(4096, 2000)
        .fetch(&origin.url("/redirect.png"), &tracker)
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::OriginStatusError { status: 302 }), "{err:?}");
    assert!(tracker.paths().is_empty());
}

#[tokio::test]
async fn test_fetch_rejects_non_image_content() {
    let origin = TestOrigin::start().await;
    let dir = tempfile::tempdir().unwrap();
    let tracker = TempTracker::new(dir.path());
    let fetcher = fetcher(4096, 2000);

    let err = fetcher
        .fetch(&origin.url("/page.html"), &tracker)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RequestError::ContentTypeInvalid { content_type: Some(ref ct) } if ct == "text/html"
    ));

    let err = fetcher
        .fetch(&origin.url("/untyped"), &tracker)
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::ContentTypeInvalid { content_type: None }));
    assert_eq!(err.to_string(), "Requested image failed: content type not specified");
}

#[tokio::test]
async fn test_fetch_aborts_oversized_stream() {
    let origin = TestOrigin::start().await;
    let dir = tempfile::tempdir().unwrap();
    let tracker = TempTracker::with_id(dir.path(), "too-big");

    let err = fetcher(1024, 2000)
        .fetch(&origin.url("/big.png"), &tracker)
        .await
        .unwrap_err();
    match err {
        RequestError::PayloadTooLarge { limit, received } => {
            assert_eq!(limit, 1024);
            assert!(received > 1024);
        }
        other => panic!("expected PayloadTooLarge, got {other:?}"),
    }

    // The partial file was tracked and is removed by cleanup
    assert_eq!(tracker.paths().len(), 1);
    tracker.cleanup().await;
    assert_eq!(dir_entries(dir.path()), 0);
}

#[tokio::test]
async fn test_fetch_rejects_announced_oversize_before_writing() {
    let origin = TestOrigin::start().await;
    let dir = tempfile::tempdir().unwrap();
    let tracker = TempTracker::new(dir.path());

    let err = fetcher(1024, 2000)
        .fetch(&origin.url("/announced-big.png"), &tracker)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RequestError::PayloadTooLarge { limit: 1024, received: 65536 }
    ));
    assert!(tracker.paths().is_empty());
}

#[tokio::test]
async fn test_fetch_times_out_on_stalled_origin() {
    let origin = TestOrigin::start().await;
    let dir = tempfile::tempdir().unwrap();
    let tracker = TempTracker::new(dir.path());

    let err = fetcher(4096, 200)
        .fetch(&origin.url("/stall.png"), &tracker)
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::OriginUnreachable { .. }), "{err:?}");

    tracker.cleanup().await;
    assert_eq!(dir_entries(dir.path()), 0);
}

#[tokio::test]
async fn test_fetch_unreachable_origin() {
    // Bind then drop to get a port with nothing listening
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let dir = tempfile::tempdir().unwrap();
    let tracker = TempTracker::new(dir.path());

    let err = fetcher(4096, 1000)
        .fetch(&format!("http://{}/a.png", addr), &tracker)
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::OriginUnreachable { .. }));
    assert_eq!(err.kind(), "origin_unreachable");
}

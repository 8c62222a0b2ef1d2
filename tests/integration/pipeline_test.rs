// Transcoding pipeline and end-to-end optimization with a scripted codec runner

use std::path::{Path, PathBuf};
use std::sync::Arc;

use imgsrv::config::{Config, LoggingConfig, ToolsConfig};
use imgsrv::error::RequestError;
use imgsrv::image_optimizer::{
    Capabilities, OutputFormat, Optimizer, RequestOptions, ToolStep, Toolbox,
};
use imgsrv::logging::RequestLog;
use imgsrv::proxy::{ImgsrvProxy, Outcome};
use imgsrv::temp_tracker::TempTracker;
use tokio::io::AsyncReadExt;

use super::support::{dir_entries, FakeRunner, TestOrigin};

struct Fixture {
    dir: tempfile::TempDir,
    tracker: TempTracker,
    log: RequestLog,
    source: PathBuf,
}

/// A tracked "original" with the given extension, as the fetcher would leave it.
async fn fixture(ext: &str) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let tracker = TempTracker::with_id(dir.path(), "req");
    let log = RequestLog::new(&LoggingConfig::default(), "req");
    let source = tracker.create(ext);
    tokio::fs::write(&source, vec![0u8; 5000]).await.unwrap();
    Fixture {
        dir,
        tracker,
        log,
        source,
    }
}

fn optimizer(runner: &Arc<FakeRunner>) -> Optimizer {
    Optimizer::new(Toolbox::new(ToolsConfig::default()), runner.clone())
}

fn caps(webp: bool, jp2: bool, jxr: bool) -> Capabilities {
    Capabilities { webp, jp2, jxr }
}

fn ends_with(path: &Path, suffix: &str) -> bool {
    path.to_string_lossy().ends_with(suffix)
}

#[tokio::test]
async fn test_png_source_picks_smallest_candidate() {
    let fx = fixture("png").await;
    let runner = Arc::new(
        FakeRunner::new()
            .size(ToolStep::QuantizePng, 300)
            .size(ToolStep::RecompressJpg, 800),
    );

    let selected = optimizer(&runner)
        .optimize(&fx.source, 300, Capabilities::default(), &fx.tracker, &fx.log)
        .await
        .unwrap();

    assert_eq!(selected.format, OutputFormat::Png);
    assert_eq!(selected.byte_size, 300);
    assert!(ends_with(&selected.path, "req.png.opt.png"));
    assert_eq!(selected.content_type(), "image/png");

    let doc = fx.log.to_value();
    assert_eq!(doc["inputFormat"], "png");
    assert_eq!(doc["selected"]["bytes"], 300);
    assert_eq!(doc["candidates"].as_array().unwrap().len(), 2);
    assert!(doc["timings"]["resize"].is_number());
    assert!(doc["timings"]["encode.jpg"].is_number());
}

#[tokio::test]
async fn test_non_png_source_skips_png_candidate() {
    let fx = fixture("jpeg").await;
    let runner = Arc::new(FakeRunner::new().size(ToolStep::RecompressJpg, 900));

    let selected = optimizer(&runner)
        .optimize(&fx.source, 300, Capabilities::default(), &fx.tracker, &fx.log)
        .await
        .unwrap();

    assert_eq!(selected.format, OutputFormat::Jpeg);
    assert_eq!(selected.content_type(), "image/jpeg");
    let calls = runner.calls();
    assert!(!calls.contains(&ToolStep::QuantizePng));
    assert!(calls.contains(&ToolStep::ResizePng));
    assert!(calls.contains(&ToolStep::ResizeJpg));
}

#[tokio::test]
async fn test_optional_formats_compete_when_enabled() {
    let fx = fixture("png").await;
    let runner = Arc::new(
        FakeRunner::new()
            .size(ToolStep::QuantizePng, 700)
            .size(ToolStep::RecompressJpg, 600)
            .size(ToolStep::EncodeWebp, 500)
            .size(ToolStep::EncodeJp2, 400)
            .size(ToolStep::EncodeJxr, 100),
    );

    let selected = optimizer(&runner)
        .optimize(&fx.source, 640, caps(true, true, true), &fx.tracker, &fx.log)
        .await
        .unwrap();

    assert_eq!(selected.format, OutputFormat::Jxr);
    assert_eq!(selected.content_type(), "image/vnd.ms-photo");
    assert!(runner.calls().contains(&ToolStep::FlattenBmp));

    // The bmp scratch file is tracked for cleanup like everything else
    let paths = fx.tracker.paths();
    assert!(paths.iter().any(|p| ends_with(p, ".hiq.bmp")));
    assert_eq!(fx.log.to_value()["candidates"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_disabled_formats_are_never_generated() {
    let fx = fixture("png").await;
    let runner = Arc::new(FakeRunner::new().size(ToolStep::EncodeWebp, 1));

    let selected = optimizer(&runner)
        .optimize(&fx.source, 300, Capabilities::default(), &fx.tracker, &fx.log)
        .await
        .unwrap();

    assert_ne!(selected.format, OutputFormat::Webp);
    let calls = runner.calls();
    for step in [ToolStep::EncodeWebp, ToolStep::EncodeJp2, ToolStep::EncodeJxr] {
        assert!(!calls.contains(&step), "{step:?} should not run");
    }
}

#[tokio::test]
async fn test_equal_sizes_keep_table_order() {
    let fx = fixture("png").await;
    let runner = Arc::new(
        FakeRunner::new()
            .size(ToolStep::QuantizePng, 500)
            .size(ToolStep::RecompressJpg, 500)
            .size(ToolStep::EncodeWebp, 500),
    );

    let selected = optimizer(&runner)
        .optimize(&fx.source, 300, caps(true, false, false), &fx.tracker, &fx.log)
        .await
        .unwrap();
    assert_eq!(selected.format, OutputFormat::Png);
}

#[tokio::test]
async fn test_selection_is_deterministic() {
    let mut formats = Vec::new();
    for _ in 0..3 {
        let fx = fixture("png").await;
        let runner = Arc::new(
            FakeRunner::new()
                .size(ToolStep::QuantizePng, 900)
                .size(ToolStep::RecompressJpg, 450)
                .size(ToolStep::EncodeJp2, 450),
        );
        let selected = optimizer(&runner)
            .optimize(&fx.source, 300, caps(false, true, false), &fx.tracker, &fx.log)
            .await
            .unwrap();
        formats.push(selected.format);
    }
    assert_eq!(formats, vec![OutputFormat::Jpeg; 3]);
}

#[tokio::test]
async fn test_png_quantize_failure_is_tolerated() {
    let fx = fixture("png").await;
    let runner = Arc::new(
        FakeRunner::new()
            .fail(ToolStep::QuantizePng)
            .size(ToolStep::RecompressJpg, 800),
    );

    let selected = optimizer(&runner)
        .optimize(&fx.source, 300, Capabilities::default(), &fx.tracker, &fx.log)
        .await
        .unwrap();

    assert_eq!(selected.format, OutputFormat::Jpeg);
    let doc = fx.log.to_value();
    let warnings = doc["warnings"].as_array().unwrap();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].as_str().unwrap().contains("PNG generation failed"));
    assert!(!fx.log.has_errors());
}

#[tokio::test]
async fn test_fatal_codec_failure_fails_request_and_cleans_up() {
    // A JPEG source keeps the JPEG row as the only running step
    let fx = fixture("jpeg").await;
    let runner = Arc::new(FakeRunner::new().fail(ToolStep::RecompressJpg));

    let err = optimizer(&runner)
        .optimize(&fx.source, 300, Capabilities::default(), &fx.tracker, &fx.log)
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::CodecFailure { format: "JPEG", .. }));
    assert!(err.to_string().starts_with("JPEG generation failed"));

    let Fixture { dir, tracker, .. } = fx;
    let report = tracker.cleanup().await;
    assert!(report.is_clean());
    assert_eq!(dir_entries(dir.path()), 0);
}

fn failing_runner(steps: &[ToolStep]) -> FakeRunner {
    steps
        .iter()
        .fold(FakeRunner::new(), |runner, step| runner.fail(*step))
}

#[tokio::test]
async fn test_every_tool_failing_fails_request_and_cleans_up() {
    let fx = fixture("png").await;
    let runner = Arc::new(failing_runner(&[
        ToolStep::ResizePng,
        ToolStep::ResizeJpg,
        ToolStep::QuantizePng,
        ToolStep::RecompressJpg,
        ToolStep::EncodeWebp,
        ToolStep::EncodeJp2,
        ToolStep::FlattenBmp,
        ToolStep::EncodeJxr,
    ]));

    let err = optimizer(&runner)
        .optimize(&fx.source, 300, caps(true, true, true), &fx.tracker, &fx.log)
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::CodecFailure { .. }), "{err:?}");

    let Fixture { dir, tracker, .. } = fx;
    let report = tracker.cleanup().await;
    assert!(report.is_clean());
    assert_eq!(dir_entries(dir.path()), 0);
}

#[tokio::test]
async fn test_jxr_failure_cleans_up_bitmap_intermediate() {
    let fx = fixture("png").await;
    let runner = Arc::new(failing_runner(&[ToolStep::EncodeJxr]));

    let err = optimizer(&runner)
        .optimize(&fx.source, 300, caps(false, false, true), &fx.tracker, &fx.log)
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::CodecFailure { format: "JPEG-XR", .. }), "{err:?}");

    let Fixture { dir, tracker, .. } = fx;
    let bmp = tracker
        .paths()
        .into_iter()
        .find(|p| ends_with(p, ".hiq.bmp"))
        .unwrap();
    assert!(bmp.exists());

    let report = tracker.cleanup().await;
    assert!(report.is_clean());
    assert_eq!(dir_entries(dir.path()), 0);
}

#[tokio::test]
async fn test_intermediate_failure_is_fatal() {
    let fx = fixture("png").await;
    let runner = Arc::new(FakeRunner::new().fail(ToolStep::ResizeJpg));

    let err = optimizer(&runner)
        .optimize(&fx.source, 300, Capabilities::default(), &fx.tracker, &fx.log)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RequestError::CodecFailure {
            format: "JPEG intermediate",
            ..
        }
    ));
    // No candidate step runs without both intermediates
    assert!(!runner.calls().contains(&ToolStep::RecompressJpg));
}

#[tokio::test]
async fn test_every_candidate_absent_is_no_viable_candidate() {
    // The JPEG row is always generated and fatal, so the optimizer itself
    // never gets here; the selector still has to handle it.
    let err = imgsrv::image_optimizer::select(vec![None, None, None]).unwrap_err();
    assert!(matches!(err, RequestError::NoViableCandidate));
    assert_eq!(err.kind(), "no_viable_candidate");
}

fn e2e_config(temp_dir: &Path) -> Config {
    let mut config = Config::default();
    config.temp_dir = temp_dir.to_path_buf();
    config.origin.timeout_ms = 2000;
    config
}

#[tokio::test]
async fn test_optimize_request_end_to_end() {
    let origin = TestOrigin::start().await;
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(
        FakeRunner::new()
            .size(ToolStep::QuantizePng, 321)
            .size(ToolStep::RecompressJpg, 654),
    );
    let proxy = ImgsrvProxy::with_runner(&e2e_config(dir.path()), runner.clone()).unwrap();

    let options = RequestOptions {
        source_uri: origin.url("/ok.png"),
        width: 300,
        allow_webp: false,
        allow_jp2: false,
        allow_jxr: false,
    };
    let query = options.canonical_query();

    let tracker = TempTracker::with_id(dir.path(), "e2e");
    let log = RequestLog::new(&LoggingConfig::default(), "e2e");

    let outcome = proxy
        .optimize_request(Some(&query), &tracker, &log)
        .await
        .unwrap();
    let Outcome::Optimized {
        candidate,
        mut file,
    } = outcome
    else {
        panic!("expected an optimized image");
    };

    assert_eq!(candidate.format, OutputFormat::Png);
    assert_eq!(candidate.byte_size, 321);
    let mut body = Vec::new();
    file.read_to_end(&mut body).await.unwrap();
    assert_eq!(body.len(), 321);
    drop(file);

    let doc = log.to_value();
    assert_eq!(doc["originalBytes"], 1000);
    assert!(doc["timings"]["fetch"].is_number());

    // Original, two intermediates and one file per generated candidate
    assert_eq!(tracker.paths().len(), 5);
    let report = tracker.cleanup().await;
    assert_eq!(report.removed, 5);
    assert_eq!(dir_entries(dir.path()), 0);
}

#[tokio::test]
async fn test_optimize_request_origin_error_leaves_nothing_behind() {
    let origin = TestOrigin::start().await;
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(FakeRunner::new());
    let proxy = ImgsrvProxy::with_runner(&e2e_config(dir.path()), runner.clone()).unwrap();

    let options = RequestOptions {
        source_uri: origin.url("/missing.png"),
        width: 300,
        allow_webp: true,
        allow_jp2: false,
        allow_jxr: false,
    };
    let tracker = TempTracker::with_id(dir.path(), "e2e-404");
    let log = RequestLog::new(&LoggingConfig::default(), "e2e-404");

    let err = proxy
        .optimize_request(Some(&options.canonical_query()), &tracker, &log)
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::OriginStatusError { status: 404 }));
    assert!(runner.calls().is_empty());

    tracker.cleanup().await;
    assert_eq!(dir_entries(dir.path()), 0);
}

//! Transcoding pipeline
//!
//! Stage 1 resizes the original into two high quality intermediates (PNG and
//! JPEG). Stage 2 derives every enabled candidate format from them
//! concurrently. Stage 3 keeps the smallest candidate.

use futures::future::try_join_all;
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use super::format::{
    CandidateSpec, FailurePolicy, IntermediateSource, OutputFormat, CANDIDATE_TABLE,
};
use super::negotiation::Capabilities;
use super::tools::{ToolError, ToolInvocation, ToolRunner, Toolbox};
use crate::error::RequestError;
use crate::logging::RequestLog;
use crate::temp_tracker::TempTracker;

/// One fully encoded output considered for selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptimizationCandidate {
    pub path: PathBuf,
    #[serde(rename = "bytes")]
    pub byte_size: u64,
    pub format: OutputFormat,
}

impl OptimizationCandidate {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }
}

/// The resized renditions every candidate derives from
#[derive(Debug, Clone)]
pub struct Intermediates {
    pub png: Option<PathBuf>,
    pub jpg: PathBuf,
}

impl Intermediates {
    fn resolve(&self, source: IntermediateSource) -> Option<&Path> {
        match source {
            IntermediateSource::Png => self.png.as_deref(),
            IntermediateSource::Jpg => Some(&self.jpg),
            IntermediateSource::PngOrJpg => Some(self.png.as_deref().unwrap_or(&self.jpg)),
        }
    }
}

/// `<path><suffix>`, keeping the original extension in place
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Lowercased extension of the original, which reflects the origin's content type
fn source_extension(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Keep the smallest candidate. Equal sizes keep table order.
pub fn select(
    candidates: Vec<Option<OptimizationCandidate>>,
) -> Result<OptimizationCandidate, RequestError> {
    let mut viable: Vec<OptimizationCandidate> = candidates.into_iter().flatten().collect();
    // Stable sort: ties stay in table order
    viable.sort_by_key(|candidate| candidate.byte_size);
    viable
        .into_iter()
        .next()
        .ok_or(RequestError::NoViableCandidate)
}

/// Per-call state shared by the Stage 2 tasks
struct Job<'a> {
    source: &'a Path,
    source_is_png: bool,
    caps: Capabilities,
    intermediates: &'a Intermediates,
    tracker: &'a TempTracker,
    log: &'a RequestLog,
}

#[derive(Clone)]
pub struct Optimizer {
    toolbox: Toolbox,
    runner: Arc<dyn ToolRunner>,
}

impl Optimizer {
    pub fn new(toolbox: Toolbox, runner: Arc<dyn ToolRunner>) -> Self {
        Self { toolbox, runner }
    }

    async fn run_all(&self, invocations: &[ToolInvocation]) -> Result<(), ToolError> {
        for invocation in invocations {
            self.runner.run(invocation).await?;
        }
        Ok(())
    }

    /// Produce the smallest acceptable rendition of `source` at `width`.
    ///
    /// Every path created along the way is registered with `tracker`; the
    /// caller owns cleanup.
    pub async fn optimize(
        &self,
        source: &Path,
        width: u32,
        caps: Capabilities,
        tracker: &TempTracker,
        log: &RequestLog,
    ) -> Result<OptimizationCandidate, RequestError> {
        let input_format = source_extension(source);
        log.write("inputFormat", &input_format);

        let intermediates = self.create_intermediates(source, width, tracker, log).await?;

        let job = Job {
            source,
            source_is_png: input_format == "png",
            caps,
            intermediates: &intermediates,
            tracker,
            log,
        };

        let started = Instant::now();
        // Table order is preserved in the results
        let candidates =
            try_join_all(CANDIDATE_TABLE.iter().map(|spec| self.generate(spec, &job))).await?;
        log.timing("candidates", started.elapsed());

        let found: Vec<&OptimizationCandidate> = candidates.iter().flatten().collect();
        log.write("candidates", &found);

        let selected = select(candidates)?;
        log.write("selected", &selected);

        tracing::debug!(
            request_id = %tracker.id(),
            format = selected.format.extension(),
            bytes = selected.byte_size,
            "Selected optimized candidate"
        );

        Ok(selected)
    }

    async fn create_intermediates(
        &self,
        source: &Path,
        width: u32,
        tracker: &TempTracker,
        log: &RequestLog,
    ) -> Result<Intermediates, RequestError> {
        let hiq_png = with_suffix(source, ".hiq.png");
        let hiq_jpg = with_suffix(source, ".hiq.jpg");
        tracker.add(hiq_png.clone());
        tracker.add(hiq_jpg.clone());

        log.write("resizePng", hiq_png.to_string_lossy());
        log.write("resizeJpg", hiq_jpg.to_string_lossy());

        let png_step = self.toolbox.resize_png(source, width, &hiq_png);
        let jpg_step = self.toolbox.resize_jpg(source, width, &hiq_jpg);

        let started = Instant::now();
        futures::try_join!(
            async {
                self.runner
                    .run(&png_step)
                    .await
                    .map_err(|source| RequestError::CodecFailure {
                        format: "PNG intermediate",
                        source,
                    })
            },
            async {
                self.runner
                    .run(&jpg_step)
                    .await
                    .map_err(|source| RequestError::CodecFailure {
                        format: "JPEG intermediate",
                        source,
                    })
            },
        )?;
        log.timing("resize", started.elapsed());

        Ok(Intermediates {
            png: Some(hiq_png),
            jpg: hiq_jpg,
        })
    }

    fn invocations_for(
        &self,
        job: &Job<'_>,
        format: OutputFormat,
        input: &Path,
        target: &Path,
    ) -> Vec<ToolInvocation> {
        match format {
            OutputFormat::Png => vec![self.toolbox.quantize_png(input, target)],
            OutputFormat::Jpeg => vec![self.toolbox.recompress_jpg(input, target)],
            OutputFormat::Webp => vec![self.toolbox.encode_webp(input, target)],
            OutputFormat::Jp2 => vec![self.toolbox.encode_jp2(input, target)],
            OutputFormat::Jxr => {
                let bmp = with_suffix(job.source, ".hiq.bmp");
                job.tracker.add(bmp.clone());
                vec![
                    self.toolbox.flatten_bmp(input, &bmp),
                    self.toolbox.encode_jxr(&bmp, target),
                ]
            }
        }
    }

    /// Run one table row. `Ok(None)` is the absent candidate.
    async fn generate(
        &self,
        spec: &CandidateSpec,
        job: &Job<'_>,
    ) -> Result<Option<OptimizationCandidate>, RequestError> {
        if !spec.gate.is_open(job.source_is_png, job.caps) {
            return Ok(None);
        }
        let Some(input) = job.intermediates.resolve(spec.source) else {
            return Ok(None);
        };

        let target = with_suffix(job.source, &format!(".opt.{}", spec.format.extension()));
        job.tracker.add(target.clone());

        let invocations = self.invocations_for(job, spec.format, input, &target);

        let started = Instant::now();
        let outcome = match self.run_all(&invocations).await {
            Ok(()) => tokio::fs::metadata(&target)
                .await
                .map(|meta| meta.len())
                .map_err(|source| ToolError::Output {
                    path: target.clone(),
                    source,
                }),
            Err(e) => Err(e),
        };
        job.log.timing(
            &format!("encode.{}", spec.format.extension()),
            started.elapsed(),
        );

        match outcome {
            Ok(byte_size) => Ok(Some(OptimizationCandidate {
                path: target,
                byte_size,
                format: spec.format,
            })),
            Err(e) if spec.policy == FailurePolicy::Tolerated => {
                job.log.warning(format!(
                    "{} generation failed, skipping candidate (probably a photo): {}",
                    spec.format.name(),
                    e
                ));
                Ok(None)
            }
            Err(e) => Err(RequestError::CodecFailure {
                format: spec.format.name(),
                source: e,
            }),
        }
    }
}

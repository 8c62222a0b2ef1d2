//! Output formats and the candidate table
//!
//! Which intermediate feeds each format, when the format is attempted, and
//! whether its failure aborts the request are all data in `CANDIDATE_TABLE`.
//! Table order is also the tie-break order during selection.

use serde::Serialize;

use super::negotiation::Capabilities;

/// Output image format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Png,
    #[serde(rename = "jpg")]
    Jpeg,
    Webp,
    Jp2,
    Jxr,
}

impl OutputFormat {
    /// Human-readable name, used in errors and logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Png => "PNG",
            Self::Jpeg => "JPEG",
            Self::Webp => "WebP",
            Self::Jp2 => "JPEG 2000",
            Self::Jxr => "JPEG-XR",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
            Self::Jp2 => "jp2",
            Self::Jxr => "jxr",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
            Self::Jp2 => "image/jp2",
            // image/jxr is not understood by the browsers that decode JPEG-XR
            Self::Jxr => "image/vnd.ms-photo",
        }
    }
}

/// Intermediate rendition a candidate is derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntermediateSource {
    Png,
    Jpg,
    /// The PNG intermediate when present, otherwise the JPEG one
    PngOrJpg,
}

/// Condition under which a candidate is attempted at all
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Always,
    SourceIsPng,
    AllowWebp,
    AllowJp2,
    AllowJxr,
}

impl Gate {
    pub fn is_open(&self, source_is_png: bool, caps: Capabilities) -> bool {
        match self {
            Gate::Always => true,
            Gate::SourceIsPng => source_is_png,
            Gate::AllowWebp => caps.webp,
            Gate::AllowJp2 => caps.jp2,
            Gate::AllowJxr => caps.jxr,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Failure aborts the whole optimization
    Fatal,
    /// Failure is logged as a warning and the candidate is dropped
    Tolerated,
}

#[derive(Debug, Clone, Copy)]
pub struct CandidateSpec {
    pub format: OutputFormat,
    pub source: IntermediateSource,
    pub gate: Gate,
    pub policy: FailurePolicy,
}

/// Every candidate format, in tie-break order.
pub const CANDIDATE_TABLE: [CandidateSpec; 5] = [
    // Palette reduction fails routinely on photographs
    CandidateSpec {
        format: OutputFormat::Png,
        source: IntermediateSource::Png,
        gate: Gate::SourceIsPng,
        policy: FailurePolicy::Tolerated,
    },
    CandidateSpec {
        format: OutputFormat::Jpeg,
        source: IntermediateSource::Jpg,
        gate: Gate::Always,
        policy: FailurePolicy::Fatal,
    },
    CandidateSpec {
        format: OutputFormat::Webp,
        source: IntermediateSource::PngOrJpg,
        gate: Gate::AllowWebp,
        policy: FailurePolicy::Fatal,
    },
    CandidateSpec {
        format: OutputFormat::Jp2,
        source: IntermediateSource::Jpg,
        gate: Gate::AllowJp2,
        policy: FailurePolicy::Fatal,
    },
    CandidateSpec {
        format: OutputFormat::Jxr,
        source: IntermediateSource::Png,
        gate: Gate::AllowJxr,
        policy: FailurePolicy::Fatal,
    },
];

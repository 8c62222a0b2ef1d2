//! Image optimization module
//!
//! Turns a fetched original into the smallest encoding the client accepts:
//!
//! - `params`: query parsing and the canonical URL contract
//! - `negotiation`: codec capabilities from `Accept` / `User-Agent`
//! - `format`: output formats and the declarative candidate table
//! - `tools`: external codec invocations and the process runner
//! - `pipeline`: intermediates, concurrent candidates, selection

pub mod format;
pub mod negotiation;
pub mod params;
pub mod pipeline;
pub mod tools;

// Re-export commonly used types
pub use format::{CandidateSpec, FailurePolicy, Gate, IntermediateSource, OutputFormat, CANDIDATE_TABLE};
pub use negotiation::{negotiate, Capabilities};
pub use params::{parse_options, parse_request, parse_width, QueryParams, RequestOptions, Validated};
pub use pipeline::{select, Intermediates, OptimizationCandidate, Optimizer};
pub use tools::{
    check_tools, find_program, ProcessRunner, ToolError, ToolInvocation, ToolRunner, ToolStep,
    Toolbox,
};

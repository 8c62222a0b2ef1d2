//! Codec capability negotiation from request headers
//!
//! Used by the diagnostic frame view to pick the flags a browser can decode.
//! The optimization endpoint itself never negotiates: its flags are explicit
//! query parameters so the cache key fully describes the response.

use regex::Regex;
use std::sync::OnceLock;

/// Minimum Safari major version with JPEG 2000 support
const SAFARI_JP2_MIN_VERSION: u32 = 6;

/// Capability flags for the optional output formats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub webp: bool,
    pub jp2: bool,
    pub jxr: bool,
}

fn safari_version_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Literal pattern, cannot fail to compile
    RE.get_or_init(|| Regex::new(r"Version/(\d+)").expect("valid regex"))
}

/// Whether a comma-separated Accept header lists `media_type` verbatim.
fn accepts(accept: &str, media_type: &str) -> bool {
    accept
        .split(',')
        .map(|item| item.split(';').next().unwrap_or("").trim())
        .any(|item| item.eq_ignore_ascii_case(media_type))
}

/// Safari major version from a user agent, 0 when Safari reports none.
fn safari_major_version(user_agent: &str) -> Option<u32> {
    if !user_agent.contains("Safari") {
        return None;
    }
    let version = safari_version_regex()
        .captures(user_agent)
        .and_then(|caps| caps[1].parse().ok())
        .unwrap_or(0);
    Some(version)
}

/// Pick at most one optional format. First match wins: WebP, then JPEG-XR,
/// then JPEG 2000 for Safari 6 and later.
pub fn negotiate(accept: Option<&str>, user_agent: Option<&str>) -> Capabilities {
    let accept = accept.unwrap_or("");
    let user_agent = user_agent.unwrap_or("");

    if accepts(accept, "image/webp") {
        Capabilities {
            webp: true,
            ..Default::default()
        }
    } else if accepts(accept, "image/jxr") {
        Capabilities {
            jxr: true,
            ..Default::default()
        }
    } else if safari_major_version(user_agent).is_some_and(|v| v >= SAFARI_JP2_MIN_VERSION) {
        Capabilities {
            jp2: true,
            ..Default::default()
        }
    } else {
        Capabilities::default()
    }
}

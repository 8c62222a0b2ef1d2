//! Request parameter parsing and the canonical query contract
//!
//! The optimization endpoint accepts exactly one serialization of its
//! parameters:
//!
//! ```text
//! /?u=<percent-encoded source>&w=<width>[&webp=1][&jp2=1][&jxr=1]
//! ```
//!
//! Any other spelling of the same options (different order, `webp=true`,
//! extra parameters) is answered with a redirect to the canonical form so
//! that downstream HTTP caches only ever see one key per result.

use std::borrow::Cow;

use super::negotiation::Capabilities;
use crate::constants::{DEFAULT_WIDTH, MAX_WIDTH, MIN_WIDTH};
use crate::error::RequestError;

/// Validated options of one optimization request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestOptions {
    pub source_uri: String,
    pub width: u32,
    pub allow_webp: bool,
    pub allow_jp2: bool,
    pub allow_jxr: bool,
}

impl RequestOptions {
    /// The single permitted query string for these options.
    pub fn canonical_query(&self) -> String {
        let mut qs = format!(
            "u={}&w={}",
            urlencoding::encode(&self.source_uri),
            self.width
        );
        for (name, enabled) in [
            ("webp", self.allow_webp),
            ("jp2", self.allow_jp2),
            ("jxr", self.allow_jxr),
        ] {
            if enabled {
                qs.push('&');
                qs.push_str(name);
                qs.push_str("=1");
            }
        }
        qs
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            webp: self.allow_webp,
            jp2: self.allow_jp2,
            jxr: self.allow_jxr,
        }
    }

    /// Root-relative URL of the optimization endpoint for these options
    pub fn canonical_url(&self) -> String {
        format!("/?{}", self.canonical_query())
    }
}

/// Outcome of validating a request's query string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validated {
    /// The request is already in canonical form
    Canonical(RequestOptions),
    /// Valid options, but spelled differently: redirect to `canonical`
    Redirect { canonical: String, actual: String },
}

/// Raw query parameters in arrival order. Duplicate keys keep their first value.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn parse(raw: &str) -> Self {
        let mut pairs: Vec<(String, String)> = Vec::new();
        for part in raw.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            pairs.push((decode_component(key), decode_component(value)));
        }
        Self { pairs }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

fn decode_component(raw: &str) -> String {
    let spaced: Cow<str> = if raw.contains('+') {
        Cow::Owned(raw.replace('+', " "))
    } else {
        Cow::Borrowed(raw)
    };
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced.into_owned(),
    }
}

/// Integer-prefix parse: optional leading whitespace and sign, then digits.
/// Returns `None` when no digits are present.
fn parse_int_prefix(raw: &str) -> Option<i64> {
    let trimmed = raw.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }

    let magnitude = rest[..digits].bytes().fold(0i64, |acc, b| {
        acc.saturating_mul(10).saturating_add(i64::from(b - b'0'))
    });
    Some(if negative { -magnitude } else { magnitude })
}

/// Requested width before range checking. Missing, unparseable and zero
/// values all fall back to the default width.
pub fn parse_width(raw: Option<&str>) -> i64 {
    match raw.and_then(parse_int_prefix) {
        Some(0) | None => i64::from(DEFAULT_WIDTH),
        Some(width) => width,
    }
}

/// Build `RequestOptions` from parsed parameters without the canonical check.
pub fn parse_options(params: &QueryParams) -> Result<RequestOptions, RequestError> {
    let source_uri = match params.get("u") {
        Some(u) if !u.is_empty() => u.to_string(),
        _ => return Err(RequestError::MissingParameter { name: "u (uri)" }),
    };

    let width = parse_width(params.get("w"));
    if width < i64::from(MIN_WIDTH) || width > i64::from(MAX_WIDTH) {
        return Err(RequestError::ParameterOutOfRange {
            name: "w",
            value: width,
            min: MIN_WIDTH,
            max: MAX_WIDTH,
        });
    }

    let flag = |name: &str| params.get(name) == Some("1");

    Ok(RequestOptions {
        source_uri,
        width: width as u32,
        allow_webp: flag("webp"),
        allow_jp2: flag("jp2"),
        allow_jxr: flag("jxr"),
    })
}

/// Validate a raw query string (without the leading `?`).
///
/// Parameter errors take precedence over the canonical-form comparison, so an
/// invalid request is never redirected.
pub fn parse_request(raw_query: Option<&str>) -> Result<Validated, RequestError> {
    let actual = raw_query.unwrap_or("");
    let options = parse_options(&QueryParams::parse(actual))?;

    let canonical = options.canonical_query();
    if canonical == actual {
        Ok(Validated::Canonical(options))
    } else {
        Ok(Validated::Redirect {
            canonical,
            actual: actual.to_string(),
        })
    }
}

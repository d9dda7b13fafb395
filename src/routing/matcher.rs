//! Route pattern matching logic.
//!
//! # Responsibilities
//! - Match path patterns segment by segment
//! - Capture `:param` segments
//! - Match HTTP methods
//!
//! # Design Decisions
//! - Literal segments match ASCII case-insensitively
//! - Request paths with empty or dot segments are refused, see `check_request_path`
//! - A trailing `*` matches zero or more remaining segments
//! - Empty method list = always matches (wildcard)
//! - No regex to guarantee O(n) matching

use axum::http::Method;
use std::collections::BTreeMap;
use std::fmt;

/// Parameters captured from `:name` segments.
pub type PathParams = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    /// Trailing wildcard.
    Rest,
}

/// Error raised for malformed patterns.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("pattern `{0}` must start with '/'")]
    NotAbsolute(String),
    #[error("pattern `{0}` has a wildcard before its last segment")]
    WildcardNotLast(String),
    #[error("pattern `{0}` has an unnamed parameter")]
    EmptyParam(String),
}

/// A compiled path pattern such as `/api/organizations/:organizationId/*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        if !pattern.starts_with('/') {
            return Err(PatternError::NotAbsolute(pattern.to_string()));
        }

        let parts: Vec<&str> = split_path(pattern).collect();
        let mut segments = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let segment = if *part == "*" {
                if i + 1 != parts.len() {
                    return Err(PatternError::WildcardNotLast(pattern.to_string()));
                }
                Segment::Rest
            } else if let Some(name) = part.strip_prefix(':') {
                if name.is_empty() {
                    return Err(PatternError::EmptyParam(pattern.to_string()));
                }
                Segment::Param(name.to_string())
            } else {
                Segment::Literal(part.to_string())
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Match a request path, returning captured parameters.
    pub fn match_path(&self, path: &str) -> Option<PathParams> {
        let mut params = PathParams::new();
        let mut parts = split_path(path);

        for segment in &self.segments {
            match segment {
                Segment::Rest => return Some(params),
                Segment::Literal(lit) => {
                    if !parts.next()?.eq_ignore_ascii_case(lit) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    params.insert(name.clone(), parts.next()?.to_string());
                }
            }
        }

        // Every path segment must be consumed unless the pattern ended in `*`.
        if parts.next().is_some() {
            return None;
        }
        Some(params)
    }

    pub fn matches(&self, path: &str) -> bool {
        self.match_path(path).is_some()
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Why a request path was refused before route lookup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestPathError {
    #[error("path contains an empty segment")]
    EmptySegment,
    #[error("path contains a `.` or `..` segment")]
    DotSegment,
    #[error("path contains an encoded or backslash separator")]
    EncodedSeparator,
}

/// Accept only paths whose segments mean the same thing to every server:
/// no `//`, no `.`/`..` (plain or `%2e`-encoded) and no `%2f`, `%5c` or `\`.
/// A single trailing slash is allowed.
pub fn check_request_path(path: &str) -> Result<(), RequestPathError> {
    let lower = path.to_ascii_lowercase();
    if lower.contains("%2f") || lower.contains("%5c") || lower.contains('\\') {
        return Err(RequestPathError::EncodedSeparator);
    }

    let segments: Vec<&str> = lower.split('/').skip(1).collect();
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            if i + 1 != segments.len() {
                return Err(RequestPathError::EmptySegment);
            }
            continue;
        }
        let decoded = segment.replace("%2e", ".");
        if decoded == "." || decoded == ".." {
            return Err(RequestPathError::DotSegment);
        }
    }
    Ok(())
}

/// Matches a set of HTTP methods.
#[derive(Debug, Clone, Default)]
pub struct MethodMatcher {
    methods: Vec<Method>,
}

impl MethodMatcher {
    pub fn new(methods: &[String]) -> Result<Self, String> {
        let methods = methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                    .map_err(|_| format!("invalid HTTP method `{}`", m))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { methods })
    }

    pub fn matches(&self, method: &Method) -> bool {
        self.methods.is_empty() || self.methods.contains(method)
    }
}

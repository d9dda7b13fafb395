//! Response decoration.

use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::security::rate_limit::RateLimitInfo;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Write the quota headers, plus `retry-after` when the request was blocked.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, info: &RateLimitInfo) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(info.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(info.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(info.reset_at));
    if let Some(secs) = info.retry_after_secs {
        headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(secs));
    }
}

/// Like `apply_rate_limit_headers`, but keeps headers that already report
/// a tighter quota.
pub fn merge_rate_limit_headers(headers: &mut HeaderMap, info: &RateLimitInfo) {
    let existing = headers
        .get(&X_RATELIMIT_REMAINING)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u32>().ok());
    match existing {
        Some(remaining) if remaining <= info.remaining => {}
        _ => apply_rate_limit_headers(headers, info),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(limit: u32, remaining: u32) -> RateLimitInfo {
        RateLimitInfo {
            limit,
            remaining,
            reset_at: 1_700_000_000,
            retry_after_secs: None,
        }
    }

    #[test]
    fn test_merge_keeps_tightest() {
        let mut headers = HeaderMap::new();
        apply_rate_limit_headers(&mut headers, &info(50, 3));
        merge_rate_limit_headers(&mut headers, &info(1000, 900));
        assert_eq!(headers[&X_RATELIMIT_LIMIT], "50");
        assert_eq!(headers[&X_RATELIMIT_REMAINING], "3");

        merge_rate_limit_headers(&mut headers, &info(5, 1));
        assert_eq!(headers[&X_RATELIMIT_LIMIT], "5");
        assert_eq!(headers[&X_RATELIMIT_RESET], "1700000000");
        assert!(headers.get(axum::http::header::RETRY_AFTER).is_none());
    }
}

//! Response header parsing and status classification.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use pipeline::{QuotaResource, RateLimitMeta, TransportError};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;

const RESOURCE: &str = "x-ratelimit-resource";
const REMAINING: &str = "x-ratelimit-remaining";
const RESET: &str = "x-ratelimit-reset";
const RETRY_AFTER: &str = "retry-after";
const LINK: &str = "link";

fn header<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// Quota information carried by every API response.
pub fn rate_limit_meta(headers: &HeaderMap) -> RateLimitMeta {
    RateLimitMeta {
        resource: header(headers, RESOURCE).and_then(QuotaResource::from_header),
        remaining: header(headers, REMAINING).and_then(|v| v.parse().ok()),
        reset_at: header(headers, RESET)
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
    }
}

/// `Retry-After` in seconds. The HTTP-date form is not used by GitHub.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    header(headers, RETRY_AFTER)
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Whether the `Link` header advertises a further page.
pub fn has_next_page(headers: &HeaderMap) -> bool {
    header(headers, LINK).is_some_and(|link| {
        link.split(',')
            .any(|part| part.contains("rel=\"next\""))
    })
}

/// Maps a non-success response onto a transport error.
///
/// 403 counts as a rate limit only when the response says so: quota headers
/// at zero, a `Retry-After` (secondary limits), or a rate-limit message.
/// Anything else on 403 is a permission problem and is not retried.
pub fn classify(
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
    now: DateTime<Utc>,
) -> TransportError {
    let message = error_message(body);
    let code = status.as_u16();
    match code {
        401 => TransportError::Unauthorized { message },
        403 | 429 if code == 429 || looks_rate_limited(headers, &message) => {
            TransportError::RateLimited {
                resource: rate_limit_meta(headers).resource,
                reset_at: reset_time(headers, now),
                message,
            }
        }
        500..=599 => TransportError::Transient {
            message: format!("{status}: {message}"),
            retry_after: retry_after(headers),
        },
        _ => TransportError::Rejected {
            status: code,
            message,
        },
    }
}

fn looks_rate_limited(headers: &HeaderMap, message: &str) -> bool {
    rate_limit_meta(headers).remaining == Some(0)
        || retry_after(headers).is_some()
        || message.to_ascii_lowercase().contains("rate limit")
}

/// When a rate-limited credential becomes usable again.
fn reset_time(headers: &HeaderMap, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if let Some(wait) = retry_after(headers) {
        let wait = chrono::Duration::from_std(wait).ok()?;
        return Some(now + wait);
    }
    rate_limit_meta(headers).reset_at
}

/// The `message` field of a GitHub error body, or the raw body.
fn error_message(body: &str) -> String {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        message: String,
    }
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.message,
        Err(_) => body.chars().take(200).collect(),
    }
}

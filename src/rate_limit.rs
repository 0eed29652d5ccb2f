//! Throttling support.
//!
//! A throttled response (HTTP 429) means the server refused the request
//! without processing it, so it is always safe to send again. The server may
//! say how long to wait; [`ThrottleHint`] parses that from the headers and
//! [`ThrottleConfig`] bounds how much of it the client is willing to honor.

use http::HeaderMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Wait information carried by a throttled response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleHint {
    /// How long to wait before retrying (from `Retry-After`).
    pub retry_after: Option<Duration>,

    /// When the rate limit window resets (from `X-RateLimit-Reset`).
    pub reset_at: Option<SystemTime>,
}

impl ThrottleHint {
    /// Extracts throttling hints from response headers.
    ///
    /// Returns `None` when the response carries neither `Retry-After` nor a
    /// reset timestamp.
    ///
    /// # Examples
    ///
    /// ```
    /// use lineage::rate_limit::ThrottleHint;
    /// use http::HeaderMap;
    /// use std::time::Duration;
    ///
    /// let mut headers = HeaderMap::new();
    /// headers.insert("retry-after", "2".parse().unwrap());
    ///
    /// let hint = ThrottleHint::from_headers(&headers).unwrap();
    /// assert_eq!(hint.retry_after, Some(Duration::from_secs(2)));
    /// ```
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let hint = Self {
            retry_after: parse_retry_after(headers),
            reset_at: parse_rate_limit_reset(headers),
        };
        (hint.retry_after.is_some() || hint.reset_at.is_some()).then_some(hint)
    }

    /// Returns how long to wait, capped at `max_wait`.
    ///
    /// `Retry-After` wins over the reset timestamp. A reset time already in the
    /// past yields `None`.
    pub fn delay(&self, max_wait: Duration) -> Option<Duration> {
        if let Some(retry_after) = self.retry_after {
            return Some(retry_after.min(max_wait));
        }

        let until_reset = self.reset_at?.duration_since(SystemTime::now()).ok()?;
        Some(until_reset.min(max_wait))
    }
}

/// How the client treats throttling hints.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Upper bound on a single server-requested wait. Defaults to 5 minutes.
    pub max_wait: Duration,

    /// Whether server hints are honored at all. When `false` the regular
    /// backoff is used for throttled responses too.
    pub respect_hints: bool,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(300),
            respect_hints: true,
        }
    }
}

/// Parses `Retry-After` as delay-seconds or an HTTP date.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let header = headers.get("retry-after")?.to_str().ok()?.trim();

    if let Ok(seconds) = header.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let date_time = httpdate::parse_http_date(header).ok()?;
    Some(
        date_time
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO),
    )
}

/// Parses `X-RateLimit-Reset` or `RateLimit-Reset` as a Unix timestamp.
fn parse_rate_limit_reset(headers: &HeaderMap) -> Option<SystemTime> {
    ["x-ratelimit-reset", "ratelimit-reset"]
        .iter()
        .filter_map(|name| headers.get(*name)?.to_str().ok()?.trim().parse::<u64>().ok())
        .map(|timestamp| UNIX_EPOCH + Duration::from_secs(timestamp))
        .next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_parse_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("60"));

        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_parse_retry_after_date_in_past_is_zero() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "retry-after",
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );

        assert_eq!(parse_retry_after(&headers), Some(Duration::ZERO));
    }

    #[test]
    fn test_no_hint_without_headers() {
        assert!(ThrottleHint::from_headers(&HeaderMap::new()).is_none());
    }

    #[test]
    fn test_reset_timestamp_hint() {
        let mut headers = HeaderMap::new();
        let future = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 120;
        headers.insert(
            "x-ratelimit-reset",
            HeaderValue::from_str(&future.to_string()).unwrap(),
        );

        let hint = ThrottleHint::from_headers(&headers).unwrap();
        assert!(hint.retry_after.is_none());
        let delay = hint.delay(Duration::from_secs(600)).unwrap();
        assert!(delay > Duration::from_secs(100) && delay <= Duration::from_secs(120));
    }

    #[test]
    fn test_delay_capped_by_max_wait() {
        let hint = ThrottleHint {
            retry_after: Some(Duration::from_secs(600)),
            reset_at: None,
        };

        assert_eq!(
            hint.delay(Duration::from_secs(300)),
            Some(Duration::from_secs(300))
        );
    }
}

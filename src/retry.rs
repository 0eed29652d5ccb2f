//! Retry decisions for failed and throttled requests.
//!
//! The rules:
//!
//! - Idempotent requests (GET) that hit a transport failure or a 5xx are
//!   retried up to [`RetryPolicy::max_retries`] times.
//! - Throttled requests (429) are retried whatever their method, since the
//!   server never processed them. A server hint sets the delay when present.
//! - Mutating requests are never retried after a transport failure or a 5xx,
//!   because the first attempt may already have taken effect.
//! - A 401 stops immediately; retrying with a stale token is pointless.

use crate::rate_limit::{ThrottleConfig, ThrottleHint};
use crate::transport::{RawResponse, RequestDescriptor, TransportError};
use crate::Error;
use http::StatusCode;
use rand::Rng;
use std::time::{Duration, Instant};

/// Retries allowed after the first attempt unless configured otherwise.
pub const DEFAULT_MAX_RETRIES: usize = 4;

/// Delay between attempts unless configured otherwise.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// How long to wait before each retry.
///
/// # Examples
///
/// ```
/// use lineage::Backoff;
/// use std::time::Duration;
///
/// // 1s, 1s, 1s...
/// let fixed = Backoff::Fixed(Duration::from_secs(1));
///
/// // 100ms, 200ms, 400ms... capped at 5s
/// let exponential = Backoff::Exponential {
///     initial: Duration::from_millis(100),
///     max: Duration::from_secs(5),
///     jitter: false,
/// };
/// assert_eq!(exponential.delay_for_retry(3), Duration::from_millis(400));
/// ```
#[derive(Debug, Clone)]
pub enum Backoff {
    /// The same delay before every retry.
    Fixed(Duration),

    /// `initial * 2^(retry - 1)`, capped at `max`.
    ///
    /// With `jitter` the delay is scaled by a random factor in `[0.5, 1.0]`.
    Exponential {
        /// Delay before the first retry.
        initial: Duration,
        /// Upper bound on any delay.
        max: Duration,
        /// Whether to randomize delays.
        jitter: bool,
    },

    /// Delay computed from the retry number (1-indexed).
    Custom(fn(retry: usize) -> Duration),
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed(DEFAULT_RETRY_DELAY)
    }
}

impl Backoff {
    /// Returns the delay before the given retry (1 = first retry).
    pub fn delay_for_retry(&self, retry: usize) -> Duration {
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential {
                initial,
                max,
                jitter,
            } => {
                let exponent = u32::try_from(retry.saturating_sub(1)).unwrap_or(u32::MAX);
                let multiplier = 2u32.saturating_pow(exponent);
                let delay = initial.saturating_mul(multiplier).min(*max);

                if *jitter {
                    let factor = rand::thread_rng().gen_range(0.5..=1.0);
                    delay.mul_f64(factor)
                } else {
                    delay
                }
            }
            Backoff::Custom(delay_fn) => delay_fn(retry),
        }
    }
}

/// The class of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// No HTTP response was received.
    Transport,
    /// The server answered 5xx.
    Server,
    /// The server answered 429.
    Throttled,
    /// The server answered 401.
    Unauthorized,
    /// Any other non-2xx status.
    Rejected,
}

/// A failed attempt, kept whole so the caller can see it if it is final.
#[derive(Debug, Clone)]
pub enum Failure {
    /// The transport gave up.
    Transport(TransportError),
    /// The server answered with a non-2xx status.
    Response(RawResponse),
}

impl Failure {
    /// Classifies the failure.
    pub fn kind(&self) -> FailureKind {
        match self {
            Failure::Transport(_) => FailureKind::Transport,
            Failure::Response(raw) => classify_status(raw.status),
        }
    }

    /// Returns the server's throttling hint, if any.
    pub fn throttle_hint(&self) -> Option<ThrottleHint> {
        match self {
            Failure::Response(raw) => ThrottleHint::from_headers(&raw.headers),
            Failure::Transport(_) => None,
        }
    }

    /// Converts the final failure into the error reported to the caller.
    pub(crate) fn into_error(self, request: RequestDescriptor, attempts: usize) -> Error {
        let kind = self.kind();
        let raw = match self {
            Failure::Transport(source) => {
                return Error::Transport {
                    source,
                    request: Some(Box::new(request)),
                }
            }
            Failure::Response(raw) => raw,
        };

        match kind {
            FailureKind::Throttled => Error::ThrottledExhausted {
                attempts,
                status: raw.status,
                throttle_hint: ThrottleHint::from_headers(&raw.headers),
                raw_response: raw.body,
                headers: raw.headers,
                request: Box::new(request),
            },
            FailureKind::Unauthorized => Error::Auth {
                message: format!("request rejected with status {}", raw.status),
                status: Some(raw.status),
                raw_response: Some(raw.body),
                headers: Some(raw.headers),
                request: Some(Box::new(request)),
            },
            _ => Error::ServerError {
                status: raw.status,
                raw_response: raw.body,
                headers: raw.headers,
                request: Box::new(request),
            },
        }
    }
}

fn classify_status(status: StatusCode) -> FailureKind {
    match status {
        StatusCode::TOO_MANY_REQUESTS => FailureKind::Throttled,
        StatusCode::UNAUTHORIZED => FailureKind::Unauthorized,
        s if s.is_server_error() => FailureKind::Server,
        _ => FailureKind::Rejected,
    }
}

/// Progress of one logical call across its attempts.
#[derive(Debug, Clone)]
pub struct RetryState {
    attempts: usize,
    started: Instant,
    last_failure: Option<FailureKind>,
}

impl RetryState {
    /// Starts tracking a new logical call.
    pub fn new() -> Self {
        Self {
            attempts: 0,
            started: Instant::now(),
            last_failure: None,
        }
    }

    /// Marks the start of another attempt.
    pub fn begin_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Records how the current attempt failed.
    pub fn record_failure(&mut self, kind: FailureKind) {
        self.last_failure = Some(kind);
    }

    /// Attempts started so far.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Retries started so far.
    pub fn retries(&self) -> usize {
        self.attempts.saturating_sub(1)
    }

    /// Time since the first attempt began.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// The class of the most recent failure.
    pub fn last_failure(&self) -> Option<FailureKind> {
        self.last_failure
    }
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new()
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Send again after the delay.
    Retry(Duration),
    /// Surface the failure.
    Stop,
}

/// Decides whether a failed attempt is sent again, and when.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: usize,
    /// Delay between attempts when the server gives no hint.
    pub backoff: Backoff,
    /// Handling of throttling hints.
    pub throttle: ThrottleConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Backoff::default(),
            throttle: ThrottleConfig::default(),
        }
    }
}

impl RetryPolicy {
    /// Disables retries entirely.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Decides what to do with `failure`, the outcome of the attempt most
    /// recently started on `state`.
    pub fn decide(&self, failure: &Failure, idempotent: bool, state: &RetryState) -> RetryDecision {
        let retries = state.retries();
        if retries >= self.max_retries {
            return RetryDecision::Stop;
        }

        match failure.kind() {
            FailureKind::Throttled => {
                let hinted = if self.throttle.respect_hints {
                    failure
                        .throttle_hint()
                        .and_then(|hint| hint.delay(self.throttle.max_wait))
                } else {
                    None
                };
                RetryDecision::Retry(
                    hinted.unwrap_or_else(|| self.backoff.delay_for_retry(retries + 1)),
                )
            }
            FailureKind::Transport | FailureKind::Server if idempotent => {
                RetryDecision::Retry(self.backoff.delay_for_retry(retries + 1))
            }
            _ => RetryDecision::Stop,
        }
    }
}

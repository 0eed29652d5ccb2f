//! Response wrapper that keeps the transport detail next to the mapped data.
//!
//! The [`Response`] type carries the mapped body together with the status,
//! headers, raw text and originating request, so callers can inspect the
//! HTTP exchange even when the call succeeded.

use crate::mapper::MappedObject;
use crate::transport::RequestDescriptor;
use http::{HeaderMap, StatusCode};
use std::time::Duration;

/// A mapped response as returned by [`Client::execute`](crate::Client::execute).
pub type MappedResponse = Response<MappedObject>;

/// A successful HTTP response.
///
/// # Examples
///
/// ```no_run
/// use lineage::{Client, Kind};
///
/// # async fn example() -> Result<(), lineage::Error> {
/// let client = Client::builder().build()?;
/// let response = client.get("/platform/users/current", &Kind::USER_RESPONSE).await?;
///
/// println!("User: {:?}", response.get("user"));
/// println!("Status: {}", response.status);
/// println!("Attempts: {}", response.attempts);
/// println!("Sent to: {}", response.request.url());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Response<T> {
    /// The response data.
    pub data: T,

    /// The raw response body, exactly as received.
    pub raw_body: String,

    /// The HTTP status code of the response.
    pub status: StatusCode,

    /// The response headers.
    pub headers: HeaderMap,

    /// Time from the first attempt until this response arrived, retries
    /// included.
    pub latency: Duration,

    /// The number of attempts made, `1` if no retry was needed.
    pub attempts: usize,

    /// The request that produced this response, as last sent.
    pub request: RequestDescriptor,
}

impl<T> Response<T> {
    /// Creates a new `Response`.
    pub fn new(
        data: T,
        raw_body: String,
        status: StatusCode,
        headers: HeaderMap,
        latency: Duration,
        attempts: usize,
        request: RequestDescriptor,
    ) -> Self {
        Self {
            data,
            raw_body,
            status,
            headers,
            latency,
            attempts,
            request,
        }
    }

    /// Maps the response data while keeping the transport detail.
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            data: f(self.data),
            raw_body: self.raw_body,
            status: self.status,
            headers: self.headers,
            latency: self.latency,
            attempts: self.attempts,
            request: self.request,
        }
    }

    /// Returns `true` if the request required retries.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Returns a response header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// Returns every response header as `(name, value)` pairs.
    ///
    /// Values that are not valid text are skipped.
    pub fn all_headers(&self) -> Vec<(&str, &str)> {
        self.headers
            .iter()
            .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?)))
            .collect()
    }
}

impl<T> AsRef<T> for Response<T> {
    fn as_ref(&self) -> &T {
        &self.data
    }
}

impl<T> std::ops::Deref for Response<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

//! The HTTP boundary.
//!
//! [`Transport`] is the one capability the rest of the crate needs from the
//! network: send a [`RequestDescriptor`], get back a [`RawResponse`] or a
//! [`TransportError`]. Retry, authentication and mapping all live above it.
//! [`ReqwestTransport`] is the default implementation; tests and embedders can
//! supply their own.

use crate::{Error, Result};
use async_trait::async_trait;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use std::fmt;
use std::time::Duration;
use url::Url;

/// A fully resolved HTTP request.
///
/// Descriptors are immutable once built: the `with_*` methods consume the
/// descriptor and return a new one, and the fields are only readable.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<String>,
}

impl RequestDescriptor {
    /// Creates a descriptor with no headers and no body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Returns a descriptor with the header set, replacing any previous value.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Returns a descriptor with every header from `headers` set.
    pub fn with_headers(mut self, headers: &HeaderMap) -> Self {
        for (name, value) in headers {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }

    /// Returns a descriptor carrying `body`.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Returns a copy of this descriptor authorized with a bearer token.
    ///
    /// # Errors
    ///
    /// Returns an error if the token contains characters that are not valid in
    /// a header value.
    pub fn with_bearer(&self, token: &str) -> Result<Self> {
        let value = HeaderValue::try_from(format!("Bearer {token}")).map_err(|e| {
            Error::ConfigurationError(format!("Invalid access token for header: {e}"))
        })?;
        Ok(self.clone().with_header(header::AUTHORIZATION, value))
    }

    /// The HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The absolute target URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// The serialized body, if any.
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Whether the request can be repeated without additional side effects.
    ///
    /// Only these requests are retried after transient failures.
    pub fn is_idempotent(&self) -> bool {
        is_idempotent(&self.method)
    }
}

pub(crate) fn is_idempotent(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// An HTTP response as received, before any interpretation.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// The HTTP status code.
    pub status: StatusCode,
    /// The response headers.
    pub headers: HeaderMap,
    /// The response body as text.
    pub body: String,
}

impl RawResponse {
    /// Creates a response with no headers.
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Returns the response with a header added.
    ///
    /// Header names or values that are invalid are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Returns a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

/// The class of a connection-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The connection could not be established or was reset.
    Connect,
    /// The request did not complete in time.
    Timeout,
    /// Anything else below HTTP.
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportErrorKind::Connect => f.write_str("connection error"),
            TransportErrorKind::Timeout => f.write_str("timeout"),
            TransportErrorKind::Other => f.write_str("transport error"),
        }
    }
}

/// A request that never produced an HTTP response.
#[derive(thiserror::Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct TransportError {
    /// The class of failure.
    pub kind: TransportErrorKind,
    /// Description from the underlying implementation.
    pub message: String,
}

impl TransportError {
    /// Creates a transport error.
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else {
            TransportErrorKind::Other
        };
        Self::new(kind, err.to_string())
    }
}

/// Sends requests over the network.
///
/// Implementations must be purely mechanical: no retries, no auth handling.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use http::StatusCode;
/// use lineage::transport::{RawResponse, RequestDescriptor, Transport, TransportError};
///
/// struct AlwaysEmpty;
///
/// #[async_trait]
/// impl Transport for AlwaysEmpty {
///     async fn send(&self, _request: &RequestDescriptor) -> Result<RawResponse, TransportError> {
///         Ok(RawResponse::new(StatusCode::NO_CONTENT, ""))
///     }
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one request and waits for its response.
    async fn send(&self, request: &RequestDescriptor) -> std::result::Result<RawResponse, TransportError>;
}

/// [`Transport`] backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http_client: reqwest::Client,
    timeout: Option<Duration>,
}

impl ReqwestTransport {
    /// Creates a transport with no request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        let http_client = reqwest::Client::builder().build().map_err(|e| {
            Error::ConfigurationError(format!("Failed to build HTTP client: {}", e))
        })?;
        Ok(Self {
            http_client,
            timeout: None,
        })
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &RequestDescriptor) -> std::result::Result<RawResponse, TransportError> {
        let mut builder = self
            .http_client
            .request(request.method().clone(), request.url().clone())
            .headers(request.headers().clone());

        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        if let Some(body) = request.body() {
            builder = builder.body(body.to_owned());
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

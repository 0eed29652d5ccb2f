//! Per-request settings.

use crate::transport::is_idempotent;
use http::{HeaderMap, HeaderName, HeaderValue, Method};

/// What to call and how, before it is resolved against the client's base URL.
#[derive(Debug, Clone)]
pub struct RequestMetadata {
    /// The HTTP method (GET, POST, etc.).
    pub method: Method,

    /// Path relative to the base URL, or an absolute URL (as found in
    /// response links).
    pub path: String,

    /// Headers for this request, overriding the client defaults.
    pub headers: HeaderMap,

    /// Query parameters, in order.
    pub query_params: Vec<(String, String)>,

    /// Whether the call must carry an access token. Defaults to `true`.
    pub requires_auth: bool,
}

impl RequestMetadata {
    /// Creates metadata for an authenticated request.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            query_params: Vec::new(),
            requires_auth: true,
        }
    }

    /// Adds a header to the request.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn with_header(
        mut self,
        name: impl AsRef<str>,
        value: impl AsRef<str>,
    ) -> Result<Self, crate::Error> {
        let name = HeaderName::try_from(name.as_ref()).map_err(|e| {
            crate::Error::ConfigurationError(format!("Invalid header name: {}", e))
        })?;
        let value = HeaderValue::try_from(value.as_ref()).map_err(|e| {
            crate::Error::ConfigurationError(format!("Invalid header value: {}", e))
        })?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Adds a query parameter to the request.
    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.push((key.into(), value.into()));
        self
    }

    /// Lets the request go out without an access token.
    pub fn without_auth(mut self) -> Self {
        self.requires_auth = false;
        self
    }

    /// Whether the request may be retried after transient failures.
    pub fn is_idempotent(&self) -> bool {
        is_idempotent(&self.method)
    }
}

impl Default for RequestMetadata {
    fn default() -> Self {
        Self::new(Method::GET, "")
    }
}

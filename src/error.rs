//! Error types for FamilySearch API calls.
//!
//! Every failure that reaches the caller keeps whatever transport detail was
//! available when it happened: the status code, the response headers, the raw
//! body and the request that produced it.

use crate::rate_limit::ThrottleHint;
use crate::transport::{RequestDescriptor, TransportError};
use http::{HeaderMap, StatusCode};

/// The main error type for the client.
///
/// # Examples
///
/// ```no_run
/// use lineage::{Client, Error, Kind};
///
/// # async fn example() -> Result<(), Error> {
/// let client = Client::builder().build()?;
///
/// match client.get("/platform/tree/persons/KWQS-BBQ", &Kind::PERSON_RESPONSE).await {
///     Ok(response) => println!("person: {:?}", response.get("person")),
///     Err(Error::AuthRequired) => eprintln!("sign in first"),
///     Err(Error::ServerError { status, raw_response, .. }) => {
///         eprintln!("HTTP error {}: {}", status, raw_response);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The call needs an access token and none is held.
    ///
    /// No request was sent.
    #[error("Authentication required: no access token available")]
    AuthRequired,

    /// Authentication failed.
    ///
    /// Raised for rejected credentials during token acquisition and for any
    /// 401 answered by the API. In the latter case the token used for the
    /// request has already been invalidated.
    #[error("Authentication failed: {message}")]
    Auth {
        /// Human readable reason, taken from the server when it sent one
        message: String,
        /// The HTTP status code, if the failure came from a response
        status: Option<StatusCode>,
        /// The raw response body, if any
        raw_response: Option<String>,
        /// The response headers, if any (`WWW-Authenticate` lives here)
        headers: Option<HeaderMap>,
        /// The request that was rejected, if any
        request: Option<Box<RequestDescriptor>>,
    },

    /// The interactive sign-in flow was abandoned by the user.
    #[error("Authentication cancelled")]
    AuthCancelled,

    /// The request never produced an HTTP response.
    #[error("Transport failure: {source}")]
    Transport {
        /// What went wrong at the connection level
        source: TransportError,
        /// The request being sent, if one was built
        request: Option<Box<RequestDescriptor>>,
    },

    /// The server kept throttling the request until the retry ceiling was hit.
    #[error("Still throttled after {attempts} attempts (status {status})")]
    ThrottledExhausted {
        /// The number of attempts made
        attempts: usize,
        /// The HTTP status code of the last response
        status: StatusCode,
        /// The raw body of the last response
        raw_response: String,
        /// The headers of the last response
        headers: HeaderMap,
        /// The rate limit hint of the last response
        throttle_hint: Option<ThrottleHint>,
        /// The request that was throttled
        request: Box<RequestDescriptor>,
    },

    /// The server returned a non-2xx status that was not retried further.
    #[error("HTTP error {status}: {raw_response}")]
    ServerError {
        /// The HTTP status code
        status: StatusCode,
        /// The raw response body
        raw_response: String,
        /// The response headers
        headers: HeaderMap,
        /// The request that failed
        request: Box<RequestDescriptor>,
    },

    /// A successful response carried a body that is not valid JSON.
    #[error("Malformed response (status {status}): {serde_error}")]
    MalformedResponse {
        /// The raw response body that failed to parse
        raw_response: String,
        /// The serde error message
        serde_error: String,
        /// The HTTP status code
        status: StatusCode,
        /// The response headers
        headers: HeaderMap,
        /// The request that produced the body
        request: Box<RequestDescriptor>,
    },

    /// The change object has been deleted; no further operations are allowed.
    #[error("Object has been deleted")]
    ObjectDeleted,

    /// A change object invariant was violated before anything was sent.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Invalid configuration was provided.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Failed to serialize a request body.
    #[error("Failed to serialize request: {0}")]
    SerializationFailed(String),

    /// The token store could not be read or written.
    #[error("Token store error: {0}")]
    TokenStore(String),

    /// An invalid URL was provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl Error {
    /// Returns `true` for the failures the retry policy treats as transient.
    ///
    /// ```
    /// use lineage::Error;
    ///
    /// assert!(!Error::AuthRequired.is_retryable());
    /// assert!(!Error::Validation("missing name".into()).is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport { .. } | Error::ThrottledExhausted { .. } => true,
            Error::ServerError { status, .. } => status.is_server_error(),
            _ => false,
        }
    }

    /// Returns the HTTP status code if this error has one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Auth { status, .. } => *status,
            Error::ThrottledExhausted { status, .. }
            | Error::ServerError { status, .. }
            | Error::MalformedResponse { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the raw response body if this error has one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::Auth { raw_response, .. } => raw_response.as_deref(),
            Error::ThrottledExhausted { raw_response, .. }
            | Error::ServerError { raw_response, .. }
            | Error::MalformedResponse { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }

    /// Returns the response headers if this error has them.
    pub fn headers(&self) -> Option<&HeaderMap> {
        match self {
            Error::Auth { headers, .. } => headers.as_ref(),
            Error::ThrottledExhausted { headers, .. }
            | Error::ServerError { headers, .. }
            | Error::MalformedResponse { headers, .. } => Some(headers),
            _ => None,
        }
    }

    /// Returns a single response header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers()?.get(name)?.to_str().ok()
    }

    /// Returns the request that produced this error, if one was sent.
    pub fn request(&self) -> Option<&RequestDescriptor> {
        match self {
            Error::Auth { request, .. } | Error::Transport { request, .. } => request.as_deref(),
            Error::ThrottledExhausted { request, .. }
            | Error::ServerError { request, .. }
            | Error::MalformedResponse { request, .. } => Some(request),
            _ => None,
        }
    }

    /// Returns the throttling hint of the last response, if any.
    pub fn throttle_hint(&self) -> Option<&ThrottleHint> {
        match self {
            Error::ThrottledExhausted { throttle_hint, .. } => throttle_hint.as_ref(),
            _ => None,
        }
    }
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

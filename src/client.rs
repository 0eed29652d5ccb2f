//! The request executor.
//!
//! [`Client`] ties the pieces together: every call resolves the current
//! token, sends through the [`Transport`], lets the [`RetryPolicy`] decide
//! what to do with failures, and maps the final body with the
//! [`ResponseMapper`]. Use [`ClientBuilder`] to configure and create clients.

use crate::{
    environment::Environment,
    mapper::ResponseMapper,
    metadata::RequestMetadata,
    rate_limit::ThrottleConfig,
    registry::{ConvenienceRegistry, Kind},
    response::{MappedResponse, Response},
    retry::{Backoff, Failure, FailureKind, RetryDecision, RetryPolicy, RetryState},
    token::{AccessToken, AuthGrant, InteractiveFlow, TokenManager, TokenSettings, TokenSource},
    token_store::TokenStore,
    transport::{RequestDescriptor, ReqwestTransport, Transport},
    Error, Result,
};
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Media type of FamilySearch JSON payloads.
pub const FS_JSON: &str = "application/x-fs-v1+json";

/// One attempt of a call, as reported to an attempt observer.
#[derive(Debug, Clone)]
pub struct AttemptEvent {
    /// 1 for the first attempt.
    pub attempt: usize,
    /// The request method.
    pub method: Method,
    /// The request URL.
    pub url: Url,
    /// The response status, if a response arrived.
    pub status: Option<StatusCode>,
    /// How the attempt failed, if it did.
    pub failure: Option<FailureKind>,
    /// The delay before the next attempt, if one follows.
    pub retry_in: Option<Duration>,
}

/// Callback receiving every [`AttemptEvent`].
pub type AttemptObserver = Arc<dyn Fn(&AttemptEvent) + Send + Sync>;

/// A FamilySearch API client.
///
/// The client is cheap to clone and meant to be shared. It owns the access
/// token; accessors come from the registry it was built with (the global one
/// by default).
///
/// # Examples
///
/// ```no_run
/// use lineage::{AuthGrant, Client, Environment, Kind};
///
/// # async fn example() -> Result<(), lineage::Error> {
/// let client = Client::builder()
///     .environment(Environment::Sandbox)
///     .app_key("MY-APP-KEY")
///     .build()?;
///
/// client
///     .acquire_token(AuthGrant::Password {
///         username: "user".into(),
///         password: "pass".into(),
///     })
///     .await?;
///
/// let response = client.get("/platform/tree/persons/KWQS-BBQ", &Kind::PERSON_RESPONSE).await?;
/// if let Some(person) = response.get("person") {
///     let person = client.mapper().map_value(person, &Kind::PERSON);
///     println!("{:?}", person.get("display_name"));
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    base_url: Url,
    default_headers: HeaderMap,
    retry_policy: RetryPolicy,
    tokens: TokenManager,
    mapper: ResponseMapper,
    observer: Option<AttemptObserver>,
}

impl Client {
    /// Creates a new `ClientBuilder` for configuring a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The base URL relative paths are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// The token manager.
    pub fn tokens(&self) -> &TokenManager {
        &self.inner.tokens
    }

    /// The response mapper, for mapping embedded entities.
    pub fn mapper(&self) -> &ResponseMapper {
        &self.inner.mapper
    }

    /// The registry accessors are read from.
    pub fn registry(&self) -> &Arc<ConvenienceRegistry> {
        self.inner.mapper.registry()
    }

    /// The retry policy in force.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry_policy
    }

    /// Obtains an access token without user interaction.
    ///
    /// # Errors
    ///
    /// See [`TokenManager::acquire`].
    pub async fn acquire_token(&self, grant: AuthGrant) -> Result<AccessToken> {
        self.inner.tokens.acquire(grant).await
    }

    /// Obtains an access token through the browser.
    ///
    /// # Errors
    ///
    /// See [`TokenManager::acquire_interactive`].
    pub async fn acquire_token_interactive(&self, flow: &dyn InteractiveFlow) -> Result<AccessToken> {
        self.inner.tokens.acquire_interactive(flow).await
    }

    /// Loads a saved token from the token store, if one is configured.
    ///
    /// # Errors
    ///
    /// See [`TokenManager::restore`].
    pub async fn restore_token(&self) -> Result<Option<AccessToken>> {
        self.inner.tokens.restore().await
    }

    /// Drops the current token.
    pub async fn invalidate_token(&self) {
        self.inner.tokens.invalidate().await;
    }

    /// Resolves a path or absolute URL against the base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the result is not a valid URL.
    pub fn resolve_url(&self, path: &str) -> Result<Url> {
        match Url::parse(path) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => Ok(self.inner.base_url.join(path)?),
            Err(e) => Err(e.into()),
        }
    }

    /// Performs one logical call and maps the response as `kind`.
    ///
    /// Transient failures and throttling are retried according to the retry
    /// policy and never show up in the result except as latency and the
    /// `attempts` count.
    ///
    /// # Errors
    ///
    /// - [`Error::AuthRequired`] if the call needs a token and none is held
    ///   (nothing is sent)
    /// - [`Error::Auth`] if the API answers 401; the token is invalidated
    /// - [`Error::ThrottledExhausted`] if throttling outlasts the retries
    /// - [`Error::ServerError`] for any other final non-2xx
    /// - [`Error::Transport`] if the last attempt got no response
    /// - [`Error::MalformedResponse`] if the body is not JSON
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use lineage::{Client, Kind, metadata::RequestMetadata};
    /// use http::Method;
    ///
    /// # async fn example() -> Result<(), lineage::Error> {
    /// let client = Client::builder().build()?;
    ///
    /// let metadata = RequestMetadata::new(Method::GET, "/platform/tree/search")
    ///     .with_query_param("q", "givenName:Anastasia")
    ///     .with_header("Accept", "application/x-gedcomx-atom+json")?;
    ///
    /// let response = client.execute(metadata, None, &Kind::new("search-results")).await?;
    /// println!("{}", response.payload());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn execute(
        &self,
        metadata: RequestMetadata,
        body: Option<Value>,
        kind: &Kind,
    ) -> Result<MappedResponse> {
        let descriptor = self.describe(&metadata, body.as_ref())?;
        let idempotent = descriptor.is_idempotent();
        self.inner.tokens.restore_once().await;
        let mut state = RetryState::new();

        loop {
            state.begin_attempt();
            let attempt = state.attempts();

            let token = self.inner.tokens.current_token();
            let request = match &token {
                Some(token) => descriptor.with_bearer(token.value())?,
                None if metadata.requires_auth => {
                    tracing::warn!(
                        method = %descriptor.method(),
                        url = %descriptor.url(),
                        "No access token; request not sent"
                    );
                    return Err(Error::AuthRequired);
                }
                None => descriptor.clone(),
            };

            tracing::debug!(
                method = %request.method(),
                url = %request.url(),
                attempt = attempt,
                "Executing HTTP request"
            );

            let failure = match self.inner.transport.send(&request).await {
                Ok(raw) if raw.status.is_success() => {
                    let latency = state.elapsed();
                    tracing::info!(
                        status = raw.status.as_u16(),
                        latency_ms = latency.as_millis(),
                        attempts = attempt,
                        "Received HTTP response"
                    );
                    self.notify(&request, attempt, Some(raw.status), None, None);

                    let object = self.inner.mapper.map(&raw, kind, &request)?;
                    return Ok(Response::new(
                        object,
                        raw.body,
                        raw.status,
                        raw.headers,
                        latency,
                        attempt,
                        request,
                    ));
                }
                Ok(raw) => Failure::Response(raw),
                Err(e) => Failure::Transport(e),
            };

            let kind_of_failure = failure.kind();
            let status = match &failure {
                Failure::Response(raw) => Some(raw.status),
                Failure::Transport(_) => None,
            };
            state.record_failure(kind_of_failure);

            match &failure {
                Failure::Response(raw) if raw.status.is_client_error() => tracing::warn!(
                    status = raw.status.as_u16(),
                    attempt = attempt,
                    method = %request.method(),
                    url = %request.url(),
                    response = %raw.body,
                    "Request rejected"
                ),
                Failure::Response(raw) => tracing::warn!(
                    status = raw.status.as_u16(),
                    attempt = attempt,
                    method = %request.method(),
                    url = %request.url(),
                    "Server error"
                ),
                Failure::Transport(e) => tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    method = %request.method(),
                    url = %request.url(),
                    "Request failed"
                ),
            }

            if kind_of_failure == FailureKind::Unauthorized {
                if let Some(token) = &token {
                    self.inner.tokens.invalidate_if_current(token.value()).await;
                }
                self.notify(&request, attempt, status, Some(kind_of_failure), None);
                return Err(failure.into_error(request, attempt));
            }

            match self.inner.retry_policy.decide(&failure, idempotent, &state) {
                RetryDecision::Retry(delay) => {
                    tracing::info!(
                        delay_ms = delay.as_millis(),
                        attempt = attempt,
                        failure = ?kind_of_failure,
                        "Retrying request after delay"
                    );
                    self.notify(&request, attempt, status, Some(kind_of_failure), Some(delay));
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::Stop => {
                    self.notify(&request, attempt, status, Some(kind_of_failure), None);
                    return Err(failure.into_error(request, attempt));
                }
            }
        }
    }

    /// GETs `path` and maps the response as `kind`.
    ///
    /// # Errors
    ///
    /// See [`Client::execute`].
    pub async fn get(&self, path: impl Into<String>, kind: &Kind) -> Result<MappedResponse> {
        self.execute(RequestMetadata::new(Method::GET, path), None, kind)
            .await
    }

    /// POSTs `body` as JSON to `path`.
    ///
    /// # Errors
    ///
    /// See [`Client::execute`]; also fails if `body` cannot be serialized.
    pub async fn post<B>(&self, path: impl Into<String>, body: &B, kind: &Kind) -> Result<MappedResponse>
    where
        B: Serialize + ?Sized,
    {
        let body = to_json(body)?;
        self.execute(RequestMetadata::new(Method::POST, path), Some(body), kind)
            .await
    }

    /// PUTs `body` as JSON to `path`.
    ///
    /// # Errors
    ///
    /// See [`Client::post`].
    pub async fn put<B>(&self, path: impl Into<String>, body: &B, kind: &Kind) -> Result<MappedResponse>
    where
        B: Serialize + ?Sized,
    {
        let body = to_json(body)?;
        self.execute(RequestMetadata::new(Method::PUT, path), Some(body), kind)
            .await
    }

    /// DELETEs `path`.
    ///
    /// # Errors
    ///
    /// See [`Client::execute`].
    pub async fn delete(&self, path: impl Into<String>) -> Result<MappedResponse> {
        self.execute(RequestMetadata::new(Method::DELETE, path), None, &Kind::EMPTY)
            .await
    }

    /// Builds the request shared by every attempt of a call.
    fn describe(&self, metadata: &RequestMetadata, body: Option<&Value>) -> Result<RequestDescriptor> {
        let mut url = self.resolve_url(&metadata.path)?;
        if !metadata.query_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &metadata.query_params {
                pairs.append_pair(key, value);
            }
        }

        let mut descriptor = RequestDescriptor::new(metadata.method.clone(), url)
            .with_headers(&self.inner.default_headers);

        if let Some(body) = body {
            let json = serde_json::to_string(body)
                .map_err(|e| Error::SerializationFailed(e.to_string()))?;
            descriptor = descriptor
                .with_header(CONTENT_TYPE, HeaderValue::from_static(FS_JSON))
                .with_body(json);
        }

        Ok(descriptor.with_headers(&metadata.headers))
    }

    fn notify(
        &self,
        request: &RequestDescriptor,
        attempt: usize,
        status: Option<StatusCode>,
        failure: Option<FailureKind>,
        retry_in: Option<Duration>,
    ) {
        if let Some(observer) = &self.inner.observer {
            observer(&AttemptEvent {
                attempt,
                method: request.method().clone(),
                url: request.url().clone(),
                status,
                failure,
                retry_in,
            });
        }
    }
}

fn to_json<B: Serialize + ?Sized>(body: &B) -> Result<Value> {
    serde_json::to_value(body).map_err(|e| Error::SerializationFailed(e.to_string()))
}

/// Builder for configuring and creating a [`Client`].
///
/// # Examples
///
/// ```no_run
/// use lineage::{ClientBuilder, Environment};
/// use std::time::Duration;
///
/// # fn example() -> Result<(), lineage::Error> {
/// let client = ClientBuilder::new()
///     .environment(Environment::Beta)
///     .app_key("MY-APP-KEY")
///     .auth_callback("http://localhost:8080/auth")?
///     .timeout(Duration::from_secs(30))
///     .max_retries(3)
///     .retry_delay(Duration::from_millis(500))
///     .default_header("User-Agent", "my-app/1.0")?
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    environment: Environment,
    base_url: Option<Url>,
    identity_url: Option<Url>,
    app_key: Option<String>,
    auth_callback: Option<Url>,
    default_headers: HeaderMap,
    transport: Option<Arc<dyn Transport>>,
    timeout: Option<Duration>,
    retry_policy: RetryPolicy,
    token_store: Option<Arc<dyn TokenStore>>,
    access_token: Option<String>,
    token_lifetime: Option<Duration>,
    registry: Option<Arc<ConvenienceRegistry>>,
    observer: Option<AttemptObserver>,
}

impl ClientBuilder {
    /// Creates a new `ClientBuilder` with default settings.
    pub fn new() -> Self {
        Self {
            environment: Environment::default(),
            base_url: None,
            identity_url: None,
            app_key: None,
            auth_callback: None,
            default_headers: HeaderMap::new(),
            transport: None,
            timeout: None,
            retry_policy: RetryPolicy::default(),
            token_store: None,
            access_token: None,
            token_lifetime: None,
            registry: None,
            observer: None,
        }
    }

    /// Selects the deployment. Its hosts are used unless overridden.
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Overrides the base URL for API requests.
    ///
    /// Identity requests go to the same host unless
    /// [`identity_url`](Self::identity_url) is also set.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.base_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Overrides the base URL of the identity service (token and
    /// authorization endpoints).
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn identity_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.identity_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Sets the application key used as OAuth2 client id.
    pub fn app_key(mut self, app_key: impl Into<String>) -> Self {
        self.app_key = Some(app_key.into());
        self
    }

    /// Sets the redirect URI registered for interactive sign-in.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn auth_callback(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.auth_callback = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Adds a default header that will be included in all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Replaces the HTTP transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the request timeout of the default transport.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets how many retries follow the first attempt.
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.retry_policy.max_retries = max_retries;
        self
    }

    /// Uses a fixed delay between attempts.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_policy.backoff = Backoff::Fixed(delay);
        self
    }

    /// Sets the backoff between attempts.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.retry_policy.backoff = backoff;
        self
    }

    /// Sets how throttling hints are honored.
    pub fn throttle_config(mut self, config: ThrottleConfig) -> Self {
        self.retry_policy.throttle = config;
        self
    }

    /// Replaces the whole retry policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Keeps access tokens in `store`.
    ///
    /// A stored token is loaded on the first call that needs one. Use
    /// [`Client::restore_token`] to load it earlier.
    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    /// Starts the client with an existing access token.
    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Expiry applied to acquired tokens that come without one.
    pub fn token_lifetime(mut self, lifetime: Duration) -> Self {
        self.token_lifetime = Some(lifetime);
        self
    }

    /// Uses `registry` instead of the global one.
    pub fn registry(mut self, registry: Arc<ConvenienceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Reports every attempt to `observer`.
    pub fn on_attempt<F>(mut self, observer: F) -> Self
    where
        F: Fn(&AttemptEvent) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Builds the configured `Client`.
    ///
    /// # Errors
    ///
    /// Returns an error if the default transport cannot be created.
    pub fn build(self) -> Result<Client> {
        let identity_url = match (self.identity_url, &self.base_url) {
            (Some(url), _) => url,
            (None, Some(base_url)) => base_url.clone(),
            (None, None) => Url::parse(self.environment.identity_url())?,
        };
        let base_url = match self.base_url {
            Some(url) => url,
            None => Url::parse(self.environment.base_url())?,
        };

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => {
                if self.timeout.is_some() {
                    tracing::warn!("Timeout ignored: a custom transport was supplied");
                }
                transport
            }
            None => {
                let mut transport = ReqwestTransport::new()?;
                if let Some(timeout) = self.timeout {
                    transport = transport.with_timeout(timeout);
                }
                Arc::new(transport)
            }
        };

        let mut default_headers = self.default_headers;
        if !default_headers.contains_key(ACCEPT) {
            default_headers.insert(ACCEPT, HeaderValue::from_static(FS_JSON));
        }

        let initial = self
            .access_token
            .map(|value| AccessToken::new(value, None, TokenSource::Provided));
        let tokens = TokenManager::new(
            TokenSettings {
                identity_url,
                app_key: self.app_key,
                auth_callback: self.auth_callback,
                token_lifetime: self.token_lifetime,
            },
            Arc::clone(&transport),
            self.token_store,
            initial,
        );

        let registry = self.registry.unwrap_or_else(ConvenienceRegistry::global);

        tracing::debug!(base_url = %base_url, max_retries = self.retry_policy.max_retries, "Client built");

        Ok(Client {
            inner: Arc::new(ClientInner {
                transport,
                base_url,
                default_headers,
                retry_policy: self.retry_policy,
                tokens,
                mapper: ResponseMapper::new(registry),
                observer: self.observer,
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::TOKEN_PATH;
    use crate::transport::{RawResponse, TransportError};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<RequestDescriptor>>,
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn send(&self, request: &RequestDescriptor) -> std::result::Result<RawResponse, TransportError> {
            self.sent.lock().push(request.clone());
            Ok(RawResponse::new(StatusCode::OK, r#"{"ok":true}"#))
        }
    }

    fn client(recorder: &Arc<Recorder>) -> ClientBuilder {
        Client::builder()
            .base_url("https://api.example.org/")
            .unwrap()
            .transport(Arc::clone(recorder) as Arc<dyn Transport>)
    }

    #[test]
    fn test_builder_defaults() {
        let client = Client::builder().build().unwrap();
        assert_eq!(client.base_url().as_str(), "https://sandbox.familysearch.org/");
        assert_eq!(client.retry_policy().max_retries, 4);
        assert!(matches!(client.retry_policy().backoff, Backoff::Fixed(d) if d == Duration::from_secs(1)));
        assert!(!client.tokens().is_authenticated());
    }

    #[test]
    fn test_resolve_url() {
        let client = Client::builder().environment(Environment::Beta).build().unwrap();
        assert_eq!(
            client.resolve_url("/platform/tree/persons/P1").unwrap().as_str(),
            "https://beta.familysearch.org/platform/tree/persons/P1"
        );
        assert_eq!(
            client.resolve_url("https://other.example.org/x").unwrap().as_str(),
            "https://other.example.org/x"
        );
    }

    #[test]
    fn test_identity_host_follows_environment() {
        let client = Client::builder()
            .environment(Environment::Production)
            .app_key("APPKEY")
            .auth_callback("http://localhost/auth")
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(client.base_url().host_str(), Some("familysearch.org"));
        let url = client.tokens().authorization_url().unwrap();
        assert_eq!(url.host_str(), Some("ident.familysearch.org"));
    }

    #[tokio::test]
    async fn test_identity_url_override() {
        let recorder = Arc::new(Recorder::default());
        let client = client(&recorder)
            .identity_url("https://login.example.org")
            .unwrap()
            .app_key("APPKEY")
            .build()
            .unwrap();

        // The recorded reply is not a token, so the grant fails after sending.
        let _ = client
            .acquire_token(AuthGrant::Password {
                username: "alice".into(),
                password: "secret".into(),
            })
            .await;

        let sent = recorder.sent.lock();
        assert_eq!(sent[0].url().host_str(), Some("login.example.org"));
        assert_eq!(sent[0].url().path(), TOKEN_PATH);
    }

    #[test]
    fn test_base_url_override_serves_identity() {
        let recorder = Arc::new(Recorder::default());
        let client = client(&recorder)
            .app_key("APPKEY")
            .auth_callback("http://localhost/auth")
            .unwrap()
            .build()
            .unwrap();

        let url = client.tokens().authorization_url().unwrap();
        assert_eq!(url.host_str(), Some("api.example.org"));
    }

    #[test]
    fn test_invalid_default_header() {
        assert!(Client::builder().default_header("bad header", "x").is_err());
    }

    #[tokio::test]
    async fn test_headers_on_the_wire() {
        let recorder = Arc::new(Recorder::default());
        let client = client(&recorder)
            .access_token("abc")
            .default_header("User-Agent", "lineage-tests")
            .unwrap()
            .build()
            .unwrap();

        client
            .put("/notes/N1", &serde_json::json!({"subject": "x"}), &Kind::new("note"))
            .await
            .unwrap();

        let sent = recorder.sent.lock();
        let request = &sent[0];
        assert_eq!(request.header("authorization"), Some("Bearer abc"));
        assert_eq!(request.header("accept"), Some(FS_JSON));
        assert_eq!(request.header("content-type"), Some(FS_JSON));
        assert_eq!(request.header("user-agent"), Some("lineage-tests"));
        assert_eq!(request.body(), Some(r#"{"subject":"x"}"#));
    }

    #[tokio::test]
    async fn test_unauthenticated_calls() {
        let recorder = Arc::new(Recorder::default());
        let client = client(&recorder).build().unwrap();

        let err = client.get("/platform/users/current", &Kind::USER_RESPONSE).await.unwrap_err();
        assert!(matches!(err, Error::AuthRequired));
        assert!(recorder.sent.lock().is_empty());

        let metadata = RequestMetadata::new(Method::GET, "/platform/collections").without_auth();
        let response = client.execute(metadata, None, &Kind::GEDCOMX).await.unwrap();
        assert_eq!(response.field("ok"), Some(&Value::Bool(true)));
        assert_eq!(recorder.sent.lock()[0].header("authorization"), None);
    }
}

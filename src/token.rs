//! Access token lifecycle.
//!
//! The [`TokenManager`] holds at most one [`AccessToken`] per client. It
//! acquires tokens through the FamilySearch OAuth2 endpoints, drops them when
//! they expire or the API rejects them, and mirrors them into an optional
//! [`TokenStore`] so a later process can pick them up again.

use crate::environment::{AUTHORIZATION_PATH, TOKEN_PATH};
use crate::token_store::TokenStore;
use crate::transport::{RequestDescriptor, Transport};
use crate::{Error, Result};
use async_trait::async_trait;
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderValue, Method};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use url::Url;

/// How a token came to be held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSource {
    /// Browser sign-in through the authorization page.
    Interactive,
    /// Username and password exchange.
    Credentials,
    /// Handed to the client directly.
    Provided,
    /// Loaded from a token store.
    Restored,
}

/// An OAuth2 access token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    value: String,
    expires_at: Option<SystemTime>,
    source: TokenSource,
}

impl AccessToken {
    /// Creates a token. `expires_at = None` means the token never expires on
    /// the client side.
    pub fn new(value: impl Into<String>, expires_at: Option<SystemTime>, source: TokenSource) -> Self {
        Self {
            value: value.into(),
            expires_at,
            source,
        }
    }

    /// The opaque token value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// When the token stops being usable, if known.
    pub fn expires_at(&self) -> Option<SystemTime> {
        self.expires_at
    }

    /// How the token was obtained.
    pub fn source(&self) -> TokenSource {
        self.source
    }

    /// Whether the token is past its expiry.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= SystemTime::now())
    }

    fn restored(mut self) -> Self {
        self.source = TokenSource::Restored;
        self
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("source", &self.source)
            .finish()
    }
}

/// Ways to obtain a token without user interaction.
#[derive(Clone)]
pub enum AuthGrant {
    /// OAuth2 password grant.
    Password {
        /// FamilySearch username
        username: String,
        /// FamilySearch password
        password: String,
    },
    /// An authorization code received on the callback URI.
    AuthorizationCode(String),
    /// A token the caller already holds.
    Provided(String),
}

impl fmt::Debug for AuthGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthGrant::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .finish_non_exhaustive(),
            AuthGrant::AuthorizationCode(_) => f.write_str("AuthorizationCode(..)"),
            AuthGrant::Provided(_) => f.write_str("Provided(..)"),
        }
    }
}

/// The browser half of interactive sign-in.
///
/// The implementation sends the user to `authorization_url` and returns the
/// callback URL the browser was redirected to, or `None` if the user gave up.
#[async_trait]
pub trait InteractiveFlow: Send + Sync {
    /// Runs the sign-in page and returns the redirect it ended on.
    async fn authorize(&self, authorization_url: &Url) -> Option<Url>;
}

/// What a callback URL carried back from the authorization page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackResult {
    /// An authorization code to exchange for a token.
    Code(String),
    /// A token delivered directly in the fragment.
    Token {
        /// The token value
        value: String,
        /// Lifetime in seconds, if sent
        expires_in: Option<u64>,
    },
    /// The authorization server refused or the user declined.
    Denied {
        /// OAuth2 error code, e.g. `access_denied`
        error: String,
        /// Optional description
        description: Option<String>,
    },
    /// Nothing recognizable.
    Empty,
}

impl CallbackResult {
    /// Reads the result of the authorization page from a callback URL.
    ///
    /// # Examples
    ///
    /// ```
    /// use lineage::token::CallbackResult;
    /// use url::Url;
    ///
    /// let url = Url::parse("http://localhost/auth?code=abc").unwrap();
    /// assert_eq!(CallbackResult::from_redirect(&url), CallbackResult::Code("abc".into()));
    /// ```
    pub fn from_redirect(url: &Url) -> Self {
        let mut error = None;
        let mut description = None;

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => return CallbackResult::Code(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                "error_description" => description = Some(value.into_owned()),
                _ => {}
            }
        }

        if let Some(fragment) = url.fragment() {
            let mut token = None;
            let mut expires_in = None;
            for (key, value) in url::form_urlencoded::parse(fragment.as_bytes()) {
                match key.as_ref() {
                    "access_token" => token = Some(value.into_owned()),
                    "expires_in" => expires_in = value.parse().ok(),
                    "error" => error = Some(value.into_owned()),
                    "error_description" => description = Some(value.into_owned()),
                    _ => {}
                }
            }
            if let Some(value) = token {
                return CallbackResult::Token { value, expires_in };
            }
        }

        match error {
            Some(error) => CallbackResult::Denied { error, description },
            None => CallbackResult::Empty,
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct OAuthErrorBody {
    error: Option<String>,
    error_description: Option<String>,
}

/// Settings the token manager needs from the client configuration.
#[derive(Debug, Clone)]
pub(crate) struct TokenSettings {
    pub identity_url: Url,
    pub app_key: Option<String>,
    pub auth_callback: Option<Url>,
    pub token_lifetime: Option<Duration>,
}

/// Owns the client's access token.
///
/// Reads are cheap and never block on the network. A token observed as
/// expired is cleared on the spot.
pub struct TokenManager {
    current: RwLock<Option<AccessToken>>,
    store: Option<Arc<dyn TokenStore>>,
    restore_attempt: tokio::sync::OnceCell<()>,
    transport: Arc<dyn Transport>,
    settings: TokenSettings,
}

impl TokenManager {
    pub(crate) fn new(
        settings: TokenSettings,
        transport: Arc<dyn Transport>,
        store: Option<Arc<dyn TokenStore>>,
        initial: Option<AccessToken>,
    ) -> Self {
        Self {
            current: RwLock::new(initial),
            store,
            restore_attempt: tokio::sync::OnceCell::new(),
            transport,
            settings,
        }
    }

    /// Returns the current token, or `None` if there is none or it expired.
    pub fn current_token(&self) -> Option<AccessToken> {
        let token = self.current.read().clone()?;
        if !token.is_expired() {
            return Some(token);
        }

        let mut slot = self.current.write();
        if slot.as_ref().is_some_and(|held| held.value() == token.value()) {
            slot.take();
            tracing::info!(source = ?token.source(), "Access token expired; cleared");
        }
        None
    }

    /// Whether a usable token is held.
    pub fn is_authenticated(&self) -> bool {
        self.current_token().is_some()
    }

    /// Obtains a token with `grant` and makes it current.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] if the identity service rejects the grant,
    /// [`Error::Transport`] if it cannot be reached, and
    /// [`Error::ConfigurationError`] if no app key is configured.
    pub async fn acquire(&self, grant: AuthGrant) -> Result<AccessToken> {
        let token = match grant {
            AuthGrant::Provided(value) => AccessToken::new(value, None, TokenSource::Provided),
            AuthGrant::Password { username, password } => {
                let app_key = self.app_key()?;
                self.request_token(
                    &[
                        ("grant_type", "password"),
                        ("username", username.as_str()),
                        ("password", password.as_str()),
                        ("client_id", app_key),
                    ],
                    TokenSource::Credentials,
                )
                .await?
            }
            AuthGrant::AuthorizationCode(code) => self.exchange_code(&code, TokenSource::Credentials).await?,
        };

        self.install(token.clone()).await;
        Ok(token)
    }

    /// Runs interactive sign-in through `flow` and makes the result current.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AuthCancelled`] if the user abandons the page or
    /// declines, [`Error::Auth`] if the authorization server reports another
    /// error, and [`Error::ConfigurationError`] if the app key or callback
    /// URI is missing.
    pub async fn acquire_interactive(&self, flow: &dyn InteractiveFlow) -> Result<AccessToken> {
        let authorization_url = self.authorization_url()?;
        tracing::debug!(url = %authorization_url, "Starting interactive sign-in");

        let Some(redirect) = flow.authorize(&authorization_url).await else {
            tracing::info!("Interactive sign-in abandoned");
            return Err(Error::AuthCancelled);
        };

        let token = match CallbackResult::from_redirect(&redirect) {
            CallbackResult::Code(code) => self.exchange_code(&code, TokenSource::Interactive).await?,
            CallbackResult::Token { value, expires_in } => {
                AccessToken::new(value, self.expiry(expires_in), TokenSource::Interactive)
            }
            CallbackResult::Denied { error, .. } if error == "access_denied" => {
                tracing::info!("Interactive sign-in declined");
                return Err(Error::AuthCancelled);
            }
            CallbackResult::Denied { error, description } => {
                return Err(Error::Auth {
                    message: description.unwrap_or(error),
                    status: None,
                    raw_response: None,
                    headers: None,
                    request: None,
                })
            }
            CallbackResult::Empty => {
                return Err(Error::Auth {
                    message: "callback carried neither a code nor a token".to_string(),
                    status: None,
                    raw_response: None,
                    headers: None,
                    request: None,
                })
            }
        };

        self.install(token.clone()).await;
        Ok(token)
    }

    /// The authorization page URL for interactive sign-in.
    ///
    /// # Errors
    ///
    /// Returns an error if the app key or callback URI is not configured.
    pub fn authorization_url(&self) -> Result<Url> {
        let app_key = self.app_key()?;
        let callback = self.settings.auth_callback.as_ref().ok_or_else(|| {
            Error::ConfigurationError("auth_callback is required for interactive sign-in".to_string())
        })?;

        let mut url = self.settings.identity_url.join(AUTHORIZATION_PATH)?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", app_key)
            .append_pair("redirect_uri", callback.as_str());
        Ok(url)
    }

    /// Clears the token and its persisted copy. Calling it with no token held
    /// is a no-op.
    pub async fn invalidate(&self) {
        let previous = self.current.write().take();
        if previous.is_some() {
            tracing::info!("Access token invalidated");
        }
        self.clear_store().await;
    }

    /// Clears the token only if it still has `value`.
    ///
    /// Used when the API rejects a request: if another task has already
    /// installed a fresh token, that one stays. Returns whether a token was
    /// cleared.
    pub async fn invalidate_if_current(&self, value: &str) -> bool {
        let cleared = {
            let mut slot = self.current.write();
            if slot.as_ref().is_some_and(|held| held.value() == value) {
                slot.take();
                true
            } else {
                false
            }
        };

        if cleared {
            tracing::info!("Access token rejected by the API; cleared");
            self.clear_store().await;
        }
        cleared
    }

    /// Loads a previously saved token from the store and makes it current.
    ///
    /// A stored token past its expiry is discarded and `None` returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TokenStore`] if the store cannot be read.
    pub async fn restore(&self) -> Result<Option<AccessToken>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };

        let Some(token) = store.load().await? else {
            tracing::debug!("No stored access token");
            return Ok(None);
        };

        if token.is_expired() {
            tracing::info!("Stored access token has expired; discarding");
            store.clear().await?;
            return Ok(None);
        }

        let token = token.restored();
        *self.current.write() = Some(token.clone());
        tracing::info!("Restored access token from store");
        Ok(Some(token))
    }

    /// Loads the stored token the first time a call needs one, unless a
    /// token is already held. Later calls do nothing.
    pub(crate) async fn restore_once(&self) {
        if self.store.is_none() {
            return;
        }
        self.restore_attempt
            .get_or_init(|| async {
                if self.current.read().is_some() {
                    return;
                }
                if let Err(e) = self.restore().await {
                    tracing::warn!(error = %e, "Failed to restore access token");
                }
            })
            .await;
    }

    async fn install(&self, token: AccessToken) {
        tracing::info!(source = ?token.source(), expires = token.expires_at().is_some(), "Access token acquired");
        *self.current.write() = Some(token.clone());

        if let Some(store) = &self.store {
            if let Err(e) = store.save(&token).await {
                tracing::warn!(error = %e, "Failed to persist access token");
            }
        }
    }

    async fn clear_store(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.clear().await {
                tracing::warn!(error = %e, "Failed to clear persisted access token");
            }
        }
    }

    async fn exchange_code(&self, code: &str, source: TokenSource) -> Result<AccessToken> {
        let app_key = self.app_key()?;
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", app_key),
        ];
        let callback = self.settings.auth_callback.as_ref().map(Url::as_str);
        if let Some(callback) = callback {
            params.push(("redirect_uri", callback));
        }
        self.request_token(&params, source).await
    }

    async fn request_token(&self, params: &[(&str, &str)], source: TokenSource) -> Result<AccessToken> {
        let url = self.settings.identity_url.join(TOKEN_PATH)?;
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();
        let request = RequestDescriptor::new(Method::POST, url)
            .with_header(
                CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            )
            .with_header(ACCEPT, HeaderValue::from_static("application/json"))
            .with_body(body);

        tracing::debug!(url = %request.url(), "Requesting access token");

        // The body carries credentials, so the request is not attached to errors.
        let raw = self
            .transport
            .send(&request)
            .await
            .map_err(|source| Error::Transport {
                source,
                request: None,
            })?;

        if !raw.status.is_success() {
            let message = serde_json::from_str::<OAuthErrorBody>(&raw.body)
                .ok()
                .and_then(|body| body.error_description.or(body.error))
                .unwrap_or_else(|| format!("token request rejected with status {}", raw.status));
            tracing::warn!(status = raw.status.as_u16(), message = %message, "Token request rejected");
            return Err(Error::Auth {
                message,
                status: Some(raw.status),
                raw_response: Some(raw.body),
                headers: Some(raw.headers),
                request: None,
            });
        }

        let granted: TokenResponse = serde_json::from_str(&raw.body).map_err(|e| Error::Auth {
            message: format!("unreadable token response: {e}"),
            status: Some(raw.status),
            raw_response: Some(raw.body.clone()),
            headers: Some(raw.headers.clone()),
            request: None,
        })?;

        Ok(AccessToken::new(
            granted.access_token,
            self.expiry(granted.expires_in),
            source,
        ))
    }

    fn expiry(&self, expires_in: Option<u64>) -> Option<SystemTime> {
        expires_in
            .map(Duration::from_secs)
            .or(self.settings.token_lifetime)
            .and_then(|lifetime| SystemTime::now().checked_add(lifetime))
    }

    fn app_key(&self) -> Result<&str> {
        self.settings.app_key.as_deref().ok_or_else(|| {
            Error::ConfigurationError("app_key is required for authentication".to_string())
        })
    }
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("current", &*self.current.read())
            .field("has_store", &self.store.is_some())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

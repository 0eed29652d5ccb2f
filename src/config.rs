//! Declarative client configuration.
//!
//! [`Config`] holds the options that can be written down (in a JSON file, an
//! environment-provided blob, ...). Anything that is code, like a custom
//! transport or an accessor registry, goes on the [`ClientBuilder`] after
//! [`Config::into_builder`].

use crate::environment::Environment;
use crate::token_store::FileTokenStore;
use crate::{ClientBuilder, Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Client options.
///
/// # Examples
///
/// ```
/// use lineage::{Config, Environment};
///
/// let config = Config::from_json(r#"{
///     "app_key": "ABCD-1234",
///     "environment": "production",
///     "auth_callback": "http://localhost:8080/auth",
///     "max_retries": 2,
///     "retry_delay_ms": 500
/// }"#).unwrap();
///
/// assert_eq!(config.environment, Environment::Production);
/// let client = config.into_builder().unwrap().build().unwrap();
/// assert_eq!(client.base_url().as_str(), "https://familysearch.org/");
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The application key issued by FamilySearch.
    pub app_key: Option<String>,
    /// Which deployment to call.
    pub environment: Environment,
    /// Overrides the environment's API host.
    pub base_url: Option<String>,
    /// Overrides the environment's identity host.
    pub identity_url: Option<String>,
    /// Redirect URI registered for interactive sign-in.
    pub auth_callback: Option<String>,
    /// A token to start with.
    pub access_token: Option<String>,
    /// File in which to keep the access token between runs.
    pub token_file: Option<PathBuf>,
    /// Lifetime assumed for tokens the server does not give an expiry for.
    pub token_lifetime_secs: Option<u64>,
    /// Retries allowed after the first attempt.
    pub max_retries: Option<usize>,
    /// Fixed delay between attempts, in milliseconds.
    pub retry_delay_ms: Option<u64>,
    /// Per-request timeout, in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Default `Accept` header.
    pub accept: Option<String>,
}

impl Config {
    /// Parses a configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or has fields of the wrong type.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::ConfigurationError(format!("Invalid configuration: {e}")))
    }

    /// Turns the configuration into a builder.
    ///
    /// # Errors
    ///
    /// Returns an error if a URL or header value is invalid.
    pub fn into_builder(self) -> Result<ClientBuilder> {
        let mut builder = ClientBuilder::new().environment(self.environment);

        if let Some(base_url) = self.base_url {
            builder = builder.base_url(base_url)?;
        }
        if let Some(identity_url) = self.identity_url {
            builder = builder.identity_url(identity_url)?;
        }
        if let Some(app_key) = self.app_key {
            builder = builder.app_key(app_key);
        }
        if let Some(callback) = self.auth_callback {
            builder = builder.auth_callback(callback)?;
        }
        if let Some(token) = self.access_token {
            builder = builder.access_token(token);
        }
        if let Some(path) = self.token_file {
            builder = builder.token_store(Arc::new(FileTokenStore::new(path)));
        }
        if let Some(secs) = self.token_lifetime_secs {
            builder = builder.token_lifetime(Duration::from_secs(secs));
        }
        if let Some(max_retries) = self.max_retries {
            builder = builder.max_retries(max_retries);
        }
        if let Some(ms) = self.retry_delay_ms {
            builder = builder.retry_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = self.timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        if let Some(accept) = self.accept {
            builder = builder.default_header("Accept", accept)?;
        }

        Ok(builder)
    }
}

//! FamilySearch deployment environments.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Path of the OAuth2 authorization page, relative to the identity host.
pub const AUTHORIZATION_PATH: &str = "/cis-web/oauth2/v3/authorization";

/// Path of the OAuth2 token endpoint, relative to the identity host.
pub const TOKEN_PATH: &str = "/cis-web/oauth2/v3/token";

/// Which FamilySearch deployment the client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// The integration sandbox. Safe for development.
    #[default]
    Sandbox,
    /// The staging deployment.
    Staging,
    /// The beta deployment.
    Beta,
    /// Live data.
    Production,
}

impl Environment {
    /// The base URL for API requests.
    pub fn base_url(self) -> &'static str {
        match self {
            Environment::Sandbox => "https://sandbox.familysearch.org",
            Environment::Staging => "https://stage.familysearch.org",
            Environment::Beta => "https://beta.familysearch.org",
            Environment::Production => "https://familysearch.org",
        }
    }

    /// The base URL of the identity service issuing access tokens.
    pub fn identity_url(self) -> &'static str {
        match self {
            Environment::Sandbox => "https://sandbox.familysearch.org",
            Environment::Staging | Environment::Beta => "https://identbeta.familysearch.org",
            Environment::Production => "https://ident.familysearch.org",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Environment::Sandbox => "sandbox",
            Environment::Staging => "staging",
            Environment::Beta => "beta",
            Environment::Production => "production",
        };
        f.write_str(name)
    }
}

impl FromStr for Environment {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Ok(Environment::Sandbox),
            "staging" => Ok(Environment::Staging),
            "beta" => Ok(Environment::Beta),
            "production" => Ok(Environment::Production),
            other => Err(crate::Error::ConfigurationError(format!(
                "Unknown environment: {other}"
            ))),
        }
    }
}

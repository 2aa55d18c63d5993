//! Settings required to supervise a hub connection

use std::env;

use hubline_tokens::{exchange::TokenEndpoint, ClientCredentials, Realm};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// A setting is missing or unusable
///
/// A supervisor with bad configuration can never connect, so these errors
/// are raised at construction and never retried.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// A required setting was absent or blank
    #[error("required setting `{0}` is missing")]
    Missing(&'static str),
    /// A URL setting could not be parsed
    #[error("setting `{name}` is not a valid URL")]
    InvalidUrl {
        /// The name of the setting
        name: &'static str,
        /// The parse failure
        source: url::ParseError,
    },
}

/// Raw hub settings, as read from configuration
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    /// URL of the hub to connect to
    pub hub_url: Option<String>,
    /// Base URL of the authorization server
    pub auth_url: Option<String>,
    /// Realm that issues tokens to this client
    pub realm: Option<String>,
    /// Client ID used for the client credentials grant
    pub client_id: Option<String>,
    /// Client secret used for the client credentials grant
    pub client_secret: Option<String>,
}

impl std::fmt::Debug for HubSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("HubSettings")
            .field("hub_url", &self.hub_url)
            .field("auth_url", &self.auth_url)
            .field("realm", &self.realm)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .finish()
    }
}

fn env_var(prefix: &str, name: &str) -> Option<String> {
    env::var(format!("{}_{}", prefix, name)).ok()
}

fn required(value: Option<String>, name: &'static str) -> Result<String, ConfigurationError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigurationError::Missing(name))
}

fn required_url(value: Option<String>, name: &'static str) -> Result<Url, ConfigurationError> {
    let value = required(value, name)?;
    Url::parse(value.trim()).map_err(|source| ConfigurationError::InvalidUrl { name, source })
}

fn required_credentials(
    client_id: Option<String>,
    client_secret: Option<String>,
) -> Result<ClientCredentials, ConfigurationError> {
    Ok(ClientCredentials::new(
        required(client_id, "client_id")?,
        required(client_secret, "client_secret")?,
    ))
}

impl HubSettings {
    /// Reads settings from `{prefix}_HUB_URL`, `{prefix}_AUTH_URL`,
    /// `{prefix}_REALM`, `{prefix}_CLIENT_ID` and `{prefix}_CLIENT_SECRET`
    pub fn from_env(prefix: &str) -> Self {
        Self {
            hub_url: env_var(prefix, "HUB_URL"),
            auth_url: env_var(prefix, "AUTH_URL"),
            realm: env_var(prefix, "REALM"),
            client_id: env_var(prefix, "CLIENT_ID"),
            client_secret: env_var(prefix, "CLIENT_SECRET"),
        }
    }

    /// Checks that every required setting is present and well-formed
    pub fn validate(self) -> Result<HubConfig, ConfigurationError> {
        let hub_url = required_url(self.hub_url, "hub_url")?;
        let auth_url = required_url(self.auth_url, "auth_url")?;
        let realm = Realm::new(required(self.realm, "realm")?);
        let credentials = required_credentials(self.client_id, self.client_secret)?;

        Ok(HubConfig {
            hub_url,
            endpoint: TokenEndpoint::new(auth_url, realm),
            credentials,
        })
    }
}

/// Validated hub configuration
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// URL of the hub to connect to
    pub hub_url: Url,
    /// Where access tokens are requested from
    pub endpoint: TokenEndpoint,
    /// The initial client credentials
    pub credentials: ClientCredentials,
}

/// Re-reads client credentials from external configuration
///
/// Used when a supervisor is asked to reload its credentials at runtime.
pub trait CredentialsLoader: Send + Sync {
    /// Loads the current client credentials
    fn load(&self) -> Result<ClientCredentials, ConfigurationError>;
}

impl CredentialsLoader for ClientCredentials {
    fn load(&self) -> Result<ClientCredentials, ConfigurationError> {
        Ok(self.clone())
    }
}

impl<F> CredentialsLoader for F
where
    F: Fn() -> Result<ClientCredentials, ConfigurationError> + Send + Sync,
{
    fn load(&self) -> Result<ClientCredentials, ConfigurationError> {
        self()
    }
}

/// Loads client credentials from `{prefix}_CLIENT_ID` and `{prefix}_CLIENT_SECRET`
#[derive(Clone, Debug)]
pub struct EnvCredentials {
    prefix: String,
}

impl EnvCredentials {
    /// Constructs a loader for the given environment variable prefix
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl CredentialsLoader for EnvCredentials {
    fn load(&self) -> Result<ClientCredentials, ConfigurationError> {
        required_credentials(
            env_var(&self.prefix, "CLIENT_ID"),
            env_var(&self.prefix, "CLIENT_SECRET"),
        )
    }
}

//! Exchanging client credentials for an access token

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::{AccessToken, ClientCredentials, Realm, RealmRef};

#[cfg(feature = "oauth2")]
mod oauth2;

#[cfg(feature = "oauth2")]
#[cfg_attr(docsrs, doc(cfg(feature = "oauth2")))]
pub use oauth2::ClientCredentialsExchange;

/// The location of a realm's token endpoint on an authorization server
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenEndpoint {
    auth_url: Url,
    realm: Realm,
}

impl TokenEndpoint {
    /// Constructs a new token endpoint for `realm` on the server at `auth_url`
    pub fn new(auth_url: Url, realm: Realm) -> Self {
        Self { auth_url, realm }
    }

    /// The base URL of the authorization server
    #[inline]
    pub fn auth_url(&self) -> &Url {
        &self.auth_url
    }

    /// The realm that issues tokens
    #[inline]
    pub fn realm(&self) -> &RealmRef {
        &self.realm
    }

    /// The URL that client credentials are posted to
    ///
    /// Realms are laid out as `{auth_url}/realms/{realm}/protocol/openid-connect/token`.
    pub fn token_url(&self) -> Result<Url, url::ParseError> {
        let base = self.auth_url.as_str().trim_end_matches('/');
        Url::parse(&format!(
            "{}/realms/{}/protocol/openid-connect/token",
            base, self.realm
        ))
    }
}

/// An authority that issues access tokens in exchange for client credentials
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// Requests a new access token for `credentials` from `endpoint`
    async fn request_token(
        &self,
        endpoint: &TokenEndpoint,
        credentials: &ClientCredentials,
    ) -> Result<AccessToken, TokenRequestError>;
}

#[async_trait]
impl<T: TokenExchange + ?Sized> TokenExchange for std::sync::Arc<T> {
    async fn request_token(
        &self,
        endpoint: &TokenEndpoint,
        credentials: &ClientCredentials,
    ) -> Result<AccessToken, TokenRequestError> {
        (**self).request_token(endpoint, credentials).await
    }
}

/// An error while attempting to request a new token from the authority
#[derive(Debug, Error)]
pub enum TokenRequestError {
    /// The token URL could not be derived from the endpoint
    #[error("unable to construct token URL")]
    InvalidTokenUrl(#[from] url::ParseError),
    /// An error from the authority with an error body
    #[error("authority responded with {status}: {body}")]
    ErrorWithBody {
        /// The HTTP status code of the response
        status: u16,
        /// The body of the error
        body: String,
    },
    /// Unable to deserialize the token body
    #[error("error deserializing token body from authority")]
    TokenBodyError(#[from] serde_json::Error),
    /// Unable to read the response
    #[cfg(feature = "oauth2")]
    #[error("error reading response body")]
    BodyReadError(#[source] reqwest::Error),
    /// Unable to send a token request to the authority
    #[cfg(feature = "oauth2")]
    #[error("error sending request to authority")]
    RequestSend(#[source] reqwest::Error),
    /// Any other failure reported by a custom exchange
    #[error("token exchange failed")]
    Other(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

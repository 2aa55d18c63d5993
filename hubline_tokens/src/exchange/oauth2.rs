use async_trait::async_trait;
use serde::{Deserialize, Serialize, Serializer};

use super::{TokenEndpoint, TokenExchange, TokenRequestError};
use crate::{AccessToken, AccessTokenRef, ClientCredentials};

/// Performs the OAuth2 client credentials grant over HTTP
///
/// Credentials are posted to the realm's token URL as
/// `application/x-www-form-urlencoded` data and the `access_token` field
/// of the JSON response is returned.
#[derive(Clone, Debug, Default)]
pub struct ClientCredentialsExchange {
    client: reqwest::Client,
}

impl ClientCredentialsExchange {
    /// Constructs a new exchange using the given HTTP client
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

struct ClientCredentialsGrant<'a>(&'a ClientCredentials);

impl Serialize for ClientCredentialsGrant<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut ser = serializer.serialize_struct("ClientCredentialsGrant", 3)?;
        ser.serialize_field("grant_type", "client_credentials")?;
        ser.serialize_field("client_id", &self.0.client_id)?;
        ser.serialize_field("client_secret", &self.0.client_secret)?;
        ser.end()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse<'a> {
    #[serde(borrow)]
    access_token: &'a AccessTokenRef,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[async_trait]
impl TokenExchange for ClientCredentialsExchange {
    #[tracing::instrument(
        err,
        skip(self, endpoint, credentials),
        fields(
            realm = %endpoint.realm(),
            credentials.client_id = %credentials.client_id,
        ),
    )]
    async fn request_token(
        &self,
        endpoint: &TokenEndpoint,
        credentials: &ClientCredentials,
    ) -> Result<AccessToken, TokenRequestError> {
        let token_url = endpoint.token_url()?;
        tracing::trace!(%token_url, "requesting token from authority");

        let resp = self
            .client
            .post(token_url)
            .form(&ClientCredentialsGrant(credentials))
            .send()
            .await
            .map_err(TokenRequestError::RequestSend)?;

        let status = resp.status();
        tracing::debug!(
            response.status = status.as_u16(),
            "received token response from issuing authority"
        );

        if !status.is_success() {
            let body = resp
                .text()
                .await
                .map_err(TokenRequestError::BodyReadError)?;
            return Err(TokenRequestError::ErrorWithBody {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(TokenRequestError::BodyReadError)?;
        let resp: TokenResponse = serde_json::from_slice(&body)?;

        tracing::info!(
            expires_in = resp.expires_in.unwrap_or_default(),
            "received new access token"
        );

        Ok((*resp.access_token).to_owned())
    }
}

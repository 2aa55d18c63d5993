use aliri_clock::{Clock, System};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::{
    expiry::{expiry_of, ExpiryError, ValidityCheck},
    exchange::{TokenEndpoint, TokenExchange, TokenRequestError},
    AccessToken, Credential, CredentialStore,
};

/// Failure to obtain a usable access token
///
/// This only fails the current authentication attempt; callers are expected
/// to retry later.
#[derive(Debug, Error)]
pub enum AuthFailure {
    /// The token exchange with the authority failed
    #[error("token exchange failed")]
    Exchange(#[from] TokenRequestError),
    /// The authority issued a token whose expiry cannot be read
    #[error("authority issued an unusable token")]
    UnusableToken(#[from] ExpiryError),
}

/// Supplies access tokens, reusing the cached token while it remains valid
///
/// Concurrent callers that find no usable token share a single exchange.
#[derive(Debug)]
pub struct TokenSupplier<E, C = System> {
    exchange: E,
    validity: ValidityCheck,
    clock: C,
    refresh: Mutex<()>,
}

impl<E> TokenSupplier<E, System> {
    /// Constructs a new supplier using the system clock and no clock skew
    pub fn new(exchange: E) -> Self {
        Self {
            exchange,
            validity: ValidityCheck::default(),
            clock: System,
            refresh: Mutex::new(()),
        }
    }
}

impl<E, C> TokenSupplier<E, C> {
    /// Sets the check used to decide whether a cached token is still valid
    pub fn with_validity(mut self, validity: ValidityCheck) -> Self {
        self.validity = validity;
        self
    }

    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> TokenSupplier<E, D> {
        TokenSupplier {
            exchange: self.exchange,
            validity: self.validity,
            clock,
            refresh: self.refresh,
        }
    }

    /// The underlying token exchange
    pub fn exchange(&self) -> &E {
        &self.exchange
    }
}

impl<E, C> TokenSupplier<E, C>
where
    E: TokenExchange,
    C: Clock + Send + Sync,
{
    /// Returns a usable access token for the credentials in `store`
    ///
    /// A valid cached token is returned without contacting the authority.
    /// Otherwise a new token is requested from `endpoint` and cached in
    /// `store`, unless the credentials were reloaded in the meantime.
    pub async fn ensure_token(
        &self,
        store: &CredentialStore,
        endpoint: &TokenEndpoint,
    ) -> Result<AccessToken, AuthFailure> {
        if let Some(token) = self.cached(&store.get()) {
            return Ok(token);
        }

        let _refreshing = self.refresh.lock().await;

        let snapshot = store.get();
        if let Some(token) = self.cached(&snapshot) {
            tracing::trace!("access token refreshed by a concurrent caller");
            return Ok(token);
        }

        tracing::debug!(client_id = %snapshot.client_id(), "requesting new access token");
        let token = self
            .exchange
            .request_token(endpoint, snapshot.credentials())
            .await?;

        let expiry = expiry_of(&token)?;
        tracing::debug!(expiry = expiry.0, "access token issued");

        store.cache_token(snapshot.generation(), token.clone());
        Ok(token)
    }

    fn cached(&self, snapshot: &Credential) -> Option<AccessToken> {
        let token = snapshot.cached_token()?;
        if self.validity.is_valid_at(token, self.clock.now()) {
            tracing::trace!("reusing cached access token");
            Some(token.to_owned())
        } else {
            tracing::debug!("cached access token is no longer valid");
            None
        }
    }
}

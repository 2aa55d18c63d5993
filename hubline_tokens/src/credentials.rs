//! A shared, reloadable store for client credentials and the last issued token

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::{AccessToken, AccessTokenRef, ClientId, ClientIdRef, ClientSecret, ClientSecretRef};

/// A client identifier and its secret
///
/// The pair is always replaced as a unit so that an identifier is never
/// presented alongside a secret that belongs to another client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientCredentials {
    /// The client ID
    pub client_id: ClientId,

    /// The client secret
    pub client_secret: ClientSecret,
}

impl ClientCredentials {
    /// Constructs a new credential pair
    pub fn new(client_id: impl Into<ClientId>, client_secret: impl Into<ClientSecret>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

/// An immutable snapshot of the credential store
#[derive(Debug)]
pub struct Credential {
    credentials: Arc<ClientCredentials>,
    cached_token: Option<AccessToken>,
    generation: u64,
}

impl Credential {
    /// The client ID of this snapshot
    #[inline]
    pub fn client_id(&self) -> &ClientIdRef {
        &self.credentials.client_id
    }

    /// The client secret of this snapshot
    #[inline]
    pub fn client_secret(&self) -> &ClientSecretRef {
        &self.credentials.client_secret
    }

    /// The full credential pair
    #[inline]
    pub fn credentials(&self) -> &ClientCredentials {
        &self.credentials
    }

    /// The most recently issued access token for these credentials, if any
    #[inline]
    pub fn cached_token(&self) -> Option<&AccessTokenRef> {
        self.cached_token.as_deref()
    }

    /// A counter that increases every time the credential pair is reloaded
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Holds the current client credentials and cached access token
///
/// Reads never block and always observe a complete snapshot: either the
/// credentials from before a reload or the ones after it.
#[derive(Debug)]
pub struct CredentialStore {
    current: ArcSwap<Credential>,
}

impl CredentialStore {
    /// Constructs a new store with no cached token
    pub fn new(credentials: ClientCredentials) -> Self {
        Self {
            current: ArcSwap::from_pointee(Credential {
                credentials: Arc::new(credentials),
                cached_token: None,
                generation: 0,
            }),
        }
    }

    /// Gets the current snapshot
    pub fn get(&self) -> Arc<Credential> {
        self.current.load_full()
    }

    /// Replaces the credential pair
    ///
    /// Any cached token was issued to the previous pair and is dropped. This
    /// does not contact the token authority; the next request for a token
    /// will exchange the new credentials.
    pub fn reload(&self, credentials: ClientCredentials) {
        let credentials = Arc::new(credentials);
        let previous = self.current.rcu(|current| {
            Arc::new(Credential {
                credentials: Arc::clone(&credentials),
                cached_token: None,
                generation: current.generation + 1,
            })
        });

        tracing::info!(
            client_id = %credentials.client_id,
            previous.client_id = %previous.client_id(),
            generation = previous.generation + 1,
            "client credentials reloaded"
        );
    }

    /// Caches a token issued for the credentials of `generation`
    ///
    /// If the credentials were reloaded after the token was requested, the
    /// token is discarded and `false` is returned.
    pub fn cache_token(&self, generation: u64, token: AccessToken) -> bool {
        let mut stored = false;
        self.current.rcu(|current| {
            stored = current.generation == generation;
            if stored {
                Arc::new(Credential {
                    credentials: Arc::clone(&current.credentials),
                    cached_token: Some(token.clone()),
                    generation,
                })
            } else {
                Arc::clone(current)
            }
        });

        if !stored {
            tracing::debug!(generation, "credentials reloaded while requesting token, discarding");
        }

        stored
    }
}

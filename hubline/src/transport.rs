//! The seam between the supervisor and the underlying messaging transport
//!
//! The transport owns framing, keep-alives and, once a connection has been
//! established, its own reconnect loop. It is handed everything it needs to
//! do so through [`TransportOptions`]: a callback that yields a fresh access
//! token on every authentication challenge, the reconnect schedule, and a set
//! of [`TransportHooks`] through which it reports lifecycle events.

use std::{error, fmt, sync::Arc};

use async_trait::async_trait;
use hubline_tokens::{AccessToken, AuthFailure};
use thiserror::Error;
use url::Url;

use crate::{
    backoff::ReconnectPolicy,
    state::{ConnectionState, StateNotifier},
};

/// Yields an access token whenever the transport must authenticate
///
/// Transports must call this on every authentication round rather than
/// holding on to a previous token, so that reloaded credentials take effect
/// on the next round.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// Obtains a currently valid access token
    async fn access_token(&self) -> Result<AccessToken, AuthFailure>;
}

/// An error reported by a transport
#[derive(Debug, Error)]
pub enum TransportError {
    /// No access token could be obtained for the connection
    #[error("unable to authenticate connection")]
    Auth(#[from] AuthFailure),
    /// The connection could not be established or was lost
    #[error("transport failure")]
    Connection(#[source] Box<dyn error::Error + Send + Sync + 'static>),
}

impl TransportError {
    /// Wraps an arbitrary transport-level error
    pub fn new<E>(err: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync + 'static>>,
    {
        Self::Connection(err.into())
    }
}

/// Lifecycle callbacks a transport raises after the initial connection
///
/// Each hook is relayed to the supervisor's subscribers as a state change.
#[derive(Clone)]
pub struct TransportHooks {
    notifier: Arc<StateNotifier>,
}

impl fmt::Debug for TransportHooks {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TransportHooks")
            .field("state", &self.notifier.current())
            .finish()
    }
}

impl TransportHooks {
    pub(crate) fn new(notifier: Arc<StateNotifier>) -> Self {
        Self { notifier }
    }

    /// The connection dropped and the transport is re-establishing it
    pub fn reconnecting(&self, error: Option<&TransportError>) {
        match error {
            Some(error) => tracing::warn!(
                error = (error as &dyn error::Error),
                "connection lost, transport reconnecting"
            ),
            None => tracing::info!("transport reconnecting"),
        }
        self.notifier.transition(ConnectionState::Reconnecting);
    }

    /// The transport re-established the connection
    pub fn reconnected(&self) {
        tracing::info!("transport reconnected");
        self.notifier.transition(ConnectionState::Connected);
    }

    /// The connection closed and the transport will not reconnect
    pub fn closed(&self, error: Option<&TransportError>) {
        match error {
            Some(error) => tracing::warn!(
                error = (error as &dyn error::Error),
                "connection closed with error"
            ),
            None => tracing::info!("connection closed"),
        }
        self.notifier.transition(ConnectionState::Disconnected);
    }
}

/// Everything a transport is configured with when it is built
#[derive(Clone)]
pub struct TransportOptions {
    /// The hub endpoint to connect to
    pub hub_url: Url,
    /// Called on every authentication challenge
    pub access_token: Arc<dyn AccessTokenProvider>,
    /// Schedule for the transport's own reconnect loop
    pub reconnect: Arc<dyn ReconnectPolicy>,
    /// Lifecycle events to raise
    pub hooks: TransportHooks,
}

impl fmt::Debug for TransportOptions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TransportOptions")
            .field("hub_url", &self.hub_url.as_str())
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

/// A bidirectional, long-lived messaging connection
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opens the connection
    ///
    /// Dropping the returned future must abandon the attempt.
    async fn start(&self) -> Result<(), TransportError>;

    /// Gracefully closes the connection and halts any reconnect loop
    async fn stop(&self) -> Result<(), TransportError>;

    /// The transport's own view of the connection state
    fn state(&self) -> ConnectionState;

    /// Sends an encoded payload to a hub method
    async fn send(&self, target: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// Builds a transport wired to the supervisor
pub trait TransportFactory {
    /// The transport produced
    type Transport: Transport;

    /// Builds a transport from its options
    fn build(&self, options: TransportOptions) -> Result<Self::Transport, TransportError>;
}

impl<F, T> TransportFactory for F
where
    F: Fn(TransportOptions) -> Result<T, TransportError>,
    T: Transport,
{
    type Transport = T;

    fn build(&self, options: TransportOptions) -> Result<T, TransportError> {
        self(options)
    }
}

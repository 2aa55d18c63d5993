use std::{
    error, fmt,
    sync::{Arc, Mutex},
};

use aliri_clock::Clock;
use async_trait::async_trait;
use hubline_tokens::{
    exchange::{TokenEndpoint, TokenExchange},
    AccessToken, AuthFailure, Credential, CredentialStore, TokenSupplier,
};
use serde::Serialize;
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::{CancellationToken, DropGuard};
use url::Url;

use crate::{
    backoff::{ReconnectPolicy, RetryState},
    codec::{CodecError, HubCodec, MessagePackCodec},
    config::{ConfigurationError, CredentialsLoader, HubConfig, HubSettings},
    state::{lock, ConnectionState, StateChange, StateNotifier, SubscriptionId},
    transport::{
        AccessTokenProvider, Transport, TransportError, TransportFactory, TransportHooks,
        TransportOptions,
    },
};

/// An error starting or constructing a supervisor
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The supervisor is misconfigured and can never connect
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// The transport could not be built
    #[error("unable to build transport")]
    Transport(#[from] TransportError),
    /// The supervisor has already been started
    #[error("supervisor is already running")]
    AlreadyStarted,
    /// The supervisor has been stopped and cannot be restarted
    #[error("supervisor has been stopped")]
    Stopped,
}

/// An error sending a message over the supervised connection
#[derive(Debug, Error)]
pub enum SendError {
    /// The message could not be encoded
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The transport could not deliver the message
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// How the initial connection sequence ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The connection was established
    Connected,
    /// The supervisor was cancelled before a connection was established
    Cancelled,
    /// The reconnect policy declined to make further attempts
    GaveUp,
}

/// A handle to a started supervisor's initial connection sequence
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    outcome: watch::Receiver<Option<ConnectOutcome>>,
}

impl ConnectionHandle {
    /// The outcome, if the initial connection sequence has finished
    pub fn outcome(&self) -> Option<ConnectOutcome> {
        *self.outcome.borrow()
    }

    /// Waits until the initial connection sequence finishes
    pub async fn established(&self) -> ConnectOutcome {
        let mut outcome = self.outcome.clone();
        let result = match outcome.wait_for(Option::is_some).await {
            Ok(value) => (*value).unwrap_or(ConnectOutcome::Cancelled),
            Err(_) => ConnectOutcome::Cancelled,
        };
        result
    }
}

/// Supplies the transport with tokens for the supervisor's credentials
#[derive(Debug)]
struct HubAuthenticator<E, C> {
    store: Arc<CredentialStore>,
    supplier: TokenSupplier<E, C>,
    endpoint: TokenEndpoint,
}

#[async_trait]
impl<E, C> AccessTokenProvider for HubAuthenticator<E, C>
where
    E: TokenExchange,
    C: Clock + Send + Sync,
{
    async fn access_token(&self) -> Result<AccessToken, AuthFailure> {
        self.supplier
            .ensure_token(&self.store, &self.endpoint)
            .await
    }
}

enum Lifecycle {
    Idle,
    Running {
        cancel: DropGuard,
        task: JoinHandle<()>,
    },
    Stopped,
}

/// Keeps one logical hub connection alive
///
/// The supervisor retries the initial connection on its own schedule until
/// it succeeds or is cancelled. After that, dropped connections are left to
/// the transport's reconnect loop, whose lifecycle events are relayed to
/// subscribers. Every authentication challenge raised by the transport is
/// answered with a token for the current credentials, so credentials
/// reloaded at runtime are picked up on the next challenge without forcing
/// a reconnect.
pub struct ConnectionSupervisor<T, K = MessagePackCodec> {
    hub_url: Url,
    store: Arc<CredentialStore>,
    loader: Box<dyn CredentialsLoader>,
    policy: Arc<dyn ReconnectPolicy>,
    notifier: Arc<StateNotifier>,
    transport: Arc<T>,
    codec: K,
    lifecycle: Mutex<Lifecycle>,
}

impl<T, K> fmt::Debug for ConnectionSupervisor<T, K>
where
    K: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("hub_url", &self.hub_url.as_str())
            .field("state", &self.notifier.current())
            .field("credentials", &self.store.get())
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> ConnectionSupervisor<T, MessagePackCodec> {
    /// Validates `settings` and builds the transport
    ///
    /// The transport is wired to request tokens from `supplier` for the
    /// configured credentials and to use `policy` for its own reconnects.
    /// `loader` is consulted whenever credentials are reloaded.
    ///
    /// # Errors
    ///
    /// Returns an error immediately if a required setting is missing or
    /// the transport cannot be built.
    pub fn new<F, E, C, L, P>(
        settings: HubSettings,
        loader: L,
        supplier: TokenSupplier<E, C>,
        policy: P,
        factory: F,
    ) -> Result<Self, SupervisorError>
    where
        F: TransportFactory<Transport = T>,
        E: TokenExchange + 'static,
        C: Clock + Send + Sync + 'static,
        L: CredentialsLoader + 'static,
        P: ReconnectPolicy + 'static,
    {
        let HubConfig {
            hub_url,
            endpoint,
            credentials,
        } = settings.validate()?;

        let store = Arc::new(CredentialStore::new(credentials));
        let notifier = Arc::new(StateNotifier::new());
        let policy: Arc<dyn ReconnectPolicy> = Arc::new(policy);

        let authenticator = HubAuthenticator {
            store: Arc::clone(&store),
            supplier,
            endpoint,
        };

        let transport = factory.build(TransportOptions {
            hub_url: hub_url.clone(),
            access_token: Arc::new(authenticator),
            reconnect: Arc::clone(&policy),
            hooks: TransportHooks::new(Arc::clone(&notifier)),
        })?;

        tracing::debug!(%hub_url, "hub transport built");

        Ok(Self {
            hub_url,
            store,
            loader: Box::new(loader),
            policy,
            notifier,
            transport: Arc::new(transport),
            codec: MessagePackCodec,
            lifecycle: Mutex::new(Lifecycle::Idle),
        })
    }
}

impl<T: Transport, K> ConnectionSupervisor<T, K> {
    /// Replaces the codec used to encode outgoing messages
    pub fn with_codec<K2>(self, codec: K2) -> ConnectionSupervisor<T, K2> {
        let Self {
            hub_url,
            store,
            loader,
            policy,
            notifier,
            transport,
            codec: _,
            lifecycle,
        } = self;

        ConnectionSupervisor {
            hub_url,
            store,
            loader,
            policy,
            notifier,
            transport,
            codec,
            lifecycle,
        }
    }

    /// Starts the connection in the background
    ///
    /// The initial connection is retried per the reconnect policy until it
    /// succeeds or `cancel` is triggered. Cancelling `cancel` at any later
    /// point closes the connection. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the supervisor is already running or was stopped.
    pub fn start(&self, cancel: CancellationToken) -> Result<ConnectionHandle, SupervisorError> {
        let mut lifecycle = lock(&self.lifecycle);
        match *lifecycle {
            Lifecycle::Idle => {}
            Lifecycle::Running { .. } => return Err(SupervisorError::AlreadyStarted),
            Lifecycle::Stopped => return Err(SupervisorError::Stopped),
        }

        let cancel = cancel.child_token();
        let (tx, rx) = watch::channel(None);

        tracing::info!(hub_url = %self.hub_url, "starting hub connection");
        let task = tokio::spawn(supervise(
            Arc::clone(&self.transport),
            Arc::clone(&self.policy),
            Arc::clone(&self.notifier),
            cancel.clone(),
            tx,
        ));

        *lifecycle = Lifecycle::Running {
            cancel: cancel.drop_guard(),
            task,
        };

        Ok(ConnectionHandle { outcome: rx })
    }

    /// Stops the supervisor and closes the connection
    ///
    /// No state changes are delivered once this is called, and the
    /// supervisor cannot be started again.
    pub async fn stop(&self) {
        self.notifier.silence();
        let previous = std::mem::replace(&mut *lock(&self.lifecycle), Lifecycle::Stopped);

        if let Lifecycle::Running { cancel, task } = previous {
            drop(cancel);
            if let Err(err) = task.await {
                if err.is_panic() {
                    tracing::error!("hub supervisor panicked!");
                }
            }
            tracing::info!(hub_url = %self.hub_url, "hub connection stopped");
        }
    }

    /// Re-reads the client credentials from configuration
    ///
    /// The active connection is left untouched; the new credentials are
    /// used on the next authentication challenge.
    pub fn reload_client_credentials(&self) -> Result<(), ConfigurationError> {
        let credentials = self.loader.load()?;
        self.store.reload(credentials);
        Ok(())
    }

    /// The current connection state
    pub fn state(&self) -> ConnectionState {
        self.notifier.current()
    }

    /// The current credential snapshot
    pub fn credentials(&self) -> Arc<Credential> {
        self.store.get()
    }

    /// Registers a callback for connection state changes
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(StateChange) + Send + Sync + 'static,
    {
        self.notifier.subscribe(callback)
    }

    /// Removes a state change callback
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    /// Delivers the current state to all subscribers again
    pub fn fire_status_update(&self) {
        self.notifier.fire_current();
    }

    /// The supervised transport
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }
}

impl<T: Transport, K: HubCodec> ConnectionSupervisor<T, K> {
    /// Encodes `message` and sends it to the hub method `target`
    pub async fn send<M>(&self, target: &str, message: &M) -> Result<(), SendError>
    where
        M: Serialize + ?Sized,
    {
        let payload = self.codec.encode(message)?;
        self.transport.send(target, payload).await?;
        Ok(())
    }
}

async fn supervise<T: Transport>(
    transport: Arc<T>,
    policy: Arc<dyn ReconnectPolicy>,
    notifier: Arc<StateNotifier>,
    cancel: CancellationToken,
    outcome: watch::Sender<Option<ConnectOutcome>>,
) {
    let result = connect(&*transport, &*policy, &notifier, &cancel).await;
    outcome.send_replace(Some(result));

    match result {
        ConnectOutcome::Connected => {
            cancel.cancelled().await;
            tracing::debug!("hub supervisor cancelled");
        }
        ConnectOutcome::Cancelled => {
            tracing::debug!("hub supervisor cancelled before connecting");
        }
        ConnectOutcome::GaveUp => {
            notifier.transition(ConnectionState::Disconnected);
            return;
        }
    }

    notifier.silence();
    if let Err(error) = transport.stop().await {
        tracing::warn!(
            error = (&error as &dyn error::Error),
            "error closing hub connection"
        );
    }
    notifier.transition(ConnectionState::Disconnected);
}

async fn connect<T: Transport + ?Sized>(
    transport: &T,
    policy: &dyn ReconnectPolicy,
    notifier: &StateNotifier,
    cancel: &CancellationToken,
) -> ConnectOutcome {
    let mut retry = RetryState::new();

    loop {
        notifier.transition(ConnectionState::Connecting);
        tracing::debug!(attempt = retry.attempts() + 1, "connecting to hub");

        let attempt = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ConnectOutcome::Cancelled,
            attempt = transport.start() => attempt,
        };

        let error = match attempt {
            Ok(()) => {
                tracing::info!(
                    attempts = retry.attempts() + 1,
                    elapsed_ms = retry.elapsed().as_millis() as u64,
                    "connected to hub"
                );
                retry.reset();
                notifier.transition(ConnectionState::Connected);
                return ConnectOutcome::Connected;
            }
            Err(error) => error,
        };

        let delay = match policy.next_delay(retry.attempts()) {
            Some(delay) => delay,
            None => {
                tracing::error!(
                    error = (&error as &dyn error::Error),
                    attempts = retry.attempts() + 1,
                    "unable to connect to hub, giving up"
                );
                return ConnectOutcome::GaveUp;
            }
        };

        tracing::warn!(
            error = (&error as &dyn error::Error),
            attempt = retry.attempts() + 1,
            delay_ms = delay.as_millis() as u64,
            "unable to connect to hub, will retry"
        );
        retry.record_failure();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return ConnectOutcome::Cancelled,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

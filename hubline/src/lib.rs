//! A supervised, self-authenticating connection to a realtime hub
//!
//! A [`ConnectionSupervisor`] owns one logical connection to a hub. It
//! validates its configuration up front, retries the initial connection on a
//! [`ReconnectPolicy`][backoff::ReconnectPolicy] schedule until it succeeds
//! or is cancelled, and relays lifecycle events from the underlying
//! [`Transport`][transport::Transport] to subscribers as
//! [`StateChange`][state::StateChange] notifications.
//!
//! The transport authenticates with a bearer token obtained through the
//! client credentials grant. Every authentication challenge asks the
//! supervisor for a token, which reuses the cached token while it is valid
//! and exchanges the current credentials for a new one otherwise. Credentials
//! can be reloaded at runtime without dropping the connection.
//!
//! ```no_run
//! use hubline::{
//!     backoff::TieredBackoff,
//!     config::{EnvCredentials, HubSettings},
//!     tokens::{exchange::ClientCredentialsExchange, TokenSupplier},
//!     CancellationToken, ConnectionSupervisor,
//! };
//!
//! # use hubline::{state::ConnectionState, transport::*};
//! # struct WebSocketTransport;
//! # #[async_trait::async_trait]
//! # impl Transport for WebSocketTransport {
//! #     async fn start(&self) -> Result<(), TransportError> { Ok(()) }
//! #     async fn stop(&self) -> Result<(), TransportError> { Ok(()) }
//! #     fn state(&self) -> ConnectionState { ConnectionState::Connected }
//! #     async fn send(&self, _: &str, _: Vec<u8>) -> Result<(), TransportError> { Ok(()) }
//! # }
//! # fn build_transport(_: TransportOptions) -> Result<WebSocketTransport, TransportError> {
//! #     Ok(WebSocketTransport)
//! # }
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let supervisor = ConnectionSupervisor::new(
//!     HubSettings::from_env("INVENTORY"),
//!     EnvCredentials::new("INVENTORY"),
//!     TokenSupplier::new(ClientCredentialsExchange::default()),
//!     TieredBackoff::default(),
//!     build_transport,
//! )?;
//!
//! supervisor.subscribe(|change| {
//!     tracing::info!(previous = %change.previous, current = %change.current, "hub state");
//! });
//!
//! let shutdown = CancellationToken::new();
//! let handle = supervisor.start(shutdown.clone())?;
//! handle.established().await;
//!
//! supervisor.send("ReportStock", &("A-1", 4)).await?;
//! supervisor.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! * `oauth2` (default): Enables the HTTP token exchange in [`tokens`].

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod backoff;
pub mod codec;
pub mod config;
pub mod state;
mod supervisor;
pub mod transport;

pub use hubline_tokens as tokens;
pub use supervisor::{
    ConnectOutcome, ConnectionHandle, ConnectionSupervisor, SendError, SupervisorError,
};
pub use tokio_util::sync::CancellationToken;

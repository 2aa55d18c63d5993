//! Access tokens for services that authenticate as themselves
//!
//! Services using the OAuth2 _client credentials_ grant present their own
//! client ID and secret to a token authority in exchange for a short-lived
//! access token. This crate keeps those credentials in a shared
//! [`CredentialStore`] that can be reloaded at runtime, and provides a
//! [`TokenSupplier`] which hands out the cached token while it is still valid
//! and performs a new exchange only when it is missing or expired.
//!
//! Validity is judged by the `exp` claim embedded in the token. Tokens are
//! received directly from the trusted authority, so their signatures are not
//! verified; a token that cannot be inspected is simply treated as expired.
//!
//! ```
//! use hubline_tokens::{
//!     exchange::{ClientCredentialsExchange, TokenEndpoint},
//!     ClientCredentials, CredentialStore, Realm, TokenSupplier,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = CredentialStore::new(ClientCredentials::new(
//!     String::from("inventory-service"),
//!     String::from("s3cr3t"),
//! ));
//!
//! let endpoint = TokenEndpoint::new(
//!     "https://auth.example.com".parse()?,
//!     Realm::from_static("services"),
//! );
//!
//! let supplier = TokenSupplier::new(ClientCredentialsExchange::default());
//!
//! let token = supplier.ensure_token(&store, &endpoint).await?;
//! tracing::info!(token = format_args!("{:#?}", token), "obtained access token");
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! * `oauth2` (default): Provides [`ClientCredentialsExchange`][exchange::ClientCredentialsExchange],
//!   which performs the exchange over HTTP using [reqwest].

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

mod braids;
mod credentials;
pub mod exchange;
pub mod expiry;
mod supplier;

pub use braids::*;
pub use credentials::{ClientCredentials, Credential, CredentialStore};
pub use supplier::{AuthFailure, TokenSupplier};

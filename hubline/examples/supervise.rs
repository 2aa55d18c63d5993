use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use clap::Parser;
use hubline::{
    backoff::TieredBackoff,
    config::{EnvCredentials, HubSettings},
    state::ConnectionState,
    tokens::{exchange::ClientCredentialsExchange, TokenSupplier},
    transport::{Transport, TransportError, TransportOptions},
    CancellationToken, ConnectionSupervisor,
};

#[derive(Debug, Parser)]
struct Opts {
    /// Prefix of the environment variables holding the hub settings
    #[arg(short, long, env = "HUB_PREFIX", default_value = "HUBLINE")]
    prefix: String,

    /// Number of simulated dial failures before the connection succeeds
    #[arg(short, long, env = "HUB_FAILURES", default_value_t = 2)]
    failures: u32,

    /// Seconds between simulated credential reloads
    #[arg(short, long, env = "HUB_RELOAD_SECS", default_value_t = 30)]
    reload_secs: u64,
}

/// Authenticates and pretends to connect
///
/// Stands in for a real messaging transport: each dial asks for a token
/// and the first few dials are made to fail.
#[derive(Debug)]
struct SimulatedTransport {
    options: TransportOptions,
    failures_left: AtomicU32,
    state: Mutex<ConnectionState>,
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn start(&self) -> Result<(), TransportError> {
        let token = self.options.access_token.access_token().await?;
        tracing::info!(
            hub_url = %self.options.hub_url,
            token = format_args!("{:#?}", token),
            "dialing hub"
        );

        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(TransportError::new("simulated dial failure"));
        }

        *self.state.lock().unwrap() = ConnectionState::Connected;
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        *self.state.lock().unwrap() = ConnectionState::Disconnected;
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    async fn send(&self, target: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        tracing::info!(method = target, bytes = payload.len(), "sent message");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    let failures = opts.failures;

    let supervisor = ConnectionSupervisor::new(
        HubSettings::from_env(&opts.prefix),
        EnvCredentials::new(opts.prefix.clone()),
        TokenSupplier::new(ClientCredentialsExchange::default()),
        TieredBackoff::default(),
        move |options: TransportOptions| -> Result<_, TransportError> {
            Ok(SimulatedTransport {
                options,
                failures_left: AtomicU32::new(failures),
                state: Mutex::new(ConnectionState::Disconnected),
            })
        },
    )?;

    supervisor.subscribe(|change| {
        tracing::info!(
            previous = %change.previous,
            current = %change.current,
            "hub connection state"
        );
    });

    let shutdown = CancellationToken::new();
    let handle = supervisor.start(shutdown.clone())?;

    let mut reload = tokio::time::interval(Duration::from_secs(opts.reload_secs));
    reload.tick().await;

    tokio::select! {
        outcome = handle.established() => {
            tracing::info!(?outcome, "initial connection finished");
        }
        _ = tokio::signal::ctrl_c() => shutdown.cancel(),
    }

    loop {
        tokio::select! {
            _ = reload.tick() => {
                if let Err(error) = supervisor.reload_client_credentials() {
                    tracing::error!(
                        error = (&error as &dyn std::error::Error),
                        "unable to reload credentials"
                    );
                }
                supervisor.send("Heartbeat", &supervisor.state().to_string()).await?;
            }
            _ = shutdown.cancelled() => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    supervisor.stop().await;
    Ok(())
}

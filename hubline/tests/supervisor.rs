use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use aliri_base64::Base64UrlRef;
use aliri_clock::{Clock, System};
use async_trait::async_trait;
use color_eyre::Result;
use hubline::{
    backoff::{ReconnectPolicy, TieredBackoff},
    codec::{HubCodec, MessagePackCodec},
    config::{ConfigurationError, HubSettings},
    state::{ConnectionState, StateChange},
    tokens::{
        exchange::{TokenEndpoint, TokenExchange, TokenRequestError},
        AccessToken, AuthFailure, ClientCredentials, TokenSupplier,
    },
    transport::{Transport, TransportError, TransportHooks, TransportOptions},
    CancellationToken, ConnectOutcome, ConnectionSupervisor, SupervisorError,
};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use ConnectionState::*;

fn token_for(client_id: &str) -> AccessToken {
    let header = Base64UrlRef::from_slice(br#"{"alg":"RS256","typ":"JWT"}"#);
    let claims = format!(
        r#"{{"sub":"{}","exp":{}}}"#,
        client_id,
        System.now().0 + 3600
    );
    let payload = Base64UrlRef::from_slice(claims.as_bytes());
    AccessToken::new(format!("{}.{}.c2lnbmF0dXJl", header, payload))
}

#[derive(Debug, Default)]
struct FakeExchange {
    failures: AtomicUsize,
    requests: Mutex<Vec<String>>,
}

impl FakeExchange {
    fn failing(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            ..Self::default()
        }
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenExchange for FakeExchange {
    async fn request_token(
        &self,
        _: &TokenEndpoint,
        credentials: &ClientCredentials,
    ) -> Result<AccessToken, TokenRequestError> {
        let client_id = credentials.client_id.as_str();
        self.requests.lock().unwrap().push(client_id.to_owned());

        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TokenRequestError::ErrorWithBody {
                status: 503,
                body: "temporarily_unavailable".into(),
            });
        }

        Ok(token_for(client_id))
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Script {
    failures: usize,
    dial_time: Duration,
}

impl Script {
    fn failing(failures: usize) -> Self {
        Self {
            failures,
            ..Self::default()
        }
    }
}

#[derive(Debug)]
struct ScriptedTransport {
    options: TransportOptions,
    script: Script,
    starts: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    stops: AtomicUsize,
    state: Mutex<ConnectionState>,
    sent: Mutex<Vec<(String, Vec<u8>)>>,
}

impl ScriptedTransport {
    fn new(options: TransportOptions, script: Script) -> Self {
        Self {
            options,
            script,
            starts: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            state: Mutex::new(Disconnected),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    fn hooks(&self) -> &TransportHooks {
        &self.options.hooks
    }

    /// Answers an authentication challenge the way a live connection would
    async fn reauthenticate(&self) -> Result<AccessToken, AuthFailure> {
        self.options.access_token.access_token().await
    }

    async fn dial(&self, attempt: usize) -> Result<(), TransportError> {
        self.options.access_token.access_token().await?;
        tokio::time::sleep(self.script.dial_time).await;

        if attempt < self.script.failures {
            return Err(TransportError::new("connection refused"));
        }

        *self.state.lock().unwrap() = Connected;
        Ok(())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn start(&self) -> Result<(), TransportError> {
        let attempt = self.starts.fetch_add(1, Ordering::SeqCst);
        let dialing = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(dialing, Ordering::SeqCst);

        let result = self.dial(attempt).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        *self.state.lock().unwrap() = Disconnected;
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    async fn send(&self, target: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push((target.to_owned(), payload));
        Ok(())
    }
}

#[derive(Debug)]
struct GiveUpAfter(u32);

impl ReconnectPolicy for GiveUpAfter {
    fn next_delay(&self, attempts: u32) -> Option<Duration> {
        (attempts < self.0).then(|| Duration::from_secs(1))
    }
}

fn settings() -> HubSettings {
    HubSettings {
        hub_url: Some("https://hub.example.com/hubs/inventory".into()),
        auth_url: Some("https://auth.example.com".into()),
        realm: Some("services".into()),
        client_id: Some("first".into()),
        client_secret: Some("one".into()),
    }
}

fn supervisor<P>(
    script: Script,
    exchange: &Arc<FakeExchange>,
    policy: P,
) -> ConnectionSupervisor<ScriptedTransport>
where
    P: ReconnectPolicy + 'static,
{
    ConnectionSupervisor::new(
        settings(),
        ClientCredentials::new(String::from("second"), String::from("two")),
        TokenSupplier::new(Arc::clone(exchange)),
        policy,
        move |options: TransportOptions| {
            Ok::<_, TransportError>(ScriptedTransport::new(options, script))
        },
    )
    .unwrap()
}

fn record<T: Transport, K>(
    supervisor: &ConnectionSupervisor<T, K>,
) -> Arc<Mutex<Vec<StateChange>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    supervisor.subscribe(move |change| sink.lock().unwrap().push(change));
    seen
}

fn change(previous: ConnectionState, current: ConnectionState) -> StateChange {
    StateChange { previous, current }
}

fn currents(seen: &Mutex<Vec<StateChange>>) -> Vec<ConnectionState> {
    seen.lock().unwrap().iter().map(|c| c.current).collect()
}

#[tokio::test(start_paused = true)]
async fn retries_initial_connection_on_short_schedule() -> Result<()> {
    let exchange = Arc::new(FakeExchange::default());
    let supervisor = supervisor(Script::failing(2), &exchange, TieredBackoff::default());
    let seen = record(&supervisor);

    let started = Instant::now();
    let handle = supervisor.start(CancellationToken::new())?;

    assert_eq!(handle.established().await, ConnectOutcome::Connected);
    assert_eq!(handle.outcome(), Some(ConnectOutcome::Connected));

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(4), "waited {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(30), "waited {:?}", elapsed);

    assert_eq!(supervisor.transport().starts(), 3);
    assert_eq!(currents(&seen), vec![Connecting, Connecting, Connecting, Connected]);
    assert_eq!(seen.lock().unwrap()[0], change(Disconnected, Connecting));
    assert_eq!(supervisor.state(), Connected);

    // The cached token was reused for every attempt
    assert_eq!(exchange.requests(), vec!["first"]);

    supervisor.stop().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_retry_wait() -> Result<()> {
    let exchange = Arc::new(FakeExchange::default());
    let supervisor = supervisor(Script::failing(usize::MAX), &exchange, TieredBackoff::default());
    let seen = record(&supervisor);

    let cancel = CancellationToken::new();
    let handle = supervisor.start(cancel.clone())?;

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(supervisor.transport().starts(), 1);

    let cancelled_at = Instant::now();
    cancel.cancel();

    assert_eq!(handle.established().await, ConnectOutcome::Cancelled);
    assert!(cancelled_at.elapsed() < Duration::from_secs(2));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(supervisor.transport().starts(), 1);
    assert_eq!(supervisor.transport().stops(), 1);
    assert_eq!(supervisor.state(), Disconnected);
    assert_eq!(currents(&seen), vec![Connecting]);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn no_notifications_after_stop() -> Result<()> {
    let exchange = Arc::new(FakeExchange::default());
    let supervisor = supervisor(Script::default(), &exchange, TieredBackoff::default());
    let seen = record(&supervisor);

    let handle = supervisor.start(CancellationToken::new())?;
    assert_eq!(handle.established().await, ConnectOutcome::Connected);

    supervisor.stop().await;
    assert_eq!(supervisor.transport().stops(), 1);

    supervisor
        .transport()
        .hooks()
        .reconnecting(Some(&TransportError::new("connection reset")));
    supervisor.transport().hooks().closed(None);
    supervisor.fire_status_update();

    assert_eq!(currents(&seen), vec![Connecting, Connected]);
    assert_eq!(supervisor.state(), Disconnected);

    assert!(matches!(
        supervisor.start(CancellationToken::new()),
        Err(SupervisorError::Stopped)
    ));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn every_handle_clone_sees_the_outcome() -> Result<()> {
    let exchange = Arc::new(FakeExchange::default());
    let supervisor = supervisor(Script::failing(1), &exchange, TieredBackoff::default());

    let handle = supervisor.start(CancellationToken::new())?;
    let observer = handle.clone();
    assert_eq!(observer.outcome(), None);

    let (first, second) = tokio::join!(handle.established(), observer.established());
    assert_eq!(first, ConnectOutcome::Connected);
    assert_eq!(second, ConnectOutcome::Connected);
    assert_eq!(handle.established().await, ConnectOutcome::Connected);

    supervisor.stop().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn start_twice_is_rejected() -> Result<()> {
    let exchange = Arc::new(FakeExchange::default());
    let supervisor = supervisor(Script::default(), &exchange, TieredBackoff::default());

    let handle = supervisor.start(CancellationToken::new())?;
    assert!(matches!(
        supervisor.start(CancellationToken::new()),
        Err(SupervisorError::AlreadyStarted)
    ));

    assert_eq!(handle.established().await, ConnectOutcome::Connected);
    assert_eq!(supervisor.transport().starts(), 1);

    supervisor.stop().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn reload_applies_on_next_challenge_without_reconnecting() -> Result<()> {
    let exchange = Arc::new(FakeExchange::default());
    let supervisor = supervisor(Script::default(), &exchange, TieredBackoff::default());
    let seen = record(&supervisor);

    let handle = supervisor.start(CancellationToken::new())?;
    assert_eq!(handle.established().await, ConnectOutcome::Connected);
    assert_eq!(exchange.requests(), vec!["first"]);

    supervisor.reload_client_credentials()?;

    let snapshot = supervisor.credentials();
    assert_eq!(snapshot.client_id().as_str(), "second");
    assert_eq!(snapshot.client_secret().as_str(), "two");
    assert!(snapshot.cached_token().is_none());

    let token = supervisor.transport().reauthenticate().await?;
    assert_eq!(supervisor.credentials().cached_token(), Some(&*token));
    assert_eq!(exchange.requests(), vec!["first", "second"]);

    supervisor.transport().reauthenticate().await?;
    assert_eq!(exchange.requests(), vec!["first", "second"]);

    assert_eq!(supervisor.transport().starts(), 1);
    assert_eq!(supervisor.transport().stops(), 0);
    assert_eq!(supervisor.state(), Connected);
    assert_eq!(currents(&seen), vec![Connecting, Connected]);

    supervisor.stop().await;
    Ok(())
}

#[tokio::test]
async fn missing_settings_fail_before_transport_is_built() {
    let built = AtomicUsize::new(0);
    let mut settings = settings();
    settings.realm = None;

    let result = ConnectionSupervisor::new(
        settings,
        ClientCredentials::new(String::from("second"), String::from("two")),
        TokenSupplier::new(FakeExchange::default()),
        TieredBackoff::default(),
        |_: TransportOptions| -> Result<ScriptedTransport, TransportError> {
            built.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::new("unexpected build"))
        },
    );

    assert!(matches!(
        result,
        Err(SupervisorError::Configuration(ConfigurationError::Missing("realm")))
    ));
    assert_eq!(built.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn transport_hooks_are_relayed_to_subscribers() -> Result<()> {
    let exchange = Arc::new(FakeExchange::default());
    let supervisor = supervisor(Script::default(), &exchange, TieredBackoff::default());
    let seen = record(&supervisor);

    let handle = supervisor.start(CancellationToken::new())?;
    assert_eq!(handle.established().await, ConnectOutcome::Connected);

    let hooks = supervisor.transport().hooks();
    hooks.reconnecting(Some(&TransportError::new("connection reset")));
    hooks.reconnected();
    hooks.closed(None);
    supervisor.fire_status_update();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            change(Disconnected, Connecting),
            change(Connecting, Connected),
            change(Connected, Reconnecting),
            change(Reconnecting, Connected),
            change(Connected, Disconnected),
            change(Disconnected, Disconnected),
        ]
    );

    supervisor.stop().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn subscriber_may_request_status_update() -> Result<()> {
    let exchange = Arc::new(FakeExchange::default());
    let supervisor = Arc::new(supervisor(Script::default(), &exchange, TieredBackoff::default()));
    let seen = record(&*supervisor);

    let weak = Arc::downgrade(&supervisor);
    supervisor.subscribe(move |change| {
        if change.current == Connected && change.previous != Connected {
            if let Some(supervisor) = weak.upgrade() {
                supervisor.fire_status_update();
            }
        }
    });

    let handle = supervisor.start(CancellationToken::new())?;
    assert_eq!(handle.established().await, ConnectOutcome::Connected);

    assert_eq!(currents(&seen), vec![Connecting, Connected, Connected]);
    assert_eq!(seen.lock().unwrap()[2], change(Connected, Connected));

    supervisor.stop().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn only_one_dial_in_flight() -> Result<()> {
    let exchange = Arc::new(FakeExchange::default());
    let supervisor = supervisor(
        Script {
            failures: 4,
            dial_time: Duration::from_secs(3),
        },
        &exchange,
        TieredBackoff::new(10, Duration::from_millis(100), Duration::from_secs(30)),
    );

    let handle = supervisor.start(CancellationToken::new())?;
    assert_eq!(handle.established().await, ConnectOutcome::Connected);

    let transport = supervisor.transport();
    assert_eq!(transport.starts(), 5);
    assert_eq!(transport.max_in_flight.load(Ordering::SeqCst), 1);

    supervisor.stop().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn token_failures_are_retried() -> Result<()> {
    let exchange = Arc::new(FakeExchange::failing(1));
    let supervisor = supervisor(Script::default(), &exchange, TieredBackoff::default());
    let seen = record(&supervisor);

    let handle = supervisor.start(CancellationToken::new())?;
    assert_eq!(handle.established().await, ConnectOutcome::Connected);

    assert_eq!(exchange.requests(), vec!["first", "first"]);
    assert_eq!(supervisor.transport().starts(), 2);
    assert_eq!(currents(&seen), vec![Connecting, Connecting, Connected]);

    supervisor.stop().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn policy_may_give_up() -> Result<()> {
    let exchange = Arc::new(FakeExchange::default());
    let supervisor = supervisor(Script::failing(usize::MAX), &exchange, GiveUpAfter(2));
    let seen = record(&supervisor);

    let handle = supervisor.start(CancellationToken::new())?;
    assert_eq!(handle.established().await, ConnectOutcome::GaveUp);

    assert_eq!(supervisor.transport().starts(), 3);
    assert_eq!(currents(&seen), vec![Connecting, Connecting, Connecting, Disconnected]);

    supervisor.stop().await;
    Ok(())
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct StockLevel {
    sku: String,
    on_hand: u32,
}

#[tokio::test(start_paused = true)]
async fn send_encodes_with_message_pack() -> Result<()> {
    let exchange = Arc::new(FakeExchange::default());
    let supervisor = supervisor(Script::default(), &exchange, TieredBackoff::default());

    let handle = supervisor.start(CancellationToken::new())?;
    handle.established().await;

    let level = StockLevel {
        sku: "A-1".into(),
        on_hand: 4,
    };
    supervisor.send("ReportStock", &level).await?;

    let sent = supervisor.transport().sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "ReportStock");

    let decoded: StockLevel = MessagePackCodec.decode(&sent[0].1)?;
    assert_eq!(decoded, level);

    supervisor.stop().await;
    Ok(())
}

//! Tests of the agent's connect/announce/retry state machine, driven with
//! fake collaborators under paused time so waits are observed exactly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use beacon_agent::{
    Agent, AgentError, AgentOptions, AgentState, Announce, AnnounceError, DnsError, DnsSync,
    TunnelError, TunnelProvider,
};

type EventLog = Arc<Mutex<Vec<&'static str>>>;

fn record(events: &EventLog, event: &'static str) {
    events.lock().unwrap().push(event);
}

fn count(events: &EventLog, event: &str) -> usize {
    events.lock().unwrap().iter().filter(|e| **e == event).count()
}

struct FakeProvider {
    events: EventLog,
    fail_connect: bool,
    connects: AtomicUsize,
}

impl FakeProvider {
    fn new(events: EventLog) -> Self {
        Self {
            events,
            fail_connect: false,
            connects: AtomicUsize::new(0),
        }
    }

    fn failing(events: EventLog) -> Self {
        Self {
            fail_connect: true,
            ..Self::new(events)
        }
    }
}

#[async_trait]
impl TunnelProvider for &FakeProvider {
    async fn connect(&self, local_port: u16) -> Result<String, TunnelError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        record(&self.events, "connect");
        if self.fail_connect {
            Err(TunnelError::Timeout(Duration::from_secs(30)))
        } else {
            Ok(format!("https://tunnel.example:{local_port}"))
        }
    }

    async fn disconnect(&self, _public_url: &str) -> Result<(), TunnelError> {
        record(&self.events, "disconnect");
        Ok(())
    }
}

struct FakeAnnouncer {
    events: EventLog,
    failures_left: AtomicUsize,
    fail_withdraw: bool,
}

impl FakeAnnouncer {
    fn new(events: EventLog) -> Self {
        Self {
            events,
            failures_left: AtomicUsize::new(0),
            fail_withdraw: false,
        }
    }

    fn failing_times(events: EventLog, failures: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(failures),
            ..Self::new(events)
        }
    }
}

#[async_trait]
impl Announce for &FakeAnnouncer {
    async fn announce(&self, _public_url: &str) -> Result<(), AnnounceError> {
        record(&self.events, "announce");
        if self.failures_left.load(Ordering::SeqCst) > 0 {
            self.failures_left.fetch_sub(1, Ordering::SeqCst);
            Err(AnnounceError::Status(503))
        } else {
            Ok(())
        }
    }

    async fn withdraw(&self) -> Result<(), AnnounceError> {
        record(&self.events, "withdraw");
        if self.fail_withdraw {
            Err(AnnounceError::Status(503))
        } else {
            Ok(())
        }
    }
}

struct FakeDns {
    events: EventLog,
    failures_left: AtomicUsize,
}

impl FakeDns {
    fn failing_times(events: EventLog, failures: usize) -> Self {
        Self {
            events,
            failures_left: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl DnsSync for &FakeDns {
    async fn sync(&self) -> Result<(), DnsError> {
        record(&self.events, "dns");
        if self.failures_left.load(Ordering::SeqCst) > 0 {
            self.failures_left.fetch_sub(1, Ordering::SeqCst);
            Err(DnsError::Rejected("KO".to_string()))
        } else {
            Ok(())
        }
    }
}

fn options() -> AgentOptions {
    AgentOptions::new(8000)
}

#[tokio::test(start_paused = true)]
async fn connects_announces_and_reaches_steady() {
    let events: EventLog = Default::default();
    let provider = FakeProvider::new(events.clone());
    let announcer = FakeAnnouncer::new(events.clone());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut agent =
        Agent::new(&provider, &announcer, None::<&FakeDns>, options(), shutdown_rx);

    assert_eq!(agent.state(), AgentState::Idle);
    agent.step().await.unwrap();
    assert_eq!(agent.state(), AgentState::Connecting);
    agent.step().await.unwrap();
    assert_eq!(agent.state(), AgentState::Announcing);
    assert_eq!(
        agent.session().public_url.as_deref(),
        Some("https://tunnel.example:8000")
    );
    agent.step().await.unwrap();
    assert_eq!(agent.state(), AgentState::Steady);
    assert!(agent.session().last_announce_ok);
    assert_eq!(agent.session().last_dns_ok, None);
    assert_eq!(*events.lock().unwrap(), vec!["connect", "announce"]);
}

#[tokio::test(start_paused = true)]
async fn three_announce_failures_mean_exactly_three_waits() {
    let events: EventLog = Default::default();
    let provider = FakeProvider::new(events.clone());
    let announcer = FakeAnnouncer::failing_times(events.clone(), 3);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut agent =
        Agent::new(&provider, &announcer, None::<&FakeDns>, options(), shutdown_rx);
    agent.step().await.unwrap(); // Idle -> Connecting
    agent.step().await.unwrap(); // Connecting -> Announcing

    let start = tokio::time::Instant::now();
    while agent.state() != AgentState::Steady {
        agent.step().await.unwrap();
    }

    // Three failures, three full fail_retry_timeout waits, then Steady.
    assert_eq!(start.elapsed(), Duration::from_secs(30));
    assert_eq!(count(&events, "announce"), 4);
    // The working tunnel was never torn down or re-fetched.
    assert_eq!(provider.connects.load(Ordering::SeqCst), 1);
    assert_eq!(count(&events, "disconnect"), 0);
}

#[tokio::test(start_paused = true)]
async fn first_connect_failure_is_fatal_and_not_retried() {
    let events: EventLog = Default::default();
    let provider = FakeProvider::failing(events.clone());
    let announcer = FakeAnnouncer::new(events.clone());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let agent = Agent::new(&provider, &announcer, None::<&FakeDns>, options(), shutdown_rx);
    let err = agent.run().await.unwrap_err();

    assert!(matches!(err, AgentError::TunnelEstablish(_)));
    assert_eq!(provider.connects.load(Ordering::SeqCst), 1);
    // The retry loop was never entered.
    assert_eq!(count(&events, "announce"), 0);
    assert_eq!(count(&events, "withdraw"), 0);
}

#[tokio::test(start_paused = true)]
async fn dns_failure_retries_without_refetching_tunnel() {
    let events: EventLog = Default::default();
    let provider = FakeProvider::new(events.clone());
    let announcer = FakeAnnouncer::new(events.clone());
    let dns = FakeDns::failing_times(events.clone(), 1);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut agent = Agent::new(&provider, &announcer, Some(&dns), options(), shutdown_rx);
    agent.step().await.unwrap();
    agent.step().await.unwrap();

    // Announce succeeds but DNS fails: same retry path as an announce failure.
    agent.step().await.unwrap();
    assert_eq!(agent.state(), AgentState::Retrying);
    assert_eq!(agent.session().last_dns_ok, Some(false));

    let start = tokio::time::Instant::now();
    agent.step().await.unwrap();
    assert_eq!(agent.state(), AgentState::Announcing);
    assert_eq!(start.elapsed(), Duration::from_secs(10));

    agent.step().await.unwrap();
    assert_eq!(agent.state(), AgentState::Steady);
    assert_eq!(agent.session().last_dns_ok, Some(true));

    assert_eq!(provider.connects.load(Ordering::SeqCst), 1);
    assert_eq!(count(&events, "announce"), 2);
    assert_eq!(count(&events, "dns"), 2);
}

#[tokio::test(start_paused = true)]
async fn steady_state_reannounces_after_success_timeout() {
    let events: EventLog = Default::default();
    let provider = FakeProvider::new(events.clone());
    let announcer = FakeAnnouncer::new(events.clone());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut agent =
        Agent::new(&provider, &announcer, None::<&FakeDns>, options(), shutdown_rx);
    while agent.state() != AgentState::Steady {
        agent.step().await.unwrap();
    }

    let start = tokio::time::Instant::now();
    agent.step().await.unwrap();
    assert_eq!(agent.state(), AgentState::Announcing);
    assert_eq!(start.elapsed(), Duration::from_secs(3600));

    agent.step().await.unwrap();
    assert_eq!(agent.state(), AgentState::Steady);
    assert_eq!(count(&events, "announce"), 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_the_wait_and_withdraws_once() {
    let events: EventLog = Default::default();
    let provider = FakeProvider::new(events.clone());
    let announcer = FakeAnnouncer::new(events.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut agent =
        Agent::new(&provider, &announcer, None::<&FakeDns>, options(), shutdown_rx);
    while agent.state() != AgentState::Steady {
        agent.step().await.unwrap();
    }

    shutdown_tx.send(true).unwrap();

    // The success_timeout wait is abandoned immediately, not waited out.
    let start = tokio::time::Instant::now();
    agent.step().await.unwrap();
    assert_eq!(agent.state(), AgentState::Disconnecting);
    assert_eq!(start.elapsed(), Duration::ZERO);

    agent.step().await.unwrap();
    assert_eq!(agent.state(), AgentState::Stopped);

    // Exactly one withdraw, sent before the tunnel teardown.
    assert_eq!(count(&events, "withdraw"), 1);
    let log = events.lock().unwrap();
    let tail: Vec<_> = log[log.len() - 2..].to_vec();
    assert_eq!(tail, vec!["withdraw", "disconnect"]);
}

#[tokio::test(start_paused = true)]
async fn failed_withdraw_does_not_block_shutdown() {
    let events: EventLog = Default::default();
    let provider = FakeProvider::new(events.clone());
    let mut announcer = FakeAnnouncer::new(events.clone());
    announcer.fail_withdraw = true;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut agent =
        Agent::new(&provider, &announcer, None::<&FakeDns>, options(), shutdown_rx);
    while agent.state() != AgentState::Steady {
        agent.step().await.unwrap();
    }

    shutdown_tx.send(true).unwrap();
    agent.step().await.unwrap(); // Steady -> Disconnecting
    agent.step().await.unwrap(); // Disconnecting -> Stopped

    assert_eq!(agent.state(), AgentState::Stopped);
    assert_eq!(count(&events, "withdraw"), 1);
    assert_eq!(count(&events, "disconnect"), 1);
}

#[tokio::test(start_paused = true)]
async fn run_stops_cleanly_on_shutdown_signal() {
    let events: EventLog = Default::default();
    let provider = Arc::new(FakeProvider::new(events.clone()));
    let announcer = Arc::new(FakeAnnouncer::new(events.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    struct ArcProvider(Arc<FakeProvider>);
    #[async_trait]
    impl TunnelProvider for ArcProvider {
        async fn connect(&self, local_port: u16) -> Result<String, TunnelError> {
            (&*self.0).connect(local_port).await
        }
        async fn disconnect(&self, public_url: &str) -> Result<(), TunnelError> {
            (&*self.0).disconnect(public_url).await
        }
    }
    struct ArcAnnouncer(Arc<FakeAnnouncer>);
    #[async_trait]
    impl Announce for ArcAnnouncer {
        async fn announce(&self, public_url: &str) -> Result<(), AnnounceError> {
            (&*self.0).announce(public_url).await
        }
        async fn withdraw(&self) -> Result<(), AnnounceError> {
            (&*self.0).withdraw().await
        }
    }

    struct NeverDns;
    #[async_trait]
    impl DnsSync for NeverDns {
        async fn sync(&self) -> Result<(), DnsError> {
            unreachable!("dns disabled")
        }
    }

    let agent = Agent::new(
        ArcProvider(provider.clone()),
        ArcAnnouncer(announcer.clone()),
        None::<NeverDns>,
        options(),
        shutdown_rx,
    );
    let handle = tokio::spawn(agent.run());

    // Let the agent get going, then request shutdown.
    tokio::time::sleep(Duration::from_millis(10)).await;
    shutdown_tx.send(true).unwrap();

    handle.await.unwrap().unwrap();
    assert_eq!(count(&events, "withdraw"), 1);
    assert_eq!(count(&events, "disconnect"), 1);
}

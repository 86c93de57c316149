//! The agent's connect/announce/retry state machine.
//!
//! Modeled as an explicit stepwise machine rather than an unstructured loop:
//! `step()` performs exactly one transition, `run()` loops until `Stopped`.
//! The only suspension points are the two interruptible waits (`Retrying` and
//! `Steady`); a shutdown signal observed there or between steps routes
//! straight to `Disconnecting` without waiting out the timer.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::announce::Announce;
use crate::dns::DnsSync;
use crate::provider::{TunnelError, TunnelProvider};

/// Lifecycle states of the tunnel agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    /// Establishing the tunnel. Failure here is fatal, not retried.
    Connecting,
    /// Sending the target update (and DNS sync, if configured).
    Announcing,
    /// Waiting out `fail_retry_timeout` after a failed announce or DNS sync.
    Retrying,
    /// Everything correct; waiting out `success_timeout` before re-announcing.
    Steady,
    /// Shutdown: best-effort withdraw, then tunnel teardown.
    Disconnecting,
    Stopped,
}

/// Per-session bookkeeping, published to observers on every change.
///
/// Never persisted: each restart re-establishes a tunnel and re-announces,
/// which is how the protocol converges from any starting state.
#[derive(Debug, Clone, Default)]
pub struct TunnelSession {
    /// Last URL obtained from the tunnel provider.
    pub public_url: Option<String>,
    /// Whether the most recent announce succeeded.
    pub last_announce_ok: bool,
    /// Whether the most recent DNS sync succeeded; `None` if DNS is disabled.
    pub last_dns_ok: Option<bool>,
}

/// Errors that terminate the agent.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Initial tunnel establishment failed. Treated as a configuration
    /// error: a broken credential or unreachable tunnel service will not be
    /// fixed by retrying.
    #[error("failed to establish tunnel: {0}")]
    TunnelEstablish(#[from] TunnelError),
}

/// Timing and port options for one agent run.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Local port to expose through the tunnel.
    pub local_port: u16,
    /// Wait between retries of a failed announce or DNS sync.
    pub fail_retry_timeout: Duration,
    /// Wait between proactive re-announcements while steady.
    pub success_timeout: Duration,
}

impl AgentOptions {
    pub fn new(local_port: u16) -> Self {
        Self {
            local_port,
            fail_retry_timeout: Duration::from_secs(10),
            success_timeout: Duration::from_secs(3600),
        }
    }
}

/// The tunnel agent: orchestrates provider, announcer, and optional DNS
/// syncer in one sequential control loop. At most one outbound call is in
/// flight at any time.
pub struct Agent<P, A, D> {
    provider: P,
    announcer: A,
    dns: Option<D>,
    opts: AgentOptions,
    state: AgentState,
    session: TunnelSession,
    shutdown_rx: watch::Receiver<bool>,
    session_tx: Option<watch::Sender<TunnelSession>>,
}

impl<P, A, D> Agent<P, A, D>
where
    P: TunnelProvider,
    A: Announce,
    D: DnsSync,
{
    pub fn new(
        provider: P,
        announcer: A,
        dns: Option<D>,
        opts: AgentOptions,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            provider,
            announcer,
            dns,
            opts,
            state: AgentState::Idle,
            session: TunnelSession::default(),
            shutdown_rx,
            session_tx: None,
        }
    }

    /// Publish session snapshots (for status rendering) on `tx`.
    pub fn with_session_watch(mut self, tx: watch::Sender<TunnelSession>) -> Self {
        self.session_tx = Some(tx);
        self
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn session(&self) -> &TunnelSession {
        &self.session
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    fn publish(&self) {
        if let Some(tx) = &self.session_tx {
            let _ = tx.send(self.session.clone());
        }
    }

    /// Sleep for `duration`, or less if shutdown arrives. Returns `false`
    /// when the wait was interrupted.
    async fn interruptible_sleep(&mut self, duration: Duration) -> bool {
        let sleep = tokio::time::sleep(duration);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                changed = self.shutdown_rx.changed() => match changed {
                    Ok(()) if *self.shutdown_rx.borrow() => return false,
                    Ok(()) => continue,
                    // Sender gone: nobody can ever request shutdown cleanly
                    // again, so treat it as one.
                    Err(_) => return false,
                },
            }
        }
    }

    /// Perform exactly one state transition.
    pub async fn step(&mut self) -> Result<(), AgentError> {
        match self.state {
            AgentState::Idle => {
                self.state = AgentState::Connecting;
            }

            AgentState::Connecting => match self.provider.connect(self.opts.local_port).await {
                Ok(public_url) => {
                    info!(url = %public_url, "Tunnel connected");
                    self.session.public_url = Some(public_url);
                    self.publish();
                    self.state = AgentState::Announcing;
                }
                Err(e) => {
                    error!("Failed to establish tunnel: {}", e);
                    self.state = AgentState::Stopped;
                    return Err(e.into());
                }
            },

            AgentState::Announcing => {
                let Some(public_url) = self.session.public_url.clone() else {
                    // Tunnel URL lost; re-establish.
                    self.state = AgentState::Connecting;
                    return Ok(());
                };

                match self.announcer.announce(&public_url).await {
                    Ok(()) => {
                        self.session.last_announce_ok = true;
                        info!(url = %public_url, "Redirect server updated");
                        self.state = match self.sync_dns().await {
                            true => AgentState::Steady,
                            false => AgentState::Retrying,
                        };
                        self.publish();
                    }
                    Err(e) => {
                        self.session.last_announce_ok = false;
                        self.publish();
                        warn!(
                            retry_in = ?self.opts.fail_retry_timeout,
                            "Failed to update redirect server: {}", e
                        );
                        self.state = AgentState::Retrying;
                    }
                }
            }

            AgentState::Retrying => {
                // Only the failing step is retried; the tunnel stays up.
                self.state = if self.interruptible_sleep(self.opts.fail_retry_timeout).await {
                    AgentState::Announcing
                } else {
                    AgentState::Disconnecting
                };
            }

            AgentState::Steady => {
                // Some tunnel/DNS backends silently expire bindings, so
                // re-announce on a timer even without a detected fault.
                self.state = if self.interruptible_sleep(self.opts.success_timeout).await {
                    info!("Re-announcing");
                    AgentState::Announcing
                } else {
                    AgentState::Disconnecting
                };
            }

            AgentState::Disconnecting => {
                // One fire-and-forget withdraw so stale visitors see the
                // maintenance page instead of a dead tunnel URL.
                if let Err(e) = self.announcer.withdraw().await {
                    warn!("Failed to withdraw announce during shutdown: {}", e);
                }
                if let Some(public_url) = self.session.public_url.take() {
                    if let Err(e) = self.provider.disconnect(&public_url).await {
                        warn!("Failed to tear down tunnel: {}", e);
                    }
                }
                self.session.last_announce_ok = false;
                self.publish();
                self.state = AgentState::Stopped;
                info!("Agent stopped");
            }

            AgentState::Stopped => {}
        }

        Ok(())
    }

    /// Run the DNS sync step, if configured. Returns whether the stable
    /// address is fully correct.
    async fn sync_dns(&mut self) -> bool {
        let Some(dns) = &self.dns else {
            return true;
        };
        match dns.sync().await {
            Ok(()) => {
                self.session.last_dns_ok = Some(true);
                true
            }
            Err(e) => {
                self.session.last_dns_ok = Some(false);
                warn!(
                    retry_in = ?self.opts.fail_retry_timeout,
                    "Failed to update DNS: {}", e
                );
                false
            }
        }
    }

    /// Drive the state machine to completion. Returns when the agent reaches
    /// `Stopped` after a shutdown signal, or with an error on fatal tunnel
    /// establishment failure.
    pub async fn run(mut self) -> Result<(), AgentError> {
        while self.state != AgentState::Stopped {
            if self.shutdown_requested()
                && !matches!(
                    self.state,
                    AgentState::Disconnecting | AgentState::Stopped
                )
            {
                info!("Shutdown requested");
                self.state = AgentState::Disconnecting;
            }
            self.step().await?;
        }
        Ok(())
    }
}

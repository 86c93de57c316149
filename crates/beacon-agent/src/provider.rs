//! Tunnel provider: the external capability that exposes a local port under a
//! public URL.
//!
//! The agent only depends on the [`TunnelProvider`] trait; the shipped
//! implementation drives a local ngrok process and reads the public URL from
//! ngrok's local agent API.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Errors from tunnel establishment and teardown.
///
/// A connect failure is treated by the agent as a configuration error (bad
/// credential, missing binary, unreachable tunnel service), not a transient
/// fault: it is fatal and never retried.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("ngrok binary not found; set ngrok_path or install ngrok on PATH")]
    BinaryNotFound,

    #[error("failed to spawn ngrok: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("tunnel agent API request failed: {0}")]
    Api(#[from] reqwest::Error),

    #[error("tunnel did not come up within {0:?}")]
    Timeout(Duration),
}

/// Capability that exposes a local port under a public URL.
#[async_trait]
pub trait TunnelProvider: Send + Sync {
    /// Establish the tunnel and return its fully schema-qualified public URL.
    async fn connect(&self, local_port: u16) -> Result<String, TunnelError>;

    /// Tear the tunnel down.
    async fn disconnect(&self, public_url: &str) -> Result<(), TunnelError>;
}

/// Configuration for the ngrok-backed provider.
#[derive(Debug, Clone)]
pub struct NgrokSettings {
    /// Explicit path to the ngrok binary. `None` means search PATH.
    pub binary: Option<PathBuf>,
    /// Tunnel protocol passed to ngrok (http, tcp, tls).
    pub protocol: String,
    /// Auth token passed on the command line, if any.
    pub auth_token: Option<String>,
    /// Base address of ngrok's local agent API.
    pub api_addr: String,
    /// How long to wait for the tunnel to report a public URL.
    pub startup_timeout: Duration,
}

impl Default for NgrokSettings {
    fn default() -> Self {
        Self {
            binary: None,
            protocol: "http".to_string(),
            auth_token: None,
            api_addr: "http://127.0.0.1:4040".to_string(),
            startup_timeout: Duration::from_secs(30),
        }
    }
}

/// Tunnel provider backed by a locally spawned ngrok process.
pub struct NgrokProvider {
    settings: NgrokSettings,
    client: reqwest::Client,
    child: Mutex<Option<Child>>,
}

/// Search PATH (plus the working directory) for the ngrok executable.
fn find_binary() -> Option<PathBuf> {
    let exe = if cfg!(windows) { "ngrok.exe" } else { "ngrok" };
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .chain(std::iter::once(PathBuf::from(".")))
        .map(|dir| dir.join(exe))
        .find(|candidate| candidate.is_file())
}

impl NgrokProvider {
    pub fn new(settings: NgrokSettings) -> Self {
        Self {
            settings,
            client: reqwest::Client::new(),
            child: Mutex::new(None),
        }
    }

    /// Ask the local agent API for the current public URL, preferring the
    /// https endpoint when ngrok reports both.
    async fn query_public_url(&self) -> Result<Option<String>, reqwest::Error> {
        let url = format!("{}/api/tunnels", self.settings.api_addr);
        let body: serde_json::Value = self.client.get(&url).send().await?.json().await?;

        let public_url = body
            .get("tunnels")
            .and_then(|tunnels| tunnels.as_array())
            .and_then(|tunnels| {
                tunnels
                    .iter()
                    .filter_map(|tunnel| tunnel.get("public_url").and_then(|u| u.as_str()))
                    .max_by_key(|u| u.starts_with("https://"))
                    .map(|u| u.to_string())
            });

        Ok(public_url)
    }

    async fn stop_child(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                warn!("Failed to stop ngrok process: {}", e);
            }
        }
    }
}

#[async_trait]
impl TunnelProvider for NgrokProvider {
    async fn connect(&self, local_port: u16) -> Result<String, TunnelError> {
        let binary = self
            .settings
            .binary
            .clone()
            .or_else(find_binary)
            .ok_or(TunnelError::BinaryNotFound)?;

        debug!("Starting ngrok: {}", binary.display());
        let mut cmd = Command::new(&binary);
        cmd.arg(&self.settings.protocol)
            .arg(local_port.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(token) = &self.settings.auth_token {
            cmd.arg("--authtoken").arg(token);
        }

        let child = cmd.spawn().map_err(TunnelError::Spawn)?;
        *self.child.lock().await = Some(child);

        // The agent API needs a moment to come up; poll it until the tunnel
        // reports a public URL or the deadline passes.
        let deadline = tokio::time::Instant::now() + self.settings.startup_timeout;
        loop {
            tokio::time::sleep(Duration::from_millis(500)).await;

            match self.query_public_url().await {
                Ok(Some(url)) => {
                    let url = beacon_proto::force_scheme(&url, true);
                    info!("Tunnel established: {}", url);
                    return Ok(url);
                }
                Ok(None) => debug!("Tunnel not ready yet"),
                Err(e) => debug!("Tunnel agent API not reachable yet: {}", e),
            }

            if tokio::time::Instant::now() >= deadline {
                self.stop_child().await;
                return Err(TunnelError::Timeout(self.settings.startup_timeout));
            }
        }
    }

    async fn disconnect(&self, public_url: &str) -> Result<(), TunnelError> {
        info!("Stopping tunnel {}", public_url);
        self.stop_child().await;
        Ok(())
    }
}

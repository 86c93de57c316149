//! Announcer: tells the redirect server where the tunnel currently lives.
//!
//! A pure request-builder plus one outbound call. Retry policy lives in the
//! agent state machine, never here.

use async_trait::async_trait;
use tracing::debug;

use beacon_proto::UpdateField;

/// Classification of a failed announce.
#[derive(Debug, thiserror::Error)]
pub enum AnnounceError {
    #[error("redirect server returned status {0}")]
    Status(u16),

    #[error("announce request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid redirect server address: {0}")]
    BadServerAddress(#[from] url::ParseError),
}

/// One-shot target updates toward the redirect server.
#[async_trait]
pub trait Announce: Send + Sync {
    /// Point the redirect server at `public_url`.
    async fn announce(&self, public_url: &str) -> Result<(), AnnounceError>;

    /// Explicitly unset the target. Sent best-effort during shutdown so stale
    /// visitors get the maintenance page instead of a dead tunnel URL.
    async fn withdraw(&self) -> Result<(), AnnounceError>;
}

/// Announcer speaking the update protocol over HTTP.
pub struct HttpAnnouncer {
    client: reqwest::Client,
    server: String,
    https: bool,
    secret: String,
}

impl HttpAnnouncer {
    /// `server` is the redirect server's base address (`host:port`), scheme
    /// optional; `https` decides the scheme when none is given.
    pub fn new(server: impl Into<String>, https: bool, secret: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            server: server.into(),
            https,
            secret: secret.into(),
        }
    }

    async fn send(&self, value: &str) -> Result<(), AnnounceError> {
        let url = beacon_proto::update_url(
            &self.server,
            self.https,
            UpdateField::Target,
            &self.secret,
            value,
        )?;

        let response = self.client.get(url).send().await?;
        let status = response.status();
        debug!(%status, "Update endpoint answered");
        if status.is_success() {
            Ok(())
        } else {
            Err(AnnounceError::Status(status.as_u16()))
        }
    }
}

#[async_trait]
impl Announce for HttpAnnouncer {
    async fn announce(&self, public_url: &str) -> Result<(), AnnounceError> {
        self.send(public_url).await
    }

    async fn withdraw(&self) -> Result<(), AnnounceError> {
        self.send("").await
    }
}

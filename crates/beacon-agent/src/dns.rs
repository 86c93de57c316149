//! Optional dynamic-DNS sync: repoints a DNS hostname at the redirect
//! server's address.
//!
//! Like the announcer this is a request-builder plus one idempotent call; its
//! failures are routed into the same retry policy as announce failures.

use std::net::SocketAddr;

use async_trait::async_trait;
use tracing::{debug, info};

/// Classification of a failed DNS sync.
#[derive(Debug, thiserror::Error)]
pub enum DnsError {
    #[error("failed to resolve redirect server address: {0}")]
    Resolve(#[source] std::io::Error),

    #[error("redirect server has no IPv4 address")]
    NoIpv4,

    #[error("dns provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("dns provider rejected the update: {0:?}")]
    Rejected(String),
}

/// One idempotent "set domain -> IP" call toward a dynamic-DNS provider.
#[async_trait]
pub trait DnsSync: Send + Sync {
    async fn sync(&self) -> Result<(), DnsError>;
}

/// DuckDNS syncer: points `<domain>.duckdns.org` at the redirect server.
pub struct DuckDnsSyncer {
    client: reqwest::Client,
    domain: String,
    token: String,
    /// Redirect server address to resolve (`host`, `port`).
    server_host: String,
    server_port: u16,
    endpoint: String,
}

impl DuckDnsSyncer {
    pub fn new(
        domain: impl Into<String>,
        token: impl Into<String>,
        server_host: impl Into<String>,
        server_port: u16,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            domain: domain.into(),
            token: token.into(),
            server_host: server_host.into(),
            server_port,
            endpoint: "https://www.duckdns.org".to_string(),
        }
    }

    async fn resolve_server_ipv4(&self) -> Result<SocketAddr, DnsError> {
        let addrs = tokio::net::lookup_host((self.server_host.as_str(), self.server_port))
            .await
            .map_err(DnsError::Resolve)?;
        addrs
            .into_iter()
            .find(|addr| addr.is_ipv4())
            .ok_or(DnsError::NoIpv4)
    }
}

#[async_trait]
impl DnsSync for DuckDnsSyncer {
    async fn sync(&self) -> Result<(), DnsError> {
        let server_addr = self.resolve_server_ipv4().await?;
        debug!(ip = %server_addr.ip(), domain = %self.domain, "Updating DuckDNS domain");

        let url = format!(
            "{}/update?domains={}&token={}&ip={}",
            self.endpoint,
            self.domain,
            self.token,
            server_addr.ip()
        );
        let body = self.client.get(&url).send().await?.text().await?;

        // DuckDNS acknowledges with a bare "OK"; anything else is a rejection.
        if body == "OK" {
            info!(domain = %self.domain, "DuckDNS domain updated");
            Ok(())
        } else {
            Err(DnsError::Rejected(body))
        }
    }
}

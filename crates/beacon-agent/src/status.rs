//! Diagnostics: renders the forwarding chain with per-hop reachability.
//!
//! Produces a line like
//! `mysite.duckdns.org -> redirect.example.com:8080 -> https://abc.ngrok.io -> 127.0.0.1:8000`
//! with each hop colored by whether it currently answers. Probes are only run
//! on demand (startup, steady transitions), never on the agent's hot path.

use std::time::Duration;

use colored::Colorize;

use beacon_proto::ensure_scheme;

/// One hop of the forwarding chain.
#[derive(Debug, Clone)]
pub struct Hop {
    pub label: String,
    /// Probe URL; `None` renders the hop as down without probing (e.g. the
    /// tunnel before it is connected).
    pub probe: Option<String>,
}

impl Hop {
    pub fn new(label: impl Into<String>, probe: impl Into<String>) -> Self {
        let probe = probe.into();
        Self {
            label: label.into(),
            probe: Some(probe),
        }
    }

    pub fn down(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            probe: None,
        }
    }
}

/// Builds the standard chain: DNS host (optional) -> redirect server ->
/// tunnel -> local server.
pub fn forwarding_chain(
    dns_domain: Option<&str>,
    server: &str,
    server_https: bool,
    tunnel_url: Option<&str>,
    local_port: u16,
) -> Vec<Hop> {
    let mut hops = Vec::new();
    if let Some(domain) = dns_domain {
        let url = ensure_scheme(&format!("{domain}.duckdns.org"), true);
        hops.push(Hop::new(url.clone(), url));
    }
    let server_url = ensure_scheme(server, server_https);
    hops.push(Hop::new(server_url.clone(), server_url));
    match tunnel_url {
        Some(url) => hops.push(Hop::new(url, url)),
        None => hops.push(Hop::down("tunnel")),
    }
    let local = ensure_scheme(&format!("127.0.0.1:{local_port}"), false);
    hops.push(Hop::new(local.clone(), local));
    hops
}

/// Probes hops and renders the chain.
pub struct ChainStatus {
    client: reqwest::Client,
}

impl Default for ChainStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainStatus {
    pub fn new() -> Self {
        // Short timeout: this is a diagnostic, not a health check.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// A hop is up when it answers with any status below 400.
    async fn is_up(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(response) => response.status().as_u16() < 400,
            Err(_) => false,
        }
    }

    pub async fn render(&self, hops: &[Hop]) -> String {
        let mut parts = Vec::with_capacity(hops.len());
        for hop in hops {
            let up = match &hop.probe {
                Some(url) => self.is_up(url).await,
                None => false,
            };
            let label = if up {
                hop.label.bright_yellow().bold()
            } else {
                hop.label.bright_red().bold()
            };
            parts.push(label.to_string());
        }
        let arrow = format!(" {} ", "->".bright_black());
        parts.join(&arrow)
    }
}

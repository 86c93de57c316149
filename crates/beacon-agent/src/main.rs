//! Beacon tunnel agent binary.
//!
//! Establishes the tunnel, then keeps the redirect server (and optionally a
//! DuckDNS domain) pointed at its public URL until shut down.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use beacon_agent::config::{exit, AgentSettings, DuckDnsSettings};
use beacon_agent::status::{forwarding_chain, ChainStatus};
use beacon_agent::{
    Agent, AgentOptions, DuckDnsSyncer, HttpAnnouncer, NgrokProvider, NgrokSettings, TunnelSession,
};

/// Beacon tunnel agent - keeps a stable address pointed at your tunnel
#[derive(Parser, Debug)]
#[command(name = "beacon-agent")]
#[command(about = "Establishes a tunnel and announces its public URL to beacon-server")]
#[command(version)]
#[command(long_about = r#"
The agent exposes a local port through an ngrok tunnel, discovers the
tunnel's public URL, and announces it to the beacon redirect server so the
stable address always forwards to the live tunnel endpoint. Optionally it
also repoints a DuckDNS domain at the redirect server.

EXAMPLES:
  # Announce a local web server to a redirect server
  beacon-agent --server redirect.example.com --secret $BEACON_SECRET \
    --local-port 8000

  # Start from a config file
  beacon-agent --config agent.yaml

ENVIRONMENT VARIABLES:
  BEACON_SERVER      Redirect server host
  BEACON_SECRET      Shared secret for the update endpoint
  NGROK_AUTH_TOKEN   ngrok auth token
  DUCKDNS_TOKEN      DuckDNS token
"#)]
struct Args {
    /// Redirect server host (no scheme)
    #[arg(long, env = "BEACON_SERVER")]
    server: Option<String>,

    /// Redirect server port
    #[arg(long, env = "BEACON_SERVER_PORT")]
    server_port: Option<u16>,

    /// Reach the redirect server over plain HTTP instead of HTTPS
    #[arg(long)]
    server_http: bool,

    /// Shared secret for the update endpoint
    #[arg(long, env = "BEACON_SECRET")]
    secret: Option<String>,

    /// Local port to expose through the tunnel
    #[arg(long, env = "BEACON_LOCAL_PORT")]
    local_port: Option<u16>,

    /// Tunnel protocol (http, tcp, tls)
    #[arg(long)]
    protocol: Option<String>,

    /// Explicit path to the ngrok binary
    #[arg(long)]
    ngrok_path: Option<PathBuf>,

    /// ngrok auth token
    #[arg(long, env = "NGROK_AUTH_TOKEN")]
    ngrok_auth_token: Option<String>,

    /// DuckDNS domain to repoint at the redirect server (without .duckdns.org)
    #[arg(long)]
    duckdns_domain: Option<String>,

    /// DuckDNS token
    #[arg(long, env = "DUCKDNS_TOKEN")]
    duckdns_token: Option<String>,

    /// Seconds to wait before retrying a failed announce or DNS update
    #[arg(long)]
    fail_retry_timeout: Option<u64>,

    /// Seconds between proactive re-announcements
    #[arg(long)]
    success_timeout: Option<u64>,

    /// Configuration file (YAML)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Configuration file format
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    server: ServerSection,

    #[serde(default)]
    tunnel: TunnelSection,

    #[serde(default)]
    duckdns: Option<DuckDnsSection>,

    #[serde(default)]
    timeouts: TimeoutSection,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSection {
    host: Option<String>,
    port: Option<u16>,
    https: Option<bool>,
    /// Direct secret (prefer using secret_env)
    secret: Option<String>,
    /// Environment variable name holding the secret
    secret_env: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TunnelSection {
    local_port: Option<u16>,
    protocol: Option<String>,
    ngrok_path: Option<PathBuf>,
    auth_token: Option<String>,
    auth_token_env: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DuckDnsSection {
    domain: String,
    token: Option<String>,
    token_env: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TimeoutSection {
    fail_retry: Option<u64>,
    success: Option<u64>,
}

/// Setup logging with the specified log level
fn setup_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("Invalid log level: {}", log_level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}

fn load_config_file(path: &PathBuf) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: ConfigFile = serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

fn secret_from_env(env_var: &str) -> Result<String> {
    std::env::var(env_var).with_context(|| format!("Environment variable {} not set", env_var))
}

/// Merge CLI args with the config file, giving precedence to CLI args.
fn build_settings(args: &Args) -> Result<AgentSettings> {
    let file = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            load_config_file(path)?
        }
        None => ConfigFile::default(),
    };

    let server_host = args
        .server
        .clone()
        .or(file.server.host)
        .context("No redirect server host configured (use --server or --config)")?;

    let secret = if let Some(secret) = args.secret.clone() {
        secret
    } else if let Some(env_var) = &file.server.secret_env {
        secret_from_env(env_var)?
    } else if let Some(secret) = file.server.secret {
        secret
    } else {
        anyhow::bail!("No shared secret configured (use --secret or --config)");
    };

    let local_port = args
        .local_port
        .or(file.tunnel.local_port)
        .context("No local port configured (use --local-port or --config)")?;

    let ngrok_auth_token = if args.ngrok_auth_token.is_some() {
        args.ngrok_auth_token.clone()
    } else if let Some(env_var) = &file.tunnel.auth_token_env {
        Some(secret_from_env(env_var)?)
    } else {
        file.tunnel.auth_token
    };

    let duckdns = match (&args.duckdns_domain, file.duckdns) {
        (Some(domain), _) => Some(DuckDnsSettings {
            domain: domain.clone(),
            token: args
                .duckdns_token
                .clone()
                .context("DuckDNS domain given without a token")?,
        }),
        (None, Some(section)) => {
            let token = if let Some(token) = args.duckdns_token.clone() {
                token
            } else if let Some(env_var) = &section.token_env {
                secret_from_env(env_var)?
            } else if let Some(token) = section.token {
                token
            } else {
                anyhow::bail!("DuckDNS domain given without a token");
            };
            Some(DuckDnsSettings {
                domain: section.domain,
                token,
            })
        }
        (None, None) => None,
    };

    let fail_retry = args
        .fail_retry_timeout
        .or(file.timeouts.fail_retry)
        .unwrap_or(10);
    let success = args
        .success_timeout
        .or(file.timeouts.success)
        .unwrap_or(3600);

    Ok(AgentSettings {
        server_host,
        server_port: args.server_port.or(file.server.port).unwrap_or(8080),
        server_https: if args.server_http {
            false
        } else {
            file.server.https.unwrap_or(true)
        },
        secret,
        local_port,
        protocol: args
            .protocol
            .clone()
            .or(file.tunnel.protocol)
            .unwrap_or_else(|| "http".to_string()),
        ngrok_path: args.ngrok_path.clone().or(file.tunnel.ngrok_path),
        ngrok_auth_token,
        duckdns,
        fail_retry_timeout: std::time::Duration::from_secs(fail_retry),
        success_timeout: std::time::Duration::from_secs(success),
    })
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = setup_logging(&args.log_level) {
        eprintln!("{e:#}");
        std::process::exit(exit::CONFIG);
    }

    let settings = match build_settings(&args) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            std::process::exit(exit::CONFIG);
        }
    };

    if let Err(e) = settings.validate() {
        error!("{}", e);
        std::process::exit(e.exit_code());
    }

    // Show the forwarding chain once up front; the tunnel hop is down until
    // the agent connects.
    let probe = ChainStatus::new();
    let hops = forwarding_chain(
        settings.duckdns.as_ref().map(|d| d.domain.as_str()),
        &settings.server_addr(),
        settings.server_https,
        None,
        settings.local_port,
    );
    println!("\n{}\n", probe.render(&hops).await);

    let provider = NgrokProvider::new(NgrokSettings {
        binary: settings.ngrok_path.clone(),
        protocol: settings.protocol.clone(),
        auth_token: settings.ngrok_auth_token.clone(),
        ..Default::default()
    });
    let announcer = HttpAnnouncer::new(
        settings.server_addr(),
        settings.server_https,
        settings.secret.clone(),
    );
    let dns = settings.duckdns.as_ref().map(|d| {
        DuckDnsSyncer::new(
            d.domain.clone(),
            d.token.clone(),
            settings.server_host.clone(),
            settings.server_port,
        )
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    // Re-render the chain whenever the session reaches a good state.
    let (session_tx, mut session_rx) = watch::channel(TunnelSession::default());
    {
        let settings = settings.clone();
        tokio::spawn(async move {
            let probe = ChainStatus::new();
            while session_rx.changed().await.is_ok() {
                let session = session_rx.borrow().clone();
                if session.last_announce_ok {
                    let hops = forwarding_chain(
                        settings.duckdns.as_ref().map(|d| d.domain.as_str()),
                        &settings.server_addr(),
                        settings.server_https,
                        session.public_url.as_deref(),
                        settings.local_port,
                    );
                    println!("\n{}\n", probe.render(&hops).await);
                }
            }
        });
    }

    let opts = AgentOptions {
        local_port: settings.local_port,
        fail_retry_timeout: settings.fail_retry_timeout,
        success_timeout: settings.success_timeout,
    };
    let agent = Agent::new(provider, announcer, dns, opts, shutdown_rx)
        .with_session_watch(session_tx);

    if let Err(e) = agent.run().await {
        error!("{}", e);
        std::process::exit(exit::TUNNEL);
    }
}

//! Beacon redirect server binary.
//!
//! Binds one HTTP listener that 301-redirects all traffic to the currently
//! announced target and exposes the authenticated update endpoint the tunnel
//! agent talks to.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use beacon_server::{build_router, TargetStore};

/// Template value shipped in the sample config; refusing to start with it
/// still in place beats running with a guessable secret.
const PLACEHOLDER_SECRET: &str = "YOUR_SHARED_SECRET_HERE";

const EXIT_CONFIG: i32 = 1;
// clap reports CLI usage errors with its own code, 2.
const EXIT_PLACEHOLDER_SECRET: i32 = 3;

/// Beacon redirect server - stable public address for a moving tunnel
#[derive(Parser, Debug)]
#[command(name = "beacon-server")]
#[command(about = "Holds a mutable redirect target and forwards all traffic to it")]
#[command(version)]
#[command(long_about = r#"
The redirect server answers every request with a 301 to the currently
announced target, preserving the original path and query string. The target
is set remotely by beacon-agent through the authenticated update endpoint;
while none is set, visitors get a maintenance page.

EXAMPLES:
  # Start with an inline secret
  beacon-server --port 8080 --secret $BEACON_SECRET

  # Start from a config file
  beacon-server --config server.yaml

ENVIRONMENT VARIABLES:
  BEACON_HOST    Bind address
  BEACON_PORT    Bind port
  BEACON_SECRET  Shared secret for the update endpoint
"#)]
struct Args {
    /// Bind address
    #[arg(long, env = "BEACON_HOST")]
    host: Option<String>,

    /// Bind port
    #[arg(long, env = "BEACON_PORT")]
    port: Option<u16>,

    /// Shared secret required by the update endpoint
    #[arg(long, env = "BEACON_SECRET")]
    secret: Option<String>,

    /// Configuration file (YAML)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Configuration file format
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    host: Option<String>,

    #[serde(default)]
    port: Option<u16>,

    /// Direct secret (prefer using secret_env)
    #[serde(default)]
    secret: Option<String>,

    /// Environment variable name holding the secret
    #[serde(default)]
    secret_env: Option<String>,
}

#[derive(Debug)]
struct ServerConfig {
    host: String,
    port: u16,
    secret: String,
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

/// Merge CLI args with the config file, giving precedence to CLI args.
fn build_config(args: &Args) -> Result<ServerConfig> {
    let file = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Some(load_config_file(path)?)
        }
        None => None,
    };

    let secret = if let Some(secret) = args.secret.clone() {
        secret
    } else if let Some(file) = &file {
        if let Some(env_var) = &file.secret_env {
            std::env::var(env_var)
                .with_context(|| format!("Environment variable {} not set", env_var))?
        } else if let Some(secret) = file.secret.clone() {
            secret
        } else {
            anyhow::bail!("No shared secret in config file (secret or secret_env)");
        }
    } else {
        anyhow::bail!("No shared secret configured (use --secret or --config)");
    };

    let host = args
        .host
        .clone()
        .or_else(|| file.as_ref().and_then(|f| f.host.clone()))
        .unwrap_or_else(|| "0.0.0.0".to_string());
    let port = args
        .port
        .or_else(|| file.as_ref().and_then(|f| f.port))
        .unwrap_or(8080);

    Ok(ServerConfig { host, port, secret })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level)?;

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            std::process::exit(EXIT_CONFIG);
        }
    };

    if config.secret == PLACEHOLDER_SECRET {
        error!("Change the shared secret in your configuration first!");
        error!("beacon-server and beacon-agent must share the same secret.");
        std::process::exit(EXIT_PLACEHOLDER_SECRET);
    }

    let store = match TargetStore::new(config.secret) {
        Ok(store) => store,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(EXIT_CONFIG);
        }
    };

    let router = build_router(store);

    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    info!("Redirect server listening on {}", bind_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Redirect server stopped");
    Ok(())
}

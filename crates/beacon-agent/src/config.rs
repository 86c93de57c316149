//! Agent configuration and its pre-flight validation.
//!
//! Validation runs before any network activity: a config still carrying a
//! template placeholder exits immediately with a distinct, non-zero code so
//! the operator can tell *which* value was never filled in.

use std::path::PathBuf;
use std::time::Duration;

/// Process exit codes. Kept distinct per failure class so wrapper scripts can
/// react to them.
pub mod exit {
    /// Unreadable/unparsable config file or missing required value.
    /// (clap reports CLI usage errors with its own code, 2.)
    pub const CONFIG: i32 = 1;
    /// Shared secret still set to the template placeholder.
    pub const PLACEHOLDER_SECRET: i32 = 3;
    /// Tunnel or DNS provider token still set to the template placeholder.
    pub const PLACEHOLDER_TOKEN: i32 = 4;
    /// Redirect server address still set to the template placeholder.
    pub const PLACEHOLDER_SERVER: i32 = 5;
    /// Fatal tunnel establishment failure.
    pub const TUNNEL: i32 = 6;
}

pub const PLACEHOLDER_SECRET: &str = "YOUR_SHARED_SECRET_HERE";
pub const PLACEHOLDER_NGROK_TOKEN: &str = "YOUR_NGROK_AUTH_TOKEN_HERE";
pub const PLACEHOLDER_DUCKDNS_TOKEN: &str = "YOUR_DUCKDNS_TOKEN_HERE";
pub const PLACEHOLDER_SERVER_URL: &str = "YOUR_REDIRECT_SERVER_URL_HERE";

/// Optional DuckDNS sync settings.
#[derive(Debug, Clone)]
pub struct DuckDnsSettings {
    pub domain: String,
    pub token: String,
}

/// Fully merged agent configuration.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Redirect server host (no scheme).
    pub server_host: String,
    pub server_port: u16,
    /// Whether the redirect server is reached over HTTPS.
    pub server_https: bool,
    /// Shared secret for the update endpoint.
    pub secret: String,
    /// Local port to expose through the tunnel.
    pub local_port: u16,
    /// Tunnel protocol (http, tcp, tls).
    pub protocol: String,
    /// Explicit path to the ngrok binary, if any.
    pub ngrok_path: Option<PathBuf>,
    pub ngrok_auth_token: Option<String>,
    pub duckdns: Option<DuckDnsSettings>,
    pub fail_retry_timeout: Duration,
    pub success_timeout: Duration,
}

/// Configuration errors surfaced before any network call.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "change the shared secret in your configuration first; \
         beacon-server and beacon-agent must share the same secret"
    )]
    PlaceholderSecret,

    #[error(
        "change the ngrok auth token in your configuration first; log in and visit \
         https://dashboard.ngrok.com/get-started/your-authtoken to get one"
    )]
    PlaceholderNgrokToken,

    #[error("change the DuckDNS token in your configuration first")]
    PlaceholderDuckDnsToken,

    #[error("set the redirect server address in your configuration first")]
    PlaceholderServerUrl,

    #[error("shared secret must not be empty")]
    EmptySecret,
}

impl ConfigError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ConfigError::PlaceholderSecret | ConfigError::EmptySecret => exit::PLACEHOLDER_SECRET,
            ConfigError::PlaceholderNgrokToken | ConfigError::PlaceholderDuckDnsToken => {
                exit::PLACEHOLDER_TOKEN
            }
            ConfigError::PlaceholderServerUrl => exit::PLACEHOLDER_SERVER,
        }
    }
}

impl AgentSettings {
    /// Reject placeholder and empty values. Must run before any network
    /// activity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret == PLACEHOLDER_SECRET {
            return Err(ConfigError::PlaceholderSecret);
        }
        if self.secret.is_empty() {
            return Err(ConfigError::EmptySecret);
        }
        if self.ngrok_auth_token.as_deref() == Some(PLACEHOLDER_NGROK_TOKEN) {
            return Err(ConfigError::PlaceholderNgrokToken);
        }
        if let Some(duckdns) = &self.duckdns {
            if duckdns.token == PLACEHOLDER_DUCKDNS_TOKEN {
                return Err(ConfigError::PlaceholderDuckDnsToken);
            }
        }
        if self.server_host == PLACEHOLDER_SERVER_URL {
            return Err(ConfigError::PlaceholderServerUrl);
        }
        Ok(())
    }

    /// Redirect server address as `host:port`, scheme left to the caller.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

//! Beacon tunnel agent
//!
//! Runs beside the actual service: establishes an outbound tunnel, discovers
//! its public URL, and keeps the redirect server (and optionally a dynamic-DNS
//! provider) pointed at it through a supervised announce/retry loop. The agent
//! and the redirect server share nothing but the update protocol in
//! `beacon-proto`, so either side can be restarted or relocated independently
//! and the loop converges from any starting state.

pub mod agent;
pub mod announce;
pub mod config;
pub mod dns;
pub mod provider;
pub mod status;

pub use agent::{Agent, AgentError, AgentOptions, AgentState, TunnelSession};
pub use announce::{Announce, AnnounceError, HttpAnnouncer};
pub use config::{AgentSettings, ConfigError, DuckDnsSettings};
pub use dns::{DnsError, DnsSync, DuckDnsSyncer};
pub use provider::{NgrokProvider, NgrokSettings, TunnelError, TunnelProvider};
pub use status::{forwarding_chain, ChainStatus, Hop};

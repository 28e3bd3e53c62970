//! Outbound connection gate with SSRF protection.
//!
//! This crate decides, for every outbound connection, whether the destination
//! IP address is permitted and severs the connection if it is not:
//! - Address classification (unicast, private, loopback, link-local, ...)
//! - Allow/deny lists of single addresses or CIDR ranges
//! - Literal-IP fast path that rejects before any socket exists
//! - Re-validation of every resolved address (DNS rebinding protection)
//! - A teardown state machine that ends, then destroys, a rejected socket once
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Agents                              │
//! │        select(url) ──► Agent::Http  |  Agent::Https          │
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │              FilteringConnector<C>                       ││
//! │  │  ┌───────────────────┐   ┌────────────────────────────┐ ││
//! │  │  │ ConnectionAttempt │──►│ FilterPolicy               │ ││
//! │  │  │ (state machine)   │   │  AddressList / classify    │ ││
//! │  │  └───────────────────┘   └────────────────────────────┘ ││
//! │  └─────────────────────────────────────────────────────────┘│
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │  TcpConnector<R: Resolve>  ──►  LookupEvent channel      ││
//! │  └─────────────────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use request_filter::{Agents, FilterOptions};
//! use url::Url;
//!
//! let agents = Agents::new(FilterOptions::builder().allow_ip("127.0.0.1").build())?;
//!
//! let url = Url::parse("http://127.0.0.1:8080/")?;
//! let agent = agents.select(&url, None)?;
//! let stream = agent.connect(&url).await?;
//! ```

pub mod agent;
pub mod classify;
pub mod config;
pub mod gate;
pub mod host;
pub mod list;
pub mod metrics;
pub mod policy;
pub mod transport;

pub use agent::{Agent, AgentStream, Agents, HttpAgent, HttpsAgent, Scheme};
pub use classify::{AddressRange, classify, classify_ip, is_ip_literal, parse_ip_literal};
pub use config::{FilterOptions, FilterOptionsBuilder};
pub use gate::{AttemptState, ConnectionAttempt, FilteringConnector, GatedSocket, GatedStream};
pub use host::Host;
pub use list::{AddressList, ConfigWarning, ListEntry, ListKind};
pub use metrics::{GateMetrics, MetricsSnapshot};
pub use policy::{AddressFamily, DenialReason, FilterPolicy, PolicyDenial, Verdict};
pub use transport::{
    Connector, LookupEvent, LookupReporter, Resolve, StaticResolver, SystemResolver, Target,
    TcpConnector, TlsConnector, lookup_channel,
};

use thiserror::Error;

/// Errors for the request filter.
#[derive(Debug, Error)]
pub enum FilterError {
    /// The connection was refused by the address policy.
    #[error("{0}")]
    Denied(PolicyDenial),

    /// Not a literal IPv4/IPv6 address.
    #[error("Invalid IP address: {0}")]
    InvalidAddress(String),

    /// Invalid host format.
    #[error("Invalid host: {0}")]
    InvalidHost(String),

    /// URL could not be parsed or has no host.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// URL scheme has no agent.
    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// TLS setup error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Transport or resolver failure, passed through unchanged.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FilterError {
    /// The structured denial, if the policy refused the connection.
    pub fn denial(&self) -> Option<&PolicyDenial> {
        match self {
            FilterError::Denied(denial) => Some(denial),
            _ => None,
        }
    }

    /// Check if the error is a policy denial.
    pub fn is_denied(&self) -> bool {
        self.denial().is_some()
    }
}

impl From<FilterError> for std::io::Error {
    fn from(err: FilterError) -> Self {
        match err {
            FilterError::Io(e) => e,
            FilterError::Denied(_) => std::io::Error::new(std::io::ErrorKind::PermissionDenied, err),
            FilterError::InvalidAddress(_)
            | FilterError::InvalidHost(_)
            | FilterError::InvalidUrl(_)
            | FilterError::UnsupportedScheme(_) => {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, err)
            }
            FilterError::Config(_) | FilterError::Tls(_) => std::io::Error::other(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, FilterError>;

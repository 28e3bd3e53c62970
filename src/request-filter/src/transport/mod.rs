//! Connection factories and resolvers.
//!
//! A [`Connector`] opens a connection to a [`Target`] and reports every
//! address its resolver hands back as a [`LookupEvent`] before connecting to
//! it. The gate consumes those events; the transport itself does no policy
//! checks.

mod resolver;
mod tcp;
mod tls;

pub use resolver::{Resolve, StaticResolver, SystemResolver};
pub use tcp::TcpConnector;
pub use tls::{TlsConnector, default_client_config};

use std::net::IpAddr;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use super::{FilterError, Result, host::Host, policy::AddressFamily};

/// A resolution-completion signal: the resolver produced `address` for `host`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupEvent {
    pub address: IpAddr,
    pub family: AddressFamily,
    pub host: String,
}

impl LookupEvent {
    pub fn new(address: IpAddr, host: impl Into<String>) -> Self {
        Self {
            address,
            family: AddressFamily::of(address),
            host: host.into(),
        }
    }
}

/// Sending half of a lookup channel.
///
/// Reporting never fails: once the receiving gate has detached, events are
/// dropped.
#[derive(Debug, Clone)]
pub struct LookupReporter {
    tx: Option<mpsc::UnboundedSender<LookupEvent>>,
}

impl LookupReporter {
    /// A reporter nobody listens to.
    pub fn detached() -> Self {
        Self { tx: None }
    }

    /// Report a resolved address.
    pub fn report(&self, event: LookupEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// Create a lookup channel.
pub fn lookup_channel() -> (LookupReporter, mpsc::UnboundedReceiver<LookupEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (LookupReporter { tx: Some(tx) }, rx)
}

/// Where a connection goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    host: Host,
    port: u16,
}

impl Target {
    /// Create a target from a host (name or IP literal) and port.
    pub fn new(host: &str, port: u16) -> Result<Self> {
        Ok(Self {
            host: Host::parse(host)?,
            port,
        })
    }

    /// Create a target from a URL, using the scheme's default port.
    pub fn from_url(url: &Url) -> Result<Self> {
        let host = url
            .host_str()
            .ok_or_else(|| FilterError::InvalidUrl(format!("{url} has no host")))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| FilterError::InvalidUrl(format!("{url} has no port")))?;
        Self::new(host, port)
    }

    /// The normalized host.
    pub fn host(&self) -> &str {
        self.host.as_str()
    }

    /// The port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The address, if the host is an IP literal.
    pub fn ip(&self) -> Option<IpAddr> {
        self.host.ip()
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.ip() {
            Some(IpAddr::V6(_)) => write!(f, "[{}]:{}", self.host, self.port),
            _ => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

/// Connection factory.
///
/// Implementations report each resolved address on `lookups` before
/// connecting to it. Failures unrelated to policy surface as
/// [`FilterError::Io`].
#[async_trait]
pub trait Connector: Send + Sync {
    type Socket: Send + 'static;

    async fn connect(&self, target: &Target, lookups: LookupReporter) -> Result<Self::Socket>;
}

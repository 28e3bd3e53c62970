//! Hostname resolution.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

/// Resolves a host name to socket addresses.
#[async_trait]
pub trait Resolve: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>>;
}

#[async_trait]
impl<R: Resolve + ?Sized> Resolve for Arc<R> {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        (**self).resolve(host, port).await
    }
}

/// The operating system resolver via `tokio::net::lookup_host`.
///
/// Non-canonical IPv4 spellings (`0x7f000001`, `017700000001`) are
/// normalized here, by the platform, not by the classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolve for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        match tokio::net::lookup_host((host, port)).await {
            Ok(addrs) => {
                let addrs: Vec<SocketAddr> = addrs.collect();
                debug!(host = %host, count = addrs.len(), "resolved");
                Ok(addrs)
            }
            Err(e) => {
                warn!(host = %host, error = %e, "DNS resolution failed");
                Err(e)
            }
        }
    }
}

/// Fixed host-to-address overrides, with an optional fallback resolver.
#[derive(Clone, Default)]
pub struct StaticResolver {
    entries: HashMap<String, Vec<IpAddr>>,
    fallback: Option<Arc<dyn Resolve>>,
}

impl StaticResolver {
    /// Create an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `host` to `address`. Repeated calls add further addresses.
    pub fn with(mut self, host: impl AsRef<str>, address: IpAddr) -> Self {
        self.insert(host, address);
        self
    }

    /// Map `host` to `address`. Repeated calls add further addresses.
    pub fn insert(&mut self, host: impl AsRef<str>, address: IpAddr) {
        self.entries
            .entry(host.as_ref().to_lowercase())
            .or_default()
            .push(address);
    }

    /// Resolve names without an override through `resolver`.
    pub fn with_fallback(mut self, resolver: Arc<dyn Resolve>) -> Self {
        self.fallback = Some(resolver);
        self
    }

    /// Check if there are no overrides.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for StaticResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticResolver")
            .field("entries", &self.entries)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

#[async_trait]
impl Resolve for StaticResolver {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        if let Some(addrs) = self.entries.get(&host.to_lowercase()) {
            debug!(host = %host, count = addrs.len(), "resolved from static entries");
            return Ok(addrs.iter().map(|ip| SocketAddr::new(*ip, port)).collect());
        }

        match &self.fallback {
            Some(fallback) => fallback.resolve(host, port).await,
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no address configured for {host}"),
            )),
        }
    }
}

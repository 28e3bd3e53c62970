//! Plain TCP connector.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use super::{Connector, LookupEvent, LookupReporter, Resolve, SystemResolver, Target};
use crate::{Result, gate::GatedStream};

/// Opens TCP connections, resolving names through `R`.
///
/// Every resolved address is reported before the first connect. Addresses
/// are tried in resolver order until one accepts. Literal targets skip the
/// resolver and report nothing.
#[derive(Debug, Clone)]
pub struct TcpConnector<R = SystemResolver> {
    resolver: R,
    connect_timeout: Option<Duration>,
}

impl TcpConnector<SystemResolver> {
    /// Create a connector using the system resolver.
    pub fn new() -> Self {
        Self::with_resolver(SystemResolver)
    }
}

impl Default for TcpConnector<SystemResolver> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Resolve> TcpConnector<R> {
    /// Create a connector using a custom resolver.
    pub fn with_resolver(resolver: R) -> Self {
        Self {
            resolver,
            connect_timeout: None,
        }
    }

    /// Bound each individual connect.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// The resolver.
    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    async fn connect_addr(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        match self.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connection to {addr} timed out"),
                    )
                })?,
            None => TcpStream::connect(addr).await,
        }
    }
}

#[async_trait]
impl<R: Resolve + 'static> Connector for TcpConnector<R> {
    type Socket = GatedStream<TcpStream>;

    async fn connect(&self, target: &Target, lookups: LookupReporter) -> Result<Self::Socket> {
        let addrs = match target.ip() {
            Some(ip) => vec![SocketAddr::new(ip, target.port())],
            None => {
                let resolved = self.resolver.resolve(target.host(), target.port()).await?;
                for addr in &resolved {
                    lookups.report(LookupEvent::new(addr.ip(), target.host()));
                }
                resolved
            }
        };

        let mut last_err = None;
        for addr in addrs {
            match self.connect_addr(addr).await {
                Ok(stream) => {
                    debug!(target = %target, peer = %addr, "connected");
                    return Ok(GatedStream::new(stream));
                }
                Err(e) => {
                    debug!(target = %target, peer = %addr, error = %e, "connect failed");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no addresses resolved for {}", target.host()),
                )
            })
            .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{StaticResolver, lookup_channel};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_literal_reports_nothing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let (reporter, mut rx) = lookup_channel();
        let target = Target::new("127.0.0.1", port).unwrap();
        let stream = TcpConnector::new().connect(&target, reporter).await.unwrap();

        assert_eq!(stream.peer_addr().unwrap().port(), port);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connect_name_reports_every_address() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let resolver = StaticResolver::new()
            .with("svc.test", "127.0.0.1".parse().unwrap())
            .with("svc.test", "127.0.0.2".parse().unwrap());
        let (reporter, mut rx) = lookup_channel();
        let target = Target::new("svc.test", port).unwrap();
        TcpConnector::with_resolver(resolver)
            .connect(&target, reporter)
            .await
            .unwrap();

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.address.to_string(), "127.0.0.1");
        assert_eq!(second.address.to_string(), "127.0.0.2");
        assert_eq!(first.host, "svc.test");
    }

    #[tokio::test]
    async fn test_resolution_failure_passes_through() {
        let target = Target::new("missing.test", 80).unwrap();
        let err = TcpConnector::with_resolver(StaticResolver::new())
            .connect(&target, LookupReporter::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::FilterError::Io(ref e) if e.kind() == io::ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_connection_refused_passes_through() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let target = Target::new("127.0.0.1", port).unwrap();
        let err = TcpConnector::new()
            .connect(&target, LookupReporter::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::FilterError::Io(_)));
    }
}

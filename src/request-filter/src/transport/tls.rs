//! TLS on top of a (gated) connector.

use std::sync::Arc;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::client::TlsStream;
use tracing::debug;

use super::{Connector, LookupReporter, Target};
use crate::{FilterError, Result};

/// Client config trusting the Mozilla root set, using the ring provider.
pub fn default_client_config() -> Result<Arc<ClientConfig>> {
    let roots = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| FilterError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Wraps a connector and runs a TLS client handshake on what it returns.
///
/// The inner connector finishes first, so when it is a gate the handshake
/// only starts on an admitted connection.
#[derive(Clone)]
pub struct TlsConnector<C> {
    inner: C,
    tls: tokio_rustls::TlsConnector,
}

impl<C> TlsConnector<C> {
    /// Wrap `inner` with the default client config.
    pub fn new(inner: C) -> Result<Self> {
        Ok(Self::with_config(inner, default_client_config()?))
    }

    /// Wrap `inner` with a custom client config.
    pub fn with_config(inner: C, config: Arc<ClientConfig>) -> Self {
        Self {
            inner,
            tls: tokio_rustls::TlsConnector::from(config),
        }
    }

    /// The wrapped connector.
    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C: std::fmt::Debug> std::fmt::Debug for TlsConnector<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<C> Connector for TlsConnector<C>
where
    C: Connector,
    C::Socket: AsyncRead + AsyncWrite + Unpin,
{
    type Socket = TlsStream<C::Socket>;

    async fn connect(&self, target: &Target, lookups: LookupReporter) -> Result<Self::Socket> {
        let server_name = ServerName::try_from(target.host().to_string())
            .map_err(|e| FilterError::Tls(format!("invalid server name {}: {e}", target.host())))?;

        let stream = self.inner.connect(target, lookups).await?;
        let stream = self.tls.connect(server_name, stream).await?;
        debug!(target = %target, "TLS handshake complete");
        Ok(stream)
    }
}

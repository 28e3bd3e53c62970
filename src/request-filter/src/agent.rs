//! Scheme-selected, gated connection agents.
//!
//! [`Agents`] builds one gated HTTP agent and one gated HTTPS agent up
//! front and hands them out by URL scheme. Callers that pass options
//! different from the shared ones get a freshly built agent instead.
//! An HTTP client following redirects calls [`Agents::select`] and
//! [`Agent::connect`] again for every hop, so each hop is checked.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::ClientConfig;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tracing::debug;
use url::Url;

use crate::{
    FilterError, Result,
    config::FilterOptions,
    gate::{FilteringConnector, GatedStream},
    metrics::GateMetrics,
    policy::FilterPolicy,
    transport::{
        Connector, LookupReporter, Resolve, SystemResolver, Target, TcpConnector, TlsConnector,
        default_client_config,
    },
};

/// URL schemes an agent can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    /// Scheme of `url`.
    pub fn of(url: &Url) -> Result<Self> {
        url.scheme().parse()
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl FromStr for Scheme {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(FilterError::UnsupportedScheme(other.to_string())),
        }
    }
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gated plain TCP.
pub type HttpAgent = FilteringConnector<TcpConnector<Arc<dyn Resolve>>>;

/// Gated TCP with TLS on top. The handshake starts after the gate admits.
pub type HttpsAgent = TlsConnector<HttpAgent>;

/// A gated agent for one scheme.
#[derive(Clone)]
pub enum Agent {
    Http(Arc<HttpAgent>),
    Https(Arc<HttpsAgent>),
}

impl Agent {
    fn build(
        scheme: Scheme,
        policy: Arc<FilterPolicy>,
        resolver: Arc<dyn Resolve>,
        tls: Arc<ClientConfig>,
    ) -> Self {
        let gate = FilteringConnector::new(TcpConnector::with_resolver(resolver), policy);
        match scheme {
            Scheme::Http => Agent::Http(Arc::new(gate)),
            Scheme::Https => Agent::Https(Arc::new(TlsConnector::with_config(gate, tls))),
        }
    }

    pub fn scheme(&self) -> Scheme {
        match self {
            Agent::Http(_) => Scheme::Http,
            Agent::Https(_) => Scheme::Https,
        }
    }

    /// The gate's compiled policy.
    pub fn policy(&self) -> &Arc<FilterPolicy> {
        self.gate().policy()
    }

    /// The gate's counters.
    pub fn metrics(&self) -> &Arc<GateMetrics> {
        self.gate().metrics()
    }

    fn gate(&self) -> &HttpAgent {
        match self {
            Agent::Http(agent) => agent.as_ref(),
            Agent::Https(agent) => agent.inner(),
        }
    }

    /// Check if both handles point at the same agent instance.
    pub fn ptr_eq(&self, other: &Agent) -> bool {
        match (self, other) {
            (Agent::Http(a), Agent::Http(b)) => Arc::ptr_eq(a, b),
            (Agent::Https(a), Agent::Https(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Open a gated connection to the host and port of `url`.
    pub async fn connect(&self, url: &Url) -> Result<AgentStream> {
        let scheme = Scheme::of(url)?;
        if scheme != self.scheme() {
            return Err(FilterError::InvalidUrl(format!(
                "{url} cannot be served by the {} agent",
                self.scheme()
            )));
        }
        self.connect_target(&Target::from_url(url)?).await
    }

    /// Open a gated connection to `target`.
    pub async fn connect_target(&self, target: &Target) -> Result<AgentStream> {
        let stream = match self {
            Agent::Http(agent) => {
                AgentStream::Plain(agent.connect(target, LookupReporter::detached()).await?)
            }
            Agent::Https(agent) => AgentStream::Tls(Box::new(
                agent.connect(target, LookupReporter::detached()).await?,
            )),
        };
        debug!(target = %target, scheme = %self.scheme(), "agent connected");
        Ok(stream)
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("scheme", &self.scheme())
            .field("options", self.policy().options())
            .finish()
    }
}

/// A connection opened by an [`Agent`].
#[derive(Debug)]
pub enum AgentStream {
    Plain(GatedStream<TcpStream>),
    Tls(Box<TlsStream<GatedStream<TcpStream>>>),
}

impl AgentStream {
    /// Remote address of the underlying TCP connection.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match self {
            AgentStream::Plain(stream) => stream.peer_addr(),
            AgentStream::Tls(stream) => stream.get_ref().0.peer_addr(),
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, AgentStream::Tls(_))
    }
}

impl AsyncRead for AgentStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            AgentStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            AgentStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for AgentStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            AgentStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            AgentStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            AgentStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            AgentStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            AgentStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            AgentStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Shared HTTP and HTTPS agents for one set of options.
pub struct Agents {
    options: FilterOptions,
    resolver: Arc<dyn Resolve>,
    tls: Arc<ClientConfig>,
    http: Agent,
    https: Agent,
}

impl Agents {
    /// Build agents using the system resolver.
    pub fn new(options: FilterOptions) -> Result<Self> {
        Self::with_resolver(options, Arc::new(SystemResolver))
    }

    /// Build agents using a custom resolver.
    pub fn with_resolver(options: FilterOptions, resolver: Arc<dyn Resolve>) -> Result<Self> {
        Ok(Self::with_tls_config(
            options,
            resolver,
            default_client_config()?,
        ))
    }

    /// Build agents using a custom resolver and TLS client config.
    pub fn with_tls_config(
        options: FilterOptions,
        resolver: Arc<dyn Resolve>,
        tls: Arc<ClientConfig>,
    ) -> Self {
        // both schemes share one compiled policy, so warnings are logged once
        let policy = Arc::new(FilterPolicy::new(options.clone()));
        let http = Agent::build(
            Scheme::Http,
            Arc::clone(&policy),
            Arc::clone(&resolver),
            Arc::clone(&tls),
        );
        let https = Agent::build(Scheme::Https, policy, Arc::clone(&resolver), Arc::clone(&tls));

        Self {
            options,
            resolver,
            tls,
            http,
            https,
        }
    }

    /// Options of the shared agents.
    pub fn options(&self) -> &FilterOptions {
        &self.options
    }

    /// The shared agent for `scheme`.
    pub fn shared(&self, scheme: Scheme) -> &Agent {
        match scheme {
            Scheme::Http => &self.http,
            Scheme::Https => &self.https,
        }
    }

    /// Pick the agent for `url`.
    ///
    /// Without options, or with options equal to the shared ones, the shared
    /// agent is returned. Other options build a new agent with its own policy.
    pub fn select(&self, url: &Url, options: Option<&FilterOptions>) -> Result<Agent> {
        let scheme = Scheme::of(url)?;

        match options {
            Some(options) if *options != self.options => {
                debug!(url = %url, %scheme, "building agent for custom options");
                Ok(Agent::build(
                    scheme,
                    Arc::new(FilterPolicy::new(options.clone())),
                    Arc::clone(&self.resolver),
                    Arc::clone(&self.tls),
                ))
            }
            _ => Ok(self.shared(scheme).clone()),
        }
    }
}

impl std::fmt::Debug for Agents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agents")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::StaticResolver;

    fn agents(options: FilterOptions) -> Agents {
        let resolver = StaticResolver::new().with("internal.test", "10.0.0.5".parse().unwrap());
        Agents::with_resolver(options, Arc::new(resolver)).unwrap()
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_scheme() {
        assert_eq!(Scheme::of(&url("http://a.test/")).unwrap(), Scheme::Http);
        assert_eq!(Scheme::of(&url("HTTPS://a.test/")).unwrap(), Scheme::Https);
        assert_eq!(Scheme::Https.default_port(), 443);
        assert!(matches!(
            Scheme::of(&url("ftp://a.test/")),
            Err(FilterError::UnsupportedScheme(s)) if s == "ftp"
        ));
    }

    #[test]
    fn test_select_reuses_shared_agents() {
        let agents = agents(FilterOptions::default());

        let first = agents.select(&url("http://a.test/"), None).unwrap();
        let second = agents
            .select(&url("http://b.test/"), Some(&FilterOptions::default()))
            .unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(first.scheme(), Scheme::Http);

        let https = agents.select(&url("https://a.test/"), None).unwrap();
        assert_eq!(https.scheme(), Scheme::Https);
        assert!(!https.ptr_eq(&first));
        assert!(Arc::ptr_eq(https.policy(), first.policy()));
    }

    #[test]
    fn test_select_builds_fresh_agent_for_new_options() {
        let agents = agents(FilterOptions::default());
        let options = FilterOptions::builder().allow_private(true).build();

        let custom = agents.select(&url("http://a.test/"), Some(&options)).unwrap();
        let shared = agents.select(&url("http://a.test/"), None).unwrap();

        assert!(!custom.ptr_eq(&shared));
        assert!(custom.policy().options().allow_private_ip_address);
        assert!(!shared.policy().options().allow_private_ip_address);
    }

    #[test]
    fn test_select_unsupported_scheme() {
        let agents = agents(FilterOptions::default());
        let err = agents.select(&url("ws://a.test/"), None).unwrap_err();
        assert!(matches!(err, FilterError::UnsupportedScheme(_)));
    }

    #[tokio::test]
    async fn test_connect_rejects_scheme_mismatch() {
        let agents = agents(FilterOptions::default());
        let http = agents.shared(Scheme::Http);
        let err = http.connect(&url("https://a.test/")).await.unwrap_err();
        assert!(matches!(err, FilterError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_https_agent_denies_resolved_private_address() {
        let agents = agents(FilterOptions::default());
        let https = agents.select(&url("https://internal.test/"), None).unwrap();

        let err = https
            .connect(&url("https://internal.test/"))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "DNS lookup 10.0.0.5(family:4, host:internal.test) is not allowed. Because, It is private IP address."
        );
        assert_eq!(https.metrics().snapshot().denied_lookup, 1);
    }
}

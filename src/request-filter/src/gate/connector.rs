//! Gate decorator over a [`Connector`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::attempt::ConnectionAttempt;
use super::socket::GatedSocket;
use crate::{
    FilterError, Result,
    config::FilterOptions,
    metrics::GateMetrics,
    policy::{FilterPolicy, PolicyDenial},
    transport::{Connector, LookupReporter, Target, lookup_channel},
};

/// A [`Connector`] that only hands out connections the policy admits.
///
/// Each call gets its own [`ConnectionAttempt`]. The inner connector's
/// lookup events are checked as they arrive; a denial that lands while the
/// connect is still pending cancels it, one that lands with or after the
/// socket tears the socket down. Admitted events are forwarded to the
/// caller's reporter.
#[derive(Debug, Clone)]
pub struct FilteringConnector<C> {
    inner: C,
    policy: Arc<FilterPolicy>,
    metrics: Arc<GateMetrics>,
}

enum Outcome<S> {
    Denied(PolicyDenial),
    Connected(Result<S>),
}

impl<C> FilteringConnector<C> {
    pub fn new(inner: C, policy: Arc<FilterPolicy>) -> Self {
        Self {
            inner,
            policy,
            metrics: Arc::new(GateMetrics::new()),
        }
    }

    /// Compile `options` and wrap `inner`.
    pub fn from_options(inner: C, options: FilterOptions) -> Self {
        Self::new(inner, Arc::new(FilterPolicy::new(options)))
    }

    pub fn policy(&self) -> &Arc<FilterPolicy> {
        &self.policy
    }

    pub fn metrics(&self) -> &Arc<GateMetrics> {
        &self.metrics
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C> Connector for FilteringConnector<C>
where
    C: Connector,
    C::Socket: GatedSocket,
{
    type Socket = C::Socket;

    async fn connect(&self, target: &Target, lookups: LookupReporter) -> Result<Self::Socket> {
        self.connect_gated(target, lookups).await
    }
}

impl<C> FilteringConnector<C>
where
    C: Connector,
    C::Socket: GatedSocket,
{
    #[instrument(name = "gate", skip_all, fields(target = %target))]
    async fn connect_gated(&self, target: &Target, lookups: LookupReporter) -> Result<C::Socket> {
        self.metrics.record_attempt();

        let mut attempt = ConnectionAttempt::new(target.host(), Arc::clone(&self.policy));
        if let Err(e) = attempt.preflight() {
            self.metrics.record_denied_preflight();
            return Err(e);
        }

        let (reporter, mut events) = lookup_channel();
        let outcome = {
            let mut connect = self.inner.connect(target, reporter);
            loop {
                tokio::select! {
                    biased;
                    Some(event) = events.recv() => {
                        match attempt.on_lookup(&event) {
                            Some(denial) => break Outcome::Denied(denial),
                            None => lookups.report(event),
                        }
                    }
                    result = &mut connect => break Outcome::Connected(result),
                }
            }
        };

        let socket = match outcome {
            Outcome::Denied(denial) => {
                // the pending connect was dropped with the block above
                debug!("connect cancelled by denial");
                attempt.reject_unconnected();
                self.metrics.record_denied_lookup();
                return Err(FilterError::Denied(denial));
            }
            Outcome::Connected(result) => result,
        };

        // events reported in the same poll that finished the connect
        let mut pending = None;
        while let Ok(event) = events.try_recv() {
            match attempt.on_lookup(&event) {
                Some(denial) => pending = Some(denial),
                None if !attempt.is_decided() => lookups.report(event),
                None => {}
            }
        }

        match (socket, pending) {
            (Ok(mut socket), Some(denial)) => {
                attempt.teardown(&mut socket, &denial).await;
                self.metrics.record_denied_lookup();
                self.metrics.record_torn_down();
                Err(FilterError::Denied(denial))
            }
            (Err(e), Some(denial)) => {
                debug!(error = %e, "transport failed after denial");
                attempt.reject_unconnected();
                self.metrics.record_denied_lookup();
                Err(FilterError::Denied(denial))
            }
            (Ok(socket), None) => {
                attempt.admit();
                self.metrics.record_admitted();
                debug!("connection admitted");
                Ok(socket)
            }
            (Err(e), None) => {
                attempt.close();
                self.metrics.record_failed();
                Err(e)
            }
        }
    }
}

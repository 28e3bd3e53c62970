//! Per-connection validation state machine.
//!
//! ```text
//!            preflight (literal denied)
//!  Pending ─────────────────────────────────────────────► Rejected
//!     │                                                      ▲
//!     │ preflight (name, or literal admitted)                │ teardown /
//!     ▼                                                      │ reject_unconnected
//!  InFlight ── on_lookup (denied, latch set) ──► Rejecting ──┘
//!     │   │
//!     │   └── close (transport failed) ──► Closed
//!     ▼
//!  Admitted
//! ```

use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::socket::GatedSocket;
use crate::{
    FilterError, Result,
    classify::parse_ip_literal,
    policy::{AddressFamily, FilterPolicy, PolicyDenial, Verdict},
    transport::LookupEvent,
};

/// State of a [`ConnectionAttempt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// Created, nothing checked yet.
    Pending,

    /// Connecting; resolved addresses are being checked.
    InFlight,

    /// A resolved address was denied; teardown pending.
    Rejecting,

    /// Denied and torn down (or never connected).
    Rejected,

    /// Connected with no denial; the gate has detached.
    Admitted,

    /// The transport failed on its own.
    Closed,
}

impl AttemptState {
    /// Check if no further transitions happen.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttemptState::Rejected | AttemptState::Admitted | AttemptState::Closed
        )
    }
}

/// Validation state for one outbound connection.
///
/// `decided` is a one-shot latch: once a denial is recorded every later
/// lookup is ignored, so at most one teardown runs per attempt.
#[derive(Debug)]
pub struct ConnectionAttempt {
    host: String,
    family: Option<AddressFamily>,
    state: AttemptState,
    decided: bool,
    policy: Arc<FilterPolicy>,
}

impl ConnectionAttempt {
    pub fn new(host: impl Into<String>, policy: Arc<FilterPolicy>) -> Self {
        Self {
            host: host.into(),
            family: None,
            state: AttemptState::Pending,
            decided: false,
            policy,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Family of the literal target or the last checked lookup.
    pub fn family(&self) -> Option<AddressFamily> {
        self.family
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    /// Check if a denial has been latched.
    pub fn is_decided(&self) -> bool {
        self.decided
    }

    /// Check the target before anything connects.
    ///
    /// A denied literal moves straight to `Rejected` and returns the denial;
    /// no socket exists, so there is nothing to tear down.
    pub fn preflight(&mut self) -> Result<()> {
        if self.state != AttemptState::Pending {
            return Ok(());
        }

        if let Some(ip) = parse_ip_literal(&self.host) {
            self.family = Some(AddressFamily::of(ip));
        }

        match self.policy.preflight(&self.host) {
            Verdict::Admitted => {
                self.state = AttemptState::InFlight;
                Ok(())
            }
            Verdict::Denied(denial) => {
                self.decided = true;
                self.state = AttemptState::Rejected;
                warn!(host = %self.host, reason = %denial.reason, "connection refused before connect");
                Err(FilterError::Denied(denial))
            }
        }
    }

    /// Check a resolved address.
    ///
    /// Returns the denial the first time an address is refused; the caller
    /// must then run [`teardown`](Self::teardown) or
    /// [`reject_unconnected`](Self::reject_unconnected). Returns `None` for
    /// admitted addresses and for every event after the latch is set.
    pub fn on_lookup(&mut self, event: &LookupEvent) -> Option<PolicyDenial> {
        if self.decided || self.state != AttemptState::InFlight {
            trace!(host = %self.host, address = %event.address, state = ?self.state, "lookup ignored");
            return None;
        }

        self.family = Some(event.family);
        match self.policy.evaluate_lookup(event) {
            Verdict::Admitted => {
                debug!(host = %event.host, address = %event.address, "resolved address admitted");
                None
            }
            Verdict::Denied(denial) => {
                self.decided = true;
                self.state = AttemptState::Rejecting;
                warn!(
                    host = %event.host,
                    address = %event.address,
                    reason = %denial.reason,
                    "resolved address denied"
                );
                Some(denial)
            }
        }
    }

    /// Tear down a connected socket after a denial: half-close first, then
    /// destroy unless the socket is already gone.
    ///
    /// The half-close is bounded by the policy's grace period. Errors are
    /// logged, never returned. Only runs from `Rejecting`.
    pub async fn teardown<S>(&mut self, socket: &mut S, denial: &PolicyDenial)
    where
        S: GatedSocket + ?Sized,
    {
        if self.state != AttemptState::Rejecting {
            trace!(host = %self.host, state = ?self.state, "teardown skipped");
            return;
        }

        if !socket.is_destroyed() {
            let grace = self.policy.teardown_grace();
            match tokio::time::timeout(grace, socket.end()).await {
                Ok(Ok(())) => trace!(host = %self.host, "half-close complete"),
                Ok(Err(e)) => debug!(host = %self.host, error = %e, "half-close failed"),
                Err(_) => debug!(host = %self.host, ?grace, "half-close timed out"),
            }
        }

        if !socket.is_destroyed() {
            socket.destroy(denial);
        }

        self.state = AttemptState::Rejected;
        debug!(host = %self.host, "connection torn down");
    }

    /// Finish a denial that arrived before any socket was handed out.
    pub fn reject_unconnected(&mut self) {
        if self.state == AttemptState::Rejecting {
            self.state = AttemptState::Rejected;
        }
    }

    /// Mark the connection as established. Returns `false` if a denial was
    /// latched or the attempt is not in flight.
    pub fn admit(&mut self) -> bool {
        if self.decided || self.state != AttemptState::InFlight {
            return false;
        }
        self.state = AttemptState::Admitted;
        true
    }

    /// The transport failed independently of the policy.
    pub fn close(&mut self) {
        if matches!(self.state, AttemptState::Pending | AttemptState::InFlight) {
            self.state = AttemptState::Closed;
        }
    }
}

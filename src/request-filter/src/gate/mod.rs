//! The connection gate.
//!
//! [`FilteringConnector`] wraps any [`Connector`](crate::Connector) and
//! holds every connection it opens to a [`ConnectionAttempt`]: literal
//! targets are checked before connecting, resolved addresses as they are
//! reported, and a denied connection is torn down before the caller can
//! send anything on it.

mod attempt;
mod connector;
mod socket;

pub use attempt::{AttemptState, ConnectionAttempt};
pub use connector::FilteringConnector;
pub use socket::{GatedSocket, GatedStream};

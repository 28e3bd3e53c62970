//! Host normalization.

use std::net::IpAddr;

use super::{FilterError, classify::parse_ip_literal};

/// A normalized connection host: lowercase, no IPv6 brackets, no trailing
/// dots.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Host(String);

impl Host {
    /// Parse and normalize a host string.
    pub fn parse(input: &str) -> Result<Self, FilterError> {
        let normalized = normalize_host(input);
        if normalized.is_empty() {
            return Err(FilterError::InvalidHost("host is empty".to_string()));
        }
        if normalized.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(FilterError::InvalidHost(input.to_string()));
        }
        Ok(Self(normalized))
    }

    /// Get the normalized host string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The address, if the host is an IP literal.
    pub fn ip(&self) -> Option<IpAddr> {
        parse_ip_literal(&self.0)
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Host {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for Host {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Normalize a host string.
/// - Lowercase
/// - Strip brackets from IPv6
/// - Remove trailing dots
fn normalize_host(input: &str) -> String {
    let mut host = input.trim().to_lowercase();

    if host.starts_with('[')
        && let Some(end) = host.find(']')
    {
        host = host[1..end].to_string();
    }

    while host.ends_with('.') {
        host.pop();
    }

    host
}

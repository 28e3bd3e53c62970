//! Allow/deny list entries: single addresses or CIDR ranges.

use std::net::{AddrParseError, IpAddr};

use ipnetwork::{IpNetwork, IpNetworkError};
use thiserror::Error;
use tracing::warn;

use super::classify::bare_literal;

/// Which list an entry belongs to. Displays as the configuration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    Allow,
    Deny,
}

impl ListKind {
    /// Configuration key of the list.
    pub fn name(&self) -> &'static str {
        match self {
            ListKind::Allow => "allowIPAddressList",
            ListKind::Deny => "denyIPAddressList",
        }
    }
}

impl std::fmt::Display for ListKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A malformed list entry. Reported once and skipped; it never matches.
#[derive(Debug, Error)]
pub enum ConfigWarning {
    /// Entry contains `/` but is not a valid CIDR range.
    #[error("[request-filtering-agent] Invalid CIDR in {list}: {entry}")]
    InvalidCidr {
        list: ListKind,
        entry: String,
        #[source]
        source: IpNetworkError,
    },

    /// Entry is neither a CIDR range nor an IP literal.
    #[error("[request-filtering-agent] Invalid IP address in {list}: {entry}")]
    InvalidAddress {
        list: ListKind,
        entry: String,
        #[source]
        source: AddrParseError,
    },
}

impl ConfigWarning {
    /// The list the bad entry came from.
    pub fn list(&self) -> ListKind {
        match self {
            ConfigWarning::InvalidCidr { list, .. } | ConfigWarning::InvalidAddress { list, .. } => {
                *list
            }
        }
    }

    /// The bad entry as written in the configuration.
    pub fn entry(&self) -> &str {
        match self {
            ConfigWarning::InvalidCidr { entry, .. }
            | ConfigWarning::InvalidAddress { entry, .. } => entry,
        }
    }
}

/// A parsed list entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListEntry {
    /// Single address, matched by byte equality.
    Address(IpAddr),

    /// CIDR range, matched by containment within the same address family.
    Network(IpNetwork),
}

impl ListEntry {
    /// Parse an entry. Anything containing `/` is treated as CIDR.
    pub fn parse(entry: &str, list: ListKind) -> Result<Self, ConfigWarning> {
        let trimmed = entry.trim();

        if trimmed.contains('/') {
            return trimmed
                .parse::<IpNetwork>()
                .map(ListEntry::Network)
                .map_err(|source| ConfigWarning::InvalidCidr {
                    list,
                    entry: entry.to_string(),
                    source,
                });
        }

        bare_literal(trimmed)
            .parse::<IpAddr>()
            .map(ListEntry::Address)
            .map_err(|source| ConfigWarning::InvalidAddress {
                list,
                entry: entry.to_string(),
                source,
            })
    }

    /// Check if `ip` matches this entry.
    ///
    /// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) match IPv4 entries for
    /// `a.b.c.d`, the same way they are classified.
    pub fn matches(&self, ip: IpAddr) -> bool {
        let canonical = ip.to_canonical();
        match self {
            ListEntry::Address(addr) => addr.to_canonical() == canonical,
            ListEntry::Network(net) => net.contains(canonical) || net.contains(ip),
        }
    }
}

impl std::fmt::Display for ListEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListEntry::Address(addr) => write!(f, "{addr}"),
            ListEntry::Network(net) => write!(f, "{net}"),
        }
    }
}

/// A compiled, ordered address list.
#[derive(Debug, Clone)]
pub struct AddressList {
    kind: ListKind,
    entries: Vec<ListEntry>,
}

impl AddressList {
    /// Create an empty list.
    pub fn new(kind: ListKind) -> Self {
        Self {
            kind,
            entries: Vec::new(),
        }
    }

    /// Compile raw entries. Malformed entries are logged, returned as
    /// warnings and left out of the list.
    pub fn compile<S: AsRef<str>>(kind: ListKind, raw: &[S]) -> (Self, Vec<ConfigWarning>) {
        let mut list = Self::new(kind);
        let mut warnings = Vec::new();

        for entry in raw {
            match ListEntry::parse(entry.as_ref(), kind) {
                Ok(parsed) => list.entries.push(parsed),
                Err(warning) => {
                    let cause = std::error::Error::source(&warning)
                        .map(ToString::to_string)
                        .unwrap_or_default();
                    warn!(list = %kind, entry = %warning.entry(), error = %cause, "{warning}");
                    warnings.push(warning);
                }
            }
        }

        (list, warnings)
    }

    /// Which list this is.
    pub fn kind(&self) -> ListKind {
        self.kind
    }

    /// Valid entries, in configuration order.
    pub fn entries(&self) -> &[ListEntry] {
        &self.entries
    }

    /// Check if the list has no valid entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check if any entry matches `ip`.
    pub fn matches(&self, ip: IpAddr) -> bool {
        self.entries.iter().any(|entry| entry.matches(ip))
    }
}

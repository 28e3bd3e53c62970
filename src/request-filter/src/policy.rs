//! Policy evaluation for destination addresses.

use std::net::IpAddr;
use std::time::Duration;

use tracing::debug;

use super::{
    FilterError, Result,
    classify::{classify_ip, parse_ip_literal},
    config::FilterOptions,
    list::{AddressList, ConfigWarning, ListKind},
    transport::LookupEvent,
};

/// IP address family as reported by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    /// Family of an address.
    pub fn of(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }

    /// Numeric family (`4` or `6`).
    pub fn as_u8(&self) -> u8 {
        match self {
            AddressFamily::V4 => 4,
            AddressFamily::V6 => 6,
        }
    }
}

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Reason for denying an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenialReason {
    /// Meta address while meta addresses are not allowed.
    Meta,

    /// Non-unicast address while private addresses are not allowed.
    Private,

    /// Address matched the deny list.
    DenyListed,

    /// Literal non-unicast target refused by the port-scanning guard.
    PortScanning,
}

impl DenialReason {
    /// The sentence appended to the diagnostic message.
    ///
    /// Dependents pattern-match on these, punctuation included.
    fn clause(&self) -> &'static str {
        match self {
            DenialReason::Meta => "Because, It is meta IP address.",
            DenialReason::Private | DenialReason::PortScanning => {
                "Because, It is private IP address."
            }
            DenialReason::DenyListed => "Because It is defined in denyIPAddressList.",
        }
    }
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenialReason::Meta => write!(f, "meta IP address"),
            DenialReason::Private => write!(f, "private IP address"),
            DenialReason::DenyListed => write!(f, "defined in denyIPAddressList"),
            DenialReason::PortScanning => write!(f, "private IP address (port scanning guard)"),
        }
    }
}

/// A structured policy rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDenial {
    pub reason: DenialReason,
    pub address: IpAddr,
    pub family: Option<AddressFamily>,
    pub host: Option<String>,
}

impl PolicyDenial {
    pub fn new(
        reason: DenialReason,
        address: IpAddr,
        family: Option<AddressFamily>,
        host: Option<&str>,
    ) -> Self {
        Self {
            reason,
            address,
            family,
            host: host.map(str::to_string),
        }
    }
}

impl std::fmt::Display for PolicyDenial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let family = self
            .family
            .map(|family| family.to_string())
            .unwrap_or_else(|| "undefined".to_string());
        let host = self.host.as_deref().unwrap_or("undefined");
        write!(
            f,
            "DNS lookup {}(family:{}, host:{}) is not allowed. {}",
            self.address,
            family,
            host,
            self.reason.clause()
        )
    }
}

impl std::error::Error for PolicyDenial {}

/// Outcome of evaluating an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Address is admitted.
    Admitted,

    /// Address is denied.
    Denied(PolicyDenial),
}

impl Verdict {
    /// Check if the verdict admits the address.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Verdict::Admitted)
    }

    /// Check if the verdict denies the address.
    pub fn is_denied(&self) -> bool {
        matches!(self, Verdict::Denied(_))
    }

    /// The denial, if any.
    pub fn denial(&self) -> Option<&PolicyDenial> {
        match self {
            Verdict::Admitted => None,
            Verdict::Denied(denial) => Some(denial),
        }
    }

    /// Convert into a `Result`, denials becoming [`FilterError::Denied`].
    pub fn into_result(self) -> Result<()> {
        match self {
            Verdict::Admitted => Ok(()),
            Verdict::Denied(denial) => Err(FilterError::Denied(denial)),
        }
    }
}

/// Compiled, immutable address policy.
///
/// Built once from [`FilterOptions`] and shared between connections.
#[derive(Debug)]
pub struct FilterPolicy {
    options: FilterOptions,
    allow: AddressList,
    deny: AddressList,
    warnings: Vec<ConfigWarning>,
}

impl FilterPolicy {
    /// Compile a policy. Malformed list entries are logged and skipped.
    pub fn new(options: FilterOptions) -> Self {
        let (allow, mut warnings) =
            AddressList::compile(ListKind::Allow, &options.allow_ip_address_list);
        let (deny, deny_warnings) =
            AddressList::compile(ListKind::Deny, &options.deny_ip_address_list);
        warnings.extend(deny_warnings);

        Self {
            options,
            allow,
            deny,
            warnings,
        }
    }

    /// The options this policy was compiled from.
    pub fn options(&self) -> &FilterOptions {
        &self.options
    }

    /// Malformed entries found while compiling.
    pub fn warnings(&self) -> &[ConfigWarning] {
        &self.warnings
    }

    /// Grace period for the half-close during teardown.
    pub fn teardown_grace(&self) -> Duration {
        self.options.teardown_grace()
    }

    /// Evaluate a literal address. First applicable rule wins:
    ///
    /// 1. allow list match: admitted
    /// 2. meta address without `allowMetaIPAddress`: denied
    /// 3. non-unicast without `allowPrivateIPAddress`: denied
    /// 4. deny list match: denied
    /// 5. otherwise admitted
    pub fn evaluate(
        &self,
        address: IpAddr,
        host: Option<&str>,
        family: Option<AddressFamily>,
    ) -> Verdict {
        if !self.allow.is_empty() && self.allow.matches(address) {
            debug!(%address, "address is allow-listed");
            return Verdict::Admitted;
        }

        let range = classify_ip(address);

        if !self.options.allow_meta_ip_address && range.is_unspecified() {
            return Verdict::Denied(PolicyDenial::new(DenialReason::Meta, address, family, host));
        }

        if !self.options.allow_private_ip_address && !range.is_unicast() {
            return Verdict::Denied(PolicyDenial::new(
                DenialReason::Private,
                address,
                family,
                host,
            ));
        }

        if !self.deny.is_empty() && self.deny.matches(address) {
            return Verdict::Denied(PolicyDenial::new(
                DenialReason::DenyListed,
                address,
                family,
                host,
            ));
        }

        Verdict::Admitted
    }

    /// Evaluate an address given as text. Anything that is not an IP
    /// literal is admitted: names carry no address until resolved.
    pub fn evaluate_str(
        &self,
        address: &str,
        host: Option<&str>,
        family: Option<AddressFamily>,
    ) -> Verdict {
        match parse_ip_literal(address) {
            Some(ip) => self.evaluate(ip, host, family),
            None => Verdict::Admitted,
        }
    }

    /// Evaluate an address reported by the resolver.
    pub fn evaluate_lookup(&self, event: &LookupEvent) -> Verdict {
        self.evaluate(event.address, Some(&event.host), Some(event.family))
    }

    /// Check a connection target before any socket exists.
    ///
    /// Names are admitted here and checked again once resolved. Literals
    /// are evaluated now; with the port-scanning guard on, a literal
    /// non-unicast target is refused even if private addresses are allowed.
    pub fn preflight(&self, host: &str) -> Verdict {
        let Some(address) = parse_ip_literal(host) else {
            return Verdict::Admitted;
        };
        let family = Some(AddressFamily::of(address));

        if self.options.stop_port_scanning_by_url_redirection
            && !self.allow.matches(address)
            && !classify_ip(address).is_unicast()
        {
            debug!(%address, "literal target refused by port scanning guard");
            return Verdict::Denied(PolicyDenial::new(
                DenialReason::PortScanning,
                address,
                family,
                Some(host),
            ));
        }

        self.evaluate(address, Some(host), family)
    }
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self::new(FilterOptions::default())
    }
}

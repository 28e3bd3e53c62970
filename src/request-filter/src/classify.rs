//! IP address classification for SSRF protection.
//!
//! Only canonical dotted (IPv4) and colon (IPv6) literals are classified.
//! Integer, octal and hexadecimal spellings such as `0x7f000001` are host
//! names as far as this module is concerned: the resolver turns them into
//! canonical addresses, and those are what get classified.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use super::{FilterError, Result};

/// Structural category of an IP address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressRange {
    /// Globally routable.
    Unicast,

    /// RFC 1918 (IPv4) or unique local `fc00::/7` (IPv6).
    Private,

    /// `127.0.0.0/8`, `::1`.
    Loopback,

    /// `169.254.0.0/16`, `fe80::/10`.
    LinkLocal,

    /// Meta address: `0.0.0.0/8`, `::`.
    Unspecified,

    /// `224.0.0.0/4`, `ff00::/8`.
    Multicast,

    /// Documentation, benchmarking, broadcast and future-use blocks.
    Reserved,

    /// Special-purpose blocks that are neither private nor reserved
    /// (carrier-grade NAT, NAT64, 6to4, Teredo).
    Other,
}

impl AddressRange {
    /// Check if the range is globally routable unicast.
    pub fn is_unicast(&self) -> bool {
        matches!(self, AddressRange::Unicast)
    }

    /// Check if the range is the meta (unspecified) range.
    pub fn is_unspecified(&self) -> bool {
        matches!(self, AddressRange::Unspecified)
    }

    /// Short name of the range.
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressRange::Unicast => "unicast",
            AddressRange::Private => "private",
            AddressRange::Loopback => "loopback",
            AddressRange::LinkLocal => "link-local",
            AddressRange::Unspecified => "unspecified",
            AddressRange::Multicast => "multicast",
            AddressRange::Reserved => "reserved",
            AddressRange::Other => "other",
        }
    }
}

impl std::fmt::Display for AddressRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// IPv4 special-purpose blocks, first match wins.
const IPV4_RANGES: &[([u8; 4], u8, AddressRange)] = &[
    ([0, 0, 0, 0], 8, AddressRange::Unspecified),             // "this network" (RFC 1122)
    ([255, 255, 255, 255], 32, AddressRange::Reserved),       // limited broadcast
    ([224, 0, 0, 0], 4, AddressRange::Multicast),             // RFC 3171
    ([169, 254, 0, 0], 16, AddressRange::LinkLocal),          // RFC 3927
    ([127, 0, 0, 0], 8, AddressRange::Loopback),              // RFC 1122
    ([10, 0, 0, 0], 8, AddressRange::Private),                // RFC 1918
    ([172, 16, 0, 0], 12, AddressRange::Private),             // RFC 1918
    ([192, 168, 0, 0], 16, AddressRange::Private),            // RFC 1918
    ([100, 64, 0, 0], 10, AddressRange::Other),               // CGNAT (RFC 6598)
    ([192, 0, 0, 0], 24, AddressRange::Reserved),             // IETF assignments (RFC 6890)
    ([192, 0, 2, 0], 24, AddressRange::Reserved),             // TEST-NET-1 (RFC 5737)
    ([192, 88, 99, 0], 24, AddressRange::Reserved),           // 6to4 relay anycast (RFC 7526)
    ([198, 18, 0, 0], 15, AddressRange::Reserved),            // benchmarking (RFC 2544)
    ([198, 51, 100, 0], 24, AddressRange::Reserved),          // TEST-NET-2 (RFC 5737)
    ([203, 0, 113, 0], 24, AddressRange::Reserved),           // TEST-NET-3 (RFC 5737)
    ([240, 0, 0, 0], 4, AddressRange::Reserved),              // future use (RFC 6890)
];

/// IPv6 special-purpose blocks, first match wins. Anything not listed and
/// outside `2000::/3` is reserved.
const IPV6_RANGES: &[([u16; 8], u8, AddressRange)] = &[
    ([0xff00, 0, 0, 0, 0, 0, 0, 0], 8, AddressRange::Multicast),
    ([0xfe80, 0, 0, 0, 0, 0, 0, 0], 10, AddressRange::LinkLocal),
    ([0xfc00, 0, 0, 0, 0, 0, 0, 0], 7, AddressRange::Private),        // unique local (RFC 4193)
    ([0x0064, 0xff9b, 0, 0, 0, 0, 0, 0], 96, AddressRange::Other),    // NAT64 (RFC 6052)
    ([0x2002, 0, 0, 0, 0, 0, 0, 0], 16, AddressRange::Other),         // 6to4 (RFC 3056)
    ([0x2001, 0, 0, 0, 0, 0, 0, 0], 32, AddressRange::Other),         // Teredo (RFC 4380)
    ([0x2001, 0x0db8, 0, 0, 0, 0, 0, 0], 32, AddressRange::Reserved), // documentation (RFC 3849)
    ([0x0100, 0, 0, 0, 0, 0, 0, 0], 64, AddressRange::Reserved),      // discard (RFC 6666)
    ([0x2000, 0, 0, 0, 0, 0, 0, 0], 3, AddressRange::Unicast),
];

/// Classify a literal IP address string.
///
/// Accepts bracketed IPv6 (`[::1]`) and a `%zone` suffix on IPv6.
///
/// # Errors
///
/// Returns [`FilterError::InvalidAddress`] if `address` is not an IP literal.
/// Callers check [`is_ip_literal`] first; host names never get here.
pub fn classify(address: &str) -> Result<AddressRange> {
    parse_ip_literal(address)
        .map(classify_ip)
        .ok_or_else(|| FilterError::InvalidAddress(address.to_string()))
}

/// Classify an IP address. Computed from the address bytes every time.
pub fn classify_ip(ip: IpAddr) -> AddressRange {
    match ip {
        IpAddr::V4(ip) => classify_ipv4(ip),
        IpAddr::V6(ip) => classify_ipv6(ip),
    }
}

fn classify_ipv4(ip: Ipv4Addr) -> AddressRange {
    IPV4_RANGES
        .iter()
        .find(|(base, prefix, _)| ipv4_in_cidr(ip, *base, *prefix))
        .map(|(_, _, range)| *range)
        .unwrap_or(AddressRange::Unicast)
}

fn classify_ipv6(ip: Ipv6Addr) -> AddressRange {
    if ip.is_unspecified() {
        return AddressRange::Unspecified;
    }
    if ip.is_loopback() {
        return AddressRange::Loopback;
    }

    // ::ffff:a.b.c.d takes the range of a.b.c.d
    if let Some(v4) = ip.to_ipv4_mapped() {
        return classify_ipv4(v4);
    }

    IPV6_RANGES
        .iter()
        .find(|(base, prefix, _)| ipv6_in_cidr(ip, *base, *prefix))
        .map(|(_, _, range)| *range)
        .unwrap_or(AddressRange::Reserved)
}

/// Check if a host string is a literal IP address.
pub fn is_ip_literal(host: &str) -> bool {
    parse_ip_literal(host).is_some()
}

/// Parse a host string as a literal IP address.
///
/// Strips IPv6 brackets and zone IDs (e.g. `fe80::1%eth0`).
pub fn parse_ip_literal(host: &str) -> Option<IpAddr> {
    bare_literal(host).parse().ok()
}

/// Strip whitespace, IPv6 brackets and an IPv6 zone ID.
pub(crate) fn bare_literal(host: &str) -> &str {
    let host = host.trim();
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    if host.contains(':') {
        host.split_once('%').map(|(ip, _)| ip).unwrap_or(host)
    } else {
        host
    }
}

/// Check if IPv4 is in a CIDR range.
fn ipv4_in_cidr(ip: Ipv4Addr, base: [u8; 4], prefix: u8) -> bool {
    let ip = u32::from(ip);
    let base = u32::from(Ipv4Addr::from(base));
    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    };
    (ip & mask) == (base & mask)
}

/// Check if IPv6 is in a CIDR range.
fn ipv6_in_cidr(ip: Ipv6Addr, base: [u16; 8], prefix: u8) -> bool {
    let ip = u128::from(ip);
    let base = u128::from(Ipv6Addr::from(base));
    let mask = if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - prefix)
    };
    (ip & mask) == (base & mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(s: &str) -> AddressRange {
        classify(s).unwrap()
    }

    #[test]
    fn test_classify_ipv4_unicast() {
        assert_eq!(range("8.8.8.8"), AddressRange::Unicast);
        assert_eq!(range("1.1.1.1"), AddressRange::Unicast);
        assert_eq!(range("93.184.216.34"), AddressRange::Unicast);
        assert_eq!(range("100.63.255.255"), AddressRange::Unicast);
        assert_eq!(range("172.32.0.1"), AddressRange::Unicast);
    }

    #[test]
    fn test_classify_ipv4_special() {
        assert_eq!(range("0.0.0.0"), AddressRange::Unspecified);
        assert_eq!(range("0.1.2.3"), AddressRange::Unspecified);
        assert_eq!(range("127.0.0.1"), AddressRange::Loopback);
        assert_eq!(range("127.255.255.255"), AddressRange::Loopback);
        assert_eq!(range("10.0.0.1"), AddressRange::Private);
        assert_eq!(range("172.16.0.1"), AddressRange::Private);
        assert_eq!(range("172.31.255.255"), AddressRange::Private);
        assert_eq!(range("192.168.1.1"), AddressRange::Private);
        assert_eq!(range("169.254.169.254"), AddressRange::LinkLocal);
        assert_eq!(range("224.0.0.1"), AddressRange::Multicast);
        assert_eq!(range("239.255.255.255"), AddressRange::Multicast);
        assert_eq!(range("255.255.255.255"), AddressRange::Reserved);
        assert_eq!(range("100.64.0.1"), AddressRange::Other);
    }

    #[test]
    fn test_classify_ipv4_reserved() {
        assert_eq!(range("192.0.0.8"), AddressRange::Reserved);
        assert_eq!(range("192.0.2.1"), AddressRange::Reserved);
        assert_eq!(range("198.18.0.1"), AddressRange::Reserved);
        assert_eq!(range("198.19.255.255"), AddressRange::Reserved);
        assert_eq!(range("198.51.100.1"), AddressRange::Reserved);
        assert_eq!(range("203.0.113.1"), AddressRange::Reserved);
        assert_eq!(range("240.0.0.1"), AddressRange::Reserved);
    }

    #[test]
    fn test_classify_ipv6() {
        assert_eq!(range("::"), AddressRange::Unspecified);
        assert_eq!(range("::1"), AddressRange::Loopback);
        assert_eq!(range("[::1]"), AddressRange::Loopback);
        assert_eq!(range("fe80::1"), AddressRange::LinkLocal);
        assert_eq!(range("fe80::1%eth0"), AddressRange::LinkLocal);
        assert_eq!(range("fc00::1"), AddressRange::Private);
        assert_eq!(range("fd12:3456::1"), AddressRange::Private);
        assert_eq!(range("ff02::1"), AddressRange::Multicast);
        assert_eq!(range("2001:db8::1"), AddressRange::Reserved);
        assert_eq!(range("100::1"), AddressRange::Reserved);
        assert_eq!(range("2606:4700::1111"), AddressRange::Unicast);
        assert_eq!(range("2a00:1450:4001::200e"), AddressRange::Unicast);
    }

    #[test]
    fn test_classify_ipv6_embedded_ipv4() {
        assert_eq!(range("::ffff:127.0.0.1"), AddressRange::Loopback);
        assert_eq!(range("::ffff:10.0.0.1"), AddressRange::Private);
        assert_eq!(range("::ffff:0.0.0.0"), AddressRange::Unspecified);
        assert_eq!(range("::ffff:8.8.8.8"), AddressRange::Unicast);
        assert_eq!(range("64:ff9b::7f00:1"), AddressRange::Other);
        assert_eq!(range("2002:7f00:1::"), AddressRange::Other);
        assert_eq!(range("2001:0:4136:e378::1"), AddressRange::Other);
        // IPv4-compatible form is deprecated
        assert_eq!(range("::127.0.0.1"), AddressRange::Reserved);
    }

    #[test]
    fn test_classify_rejects_non_literals() {
        assert!(matches!(
            classify("example.com"),
            Err(FilterError::InvalidAddress(_))
        ));
        assert!(classify("").is_err());
        assert!(classify("127.0.0.1%eth0").is_err());
    }

    #[test]
    fn test_non_canonical_forms_are_names() {
        assert!(!is_ip_literal("0x7f000001"));
        assert!(!is_ip_literal("017700000001"));
        assert!(!is_ip_literal("2130706433"));
        assert!(!is_ip_literal("127.1"));
        assert!(is_ip_literal("127.0.0.1"));
        assert!(is_ip_literal("[2001:db8::1]"));
    }

    #[test]
    fn test_ipv4_in_cidr() {
        let ip: Ipv4Addr = "10.1.2.3".parse().unwrap();
        assert!(ipv4_in_cidr(ip, [10, 0, 0, 0], 8));
        assert!(ipv4_in_cidr(ip, [0, 0, 0, 0], 0));
        assert!(!ipv4_in_cidr(ip, [10, 1, 3, 0], 24));
    }
}

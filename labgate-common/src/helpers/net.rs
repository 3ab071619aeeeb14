use std::net::IpAddr;

use ipnet::{Ipv4Net, Ipv6Net};

/// Network-prefix equality used for token session binding: /24 for IPv4,
/// /64 for IPv6. Identical addresses trivially match; mixed families never do.
pub fn same_subnet(a: IpAddr, b: IpAddr) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (IpAddr::V4(a), IpAddr::V4(b)) => {
            // Prefix lengths are in range, can't fail
            #[allow(clippy::unwrap_used)]
            let net = Ipv4Net::new(a, 24).unwrap().trunc();
            net.contains(&b)
        }
        (IpAddr::V6(a), IpAddr::V6(b)) => {
            #[allow(clippy::unwrap_used)]
            let net = Ipv6Net::new(a, 64).unwrap().trunc();
            net.contains(&b)
        }
        _ => false,
    }
}

/// Whether an address is acceptable as a client identity when taken from a
/// forwarded-header chain. Private, loopback, link-local and unspecified
/// ranges are rejected so that spoofed internal hops don't become the
/// rate-limiting identity.
pub fn is_public_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast())
        }
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            let is_unique_local = (segments[0] & 0xfe00) == 0xfc00;
            let is_link_local = (segments[0] & 0xffc0) == 0xfe80;
            !(v6.is_loopback() || v6.is_unspecified() || is_unique_local || is_link_local)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_same_subnet_ipv4() {
        assert!(same_subnet(ip("203.0.113.10"), ip("203.0.113.10")));
        assert!(same_subnet(ip("203.0.113.10"), ip("203.0.113.250")));
        assert!(!same_subnet(ip("203.0.113.10"), ip("203.0.114.10")));
    }

    #[test]
    fn test_same_subnet_ipv6() {
        assert!(same_subnet(
            ip("2001:db8:1:2:aaaa::1"),
            ip("2001:db8:1:2:bbbb::2")
        ));
        assert!(!same_subnet(ip("2001:db8:1:2::1"), ip("2001:db8:1:3::1")));
    }

    #[test]
    fn test_same_subnet_mixed_families() {
        assert!(!same_subnet(ip("203.0.113.10"), ip("2001:db8::1")));
    }

    #[test]
    fn test_is_public_ip() {
        assert!(is_public_ip(ip("203.0.113.10")));
        assert!(!is_public_ip(ip("10.0.0.1")));
        assert!(!is_public_ip(ip("192.168.1.1")));
        assert!(!is_public_ip(ip("127.0.0.1")));
        assert!(!is_public_ip(ip("0.0.0.0")));
        assert!(!is_public_ip(ip("::1")));
        assert!(!is_public_ip(ip("fe80::1")));
        assert!(!is_public_ip(ip("fd00::1")));
        assert!(is_public_ip(ip("2001:db8::1")));
    }
}

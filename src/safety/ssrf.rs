//! SSRF defense: refuse to fetch anything that resolves into private,
//! loopback, link-local, multicast or cloud-metadata address space.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use log::debug;
use url::{Host, Url};

use super::SafetyError;

/// Check a URL against the SSRF policy.
///
/// IP-literal hosts are classified directly, without touching DNS. Domain
/// hosts are resolved and every returned address must be publicly
/// routable; one bad address blocks the URL.
pub async fn check_ssrf(url: &Url) -> Result<(), SafetyError> {
    let host = url
        .host()
        .ok_or_else(|| SafetyError::Resolve(format!("{url}: no host")))?;

    match host {
        Host::Ipv4(addr) => classify(IpAddr::V4(addr), url.as_str()),
        Host::Ipv6(addr) => classify(IpAddr::V6(addr), url.as_str()),
        Host::Domain(domain) => {
            // A numeric-looking hostname is classified without a lookup.
            if let Ok(literal) = domain.parse::<IpAddr>() {
                return classify(literal, url.as_str());
            }
            let port = url.port_or_known_default().unwrap_or(443);
            let addrs = tokio::net::lookup_host((domain, port))
                .await
                .map_err(|e| SafetyError::Resolve(format!("{domain}: {e}")))?;
            let mut any = false;
            for addr in addrs {
                any = true;
                classify(addr.ip(), url.as_str())?;
            }
            if !any {
                return Err(SafetyError::Resolve(format!("{domain}: no addresses")));
            }
            debug!(target: "webmirror::safety", "ssrf ok: {url}");
            Ok(())
        }
    }
}

fn classify(ip: IpAddr, detail: &str) -> Result<(), SafetyError> {
    match blocked_range(ip) {
        Some(reason) => Err(SafetyError::Ssrf {
            reason,
            detail: format!("{detail} -> {ip}"),
        }),
        None => Ok(()),
    }
}

/// Name of the blocked range an address falls into, or `None` when the
/// address is publicly routable.
pub fn blocked_range(ip: IpAddr) -> Option<&'static str> {
    match ip {
        IpAddr::V4(v4) => blocked_v4(v4),
        IpAddr::V6(v6) => blocked_v6(v6),
    }
}

fn blocked_v4(ip: Ipv4Addr) -> Option<&'static str> {
    if ip.is_loopback() {
        Some("loopback")
    } else if ip.is_private() {
        // 10/8, 172.16/12, 192.168/16
        Some("private")
    } else if ip.is_link_local() {
        // 169.254/16, which contains the cloud metadata endpoint
        Some("link-local")
    } else if ip.is_multicast() {
        Some("multicast")
    } else if ip.is_broadcast() || ip.is_unspecified() {
        Some("reserved")
    } else {
        None
    }
}

fn blocked_v6(ip: Ipv6Addr) -> Option<&'static str> {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return blocked_v4(mapped);
    }
    let head = ip.segments()[0];
    if ip.is_loopback() {
        Some("loopback")
    } else if ip.is_multicast() {
        Some("multicast")
    } else if (head & 0xfe00) == 0xfc00 {
        // fc00::/7 unique local
        Some("private")
    } else if (head & 0xffc0) == 0xfe80 {
        // fe80::/10
        Some("link-local")
    } else if ip.is_unspecified() {
        Some("reserved")
    } else {
        None
    }
}

use anyhow::{Result, anyhow};
use ipnet::IpNet;
use std::net::IpAddr;

/// Parses the original client IP from X-Forwarded-For header
/// Format: "client, proxy1, proxy2, ..." - returns the leftmost (original client) IP
#[must_use]
pub fn parse_original_client_ip(xff_header: &str) -> Option<String> {
    xff_header
        .split(',')
        .next()
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

/// Parses `allowed_proxy_ips` entries, each a single IP or a CIDR subnet
pub fn parse_allowlist(entries: &[String]) -> Result<Vec<IpNet>> {
    entries
        .iter()
        .map(|entry| {
            entry
                .parse::<IpAddr>()
                .map(IpNet::from)
                .or_else(|_| entry.parse::<IpNet>())
                .map_err(|_| {
                    anyhow!("Invalid IP address or CIDR in allowed_proxy_ips: {}", entry)
                })
        })
        .collect()
}

/// Checks if a peer address may connect
/// Returns true if no allowlist is configured (allow all) or if IP matches any entry
#[must_use]
pub fn is_proxy_ip_allowed(peer_ip: IpAddr, allowlist: Option<&[IpNet]>) -> bool {
    allowlist.is_none_or(|nets| nets.iter().any(|net| net.contains(&peer_ip)))
}

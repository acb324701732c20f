use std::net::IpAddr;

use axum::http::HeaderMap;
use ipnet::IpNet;
use serde::Serialize;

/// Where a submission came from. Stored with the record, never rendered.
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub ip: IpAddr,
    pub user_agent: String,
}

impl ClientInfo {
    pub fn extract(headers: &HeaderMap, peer_addr: IpAddr, trusted_proxies: &[IpNet]) -> Self {
        let user_agent = headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        ClientInfo {
            ip: client_ip(headers, peer_addr, trusted_proxies),
            user_agent,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

fn client_ip(headers: &HeaderMap, peer: IpAddr, trusted_proxies: &[IpNet]) -> IpAddr {
    // Only trust X-Forwarded-For if the direct connection is from a trusted proxy
    if trusted_proxies.iter().any(|net| net.contains(&peer)) {
        if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            // Rightmost address that isn't one of our proxies
            for ip in xff.rsplit(',').filter_map(|s| s.trim().parse::<IpAddr>().ok()) {
                if !trusted_proxies.iter().any(|net| net.contains(&ip)) {
                    return ip;
                }
            }
        }
    }

    peer
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(xff: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert("x-forwarded-for", xff.parse().unwrap());
        h
    }

    #[test]
    fn ignores_forwarded_for_from_untrusted_peer() {
        let peer: IpAddr = "203.0.113.9".parse().unwrap();
        let info = ClientInfo::extract(&headers("1.2.3.4"), peer, &[]);
        assert_eq!(info.ip, peer);
    }

    #[test]
    fn honours_forwarded_for_from_trusted_proxy() {
        let proxies: Vec<IpNet> = vec!["10.0.0.0/8".parse().unwrap()];
        let peer: IpAddr = "10.0.0.2".parse().unwrap();
        let info = ClientInfo::extract(&headers("1.2.3.4, 10.0.0.7"), peer, &proxies);
        assert_eq!(info.ip, "1.2.3.4".parse::<IpAddr>().unwrap());
    }
}

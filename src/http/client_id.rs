//! Client identifier resolution for rate limiting and logs.

use axum::http::HeaderMap;
use std::net::SocketAddr;

pub const X_REAL_IP: &str = "x-real-ip";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Identifier used when neither proxy headers nor a peer address are available.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Resolve the identifier for the requesting client.
///
/// Precedence: `X-Real-IP`, then the left-most `X-Forwarded-For` entry, then
/// the transport peer address. Both headers are assumed to be set by a
/// trusted proxy; the value is not validated as an IP address.
pub fn resolve_client_id(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(real_ip) = header_str(headers, X_REAL_IP) {
        return real_ip.to_string();
    }

    if let Some(forwarded) = header_str(headers, X_FORWARDED_FOR)
        .and_then(|v| v.split(',').map(str::trim).find(|hop| !hop.is_empty()))
    {
        return forwarded.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> Option<SocketAddr> {
        Some("192.0.2.10:54321".parse().unwrap())
    }

    #[test]
    fn test_real_ip_takes_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert(X_REAL_IP, HeaderValue::from_static("203.0.113.5"));
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("198.51.100.1"));

        assert_eq!(resolve_client_id(&headers, peer()), "203.0.113.5");
    }

    #[test]
    fn test_forwarded_for_uses_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            X_FORWARDED_FOR,
            HeaderValue::from_static(" 198.51.100.1 , 10.0.0.1, 10.0.0.2"),
        );

        assert_eq!(resolve_client_id(&headers, peer()), "198.51.100.1");
    }

    #[test]
    fn test_falls_back_to_peer_ip() {
        let headers = HeaderMap::new();
        assert_eq!(resolve_client_id(&headers, peer()), "192.0.2.10");
    }

    #[test]
    fn test_empty_headers_are_skipped() {
        let mut headers = HeaderMap::new();
        headers.insert(X_REAL_IP, HeaderValue::from_static("  "));
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static(", ,"));

        assert_eq!(resolve_client_id(&headers, peer()), "192.0.2.10");
    }

    #[test]
    fn test_unknown_without_peer() {
        let headers = HeaderMap::new();
        assert_eq!(resolve_client_id(&headers, None), UNKNOWN_CLIENT);
    }
}

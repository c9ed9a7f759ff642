// src/proxy/headers.rs

//! Header helpers shared by both proxy strategies.

use std::net::IpAddr;

use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::http::uri::Authority;

/// Headers that only make sense for a single connection and must not be
/// forwarded (RFC 9110 §7.6.1), plus the legacy `Proxy-Connection`.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Comma-separated tokens of every `Connection` header, lowercased.
fn connection_tokens(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// True when the `Connection` header lists `token` (case-insensitive).
pub fn connection_has_token(headers: &HeaderMap, token: &str) -> bool {
    connection_tokens(headers)
        .iter()
        .any(|t| t.eq_ignore_ascii_case(token))
}

/// True when the headers carry a WebSocket upgrade handshake:
/// `Connection: upgrade` and `Upgrade: websocket`.
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let upgrade_is_websocket = headers
        .get_all(header::UPGRADE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|p| p.trim().eq_ignore_ascii_case("websocket"));

    upgrade_is_websocket && connection_has_token(headers, "upgrade")
}

/// Drop hop-by-hop headers, including any header named in `Connection`.
pub fn remove_hop_by_hop(headers: &mut HeaderMap) {
    for name in connection_tokens(headers) {
        if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
            headers.remove(name);
        }
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Point the `Host` header at the upstream.
pub fn set_host(headers: &mut HeaderMap, authority: &Authority) {
    if let Ok(value) = HeaderValue::from_str(authority.as_str()) {
        headers.insert(header::HOST, value);
    }
}

/// Append the client address to `X-Forwarded-For`, keeping earlier hops.
pub fn append_forwarded_for(headers: &mut HeaderMap, client: IpAddr) {
    let prior: Vec<&str> = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    let value = if prior.is_empty() {
        client.to_string()
    } else {
        format!("{}, {}", prior.join(", "), client)
    };

    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(
                HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn websocket_handshake_is_detected() {
        assert!(is_websocket_upgrade(&headers(&[
            ("connection", "Upgrade"),
            ("upgrade", "websocket"),
        ])));
        // Browsers send `keep-alive, Upgrade`.
        assert!(is_websocket_upgrade(&headers(&[
            ("connection", "keep-alive, Upgrade"),
            ("upgrade", "WebSocket"),
        ])));
    }

    #[test]
    fn partial_or_other_upgrades_are_not_websocket() {
        assert!(!is_websocket_upgrade(&headers(&[("upgrade", "websocket")])));
        assert!(!is_websocket_upgrade(&headers(&[("connection", "upgrade")])));
        assert!(!is_websocket_upgrade(&headers(&[
            ("connection", "upgrade"),
            ("upgrade", "h2c"),
        ])));
        assert!(!is_websocket_upgrade(&HeaderMap::new()));
    }

    #[test]
    fn hop_by_hop_headers_are_removed() {
        let mut map = headers(&[
            ("connection", "keep-alive, x-session-hop"),
            ("keep-alive", "timeout=5"),
            ("x-session-hop", "1"),
            ("transfer-encoding", "chunked"),
            ("te", "trailers"),
            ("accept", "text/html"),
            ("cookie", "a=b"),
        ]);

        remove_hop_by_hop(&mut map);

        assert!(map.get("connection").is_none());
        assert!(map.get("keep-alive").is_none());
        assert!(map.get("x-session-hop").is_none());
        assert!(map.get("transfer-encoding").is_none());
        assert!(map.get("te").is_none());
        assert_eq!(map.get("accept").unwrap(), "text/html");
        assert_eq!(map.get("cookie").unwrap(), "a=b");
    }

    #[test]
    fn forwarded_for_appends_to_existing_chain() {
        let mut map = headers(&[("x-forwarded-for", "10.0.0.1")]);
        append_forwarded_for(&mut map, "127.0.0.1".parse().unwrap());
        assert_eq!(map.get("x-forwarded-for").unwrap(), "10.0.0.1, 127.0.0.1");

        let mut fresh = HeaderMap::new();
        append_forwarded_for(&mut fresh, "::1".parse().unwrap());
        assert_eq!(fresh.get("x-forwarded-for").unwrap(), "::1");
    }

    #[test]
    fn host_is_rewritten() {
        let mut map = headers(&[("host", "localhost:3030")]);
        set_host(&mut map, &Authority::from_static("localhost:3000"));
        assert_eq!(map.get("host").unwrap(), "localhost:3000");
    }
}

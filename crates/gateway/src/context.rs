use std::net::SocketAddr;
use std::time::Instant;

/// Per-request context carried through the Pingora proxy pipeline.
pub struct RequestContext {
    /// Matched route index (into the config's routes vec).
    pub route_index: Option<usize>,

    /// Caller identity used for the rate-limit key.
    pub client_ip: String,

    /// Request start time for latency measurement.
    pub request_start: Instant,

    /// Set when the limiter rejected the request.
    pub retry_after_secs: Option<u64>,

    /// HTTP method (cached for logging).
    pub method: String,

    /// Request path (cached for logging and keying).
    pub path: String,

    /// Response status code.
    pub response_status: u16,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            route_index: None,
            client_ip: String::new(),
            request_start: Instant::now(),
            retry_after_secs: None,
            method: String::new(),
            path: String::new(),
            response_status: 0,
        }
    }

    pub fn rate_limited(&self) -> bool {
        self.retry_after_secs.is_some()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve the caller identity for a request.
///
/// With `trust_forwarded_for`, the first `X-Forwarded-For` hop wins. Otherwise
/// (or when the header is missing) the socket peer is used with its port
/// stripped.
pub fn client_identity(
    forwarded_for: Option<&str>,
    peer: Option<&str>,
    trust_forwarded_for: bool,
) -> String {
    if trust_forwarded_for {
        let first_hop = forwarded_for
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|s| !s.is_empty());
        if let Some(hop) = first_hop {
            return hop.to_string();
        }
    }

    match peer {
        Some(addr) => addr
            .parse::<SocketAddr>()
            .map(|sa| sa.ip().to_string())
            .unwrap_or_else(|_| addr.to_string()),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_port_is_stripped() {
        assert_eq!(client_identity(None, Some("192.0.2.10:51234"), false), "192.0.2.10");
        assert_eq!(client_identity(None, Some("[2001:db8::1]:443"), false), "2001:db8::1");
    }

    #[test]
    fn forwarded_for_ignored_unless_trusted() {
        let xff = Some("198.51.100.4, 10.0.0.1");
        assert_eq!(client_identity(xff, Some("10.0.0.1:9000"), false), "10.0.0.1");
        assert_eq!(client_identity(xff, Some("10.0.0.1:9000"), true), "198.51.100.4");
    }

    #[test]
    fn empty_forwarded_for_falls_back_to_peer() {
        assert_eq!(client_identity(Some(" "), Some("10.0.0.1:9000"), true), "10.0.0.1");
    }

    #[test]
    fn unparseable_peer_is_kept_verbatim() {
        assert_eq!(client_identity(None, Some("unix:/run/tixgate.sock"), false), "unix:/run/tixgate.sock");
        assert_eq!(client_identity(None, None, false), "");
    }
}

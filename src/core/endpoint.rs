//! `ws://` / `wss://` endpoint parsing

use crate::WsError;
use std::fmt;
use url::{Host, Url};

/// Parsed connection target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// `wss` scheme
    pub secure: bool,
    /// Host name or IP literal, without IPv6 brackets
    pub host: String,
    pub port: u16,
    /// Request target: path plus `?query` when present
    pub path: String,
}

impl Endpoint {
    /// Parse a WebSocket URL
    ///
    /// The port defaults to 80 (`ws`) or 443 (`wss`); an empty path becomes `/`.
    pub fn parse(raw: &str) -> Result<Self, WsError> {
        let url = Url::parse(raw.trim()).map_err(|e| WsError::InvalidUrl(format!("{raw}: {e}")))?;

        let secure = match url.scheme() {
            "ws" => false,
            "wss" => true,
            other => {
                return Err(WsError::InvalidUrl(format!(
                    "{raw}: unsupported scheme '{other}' (expected ws or wss)"
                )))
            }
        };

        let host = match url.host() {
            Some(Host::Domain(d)) if !d.is_empty() => d.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            _ => return Err(WsError::InvalidUrl(format!("{raw}: missing host"))),
        };

        let port = url
            .port_or_known_default()
            .unwrap_or(if secure { 443 } else { 80 });

        let mut path = match url.path() {
            "" => "/".to_string(),
            p => p.to_string(),
        };
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self {
            secure,
            host,
            port,
            path,
        })
    }

    #[inline]
    pub fn default_port(&self) -> u16 {
        if self.secure {
            443
        } else {
            80
        }
    }

    /// Value of the `Host` header; the port is appended only when non-default
    pub fn host_header(&self) -> String {
        let host = self.bracketed_host();
        if self.port == self.default_port() {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }

    /// `host:port` for socket address resolution
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bracketed_host(), self.port)
    }

    fn bracketed_host(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "wss" } else { "ws" };
        write!(f, "{scheme}://{}{}", self.host_header(), self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let ep = Endpoint::parse("wss://stream.example.com").unwrap();
        assert!(ep.secure);
        assert_eq!(ep.host, "stream.example.com");
        assert_eq!(ep.port, 443);
        assert_eq!(ep.path, "/");
        assert_eq!(ep.host_header(), "stream.example.com");

        let ep = Endpoint::parse("ws://localhost/feed").unwrap();
        assert!(!ep.secure);
        assert_eq!(ep.port, 80);
        assert_eq!(ep.path, "/feed");
    }

    #[test]
    fn test_parse_port_and_query() {
        let ep = Endpoint::parse("ws://127.0.0.1:9001/ws/v1?stream=trades&depth=5").unwrap();
        assert_eq!(ep.host, "127.0.0.1");
        assert_eq!(ep.port, 9001);
        assert_eq!(ep.path, "/ws/v1?stream=trades&depth=5");
        assert_eq!(ep.host_header(), "127.0.0.1:9001");
        assert_eq!(ep.socket_addr(), "127.0.0.1:9001");
    }

    #[test]
    fn test_ipv6_host_is_bracketed_in_headers() {
        let ep = Endpoint::parse("ws://[::1]:8080/").unwrap();
        assert_eq!(ep.host, "::1");
        assert_eq!(ep.host_header(), "[::1]:8080");
        assert_eq!(ep.socket_addr(), "[::1]:8080");
    }

    #[test]
    fn test_rejects_bad_urls() {
        for raw in ["http://example.com", "example.com", "", "ws://", "ftp://host/file"] {
            assert!(
                matches!(Endpoint::parse(raw), Err(WsError::InvalidUrl(_))),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn test_display_round_trips() {
        let ep = Endpoint::parse("wss://example.com:8443/a?b=c").unwrap();
        assert_eq!(ep.to_string(), "wss://example.com:8443/a?b=c");
    }
}

//! Keys identifying which sessions can serve which requests.

use std::fmt;

use url::Url;

/// Host and port of an origin or proxy.
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct HostPortPair {
    host: String,
    port: u16,
}

impl HostPortPair {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into().to_ascii_lowercase(),
            port,
        }
    }

    /// Origin of `url`, using the scheme's default port when none is given.
    pub fn from_url(url: &Url) -> Option<Self> {
        let host = url.host_str()?;
        let port = url.port_or_known_default()?;
        Some(Self::new(host, port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for HostPortPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Proxy a session's connection goes through.
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Default)]
pub enum ProxyServer {
    #[default]
    Direct,
    Http(HostPortPair),
    Https(HostPortPair),
}

impl ProxyServer {
    pub fn is_direct(&self) -> bool {
        matches!(self, ProxyServer::Direct)
    }
}

impl fmt::Display for ProxyServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyServer::Direct => f.write_str("DIRECT"),
            ProxyServer::Http(hp) => write!(f, "PROXY {}", hp),
            ProxyServer::Https(hp) => write!(f, "HTTPS {}", hp),
        }
    }
}

/// Whether a session may carry credentials-bearing requests.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord, Default)]
pub enum PrivacyMode {
    #[default]
    Disabled,
    Enabled,
}

/// Pool key: origin, proxy and privacy mode.
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct SpdySessionKey {
    pub host_port_pair: HostPortPair,
    pub proxy_server: ProxyServer,
    pub privacy_mode: PrivacyMode,
}

impl SpdySessionKey {
    pub fn new(
        host_port_pair: HostPortPair,
        proxy_server: ProxyServer,
        privacy_mode: PrivacyMode,
    ) -> Self {
        Self {
            host_port_pair,
            proxy_server,
            privacy_mode,
        }
    }

    /// Direct connection to `host:port` without privacy mode.
    pub fn direct(host: impl Into<String>, port: u16) -> Self {
        Self::new(
            HostPortPair::new(host, port),
            ProxyServer::Direct,
            PrivacyMode::Disabled,
        )
    }
}

impl fmt::Display for SpdySessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via {}", self.host_port_pair, self.proxy_server)?;
        if self.privacy_mode == PrivacyMode::Enabled {
            f.write_str(" (private)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_port_pair_from_url() {
        let url = Url::parse("https://WWW.Example.org/index.html").unwrap();
        let hp = HostPortPair::from_url(&url).unwrap();
        assert_eq!(hp.host(), "www.example.org");
        assert_eq!(hp.port(), 443);
        assert_eq!(hp.to_string(), "www.example.org:443");

        let url = Url::parse("http://example.org:8080/").unwrap();
        assert_eq!(HostPortPair::from_url(&url).unwrap().port(), 8080);
    }

    #[test]
    fn test_ipv6_display() {
        let hp = HostPortPair::new("::1", 443);
        assert_eq!(hp.to_string(), "[::1]:443");
    }

    #[test]
    fn test_session_key_equality() {
        let a = SpdySessionKey::direct("example.com", 443);
        let b = SpdySessionKey::direct("EXAMPLE.com", 443);
        let c = SpdySessionKey::new(
            HostPortPair::new("example.com", 443),
            ProxyServer::Direct,
            PrivacyMode::Enabled,
        );
        let d = SpdySessionKey::new(
            HostPortPair::new("example.com", 443),
            ProxyServer::Https(HostPortPair::new("proxy.example.com", 443)),
            PrivacyMode::Disabled,
        );

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert!(!d.proxy_server.is_direct());
    }
}

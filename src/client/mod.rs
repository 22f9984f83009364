//! Tokio runtime around the session pool.
//!
//! The driver owns a [`SpdySessionPool`](crate::SpdySessionPool) in a
//! background task and serves requests sent through cloneable
//! [`SpdyClient`] handles. Connections are handed in already established
//! (TCP, TLS or anything else implementing `AsyncRead + AsyncWrite`).

use bytes::Bytes;
use http::Method;
use url::Url;

use crate::protocol::{RequestPriority, SpdyMajorVersion};
use crate::spdy::SpdyHeaderBlock;

pub mod driver;
pub mod handle;
pub mod response;
pub mod socket;

pub use driver::SpdyDriver;
pub use handle::SpdyClient;
pub use response::SpdyResponse;
pub use socket::{SocketCompletion, TokioSocket};

/// A request to run on a session.
#[derive(Debug, Clone)]
pub struct SpdyRequest {
    pub method: Method,
    pub url: Url,
    pub priority: RequestPriority,
    /// Extra headers; names are lowercased on the wire.
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl SpdyRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            priority: RequestPriority::Medium,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: Url, body: impl Into<Bytes>) -> Self {
        Self::new(Method::POST, url).with_body(body)
    }

    pub fn with_priority(mut self, priority: RequestPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Header block for the SYN_STREAM (HEADERS) frame in `version`'s dialect.
    pub fn spdy_headers(&self, version: SpdyMajorVersion) -> SpdyHeaderBlock {
        let mut block = SpdyHeaderBlock::new();
        let host = host_and_optional_port(&self.url);
        let path = path_for_request(&self.url);
        let method = self.method.as_str().to_string();

        match version {
            SpdyMajorVersion::Spdy2 => {
                block.insert("method".into(), method);
                block.insert("url".into(), path);
                block.insert("version".into(), "HTTP/1.1".into());
                block.insert("host".into(), host);
                block.insert("scheme".into(), self.url.scheme().into());
            }
            SpdyMajorVersion::Spdy3 => {
                block.insert(":method".into(), method);
                block.insert(":path".into(), path);
                block.insert(":scheme".into(), self.url.scheme().into());
                block.insert(":host".into(), host);
                block.insert(":version".into(), "HTTP/1.1".into());
            }
            SpdyMajorVersion::Spdy4 => {
                block.insert(":method".into(), method);
                block.insert(":path".into(), path);
                block.insert(":scheme".into(), self.url.scheme().into());
                block.insert(":authority".into(), host);
            }
        }

        for (name, value) in &self.headers {
            let name = name.to_ascii_lowercase();
            // Connection-specific headers have no meaning on a multiplexed session.
            if matches!(
                name.as_str(),
                "connection" | "keep-alive" | "proxy-connection" | "transfer-encoding" | "host"
            ) {
                continue;
            }
            block
                .entry(name)
                .and_modify(|existing| {
                    existing.push('\0');
                    existing.push_str(value);
                })
                .or_insert_with(|| value.clone());
        }
        block
    }
}

fn host_and_optional_port(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

fn path_for_request(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SpdyRequest {
        SpdyRequest::get(Url::parse("https://www.example.org:8443/index.html?q=1").unwrap())
            .with_header("Accept", "text/html")
            .with_header("accept", "*/*")
            .with_header("Connection", "keep-alive")
    }

    #[test]
    fn test_spdy3_headers() {
        let headers = request().spdy_headers(SpdyMajorVersion::Spdy3);
        assert_eq!(headers[":method"], "GET");
        assert_eq!(headers[":path"], "/index.html?q=1");
        assert_eq!(headers[":scheme"], "https");
        assert_eq!(headers[":host"], "www.example.org:8443");
        assert_eq!(headers[":version"], "HTTP/1.1");
        assert_eq!(headers["accept"], "text/html\0*/*");
        assert!(!headers.contains_key("connection"));
    }

    #[test]
    fn test_spdy2_and_spdy4_headers() {
        let spdy2 = request().spdy_headers(SpdyMajorVersion::Spdy2);
        assert_eq!(spdy2["method"], "GET");
        assert_eq!(spdy2["url"], "/index.html?q=1");
        assert_eq!(spdy2["version"], "HTTP/1.1");

        let spdy4 = request().spdy_headers(SpdyMajorVersion::Spdy4);
        assert_eq!(spdy4[":authority"], "www.example.org:8443");
        assert!(!spdy4.contains_key(":host"));
        assert!(!spdy4.contains_key(":version"));
    }

    #[test]
    fn test_default_port_is_omitted() {
        let request = SpdyRequest::post(Url::parse("http://www.example.org/upload").unwrap(), "x");
        let headers = request.spdy_headers(SpdyMajorVersion::Spdy3);
        assert_eq!(headers[":host"], "www.example.org");
        assert_eq!(headers[":method"], "POST");
        assert_eq!(request.body.as_deref(), Some(&b"x"[..]));
    }
}

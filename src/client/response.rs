//! Response assembled from a finished stream.

use bytes::Bytes;
use http::StatusCode;

use crate::error::{Error, Result};
use crate::protocol::NextProto;
use crate::spdy::SpdyHeaderBlock;

/// Response headers and body of a completed request.
#[derive(Debug, Clone)]
pub struct SpdyResponse {
    status: StatusCode,
    headers: SpdyHeaderBlock,
    body: Bytes,
    protocol: NextProto,
}

impl SpdyResponse {
    /// Build a response from a stream's header block. Fails with `Protocol`
    /// when the block has no parseable status.
    pub fn from_parts(headers: SpdyHeaderBlock, body: Bytes, protocol: NextProto) -> Result<Self> {
        let status = headers
            .get(":status")
            .or_else(|| headers.get("status"))
            .and_then(|value| parse_status(value))
            .ok_or(Error::Protocol)?;
        Ok(Self {
            status,
            headers,
            body,
            protocol,
        })
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Protocol the response arrived over.
    pub fn protocol(&self) -> NextProto {
        self.protocol
    }

    pub fn headers(&self) -> &SpdyHeaderBlock {
        &self.headers
    }

    /// Value of `name`. Names are matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// All values of `name`; SPDY joins repeated headers with NUL.
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.header(name)
            .map(|value| value.split('\0').collect())
            .unwrap_or_default()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_redirect(&self) -> bool {
        self.status.is_redirection()
    }
}

/// SPDY status values carry a reason phrase: `"200 OK"`.
fn parse_status(value: &str) -> Option<StatusCode> {
    let code = value.split_whitespace().next()?;
    StatusCode::from_bytes(code.as_bytes()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> SpdyHeaderBlock {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_status_with_reason_phrase() {
        let response = SpdyResponse::from_parts(
            headers(&[(":status", "200 OK"), ("content-type", "text/plain")]),
            Bytes::from_static(b"hi"),
            NextProto::Spdy3,
        )
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.is_success());
        assert_eq!(response.content_type(), Some("text/plain"));
        assert_eq!(response.header("Content-Type"), Some("text/plain"));
        assert_eq!(response.body().as_ref(), b"hi");
    }

    #[test]
    fn test_spdy2_status_header() {
        let response = SpdyResponse::from_parts(
            headers(&[("status", "302 Found"), ("location", "/next")]),
            Bytes::new(),
            NextProto::DeprecatedSpdy2,
        )
        .unwrap();
        assert!(response.is_redirect());
    }

    #[test]
    fn test_missing_or_bad_status() {
        assert_eq!(
            SpdyResponse::from_parts(SpdyHeaderBlock::new(), Bytes::new(), NextProto::Spdy3)
                .unwrap_err(),
            Error::Protocol
        );
        assert!(SpdyResponse::from_parts(
            headers(&[(":status", "abc")]),
            Bytes::new(),
            NextProto::Spdy3
        )
        .is_err());
    }

    #[test]
    fn test_multi_valued_header() {
        let response = SpdyResponse::from_parts(
            headers(&[(":status", "200"), ("set-cookie", "a=1\0b=2")]),
            Bytes::new(),
            NextProto::Spdy31,
        )
        .unwrap();
        assert_eq!(response.header_values("set-cookie"), vec!["a=1", "b=2"]);
        assert!(response.header_values("missing").is_empty());
    }
}

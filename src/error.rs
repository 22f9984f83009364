//! Error types for the spdy-session crate.

use std::io;

use crate::spdy::framer::FramerError;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Certificate problems reported by the transport that established a secure session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertError {
    /// Certificate does not match the host name.
    CommonNameInvalid,
    /// Certificate is expired or not yet valid.
    DateInvalid,
    /// Certificate is not signed by a trusted authority.
    AuthorityInvalid,
    /// Certificate has been revoked.
    Revoked,
    /// Certificate chain did not satisfy a pinned public key set.
    PinnedKeyMissing,
    /// Any other certificate failure.
    Invalid,
}

/// Errors that can occur on a SPDY session or one of its streams.
///
/// Errors are `Copy` so that a single session-fatal cause can be delivered to
/// every outstanding request and stream unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Generic failure (e.g. stream creation on a session that is going away).
    #[error("Operation failed")]
    Failed,

    /// Operation aborted (session going away, request abandoned).
    #[error("Operation aborted")]
    Aborted,

    /// Peer closed the connection, or the session was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connection reset by peer.
    #[error("Connection reset")]
    ConnectionReset,

    /// Socket is not connected.
    #[error("Socket is not connected")]
    SocketNotConnected,

    /// Network configuration changed underneath the session.
    #[error("Network changed")]
    NetworkChanged,

    /// Stream handle does not refer to a live stream.
    #[error("Invalid SPDY stream")]
    InvalidSpdyStream,

    /// SPDY protocol violation.
    #[error("SPDY protocol error")]
    Protocol,

    /// Flow control window violated.
    #[error("SPDY flow control error")]
    FlowControl,

    /// Frame exceeded the permitted size.
    #[error("SPDY frame size error")]
    FrameSize,

    /// Header block could not be compressed or decompressed.
    #[error("SPDY compression error")]
    Compression,

    /// Transport security does not meet protocol requirements.
    #[error("SPDY inadequate transport security")]
    InadequateTransportSecurity,

    /// Ping was not answered within the hung interval.
    #[error("SPDY ping failed")]
    PingFailed,

    /// Server refused the stream before processing it.
    #[error("SPDY server refused stream")]
    ServerRefusedStream,

    /// Internal state did not allow the operation.
    #[error("Unexpected state: {0}")]
    Unexpected(&'static str),

    /// Secure content requested over a session with a certificate error.
    #[error("Certificate error: {0:?}")]
    Certificate(CertError),

    /// URL parsing error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Other IO error.
    #[error("IO error: {0:?}")]
    Io(io::ErrorKind),
}

impl Error {
    /// Create an unexpected-state error.
    pub fn unexpected(what: &'static str) -> Self {
        Self::Unexpected(what)
    }

    /// Whether closing a session with this error should stay silent towards the
    /// peer (no GOAWAY frame).
    pub fn is_quiet_close(&self) -> bool {
        matches!(
            self,
            Self::Aborted
                | Self::NetworkChanged
                | Self::SocketNotConnected
                | Self::ConnectionClosed
                | Self::ConnectionReset
        )
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe => Self::ConnectionReset,
            io::ErrorKind::ConnectionAborted | io::ErrorKind::UnexpectedEof => {
                Self::ConnectionClosed
            }
            io::ErrorKind::NotConnected => Self::SocketNotConnected,
            kind => Self::Io(kind),
        }
    }
}

impl From<FramerError> for Error {
    fn from(err: FramerError) -> Self {
        match err {
            FramerError::ControlPayloadTooLarge => Self::FrameSize,
            FramerError::DecompressFailure | FramerError::CompressFailure => Self::Compression,
            FramerError::InvalidControlFrame
            | FramerError::UnsupportedVersion
            | FramerError::GoAwayFrameCorrupt
            | FramerError::RstStreamFrameCorrupt
            | FramerError::InvalidDataFrameFlags
            | FramerError::InvalidControlFrameFlags
            | FramerError::UnexpectedFrame => Self::Protocol,
        }
    }
}

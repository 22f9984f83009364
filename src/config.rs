//! Session and pool configuration.
//!
//! # Defaults
//!
//! The defaults mirror a browser client talking to a public server:
//!
//! - protocol: SPDY/3.1 when the socket did not negotiate one
//! - 10 MiB session receive window, 64 KiB stream receive window
//! - 100 concurrent streams until the server says otherwise, never more than 256
//! - ping-based liveness checks after 10s of silence
//!
//! ```rust,ignore
//! use spdy_session::{SpdySessionConfig, SpdySessionPoolConfig};
//! use std::time::Duration;
//!
//! let config = SpdySessionPoolConfig {
//!     session: SpdySessionConfig {
//!         hung_interval: Duration::from_secs(5),
//!         ..Default::default()
//!     },
//!     enable_ip_pooling: true,
//! };
//! ```

use std::time::Duration;

use crate::pool::{HostPortPair, SpdySessionKey};
use crate::protocol::NextProto;
use crate::spdy::{
    DEFAULT_CONNECTION_AT_RISK_OF_LOSS, DEFAULT_HUNG_INTERVAL, INITIAL_MAX_CONCURRENT_STREAMS,
    MAX_CONCURRENT_STREAM_LIMIT, SPDY_STREAM_INITIAL_WINDOW_SIZE,
};

/// Per-session settings.
#[derive(Debug, Clone)]
pub struct SpdySessionConfig {
    /// Protocol used when the socket did not negotiate one.
    pub default_protocol: NextProto,

    /// Send the connection preface, SETTINGS and session WINDOW_UPDATE on start.
    pub enable_sending_initial_data: bool,

    /// Compress header blocks with a zlib stream.
    ///
    /// Both ends of a connection must agree on this; the decoder expects
    /// compressed blocks exactly when the encoder produces them.
    pub enable_compression: bool,

    /// Send preface pings and check that they are answered in time.
    pub enable_ping_based_connection_checking: bool,

    /// Receive window advertised for each stream.
    pub stream_initial_recv_window_size: i32,

    /// Concurrent stream limit assumed before the server sends SETTINGS.
    pub initial_max_concurrent_streams: usize,

    /// Hard ceiling on concurrent streams, whatever the server advertises.
    pub max_concurrent_streams_limit: usize,

    /// Idle time after which the connection is suspected lost and a preface
    /// ping is sent ahead of new work.
    pub connection_at_risk_of_loss_time: Duration,

    /// Time a ping may stay unanswered before the session is failed.
    pub hung_interval: Duration,

    /// Proxy allowed to push cross-origin content (never https content).
    pub trusted_spdy_proxy: Option<HostPortPair>,

    /// Consult the session before pooling it for another domain.
    pub verify_domain_authentication: bool,

    /// When set, every request is routed through this one session key.
    pub single_domain_key: Option<SpdySessionKey>,
}

impl Default for SpdySessionConfig {
    fn default() -> Self {
        Self {
            default_protocol: NextProto::Spdy31,
            enable_sending_initial_data: true,
            enable_compression: true,
            enable_ping_based_connection_checking: true,
            stream_initial_recv_window_size: SPDY_STREAM_INITIAL_WINDOW_SIZE,
            initial_max_concurrent_streams: INITIAL_MAX_CONCURRENT_STREAMS,
            max_concurrent_streams_limit: MAX_CONCURRENT_STREAM_LIMIT,
            connection_at_risk_of_loss_time: DEFAULT_CONNECTION_AT_RISK_OF_LOSS,
            hung_interval: DEFAULT_HUNG_INTERVAL,
            trusted_spdy_proxy: None,
            verify_domain_authentication: true,
            single_domain_key: None,
        }
    }
}

/// Settings for a [`SpdySessionPool`](crate::SpdySessionPool).
#[derive(Debug, Clone, Default)]
pub struct SpdySessionPoolConfig {
    /// Template for every session the pool creates.
    pub session: SpdySessionConfig,

    /// Reuse a session for another host that resolves to the same address.
    pub enable_ip_pooling: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SpdySessionConfig::default();
        assert_eq!(config.default_protocol, NextProto::Spdy31);
        assert_eq!(config.stream_initial_recv_window_size, 65536);
        assert_eq!(config.initial_max_concurrent_streams, 100);
        assert_eq!(config.max_concurrent_streams_limit, 256);
        assert_eq!(config.hung_interval, Duration::from_secs(10));
        assert!(config.trusted_spdy_proxy.is_none());

        let pool = SpdySessionPoolConfig::default();
        assert!(!pool.enable_ip_pooling);
    }
}

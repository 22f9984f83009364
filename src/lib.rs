//! # spdy-session
//!
//! Client-side SPDY session layer: many request streams multiplexed over one
//! connection, with priority scheduling, flow control, server push, pings and
//! a pool that shares sessions between origins.
//!
//! The core ([`SpdySession`], [`SpdySessionPool`]) is sans-io and runs on any
//! event loop that feeds it socket completions and runs the tasks it posts.
//! [`SpdyClient`] wraps it in a tokio driver task.

// Protocol engine
pub mod protocol;
pub mod scheduler;
pub mod socket;
pub mod spdy;

// Pooling and shared server knowledge
pub mod pool;
pub mod properties;

// Tokio runtime
pub mod client;

pub mod config;
pub mod error;

// Re-exports
pub use client::{SpdyClient, SpdyRequest, SpdyResponse, TokioSocket};
pub use config::{SpdySessionConfig, SpdySessionPoolConfig};
pub use error::{CertError, Error, Result};
pub use pool::{HostPortPair, PrivacyMode, ProxyServer, SessionId, SpdySessionKey, SpdySessionPool};
pub use properties::{HttpServerProperties, InMemoryServerProperties};
pub use protocol::{NextProto, RequestPriority};
pub use socket::SpdySocket;
pub use spdy::{
    SendStatus, SessionEvent, SessionInfo, SpdySession, StreamCreation, StreamKey, StreamKind,
};

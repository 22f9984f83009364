//! Session pooling.
//!
//! - `key`: what a session is keyed on (origin, proxy, privacy mode)
//! - `session_pool`: the owner of every live session

use std::fmt;

pub mod key;
pub mod session_pool;

pub use key::{HostPortPair, PrivacyMode, ProxyServer, SpdySessionKey};
pub use session_pool::SpdySessionPool;

/// Handle to a session owned by a [`SpdySessionPool`]. Never reused, so a
/// stale handle simply finds nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

//! Per-origin knowledge about servers that outlives any one session.
//!
//! Sessions replay persisted SETTINGS from here when they start and record new
//! ones as the server sends them. Alternate-protocol hints live here too.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::pool::HostPortPair;
use crate::spdy::frame::{settings_flags, SettingsFlagsAndValue, SettingsId, SettingsMap};

/// Alternate protocol a server advertised for an origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlternateProtocol {
    DeprecatedNpnSpdy2,
    NpnSpdy3,
    NpnSpdy31,
    NpnSpdy4,
    Quic,
    /// The advertised alternative was tried and failed.
    Broken,
    Uninitialized,
}

impl AlternateProtocol {
    /// Every value with a string form, `Uninitialized` excluded.
    pub const ALL: [AlternateProtocol; 6] = [
        AlternateProtocol::DeprecatedNpnSpdy2,
        AlternateProtocol::NpnSpdy3,
        AlternateProtocol::NpnSpdy31,
        AlternateProtocol::NpnSpdy4,
        AlternateProtocol::Quic,
        AlternateProtocol::Broken,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlternateProtocol::DeprecatedNpnSpdy2 => "npn-spdy/2",
            AlternateProtocol::NpnSpdy3 => "npn-spdy/3",
            AlternateProtocol::NpnSpdy31 => "npn-spdy/3.1",
            AlternateProtocol::NpnSpdy4 => "npn-h2",
            AlternateProtocol::Quic => "quic",
            AlternateProtocol::Broken => "broken",
            AlternateProtocol::Uninitialized => "uninitialized",
        }
    }

    /// Parse a protocol string. Anything unrecognized is `Uninitialized`.
    pub fn from_str_lossy(s: &str) -> Self {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .unwrap_or(AlternateProtocol::Uninitialized)
    }

    pub fn is_valid(&self) -> bool {
        !matches!(
            self,
            AlternateProtocol::Broken | AlternateProtocol::Uninitialized
        )
    }
}

impl fmt::Display for AlternateProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and how an origin can alternatively be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlternateProtocolInfo {
    pub port: u16,
    pub protocol: AlternateProtocol,
}

/// Settings persistence and server capability store.
pub trait HttpServerProperties: Send + Sync {
    /// Persisted SETTINGS for `origin`.
    fn get_spdy_settings(&self, origin: &HostPortPair) -> SettingsMap;

    /// Record one setting. Only values the server asked to persist are kept.
    /// Returns true when the value was stored.
    fn set_spdy_setting(
        &self,
        origin: &HostPortPair,
        id: SettingsId,
        flags: u8,
        value: u32,
    ) -> bool;

    fn clear_spdy_settings(&self, origin: &HostPortPair);

    fn clear_all_spdy_settings(&self);

    fn supports_spdy(&self, origin: &HostPortPair) -> bool;

    fn set_supports_spdy(&self, origin: &HostPortPair, supports: bool);

    fn get_alternate_protocol(&self, origin: &HostPortPair) -> Option<AlternateProtocolInfo>;

    fn set_alternate_protocol(&self, origin: &HostPortPair, port: u16, protocol: AlternateProtocol);

    /// Remember that the advertised alternative does not work.
    fn set_broken_alternate_protocol(&self, origin: &HostPortPair);
}

/// In-memory [`HttpServerProperties`], cheap to clone and share.
#[derive(Debug, Clone, Default)]
pub struct InMemoryServerProperties {
    inner: Arc<Mutex<PropertiesInner>>,
}

#[derive(Debug, Default)]
struct PropertiesInner {
    spdy_settings: HashMap<HostPortPair, SettingsMap>,
    spdy_servers: HashMap<HostPortPair, bool>,
    alternate_protocols: HashMap<HostPortPair, AlternateProtocolInfo>,
}

impl InMemoryServerProperties {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PropertiesInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl HttpServerProperties for InMemoryServerProperties {
    fn get_spdy_settings(&self, origin: &HostPortPair) -> SettingsMap {
        self.lock()
            .spdy_settings
            .get(origin)
            .cloned()
            .unwrap_or_default()
    }

    fn set_spdy_setting(
        &self,
        origin: &HostPortPair,
        id: SettingsId,
        flags: u8,
        value: u32,
    ) -> bool {
        if flags & settings_flags::PERSIST_VALUE == 0 {
            return false;
        }
        let mut inner = self.lock();
        inner.spdy_settings.entry(origin.clone()).or_default().insert(
            id,
            SettingsFlagsAndValue {
                flags: settings_flags::PERSISTED,
                value,
            },
        );
        true
    }

    fn clear_spdy_settings(&self, origin: &HostPortPair) {
        self.lock().spdy_settings.remove(origin);
    }

    fn clear_all_spdy_settings(&self) {
        self.lock().spdy_settings.clear();
    }

    fn supports_spdy(&self, origin: &HostPortPair) -> bool {
        self.lock()
            .spdy_servers
            .get(origin)
            .copied()
            .unwrap_or(false)
    }

    fn set_supports_spdy(&self, origin: &HostPortPair, supports: bool) {
        self.lock().spdy_servers.insert(origin.clone(), supports);
    }

    fn get_alternate_protocol(&self, origin: &HostPortPair) -> Option<AlternateProtocolInfo> {
        self.lock().alternate_protocols.get(origin).copied()
    }

    fn set_alternate_protocol(&self, origin: &HostPortPair, port: u16, protocol: AlternateProtocol) {
        let mut inner = self.lock();
        // A broken alternative stays broken until cleared.
        if inner
            .alternate_protocols
            .get(origin)
            .is_some_and(|existing| existing.protocol == AlternateProtocol::Broken)
        {
            return;
        }
        inner
            .alternate_protocols
            .insert(origin.clone(), AlternateProtocolInfo { port, protocol });
    }

    fn set_broken_alternate_protocol(&self, origin: &HostPortPair) {
        let mut inner = self.lock();
        let port = inner
            .alternate_protocols
            .get(origin)
            .map(|info| info.port)
            .unwrap_or(origin.port());
        inner.alternate_protocols.insert(
            origin.clone(),
            AlternateProtocolInfo {
                port,
                protocol: AlternateProtocol::Broken,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alternate_protocol_round_trip() {
        for protocol in AlternateProtocol::ALL {
            assert_eq!(AlternateProtocol::from_str_lossy(protocol.as_str()), protocol);
        }
    }

    #[test]
    fn test_unknown_alternate_protocol_is_uninitialized() {
        assert_eq!(
            AlternateProtocol::from_str_lossy("npn-spdy/5"),
            AlternateProtocol::Uninitialized
        );
        assert_eq!(
            AlternateProtocol::from_str_lossy("uninitialized"),
            AlternateProtocol::Uninitialized
        );
        assert_eq!(AlternateProtocol::from_str_lossy(""), AlternateProtocol::Uninitialized);
        assert!(!AlternateProtocol::Broken.is_valid());
        assert!(AlternateProtocol::Quic.is_valid());
    }

    #[test]
    fn test_only_persist_flagged_settings_are_stored() {
        let props = InMemoryServerProperties::new();
        let origin = HostPortPair::new("www.example.org", 443);

        assert!(!props.set_spdy_setting(&origin, SettingsId::UploadBandwidth, 0, 10));
        assert!(props.get_spdy_settings(&origin).is_empty());

        assert!(props.set_spdy_setting(
            &origin,
            SettingsId::MaxConcurrentStreams,
            settings_flags::PERSIST_VALUE,
            50
        ));
        let settings = props.get_spdy_settings(&origin);
        let stored = settings[&SettingsId::MaxConcurrentStreams];
        assert_eq!(stored.value, 50);
        assert_eq!(stored.flags, settings_flags::PERSISTED);

        props.clear_spdy_settings(&origin);
        assert!(props.get_spdy_settings(&origin).is_empty());
    }

    #[test]
    fn test_clones_share_state() {
        let props = InMemoryServerProperties::new();
        let other = props.clone();
        let origin = HostPortPair::new("a.example", 443);

        other.set_supports_spdy(&origin, true);
        assert!(props.supports_spdy(&origin));

        other.set_spdy_setting(
            &origin,
            SettingsId::InitialWindowSize,
            settings_flags::PERSIST_VALUE,
            1024,
        );
        props.clear_all_spdy_settings();
        assert!(other.get_spdy_settings(&origin).is_empty());
    }

    #[test]
    fn test_broken_alternate_protocol_sticks() {
        let props = InMemoryServerProperties::new();
        let origin = HostPortPair::new("a.example", 80);

        props.set_alternate_protocol(&origin, 443, AlternateProtocol::NpnSpdy31);
        props.set_broken_alternate_protocol(&origin);
        props.set_alternate_protocol(&origin, 443, AlternateProtocol::NpnSpdy3);

        let info = props.get_alternate_protocol(&origin);
        assert_eq!(
            info,
            Some(AlternateProtocolInfo {
                port: 443,
                protocol: AlternateProtocol::Broken
            })
        );
    }
}

//! Protocol identifiers, flow-control modes and request priorities.

use std::fmt;

/// Application protocol negotiated for a connection (ALPN/NPN style).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NextProto {
    /// HTTP/1.1, not usable for a SPDY session.
    Http11,
    /// SPDY/2, kept only for old servers.
    DeprecatedSpdy2,
    /// SPDY/3
    Spdy3,
    /// SPDY/3.1 (adds session-level flow control)
    Spdy31,
    /// SPDY/4 (HTTP/2 framing draft)
    Spdy4,
    /// QUIC carrying SPDY/3
    Quic1Spdy3,
}

impl NextProto {
    /// Protocol identifier as advertised during negotiation.
    pub fn as_str(&self) -> &'static str {
        match self {
            NextProto::Http11 => "http/1.1",
            NextProto::DeprecatedSpdy2 => "spdy/2",
            NextProto::Spdy3 => "spdy/3",
            NextProto::Spdy31 => "spdy/3.1",
            NextProto::Spdy4 => "h2",
            NextProto::Quic1Spdy3 => "quic/1+spdy/3",
        }
    }

    /// Parse a negotiated protocol identifier.
    pub fn from_protocol_id(id: &str) -> Option<Self> {
        match id {
            "http/1.1" => Some(NextProto::Http11),
            "spdy/2" => Some(NextProto::DeprecatedSpdy2),
            "spdy/3" => Some(NextProto::Spdy3),
            "spdy/3.1" => Some(NextProto::Spdy31),
            "h2" | "h2-14" => Some(NextProto::Spdy4),
            "quic/1+spdy/3" => Some(NextProto::Quic1Spdy3),
            _ => None,
        }
    }

    /// Whether a SPDY session can run over this protocol.
    pub fn is_spdy(&self) -> bool {
        self.major_version().is_some()
    }

    /// Framing dialect spoken for this protocol.
    pub fn major_version(&self) -> Option<SpdyMajorVersion> {
        match self {
            NextProto::DeprecatedSpdy2 => Some(SpdyMajorVersion::Spdy2),
            NextProto::Spdy3 | NextProto::Spdy31 => Some(SpdyMajorVersion::Spdy3),
            NextProto::Spdy4 => Some(SpdyMajorVersion::Spdy4),
            NextProto::Http11 | NextProto::Quic1Spdy3 => None,
        }
    }

    /// Flow-control mode fixed for the lifetime of a session on this protocol.
    pub fn flow_control_state(&self) -> FlowControlState {
        match self {
            NextProto::Spdy31 | NextProto::Spdy4 => FlowControlState::StreamAndSession,
            NextProto::Spdy3 => FlowControlState::Stream,
            _ => FlowControlState::None,
        }
    }
}

impl fmt::Display for NextProto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SPDY framing dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SpdyMajorVersion {
    Spdy2 = 2,
    Spdy3 = 3,
    Spdy4 = 4,
}

impl SpdyMajorVersion {
    /// Version number carried in SPDY/2 and SPDY/3 control frames.
    pub fn wire_version(&self) -> u16 {
        *self as u16
    }
}

/// Which flow-control credit systems are in force on a session.
///
/// Ordered so that `state >= FlowControlState::Stream` means stream-level
/// flow control is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FlowControlState {
    None,
    Stream,
    StreamAndSession,
}

/// Priority of a request, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum RequestPriority {
    Idle = 0,
    #[default]
    Lowest = 1,
    Low = 2,
    Medium = 3,
    Highest = 4,
}

/// Number of distinct request priorities.
pub const NUM_PRIORITIES: usize = 5;

impl RequestPriority {
    /// All priorities from highest to lowest, the order queues are drained in.
    pub const HIGHEST_FIRST: [RequestPriority; NUM_PRIORITIES] = [
        RequestPriority::Highest,
        RequestPriority::Medium,
        RequestPriority::Low,
        RequestPriority::Lowest,
        RequestPriority::Idle,
    ];

    /// Index into per-priority arrays.
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestPriority::Idle => "IDLE",
            RequestPriority::Lowest => "LOWEST",
            RequestPriority::Low => "LOW",
            RequestPriority::Medium => "MEDIUM",
            RequestPriority::Highest => "HIGHEST",
        }
    }

    fn from_index(index: u8) -> Self {
        match index {
            0 => RequestPriority::Idle,
            1 => RequestPriority::Lowest,
            2 => RequestPriority::Low,
            3 => RequestPriority::Medium,
            _ => RequestPriority::Highest,
        }
    }
}

/// Map a request priority onto the wire priority (0 is most urgent).
///
/// SPDY/2 only has two bits of priority, so IDLE and LOWEST share the lowest
/// value that still leaves room for LOW.
pub fn convert_request_priority_to_spdy_priority(
    priority: RequestPriority,
    version: SpdyMajorVersion,
) -> u8 {
    let highest = RequestPriority::Highest as u8;
    let p = priority as u8;
    if version == SpdyMajorVersion::Spdy2 && priority <= RequestPriority::Lowest {
        highest - p - 1
    } else {
        highest - p
    }
}

/// Map a wire priority back onto a request priority.
///
/// Out-of-range values are tolerated and treated as IDLE.
pub fn convert_spdy_priority_to_request_priority(
    priority: u8,
    version: SpdyMajorVersion,
) -> RequestPriority {
    let idle_cutoff = if version == SpdyMajorVersion::Spdy2 { 3 } else { 5 };
    if priority >= idle_cutoff {
        RequestPriority::Idle
    } else {
        RequestPriority::from_index(RequestPriority::Highest as u8 - priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_control_by_protocol() {
        assert_eq!(
            NextProto::DeprecatedSpdy2.flow_control_state(),
            FlowControlState::None
        );
        assert_eq!(NextProto::Spdy3.flow_control_state(), FlowControlState::Stream);
        assert_eq!(
            NextProto::Spdy31.flow_control_state(),
            FlowControlState::StreamAndSession
        );
        assert_eq!(
            NextProto::Spdy4.flow_control_state(),
            FlowControlState::StreamAndSession
        );
        assert!(FlowControlState::StreamAndSession >= FlowControlState::Stream);
    }

    #[test]
    fn test_protocol_ids() {
        for proto in [
            NextProto::Http11,
            NextProto::DeprecatedSpdy2,
            NextProto::Spdy3,
            NextProto::Spdy31,
            NextProto::Spdy4,
            NextProto::Quic1Spdy3,
        ] {
            assert_eq!(NextProto::from_protocol_id(proto.as_str()), Some(proto));
        }
        assert_eq!(NextProto::from_protocol_id("gopher"), None);
        assert!(!NextProto::Http11.is_spdy());
    }

    #[test]
    fn test_spdy3_priority_mapping() {
        let v = SpdyMajorVersion::Spdy3;
        assert_eq!(convert_request_priority_to_spdy_priority(RequestPriority::Highest, v), 0);
        assert_eq!(convert_request_priority_to_spdy_priority(RequestPriority::Idle, v), 4);
        for p in RequestPriority::HIGHEST_FIRST {
            let wire = convert_request_priority_to_spdy_priority(p, v);
            assert_eq!(convert_spdy_priority_to_request_priority(wire, v), p);
        }
        assert_eq!(
            convert_spdy_priority_to_request_priority(7, v),
            RequestPriority::Idle
        );
    }

    #[test]
    fn test_spdy2_priority_mapping() {
        let v = SpdyMajorVersion::Spdy2;
        assert_eq!(convert_request_priority_to_spdy_priority(RequestPriority::Idle, v), 3);
        assert_eq!(convert_request_priority_to_spdy_priority(RequestPriority::Lowest, v), 2);
        assert_eq!(convert_request_priority_to_spdy_priority(RequestPriority::Low, v), 2);
        assert_eq!(convert_request_priority_to_spdy_priority(RequestPriority::Medium, v), 1);
        assert_eq!(convert_request_priority_to_spdy_priority(RequestPriority::Highest, v), 0);

        assert_eq!(
            convert_spdy_priority_to_request_priority(2, v),
            RequestPriority::Low
        );
        assert_eq!(
            convert_spdy_priority_to_request_priority(3, v),
            RequestPriority::Idle
        );
    }
}

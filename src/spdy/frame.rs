//! SPDY frame vocabulary: frame types, flags, status codes and settings.
//!
//! SPDY/2 and SPDY/3 share one control-frame numbering; SPDY/4 uses the HTTP/2
//! numbering. Everything here converts between the dialect-neutral enums the
//! session works with and the numbers on the wire.

use std::collections::BTreeMap;

use crate::error::Error;
use crate::protocol::SpdyMajorVersion;

/// SPDY/2 and SPDY/3 frame header: control bit, version, type, flags, 24-bit length.
pub const SPDY_FRAME_HEADER_SIZE: usize = 8;

/// SPDY/4 frame header: 24-bit length, type, flags, stream id.
pub const H2_FRAME_HEADER_SIZE: usize = 9;

/// Client connection preface sent before any SPDY/4 frame.
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Mask for the 31 usable bits of stream ids and window deltas.
pub const STREAM_ID_MASK: u32 = 0x7fff_ffff;

/// Frame flags.
pub mod flags {
    /// Last frame of the stream in this direction (SPDY/2-3 FIN, SPDY/4 END_STREAM).
    pub const FIN: u8 = 0x01;
    /// SYN_STREAM that expects no reply data (SPDY/2-3).
    pub const UNIDIRECTIONAL: u8 = 0x02;
    /// SETTINGS: forget previously persisted values (SPDY/2-3).
    pub const SETTINGS_CLEAR_PERSISTED: u8 = 0x01;
    /// SPDY/4 SETTINGS and PING acknowledgement.
    pub const ACK: u8 = 0x01;
    /// SPDY/4 header block complete in this frame.
    pub const END_HEADERS: u8 = 0x04;
    /// SPDY/4 padding present.
    pub const PADDED: u8 = 0x08;
    /// SPDY/4 HEADERS carries priority fields.
    pub const PRIORITY: u8 = 0x20;
}

/// Per-entry SETTINGS flags (SPDY/2-3).
pub mod settings_flags {
    /// Server asks the client to remember this value.
    pub const PERSIST_VALUE: u8 = 0x01;
    /// Client is replaying a value it remembered.
    pub const PERSISTED: u8 = 0x02;
}

/// Frame types across all dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpdyFrameType {
    Data,
    SynStream,
    SynReply,
    RstStream,
    Settings,
    Noop,
    Ping,
    GoAway,
    Headers,
    WindowUpdate,
    Credential,
    PushPromise,
    Continuation,
    Priority,
}

impl SpdyFrameType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpdyFrameType::Data => "DATA",
            SpdyFrameType::SynStream => "SYN_STREAM",
            SpdyFrameType::SynReply => "SYN_REPLY",
            SpdyFrameType::RstStream => "RST_STREAM",
            SpdyFrameType::Settings => "SETTINGS",
            SpdyFrameType::Noop => "NOOP",
            SpdyFrameType::Ping => "PING",
            SpdyFrameType::GoAway => "GOAWAY",
            SpdyFrameType::Headers => "HEADERS",
            SpdyFrameType::WindowUpdate => "WINDOW_UPDATE",
            SpdyFrameType::Credential => "CREDENTIAL",
            SpdyFrameType::PushPromise => "PUSH_PROMISE",
            SpdyFrameType::Continuation => "CONTINUATION",
            SpdyFrameType::Priority => "PRIORITY",
        }
    }

    /// Control frame type number for SPDY/2-3.
    pub fn spdy3_type_id(&self) -> Option<u16> {
        match self {
            SpdyFrameType::SynStream => Some(1),
            SpdyFrameType::SynReply => Some(2),
            SpdyFrameType::RstStream => Some(3),
            SpdyFrameType::Settings => Some(4),
            SpdyFrameType::Noop => Some(5),
            SpdyFrameType::Ping => Some(6),
            SpdyFrameType::GoAway => Some(7),
            SpdyFrameType::Headers => Some(8),
            SpdyFrameType::WindowUpdate => Some(9),
            SpdyFrameType::Credential => Some(10),
            _ => None,
        }
    }

    pub fn from_spdy3_type_id(id: u16, version: SpdyMajorVersion) -> Option<Self> {
        match id {
            1 => Some(SpdyFrameType::SynStream),
            2 => Some(SpdyFrameType::SynReply),
            3 => Some(SpdyFrameType::RstStream),
            4 => Some(SpdyFrameType::Settings),
            5 if version == SpdyMajorVersion::Spdy2 => Some(SpdyFrameType::Noop),
            6 => Some(SpdyFrameType::Ping),
            7 => Some(SpdyFrameType::GoAway),
            8 => Some(SpdyFrameType::Headers),
            9 if version == SpdyMajorVersion::Spdy3 => Some(SpdyFrameType::WindowUpdate),
            10 if version == SpdyMajorVersion::Spdy3 => Some(SpdyFrameType::Credential),
            _ => None,
        }
    }

    /// Frame type number for SPDY/4.
    pub fn h2_type_id(&self) -> Option<u8> {
        match self {
            SpdyFrameType::Data => Some(0),
            SpdyFrameType::Headers => Some(1),
            SpdyFrameType::Priority => Some(2),
            SpdyFrameType::RstStream => Some(3),
            SpdyFrameType::Settings => Some(4),
            SpdyFrameType::PushPromise => Some(5),
            SpdyFrameType::Ping => Some(6),
            SpdyFrameType::GoAway => Some(7),
            SpdyFrameType::WindowUpdate => Some(8),
            SpdyFrameType::Continuation => Some(9),
            _ => None,
        }
    }

    pub fn from_h2_type_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(SpdyFrameType::Data),
            1 => Some(SpdyFrameType::Headers),
            2 => Some(SpdyFrameType::Priority),
            3 => Some(SpdyFrameType::RstStream),
            4 => Some(SpdyFrameType::Settings),
            5 => Some(SpdyFrameType::PushPromise),
            6 => Some(SpdyFrameType::Ping),
            7 => Some(SpdyFrameType::GoAway),
            8 => Some(SpdyFrameType::WindowUpdate),
            9 => Some(SpdyFrameType::Continuation),
            _ => None,
        }
    }
}

/// RST_STREAM status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RstStreamStatus {
    /// Wire value 0: the stream ended without error.
    NoError,
    ProtocolError,
    InvalidStream,
    RefusedStream,
    UnsupportedVersion,
    Cancel,
    InternalError,
    FlowControlError,
    StreamInUse,
    StreamAlreadyClosed,
    InvalidCredentials,
    FrameTooLarge,
    StreamClosed,
    ConnectError,
    EnhanceYourCalm,
    InadequateSecurity,
}

impl RstStreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RstStreamStatus::NoError => "NO_ERROR",
            RstStreamStatus::ProtocolError => "PROTOCOL_ERROR",
            RstStreamStatus::InvalidStream => "INVALID_STREAM",
            RstStreamStatus::RefusedStream => "REFUSED_STREAM",
            RstStreamStatus::UnsupportedVersion => "UNSUPPORTED_VERSION",
            RstStreamStatus::Cancel => "CANCEL",
            RstStreamStatus::InternalError => "INTERNAL_ERROR",
            RstStreamStatus::FlowControlError => "FLOW_CONTROL_ERROR",
            RstStreamStatus::StreamInUse => "STREAM_IN_USE",
            RstStreamStatus::StreamAlreadyClosed => "STREAM_ALREADY_CLOSED",
            RstStreamStatus::InvalidCredentials => "INVALID_CREDENTIALS",
            RstStreamStatus::FrameTooLarge => "FRAME_TOO_LARGE",
            RstStreamStatus::StreamClosed => "STREAM_CLOSED",
            RstStreamStatus::ConnectError => "CONNECT_ERROR",
            RstStreamStatus::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            RstStreamStatus::InadequateSecurity => "INADEQUATE_SECURITY",
        }
    }

    pub fn to_wire(&self, version: SpdyMajorVersion) -> u32 {
        if version == SpdyMajorVersion::Spdy4 {
            return match self {
                RstStreamStatus::NoError => 0,
                RstStreamStatus::InternalError => 2,
                RstStreamStatus::FlowControlError => 3,
                RstStreamStatus::StreamClosed | RstStreamStatus::StreamAlreadyClosed => 5,
                RstStreamStatus::FrameTooLarge => 6,
                RstStreamStatus::RefusedStream => 7,
                RstStreamStatus::Cancel => 8,
                RstStreamStatus::ConnectError => 10,
                RstStreamStatus::EnhanceYourCalm => 11,
                RstStreamStatus::InadequateSecurity => 12,
                _ => 1,
            };
        }
        match self {
            RstStreamStatus::NoError => 0,
            RstStreamStatus::InvalidStream => 2,
            RstStreamStatus::RefusedStream => 3,
            RstStreamStatus::UnsupportedVersion => 4,
            RstStreamStatus::Cancel => 5,
            RstStreamStatus::InternalError => 6,
            RstStreamStatus::FlowControlError => 7,
            RstStreamStatus::StreamInUse => 8,
            RstStreamStatus::StreamAlreadyClosed | RstStreamStatus::StreamClosed => 9,
            RstStreamStatus::InvalidCredentials => 10,
            RstStreamStatus::FrameTooLarge => 11,
            _ => 1,
        }
    }

    /// Unknown codes are treated as INTERNAL_ERROR.
    pub fn from_wire(code: u32, version: SpdyMajorVersion) -> Self {
        if version == SpdyMajorVersion::Spdy4 {
            return match code {
                0 => RstStreamStatus::NoError,
                1 | 4 | 9 => RstStreamStatus::ProtocolError,
                3 => RstStreamStatus::FlowControlError,
                5 => RstStreamStatus::StreamClosed,
                6 => RstStreamStatus::FrameTooLarge,
                7 => RstStreamStatus::RefusedStream,
                8 => RstStreamStatus::Cancel,
                10 => RstStreamStatus::ConnectError,
                11 => RstStreamStatus::EnhanceYourCalm,
                12 => RstStreamStatus::InadequateSecurity,
                _ => RstStreamStatus::InternalError,
            };
        }
        match code {
            0 => RstStreamStatus::NoError,
            1 => RstStreamStatus::ProtocolError,
            2 => RstStreamStatus::InvalidStream,
            3 => RstStreamStatus::RefusedStream,
            4 => RstStreamStatus::UnsupportedVersion,
            5 => RstStreamStatus::Cancel,
            7 => RstStreamStatus::FlowControlError,
            8 => RstStreamStatus::StreamInUse,
            9 => RstStreamStatus::StreamAlreadyClosed,
            10 => RstStreamStatus::InvalidCredentials,
            11 => RstStreamStatus::FrameTooLarge,
            _ => RstStreamStatus::InternalError,
        }
    }
}

/// GOAWAY status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GoAwayStatus {
    Ok,
    ProtocolError,
    InternalError,
    FlowControlError,
    SettingsTimeout,
    StreamClosed,
    FrameSizeError,
    RefusedStream,
    Cancel,
    CompressionError,
    ConnectError,
    EnhanceYourCalm,
    InadequateSecurity,
}

impl GoAwayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GoAwayStatus::Ok => "OK",
            GoAwayStatus::ProtocolError => "PROTOCOL_ERROR",
            GoAwayStatus::InternalError => "INTERNAL_ERROR",
            GoAwayStatus::FlowControlError => "FLOW_CONTROL_ERROR",
            GoAwayStatus::SettingsTimeout => "SETTINGS_TIMEOUT",
            GoAwayStatus::StreamClosed => "STREAM_CLOSED",
            GoAwayStatus::FrameSizeError => "FRAME_SIZE_ERROR",
            GoAwayStatus::RefusedStream => "REFUSED_STREAM",
            GoAwayStatus::Cancel => "CANCEL",
            GoAwayStatus::CompressionError => "COMPRESSION_ERROR",
            GoAwayStatus::ConnectError => "CONNECT_ERROR",
            GoAwayStatus::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            GoAwayStatus::InadequateSecurity => "INADEQUATE_SECURITY",
        }
    }

    /// Status announced to the peer when the session closes because of `err`
    /// (`None` for a clean close).
    pub fn from_net_error(err: Option<Error>) -> Self {
        match err {
            None => GoAwayStatus::Ok,
            Some(Error::Protocol) => GoAwayStatus::ProtocolError,
            Some(Error::FlowControl) => GoAwayStatus::FlowControlError,
            Some(Error::FrameSize) => GoAwayStatus::FrameSizeError,
            Some(Error::Compression) => GoAwayStatus::CompressionError,
            Some(Error::InadequateTransportSecurity) => GoAwayStatus::InadequateSecurity,
            Some(_) => GoAwayStatus::ProtocolError,
        }
    }

    pub fn to_wire(&self, version: SpdyMajorVersion) -> u32 {
        match version {
            SpdyMajorVersion::Spdy4 => *self as u32,
            _ => match self {
                GoAwayStatus::Ok => 0,
                GoAwayStatus::InternalError => 2,
                _ => 1,
            },
        }
    }

    /// Unknown codes are treated as INTERNAL_ERROR.
    pub fn from_wire(code: u32, version: SpdyMajorVersion) -> Self {
        match (version, code) {
            (_, 0) => GoAwayStatus::Ok,
            (_, 1) => GoAwayStatus::ProtocolError,
            (SpdyMajorVersion::Spdy4, 3) => GoAwayStatus::FlowControlError,
            (SpdyMajorVersion::Spdy4, 4) => GoAwayStatus::SettingsTimeout,
            (SpdyMajorVersion::Spdy4, 5) => GoAwayStatus::StreamClosed,
            (SpdyMajorVersion::Spdy4, 6) => GoAwayStatus::FrameSizeError,
            (SpdyMajorVersion::Spdy4, 7) => GoAwayStatus::RefusedStream,
            (SpdyMajorVersion::Spdy4, 8) => GoAwayStatus::Cancel,
            (SpdyMajorVersion::Spdy4, 9) => GoAwayStatus::CompressionError,
            (SpdyMajorVersion::Spdy4, 10) => GoAwayStatus::ConnectError,
            (SpdyMajorVersion::Spdy4, 11) => GoAwayStatus::EnhanceYourCalm,
            (SpdyMajorVersion::Spdy4, 12) => GoAwayStatus::InadequateSecurity,
            _ => GoAwayStatus::InternalError,
        }
    }
}

/// SETTINGS identifiers across dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SettingsId {
    UploadBandwidth,
    DownloadBandwidth,
    RoundTripTime,
    MaxConcurrentStreams,
    CurrentCwnd,
    DownloadRetransRate,
    InitialWindowSize,
    HeaderTableSize,
    EnablePush,
    MaxFrameSize,
    MaxHeaderListSize,
}

impl SettingsId {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingsId::UploadBandwidth => "UPLOAD_BANDWIDTH",
            SettingsId::DownloadBandwidth => "DOWNLOAD_BANDWIDTH",
            SettingsId::RoundTripTime => "ROUND_TRIP_TIME",
            SettingsId::MaxConcurrentStreams => "MAX_CONCURRENT_STREAMS",
            SettingsId::CurrentCwnd => "CURRENT_CWND",
            SettingsId::DownloadRetransRate => "DOWNLOAD_RETRANS_RATE",
            SettingsId::InitialWindowSize => "INITIAL_WINDOW_SIZE",
            SettingsId::HeaderTableSize => "HEADER_TABLE_SIZE",
            SettingsId::EnablePush => "ENABLE_PUSH",
            SettingsId::MaxFrameSize => "MAX_FRAME_SIZE",
            SettingsId::MaxHeaderListSize => "MAX_HEADER_LIST_SIZE",
        }
    }

    /// Wire id, or `None` if the dialect has no such setting.
    pub fn to_wire(&self, version: SpdyMajorVersion) -> Option<u32> {
        if version == SpdyMajorVersion::Spdy4 {
            return match self {
                SettingsId::HeaderTableSize => Some(1),
                SettingsId::EnablePush => Some(2),
                SettingsId::MaxConcurrentStreams => Some(3),
                SettingsId::InitialWindowSize => Some(4),
                SettingsId::MaxFrameSize => Some(5),
                SettingsId::MaxHeaderListSize => Some(6),
                _ => None,
            };
        }
        match self {
            SettingsId::UploadBandwidth => Some(1),
            SettingsId::DownloadBandwidth => Some(2),
            SettingsId::RoundTripTime => Some(3),
            SettingsId::MaxConcurrentStreams => Some(4),
            SettingsId::CurrentCwnd => Some(5),
            SettingsId::DownloadRetransRate => Some(6),
            SettingsId::InitialWindowSize => Some(7),
            _ => None,
        }
    }

    pub fn from_wire(id: u32, version: SpdyMajorVersion) -> Option<Self> {
        if version == SpdyMajorVersion::Spdy4 {
            return match id {
                1 => Some(SettingsId::HeaderTableSize),
                2 => Some(SettingsId::EnablePush),
                3 => Some(SettingsId::MaxConcurrentStreams),
                4 => Some(SettingsId::InitialWindowSize),
                5 => Some(SettingsId::MaxFrameSize),
                6 => Some(SettingsId::MaxHeaderListSize),
                _ => None,
            };
        }
        match id {
            1 => Some(SettingsId::UploadBandwidth),
            2 => Some(SettingsId::DownloadBandwidth),
            3 => Some(SettingsId::RoundTripTime),
            4 => Some(SettingsId::MaxConcurrentStreams),
            5 => Some(SettingsId::CurrentCwnd),
            6 => Some(SettingsId::DownloadRetransRate),
            7 => Some(SettingsId::InitialWindowSize),
            _ => None,
        }
    }
}

/// One SETTINGS entry's flags and value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingsFlagsAndValue {
    pub flags: u8,
    pub value: u32,
}

impl SettingsFlagsAndValue {
    pub fn new(flags: u8, value: u32) -> Self {
        Self { flags, value }
    }
}

/// Settings keyed by id, ordered for deterministic encoding.
pub type SettingsMap = BTreeMap<SettingsId, SettingsFlagsAndValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rst_status_wire_mapping() {
        let v3 = SpdyMajorVersion::Spdy3;
        let v4 = SpdyMajorVersion::Spdy4;

        assert_eq!(RstStreamStatus::RefusedStream.to_wire(v3), 3);
        assert_eq!(RstStreamStatus::RefusedStream.to_wire(v4), 7);
        assert_eq!(RstStreamStatus::Cancel.to_wire(v3), 5);
        assert_eq!(RstStreamStatus::Cancel.to_wire(v4), 8);

        for status in [
            RstStreamStatus::ProtocolError,
            RstStreamStatus::RefusedStream,
            RstStreamStatus::Cancel,
            RstStreamStatus::FlowControlError,
        ] {
            assert_eq!(RstStreamStatus::from_wire(status.to_wire(v3), v3), status);
            assert_eq!(RstStreamStatus::from_wire(status.to_wire(v4), v4), status);
        }

        assert_eq!(RstStreamStatus::from_wire(0, v3), RstStreamStatus::NoError);
        assert_eq!(
            RstStreamStatus::from_wire(99, v3),
            RstStreamStatus::InternalError
        );
        // SPDY/4 has no INVALID_STREAM; it goes out as PROTOCOL_ERROR.
        assert_eq!(RstStreamStatus::InvalidStream.to_wire(v4), 1);
    }

    #[test]
    fn test_goaway_status_from_net_error() {
        assert_eq!(GoAwayStatus::from_net_error(None), GoAwayStatus::Ok);
        assert_eq!(
            GoAwayStatus::from_net_error(Some(Error::Protocol)),
            GoAwayStatus::ProtocolError
        );
        assert_eq!(
            GoAwayStatus::from_net_error(Some(Error::FlowControl)),
            GoAwayStatus::FlowControlError
        );
        assert_eq!(
            GoAwayStatus::from_net_error(Some(Error::FrameSize)),
            GoAwayStatus::FrameSizeError
        );
        assert_eq!(
            GoAwayStatus::from_net_error(Some(Error::Compression)),
            GoAwayStatus::CompressionError
        );
        assert_eq!(
            GoAwayStatus::from_net_error(Some(Error::InadequateTransportSecurity)),
            GoAwayStatus::InadequateSecurity
        );
        assert_eq!(
            GoAwayStatus::from_net_error(Some(Error::PingFailed)),
            GoAwayStatus::ProtocolError
        );
    }

    #[test]
    fn test_goaway_status_wire() {
        let v3 = SpdyMajorVersion::Spdy3;
        let v4 = SpdyMajorVersion::Spdy4;
        assert_eq!(GoAwayStatus::FlowControlError.to_wire(v4), 3);
        assert_eq!(GoAwayStatus::FlowControlError.to_wire(v3), 1);
        assert_eq!(GoAwayStatus::from_wire(12, v4), GoAwayStatus::InadequateSecurity);
        assert_eq!(GoAwayStatus::from_wire(2, v3), GoAwayStatus::InternalError);
    }

    #[test]
    fn test_settings_ids_per_dialect() {
        let v3 = SpdyMajorVersion::Spdy3;
        let v4 = SpdyMajorVersion::Spdy4;
        assert_eq!(SettingsId::MaxConcurrentStreams.to_wire(v3), Some(4));
        assert_eq!(SettingsId::MaxConcurrentStreams.to_wire(v4), Some(3));
        assert_eq!(SettingsId::InitialWindowSize.to_wire(v3), Some(7));
        assert_eq!(SettingsId::InitialWindowSize.to_wire(v4), Some(4));
        assert_eq!(SettingsId::CurrentCwnd.to_wire(v4), None);
        assert_eq!(SettingsId::from_wire(7, v3), Some(SettingsId::InitialWindowSize));
        assert_eq!(SettingsId::from_wire(7, v4), None);
    }

    #[test]
    fn test_frame_type_ids() {
        assert_eq!(
            SpdyFrameType::from_spdy3_type_id(9, SpdyMajorVersion::Spdy3),
            Some(SpdyFrameType::WindowUpdate)
        );
        assert_eq!(
            SpdyFrameType::from_spdy3_type_id(9, SpdyMajorVersion::Spdy2),
            None
        );
        assert_eq!(SpdyFrameType::from_h2_type_id(5), Some(SpdyFrameType::PushPromise));
        assert_eq!(SpdyFrameType::SynStream.h2_type_id(), None);
    }
}

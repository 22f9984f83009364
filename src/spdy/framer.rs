//! Frame builders and the incremental frame decoder.
//!
//! SPDY/2 and SPDY/3 frames use the 8-byte SPDY header:
//!
//! ```text
//! control: |1| version (15) | type (16) | flags (8) | length (24) |
//! data:    |0| stream id (31)           | flags (8) | length (24) |
//! ```
//!
//! SPDY/4 frames use the 9-byte header `length (24) | type (8) | flags (8) | R | stream id (31)`.
//!
//! Header blocks are SPDY name/value blocks (16-bit lengths for SPDY/2, 32-bit
//! otherwise), optionally carried in a zlib stream that spans every header
//! block on the connection.

use std::io::Write;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use flate2::write::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;

use crate::protocol::SpdyMajorVersion;
use crate::spdy::frame::{
    flags, GoAwayStatus, RstStreamStatus, SettingsId, SettingsMap, SpdyFrameType,
    CONNECTION_PREFACE, H2_FRAME_HEADER_SIZE, SPDY_FRAME_HEADER_SIZE, STREAM_ID_MASK,
};
use crate::spdy::{SpdyHeaderBlock, SpdyPingId, SpdyStreamId};

/// Largest SPDY/2-3 control frame payload accepted.
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 64 * 1024;

/// Largest SPDY/4 frame payload accepted (the protocol default frame size).
pub const MAX_H2_FRAME_PAYLOAD: usize = 16 * 1024;

/// Largest header block accepted after decompression.
pub const MAX_DECOMPRESSED_HEADER_BLOCK: usize = 256 * 1024;

/// Malformed input that makes the rest of the byte stream unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FramerError {
    #[error("invalid control frame")]
    InvalidControlFrame,
    #[error("control frame payload too large")]
    ControlPayloadTooLarge,
    #[error("unsupported SPDY version")]
    UnsupportedVersion,
    #[error("header block decompression failed")]
    DecompressFailure,
    #[error("header block compression failed")]
    CompressFailure,
    #[error("corrupt GOAWAY frame")]
    GoAwayFrameCorrupt,
    #[error("corrupt RST_STREAM frame")]
    RstStreamFrameCorrupt,
    #[error("invalid DATA frame flags")]
    InvalidDataFrameFlags,
    #[error("invalid control frame flags")]
    InvalidControlFrameFlags,
    #[error("unexpected frame")]
    UnexpectedFrame,
}

/// One decoded frame, or one piece of a DATA frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    /// Input could not be decoded. No further input is consumed.
    Error(FramerError),
    /// A header block attributable to `stream_id` was malformed.
    StreamError {
        stream_id: SpdyStreamId,
        description: String,
    },
    SynStream {
        stream_id: SpdyStreamId,
        associated_stream_id: SpdyStreamId,
        priority: u8,
        fin: bool,
        unidirectional: bool,
        headers: SpdyHeaderBlock,
    },
    SynReply {
        stream_id: SpdyStreamId,
        fin: bool,
        headers: SpdyHeaderBlock,
    },
    Headers {
        stream_id: SpdyStreamId,
        fin: bool,
        /// Wire priority, when the frame carries one (SPDY/4 only).
        priority: Option<u8>,
        headers: SpdyHeaderBlock,
    },
    PushPromise {
        stream_id: SpdyStreamId,
        promised_stream_id: SpdyStreamId,
        headers: SpdyHeaderBlock,
    },
    DataFrameHeader {
        stream_id: SpdyStreamId,
        length: usize,
        fin: bool,
    },
    /// Payload bytes for a stream. `None` marks the end of the stream's data,
    /// including a FIN carried on a header frame.
    StreamFrameData {
        stream_id: SpdyStreamId,
        data: Option<Bytes>,
    },
    /// Start of a SETTINGS frame; its entries follow as `Setting` events.
    Settings {
        clear_persisted: bool,
    },
    Setting {
        id: SettingsId,
        flags: u8,
        value: u32,
    },
    SettingsAck,
    Ping {
        id: SpdyPingId,
        is_ack: bool,
    },
    RstStream {
        stream_id: SpdyStreamId,
        status: RstStreamStatus,
    },
    GoAway {
        last_accepted_stream_id: SpdyStreamId,
        status: GoAwayStatus,
    },
    WindowUpdate {
        stream_id: SpdyStreamId,
        delta: u32,
    },
}

#[derive(Debug, Clone, Copy)]
enum FrameKind {
    Data,
    /// SPDY/4 DATA with padding; buffered whole and unpadded on completion.
    PaddedData,
    Control(SpdyFrameType),
    /// Frame we skip (SPDY/4 PRIORITY and unknown types).
    Ignored,
}

#[derive(Debug, Clone, Copy)]
struct FrameHeader {
    kind: FrameKind,
    flags: u8,
    length: usize,
    stream_id: SpdyStreamId,
}

#[derive(Debug, Clone, Copy)]
enum DecoderState {
    Preface { matched: usize },
    FrameHeader,
    Payload(FrameHeader),
    DataPayload {
        stream_id: SpdyStreamId,
        remaining: usize,
        fin: bool,
    },
    Error,
}

/// Version-aware frame encoder and incremental decoder for one connection.
pub struct SpdyFramer {
    version: SpdyMajorVersion,
    compressor: Option<ZlibEncoder<Vec<u8>>>,
    decompressor: Option<ZlibDecoder<Vec<u8>>>,
    state: DecoderState,
    buffer: BytesMut,
    error: Option<FramerError>,
}

impl SpdyFramer {
    /// Framer for the client side of a connection.
    pub fn new(version: SpdyMajorVersion, enable_compression: bool) -> Self {
        Self {
            version,
            compressor: enable_compression
                .then(|| ZlibEncoder::new(Vec::new(), Compression::default())),
            decompressor: enable_compression.then(|| ZlibDecoder::new(Vec::new())),
            state: DecoderState::FrameHeader,
            buffer: BytesMut::new(),
            error: None,
        }
    }

    /// Expect the SPDY/4 client connection preface before the first frame
    /// (server side of a connection).
    pub fn expect_connection_preface(mut self) -> Self {
        if self.version == SpdyMajorVersion::Spdy4 {
            self.state = DecoderState::Preface { matched: 0 };
        }
        self
    }

    pub fn version(&self) -> SpdyMajorVersion {
        self.version
    }

    pub fn error(&self) -> Option<FramerError> {
        self.error
    }

    /// Size of the header in front of every frame.
    pub fn frame_header_size(&self) -> usize {
        match self.version {
            SpdyMajorVersion::Spdy4 => H2_FRAME_HEADER_SIZE,
            _ => SPDY_FRAME_HEADER_SIZE,
        }
    }

    /// Size of a DATA frame with an empty payload.
    pub fn data_frame_header_size(&self) -> usize {
        self.frame_header_size()
    }

    // ------------------------------------------------------------------
    // Decoding
    // ------------------------------------------------------------------

    /// Feed bytes to the decoder, appending what they complete to `out`.
    ///
    /// Returns after at most one frame (or one DATA chunk) has been completed,
    /// so that the caller can stop feeding input between frames. Returns the
    /// number of bytes consumed; after an error nothing more is consumed.
    pub fn process_input(&mut self, input: &[u8], out: &mut Vec<FrameEvent>) -> usize {
        let mut consumed = 0;
        loop {
            let rest = &input[consumed..];
            match self.state {
                DecoderState::Error => return consumed,
                DecoderState::Preface { matched } => {
                    let n = rest.len().min(CONNECTION_PREFACE.len() - matched);
                    if rest[..n] != CONNECTION_PREFACE[matched..matched + n] {
                        self.fail(FramerError::InvalidControlFrame, out);
                        return consumed;
                    }
                    consumed += n;
                    if matched + n < CONNECTION_PREFACE.len() {
                        self.state = DecoderState::Preface { matched: matched + n };
                        return consumed;
                    }
                    self.state = DecoderState::FrameHeader;
                }
                DecoderState::FrameHeader => {
                    let header_size = self.frame_header_size();
                    let n = rest.len().min(header_size - self.buffer.len());
                    self.buffer.extend_from_slice(&rest[..n]);
                    consumed += n;
                    if self.buffer.len() < header_size {
                        return consumed;
                    }
                    let raw = self.buffer.split();
                    let parsed = match self.version {
                        SpdyMajorVersion::Spdy4 => self.parse_h2_header(&raw),
                        _ => self.parse_spdy_header(&raw),
                    };
                    match parsed {
                        Ok(header) => self.start_payload(header, out),
                        Err(err) => self.fail(err, out),
                    }
                    return consumed;
                }
                DecoderState::Payload(header) => {
                    let n = rest.len().min(header.length - self.buffer.len());
                    self.buffer.extend_from_slice(&rest[..n]);
                    consumed += n;
                    if self.buffer.len() == header.length {
                        let payload = self.buffer.split().freeze();
                        self.state = DecoderState::FrameHeader;
                        self.finish_payload(header, payload, out);
                    }
                    return consumed;
                }
                DecoderState::DataPayload {
                    stream_id,
                    remaining,
                    fin,
                } => {
                    let n = rest.len().min(remaining);
                    if n == 0 {
                        return consumed;
                    }
                    out.push(FrameEvent::StreamFrameData {
                        stream_id,
                        data: Some(Bytes::copy_from_slice(&rest[..n])),
                    });
                    consumed += n;
                    if n == remaining {
                        if fin {
                            out.push(FrameEvent::StreamFrameData {
                                stream_id,
                                data: None,
                            });
                        }
                        self.state = DecoderState::FrameHeader;
                    } else {
                        self.state = DecoderState::DataPayload {
                            stream_id,
                            remaining: remaining - n,
                            fin,
                        };
                    }
                    return consumed;
                }
            }
        }
    }

    fn fail(&mut self, err: FramerError, out: &mut Vec<FrameEvent>) {
        tracing::debug!("SpdyFramer: decode error {:?}", err);
        self.state = DecoderState::Error;
        self.error = Some(err);
        self.buffer.clear();
        out.push(FrameEvent::Error(err));
    }

    fn parse_spdy_header(&self, raw: &[u8]) -> Result<FrameHeader, FramerError> {
        let mut buf = raw;
        let first = buf.get_u32();
        let frame_flags = buf.get_u8();
        let length = buf.get_uint(3) as usize;

        if first & 0x8000_0000 == 0 {
            let stream_id = first & STREAM_ID_MASK;
            if frame_flags & !flags::FIN != 0 {
                return Err(FramerError::InvalidDataFrameFlags);
            }
            if stream_id == 0 {
                return Err(FramerError::UnexpectedFrame);
            }
            return Ok(FrameHeader {
                kind: FrameKind::Data,
                flags: frame_flags,
                length,
                stream_id,
            });
        }

        let version = ((first >> 16) & 0x7fff) as u16;
        if version != self.version.wire_version() {
            return Err(FramerError::UnsupportedVersion);
        }
        let frame_type = SpdyFrameType::from_spdy3_type_id((first & 0xffff) as u16, self.version)
            .ok_or(FramerError::InvalidControlFrame)?;
        if length > MAX_CONTROL_FRAME_PAYLOAD {
            return Err(FramerError::ControlPayloadTooLarge);
        }
        let allowed = match frame_type {
            SpdyFrameType::SynStream => flags::FIN | flags::UNIDIRECTIONAL,
            SpdyFrameType::SynReply | SpdyFrameType::Headers => flags::FIN,
            SpdyFrameType::Settings => flags::SETTINGS_CLEAR_PERSISTED,
            _ => 0,
        };
        if frame_flags & !allowed != 0 {
            return Err(FramerError::InvalidControlFrameFlags);
        }
        Ok(FrameHeader {
            kind: FrameKind::Control(frame_type),
            flags: frame_flags,
            length,
            stream_id: 0,
        })
    }

    fn parse_h2_header(&self, raw: &[u8]) -> Result<FrameHeader, FramerError> {
        let mut buf = raw;
        let length = buf.get_uint(3) as usize;
        let type_id = buf.get_u8();
        let frame_flags = buf.get_u8();
        let stream_id = buf.get_u32() & STREAM_ID_MASK;

        if length > MAX_H2_FRAME_PAYLOAD {
            return Err(FramerError::ControlPayloadTooLarge);
        }
        let kind = match SpdyFrameType::from_h2_type_id(type_id) {
            Some(SpdyFrameType::Data) => {
                if stream_id == 0 {
                    return Err(FramerError::UnexpectedFrame);
                }
                if frame_flags & flags::PADDED != 0 {
                    FrameKind::PaddedData
                } else {
                    FrameKind::Data
                }
            }
            Some(SpdyFrameType::Continuation) => return Err(FramerError::UnexpectedFrame),
            Some(SpdyFrameType::Priority) | None => FrameKind::Ignored,
            Some(frame_type) => FrameKind::Control(frame_type),
        };
        Ok(FrameHeader {
            kind,
            flags: frame_flags,
            length,
            stream_id,
        })
    }

    fn start_payload(&mut self, header: FrameHeader, out: &mut Vec<FrameEvent>) {
        match header.kind {
            FrameKind::Data => {
                let fin = header.flags & flags::FIN != 0;
                out.push(FrameEvent::DataFrameHeader {
                    stream_id: header.stream_id,
                    length: header.length,
                    fin,
                });
                if header.length > 0 {
                    self.state = DecoderState::DataPayload {
                        stream_id: header.stream_id,
                        remaining: header.length,
                        fin,
                    };
                    return;
                }
                if fin {
                    out.push(FrameEvent::StreamFrameData {
                        stream_id: header.stream_id,
                        data: None,
                    });
                }
                self.state = DecoderState::FrameHeader;
            }
            _ if header.length == 0 => {
                self.state = DecoderState::FrameHeader;
                self.finish_payload(header, Bytes::new(), out);
            }
            _ => self.state = DecoderState::Payload(header),
        }
    }

    fn finish_payload(&mut self, header: FrameHeader, payload: Bytes, out: &mut Vec<FrameEvent>) {
        let result = match (header.kind, self.version) {
            (FrameKind::Control(frame_type), SpdyMajorVersion::Spdy4) => {
                self.decode_h2_frame(frame_type, header, payload, out)
            }
            (FrameKind::Control(frame_type), _) => {
                self.decode_spdy_control(frame_type, header.flags, payload, out)
            }
            (FrameKind::PaddedData, _) => self.decode_padded_data(header, payload, out),
            (FrameKind::Data, _) | (FrameKind::Ignored, _) => Ok(()),
        };
        if let Err(err) = result {
            self.fail(err, out);
        }
    }

    fn decode_spdy_control(
        &mut self,
        frame_type: SpdyFrameType,
        frame_flags: u8,
        payload: Bytes,
        out: &mut Vec<FrameEvent>,
    ) -> Result<(), FramerError> {
        let spdy2 = self.version == SpdyMajorVersion::Spdy2;
        let fin = frame_flags & flags::FIN != 0;
        let mut buf = &payload[..];

        match frame_type {
            SpdyFrameType::SynStream => {
                if buf.len() < 10 {
                    return Err(FramerError::InvalidControlFrame);
                }
                let stream_id = buf.get_u32() & STREAM_ID_MASK;
                let associated_stream_id = buf.get_u32() & STREAM_ID_MASK;
                let priority_byte = buf.get_u8();
                let priority = if spdy2 {
                    priority_byte >> 6
                } else {
                    priority_byte >> 5
                };
                buf.advance(1);
                if stream_id == 0 {
                    return Err(FramerError::InvalidControlFrame);
                }
                if let Some(headers) = self.decode_header_block(stream_id, buf, out)? {
                    out.push(FrameEvent::SynStream {
                        stream_id,
                        associated_stream_id,
                        priority,
                        fin,
                        unidirectional: frame_flags & flags::UNIDIRECTIONAL != 0,
                        headers,
                    });
                    push_fin(stream_id, fin, out);
                }
            }
            SpdyFrameType::SynReply | SpdyFrameType::Headers => {
                let prefix = if spdy2 { 6 } else { 4 };
                if buf.len() < prefix {
                    return Err(FramerError::InvalidControlFrame);
                }
                let stream_id = buf.get_u32() & STREAM_ID_MASK;
                buf.advance(prefix - 4);
                if stream_id == 0 {
                    return Err(FramerError::InvalidControlFrame);
                }
                if let Some(headers) = self.decode_header_block(stream_id, buf, out)? {
                    out.push(if frame_type == SpdyFrameType::SynReply {
                        FrameEvent::SynReply {
                            stream_id,
                            fin,
                            headers,
                        }
                    } else {
                        FrameEvent::Headers {
                            stream_id,
                            fin,
                            priority: None,
                            headers,
                        }
                    });
                    push_fin(stream_id, fin, out);
                }
            }
            SpdyFrameType::RstStream => {
                if buf.len() != 8 {
                    return Err(FramerError::InvalidControlFrame);
                }
                let stream_id = buf.get_u32() & STREAM_ID_MASK;
                let status = RstStreamStatus::from_wire(buf.get_u32(), self.version);
                if stream_id == 0 {
                    return Err(FramerError::RstStreamFrameCorrupt);
                }
                out.push(FrameEvent::RstStream { stream_id, status });
            }
            SpdyFrameType::Settings => {
                if buf.len() < 4 {
                    return Err(FramerError::InvalidControlFrame);
                }
                let count = buf.get_u32() as usize;
                if count.checked_mul(8) != Some(buf.len()) {
                    return Err(FramerError::InvalidControlFrame);
                }
                out.push(FrameEvent::Settings {
                    clear_persisted: frame_flags & flags::SETTINGS_CLEAR_PERSISTED != 0,
                });
                for _ in 0..count {
                    let entry = buf.get_u32().to_be_bytes();
                    // SPDY/2 put the id on the wire little-endian ahead of the flags.
                    let (entry_flags, wire_id) = if spdy2 {
                        (
                            entry[3],
                            u32::from(entry[0]) | u32::from(entry[1]) << 8 | u32::from(entry[2]) << 16,
                        )
                    } else {
                        (
                            entry[0],
                            u32::from(entry[1]) << 16 | u32::from(entry[2]) << 8 | u32::from(entry[3]),
                        )
                    };
                    let value = buf.get_u32();
                    match SettingsId::from_wire(wire_id, self.version) {
                        Some(id) => out.push(FrameEvent::Setting {
                            id,
                            flags: entry_flags,
                            value,
                        }),
                        None => tracing::debug!("SpdyFramer: ignoring unknown setting {}", wire_id),
                    }
                }
            }
            SpdyFrameType::Ping => {
                if buf.len() != 4 {
                    return Err(FramerError::InvalidControlFrame);
                }
                out.push(FrameEvent::Ping {
                    id: buf.get_u32(),
                    is_ack: false,
                });
            }
            SpdyFrameType::GoAway => {
                let expected = if spdy2 { 4 } else { 8 };
                if buf.len() != expected {
                    return Err(FramerError::InvalidControlFrame);
                }
                let last_accepted_stream_id = buf.get_u32() & STREAM_ID_MASK;
                let status = if spdy2 {
                    GoAwayStatus::Ok
                } else {
                    GoAwayStatus::from_wire(buf.get_u32(), self.version)
                };
                out.push(FrameEvent::GoAway {
                    last_accepted_stream_id,
                    status,
                });
            }
            SpdyFrameType::WindowUpdate => {
                if buf.len() != 8 {
                    return Err(FramerError::InvalidControlFrame);
                }
                let stream_id = buf.get_u32() & STREAM_ID_MASK;
                let delta = buf.get_u32() & STREAM_ID_MASK;
                out.push(FrameEvent::WindowUpdate { stream_id, delta });
            }
            SpdyFrameType::Noop | SpdyFrameType::Credential => {}
            _ => return Err(FramerError::InvalidControlFrame),
        }
        Ok(())
    }

    fn decode_h2_frame(
        &mut self,
        frame_type: SpdyFrameType,
        header: FrameHeader,
        payload: Bytes,
        out: &mut Vec<FrameEvent>,
    ) -> Result<(), FramerError> {
        let stream_id = header.stream_id;
        let frame_flags = header.flags;
        let fin = frame_flags & flags::FIN != 0;

        match frame_type {
            SpdyFrameType::Headers => {
                if stream_id == 0 {
                    return Err(FramerError::InvalidControlFrame);
                }
                if frame_flags & flags::END_HEADERS == 0 {
                    return Err(FramerError::UnexpectedFrame);
                }
                let mut buf = strip_padding(frame_flags, &payload)?;
                let priority = if frame_flags & flags::PRIORITY != 0 {
                    if buf.len() < 5 {
                        return Err(FramerError::InvalidControlFrame);
                    }
                    buf.advance(4);
                    Some(weight_to_priority(buf.get_u8()))
                } else {
                    None
                };
                if let Some(headers) = self.decode_header_block(stream_id, buf, out)? {
                    out.push(FrameEvent::Headers {
                        stream_id,
                        fin,
                        priority,
                        headers,
                    });
                    push_fin(stream_id, fin, out);
                }
            }
            SpdyFrameType::PushPromise => {
                if stream_id == 0 {
                    return Err(FramerError::InvalidControlFrame);
                }
                if frame_flags & flags::END_HEADERS == 0 {
                    return Err(FramerError::UnexpectedFrame);
                }
                let mut buf = strip_padding(frame_flags, &payload)?;
                if buf.len() < 4 {
                    return Err(FramerError::InvalidControlFrame);
                }
                let promised_stream_id = buf.get_u32() & STREAM_ID_MASK;
                if let Some(headers) = self.decode_header_block(promised_stream_id, buf, out)? {
                    out.push(FrameEvent::PushPromise {
                        stream_id,
                        promised_stream_id,
                        headers,
                    });
                }
            }
            SpdyFrameType::RstStream => {
                if payload.len() != 4 || stream_id == 0 {
                    return Err(FramerError::RstStreamFrameCorrupt);
                }
                let status = RstStreamStatus::from_wire((&payload[..]).get_u32(), self.version);
                out.push(FrameEvent::RstStream { stream_id, status });
            }
            SpdyFrameType::Settings => {
                if stream_id != 0 {
                    return Err(FramerError::InvalidControlFrame);
                }
                if frame_flags & flags::ACK != 0 {
                    if !payload.is_empty() {
                        return Err(FramerError::InvalidControlFrame);
                    }
                    out.push(FrameEvent::SettingsAck);
                    return Ok(());
                }
                if payload.len() % 6 != 0 {
                    return Err(FramerError::InvalidControlFrame);
                }
                out.push(FrameEvent::Settings {
                    clear_persisted: false,
                });
                let mut buf = &payload[..];
                while buf.has_remaining() {
                    let wire_id = u32::from(buf.get_u16());
                    let value = buf.get_u32();
                    match SettingsId::from_wire(wire_id, self.version) {
                        Some(id) => out.push(FrameEvent::Setting {
                            id,
                            flags: 0,
                            value,
                        }),
                        None => tracing::debug!("SpdyFramer: ignoring unknown setting {}", wire_id),
                    }
                }
            }
            SpdyFrameType::Ping => {
                if payload.len() != 8 || stream_id != 0 {
                    return Err(FramerError::InvalidControlFrame);
                }
                let id = ((&payload[..]).get_u64() & 0xffff_ffff) as SpdyPingId;
                out.push(FrameEvent::Ping {
                    id,
                    is_ack: frame_flags & flags::ACK != 0,
                });
            }
            SpdyFrameType::GoAway => {
                if payload.len() < 8 || stream_id != 0 {
                    return Err(FramerError::GoAwayFrameCorrupt);
                }
                let mut buf = &payload[..];
                let last_accepted_stream_id = buf.get_u32() & STREAM_ID_MASK;
                let status = GoAwayStatus::from_wire(buf.get_u32(), self.version);
                out.push(FrameEvent::GoAway {
                    last_accepted_stream_id,
                    status,
                });
            }
            SpdyFrameType::WindowUpdate => {
                if payload.len() != 4 {
                    return Err(FramerError::InvalidControlFrame);
                }
                let delta = (&payload[..]).get_u32() & STREAM_ID_MASK;
                out.push(FrameEvent::WindowUpdate { stream_id, delta });
            }
            _ => return Err(FramerError::UnexpectedFrame),
        }
        Ok(())
    }

    fn decode_padded_data(
        &mut self,
        header: FrameHeader,
        payload: Bytes,
        out: &mut Vec<FrameEvent>,
    ) -> Result<(), FramerError> {
        let data = strip_padding(header.flags, &payload)?;
        let fin = header.flags & flags::FIN != 0;
        out.push(FrameEvent::DataFrameHeader {
            stream_id: header.stream_id,
            length: data.len(),
            fin,
        });
        if !data.is_empty() {
            out.push(FrameEvent::StreamFrameData {
                stream_id: header.stream_id,
                data: Some(payload.slice_ref(data)),
            });
        }
        push_fin(header.stream_id, fin, out);
        Ok(())
    }

    /// Decompress and parse a header block. A block that decompresses but does
    /// not parse is reported as a stream error and yields `None`.
    fn decode_header_block(
        &mut self,
        stream_id: SpdyStreamId,
        block: &[u8],
        out: &mut Vec<FrameEvent>,
    ) -> Result<Option<SpdyHeaderBlock>, FramerError> {
        let raw = match self.decompressor.as_mut() {
            Some(decoder) => {
                decoder
                    .write_all(block)
                    .and_then(|_| decoder.flush())
                    .map_err(|_| FramerError::DecompressFailure)?;
                std::mem::take(decoder.get_mut())
            }
            None => block.to_vec(),
        };
        if raw.len() > MAX_DECOMPRESSED_HEADER_BLOCK {
            return Err(FramerError::ControlPayloadTooLarge);
        }
        match parse_header_block(&raw, self.version != SpdyMajorVersion::Spdy2) {
            Some(headers) => Ok(Some(headers)),
            None => {
                out.push(FrameEvent::StreamError {
                    stream_id,
                    description: "Could not parse Spdy Control Frame Header.".to_string(),
                });
                Ok(None)
            }
        }
    }

    // ------------------------------------------------------------------
    // Encoding
    // ------------------------------------------------------------------

    fn encode_header_block(&mut self, headers: &SpdyHeaderBlock) -> Result<Vec<u8>, FramerError> {
        let wide = self.version != SpdyMajorVersion::Spdy2;
        let mut raw = BytesMut::new();
        put_length(&mut raw, headers.len(), wide)?;
        for (name, value) in headers {
            put_length(&mut raw, name.len(), wide)?;
            raw.put_slice(name.as_bytes());
            put_length(&mut raw, value.len(), wide)?;
            raw.put_slice(value.as_bytes());
        }
        match self.compressor.as_mut() {
            Some(encoder) => {
                encoder
                    .write_all(&raw)
                    .and_then(|_| encoder.flush())
                    .map_err(|_| FramerError::CompressFailure)?;
                Ok(std::mem::take(encoder.get_mut()))
            }
            None => Ok(raw.to_vec()),
        }
    }

    fn control_frame(&self, frame_type: SpdyFrameType, frame_flags: u8, payload: &[u8]) -> Bytes {
        let type_id = frame_type.spdy3_type_id().unwrap_or_default();
        let mut buf = BytesMut::with_capacity(SPDY_FRAME_HEADER_SIZE + payload.len());
        buf.put_u16(0x8000 | self.version.wire_version());
        buf.put_u16(type_id);
        buf.put_u8(frame_flags);
        buf.put_uint(payload.len() as u64, 3);
        buf.put_slice(payload);
        buf.freeze()
    }

    fn h2_frame(
        frame_type: SpdyFrameType,
        frame_flags: u8,
        stream_id: SpdyStreamId,
        payload: &[u8],
    ) -> Bytes {
        let mut buf = BytesMut::with_capacity(H2_FRAME_HEADER_SIZE + payload.len());
        buf.put_uint(payload.len() as u64, 3);
        buf.put_u8(frame_type.h2_type_id().unwrap_or_default());
        buf.put_u8(frame_flags);
        buf.put_u32(stream_id & STREAM_ID_MASK);
        buf.put_slice(payload);
        buf.freeze()
    }

    /// DATA frame carrying `data`.
    pub fn data(&self, stream_id: SpdyStreamId, data: &[u8], fin: bool) -> Bytes {
        let frame_flags = if fin { flags::FIN } else { 0 };
        if self.version == SpdyMajorVersion::Spdy4 {
            return Self::h2_frame(SpdyFrameType::Data, frame_flags, stream_id, data);
        }
        let mut buf = BytesMut::with_capacity(SPDY_FRAME_HEADER_SIZE + data.len());
        buf.put_u32(stream_id & STREAM_ID_MASK);
        buf.put_u8(frame_flags);
        buf.put_uint(data.len() as u64, 3);
        buf.put_slice(data);
        buf.freeze()
    }

    /// Frame opening a stream: SYN_STREAM, or HEADERS with priority for SPDY/4.
    pub fn syn_stream(
        &mut self,
        stream_id: SpdyStreamId,
        associated_stream_id: SpdyStreamId,
        priority: u8,
        fin: bool,
        headers: &SpdyHeaderBlock,
    ) -> Result<Bytes, FramerError> {
        let block = self.encode_header_block(headers)?;
        let mut payload = BytesMut::with_capacity(10 + block.len());
        if self.version == SpdyMajorVersion::Spdy4 {
            let mut frame_flags = flags::END_HEADERS | flags::PRIORITY;
            if fin {
                frame_flags |= flags::FIN;
            }
            payload.put_u32(0);
            payload.put_u8(priority_to_weight(priority));
            payload.put_slice(&block);
            return Ok(Self::h2_frame(
                SpdyFrameType::Headers,
                frame_flags,
                stream_id,
                &payload,
            ));
        }
        let frame_flags = if fin { flags::FIN } else { 0 };
        payload.put_u32(stream_id & STREAM_ID_MASK);
        payload.put_u32(associated_stream_id & STREAM_ID_MASK);
        let shift = if self.version == SpdyMajorVersion::Spdy2 { 6 } else { 5 };
        payload.put_u8(priority << shift);
        payload.put_u8(0);
        payload.put_slice(&block);
        Ok(self.control_frame(SpdyFrameType::SynStream, frame_flags, &payload))
    }

    /// Initial response headers: SYN_REPLY, or HEADERS for SPDY/4.
    pub fn syn_reply(
        &mut self,
        stream_id: SpdyStreamId,
        fin: bool,
        headers: &SpdyHeaderBlock,
    ) -> Result<Bytes, FramerError> {
        if self.version == SpdyMajorVersion::Spdy4 {
            return self.headers(stream_id, fin, headers);
        }
        self.stream_header_frame(SpdyFrameType::SynReply, stream_id, fin, headers)
    }

    /// HEADERS frame.
    pub fn headers(
        &mut self,
        stream_id: SpdyStreamId,
        fin: bool,
        headers: &SpdyHeaderBlock,
    ) -> Result<Bytes, FramerError> {
        if self.version == SpdyMajorVersion::Spdy4 {
            let block = self.encode_header_block(headers)?;
            let mut frame_flags = flags::END_HEADERS;
            if fin {
                frame_flags |= flags::FIN;
            }
            return Ok(Self::h2_frame(
                SpdyFrameType::Headers,
                frame_flags,
                stream_id,
                &block,
            ));
        }
        self.stream_header_frame(SpdyFrameType::Headers, stream_id, fin, headers)
    }

    fn stream_header_frame(
        &mut self,
        frame_type: SpdyFrameType,
        stream_id: SpdyStreamId,
        fin: bool,
        headers: &SpdyHeaderBlock,
    ) -> Result<Bytes, FramerError> {
        let block = self.encode_header_block(headers)?;
        let mut payload = BytesMut::with_capacity(6 + block.len());
        payload.put_u32(stream_id & STREAM_ID_MASK);
        if self.version == SpdyMajorVersion::Spdy2 {
            payload.put_u16(0);
        }
        payload.put_slice(&block);
        let frame_flags = if fin { flags::FIN } else { 0 };
        Ok(self.control_frame(frame_type, frame_flags, &payload))
    }

    /// PUSH_PROMISE frame (SPDY/4 only).
    pub fn push_promise(
        &mut self,
        stream_id: SpdyStreamId,
        promised_stream_id: SpdyStreamId,
        headers: &SpdyHeaderBlock,
    ) -> Result<Bytes, FramerError> {
        if self.version != SpdyMajorVersion::Spdy4 {
            return Err(FramerError::UnexpectedFrame);
        }
        let block = self.encode_header_block(headers)?;
        let mut payload = BytesMut::with_capacity(4 + block.len());
        payload.put_u32(promised_stream_id & STREAM_ID_MASK);
        payload.put_slice(&block);
        Ok(Self::h2_frame(
            SpdyFrameType::PushPromise,
            flags::END_HEADERS,
            stream_id,
            &payload,
        ))
    }

    pub fn rst_stream(&self, stream_id: SpdyStreamId, status: RstStreamStatus) -> Bytes {
        let code = status.to_wire(self.version);
        if self.version == SpdyMajorVersion::Spdy4 {
            return Self::h2_frame(
                SpdyFrameType::RstStream,
                0,
                stream_id,
                &code.to_be_bytes(),
            );
        }
        let mut payload = BytesMut::with_capacity(8);
        payload.put_u32(stream_id & STREAM_ID_MASK);
        payload.put_u32(code);
        self.control_frame(SpdyFrameType::RstStream, 0, &payload)
    }

    /// SETTINGS frame. Settings the dialect cannot express are left out;
    /// `clear_persisted` only exists in SPDY/2-3.
    pub fn settings(&self, settings: &SettingsMap, clear_persisted: bool) -> Bytes {
        let mut payload = BytesMut::new();
        if self.version == SpdyMajorVersion::Spdy4 {
            for (id, entry) in settings {
                if let Some(wire_id) = id.to_wire(self.version) {
                    payload.put_u16(wire_id as u16);
                    payload.put_u32(entry.value);
                }
            }
            return Self::h2_frame(SpdyFrameType::Settings, 0, 0, &payload);
        }

        let entries: Vec<(u32, u8, u32)> = settings
            .iter()
            .filter_map(|(id, entry)| {
                id.to_wire(self.version)
                    .map(|wire_id| (wire_id, entry.flags, entry.value))
            })
            .collect();
        payload.put_u32(entries.len() as u32);
        for (wire_id, entry_flags, value) in entries {
            let id = wire_id.to_be_bytes();
            if self.version == SpdyMajorVersion::Spdy2 {
                payload.put_slice(&[id[3], id[2], id[1], entry_flags]);
            } else {
                payload.put_slice(&[entry_flags, id[1], id[2], id[3]]);
            }
            payload.put_u32(value);
        }
        let frame_flags = if clear_persisted {
            flags::SETTINGS_CLEAR_PERSISTED
        } else {
            0
        };
        self.control_frame(SpdyFrameType::Settings, frame_flags, &payload)
    }

    /// SPDY/4 SETTINGS acknowledgement.
    pub fn settings_ack(&self) -> Bytes {
        Self::h2_frame(SpdyFrameType::Settings, flags::ACK, 0, &[])
    }

    pub fn ping(&self, id: SpdyPingId, is_ack: bool) -> Bytes {
        if self.version == SpdyMajorVersion::Spdy4 {
            let frame_flags = if is_ack { flags::ACK } else { 0 };
            return Self::h2_frame(
                SpdyFrameType::Ping,
                frame_flags,
                0,
                &u64::from(id).to_be_bytes(),
            );
        }
        self.control_frame(SpdyFrameType::Ping, 0, &id.to_be_bytes())
    }

    pub fn go_away(&self, last_accepted_stream_id: SpdyStreamId, status: GoAwayStatus) -> Bytes {
        let mut payload = BytesMut::with_capacity(8);
        payload.put_u32(last_accepted_stream_id & STREAM_ID_MASK);
        if self.version != SpdyMajorVersion::Spdy2 {
            payload.put_u32(status.to_wire(self.version));
        }
        if self.version == SpdyMajorVersion::Spdy4 {
            return Self::h2_frame(SpdyFrameType::GoAway, 0, 0, &payload);
        }
        self.control_frame(SpdyFrameType::GoAway, 0, &payload)
    }

    pub fn window_update(&self, stream_id: SpdyStreamId, delta: u32) -> Bytes {
        if self.version == SpdyMajorVersion::Spdy4 {
            return Self::h2_frame(
                SpdyFrameType::WindowUpdate,
                0,
                stream_id,
                &(delta & STREAM_ID_MASK).to_be_bytes(),
            );
        }
        let mut payload = BytesMut::with_capacity(8);
        payload.put_u32(stream_id & STREAM_ID_MASK);
        payload.put_u32(delta & STREAM_ID_MASK);
        self.control_frame(SpdyFrameType::WindowUpdate, 0, &payload)
    }
}

fn push_fin(stream_id: SpdyStreamId, fin: bool, out: &mut Vec<FrameEvent>) {
    if fin {
        out.push(FrameEvent::StreamFrameData {
            stream_id,
            data: None,
        });
    }
}

fn strip_padding(frame_flags: u8, payload: &[u8]) -> Result<&[u8], FramerError> {
    if frame_flags & flags::PADDED == 0 {
        return Ok(payload);
    }
    let (&pad_len, rest) = payload
        .split_first()
        .ok_or(FramerError::InvalidControlFrame)?;
    let pad_len = usize::from(pad_len);
    if pad_len > rest.len() {
        return Err(FramerError::InvalidControlFrame);
    }
    Ok(&rest[..rest.len() - pad_len])
}

// SPDY/4 HEADERS carry the 3-bit SPDY priority in the top bits of the weight.
fn priority_to_weight(priority: u8) -> u8 {
    ((7 - priority.min(7)) << 5) | 0x1f
}

fn weight_to_priority(weight: u8) -> u8 {
    7 - (weight >> 5)
}

fn put_length(buf: &mut BytesMut, len: usize, wide: bool) -> Result<(), FramerError> {
    if wide {
        let len = u32::try_from(len).map_err(|_| FramerError::ControlPayloadTooLarge)?;
        buf.put_u32(len);
    } else {
        let len = u16::try_from(len).map_err(|_| FramerError::ControlPayloadTooLarge)?;
        buf.put_u16(len);
    }
    Ok(())
}

fn get_length(buf: &mut &[u8], wide: bool) -> Option<usize> {
    if wide {
        (buf.remaining() >= 4).then(|| buf.get_u32() as usize)
    } else {
        (buf.remaining() >= 2).then(|| buf.get_u16() as usize)
    }
}

fn get_string(buf: &mut &[u8], wide: bool) -> Option<String> {
    let len = get_length(buf, wide)?;
    if buf.remaining() < len {
        return None;
    }
    let s = String::from_utf8(buf[..len].to_vec()).ok()?;
    buf.advance(len);
    Some(s)
}

/// Parse an uncompressed name/value block. Empty or repeated names, truncated
/// input and trailing bytes are all malformed.
fn parse_header_block(raw: &[u8], wide: bool) -> Option<SpdyHeaderBlock> {
    let mut buf = raw;
    let count = get_length(&mut buf, wide)?;
    let mut headers = SpdyHeaderBlock::new();
    for _ in 0..count {
        let name = get_string(&mut buf, wide)?;
        if name.is_empty() {
            return None;
        }
        let value = get_string(&mut buf, wide)?;
        if headers.insert(name, value).is_some() {
            return None;
        }
    }
    if buf.has_remaining() {
        return None;
    }
    Some(headers)
}

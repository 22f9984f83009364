//! SPDY protocol engine.
//!
//! - `frame`: frame types, status codes and settings identifiers per dialect
//! - `framer`: frame builders and the incremental decoder
//! - `buffer`: outbound frame bytes with a consumption cursor
//! - `write_queue`: per-priority queue of outbound frame producers
//! - `stream`: per-stream state and flow-control windows
//! - `session`: the session state machine driving all of the above

use std::collections::BTreeMap;
use std::time::Duration;

pub mod buffer;
pub mod frame;
pub mod framer;
pub mod session;
pub mod stream;
pub mod write_queue;

pub use session::{
    PoolAction, SessionEvent, SessionInfo, SpdySession, StreamCreation, StreamKey,
    StreamRequestId,
};
pub use stream::{SendStatus, SpdyStream, StreamKind, StreamState};

/// 31-bit stream identifier. Odd ids are client-initiated, even ids pushed.
pub type SpdyStreamId = u32;

/// Ping identifier. Client-initiated pings use odd ids.
pub type SpdyPingId = u32;

/// Header block: lowercase names to values (multiple values NUL-separated).
pub type SpdyHeaderBlock = BTreeMap<String, String>;

/// Bytes requested from the socket per read.
pub const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Bytes read synchronously before the read loop yields.
pub const MAX_READ_BYTES_WITHOUT_YIELDING: usize = 32 * 1024;

/// Hard ceiling on concurrent streams per session.
pub const MAX_CONCURRENT_STREAM_LIMIT: usize = 256;

/// Concurrent stream limit before the server's SETTINGS arrive.
pub const INITIAL_MAX_CONCURRENT_STREAMS: usize = 100;

/// Concurrent pushed streams the client allows the server.
pub const MAX_CONCURRENT_PUSHED_STREAMS: u32 = 1000;

/// Session receive window the client grows to right after connecting.
pub const DEFAULT_INITIAL_RECV_WINDOW_SIZE: i32 = 10 * 1024 * 1024;

/// Protocol-defined initial stream window.
pub const SPDY_STREAM_INITIAL_WINDOW_SIZE: i32 = 65536;

/// Protocol-defined initial session window.
pub const SPDY_SESSION_INITIAL_WINDOW_SIZE: i32 = 65536;

/// Largest DATA payload put in one frame: two TCP segments minus the frame header.
pub const MAX_SPDY_FRAME_CHUNK_SIZE: usize = 2 * 1430 - 8;

/// Unclaimed pushed streams live at least this long.
pub const MIN_PUSHED_STREAM_LIFETIME: Duration = Duration::from_secs(300);

/// Idle time after which a preface ping is sent.
pub const DEFAULT_CONNECTION_AT_RISK_OF_LOSS: Duration = Duration::from_secs(10);

/// Time a ping may go unanswered.
pub const DEFAULT_HUNG_INTERVAL: Duration = Duration::from_secs(10);

pub const FIRST_STREAM_ID: SpdyStreamId = 1;
pub const LAST_STREAM_ID: SpdyStreamId = 0x7fff_ffff;

/// Stream id carried by session-level WINDOW_UPDATE frames.
pub const SESSION_FLOW_CONTROL_STREAM_ID: SpdyStreamId = 0;

pub const FIRST_PING_ID: SpdyPingId = 1;

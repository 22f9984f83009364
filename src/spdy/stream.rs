//! Per-stream state.
//!
//! A stream is owned by its session. It keeps the request it is sending, the
//! response it has received, and its two flow-control windows. Everything that
//! needs the session (building frames, queueing writes, resetting) is driven by
//! the session; the methods here only update the stream's own bookkeeping.

use std::collections::VecDeque;

use bytes::Bytes;
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::RequestPriority;
use crate::spdy::session::StreamKey;
use crate::spdy::{SpdyHeaderBlock, SpdyStreamId};

/// What a stream is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Request and response bodies may interleave.
    Bidirectional,
    /// Request first, then response. No headers after the response headers.
    RequestResponse,
    /// Server-initiated.
    Push,
}

/// Stream lifecycle, from the client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    /// Created; request headers not yet written.
    Idle,
    Open,
    /// We have sent everything.
    HalfClosedLocal,
    /// The peer has sent everything.
    HalfClosedRemote,
    /// Promised by the server; response headers not yet received.
    ReservedRemote,
    Closed,
}

impl StreamState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamState::Idle => "IDLE",
            StreamState::Open => "OPEN",
            StreamState::HalfClosedLocal => "HALF_CLOSED_LOCAL",
            StreamState::HalfClosedRemote => "HALF_CLOSED_REMOTE",
            StreamState::ReservedRemote => "RESERVED_REMOTE",
            StreamState::Closed => "CLOSED",
        }
    }
}

/// Whether more request data follows a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SendStatus {
    #[default]
    MoreDataToSend,
    NoMoreDataToSend,
}

/// One logical request/response exchange on a session.
#[derive(Debug)]
pub struct SpdyStream {
    key: StreamKey,
    kind: StreamKind,
    stream_id: SpdyStreamId,
    url: Url,
    priority: RequestPriority,
    state: StreamState,

    send_window_size: i32,
    max_recv_window_size: i32,
    recv_window_size: i32,
    unacked_recv_window_bytes: i32,
    send_stalled_by_flow_control: bool,
    queued_for_unstall: bool,

    request_headers: Option<SpdyHeaderBlock>,
    pending_send_status: SendStatus,
    pending_send_data: Option<Bytes>,

    response_headers: SpdyHeaderBlock,
    response_headers_complete: bool,

    // Pushed streams buffer everything until someone claims them.
    claimed: bool,
    pending_recv_data: VecDeque<Option<Bytes>>,

    send_bytes: u64,
    recv_bytes: u64,
    raw_received_bytes: u64,
}

impl SpdyStream {
    pub(crate) fn new(
        key: StreamKey,
        kind: StreamKind,
        url: Url,
        priority: RequestPriority,
        initial_send_window_size: i32,
        initial_recv_window_size: i32,
    ) -> Self {
        Self {
            key,
            kind,
            stream_id: 0,
            url,
            priority,
            state: StreamState::Idle,
            send_window_size: initial_send_window_size,
            max_recv_window_size: initial_recv_window_size,
            recv_window_size: initial_recv_window_size,
            unacked_recv_window_bytes: 0,
            send_stalled_by_flow_control: false,
            queued_for_unstall: false,
            request_headers: None,
            pending_send_status: SendStatus::MoreDataToSend,
            pending_send_data: None,
            response_headers: SpdyHeaderBlock::new(),
            response_headers_complete: false,
            claimed: false,
            pending_recv_data: VecDeque::new(),
            send_bytes: 0,
            recv_bytes: 0,
            raw_received_bytes: 0,
        }
    }

    pub fn key(&self) -> StreamKey {
        self.key
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// 0 until the stream's first frame is written (or it is pushed).
    pub fn stream_id(&self) -> SpdyStreamId {
        self.stream_id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn priority(&self) -> RequestPriority {
        self.priority
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn send_window_size(&self) -> i32 {
        self.send_window_size
    }

    pub fn recv_window_size(&self) -> i32 {
        self.recv_window_size
    }

    pub fn unacked_recv_window_bytes(&self) -> i32 {
        self.unacked_recv_window_bytes
    }

    pub fn send_stalled_by_flow_control(&self) -> bool {
        self.send_stalled_by_flow_control
    }

    pub fn request_headers(&self) -> Option<&SpdyHeaderBlock> {
        self.request_headers.as_ref()
    }

    pub fn response_headers(&self) -> &SpdyHeaderBlock {
        &self.response_headers
    }

    pub fn response_headers_complete(&self) -> bool {
        self.response_headers_complete
    }

    pub fn pending_send_status(&self) -> SendStatus {
        self.pending_send_status
    }

    pub fn has_pending_send_data(&self) -> bool {
        self.pending_send_data.is_some()
    }

    pub fn send_bytes(&self) -> u64 {
        self.send_bytes
    }

    pub fn recv_bytes(&self) -> u64 {
        self.recv_bytes
    }

    pub fn raw_received_bytes(&self) -> u64 {
        self.raw_received_bytes
    }

    pub fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }

    pub fn is_locally_closed(&self) -> bool {
        matches!(
            self.state,
            StreamState::HalfClosedLocal | StreamState::Closed
        )
    }

    pub fn is_idle(&self) -> bool {
        self.state == StreamState::Idle
    }

    pub fn is_reserved_remote(&self) -> bool {
        self.state == StreamState::ReservedRemote
    }

    /// Whether anyone is listening for this stream's events. Pushed streams
    /// have no listener until claimed.
    pub fn has_delegate(&self) -> bool {
        self.kind != StreamKind::Push || self.claimed
    }

    pub(crate) fn set_stream_id(&mut self, stream_id: SpdyStreamId) {
        debug_assert_eq!(self.stream_id, 0);
        self.stream_id = stream_id;
    }

    pub(crate) fn set_send_stalled_by_flow_control(&mut self, stalled: bool) {
        self.send_stalled_by_flow_control = stalled;
    }

    /// Mark the stream as sitting in the session's unstall queue. Returns false
    /// when it already was.
    pub(crate) fn mark_queued_for_unstall(&mut self) -> bool {
        !std::mem::replace(&mut self.queued_for_unstall, true)
    }

    pub(crate) fn clear_queued_for_unstall(&mut self) {
        self.queued_for_unstall = false;
    }

    pub(crate) fn set_closed(&mut self) {
        self.state = StreamState::Closed;
    }

    pub(crate) fn increment_raw_received_bytes(&mut self, n: usize) {
        self.raw_received_bytes += n as u64;
    }

    // ------------------------------------------------------------------
    // Flow control
    // ------------------------------------------------------------------

    /// Apply a change of the peer's initial window to a stream that already exists.
    pub(crate) fn adjust_send_window_size(&mut self, delta: i32) {
        if self.is_closed() {
            return;
        }
        self.send_window_size = self.send_window_size.saturating_add(delta);
    }

    /// Apply a WINDOW_UPDATE from the peer.
    pub(crate) fn increase_send_window_size(&mut self, delta: i32) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        if self.send_window_size > 0 && delta > i32::MAX - self.send_window_size {
            return Err(Error::FlowControl);
        }
        self.send_window_size += delta;
        Ok(())
    }

    pub(crate) fn decrease_send_window_size(&mut self, delta: i32) {
        debug_assert!(delta <= self.send_window_size);
        self.send_window_size -= delta;
    }

    /// Account for received DATA. The peer may only send what it was told
    /// about, which excludes credit we have not acknowledged yet.
    pub(crate) fn decrease_recv_window_size(&mut self, delta: i32) -> Result<()> {
        if delta > self.recv_window_size - self.unacked_recv_window_bytes {
            return Err(Error::FlowControl);
        }
        self.recv_window_size -= delta;
        Ok(())
    }

    /// Credit consumed bytes back. Returns the WINDOW_UPDATE delta to send once
    /// more than half of the window is waiting to be acknowledged.
    pub(crate) fn increase_recv_window_size(&mut self, delta: i32) -> Option<u32> {
        self.recv_window_size += delta;
        self.unacked_recv_window_bytes += delta;
        if self.unacked_recv_window_bytes > self.max_recv_window_size / 2 {
            let update = self.unacked_recv_window_bytes as u32;
            self.unacked_recv_window_bytes = 0;
            return Some(update);
        }
        None
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    pub(crate) fn set_request_headers(
        &mut self,
        headers: SpdyHeaderBlock,
        send_status: SendStatus,
    ) -> Result<()> {
        if self.kind == StreamKind::Push {
            return Err(Error::unexpected("request headers on a pushed stream"));
        }
        if self.state != StreamState::Idle || self.request_headers.is_some() {
            return Err(Error::unexpected("request headers already sent"));
        }
        self.request_headers = Some(headers);
        self.pending_send_status = send_status;
        Ok(())
    }

    pub(crate) fn start_send(&mut self, data: Bytes, send_status: SendStatus) -> Result<()> {
        if self.kind == StreamKind::Push {
            return Err(Error::unexpected("sending data on a pushed stream"));
        }
        if !matches!(self.state, StreamState::Open | StreamState::HalfClosedRemote) {
            return Err(Error::unexpected("sending data on a stream that is not open"));
        }
        if self.pending_send_status == SendStatus::NoMoreDataToSend {
            return Err(Error::unexpected("sending data after the last data"));
        }
        if self.pending_send_data.is_some() {
            return Err(Error::unexpected("a send is already in progress"));
        }
        self.pending_send_data = Some(data);
        self.pending_send_status = send_status;
        Ok(())
    }

    pub(crate) fn pending_send_data(&self) -> Option<&Bytes> {
        self.pending_send_data.as_ref()
    }

    /// Drop `n` written payload bytes from the pending send. Returns true when
    /// nothing is left.
    pub(crate) fn consume_pending_send_data(&mut self, n: usize) -> bool {
        self.send_bytes += n as u64;
        let done = match self.pending_send_data.as_mut() {
            Some(data) => {
                let _ = data.split_to(n.min(data.len()));
                data.is_empty()
            }
            None => true,
        };
        if done {
            self.pending_send_data = None;
        }
        done
    }

    pub(crate) fn on_request_headers_sent(&mut self) {
        debug_assert_eq!(self.state, StreamState::Idle);
        self.state = StreamState::Open;
    }

    /// After the last frame went out: close the local half.
    pub(crate) fn on_last_frame_sent(&mut self) {
        if self.pending_send_status != SendStatus::NoMoreDataToSend {
            return;
        }
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        };
    }

    // ------------------------------------------------------------------
    // Receiving
    // ------------------------------------------------------------------

    pub(crate) fn on_push_promise_headers_received(&mut self, headers: SpdyHeaderBlock) {
        self.request_headers = Some(headers);
        self.state = StreamState::ReservedRemote;
    }

    /// A pushed stream becomes half-closed (local) once its response headers arrive.
    pub(crate) fn on_push_response_started(&mut self) {
        if self.state == StreamState::ReservedRemote {
            self.state = StreamState::HalfClosedLocal;
        }
    }

    /// Merge a header block into the response headers. Rejects blocks that
    /// repeat a name, use uppercase names or carry `transfer-encoding`.
    pub(crate) fn merge_response_headers(
        &mut self,
        headers: &SpdyHeaderBlock,
    ) -> std::result::Result<(), String> {
        if headers.contains_key("transfer-encoding") {
            return Err("Received transfer-encoding header".to_string());
        }
        for (name, value) in headers {
            if name.bytes().any(|b| b.is_ascii_uppercase()) {
                return Err(format!("Upper case characters in header: {}", name));
            }
            if self.response_headers.contains_key(name) {
                return Err(format!("Duplicate header: {}", name));
            }
            self.response_headers.insert(name.clone(), value.clone());
        }
        Ok(())
    }

    pub(crate) fn set_response_headers_complete(&mut self) {
        self.response_headers_complete = true;
    }

    /// The peer finished sending. Returns the new state.
    pub(crate) fn on_remote_fin(&mut self) -> StreamState {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => StreamState::Closed,
            other => other,
        };
        self.state
    }

    pub(crate) fn record_received(&mut self, n: usize) {
        self.recv_bytes += n as u64;
    }

    pub(crate) fn buffer_recv_data(&mut self, data: Option<Bytes>) {
        self.pending_recv_data.push_back(data);
    }

    pub(crate) fn has_pending_recv_data(&self) -> bool {
        !self.pending_recv_data.is_empty()
    }

    /// Payload bytes buffered for a listener that has not attached yet.
    pub(crate) fn buffered_recv_bytes(&self) -> usize {
        self.pending_recv_data
            .iter()
            .flatten()
            .map(Bytes::len)
            .sum()
    }

    pub(crate) fn claim(&mut self) -> VecDeque<Option<Bytes>> {
        self.claimed = true;
        std::mem::take(&mut self.pending_recv_data)
    }
}

//! SPDY session: many streams multiplexed over one socket.
//!
//! The session is a sans-io state machine. It owns its socket and drives reads
//! and writes through [`SpdySocket`], but never waits: work that has to happen
//! on a later turn is posted to an outbox of [`PostedTask`]s, requests to its
//! pool are posted as [`PoolAction`]s and everything a stream's owner needs to
//! know is posted as a [`SessionEvent`]. The owner (normally
//! [`SpdySessionPool`](crate::SpdySessionPool)) drains all three after every
//! call into the session.
//!
//! Lifecycle: `Available` → `GoingAway` → `Draining`. A session that is going
//! away admits no new streams but lets its active streams finish; a draining
//! session has no streams left and only flushes its write queue before the pool
//! removes it.
//!
//! The implementation is split by concern:
//! - `streams`: admission, creation, closing and shutdown
//! - `io`: the read and write loops
//! - `frames`: handling of decoded frames, including push admission
//! - `flow`: flow-control windows, DATA frame construction and pings

mod flow;
mod frames;
mod io;
mod streams;

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use url::Url;

use crate::config::SpdySessionConfig;
use crate::error::{CertError, Error, Result};
use crate::pool::{SessionId, SpdySessionKey};
use crate::properties::HttpServerProperties;
use crate::protocol::{FlowControlState, NextProto, RequestPriority, NUM_PRIORITIES};
use crate::scheduler::SessionTask;
use crate::socket::SpdySocket;
use crate::spdy::buffer::SpdyBuffer;
use crate::spdy::frame::SpdyFrameType;
use crate::spdy::framer::SpdyFramer;
use crate::spdy::stream::{SpdyStream, StreamKind};
use crate::spdy::write_queue::SpdyWriteQueue;
use crate::spdy::{
    SpdyHeaderBlock, SpdyPingId, SpdyStreamId, FIRST_PING_ID, FIRST_STREAM_ID,
    MIN_PUSHED_STREAM_LIFETIME, SPDY_SESSION_INITIAL_WINDOW_SIZE,
    SPDY_STREAM_INITIAL_WINDOW_SIZE,
};

/// Handle to a stream, valid from creation until the stream closes.
///
/// Unlike the stream id, the key exists before the first frame is written and
/// is never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey(u64);

impl StreamKey {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

/// Handle to a stream request that had to wait for capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamRequestId(u64);

impl fmt::Display for StreamRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request#{}", self.0)
    }
}

/// Outcome of asking a session for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCreation {
    /// The stream exists now.
    Created(StreamKey),
    /// The session is at its concurrency limit. The request completes later
    /// with a [`SessionEvent::StreamRequestComplete`].
    Pending(StreamRequestId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AvailabilityState {
    /// Takes new streams.
    Available,
    /// No new streams; the active ones may finish.
    GoingAway,
    /// No streams left; flushing writes before removal.
    Draining,
}

impl AvailabilityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AvailabilityState::Available => "AVAILABLE",
            AvailabilityState::GoingAway => "GOING_AWAY",
            AvailabilityState::Draining => "DRAINING",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadState {
    DoRead,
    DoReadComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteState {
    Idle,
    DoWrite,
    DoWriteComplete,
}

/// Deferred work for the session's owner to run on a later turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedTask {
    /// `None` runs on the next turn.
    pub delay: Option<Duration>,
    pub task: SessionTask,
}

/// What the session asks of the pool that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolAction {
    /// Stop handing this session out for new requests.
    MakeUnavailable,
    /// The session has finished draining and can be destroyed.
    RemoveUnavailable,
}

/// Notification for the owner of a stream or stream request.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A pending stream request was served or failed.
    StreamRequestComplete {
        request: StreamRequestId,
        result: Result<StreamKey>,
    },
    /// The SYN_STREAM (HEADERS) carrying the request headers was written.
    RequestHeadersSent { stream: StreamKey },
    /// The last queued DATA frame of a send was written.
    DataSent { stream: StreamKey },
    /// Response headers arrived. Carries every header received so far.
    ResponseHeaders {
        stream: StreamKey,
        headers: SpdyHeaderBlock,
    },
    /// Response body bytes, or `None` when the peer finished sending. Delivered
    /// bytes hold flow-control credit until passed to `consume_received_data`.
    Data {
        stream: StreamKey,
        data: Option<Bytes>,
    },
    /// The stream is gone. `Ok` when it completed normally. Pushed streams
    /// that were never claimed close silently.
    StreamClosed {
        stream: StreamKey,
        status: Result<()>,
    },
}

/// Snapshot of a session's state for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub source_id: SessionId,
    pub host_port_pair: String,
    pub aliases: Vec<String>,
    pub proxy: String,
    pub active_streams: usize,
    pub unclaimed_pushed_streams: usize,
    pub is_secure: bool,
    pub protocol_negotiated: NextProto,
    pub error: Option<Error>,
    pub max_concurrent_streams: usize,
    pub streams_initiated_count: u64,
    pub streams_pushed_count: u64,
    pub streams_pushed_and_claimed_count: u64,
    pub streams_abandoned_count: u64,
    pub frames_received: u64,
    pub sent_settings: bool,
    pub received_settings: bool,
    pub send_window_size: i32,
    pub recv_window_size: i32,
    pub unacked_recv_window_bytes: i32,
}

impl SessionInfo {
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "source_id": self.source_id.get(),
            "host_port_pair": self.host_port_pair,
            "aliases": self.aliases,
            "proxy": self.proxy,
            "active_streams": self.active_streams,
            "unclaimed_pushed_streams": self.unclaimed_pushed_streams,
            "is_secure": self.is_secure,
            "protocol_negotiated": self.protocol_negotiated.as_str(),
            "error": self.error.map(|e| e.to_string()),
            "max_concurrent_streams": self.max_concurrent_streams,
            "streams_initiated_count": self.streams_initiated_count,
            "streams_pushed_count": self.streams_pushed_count,
            "streams_pushed_and_claimed_count": self.streams_pushed_and_claimed_count,
            "streams_abandoned_count": self.streams_abandoned_count,
            "frames_received": self.frames_received,
            "sent_settings": self.sent_settings,
            "received_settings": self.received_settings,
            "send_window_size": self.send_window_size,
            "recv_window_size": self.recv_window_size,
            "unacked_recv_window_bytes": self.unacked_recv_window_bytes,
        })
    }
}

#[derive(Debug)]
struct ActiveStreamInfo {
    key: StreamKey,
    /// Still expecting the initial response headers (SYN_REPLY).
    waiting_for_syn_reply: bool,
}

#[derive(Debug, Clone, Copy)]
struct PushedStreamInfo {
    stream_id: SpdyStreamId,
    creation_time: Instant,
}

#[derive(Debug, Clone)]
struct StreamRequest {
    kind: StreamKind,
    url: Url,
    priority: RequestPriority,
}

/// Frame currently being handed to the socket.
#[derive(Debug)]
struct InFlightWrite {
    buffer: SpdyBuffer,
    frame_type: SpdyFrameType,
    frame_size: usize,
    /// Cleared when the stream goes away mid-write.
    stream: Option<StreamKey>,
}

/// Receive credit delivered to a stream's owner but not yet consumed.
#[derive(Debug, Default, Clone, Copy)]
struct RecvCredit {
    session: usize,
    stream: usize,
}

pub struct SpdySession {
    id: SessionId,
    spdy_session_key: SpdySessionKey,
    pooled_aliases: BTreeSet<SpdySessionKey>,
    config: SpdySessionConfig,
    http_server_properties: Arc<dyn HttpServerProperties>,

    socket: Option<Box<dyn SpdySocket>>,
    is_secure: bool,
    certificate_error: Option<CertError>,
    protocol: NextProto,
    framer: SpdyFramer,
    flow_control_state: FlowControlState,

    availability_state: AvailabilityState,
    read_state: ReadState,
    write_state: WriteState,
    in_io_loop: bool,
    error_on_close: Option<Error>,

    next_stream_key: u64,
    streams: HashMap<StreamKey, SpdyStream>,
    created_streams: BTreeSet<StreamKey>,
    active_streams: BTreeMap<SpdyStreamId, ActiveStreamInfo>,
    unclaimed_pushed_streams: BTreeMap<Url, PushedStreamInfo>,
    next_unclaimed_push_stream_sweep_time: Instant,
    stream_hi_water_mark: SpdyStreamId,

    next_request_id: u64,
    stream_requests: HashMap<StreamRequestId, StreamRequest>,
    pending_create_stream_queues: [VecDeque<StreamRequestId>; NUM_PRIORITIES],
    /// Requests popped from the queues whose completion has not run yet.
    /// They hold on to the capacity they were given.
    posted_stream_requests: usize,
    max_concurrent_streams: usize,

    write_queue: SpdyWriteQueue,
    in_flight_write: Option<InFlightWrite>,

    session_send_window_size: i32,
    session_recv_window_size: i32,
    session_unacked_recv_window_bytes: i32,
    stream_initial_send_window_size: i32,
    stream_initial_recv_window_size: i32,
    stream_send_unstall_queue: [VecDeque<SpdyStreamId>; NUM_PRIORITIES],
    unconsumed_recv_credit: HashMap<StreamKey, RecvCredit>,

    pings_in_flight: i64,
    next_ping_id: SpdyPingId,
    last_activity_time: Instant,
    last_ping_sent_time: Option<Instant>,
    check_ping_status_pending: bool,

    streams_initiated_count: u64,
    streams_pushed_count: u64,
    streams_pushed_and_claimed_count: u64,
    streams_abandoned_count: u64,
    stalled_streams: u64,
    total_bytes_received: u64,
    frames_received: u64,
    sent_settings: bool,
    received_settings: bool,
    removal_requested: bool,

    tasks: Vec<PostedTask>,
    pool_actions: Vec<PoolAction>,
    events: VecDeque<SessionEvent>,
}

impl fmt::Debug for SpdySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpdySession")
            .field("id", &self.id)
            .field("key", &self.spdy_session_key)
            .field("protocol", &self.protocol)
            .field("availability_state", &self.availability_state)
            .field("active_streams", &self.active_streams.len())
            .field("created_streams", &self.created_streams.len())
            .finish()
    }
}

impl SpdySession {
    /// Create a session. It does nothing until
    /// [`initialize_with_socket`](Self::initialize_with_socket) hands it a socket.
    pub fn new(
        id: SessionId,
        spdy_session_key: SpdySessionKey,
        http_server_properties: Arc<dyn HttpServerProperties>,
        config: SpdySessionConfig,
    ) -> Self {
        let now = Instant::now();
        let protocol = config.default_protocol;
        let version = protocol
            .major_version()
            .unwrap_or(crate::protocol::SpdyMajorVersion::Spdy3);
        let max_concurrent_streams = config
            .initial_max_concurrent_streams
            .min(config.max_concurrent_streams_limit);
        let stream_initial_recv_window_size = config.stream_initial_recv_window_size;
        let framer = SpdyFramer::new(version, config.enable_compression);

        Self {
            id,
            spdy_session_key,
            pooled_aliases: BTreeSet::new(),
            config,
            http_server_properties,
            socket: None,
            is_secure: false,
            certificate_error: None,
            protocol,
            framer,
            flow_control_state: FlowControlState::None,
            availability_state: AvailabilityState::Available,
            read_state: ReadState::DoRead,
            write_state: WriteState::Idle,
            in_io_loop: false,
            error_on_close: None,
            next_stream_key: 1,
            streams: HashMap::new(),
            created_streams: BTreeSet::new(),
            active_streams: BTreeMap::new(),
            unclaimed_pushed_streams: BTreeMap::new(),
            next_unclaimed_push_stream_sweep_time: now + MIN_PUSHED_STREAM_LIFETIME,
            stream_hi_water_mark: FIRST_STREAM_ID,
            next_request_id: 1,
            stream_requests: HashMap::new(),
            pending_create_stream_queues: Default::default(),
            posted_stream_requests: 0,
            max_concurrent_streams,
            write_queue: SpdyWriteQueue::new(),
            in_flight_write: None,
            session_send_window_size: 0,
            session_recv_window_size: 0,
            session_unacked_recv_window_bytes: 0,
            stream_initial_send_window_size: SPDY_STREAM_INITIAL_WINDOW_SIZE,
            stream_initial_recv_window_size,
            stream_send_unstall_queue: Default::default(),
            unconsumed_recv_credit: HashMap::new(),
            pings_in_flight: 0,
            next_ping_id: FIRST_PING_ID,
            last_activity_time: now,
            last_ping_sent_time: None,
            check_ping_status_pending: false,
            streams_initiated_count: 0,
            streams_pushed_count: 0,
            streams_pushed_and_claimed_count: 0,
            streams_abandoned_count: 0,
            stalled_streams: 0,
            total_bytes_received: 0,
            frames_received: 0,
            sent_settings: false,
            received_settings: false,
            removal_requested: false,
            tasks: Vec::new(),
            pool_actions: Vec::new(),
            events: VecDeque::new(),
        }
    }

    /// Start the session on `socket`: pick the protocol, send the initial
    /// SETTINGS and window update and post the first read.
    pub fn initialize_with_socket(
        &mut self,
        socket: Box<dyn SpdySocket>,
        is_secure: bool,
        certificate_error: Option<CertError>,
    ) {
        debug_assert!(self.socket.is_none());
        self.protocol = socket
            .negotiated_protocol()
            .filter(NextProto::is_spdy)
            .unwrap_or(self.config.default_protocol);
        self.socket = Some(socket);
        self.is_secure = is_secure;
        self.certificate_error = certificate_error;

        let version = self
            .protocol
            .major_version()
            .unwrap_or(crate::protocol::SpdyMajorVersion::Spdy3);
        self.flow_control_state = self.protocol.flow_control_state();
        if self.flow_control_state == FlowControlState::StreamAndSession {
            self.session_send_window_size = SPDY_SESSION_INITIAL_WINDOW_SIZE;
            self.session_recv_window_size = SPDY_SESSION_INITIAL_WINDOW_SIZE;
        }
        self.framer = SpdyFramer::new(version, self.config.enable_compression);

        tracing::debug!(
            "SpdySession {}: initialized for {} over {}",
            self.id,
            self.spdy_session_key,
            self.protocol
        );

        if self.config.enable_sending_initial_data {
            self.send_initial_data();
        }

        self.post_task(SessionTask::PumpReadLoop);
    }

    // ------------------------------------------------------------------
    // Identity and state
    // ------------------------------------------------------------------

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn spdy_session_key(&self) -> &SpdySessionKey {
        &self.spdy_session_key
    }

    pub fn pooled_aliases(&self) -> &BTreeSet<SpdySessionKey> {
        &self.pooled_aliases
    }

    pub(crate) fn add_pooled_alias(&mut self, alias: SpdySessionKey) {
        self.pooled_aliases.insert(alias);
    }

    pub fn protocol(&self) -> NextProto {
        self.protocol
    }

    pub fn flow_control_state(&self) -> FlowControlState {
        self.flow_control_state
    }

    pub fn availability_state(&self) -> AvailabilityState {
        self.availability_state
    }

    pub fn is_available(&self) -> bool {
        self.availability_state == AvailabilityState::Available
    }

    pub fn is_going_away(&self) -> bool {
        self.availability_state == AvailabilityState::GoingAway
    }

    pub fn is_draining(&self) -> bool {
        self.availability_state == AvailabilityState::Draining
    }

    /// Error the session is draining with. `None` while open or after a clean close.
    pub fn error_on_close(&self) -> Option<Error> {
        self.error_on_close
    }

    pub fn is_secure(&self) -> bool {
        self.is_secure
    }

    pub fn certificate_error(&self) -> Option<CertError> {
        self.certificate_error
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        match &self.socket {
            Some(socket) => socket.peer_addr(),
            None => Err(Error::SocketNotConnected),
        }
    }

    /// Whether the session has read anything from the peer.
    pub fn is_reused(&self) -> bool {
        self.frames_received > 0
    }

    /// Whether any stream is active or created.
    pub fn is_active(&self) -> bool {
        !self.active_streams.is_empty() || !self.created_streams.is_empty()
    }

    pub fn num_active_streams(&self) -> usize {
        self.active_streams.len()
    }

    pub fn num_created_streams(&self) -> usize {
        self.created_streams.len()
    }

    pub fn num_unclaimed_pushed_streams(&self) -> usize {
        self.unclaimed_pushed_streams.len()
    }

    /// Stream requests waiting for capacity.
    pub fn pending_stream_request_count(&self) -> usize {
        self.pending_create_stream_queues
            .iter()
            .map(VecDeque::len)
            .sum()
    }

    /// Queued requests at `priority`, oldest first.
    pub fn pending_stream_requests(&self, priority: RequestPriority) -> Vec<StreamRequestId> {
        self.pending_create_stream_queues[priority.index()]
            .iter()
            .copied()
            .collect()
    }

    pub fn max_concurrent_streams(&self) -> usize {
        self.max_concurrent_streams
    }

    pub fn is_stream_active(&self, stream_id: SpdyStreamId) -> bool {
        self.active_streams.contains_key(&stream_id)
    }

    pub fn has_unclaimed_pushed_stream(&self, url: &Url) -> bool {
        self.unclaimed_pushed_streams.contains_key(url)
    }

    pub fn stream(&self, key: StreamKey) -> Option<&SpdyStream> {
        self.streams.get(&key)
    }

    pub fn stream_by_id(&self, stream_id: SpdyStreamId) -> Option<&SpdyStream> {
        self.active_streams
            .get(&stream_id)
            .and_then(|info| self.streams.get(&info.key))
    }

    /// Ids of the streams stalled at `priority`, in resume order.
    pub fn send_stalled_stream_ids(&self, priority: RequestPriority) -> Vec<SpdyStreamId> {
        self.stream_send_unstall_queue[priority.index()]
            .iter()
            .copied()
            .collect()
    }

    pub fn session_send_window_size(&self) -> i32 {
        self.session_send_window_size
    }

    pub fn session_recv_window_size(&self) -> i32 {
        self.session_recv_window_size
    }

    pub fn session_unacked_recv_window_bytes(&self) -> i32 {
        self.session_unacked_recv_window_bytes
    }

    pub fn stream_initial_send_window_size(&self) -> i32 {
        self.stream_initial_send_window_size
    }

    pub fn stream_initial_recv_window_size(&self) -> i32 {
        self.stream_initial_recv_window_size
    }

    pub fn pings_in_flight(&self) -> i64 {
        self.pings_in_flight
    }

    pub fn next_ping_id(&self) -> SpdyPingId {
        self.next_ping_id
    }

    pub fn last_ping_sent_time(&self) -> Option<Instant> {
        self.last_ping_sent_time
    }

    pub fn check_ping_status_pending(&self) -> bool {
        self.check_ping_status_pending
    }

    pub fn streams_initiated_count(&self) -> u64 {
        self.streams_initiated_count
    }

    pub fn streams_pushed_count(&self) -> u64 {
        self.streams_pushed_count
    }

    pub fn streams_pushed_and_claimed_count(&self) -> u64 {
        self.streams_pushed_and_claimed_count
    }

    pub fn streams_abandoned_count(&self) -> u64 {
        self.streams_abandoned_count
    }

    /// Requests that had to queue because the session was at its stream limit.
    pub fn stalled_streams(&self) -> u64 {
        self.stalled_streams
    }

    pub fn total_bytes_received(&self) -> u64 {
        self.total_bytes_received
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    pub fn sent_settings(&self) -> bool {
        self.sent_settings
    }

    pub fn received_settings(&self) -> bool {
        self.received_settings
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            source_id: self.id,
            host_port_pair: self.spdy_session_key.host_port_pair.to_string(),
            aliases: self
                .pooled_aliases
                .iter()
                .map(|alias| alias.host_port_pair.to_string())
                .collect(),
            proxy: self.spdy_session_key.proxy_server.to_string(),
            active_streams: self.active_streams.len(),
            unclaimed_pushed_streams: self.unclaimed_pushed_streams.len(),
            is_secure: self.is_secure,
            protocol_negotiated: self.protocol,
            error: self.error_on_close,
            max_concurrent_streams: self.max_concurrent_streams,
            streams_initiated_count: self.streams_initiated_count,
            streams_pushed_count: self.streams_pushed_count,
            streams_pushed_and_claimed_count: self.streams_pushed_and_claimed_count,
            streams_abandoned_count: self.streams_abandoned_count,
            frames_received: self.frames_received,
            sent_settings: self.sent_settings,
            received_settings: self.received_settings,
            send_window_size: self.session_send_window_size,
            recv_window_size: self.session_recv_window_size,
            unacked_recv_window_bytes: self.session_unacked_recv_window_bytes,
        }
    }

    pub fn info_as_value(&self) -> serde_json::Value {
        self.info().to_value()
    }

    // ------------------------------------------------------------------
    // Outbox
    // ------------------------------------------------------------------

    pub fn take_tasks(&mut self) -> Vec<PostedTask> {
        std::mem::take(&mut self.tasks)
    }

    pub fn take_pool_actions(&mut self) -> Vec<PoolAction> {
        std::mem::take(&mut self.pool_actions)
    }

    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }

    /// Run a task this session posted earlier.
    pub fn run_task(&mut self, task: SessionTask) {
        match task {
            SessionTask::PumpReadLoop => self.pump_read_loop(),
            SessionTask::PumpWriteLoop => self.pump_write_loop(),
            SessionTask::CompleteStreamRequest(request) => self.complete_stream_request(request),
            SessionTask::CheckPingStatus { last_check_time } => {
                self.check_ping_status(last_check_time)
            }
        }
    }

    fn post_task(&mut self, task: SessionTask) {
        self.tasks.push(PostedTask { delay: None, task });
    }

    fn post_delayed_task(&mut self, delay: Duration, task: SessionTask) {
        self.tasks.push(PostedTask {
            delay: Some(delay),
            task,
        });
    }

    fn emit(&mut self, event: SessionEvent) {
        self.events.push_back(event);
    }

    fn next_stream_key(&mut self) -> StreamKey {
        let key = StreamKey::new(self.next_stream_key);
        self.next_stream_key += 1;
        key
    }

    fn next_request_id(&mut self) -> StreamRequestId {
        let id = StreamRequestId(self.next_request_id);
        self.next_request_id += 1;
        id
    }

    fn status_header(&self) -> &'static str {
        match self.framer.version() {
            crate::protocol::SpdyMajorVersion::Spdy2 => "status",
            _ => ":status",
        }
    }
}


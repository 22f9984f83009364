use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use spdy_session::protocol::SpdyMajorVersion;
use spdy_session::spdy::frame::{GoAwayStatus, RstStreamStatus, SettingsFlagsAndValue, SettingsId, SettingsMap};
use spdy_session::spdy::framer::{FrameEvent, SpdyFramer};
use spdy_session::spdy::{SpdyHeaderBlock, SpdyStreamId};
use spdy_session::{
    CertError, HttpServerProperties, InMemoryServerProperties, NextProto, RequestPriority,
    SendStatus, SessionEvent, SessionId, SpdyRequest, SpdySession, SpdySessionKey,
    SpdySessionPool, SpdySessionPoolConfig, StreamCreation, StreamKey, StreamKind,
};
use url::Url;

use super::mock_socket::{MockSocket, MockSocketHandle};

/// Build a header block from pairs.
#[allow(dead_code)]
pub fn block(pairs: &[(&str, &str)]) -> SpdyHeaderBlock {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

/// The server end of a session: encodes frames for the session to read and
/// decodes what the session wrote.
#[allow(dead_code)]
pub struct PeerFramer {
    version: SpdyMajorVersion,
    encoder: SpdyFramer,
    decoder: SpdyFramer,
    decoded: usize,
}

#[allow(dead_code)]
impl PeerFramer {
    pub fn new(version: SpdyMajorVersion, enable_compression: bool) -> Self {
        Self {
            version,
            encoder: SpdyFramer::new(version, enable_compression),
            decoder: SpdyFramer::new(version, enable_compression).expect_connection_preface(),
            decoded: 0,
        }
    }

    pub fn version(&self) -> SpdyMajorVersion {
        self.version
    }

    /// Decode the bytes of `written` not decoded by an earlier call.
    pub fn decode(&mut self, written: &[u8]) -> Vec<FrameEvent> {
        let mut out = Vec::new();
        while self.decoded < written.len() {
            let n = self.decoder.process_input(&written[self.decoded..], &mut out);
            if n == 0 {
                break;
            }
            self.decoded += n;
        }
        out
    }

    /// Response headers with `status`, named for this dialect.
    pub fn status_headers(&self, status: &str) -> SpdyHeaderBlock {
        match self.version {
            SpdyMajorVersion::Spdy2 => block(&[("status", status), ("version", "HTTP/1.1")]),
            SpdyMajorVersion::Spdy3 => block(&[(":status", status), (":version", "HTTP/1.1")]),
            SpdyMajorVersion::Spdy4 => block(&[(":status", status)]),
        }
    }

    pub fn syn_reply(&mut self, stream_id: SpdyStreamId, fin: bool) -> Bytes {
        let headers = self.status_headers("200");
        self.syn_reply_with(stream_id, fin, &headers)
    }

    pub fn syn_reply_with(
        &mut self,
        stream_id: SpdyStreamId,
        fin: bool,
        headers: &SpdyHeaderBlock,
    ) -> Bytes {
        self.encoder.syn_reply(stream_id, fin, headers).unwrap()
    }

    pub fn headers(&mut self, stream_id: SpdyStreamId, fin: bool, headers: &SpdyHeaderBlock) -> Bytes {
        self.encoder.headers(stream_id, fin, headers).unwrap()
    }

    pub fn data(&self, stream_id: SpdyStreamId, data: &[u8], fin: bool) -> Bytes {
        self.encoder.data(stream_id, data, fin)
    }

    pub fn settings(&self, entries: &[(SettingsId, u8, u32)]) -> Bytes {
        self.settings_clearing(entries, false)
    }

    pub fn settings_clearing(&self, entries: &[(SettingsId, u8, u32)], clear_persisted: bool) -> Bytes {
        let mut settings = SettingsMap::new();
        for (id, flags, value) in entries {
            settings.insert(*id, SettingsFlagsAndValue::new(*flags, *value));
        }
        self.encoder.settings(&settings, clear_persisted)
    }

    pub fn settings_ack(&self) -> Bytes {
        self.encoder.settings_ack()
    }

    pub fn ping(&self, id: u32, is_ack: bool) -> Bytes {
        self.encoder.ping(id, is_ack)
    }

    pub fn go_away(&self, last_accepted_stream_id: SpdyStreamId, status: GoAwayStatus) -> Bytes {
        self.encoder.go_away(last_accepted_stream_id, status)
    }

    pub fn window_update(&self, stream_id: SpdyStreamId, delta: u32) -> Bytes {
        self.encoder.window_update(stream_id, delta)
    }

    pub fn rst_stream(&self, stream_id: SpdyStreamId, status: RstStreamStatus) -> Bytes {
        self.encoder.rst_stream(stream_id, status)
    }

    /// Headers naming the pushed resource, in this dialect.
    pub fn push_request_headers(&self, url: &str) -> SpdyHeaderBlock {
        let url = Url::parse(url).unwrap();
        let host = match url.port() {
            Some(port) => format!("{}:{}", url.host_str().unwrap(), port),
            None => url.host_str().unwrap().to_string(),
        };
        match self.version {
            SpdyMajorVersion::Spdy2 => block(&[("url", url.as_str())]),
            SpdyMajorVersion::Spdy3 => block(&[
                (":scheme", url.scheme()),
                (":host", host.as_str()),
                (":path", url.path()),
            ]),
            SpdyMajorVersion::Spdy4 => block(&[
                (":scheme", url.scheme()),
                (":authority", host.as_str()),
                (":path", url.path()),
            ]),
        }
    }

    /// Push `url` on `stream_id`, associated with `associated_stream_id`. The
    /// response status rides along (SYN_STREAM), or follows in a HEADERS
    /// frame after the PUSH_PROMISE for SPDY/4.
    pub fn push(
        &mut self,
        stream_id: SpdyStreamId,
        associated_stream_id: SpdyStreamId,
        url: &str,
        fin: bool,
    ) -> Bytes {
        let request = self.push_request_headers(url);
        let response = self.status_headers("200");
        if self.version == SpdyMajorVersion::Spdy4 {
            let mut out = BytesMut::new();
            out.extend_from_slice(
                &self
                    .encoder
                    .push_promise(associated_stream_id, stream_id, &request)
                    .unwrap(),
            );
            out.extend_from_slice(&self.encoder.headers(stream_id, fin, &response).unwrap());
            return out.freeze();
        }
        let mut headers = request;
        headers.extend(response);
        self.encoder
            .syn_stream(stream_id, associated_stream_id, 0, fin, &headers)
            .unwrap()
    }

    /// SYN_STREAM with exactly `headers`.
    pub fn syn_stream(
        &mut self,
        stream_id: SpdyStreamId,
        associated_stream_id: SpdyStreamId,
        fin: bool,
        headers: &SpdyHeaderBlock,
    ) -> Bytes {
        self.encoder
            .syn_stream(stream_id, associated_stream_id, 0, fin, headers)
            .unwrap()
    }
}

/// Knobs for [`SessionHarness::start`].
#[allow(dead_code)]
pub struct HarnessOptions {
    pub protocol: NextProto,
    pub config: SpdySessionPoolConfig,
    pub key: SpdySessionKey,
    pub is_secure: bool,
    pub certificate_error: Option<CertError>,
    pub peer_addr: Option<SocketAddr>,
    pub properties: Arc<InMemoryServerProperties>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            protocol: NextProto::Spdy31,
            config: SpdySessionPoolConfig::default(),
            key: SpdySessionKey::direct("www.example.org", 443),
            is_secure: false,
            certificate_error: None,
            peer_addr: None,
            properties: Arc::new(InMemoryServerProperties::new()),
        }
    }
}

/// A pool with one session over a [`MockSocket`], plus the peer's framer.
#[allow(dead_code)]
pub struct SessionHarness {
    pub pool: SpdySessionPool,
    pub id: SessionId,
    pub key: SpdySessionKey,
    pub socket: MockSocketHandle,
    pub peer: PeerFramer,
    pub properties: Arc<InMemoryServerProperties>,
    events: Vec<SessionEvent>,
}

#[allow(dead_code)]
impl SessionHarness {
    pub fn new(protocol: NextProto) -> Self {
        Self::start(HarnessOptions {
            protocol,
            ..Default::default()
        })
    }

    /// Create the session and run its start-up work: initial frames are
    /// written and the first read is pending.
    pub fn start(options: HarnessOptions) -> Self {
        let (socket, handle) = MockSocket::new(Some(options.protocol), options.peer_addr);
        let properties: Arc<dyn HttpServerProperties> = options.properties.clone();
        let mut pool = SpdySessionPool::new(options.config.clone(), properties);
        let id = pool.create_available_session_from_socket(
            options.key.clone(),
            Box::new(socket),
            options.is_secure,
            options.certificate_error,
        );
        let version = options.protocol.major_version().unwrap();
        let mut harness = Self {
            pool,
            id,
            key: options.key,
            socket: handle,
            peer: PeerFramer::new(version, options.config.session.enable_compression),
            properties: options.properties,
            events: Vec::new(),
        };
        harness.run();
        harness
    }

    /// Run posted tasks until none is runnable and collect the events.
    pub fn run(&mut self) {
        self.pool.run_until_idle();
        let id = self.id;
        self.events.extend(
            self.pool
                .take_events()
                .into_iter()
                .filter(|(sid, _)| *sid == id)
                .map(|(_, event)| event),
        );
    }

    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn session(&self) -> &SpdySession {
        self.pool.session(self.id).expect("session is gone")
    }

    pub fn is_alive(&self) -> bool {
        self.pool.session(self.id).is_some()
    }

    /// Call into the session. Posted tasks are not run.
    pub fn with_session<R>(&mut self, f: impl FnOnce(&mut SpdySession) -> R) -> R {
        self.pool.with_session(self.id, f).expect("session is gone")
    }

    /// Hand `data` to the session as the result of its current read, then run.
    pub fn deliver(&mut self, data: Bytes) {
        if self.socket.take_pending_read() {
            self.pool.on_read_complete(self.id, Ok(data));
        } else {
            self.socket.queue_read(Ok(data));
        }
        self.run();
    }

    pub fn deliver_all(&mut self, frames: &[Bytes]) {
        let mut buf = BytesMut::new();
        for frame in frames {
            buf.extend_from_slice(frame);
        }
        self.deliver(buf.freeze());
    }

    /// The peer closes the connection.
    pub fn deliver_eof(&mut self) {
        self.deliver(Bytes::new());
    }

    /// Complete the pending async write, then run.
    pub fn complete_write(&mut self) {
        let n = self
            .socket
            .complete_pending_write()
            .expect("no write pending");
        self.pool.on_write_complete(self.id, Ok(n));
        self.run();
    }

    /// Frames written since the last call.
    pub fn written_frames(&mut self) -> Vec<FrameEvent> {
        let written = self.socket.written();
        self.peer.decode(&written)
    }

    pub fn version(&self) -> SpdyMajorVersion {
        self.peer.version()
    }

    /// Ask for a request/response stream; it must be created right away.
    pub fn create_stream(&mut self, url: &str, priority: RequestPriority) -> StreamKey {
        let url = Url::parse(url).unwrap();
        match self.with_session(|s| s.request_stream(StreamKind::RequestResponse, url, priority)) {
            Ok(StreamCreation::Created(key)) => key,
            other => panic!("stream not created: {:?}", other),
        }
    }

    /// Create a stream and send GET headers for it. Runs the write loop, so
    /// the stream is active afterwards.
    pub fn start_get(&mut self, url: &str, priority: RequestPriority) -> StreamKey {
        let key = self.create_stream(url, priority);
        self.send_headers(key, url, SendStatus::NoMoreDataToSend);
        key
    }

    /// Like `start_get`, but the request body is still to come.
    pub fn start_post(&mut self, url: &str, priority: RequestPriority) -> StreamKey {
        let key = self.create_stream(url, priority);
        self.send_headers(key, url, SendStatus::MoreDataToSend);
        key
    }

    fn send_headers(&mut self, key: StreamKey, url: &str, send_status: SendStatus) {
        let headers = SpdyRequest::get(Url::parse(url).unwrap()).spdy_headers(self.version());
        self.with_session(|s| s.send_request_headers(key, headers, send_status))
            .unwrap();
        self.run();
    }

    pub fn stream_id(&self, key: StreamKey) -> SpdyStreamId {
        self.session().stream(key).expect("stream is gone").stream_id()
    }
}

//! Stream admission, creation, closing and session shutdown.

use bytes::Bytes;
use url::Url;

use super::{
    ActiveStreamInfo, AvailabilityState, PoolAction, SessionEvent, SpdySession, StreamCreation,
    StreamKey, StreamRequest, StreamRequestId,
};
use crate::error::{Error, Result};
use crate::protocol::RequestPriority;
use crate::spdy::frame::{GoAwayStatus, RstStreamStatus, SpdyFrameType};
use crate::spdy::stream::{SendStatus, SpdyStream, StreamKind};
use crate::spdy::write_queue::FrameProducer;
use crate::spdy::{SpdyHeaderBlock, SpdyStreamId, LAST_STREAM_ID};

impl SpdySession {
    // ------------------------------------------------------------------
    // Admission
    // ------------------------------------------------------------------

    /// Ask for a new stream to `url`.
    ///
    /// Fails with `Failed` once the session is going away and with
    /// `ConnectionClosed` once it is draining. When the session is at its
    /// concurrency limit the request is queued and completes later with a
    /// [`SessionEvent::StreamRequestComplete`].
    pub fn request_stream(
        &mut self,
        kind: StreamKind,
        url: Url,
        priority: RequestPriority,
    ) -> Result<StreamCreation> {
        let request = self.next_request_id();
        let info = StreamRequest {
            kind,
            url,
            priority,
        };
        match self.try_create_stream(&info)? {
            Some(key) => Ok(StreamCreation::Created(key)),
            None => {
                self.stalled_streams += 1;
                tracing::debug!(
                    "SpdySession {}: {} queued at {} ({} active, {} created, limit {})",
                    self.id,
                    request,
                    info.priority.as_str(),
                    self.active_streams.len(),
                    self.created_streams.len(),
                    self.max_concurrent_streams
                );
                self.pending_create_stream_queues[info.priority.index()].push_back(request);
                self.stream_requests.insert(request, info);
                Ok(StreamCreation::Pending(request))
            }
        }
    }

    /// Withdraw a queued stream request. Unknown or already-completed requests
    /// are ignored.
    pub fn cancel_stream_request(&mut self, request: StreamRequestId) {
        let Some(info) = self.stream_requests.remove(&request) else {
            return;
        };
        let queue = &mut self.pending_create_stream_queues[info.priority.index()];
        if let Some(pos) = queue.iter().position(|r| *r == request) {
            queue.remove(pos);
        }
        debug_assert!(self
            .pending_create_stream_queues
            .iter()
            .all(|q| !q.contains(&request)));
    }

    /// `Ok(None)` means the session is at its concurrency limit; the caller
    /// queues the request.
    fn try_create_stream(&mut self, info: &StreamRequest) -> Result<Option<StreamKey>> {
        match self.availability_state {
            AvailabilityState::GoingAway => return Err(Error::Failed),
            AvailabilityState::Draining => return Err(Error::ConnectionClosed),
            AvailabilityState::Available => {}
        }

        self.try_access_stream(&info.url)?;

        // Slots handed to posted completions are taken.
        let in_use = self.active_streams.len()
            + self.created_streams.len()
            + self.posted_stream_requests;
        if self.max_concurrent_streams == 0 || in_use < self.max_concurrent_streams {
            return self.create_stream(info).map(Some);
        }
        Ok(None)
    }

    /// Secure content must not travel over a session whose certificate had an
    /// error. Asking for it poisons the whole session.
    fn try_access_stream(&mut self, url: &Url) -> Result<()> {
        if self.is_secure && matches!(url.scheme(), "https" | "wss") {
            if let Some(cert_error) = self.certificate_error {
                self.do_drain_session(
                    Some(Error::Certificate(cert_error)),
                    "Tried to get SPDY stream for secure content over an unauthenticated session.",
                );
                return Err(Error::Protocol);
            }
        }
        Ok(())
    }

    fn create_stream(&mut self, request: &StreamRequest) -> Result<StreamKey> {
        if !self.socket.as_ref().is_some_and(|s| s.is_connected()) {
            self.do_drain_session(
                Some(Error::ConnectionClosed),
                "Tried to create SPDY stream for a closed socket connection.",
            );
            return Err(Error::ConnectionClosed);
        }

        let key = self.next_stream_key();
        let stream = SpdyStream::new(
            key,
            request.kind,
            request.url.clone(),
            request.priority,
            self.stream_initial_send_window_size,
            self.stream_initial_recv_window_size,
        );
        self.streams.insert(key, stream);
        self.created_streams.insert(key);
        Ok(key)
    }

    /// Hand out freed capacity to queued requests, highest priority first.
    /// Completion is posted, never run inline.
    pub(super) fn process_pending_stream_requests(&mut self) {
        let in_use = self.active_streams.len()
            + self.created_streams.len()
            + self.posted_stream_requests;
        let mut capacity = if self.max_concurrent_streams == 0 {
            usize::MAX
        } else {
            self.max_concurrent_streams.saturating_sub(in_use)
        };
        while capacity > 0 {
            let Some(request) = self.next_pending_request() else {
                break;
            };
            self.post_task(crate::scheduler::SessionTask::CompleteStreamRequest(request));
            self.posted_stream_requests += 1;
            capacity -= 1;
        }
    }

    pub(super) fn complete_stream_request(&mut self, request: StreamRequestId) {
        self.posted_stream_requests = self.posted_stream_requests.saturating_sub(1);
        // Cancelled while the completion was posted.
        let Some(info) = self.stream_requests.remove(&request) else {
            if self.availability_state == AvailabilityState::Available {
                self.process_pending_stream_requests();
            }
            return;
        };
        match self.try_create_stream(&info) {
            Ok(Some(key)) => self.emit(SessionEvent::StreamRequestComplete {
                request,
                result: Ok(key),
            }),
            // The limit dropped meanwhile. Back to the head of its queue.
            Ok(None) => {
                self.pending_create_stream_queues[info.priority.index()].push_front(request);
                self.stream_requests.insert(request, info);
            }
            Err(err) => self.emit(SessionEvent::StreamRequestComplete {
                request,
                result: Err(err),
            }),
        }
    }

    fn next_pending_request(&mut self) -> Option<StreamRequestId> {
        RequestPriority::HIGHEST_FIRST
            .iter()
            .find_map(|p| self.pending_create_stream_queues[p.index()].pop_front())
    }

    fn fail_stream_request(&mut self, request: StreamRequestId, err: Error) {
        if self.stream_requests.remove(&request).is_some() {
            self.emit(SessionEvent::StreamRequestComplete {
                request,
                result: Err(err),
            });
        }
    }

    // ------------------------------------------------------------------
    // Stream operations
    // ------------------------------------------------------------------

    /// Queue the request headers. The SYN_STREAM is built when it reaches the
    /// front of the write queue, which is also when the stream gets its id.
    pub fn send_request_headers(
        &mut self,
        key: StreamKey,
        headers: SpdyHeaderBlock,
        send_status: SendStatus,
    ) -> Result<()> {
        let stream = self
            .streams
            .get_mut(&key)
            .ok_or(Error::InvalidSpdyStream)?;
        stream.set_request_headers(headers, send_status)?;
        let priority = stream.priority();
        self.enqueue_stream_write(
            key,
            priority,
            SpdyFrameType::SynStream,
            FrameProducer::SynStream,
            0,
        );
        Ok(())
    }

    /// Send request body bytes. They go out as DATA frames one at a time, as
    /// flow control allows; `DataSent` follows the last one.
    pub fn send_data(&mut self, key: StreamKey, data: Bytes, send_status: SendStatus) -> Result<()> {
        let stream = self
            .streams
            .get_mut(&key)
            .ok_or(Error::InvalidSpdyStream)?;
        stream.start_send(data, send_status)?;
        let stream_id = stream.stream_id();
        self.queue_next_data_frame(stream_id);
        Ok(())
    }

    /// Abort a stream: RST_STREAM(CANCEL) once it is on the wire, otherwise
    /// just forget it.
    pub fn cancel_stream(&mut self, key: StreamKey) {
        let Some(stream) = self.streams.get(&key) else {
            return;
        };
        if stream.is_closed() {
            return;
        }
        let stream_id = stream.stream_id();
        if stream_id != 0 && self.active_streams.contains_key(&stream_id) {
            self.reset_stream(stream_id, RstStreamStatus::Cancel, "");
        } else {
            self.close_created_stream(key, Err(Error::Aborted));
        }
    }

    /// Close a stream without telling the peer.
    pub fn close_stream(&mut self, key: StreamKey) {
        let Some(stream) = self.streams.get(&key) else {
            return;
        };
        let stream_id = stream.stream_id();
        if stream_id != 0 && self.active_streams.contains_key(&stream_id) {
            self.close_active_stream(stream_id, Ok(()));
        } else {
            self.close_created_stream(key, Ok(()));
        }
    }

    /// Claim the pushed stream for `url`, if the server pushed one.
    ///
    /// Whatever the stream buffered while unclaimed is replayed as events.
    pub fn get_push_stream(&mut self, url: &Url) -> Result<Option<StreamKey>> {
        assert!(!self.in_io_loop);

        if self.is_draining() {
            return Err(Error::ConnectionClosed);
        }
        self.try_access_stream(url)?;

        let Some(pushed) = self.unclaimed_pushed_streams.remove(url) else {
            return Ok(None);
        };
        let Some(key) = self
            .active_streams
            .get(&pushed.stream_id)
            .map(|info| info.key)
        else {
            return Ok(None);
        };

        tracing::debug!(
            "SpdySession {}: adopted pushed stream {} for {}",
            self.id,
            pushed.stream_id,
            url
        );
        self.streams_pushed_and_claimed_count += 1;
        self.replay_pushed_stream(pushed.stream_id, key);
        Ok(Some(key))
    }

    fn replay_pushed_stream(&mut self, stream_id: SpdyStreamId, key: StreamKey) {
        let status_header = self.status_header();
        let Some(stream) = self.streams.get_mut(&key) else {
            return;
        };
        let replay = stream.claim();
        let headers = stream.response_headers().clone();
        let complete = headers.contains_key(status_header);

        if !headers.is_empty() {
            self.emit(SessionEvent::ResponseHeaders {
                stream: key,
                headers,
            });
        }
        if !complete {
            // Incomplete headers are fine only if nothing else arrived yet.
            if !replay.is_empty() {
                tracing::debug!(
                    "SpdySession {}: pushed stream {} has data but incomplete headers",
                    self.id,
                    stream_id
                );
                self.close_active_stream(stream_id, Err(Error::Protocol));
            }
            return;
        }
        if let Some(stream) = self.streams.get_mut(&key) {
            stream.set_response_headers_complete();
        }

        for data in replay {
            match data {
                Some(data) => {
                    // Session credit only; buffered push data never counted
                    // against the stream window.
                    self.record_delivered(key, data.len(), 0);
                    self.emit(SessionEvent::Data {
                        stream: key,
                        data: Some(data),
                    });
                }
                None => {
                    self.emit(SessionEvent::Data {
                        stream: key,
                        data: None,
                    });
                    self.close_active_stream(stream_id, Ok(()));
                    break;
                }
            }
        }
    }

    /// Move a created stream into the active set under the next client id.
    pub(super) fn activate_created_stream(&mut self, key: StreamKey) -> Option<SpdyStreamId> {
        if !self.created_streams.remove(&key) {
            return None;
        }
        let stream_id = self.stream_hi_water_mark;
        self.stream_hi_water_mark += 2;

        let stream = self.streams.get_mut(&key)?;
        stream.set_stream_id(stream_id);
        let waiting_for_syn_reply = stream.kind() != StreamKind::Push;
        self.active_streams.insert(
            stream_id,
            ActiveStreamInfo {
                key,
                waiting_for_syn_reply,
            },
        );
        Some(stream_id)
    }

    // ------------------------------------------------------------------
    // Closing
    // ------------------------------------------------------------------

    pub(super) fn close_active_stream(&mut self, stream_id: SpdyStreamId, status: Result<()>) {
        let Some(info) = self.active_streams.remove(&stream_id) else {
            return;
        };
        let key = info.key;

        if let Some(stream) = self.streams.get(&key) {
            if stream.kind() == StreamKind::Push {
                let url = stream.url().clone();
                if self
                    .unclaimed_pushed_streams
                    .get(&url)
                    .is_some_and(|pushed| pushed.stream_id == stream_id)
                {
                    self.unclaimed_pushed_streams.remove(&url);
                }
            }
        }

        self.delete_stream(key, status);
        self.maybe_finish_going_away();

        // Free the connection for the transport pool if nothing uses it.
        if self.active_streams.is_empty()
            && self.socket.as_ref().is_some_and(|s| s.is_pool_stalled())
        {
            self.do_drain_session(Some(Error::ConnectionClosed), "Closing idle connection.");
        }
    }

    pub(super) fn close_created_stream(&mut self, key: StreamKey, status: Result<()>) {
        if self.created_streams.remove(&key) {
            self.delete_stream(key, status);
        }
    }

    fn delete_stream(&mut self, key: StreamKey, status: Result<()>) {
        let Some(mut stream) = self.streams.remove(&key) else {
            return;
        };

        if let Some(in_flight) = self.in_flight_write.as_mut() {
            if in_flight.stream == Some(key) {
                in_flight.stream = None;
            }
        }

        let refund: usize = self
            .write_queue
            .remove_pending_writes_for_stream(key)
            .iter()
            .map(|w| w.session_credit)
            .sum();
        let buffered = stream.buffered_recv_bytes();
        stream.set_closed();

        // Credit already delivered to the owner stays claimable for the session
        // window; the stream's own window is gone.
        if let Some(credit) = self.unconsumed_recv_credit.get_mut(&key) {
            credit.stream = 0;
            if credit.session == 0 {
                self.unconsumed_recv_credit.remove(&key);
            }
        }

        if self.flow_control_state == crate::protocol::FlowControlState::StreamAndSession {
            if refund > 0 {
                self.increase_send_window_size(refund as i32);
            }
            if buffered > 0 {
                self.increase_recv_window_size(buffered as i32);
            }
        }

        tracing::trace!(
            "SpdySession {}: {} (id {}) closed: {:?}",
            self.id,
            key,
            stream.stream_id(),
            status
        );
        // An unclaimed push has nobody to tell.
        if stream.has_delegate() {
            self.emit(SessionEvent::StreamClosed {
                stream: key,
                status,
            });
        }

        if self.availability_state == AvailabilityState::Available {
            self.process_pending_stream_requests();
        }
    }

    /// Send RST_STREAM for an active stream and close it.
    pub(super) fn reset_stream(
        &mut self,
        stream_id: SpdyStreamId,
        status: RstStreamStatus,
        description: &str,
    ) {
        let Some(priority) = self.stream_by_id(stream_id).map(SpdyStream::priority) else {
            return;
        };
        self.enqueue_reset_stream_frame(stream_id, priority, status, description);
        let err = if status == RstStreamStatus::Cancel {
            Error::Aborted
        } else {
            Error::Protocol
        };
        self.close_active_stream(stream_id, Err(err));
    }

    pub(super) fn enqueue_reset_stream_frame(
        &mut self,
        stream_id: SpdyStreamId,
        priority: RequestPriority,
        status: RstStreamStatus,
        description: &str,
    ) {
        tracing::debug!(
            "SpdySession {}: sending RST_STREAM {} for stream {}: {}",
            self.id,
            status.as_str(),
            stream_id,
            description
        );
        let frame = self.framer.rst_stream(stream_id, status);
        self.enqueue_session_write(priority, SpdyFrameType::RstStream, frame);
    }

    // ------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------

    /// Close the session because of `err`. A no-op once draining.
    pub fn close_session_on_error(&mut self, err: Error, description: &str) {
        self.do_drain_session(Some(err), description);
    }

    /// Stop taking new streams but let the active ones finish. Queued requests
    /// and unsent streams fail.
    pub fn go_away(&mut self, err: Error) {
        assert!(!self.in_io_loop);
        if self.is_draining() {
            return;
        }
        tracing::debug!("SpdySession {}: going away: {}", self.id, err);
        self.make_unavailable();
        self.start_going_away(LAST_STREAM_ID, err);
        self.maybe_finish_going_away();
    }

    /// Drain the session if it has nothing active. Always returns false: the
    /// socket is not closed synchronously.
    pub fn close_one_idle_connection(&mut self) -> bool {
        assert!(!self.in_io_loop);
        if self.active_streams.is_empty() {
            self.do_drain_session(Some(Error::ConnectionClosed), "Closing idle connection.");
        }
        false
    }

    /// Whether this session may also serve `domain`.
    pub fn verify_domain_authentication(&self, domain: &str) -> bool {
        if !self.config.verify_domain_authentication {
            return true;
        }
        if self.is_draining() {
            return false;
        }
        if !self.is_secure {
            return true;
        }
        // Pooling of secure sessions across domains is disabled.
        tracing::trace!(
            "SpdySession {}: refusing to pool secure session for {}",
            self.id,
            domain
        );
        false
    }

    pub(super) fn make_unavailable(&mut self) {
        if self.availability_state == AvailabilityState::Available {
            self.availability_state = AvailabilityState::GoingAway;
            self.pool_actions.push(PoolAction::MakeUnavailable);
        }
    }

    /// Abort everything above `last_good_stream_id`, every pending request and
    /// every stream that has not been written yet.
    pub(super) fn start_going_away(&mut self, last_good_stream_id: SpdyStreamId, status: Error) {
        assert!(self.availability_state >= AvailabilityState::GoingAway);

        loop {
            let old_size = self.pending_stream_request_count();
            let Some(request) = self.next_pending_request() else {
                break;
            };
            assert!(self.pending_stream_request_count() < old_size);
            self.fail_stream_request(request, Error::Aborted);
        }
        // Requests whose completion is already posted.
        let posted: Vec<StreamRequestId> = self.stream_requests.keys().copied().collect();
        for request in posted {
            self.fail_stream_request(request, Error::Aborted);
        }

        loop {
            let old_size = self.active_streams.len();
            let Some(stream_id) = self
                .active_streams
                .range(last_good_stream_id + 1..)
                .next()
                .map(|(id, _)| *id)
            else {
                break;
            };
            self.streams_abandoned_count += 1;
            tracing::debug!(
                "SpdySession {}: abandoning stream {}: {}",
                self.id,
                stream_id,
                status
            );
            self.close_active_stream(stream_id, Err(status));
            assert!(self.active_streams.len() < old_size);
        }

        while let Some(key) = self.created_streams.iter().next().copied() {
            let old_size = self.created_streams.len();
            self.close_created_stream(key, Err(status));
            assert!(self.created_streams.len() < old_size);
        }

        let live: std::collections::HashSet<StreamKey> =
            self.active_streams.values().map(|info| info.key).collect();
        let refund: usize = self
            .write_queue
            .remove_pending_writes_for_streams(|key| !live.contains(&key))
            .iter()
            .map(|w| w.session_credit)
            .sum();
        if refund > 0
            && self.flow_control_state == crate::protocol::FlowControlState::StreamAndSession
        {
            self.increase_send_window_size(refund as i32);
        }
    }

    pub(super) fn maybe_finish_going_away(&mut self) {
        if self.active_streams.is_empty()
            && self.availability_state == AvailabilityState::GoingAway
        {
            self.do_drain_session(None, "Finished going away");
        }
    }

    /// Enter DRAINING. `None` is a clean close; a real error also tells the
    /// peer with a GOAWAY and aborts every stream.
    pub(super) fn do_drain_session(&mut self, err: Option<Error>, description: &str) {
        if self.availability_state == AvailabilityState::Draining {
            return;
        }
        self.make_unavailable();

        if let Some(e) = err {
            if !e.is_quiet_close() {
                let frame = self.framer.go_away(0, GoAwayStatus::from_net_error(err));
                self.enqueue_session_write(RequestPriority::Highest, SpdyFrameType::GoAway, frame);
            }
        }

        self.availability_state = AvailabilityState::Draining;
        self.error_on_close = err;

        match err {
            Some(e) => {
                tracing::debug!("SpdySession {}: closing: {} ({})", self.id, description, e);
                self.start_going_away(0, e);
            }
            None => {
                tracing::debug!("SpdySession {}: closing: {}", self.id, description);
            }
        }

        self.maybe_post_write_loop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::SpdySessionConfig;
    use crate::pool::{SessionId, SpdySessionKey};
    use crate::properties::InMemoryServerProperties;

    fn session() -> SpdySession {
        SpdySession::new(
            SessionId::new(1),
            SpdySessionKey::direct("www.example.org", 443),
            Arc::new(InMemoryServerProperties::new()),
            SpdySessionConfig::default(),
        )
    }

    fn url() -> Url {
        Url::parse("https://www.example.org/").unwrap()
    }

    #[test]
    fn test_stream_creation_needs_a_connected_socket() {
        let mut session = session();
        let err = session
            .request_stream(StreamKind::RequestResponse, url(), RequestPriority::Medium)
            .unwrap_err();
        assert_eq!(err, Error::ConnectionClosed);
        assert!(session.is_draining());
        assert_eq!(session.error_on_close(), Some(Error::ConnectionClosed));
        assert_eq!(session.take_pool_actions(), vec![PoolAction::MakeUnavailable]);
    }

    #[test]
    fn test_drain_twice_has_no_effect() {
        let mut session = session();
        session.close_session_on_error(Error::Protocol, "first");
        let queued = session.write_queue.len();
        assert_eq!(queued, 1);

        session.close_session_on_error(Error::FlowControl, "second");
        assert_eq!(session.write_queue.len(), queued);
        assert_eq!(session.error_on_close(), Some(Error::Protocol));
        assert_eq!(session.take_pool_actions().len(), 1);
    }

    #[test]
    fn test_quiet_close_sends_no_goaway() {
        let mut session = session();
        session.close_session_on_error(Error::NetworkChanged, "network changed");
        assert!(session.write_queue.is_empty());
        assert!(session.is_draining());
    }

    #[test]
    fn test_cancel_unknown_request_is_noop() {
        let mut session = session();
        session.cancel_stream_request(StreamRequestId(42));
        assert_eq!(session.pending_stream_request_count(), 0);
    }

    #[test]
    fn test_domain_authentication() {
        let mut session = session();
        assert!(session.verify_domain_authentication("mail.example.org"));
        session.is_secure = true;
        assert!(!session.verify_domain_authentication("mail.example.org"));

        session.config.verify_domain_authentication = false;
        assert!(session.verify_domain_authentication("mail.example.org"));
    }
}

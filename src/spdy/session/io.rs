//! Read and write loops.
//!
//! Both loops run until the socket would block or the session starts
//! draining. A socket operation that returns `Poll::Pending` parks its loop
//! until the owner reports the completion through `on_read_complete` or
//! `on_write_complete`.

use std::task::Poll;

use bytes::Bytes;

use super::{InFlightWrite, PoolAction, ReadState, SessionEvent, SpdySession, StreamKey, WriteState};
use crate::error::{Error, Result};
use crate::protocol::{convert_request_priority_to_spdy_priority, RequestPriority};
use crate::scheduler::SessionTask;
use crate::spdy::buffer::SpdyBuffer;
use crate::spdy::frame::SpdyFrameType;
use crate::spdy::write_queue::{FrameProducer, PendingWrite};
use crate::spdy::{SpdyStreamId, LAST_STREAM_ID, MAX_READ_BYTES_WITHOUT_YIELDING, READ_BUFFER_SIZE};

enum WriteStep {
    /// Nothing to write.
    Idle,
    /// The socket will report completion later.
    Pending,
    Done(Result<usize>),
}

impl SpdySession {
    // ------------------------------------------------------------------
    // Read loop
    // ------------------------------------------------------------------

    pub(super) fn pump_read_loop(&mut self) {
        if self.is_draining() {
            return;
        }
        debug_assert_eq!(self.read_state, ReadState::DoRead);
        self.do_read_loop(None);
    }

    /// Completion of a read that returned `Poll::Pending`.
    pub fn on_read_complete(&mut self, result: Result<Bytes>) {
        if self.is_draining() {
            return;
        }
        debug_assert_eq!(self.read_state, ReadState::DoReadComplete);
        self.do_read_loop(Some(result));
    }

    fn do_read_loop(&mut self, mut completed: Option<Result<Bytes>>) {
        assert!(!self.in_io_loop);
        self.in_io_loop = true;

        let mut bytes_read_without_yielding = 0;
        loop {
            match self.read_state {
                ReadState::DoRead => {
                    self.read_state = ReadState::DoReadComplete;
                    match self.socket.as_mut().map(|s| s.read(READ_BUFFER_SIZE)) {
                        Some(Poll::Ready(result)) => completed = Some(result),
                        Some(Poll::Pending) => break,
                        None => completed = Some(Err(Error::SocketNotConnected)),
                    }
                }
                ReadState::DoReadComplete => {
                    let result = completed
                        .take()
                        .unwrap_or(Err(Error::unexpected("read completed without a result")));
                    if let Ok(data) = &result {
                        bytes_read_without_yielding += data.len();
                    }
                    self.do_read_complete(result);
                }
            }

            if self.is_draining() {
                break;
            }
            if bytes_read_without_yielding > MAX_READ_BYTES_WITHOUT_YIELDING {
                self.read_state = ReadState::DoRead;
                self.post_task(SessionTask::PumpReadLoop);
                break;
            }
        }

        assert!(self.in_io_loop);
        self.in_io_loop = false;
    }

    fn do_read_complete(&mut self, result: Result<Bytes>) {
        let data = match result {
            Ok(data) if data.is_empty() => {
                self.do_drain_session(Some(Error::ConnectionClosed), "Connection closed");
                return;
            }
            Ok(data) => data,
            Err(err) => {
                self.do_drain_session(Some(err), "Read error");
                return;
            }
        };

        self.total_bytes_received += data.len() as u64;
        self.last_activity_time = tokio::time::Instant::now();

        let mut offset = 0;
        let mut events = Vec::new();
        while offset < data.len() {
            let consumed = self.framer.process_input(&data[offset..], &mut events);
            offset += consumed;
            for event in events.drain(..) {
                self.handle_frame_event(event);
                if self.is_draining() {
                    return;
                }
            }
            if consumed == 0 {
                break;
            }
        }

        self.read_state = ReadState::DoRead;
    }

    // ------------------------------------------------------------------
    // Write loop
    // ------------------------------------------------------------------

    pub(super) fn pump_write_loop(&mut self) {
        if self.write_state != WriteState::DoWrite {
            return;
        }
        self.do_write_loop(None);
        self.maybe_finish_draining();
    }

    /// Completion of a write that returned `Poll::Pending`.
    pub fn on_write_complete(&mut self, result: Result<usize>) {
        debug_assert_eq!(self.write_state, WriteState::DoWriteComplete);
        self.do_write_loop(Some(result));
        self.maybe_finish_draining();
    }

    fn do_write_loop(&mut self, mut completed: Option<Result<usize>>) {
        assert!(!self.in_io_loop);
        self.in_io_loop = true;

        loop {
            match self.write_state {
                WriteState::Idle => break,
                WriteState::DoWrite => match self.do_write() {
                    WriteStep::Idle | WriteStep::Pending => break,
                    WriteStep::Done(result) => completed = Some(result),
                },
                WriteState::DoWriteComplete => {
                    let result = completed
                        .take()
                        .unwrap_or(Err(Error::unexpected("write completed without a result")));
                    self.do_write_complete(result);
                }
            }
        }

        assert!(self.in_io_loop);
        self.in_io_loop = false;
    }

    fn do_write(&mut self) -> WriteStep {
        if self.in_flight_write.is_none() {
            let Some(write) = self.write_queue.dequeue() else {
                self.write_state = WriteState::Idle;
                return WriteStep::Idle;
            };

            let frame = match self.produce_frame(&write) {
                Ok(frame) => frame,
                Err(err) => {
                    // The loop stays in DoWrite and moves on to the next frame.
                    self.do_drain_session(Some(err), "Failed to build frame");
                    return WriteStep::Done(Ok(0));
                }
            };
            self.in_flight_write = Some(InFlightWrite {
                frame_size: frame.len(),
                buffer: SpdyBuffer::new(frame),
                frame_type: write.frame_type,
                stream: write.stream,
            });
        }

        self.write_state = WriteState::DoWriteComplete;
        let Some(in_flight) = self.in_flight_write.as_ref() else {
            return WriteStep::Done(Ok(0));
        };
        match self.socket.as_mut().map(|s| s.write(in_flight.buffer.remaining())) {
            Some(Poll::Ready(result)) => WriteStep::Done(result),
            Some(Poll::Pending) => WriteStep::Pending,
            None => WriteStep::Done(Err(Error::SocketNotConnected)),
        }
    }

    /// Turn a dequeued write into bytes. A SYN_STREAM activates its stream
    /// here, so stream ids are assigned in write order.
    fn produce_frame(&mut self, write: &PendingWrite) -> Result<Bytes> {
        match &write.producer {
            FrameProducer::Frame(frame) => Ok(frame.clone()),
            FrameProducer::SynStream => {
                let key = write
                    .stream
                    .ok_or(Error::unexpected("SYN_STREAM without a stream"))?;
                let stream_id = self
                    .activate_created_stream(key)
                    .ok_or(Error::unexpected("SYN_STREAM for a stream that is not created"))?;

                // Ran out of stream ids: finish what is in flight, start no more.
                if self.stream_hi_water_mark > LAST_STREAM_ID {
                    self.make_unavailable();
                    self.start_going_away(LAST_STREAM_ID, Error::Aborted);
                }
                self.produce_syn_stream(key, stream_id)
            }
        }
    }

    fn produce_syn_stream(&mut self, key: StreamKey, stream_id: SpdyStreamId) -> Result<Bytes> {
        self.streams_initiated_count += 1;
        self.send_preface_ping_if_none_in_flight();

        let stream = self.streams.get(&key).ok_or(Error::InvalidSpdyStream)?;
        let priority =
            convert_request_priority_to_spdy_priority(stream.priority(), self.framer.version());
        let fin = stream.pending_send_status() == crate::spdy::SendStatus::NoMoreDataToSend;
        let headers = stream.request_headers().cloned().unwrap_or_default();

        tracing::trace!(
            "SpdySession {}: SYN_STREAM stream {} priority {} fin {}",
            self.id,
            stream_id,
            priority,
            fin
        );
        Ok(self.framer.syn_stream(stream_id, 0, priority, fin, &headers)?)
    }

    fn do_write_complete(&mut self, result: Result<usize>) {
        self.last_activity_time = tokio::time::Instant::now();

        let written = match result {
            Ok(0) if self.in_flight_write.as_ref().is_some_and(|w| !w.buffer.is_fully_consumed()) => {
                Err(Error::ConnectionClosed)
            }
            other => other,
        };

        match written {
            Err(err) => {
                self.in_flight_write = None;
                self.write_state = WriteState::DoWrite;
                self.do_drain_session(Some(err), "Write error");
            }
            Ok(n) => {
                if let Some(in_flight) = self.in_flight_write.as_mut() {
                    in_flight.buffer.consume(n);
                    if in_flight.buffer.is_fully_consumed() {
                        if let Some(done) = self.in_flight_write.take() {
                            if let Some(key) = done.stream {
                                self.on_stream_frame_write_complete(
                                    key,
                                    done.frame_type,
                                    done.frame_size,
                                );
                            }
                        }
                    }
                }
                self.write_state = WriteState::DoWrite;
            }
        }
    }

    /// A stream's frame has been fully written.
    fn on_stream_frame_write_complete(
        &mut self,
        key: StreamKey,
        frame_type: SpdyFrameType,
        frame_size: usize,
    ) {
        let data_header_size = self.framer.data_frame_header_size();
        let Some(stream) = self.streams.get_mut(&key) else {
            return;
        };
        let stream_id = stream.stream_id();

        match frame_type {
            SpdyFrameType::SynStream => stream.on_request_headers_sent(),
            SpdyFrameType::Data => {
                let payload = frame_size.saturating_sub(data_header_size);
                if !stream.consume_pending_send_data(payload) {
                    self.queue_next_data_frame(stream_id);
                    return;
                }
            }
            _ => return,
        }

        stream.on_last_frame_sent();
        let closed = stream.is_closed();
        self.emit(if frame_type == SpdyFrameType::SynStream {
            SessionEvent::RequestHeadersSent { stream: key }
        } else {
            SessionEvent::DataSent { stream: key }
        });

        if closed {
            self.close_active_stream(stream_id, Ok(()));
        }
    }

    /// Schedule the write loop if it is idle.
    pub(super) fn maybe_post_write_loop(&mut self) {
        if self.write_state == WriteState::Idle {
            debug_assert!(self.in_flight_write.is_none());
            self.write_state = WriteState::DoWrite;
            self.post_task(SessionTask::PumpWriteLoop);
        }
    }

    /// A draining session with nothing left to write asks to be removed.
    fn maybe_finish_draining(&mut self) {
        if self.is_draining()
            && self.in_flight_write.is_none()
            && self.write_queue.is_empty()
            && !self.removal_requested
        {
            self.removal_requested = true;
            if let Some(socket) = self.socket.as_mut() {
                socket.disconnect();
            }
            self.pool_actions.push(PoolAction::RemoveUnavailable);
        }
    }

    // ------------------------------------------------------------------
    // Write queue
    // ------------------------------------------------------------------

    pub(super) fn enqueue_session_write(
        &mut self,
        priority: RequestPriority,
        frame_type: SpdyFrameType,
        frame: Bytes,
    ) {
        self.enqueue_write(
            priority,
            PendingWrite {
                frame_type,
                producer: FrameProducer::Frame(frame),
                stream: None,
                session_credit: 0,
            },
        );
    }

    pub(super) fn enqueue_stream_write(
        &mut self,
        key: StreamKey,
        priority: RequestPriority,
        frame_type: SpdyFrameType,
        producer: FrameProducer,
        session_credit: usize,
    ) {
        self.enqueue_write(
            priority,
            PendingWrite {
                frame_type,
                producer,
                stream: Some(key),
                session_credit,
            },
        );
    }

    fn enqueue_write(&mut self, priority: RequestPriority, write: PendingWrite) {
        if self.is_draining() {
            return;
        }
        self.write_queue.enqueue(priority, write);
        self.maybe_post_write_loop();
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use url::Url;

    use super::*;
    use crate::config::SpdySessionConfig;
    use crate::pool::{SessionId, SpdySessionKey};
    use crate::properties::InMemoryServerProperties;
    use crate::protocol::NextProto;
    use crate::socket::SpdySocket;
    use crate::spdy::{SendStatus, SpdyHeaderBlock, StreamCreation, StreamKind};

    /// Accepts every write at once and never has anything to read.
    struct SinkSocket {
        connected: bool,
    }

    impl SpdySocket for SinkSocket {
        fn read(&mut self, _max_len: usize) -> Poll<Result<Bytes>> {
            Poll::Pending
        }

        fn write(&mut self, buf: &[u8]) -> Poll<Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn negotiated_protocol(&self) -> Option<NextProto> {
            Some(NextProto::Spdy31)
        }

        fn peer_addr(&self) -> Result<SocketAddr> {
            Err(Error::SocketNotConnected)
        }

        fn disconnect(&mut self) {
            self.connected = false;
        }
    }

    fn connected_session() -> SpdySession {
        let mut session = SpdySession::new(
            SessionId::new(1),
            SpdySessionKey::direct("www.example.org", 80),
            Arc::new(InMemoryServerProperties::new()),
            SpdySessionConfig::default(),
        );
        session.initialize_with_socket(Box::new(SinkSocket { connected: true }), false, None);
        run_ready_tasks(&mut session);
        session
    }

    fn run_ready_tasks(session: &mut SpdySession) {
        loop {
            let tasks = session.take_tasks();
            if tasks.is_empty() {
                break;
            }
            for posted in tasks.into_iter().filter(|posted| posted.delay.is_none()) {
                session.run_task(posted.task);
            }
        }
    }

    fn new_stream(session: &mut SpdySession) -> Result<StreamCreation> {
        let url = Url::parse("http://www.example.org/").map_err(Error::from)?;
        session.request_stream(StreamKind::RequestResponse, url, RequestPriority::Medium)
    }

    #[test]
    fn test_last_stream_id_starts_going_away() {
        let mut session = connected_session();
        assert_eq!(session.take_pool_actions(), vec![]);
        session.stream_hi_water_mark = LAST_STREAM_ID;
        session.max_concurrent_streams = 2;

        let last = match new_stream(&mut session) {
            Ok(StreamCreation::Created(key)) => key,
            other => panic!("expected a stream, got {:?}", other),
        };
        let unsent = match new_stream(&mut session) {
            Ok(StreamCreation::Created(key)) => key,
            other => panic!("expected a stream, got {:?}", other),
        };
        let queued = match new_stream(&mut session) {
            Ok(StreamCreation::Pending(request)) => request,
            other => panic!("expected a queued request, got {:?}", other),
        };

        session
            .send_request_headers(last, SpdyHeaderBlock::new(), SendStatus::NoMoreDataToSend)
            .unwrap();
        run_ready_tasks(&mut session);

        assert_eq!(session.stream(last).unwrap().stream_id(), LAST_STREAM_ID);
        assert_eq!(LAST_STREAM_ID, 0x7fff_ffff);
        assert!(session.is_going_away());
        assert!(!session.is_draining());
        assert!(!session.is_available());
        assert_eq!(session.take_pool_actions(), vec![PoolAction::MakeUnavailable]);

        let events = session.take_events();
        assert!(events.contains(&SessionEvent::StreamRequestComplete {
            request: queued,
            result: Err(Error::Aborted),
        }));
        assert!(events.contains(&SessionEvent::StreamClosed {
            stream: unsent,
            status: Err(Error::Aborted),
        }));
        assert!(events.contains(&SessionEvent::RequestHeadersSent { stream: last }));
        assert_eq!(session.num_created_streams(), 0);
        assert_eq!(session.pending_stream_request_count(), 0);
        assert!(session.is_stream_active(LAST_STREAM_ID));

        // No more streams on this session.
        assert_eq!(new_stream(&mut session).unwrap_err(), Error::Failed);

        session.close_stream(last);
        run_ready_tasks(&mut session);

        assert!(session.is_draining());
        assert_eq!(session.take_pool_actions(), vec![PoolAction::RemoveUnavailable]);
    }
}

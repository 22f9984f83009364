//! Flow control, DATA frame construction, SETTINGS and pings.

use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use super::{SpdySession, StreamKey};
use crate::error::Error;
use crate::protocol::{FlowControlState, RequestPriority, SpdyMajorVersion};
use crate::scheduler::SessionTask;
use crate::spdy::frame::{
    SettingsFlagsAndValue, SettingsId, SettingsMap, SpdyFrameType, CONNECTION_PREFACE,
};
use crate::spdy::stream::SendStatus;
use crate::spdy::write_queue::FrameProducer;
use crate::spdy::{
    SpdyPingId, SpdyStreamId, DEFAULT_INITIAL_RECV_WINDOW_SIZE, MAX_CONCURRENT_PUSHED_STREAMS,
    MAX_SPDY_FRAME_CHUNK_SIZE, SESSION_FLOW_CONTROL_STREAM_ID, SPDY_SESSION_INITIAL_WINDOW_SIZE,
    SPDY_STREAM_INITIAL_WINDOW_SIZE,
};

impl SpdySession {
    // ------------------------------------------------------------------
    // Initial data and SETTINGS
    // ------------------------------------------------------------------

    pub(super) fn send_initial_data(&mut self) {
        if self.framer.version() == SpdyMajorVersion::Spdy4 {
            self.enqueue_session_write(
                RequestPriority::Highest,
                SpdyFrameType::Settings,
                Bytes::from_static(CONNECTION_PREFACE),
            );
        }

        let mut settings = SettingsMap::new();
        settings.insert(
            SettingsId::MaxConcurrentStreams,
            SettingsFlagsAndValue::new(0, MAX_CONCURRENT_PUSHED_STREAMS),
        );
        if self.flow_control_state >= FlowControlState::Stream
            && self.stream_initial_recv_window_size != SPDY_STREAM_INITIAL_WINDOW_SIZE
        {
            settings.insert(
                SettingsId::InitialWindowSize,
                SettingsFlagsAndValue::new(0, self.stream_initial_recv_window_size as u32),
            );
        }
        self.send_settings(&settings);

        if self.flow_control_state == FlowControlState::StreamAndSession {
            let delta = DEFAULT_INITIAL_RECV_WINDOW_SIZE - self.session_recv_window_size;
            if delta > 0 {
                self.increase_recv_window_size(delta);
            }
        }

        // Replay what the server asked us to remember last time.
        let persisted = self
            .http_server_properties
            .get_spdy_settings(&self.spdy_session_key.host_port_pair);
        if persisted.is_empty() {
            return;
        }
        for (id, entry) in &persisted {
            self.handle_setting(*id, entry.value);
        }
        self.send_settings(&persisted);
    }

    fn send_settings(&mut self, settings: &SettingsMap) {
        tracing::debug!(
            "SpdySession {}: sending SETTINGS {:?}",
            self.id,
            settings
                .iter()
                .map(|(id, entry)| (id.as_str(), entry.value))
                .collect::<Vec<_>>()
        );
        let frame = self.framer.settings(settings, false);
        self.sent_settings = true;
        self.enqueue_session_write(RequestPriority::Highest, SpdyFrameType::Settings, frame);
    }

    /// Apply one setting from the server (or from persisted settings).
    pub(super) fn handle_setting(&mut self, id: SettingsId, value: u32) {
        match id {
            SettingsId::MaxConcurrentStreams => {
                self.max_concurrent_streams =
                    (value as usize).min(self.config.max_concurrent_streams_limit);
                self.process_pending_stream_requests();
            }
            SettingsId::InitialWindowSize => {
                if self.flow_control_state < FlowControlState::Stream {
                    tracing::warn!(
                        "SpdySession {}: INITIAL_WINDOW_SIZE with flow control off",
                        self.id
                    );
                    return;
                }
                if value > i32::MAX as u32 {
                    tracing::warn!(
                        "SpdySession {}: INITIAL_WINDOW_SIZE {} out of range",
                        self.id,
                        value
                    );
                    return;
                }
                let delta = value as i32 - self.stream_initial_send_window_size;
                self.stream_initial_send_window_size = value as i32;
                self.update_streams_send_window_size(delta);
            }
            _ => {}
        }
    }

    fn update_streams_send_window_size(&mut self, delta: i32) {
        let active: Vec<(SpdyStreamId, StreamKey)> = self
            .active_streams
            .iter()
            .map(|(id, info)| (*id, info.key))
            .collect();
        for (stream_id, key) in active {
            if let Some(stream) = self.streams.get_mut(&key) {
                stream.adjust_send_window_size(delta);
            }
            self.possibly_resume_if_send_stalled(stream_id);
        }
        let created: Vec<StreamKey> = self.created_streams.iter().copied().collect();
        for key in created {
            if let Some(stream) = self.streams.get_mut(&key) {
                stream.adjust_send_window_size(delta);
            }
        }
    }

    // ------------------------------------------------------------------
    // Session windows
    // ------------------------------------------------------------------

    pub fn is_send_stalled(&self) -> bool {
        self.flow_control_state == FlowControlState::StreamAndSession
            && self.session_send_window_size <= 0
    }

    /// Apply a session WINDOW_UPDATE (or returned credit) and resume stalled streams.
    pub(super) fn increase_send_window_size(&mut self, delta: i32) {
        debug_assert_eq!(self.flow_control_state, FlowControlState::StreamAndSession);
        debug_assert!(delta >= 1);

        let max_delta = i32::MAX - self.session_send_window_size;
        if delta > max_delta {
            let description = format!(
                "Received WINDOW_UPDATE [delta: {}] for session overflows session_send_window_size_ [current: {}]",
                delta, self.session_send_window_size
            );
            self.do_drain_session(Some(Error::Protocol), &description);
            return;
        }

        self.session_send_window_size += delta;
        tracing::trace!(
            "SpdySession {}: session send window {} (+{})",
            self.id,
            self.session_send_window_size,
            delta
        );
        self.resume_send_stalled_streams();
    }

    fn decrease_send_window_size(&mut self, delta: i32) {
        // Only called right after a DATA frame was sized against the window.
        debug_assert!(delta >= 1);
        debug_assert!(delta <= self.session_send_window_size);
        self.session_send_window_size -= delta;
    }

    /// Credit consumed bytes back to the session receive window. The
    /// WINDOW_UPDATE goes out once more than half the initial window is unacked.
    pub(super) fn increase_recv_window_size(&mut self, delta: i32) {
        debug_assert_eq!(self.flow_control_state, FlowControlState::StreamAndSession);
        debug_assert!(delta >= 1);
        self.session_recv_window_size += delta;
        self.session_unacked_recv_window_bytes += delta;
        if self.session_unacked_recv_window_bytes > SPDY_SESSION_INITIAL_WINDOW_SIZE / 2 {
            let update = self.session_unacked_recv_window_bytes as u32;
            self.send_window_update_frame(
                SESSION_FLOW_CONTROL_STREAM_ID,
                update,
                RequestPriority::Highest,
            );
            self.session_unacked_recv_window_bytes = 0;
        }
    }

    pub(super) fn decrease_recv_window_size(&mut self, delta: i32) {
        debug_assert_eq!(self.flow_control_state, FlowControlState::StreamAndSession);
        if delta > self.session_recv_window_size {
            let description = format!(
                "delta_window_size is {} in DecreaseRecvWindowSize, which is larger than the receive window size of {}",
                delta, self.session_recv_window_size
            );
            self.do_drain_session(Some(Error::FlowControl), &description);
            return;
        }
        self.session_recv_window_size -= delta;
    }

    fn send_window_update_frame(
        &mut self,
        stream_id: SpdyStreamId,
        delta: u32,
        priority: RequestPriority,
    ) {
        tracing::debug!(
            "SpdySession {}: sending WINDOW_UPDATE stream {} delta {}",
            self.id,
            stream_id,
            delta
        );
        let frame = self.framer.window_update(stream_id, delta);
        self.enqueue_session_write(priority, SpdyFrameType::WindowUpdate, frame);
    }

    // ------------------------------------------------------------------
    // Receive credit
    // ------------------------------------------------------------------

    pub(super) fn record_delivered(&mut self, key: StreamKey, session: usize, stream: usize) {
        let credit = self.unconsumed_recv_credit.entry(key).or_default();
        credit.session += session;
        credit.stream += stream;
    }

    /// The owner of `key` is done with `len` delivered bytes; return their
    /// credit to the peer.
    pub fn consume_received_data(&mut self, key: StreamKey, len: usize) {
        let Some(credit) = self.unconsumed_recv_credit.get_mut(&key) else {
            return;
        };
        let session = len.min(credit.session);
        let stream = len.min(credit.stream);
        credit.session -= session;
        credit.stream -= stream;
        if credit.session == 0 && credit.stream == 0 {
            self.unconsumed_recv_credit.remove(&key);
        }

        if session > 0 && self.flow_control_state == FlowControlState::StreamAndSession {
            self.increase_recv_window_size(session as i32);
        }
        if stream > 0 && self.flow_control_state >= FlowControlState::Stream {
            self.increase_stream_recv_window_size(key, stream as i32);
        }
    }

    fn increase_stream_recv_window_size(&mut self, key: StreamKey, delta: i32) {
        let Some(stream) = self.streams.get_mut(&key) else {
            return;
        };
        let stream_id = stream.stream_id();
        if !self.active_streams.contains_key(&stream_id) {
            return;
        }
        let priority = stream.priority();
        if let Some(update) = stream.increase_recv_window_size(delta) {
            self.send_window_update_frame(stream_id, update, priority);
        }
    }

    // ------------------------------------------------------------------
    // Send stalls
    // ------------------------------------------------------------------

    /// Remember a stalled stream so that a session window increase resumes it.
    /// Each stream sits in the queue at most once.
    fn queue_send_stalled_stream(&mut self, stream_id: SpdyStreamId) {
        if self.flow_control_state != FlowControlState::StreamAndSession {
            return;
        }
        let Some(info) = self.active_streams.get(&stream_id) else {
            return;
        };
        let Some(stream) = self.streams.get_mut(&info.key) else {
            return;
        };
        debug_assert!(stream.send_stalled_by_flow_control());
        if stream.mark_queued_for_unstall() {
            let priority = stream.priority();
            self.stream_send_unstall_queue[priority.index()].push_back(stream_id);
        }
    }

    fn pop_stream_to_possibly_resume(&mut self) -> Option<SpdyStreamId> {
        RequestPriority::HIGHEST_FIRST
            .iter()
            .find_map(|p| self.stream_send_unstall_queue[p.index()].pop_front())
    }

    fn resume_send_stalled_streams(&mut self) {
        // Resuming a stream may stall the session again.
        while !self.is_send_stalled() {
            let Some(stream_id) = self.pop_stream_to_possibly_resume() else {
                break;
            };
            let Some(key) = self.active_streams.get(&stream_id).map(|info| info.key) else {
                continue;
            };
            if let Some(stream) = self.streams.get_mut(&key) {
                stream.clear_queued_for_unstall();
            }
            self.possibly_resume_if_send_stalled(stream_id);
        }
    }

    pub(super) fn possibly_resume_if_send_stalled(&mut self, stream_id: SpdyStreamId) {
        let session_stalled = self.is_send_stalled();
        let Some(key) = self.active_streams.get(&stream_id).map(|info| info.key) else {
            return;
        };
        let Some(stream) = self.streams.get_mut(&key) else {
            return;
        };
        if stream.is_locally_closed() || !stream.send_stalled_by_flow_control() {
            return;
        }
        if session_stalled {
            // Picked up again by the next session WINDOW_UPDATE.
            self.queue_send_stalled_stream(stream_id);
            return;
        }
        if stream.send_window_size() <= 0 {
            return;
        }
        tracing::trace!("SpdySession {}: resuming stream {}", self.id, stream_id);
        stream.set_send_stalled_by_flow_control(false);
        self.queue_next_data_frame(stream_id);
    }

    // ------------------------------------------------------------------
    // DATA frames
    // ------------------------------------------------------------------

    /// Queue the next DATA frame of the stream's pending send, if the windows
    /// allow. A stalled stream is picked up again when a window grows.
    pub(super) fn queue_next_data_frame(&mut self, stream_id: SpdyStreamId) {
        let Some(key) = self.active_streams.get(&stream_id).map(|info| info.key) else {
            return;
        };
        match self.streams.get(&key) {
            Some(stream) if !stream.is_closed() && stream.has_pending_send_data() => {}
            _ => return,
        }

        let Some((frame, payload_size)) = self.create_data_frame(stream_id, key) else {
            return;
        };

        if self.flow_control_state >= FlowControlState::Stream && payload_size > 0 {
            if let Some(stream) = self.streams.get_mut(&key) {
                stream.decrease_send_window_size(payload_size as i32);
            }
        }

        let session_credit = if self.flow_control_state == FlowControlState::StreamAndSession {
            payload_size
        } else {
            0
        };
        let priority = self
            .streams
            .get(&key)
            .map(|s| s.priority())
            .unwrap_or_default();
        self.enqueue_stream_write(
            key,
            priority,
            SpdyFrameType::Data,
            FrameProducer::Frame(frame),
            session_credit,
        );
    }

    /// Build the next DATA frame for a stream: as much of the pending data as
    /// the chunk size and both windows allow. Returns `None` when stalled.
    fn create_data_frame(&mut self, stream_id: SpdyStreamId, key: StreamKey) -> Option<(Bytes, usize)> {
        if self.is_draining() {
            return None;
        }

        let session_stalled = self.is_send_stalled();
        let flow_control_state = self.flow_control_state;
        let session_send_window_size = self.session_send_window_size;

        let stream = self.streams.get_mut(&key)?;
        let data = stream.pending_send_data()?.clone();
        let len = data.len();
        let mut fin = stream.pending_send_status() == SendStatus::NoMoreDataToSend;
        let mut effective = len.min(MAX_SPDY_FRAME_CHUNK_SIZE);

        if flow_control_state >= FlowControlState::Stream {
            if stream.send_window_size() <= 0 {
                stream.set_send_stalled_by_flow_control(true);
                tracing::debug!(
                    "SpdySession {}: stream {} stalled by stream send window",
                    self.id,
                    stream_id
                );
                self.queue_send_stalled_stream(stream_id);
                return None;
            }
            effective = effective.min(stream.send_window_size() as usize);
        }

        if flow_control_state == FlowControlState::StreamAndSession {
            if session_stalled {
                stream.set_send_stalled_by_flow_control(true);
                tracing::debug!(
                    "SpdySession {}: stream {} stalled by session send window",
                    self.id,
                    stream_id
                );
                self.queue_send_stalled_stream(stream_id);
                return None;
            }
            effective = effective.min(session_send_window_size as usize);
        }

        // A frame can only end the stream if it carries everything left.
        if effective < len {
            fin = false;
        }

        if effective > 0 {
            self.send_preface_ping_if_none_in_flight();
        }

        let frame = self.framer.data(stream_id, &data[..effective], fin);

        if flow_control_state == FlowControlState::StreamAndSession && effective > 0 {
            self.decrease_send_window_size(effective as i32);
        }
        Some((frame, effective))
    }

    // ------------------------------------------------------------------
    // Pings
    // ------------------------------------------------------------------

    /// Before new work goes out on a connection that has been quiet for a
    /// while, check that it is still alive.
    pub(super) fn send_preface_ping_if_none_in_flight(&mut self) {
        if self.pings_in_flight > 0 || !self.config.enable_ping_based_connection_checking {
            return;
        }
        let idle = Instant::now().saturating_duration_since(self.last_activity_time);
        if idle > self.config.connection_at_risk_of_loss_time {
            let id = self.next_ping_id;
            self.write_ping_frame(id, false);
        }
    }

    pub(super) fn write_ping_frame(&mut self, id: SpdyPingId, is_ack: bool) {
        let frame = self.framer.ping(id, is_ack);
        self.enqueue_session_write(RequestPriority::Highest, SpdyFrameType::Ping, frame);

        if !is_ack {
            tracing::debug!("SpdySession {}: sending PING {}", self.id, id);
            self.next_ping_id += 2;
            self.pings_in_flight += 1;
            self.plan_to_check_ping_status();
            self.last_ping_sent_time = Some(Instant::now());
        }
    }

    fn plan_to_check_ping_status(&mut self) {
        if self.check_ping_status_pending {
            return;
        }
        self.check_ping_status_pending = true;
        let hung_interval = self.config.hung_interval;
        self.post_delayed_task(
            hung_interval,
            SessionTask::CheckPingStatus {
                last_check_time: Instant::now(),
            },
        );
    }

    pub(super) fn check_ping_status(&mut self, last_check_time: Instant) {
        assert!(!self.in_io_loop);

        // Every ping was answered.
        if self.pings_in_flight == 0 {
            self.check_ping_status_pending = false;
            return;
        }

        let now = Instant::now();
        let idle = now.saturating_duration_since(self.last_activity_time);
        let hung_interval = self.config.hung_interval;
        if idle > hung_interval || self.last_activity_time < last_check_time {
            self.do_drain_session(Some(Error::PingFailed), "Failed ping.");
            return;
        }

        let delay = hung_interval.checked_sub(idle).unwrap_or(Duration::ZERO);
        self.post_delayed_task(
            delay,
            SessionTask::CheckPingStatus {
                last_check_time: now,
            },
        );
    }
}

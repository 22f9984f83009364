//! Handling of decoded frames.

use bytes::Bytes;
use tokio::time::Instant;
use url::Url;

use super::{ActiveStreamInfo, PushedStreamInfo, SessionEvent, SpdySession, StreamKey};
use crate::error::Error;
use crate::protocol::{
    convert_spdy_priority_to_request_priority, FlowControlState, RequestPriority,
    SpdyMajorVersion,
};
use crate::spdy::frame::{RstStreamStatus, SpdyFrameType};
use crate::spdy::framer::FrameEvent;
use crate::spdy::stream::{SpdyStream, StreamKind, StreamState};
use crate::spdy::{SpdyHeaderBlock, SpdyStreamId, MIN_PUSHED_STREAM_LIFETIME, SESSION_FLOW_CONTROL_STREAM_ID};

impl SpdySession {
    pub(super) fn handle_frame_event(&mut self, event: FrameEvent) {
        match &event {
            FrameEvent::Error(_)
            | FrameEvent::StreamError { .. }
            | FrameEvent::StreamFrameData { .. }
            | FrameEvent::Setting { .. } => {}
            _ => self.frames_received += 1,
        }

        match event {
            FrameEvent::Error(err) => {
                let description = format!("Framer error: {}", err);
                self.do_drain_session(Some(Error::from(err)), &description);
            }
            FrameEvent::StreamError {
                stream_id,
                description,
            } => self.on_stream_error(stream_id, &description),
            FrameEvent::DataFrameHeader {
                stream_id, length, ..
            } => {
                if let Some(stream) = self.active_stream_mut(stream_id) {
                    stream.increment_raw_received_bytes(length);
                }
            }
            FrameEvent::StreamFrameData { stream_id, data } => {
                self.on_stream_frame_data(stream_id, data)
            }
            FrameEvent::Settings { clear_persisted } => self.on_settings(clear_persisted),
            FrameEvent::Setting { id, flags, value } => {
                tracing::debug!(
                    "SpdySession {}: received SETTING {} = {} (flags {:#x})",
                    self.id,
                    id.as_str(),
                    value,
                    flags
                );
                self.handle_setting(id, value);
                self.http_server_properties.set_spdy_setting(
                    &self.spdy_session_key.host_port_pair,
                    id,
                    flags,
                    value,
                );
                self.received_settings = true;
            }
            FrameEvent::SettingsAck => {}
            FrameEvent::SynStream {
                stream_id,
                associated_stream_id,
                priority,
                headers,
                ..
            } => self.on_syn_stream(stream_id, associated_stream_id, priority, headers),
            FrameEvent::PushPromise {
                stream_id,
                promised_stream_id,
                headers,
            } => {
                self.try_create_push_stream(promised_stream_id, stream_id, 0, headers);
            }
            FrameEvent::SynReply {
                stream_id, headers, ..
            } => self.on_syn_reply(stream_id, headers),
            FrameEvent::Headers {
                stream_id, headers, ..
            } => self.on_headers(stream_id, headers),
            FrameEvent::RstStream { stream_id, status } => self.on_rst_stream(stream_id, status),
            FrameEvent::GoAway {
                last_accepted_stream_id,
                status,
            } => {
                tracing::debug!(
                    "SpdySession {}: received GOAWAY last stream {} status {}",
                    self.id,
                    last_accepted_stream_id,
                    status.as_str()
                );
                self.make_unavailable();
                self.start_going_away(last_accepted_stream_id, Error::Aborted);
                // With no active streams nothing else would finish going away.
                self.maybe_finish_going_away();
            }
            FrameEvent::Ping { id, is_ack } => self.on_ping(id, is_ack),
            FrameEvent::WindowUpdate { stream_id, delta } => {
                self.on_window_update(stream_id, delta)
            }
        }
    }

    fn active_key(&self, stream_id: SpdyStreamId) -> Option<StreamKey> {
        self.active_streams.get(&stream_id).map(|info| info.key)
    }

    fn active_stream_mut(&mut self, stream_id: SpdyStreamId) -> Option<&mut SpdyStream> {
        let key = self.active_key(stream_id)?;
        self.streams.get_mut(&key)
    }

    fn on_stream_error(&mut self, stream_id: SpdyStreamId, description: &str) {
        if self.is_stream_active(stream_id) {
            self.reset_stream(stream_id, RstStreamStatus::ProtocolError, description);
        } else {
            // Reset it anyway so the peer stops sending.
            self.enqueue_reset_stream_frame(
                stream_id,
                RequestPriority::Idle,
                RstStreamStatus::ProtocolError,
                description,
            );
        }
    }

    // ------------------------------------------------------------------
    // DATA
    // ------------------------------------------------------------------

    fn on_stream_frame_data(&mut self, stream_id: SpdyStreamId, data: Option<Bytes>) {
        let len = data.as_ref().map_or(0, Bytes::len);
        if self.flow_control_state == FlowControlState::StreamAndSession && len > 0 {
            self.decrease_recv_window_size(len as i32);
            if self.is_draining() {
                return;
            }
        }

        let Some(waiting_for_syn_reply) = self
            .active_streams
            .get(&stream_id)
            .map(|info| info.waiting_for_syn_reply)
        else {
            // The stream may have been cancelled already.
            self.return_session_recv_credit(len);
            return;
        };

        if waiting_for_syn_reply {
            self.reset_stream(
                stream_id,
                RstStreamStatus::ProtocolError,
                "Data received before SYN_REPLY.",
            );
            self.return_session_recv_credit(len);
            return;
        }

        self.on_stream_data_received(stream_id, data);
    }

    /// Deliver payload (or the end of it, for `None`) to an active stream.
    fn on_stream_data_received(&mut self, stream_id: SpdyStreamId, data: Option<Bytes>) {
        let flow_control_state = self.flow_control_state;
        let Some(key) = self.active_key(stream_id) else {
            return;
        };
        let Some(stream) = self.streams.get_mut(&key) else {
            return;
        };
        let len = data.as_ref().map_or(0, Bytes::len);

        // Unclaimed push: hold everything until someone claims it.
        if !stream.has_delegate() {
            stream.buffer_recv_data(data);
            return;
        }

        if !stream.response_headers_complete() {
            self.reset_stream(
                stream_id,
                RstStreamStatus::ProtocolError,
                "Data received with incomplete headers.",
            );
            self.return_session_recv_credit(len);
            return;
        }

        let Some(data) = data else {
            let state = stream.on_remote_fin();
            self.emit(SessionEvent::Data {
                stream: key,
                data: None,
            });
            if state == StreamState::Closed {
                self.close_active_stream(stream_id, Ok(()));
            }
            return;
        };

        if flow_control_state >= FlowControlState::Stream && len > 0 {
            let recv_window_size = stream.recv_window_size();
            if stream.decrease_recv_window_size(len as i32).is_err() {
                let description = format!(
                    "delta_window_size is {} in DecreaseRecvWindowSize, which is larger than the receive window size of {}",
                    len, recv_window_size
                );
                self.reset_stream(stream_id, RstStreamStatus::FlowControlError, &description);
                self.return_session_recv_credit(len);
                return;
            }
        }
        stream.record_received(len);

        let session_bytes = if flow_control_state == FlowControlState::StreamAndSession {
            len
        } else {
            0
        };
        let stream_bytes = if flow_control_state >= FlowControlState::Stream {
            len
        } else {
            0
        };
        self.record_delivered(key, session_bytes, stream_bytes);
        self.emit(SessionEvent::Data {
            stream: key,
            data: Some(data),
        });
    }

    /// Give back session window for received bytes nobody will consume.
    fn return_session_recv_credit(&mut self, len: usize) {
        if self.flow_control_state == FlowControlState::StreamAndSession && len > 0 {
            self.increase_recv_window_size(len as i32);
        }
    }

    // ------------------------------------------------------------------
    // SETTINGS, PING, WINDOW_UPDATE, RST_STREAM
    // ------------------------------------------------------------------

    fn on_settings(&mut self, clear_persisted: bool) {
        if clear_persisted {
            self.http_server_properties
                .clear_spdy_settings(&self.spdy_session_key.host_port_pair);
        }
        if self.framer.version() == SpdyMajorVersion::Spdy4 {
            let frame = self.framer.settings_ack();
            self.enqueue_session_write(RequestPriority::Highest, SpdyFrameType::Settings, frame);
        }
    }

    fn on_ping(&mut self, id: u32, is_ack: bool) {
        let version = self.framer.version();
        let from_peer = if version == SpdyMajorVersion::Spdy4 {
            !is_ack
        } else {
            id % 2 == 0
        };
        if from_peer {
            self.write_ping_frame(id, true);
            return;
        }

        self.pings_in_flight -= 1;
        if self.pings_in_flight < 0 {
            self.do_drain_session(Some(Error::Protocol), "pings_in_flight_ is < 0.");
            self.pings_in_flight = 0;
            return;
        }
        tracing::trace!(
            "SpdySession {}: PING {} answered, {} in flight",
            self.id,
            id,
            self.pings_in_flight
        );
    }

    fn on_window_update(&mut self, stream_id: SpdyStreamId, delta: u32) {
        if stream_id == SESSION_FLOW_CONTROL_STREAM_ID {
            if self.flow_control_state < FlowControlState::StreamAndSession {
                tracing::warn!(
                    "SpdySession {}: session WINDOW_UPDATE without session flow control",
                    self.id
                );
                return;
            }
            if delta < 1 {
                let description = format!(
                    "Received WINDOW_UPDATE with an invalid delta_window_size {}",
                    delta
                );
                self.do_drain_session(Some(Error::Protocol), &description);
                return;
            }
            match i32::try_from(delta) {
                Ok(delta) => self.increase_send_window_size(delta),
                Err(_) => {
                    let description = format!(
                        "Received WINDOW_UPDATE [delta: {}] for session overflows session_send_window_size_ [current: {}]",
                        delta, self.session_send_window_size
                    );
                    self.do_drain_session(Some(Error::Protocol), &description);
                }
            }
            return;
        }

        if self.flow_control_state < FlowControlState::Stream {
            tracing::warn!(
                "SpdySession {}: WINDOW_UPDATE for stream {} without flow control",
                self.id,
                stream_id
            );
            return;
        }
        let Some(stream) = self.active_stream_mut(stream_id) else {
            tracing::warn!(
                "SpdySession {}: WINDOW_UPDATE for invalid stream {}",
                self.id,
                stream_id
            );
            return;
        };
        if delta < 1 {
            let description = format!(
                "Received WINDOW_UPDATE with an invalid delta_window_size {}",
                delta
            );
            self.reset_stream(stream_id, RstStreamStatus::FlowControlError, &description);
            return;
        }

        let current = stream.send_window_size();
        let increased = i32::try_from(delta)
            .map_err(|_| Error::FlowControl)
            .and_then(|delta| stream.increase_send_window_size(delta));
        if increased.is_err() {
            let description = format!(
                "Received WINDOW_UPDATE [delta: {}] for stream {} overflows send_window_size_ [current: {}]",
                delta, stream_id, current
            );
            self.reset_stream(stream_id, RstStreamStatus::FlowControlError, &description);
            return;
        }
        self.possibly_resume_if_send_stalled(stream_id);
    }

    fn on_rst_stream(&mut self, stream_id: SpdyStreamId, status: RstStreamStatus) {
        if !self.is_stream_active(stream_id) {
            tracing::warn!(
                "SpdySession {}: RST_STREAM for invalid stream {}",
                self.id,
                stream_id
            );
            return;
        }
        tracing::debug!(
            "SpdySession {}: stream {} reset by peer: {}",
            self.id,
            stream_id,
            status.as_str()
        );
        match status {
            RstStreamStatus::NoError => self.on_stream_data_received(stream_id, None),
            RstStreamStatus::RefusedStream => {
                self.close_active_stream(stream_id, Err(Error::ServerRefusedStream))
            }
            _ => self.close_active_stream(stream_id, Err(Error::Protocol)),
        }
    }

    // ------------------------------------------------------------------
    // Header frames
    // ------------------------------------------------------------------

    fn on_syn_stream(
        &mut self,
        stream_id: SpdyStreamId,
        associated_stream_id: SpdyStreamId,
        priority: u8,
        headers: SpdyHeaderBlock,
    ) {
        let (request_headers, response_headers) =
            split_pushed_headers(headers, self.framer.version());
        if !self.try_create_push_stream(stream_id, associated_stream_id, priority, request_headers)
        {
            return;
        }
        self.on_initial_response_headers_received(stream_id, &response_headers);
    }

    fn on_syn_reply(&mut self, stream_id: SpdyStreamId, headers: SpdyHeaderBlock) {
        let Some(waiting_for_syn_reply) = self
            .active_streams
            .get(&stream_id)
            .map(|info| info.waiting_for_syn_reply)
        else {
            // The stream may have been cancelled already.
            return;
        };

        if self.framer.version() == SpdyMajorVersion::Spdy4 {
            self.reset_stream(
                stream_id,
                RstStreamStatus::ProtocolError,
                "SPDY4 wasn't expecting SYN_REPLY.",
            );
            return;
        }
        if !waiting_for_syn_reply {
            self.reset_stream(
                stream_id,
                RstStreamStatus::ProtocolError,
                "Received duplicate SYN_REPLY for stream.",
            );
            return;
        }

        self.set_waiting_for_syn_reply(stream_id, false);
        self.on_initial_response_headers_received(stream_id, &headers);
    }

    fn on_headers(&mut self, stream_id: SpdyStreamId, headers: SpdyHeaderBlock) {
        let Some(waiting_for_syn_reply) = self
            .active_streams
            .get(&stream_id)
            .map(|info| info.waiting_for_syn_reply)
        else {
            tracing::warn!(
                "SpdySession {}: HEADERS for invalid stream {}",
                self.id,
                stream_id
            );
            return;
        };

        if waiting_for_syn_reply {
            if self.framer.version() < SpdyMajorVersion::Spdy4 {
                self.reset_stream(
                    stream_id,
                    RstStreamStatus::ProtocolError,
                    "Was expecting SYN_REPLY, not HEADERS.",
                );
                return;
            }
            self.set_waiting_for_syn_reply(stream_id, false);
            self.on_initial_response_headers_received(stream_id, &headers);
        } else if self
            .stream_by_id(stream_id)
            .is_some_and(SpdyStream::is_reserved_remote)
        {
            self.on_initial_response_headers_received(stream_id, &headers);
        } else {
            self.on_additional_response_headers_received(stream_id, &headers);
        }
    }

    fn set_waiting_for_syn_reply(&mut self, stream_id: SpdyStreamId, waiting: bool) {
        if let Some(info) = self.active_streams.get_mut(&stream_id) {
            info.waiting_for_syn_reply = waiting;
        }
    }

    fn on_initial_response_headers_received(
        &mut self,
        stream_id: SpdyStreamId,
        headers: &SpdyHeaderBlock,
    ) {
        let Some(stream) = self.active_stream_mut(stream_id) else {
            return;
        };
        match stream.kind() {
            StreamKind::Push => stream.on_push_response_started(),
            _ if stream.is_idle() => {
                self.reset_stream(
                    stream_id,
                    RstStreamStatus::ProtocolError,
                    "Response received before request sent",
                );
                return;
            }
            _ => {}
        }
        self.merge_with_response_headers(stream_id, headers);
    }

    fn on_additional_response_headers_received(
        &mut self,
        stream_id: SpdyStreamId,
        headers: &SpdyHeaderBlock,
    ) {
        let Some(stream) = self.stream_by_id(stream_id) else {
            return;
        };
        if stream.response_headers_complete() {
            match stream.kind() {
                StreamKind::RequestResponse => {
                    self.reset_stream(
                        stream_id,
                        RstStreamStatus::ProtocolError,
                        "Additional headers received for request/response stream",
                    );
                    return;
                }
                StreamKind::Push => {
                    self.reset_stream(
                        stream_id,
                        RstStreamStatus::ProtocolError,
                        "Additional headers received for push stream",
                    );
                    return;
                }
                StreamKind::Bidirectional => {}
            }
        }
        self.merge_with_response_headers(stream_id, headers);
    }

    fn merge_with_response_headers(&mut self, stream_id: SpdyStreamId, headers: &SpdyHeaderBlock) {
        let status_header = self.status_header();
        let Some(key) = self.active_key(stream_id) else {
            return;
        };
        let Some(stream) = self.streams.get_mut(&key) else {
            return;
        };

        if let Err(description) = stream.merge_response_headers(headers) {
            self.reset_stream(stream_id, RstStreamStatus::ProtocolError, &description);
            return;
        }

        // An unclaimed push reports its headers when claimed.
        if !stream.has_delegate() {
            return;
        }

        let complete = stream.response_headers().contains_key(status_header);
        if complete {
            stream.set_response_headers_complete();
        }
        let incomplete_with_data = !complete && stream.has_pending_recv_data();
        let headers = stream.response_headers().clone();
        self.emit(SessionEvent::ResponseHeaders {
            stream: key,
            headers,
        });

        if incomplete_with_data {
            self.reset_stream(
                stream_id,
                RstStreamStatus::ProtocolError,
                "Data received with incomplete headers.",
            );
        }
    }

    // ------------------------------------------------------------------
    // Server push
    // ------------------------------------------------------------------

    /// Admit a pushed stream. Returns false, after resetting the stream when
    /// appropriate, if the push is refused.
    fn try_create_push_stream(
        &mut self,
        stream_id: SpdyStreamId,
        associated_stream_id: SpdyStreamId,
        priority: u8,
        headers: SpdyHeaderBlock,
    ) -> bool {
        // Server-initiated streams have even ids.
        if stream_id & 0x1 != 0 {
            tracing::warn!(
                "SpdySession {}: received invalid push stream id {}",
                self.id,
                stream_id
            );
            return false;
        }
        if self.is_stream_active(stream_id) {
            tracing::warn!(
                "SpdySession {}: received push for active stream {}",
                self.id,
                stream_id
            );
            return false;
        }

        let version = self.framer.version();
        let request_priority = convert_spdy_priority_to_request_priority(priority, version);

        if !self.is_available() {
            self.enqueue_reset_stream_frame(
                stream_id,
                request_priority,
                RstStreamStatus::RefusedStream,
                "push stream request received when going away",
            );
            return false;
        }

        if associated_stream_id == 0 {
            let description = format!(
                "Received invalid associated stream id {} for pushed stream {}",
                associated_stream_id, stream_id
            );
            self.enqueue_reset_stream_frame(
                stream_id,
                request_priority,
                RstStreamStatus::RefusedStream,
                &description,
            );
            return false;
        }

        self.streams_pushed_count += 1;

        let Some(url) = push_url_from_headers(&headers, version) else {
            self.enqueue_reset_stream_frame(
                stream_id,
                request_priority,
                RstStreamStatus::ProtocolError,
                "Pushed stream url was invalid",
            );
            return false;
        };

        let Some(associated_url) = self.stream_by_id(associated_stream_id).map(|s| s.url().clone())
        else {
            let description = format!(
                "Received push for inactive associated stream {}",
                associated_stream_id
            );
            self.enqueue_reset_stream_frame(
                stream_id,
                request_priority,
                RstStreamStatus::InvalidStream,
                &description,
            );
            return false;
        };

        // Only a trusted proxy may push content for another origin, and never https.
        let trusted_proxy = self
            .config
            .trusted_spdy_proxy
            .as_ref()
            .is_some_and(|proxy| *proxy == self.spdy_session_key.host_port_pair);
        if trusted_proxy {
            if url.scheme() == "https" {
                let description = format!(
                    "Rejected push of Cross Origin HTTPS content {}",
                    associated_stream_id
                );
                self.enqueue_reset_stream_frame(
                    stream_id,
                    request_priority,
                    RstStreamStatus::RefusedStream,
                    &description,
                );
                return false;
            }
        } else if associated_url.origin() != url.origin() {
            let description = format!("Rejected Cross Origin Push Stream {}", associated_stream_id);
            self.enqueue_reset_stream_frame(
                stream_id,
                request_priority,
                RstStreamStatus::RefusedStream,
                &description,
            );
            return false;
        }

        if self.unclaimed_pushed_streams.contains_key(&url) {
            let description = format!("Received duplicate pushed stream with url: {}", url);
            self.enqueue_reset_stream_frame(
                stream_id,
                request_priority,
                RstStreamStatus::ProtocolError,
                &description,
            );
            return false;
        }

        let key = self.next_stream_key();
        let mut stream = SpdyStream::new(
            key,
            StreamKind::Push,
            url.clone(),
            request_priority,
            self.stream_initial_send_window_size,
            self.stream_initial_recv_window_size,
        );
        stream.set_stream_id(stream_id);
        stream.on_push_promise_headers_received(headers);

        self.delete_expired_pushed_streams();
        self.unclaimed_pushed_streams.insert(
            url.clone(),
            PushedStreamInfo {
                stream_id,
                creation_time: Instant::now(),
            },
        );
        self.streams.insert(key, stream);
        self.active_streams.insert(
            stream_id,
            ActiveStreamInfo {
                key,
                waiting_for_syn_reply: false,
            },
        );

        tracing::debug!(
            "SpdySession {}: accepted pushed stream {} for {} (associated with {})",
            self.id,
            stream_id,
            url,
            associated_stream_id
        );
        true
    }

    /// Reset pushed streams nobody claimed within their lifetime. Sweeps at
    /// most once per lifetime.
    fn delete_expired_pushed_streams(&mut self) {
        if self.unclaimed_pushed_streams.is_empty() {
            return;
        }
        let now = Instant::now();
        if now < self.next_unclaimed_push_stream_sweep_time {
            return;
        }

        let expired: Vec<SpdyStreamId> = self
            .unclaimed_pushed_streams
            .values()
            .filter(|pushed| {
                now.saturating_duration_since(pushed.creation_time) > MIN_PUSHED_STREAM_LIFETIME
            })
            .map(|pushed| pushed.stream_id)
            .collect();

        for stream_id in expired {
            if !self.is_stream_active(stream_id) {
                continue;
            }
            self.streams_abandoned_count += 1;
            // Closing the stream also drops it from the unclaimed set.
            self.reset_stream(stream_id, RstStreamStatus::RefusedStream, "Stream not claimed.");
        }

        self.next_unclaimed_push_stream_sweep_time = now + MIN_PUSHED_STREAM_LIFETIME;
    }
}

/// Split a SYN_STREAM header block into the pushed request's headers and the
/// response headers it already carries.
fn split_pushed_headers(
    headers: SpdyHeaderBlock,
    version: SpdyMajorVersion,
) -> (SpdyHeaderBlock, SpdyHeaderBlock) {
    let request_names: &[&str] = match version {
        SpdyMajorVersion::Spdy2 => &["url"],
        SpdyMajorVersion::Spdy3 => &[":scheme", ":host", ":path"],
        SpdyMajorVersion::Spdy4 => &[":scheme", ":authority", ":path"],
    };
    headers
        .into_iter()
        .partition(|(name, _)| request_names.contains(&name.as_str()))
}

/// URL a pushed stream is offered for.
fn push_url_from_headers(headers: &SpdyHeaderBlock, version: SpdyMajorVersion) -> Option<Url> {
    let url_text = match version {
        SpdyMajorVersion::Spdy2 => headers.get("url")?.clone(),
        SpdyMajorVersion::Spdy3 | SpdyMajorVersion::Spdy4 => {
            let host_header = if version == SpdyMajorVersion::Spdy4 {
                ":authority"
            } else {
                ":host"
            };
            format!(
                "{}://{}{}",
                headers.get(":scheme")?,
                headers.get(host_header)?,
                headers.get(":path")?
            )
        }
    };
    Url::parse(&url_text).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(pairs: &[(&str, &str)]) -> SpdyHeaderBlock {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_push_url_per_version() {
        let spdy2 = block(&[("url", "http://www.example.org/a.dat")]);
        assert_eq!(
            push_url_from_headers(&spdy2, SpdyMajorVersion::Spdy2).unwrap().as_str(),
            "http://www.example.org/a.dat"
        );

        let spdy3 = block(&[
            (":scheme", "https"),
            (":host", "www.example.org"),
            (":path", "/b.js"),
        ]);
        assert_eq!(
            push_url_from_headers(&spdy3, SpdyMajorVersion::Spdy3).unwrap().as_str(),
            "https://www.example.org/b.js"
        );
        // SPDY/4 names the host :authority.
        assert!(push_url_from_headers(&spdy3, SpdyMajorVersion::Spdy4).is_none());

        let spdy4 = block(&[
            (":scheme", "https"),
            (":authority", "www.example.org:8443"),
            (":path", "/c.css"),
        ]);
        assert_eq!(
            push_url_from_headers(&spdy4, SpdyMajorVersion::Spdy4).unwrap().as_str(),
            "https://www.example.org:8443/c.css"
        );
    }

    #[test]
    fn test_push_url_rejects_garbage() {
        let headers = block(&[(":scheme", "http"), (":host", ""), (":path", "/")]);
        assert!(push_url_from_headers(&headers, SpdyMajorVersion::Spdy3).is_none());
        assert!(push_url_from_headers(&SpdyHeaderBlock::new(), SpdyMajorVersion::Spdy2).is_none());
    }

    #[test]
    fn test_split_pushed_headers() {
        let headers = block(&[
            (":scheme", "http"),
            (":host", "www.example.org"),
            (":path", "/a.dat"),
            (":status", "200"),
            (":version", "HTTP/1.1"),
        ]);
        let (request, response) = split_pushed_headers(headers, SpdyMajorVersion::Spdy3);
        assert_eq!(request.len(), 3);
        assert_eq!(response.get(":status").map(String::as_str), Some("200"));
        assert!(!response.contains_key(":path"));
    }
}

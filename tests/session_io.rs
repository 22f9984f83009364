//! Socket I/O tests
//!
//! Read loop yielding, end of stream, socket errors and the write loop's
//! handling of partial and asynchronous writes.

use std::io;

use bytes::{Bytes, BytesMut};
use spdy_session::spdy::frame::GoAwayStatus;
use spdy_session::spdy::framer::FrameEvent;
use spdy_session::spdy::StreamState;
use spdy_session::{Error, NextProto, RequestPriority, SessionEvent};

mod helpers;
use helpers::SessionHarness;

const URL: &str = "http://www.example.org/";

#[test]
fn test_read_loop_yields_after_large_read() {
    helpers::init_tracing();
    let mut h = SessionHarness::new(NextProto::Spdy31);
    let key = h.start_get(URL, RequestPriority::Medium);
    h.take_events();

    let chunk = vec![b'a'; 8000];
    let mut input = BytesMut::new();
    input.extend_from_slice(&h.peer.syn_reply(1, false));
    for _ in 0..5 {
        input.extend_from_slice(&h.peer.data(1, &chunk, false));
    }

    assert!(h.socket.take_pending_read());
    let reads = h.socket.reads_started();
    h.pool.on_read_complete(h.id, Ok(input.freeze()));

    // More than 32 KiB were handled in one go: the loop gives up its turn
    // instead of reading again.
    assert_eq!(h.socket.reads_started(), reads);
    assert!(h.pool.has_pending_tasks());

    h.run();
    assert_eq!(h.socket.reads_started(), reads + 1);
    assert!(h.socket.is_read_pending());

    let events = h.take_events();
    assert_eq!(events.len(), 6, "{:?}", events);
    let received: usize = events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::Data {
                stream,
                data: Some(data),
            } if *stream == key => Some(data.len()),
            _ => None,
        })
        .sum();
    assert_eq!(received, 40_000);
    assert_eq!(h.session().stream(key).unwrap().recv_bytes(), 40_000);
}

#[test]
fn test_frame_split_across_reads() {
    let mut h = SessionHarness::new(NextProto::Spdy31);
    let key = h.start_get(URL, RequestPriority::Medium);
    h.take_events();

    let reply = h.peer.syn_reply(1, true);
    let (head, tail) = reply.split_at(5);
    h.deliver(Bytes::copy_from_slice(head));
    assert!(h.take_events().is_empty());

    h.deliver(Bytes::copy_from_slice(tail));
    let events = h.take_events();
    assert!(matches!(events[0], SessionEvent::ResponseHeaders { .. }));
    assert_eq!(
        events[1..],
        [
            SessionEvent::Data {
                stream: key,
                data: None
            },
            SessionEvent::StreamClosed {
                stream: key,
                status: Ok(())
            },
        ]
    );
}

#[test]
fn test_eof_closes_session_quietly() {
    let mut h = SessionHarness::new(NextProto::Spdy31);
    let key = h.start_get(URL, RequestPriority::Medium);
    h.written_frames();
    h.take_events();

    h.deliver_eof();

    assert_eq!(
        h.take_events(),
        vec![SessionEvent::StreamClosed {
            stream: key,
            status: Err(Error::ConnectionClosed)
        }]
    );
    assert!(h.written_frames().is_empty());
    assert!(!h.is_alive());
    assert!(!h.pool.has_session(&h.key));
    assert!(h.socket.is_disconnected());
}

#[test]
fn test_read_error_sends_goaway() {
    let mut h = SessionHarness::new(NextProto::Spdy31);
    h.written_frames();

    assert!(h.socket.take_pending_read());
    h.pool
        .on_read_complete(h.id, Err(Error::Io(io::ErrorKind::TimedOut)));
    assert!(h.session().is_draining());
    assert_eq!(
        h.session().error_on_close(),
        Some(Error::Io(io::ErrorKind::TimedOut))
    );

    h.run();
    assert_eq!(
        h.written_frames(),
        vec![FrameEvent::GoAway {
            last_accepted_stream_id: 0,
            status: GoAwayStatus::ProtocolError
        }]
    );
    assert!(!h.is_alive());
}

#[test]
fn test_garbage_input_closes_session() {
    let mut h = SessionHarness::new(NextProto::Spdy31);
    let key = h.start_get(URL, RequestPriority::Medium);
    h.written_frames();
    h.take_events();

    // Control frame claiming an unknown protocol version.
    h.deliver(Bytes::from_static(&[0x80, 0x63, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00]));

    assert_eq!(
        h.take_events(),
        vec![SessionEvent::StreamClosed {
            stream: key,
            status: Err(Error::Protocol)
        }]
    );
    assert_eq!(
        h.written_frames(),
        vec![FrameEvent::GoAway {
            last_accepted_stream_id: 0,
            status: GoAwayStatus::ProtocolError
        }]
    );
    assert!(!h.is_alive());
}

#[test]
fn test_write_error_closes_session() {
    let mut h = SessionHarness::new(NextProto::Spdy31);
    h.socket.fail_next_write(Error::ConnectionReset);

    let key = h.start_get(URL, RequestPriority::Medium);

    assert_eq!(
        h.take_events(),
        vec![SessionEvent::StreamClosed {
            stream: key,
            status: Err(Error::ConnectionReset)
        }]
    );
    assert!(!h.is_alive());
    assert!(h.socket.is_disconnected());
}

#[test]
fn test_partial_writes_are_resumed() {
    let mut h = SessionHarness::new(NextProto::Spdy31);
    h.written_frames();
    h.socket.set_max_write_size(Some(7));

    let key = h.start_get(URL, RequestPriority::Medium);

    assert_eq!(h.take_events(), vec![SessionEvent::RequestHeadersSent { stream: key }]);
    assert!(matches!(
        h.written_frames().as_slice(),
        [FrameEvent::SynStream { stream_id: 1, .. }]
    ));
}

#[test]
fn test_async_writes_complete_one_frame_at_a_time() {
    let mut h = SessionHarness::new(NextProto::Spdy31);
    h.written_frames();
    h.socket.set_async_writes(true);

    let first = h.start_get(URL, RequestPriority::Medium);
    assert!(h.socket.has_pending_write());
    assert!(h.take_events().is_empty());
    // The id is taken when the frame is built, not when it is written.
    assert_eq!(h.stream_id(first), 1);
    assert_eq!(h.session().stream(first).unwrap().state(), StreamState::Idle);

    let second = h.start_get(URL, RequestPriority::Medium);
    assert_eq!(h.stream_id(second), 0);

    h.complete_write();
    assert_eq!(
        h.take_events(),
        vec![SessionEvent::RequestHeadersSent { stream: first }]
    );
    assert_eq!(
        h.session().stream(first).unwrap().state(),
        StreamState::HalfClosedLocal
    );
    // The next frame went straight to the socket.
    assert!(h.socket.has_pending_write());
    assert_eq!(h.stream_id(second), 3);

    h.complete_write();
    assert_eq!(
        h.take_events(),
        vec![SessionEvent::RequestHeadersSent { stream: second }]
    );
    assert!(!h.socket.has_pending_write());

    let ids: Vec<u32> = h
        .written_frames()
        .into_iter()
        .filter_map(|frame| match frame {
            FrameEvent::SynStream { stream_id, .. } => Some(stream_id),
            _ => None,
        })
        .collect();
    assert_eq!(ids, vec![1, 3]);
}

#[test]
fn test_stream_closed_mid_write_is_forgotten() {
    let mut h = SessionHarness::new(NextProto::Spdy31);
    h.written_frames();
    h.socket.set_async_writes(true);

    let key = h.start_get(URL, RequestPriority::Medium);
    h.with_session(|s| s.close_stream(key));
    h.run();
    assert_eq!(
        h.take_events(),
        vec![SessionEvent::StreamClosed {
            stream: key,
            status: Ok(())
        }]
    );

    // Finishing the write must not resurrect the stream.
    h.complete_write();
    assert!(h.take_events().is_empty());
    assert_eq!(h.session().num_active_streams(), 0);
    assert!(h.session().is_available());
}

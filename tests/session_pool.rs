//! Session pool tests
//!
//! Lookup by key, IP-based aliasing, bulk closes, network changes and the
//! diagnostic snapshot.

use std::net::SocketAddr;
use std::sync::Arc;

use spdy_session::pool::{HostPortPair, PrivacyMode, ProxyServer};
use spdy_session::spdy::frame::{settings_flags, SettingsId};
use spdy_session::{
    Error, HttpServerProperties, InMemoryServerProperties, NextProto, RequestPriority, SessionId,
    SessionEvent, SpdySessionConfig, SpdySessionKey, SpdySessionPoolConfig,
};

mod helpers;
use helpers::mock_socket::{MockSocket, MockSocketHandle};
use helpers::{HarnessOptions, SessionHarness};

const URL: &str = "http://www.example.org/";

fn peer_addr() -> SocketAddr {
    "192.0.2.1:443".parse().unwrap()
}

fn pooling_harness(is_secure: bool) -> SessionHarness {
    SessionHarness::start(HarnessOptions {
        config: SpdySessionPoolConfig {
            enable_ip_pooling: true,
            ..Default::default()
        },
        is_secure,
        peer_addr: Some(peer_addr()),
        ..Default::default()
    })
}

/// Add a second session to the harness' pool.
fn add_session(h: &mut SessionHarness, key: SpdySessionKey) -> (SessionId, MockSocketHandle) {
    let (socket, handle) = MockSocket::new(Some(NextProto::Spdy31), None);
    let id = h
        .pool
        .create_available_session_from_socket(key, Box::new(socket), false, None);
    h.pool.run_until_idle();
    (id, handle)
}

#[test]
fn test_sessions_are_found_by_key() {
    helpers::init_tracing();
    let mut h = SessionHarness::new(NextProto::Spdy31);
    let key = h.key.clone();

    assert_eq!(h.pool.find_available_session(&key, &[]), Some(h.id));
    assert!(h.pool.has_session(&key));

    let other = SpdySessionKey::direct("www.example.org", 8443);
    assert_eq!(h.pool.find_available_session(&other, &[]), None);
    assert_eq!(h.pool.num_sessions(), 1);
}

#[test]
fn test_ip_pooling_shares_a_session() {
    let mut h = pooling_harness(false);
    let alias = SpdySessionKey::direct("mail.example.org", 443);

    assert_eq!(
        h.pool.find_available_session(&alias, &["192.0.2.9:443".parse().unwrap()]),
        None
    );
    assert_eq!(
        h.pool.find_available_session(&alias, &[peer_addr()]),
        Some(h.id)
    );
    assert!(h.pool.has_session(&alias));
    assert!(h.session().pooled_aliases().contains(&alias));
    assert_eq!(
        h.session().info().aliases,
        vec!["mail.example.org:443".to_string()]
    );

    // Once the session stops taking streams, neither key finds it.
    h.with_session(|s| s.go_away(Error::Aborted));
    h.run();
    assert!(!h.pool.has_session(&h.key));
    assert!(!h.pool.has_session(&alias));
    assert_eq!(h.pool.find_available_session(&alias, &[peer_addr()]), None);
}

#[test]
fn test_ip_pooling_requires_matching_privacy_mode() {
    let mut h = pooling_harness(false);
    let private = SpdySessionKey::new(
        HostPortPair::new("mail.example.org", 443),
        ProxyServer::Direct,
        PrivacyMode::Enabled,
    );

    assert_eq!(h.pool.find_available_session(&private, &[peer_addr()]), None);
}

#[test]
fn test_ip_pooling_is_off_by_default() {
    let mut h = SessionHarness::start(HarnessOptions {
        peer_addr: Some(peer_addr()),
        ..Default::default()
    });
    let alias = SpdySessionKey::direct("mail.example.org", 443);

    assert_eq!(h.pool.find_available_session(&alias, &[peer_addr()]), None);
}

#[test]
fn test_secure_sessions_are_not_shared_across_domains() {
    let mut h = pooling_harness(true);
    let alias = SpdySessionKey::direct("mail.example.org", 443);

    assert_eq!(h.pool.find_available_session(&alias, &[peer_addr()]), None);
    let key = h.key.clone();
    assert_eq!(h.pool.find_available_session(&key, &[]), Some(h.id));
    assert!(!h.session().verify_domain_authentication("mail.example.org"));
}

#[test]
fn test_single_domain_key_routes_everything_to_one_session() {
    let mut h = SessionHarness::start(HarnessOptions {
        config: SpdySessionPoolConfig {
            session: SpdySessionConfig {
                single_domain_key: Some(SpdySessionKey::direct("proxy.example.org", 443)),
                ..Default::default()
            },
            ..Default::default()
        },
        ..Default::default()
    });

    let other = SpdySessionKey::direct("anything.example.com", 80);
    assert_eq!(h.pool.find_available_session(&other, &[]), Some(h.id));
    assert_eq!(h.pool.num_available_keys(), 1);
}

#[test]
fn test_close_current_idle_sessions_spares_busy_ones() {
    let mut h = SessionHarness::new(NextProto::Spdy31);
    let key = h.start_get(URL, RequestPriority::Medium);
    h.take_events();
    let (idle, idle_socket) = add_session(&mut h, SpdySessionKey::direct("mail.example.org", 443));
    assert_eq!(h.pool.num_sessions(), 2);

    h.pool.close_current_idle_sessions();
    h.run();

    assert!(h.pool.session(idle).is_none());
    assert!(idle_socket.is_disconnected());
    assert!(h.session().is_available());
    assert!(h.session().stream(key).is_some());
    assert_eq!(h.pool.num_sessions(), 1);
}

#[test]
fn test_close_all_sessions() {
    let mut h = SessionHarness::new(NextProto::Spdy31);
    let key = h.start_get(URL, RequestPriority::Medium);
    h.written_frames();
    h.take_events();
    add_session(&mut h, SpdySessionKey::direct("mail.example.org", 443));

    h.pool.close_all_sessions();
    h.run();

    assert_eq!(
        h.take_events(),
        vec![SessionEvent::StreamClosed {
            stream: key,
            status: Err(Error::Aborted)
        }]
    );
    // Aborting is a quiet close.
    assert!(h.written_frames().is_empty());
    assert_eq!(h.pool.num_sessions(), 0);
    assert_eq!(h.pool.num_available_keys(), 0);
}

#[test]
fn test_close_current_sessions_reports_the_error() {
    let mut h = SessionHarness::new(NextProto::Spdy31);
    let key = h.start_get(URL, RequestPriority::Medium);
    h.written_frames();
    h.take_events();

    h.pool.close_current_sessions(Error::Protocol);
    h.run();

    assert_eq!(
        h.take_events(),
        vec![SessionEvent::StreamClosed {
            stream: key,
            status: Err(Error::Protocol)
        }]
    );
    assert!(matches!(
        h.written_frames().as_slice(),
        [spdy_session::spdy::framer::FrameEvent::GoAway { .. }]
    ));
    assert!(!h.is_alive());
}

#[test]
fn test_ip_address_change_retires_sessions() {
    let properties = Arc::new(InMemoryServerProperties::new());
    let origin = HostPortPair::new("www.example.org", 443);
    properties.set_spdy_setting(
        &origin,
        SettingsId::MaxConcurrentStreams,
        settings_flags::PERSIST_VALUE,
        10,
    );
    let mut h = SessionHarness::start(HarnessOptions {
        properties,
        ..Default::default()
    });
    let key = h.start_get(URL, RequestPriority::Medium);
    h.written_frames();
    h.take_events();

    h.pool.on_ip_address_changed();
    h.run();

    assert!(h.properties.get_spdy_settings(&origin).is_empty());
    assert!(h.session().is_going_away());
    assert!(!h.pool.has_session(&h.key));
    // The in-flight request still completes.
    assert!(h.take_events().is_empty());
    assert!(h.written_frames().is_empty());

    let reply = h.peer.syn_reply(1, true);
    h.deliver(reply);
    assert_eq!(
        h.take_events().last(),
        Some(&SessionEvent::StreamClosed {
            stream: key,
            status: Ok(())
        })
    );
    assert!(!h.is_alive());
}

#[test]
fn test_pool_stalled_connection_is_released_when_idle() {
    let mut h = SessionHarness::new(NextProto::Spdy31);
    let key = h.start_get(URL, RequestPriority::Medium);
    h.written_frames();
    h.take_events();
    h.socket.set_pool_stalled(true);

    let reply = h.peer.syn_reply(1, true);
    h.deliver(reply);

    assert_eq!(
        h.take_events().last(),
        Some(&SessionEvent::StreamClosed {
            stream: key,
            status: Ok(())
        })
    );
    assert!(h.written_frames().is_empty());
    assert!(!h.is_alive());
}

#[test]
fn test_info_snapshot() {
    let mut h = SessionHarness::new(NextProto::Spdy31);
    h.start_get(URL, RequestPriority::Medium);

    let info = h.pool.info_as_value();
    let sessions = info.as_array().expect("array");
    assert_eq!(sessions.len(), 1);
    let session = &sessions[0];
    assert_eq!(session["source_id"], h.id.get());
    assert_eq!(session["host_port_pair"], "www.example.org:443");
    assert_eq!(session["protocol_negotiated"], NextProto::Spdy31.as_str());
    assert_eq!(session["active_streams"], 1);
    assert_eq!(session["streams_initiated_count"], 1);
    assert_eq!(session["is_secure"], false);
    assert_eq!(session["sent_settings"], true);
    assert_eq!(session["received_settings"], false);
    assert_eq!(session["recv_window_size"], 10 * 1024 * 1024);
    assert!(session["error"].is_null());
    assert_eq!(h.session().info_as_value(), *session);
}

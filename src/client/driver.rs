//! Background task that owns the session pool.
//!
//! The driver runs the pool's posted tasks, feeds socket completions back into
//! the sessions and turns session events into responses for the requests that
//! came in through [`SpdyClient`](super::SpdyClient) handles.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use super::response::SpdyResponse;
use super::socket::{SocketCompletion, TaggedCompletion, TokioSocket};
use super::SpdyRequest;
use crate::error::{Error, Result};
use crate::pool::{SessionId, SpdySessionKey, SpdySessionPool};
use crate::protocol::NextProto;
use crate::spdy::{
    SendStatus, SessionEvent, SessionInfo, SpdyHeaderBlock, StreamCreation, StreamKey, StreamKind,
    StreamRequestId,
};

/// Byte stream a session can run over.
pub trait AsyncIo: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> AsyncIo for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Command sent from a handle to the driver
pub enum DriverCommand {
    /// Start a session over an established connection.
    Connect {
        key: SpdySessionKey,
        io: Box<dyn AsyncIo>,
        is_secure: bool,
        protocol: Option<NextProto>,
        peer_addr: Option<SocketAddr>,
        response_tx: oneshot::Sender<SessionId>,
    },
    /// Look up an available session, pooling by IP when enabled.
    FindSession {
        key: SpdySessionKey,
        resolved: Vec<SocketAddr>,
        response_tx: oneshot::Sender<Option<SessionId>>,
    },
    /// Run a request on a session and collect the whole response.
    SendRequest {
        session: SessionId,
        request: SpdyRequest,
        response_tx: oneshot::Sender<Result<SpdyResponse>>,
    },
    CloseIdleSessions,
    OnIpAddressChanged,
    Info {
        response_tx: oneshot::Sender<Vec<SessionInfo>>,
    },
}

impl std::fmt::Debug for DriverCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverCommand::Connect { key, .. } => write!(f, "Connect({})", key),
            DriverCommand::FindSession { key, .. } => write!(f, "FindSession({})", key),
            DriverCommand::SendRequest {
                session, request, ..
            } => write!(f, "SendRequest({}, {})", session, request.url),
            DriverCommand::CloseIdleSessions => f.write_str("CloseIdleSessions"),
            DriverCommand::OnIpAddressChanged => f.write_str("OnIpAddressChanged"),
            DriverCommand::Info { .. } => f.write_str("Info"),
        }
    }
}

/// Request waiting for its session to free a stream slot.
struct PendingRequest {
    request: SpdyRequest,
    response_tx: oneshot::Sender<Result<SpdyResponse>>,
}

/// Per-stream state tracked by driver
struct DriverStreamState {
    response_tx: Option<oneshot::Sender<Result<SpdyResponse>>>,
    /// Request body, sent once the headers are on the wire.
    body: Option<Bytes>,
    protocol: NextProto,
    headers: SpdyHeaderBlock,
    data: BytesMut,
}

impl DriverStreamState {
    fn fail(&mut self, err: Error) {
        if let Some(tx) = self.response_tx.take() {
            let _ = tx.send(Err(err));
        }
    }
}

pub struct SpdyDriver {
    pool: SpdySessionPool,
    command_rx: mpsc::Receiver<DriverCommand>,
    completion_tx: mpsc::UnboundedSender<TaggedCompletion>,
    completion_rx: mpsc::UnboundedReceiver<TaggedCompletion>,
    next_socket_token: u64,
    /// Socket token to the session reading from it.
    sockets: HashMap<u64, SessionId>,
    pending_requests: HashMap<(SessionId, StreamRequestId), PendingRequest>,
    streams: HashMap<(SessionId, StreamKey), DriverStreamState>,
}

impl SpdyDriver {
    pub fn new(pool: SpdySessionPool, command_rx: mpsc::Receiver<DriverCommand>) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            pool,
            command_rx,
            completion_tx,
            completion_rx,
            next_socket_token: 1,
            sockets: HashMap::new(),
            pending_requests: HashMap::new(),
            streams: HashMap::new(),
        }
    }

    /// Run until every handle is dropped, then close all sessions.
    pub async fn drive(mut self) {
        loop {
            self.run_pending_work();
            let deadline = self.pool.next_deadline();

            tokio::select! {
                command = self.command_rx.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => break,
                    }
                }
                Some((token, completion)) = self.completion_rx.recv() => {
                    self.handle_completion(token, completion);
                }
                _ = sleep_until(deadline) => {}
            }
        }

        tracing::debug!("SpdyDriver: all handles dropped, closing sessions");
        self.pool.close_all_sessions();
        self.run_pending_work();
        for (_, mut state) in self.streams.drain() {
            state.fail(Error::Aborted);
        }
    }

    fn handle_command(&mut self, command: DriverCommand) {
        tracing::trace!("SpdyDriver: {:?}", command);
        match command {
            DriverCommand::Connect {
                key,
                io,
                is_secure,
                protocol,
                peer_addr,
                response_tx,
            } => {
                let token = self.next_socket_token;
                self.next_socket_token += 1;
                let mut socket = TokioSocket::new(io, token, self.completion_tx.clone());
                if let Some(protocol) = protocol {
                    socket = socket.with_protocol(protocol);
                }
                if let Some(peer_addr) = peer_addr {
                    socket = socket.with_peer_addr(peer_addr);
                }
                let id = self.pool.create_available_session_from_socket(
                    key,
                    Box::new(socket),
                    is_secure,
                    None,
                );
                self.sockets.insert(token, id);
                let _ = response_tx.send(id);
            }
            DriverCommand::FindSession {
                key,
                resolved,
                response_tx,
            } => {
                let _ = response_tx.send(self.pool.find_available_session(&key, &resolved));
            }
            DriverCommand::SendRequest {
                session,
                request,
                response_tx,
            } => self.send_request(session, request, response_tx),
            DriverCommand::CloseIdleSessions => self.pool.close_current_idle_sessions(),
            DriverCommand::OnIpAddressChanged => self.pool.on_ip_address_changed(),
            DriverCommand::Info { response_tx } => {
                let _ = response_tx.send(self.pool.info());
            }
        }
    }

    fn handle_completion(&mut self, token: u64, completion: SocketCompletion) {
        let Some(id) = self.sockets.get(&token).copied() else {
            return;
        };
        match completion {
            SocketCompletion::Read(result) => self.pool.on_read_complete(id, result),
            SocketCompletion::Write(result) => self.pool.on_write_complete(id, result),
        }
    }

    /// Run posted tasks and handle the events they produce until neither is left.
    fn run_pending_work(&mut self) {
        loop {
            let ran = self.pool.run_until_idle();
            let events = self.pool.take_events();
            if ran == 0 && events.is_empty() {
                break;
            }
            for (id, event) in events {
                self.handle_event(id, event);
            }
        }
        let pool = &self.pool;
        self.sockets.retain(|_, id| pool.session(*id).is_some());
    }

    fn send_request(
        &mut self,
        session: SessionId,
        request: SpdyRequest,
        response_tx: oneshot::Sender<Result<SpdyResponse>>,
    ) {
        let url = request.url.clone();
        let priority = request.priority;
        let created = self.pool.with_session(session, |s| {
            s.request_stream(StreamKind::RequestResponse, url, priority)
        });
        match created {
            None => {
                let _ = response_tx.send(Err(Error::ConnectionClosed));
            }
            Some(Err(err)) => {
                let _ = response_tx.send(Err(err));
            }
            Some(Ok(StreamCreation::Created(key))) => {
                self.start_stream(session, key, request, response_tx)
            }
            Some(Ok(StreamCreation::Pending(request_id))) => {
                tracing::debug!(
                    "SpdyDriver: {} on session {} waits for a stream slot",
                    request_id,
                    session
                );
                self.pending_requests.insert(
                    (session, request_id),
                    PendingRequest {
                        request,
                        response_tx,
                    },
                );
            }
        }
    }

    fn start_stream(
        &mut self,
        session: SessionId,
        key: StreamKey,
        request: SpdyRequest,
        response_tx: oneshot::Sender<Result<SpdyResponse>>,
    ) {
        let Some((protocol, version)) = self
            .pool
            .session(session)
            .and_then(|s| s.protocol().major_version().map(|v| (s.protocol(), v)))
        else {
            let _ = response_tx.send(Err(Error::ConnectionClosed));
            return;
        };

        let headers = request.spdy_headers(version);
        let body = request.body.filter(|body| !body.is_empty());
        let send_status = if body.is_some() {
            SendStatus::MoreDataToSend
        } else {
            SendStatus::NoMoreDataToSend
        };

        let sent = self
            .pool
            .with_session(session, |s| s.send_request_headers(key, headers, send_status))
            .unwrap_or(Err(Error::ConnectionClosed));
        if let Err(err) = sent {
            self.pool.with_session(session, |s| s.cancel_stream(key));
            let _ = response_tx.send(Err(err));
            return;
        }

        self.streams.insert(
            (session, key),
            DriverStreamState {
                response_tx: Some(response_tx),
                body,
                protocol,
                headers: SpdyHeaderBlock::new(),
                data: BytesMut::new(),
            },
        );
    }

    fn handle_event(&mut self, session: SessionId, event: SessionEvent) {
        match event {
            SessionEvent::StreamRequestComplete { request, result } => {
                let Some(pending) = self.pending_requests.remove(&(session, request)) else {
                    return;
                };
                match result {
                    Ok(key) => self.start_stream(session, key, pending.request, pending.response_tx),
                    Err(err) => {
                        let _ = pending.response_tx.send(Err(err));
                    }
                }
            }
            SessionEvent::RequestHeadersSent { stream } => {
                let Some(body) = self
                    .streams
                    .get_mut(&(session, stream))
                    .and_then(|state| state.body.take())
                else {
                    return;
                };
                let sent = self
                    .pool
                    .with_session(session, |s| {
                        s.send_data(stream, body, SendStatus::NoMoreDataToSend)
                    })
                    .unwrap_or(Err(Error::ConnectionClosed));
                if let Err(err) = sent {
                    if let Some(state) = self.streams.get_mut(&(session, stream)) {
                        state.fail(err);
                    }
                    self.pool.with_session(session, |s| s.cancel_stream(stream));
                }
            }
            SessionEvent::DataSent { .. } => {}
            SessionEvent::ResponseHeaders { stream, headers } => {
                if let Some(state) = self.streams.get_mut(&(session, stream)) {
                    state.headers = headers;
                }
            }
            SessionEvent::Data {
                stream,
                data: Some(data),
            } => {
                let len = data.len();
                let abandoned = match self.streams.get_mut(&(session, stream)) {
                    Some(state) => {
                        state.data.extend_from_slice(&data);
                        state.response_tx.as_ref().map_or(true, |tx| tx.is_closed())
                    }
                    None => true,
                };
                self.pool.with_session(session, |s| {
                    s.consume_received_data(stream, len);
                    if abandoned {
                        s.cancel_stream(stream);
                    }
                });
            }
            SessionEvent::Data { data: None, .. } => {}
            SessionEvent::StreamClosed { stream, status } => {
                let Some(mut state) = self.streams.remove(&(session, stream)) else {
                    return;
                };
                let Some(tx) = state.response_tx.take() else {
                    return;
                };
                let response = status.and_then(|()| {
                    SpdyResponse::from_parts(state.headers, state.data.freeze(), state.protocol)
                });
                let _ = tx.send(response);
            }
        }
    }
}

impl std::fmt::Debug for SpdyDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpdyDriver")
            .field("pool", &self.pool)
            .field("sockets", &self.sockets.len())
            .field("pending_requests", &self.pending_requests.len())
            .field("streams", &self.streams.len())
            .finish()
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

//! Cloneable handle to a running [`SpdyDriver`].

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::driver::{AsyncIo, DriverCommand, SpdyDriver};
use super::response::SpdyResponse;
use super::SpdyRequest;
use crate::config::SpdySessionPoolConfig;
use crate::error::{Error, Result};
use crate::pool::{SessionId, SpdySessionKey, SpdySessionPool};
use crate::properties::{HttpServerProperties, InMemoryServerProperties};
use crate::protocol::NextProto;
use crate::spdy::SessionInfo;

/// Handle for sending work to the driver. Dropping the last handle shuts the
/// driver down and closes every session.
#[derive(Clone, Debug)]
pub struct SpdyClient {
    command_tx: mpsc::Sender<DriverCommand>,
}

impl SpdyClient {
    /// Spawn a driver for `pool` on the current runtime.
    pub fn spawn(pool: SpdySessionPool) -> Self {
        let (command_tx, command_rx) = mpsc::channel(32);
        let driver = SpdyDriver::new(pool, command_rx);
        tokio::spawn(driver.drive());
        Self { command_tx }
    }

    /// Spawn a driver with a fresh pool and in-memory server properties.
    pub fn new(config: SpdySessionPoolConfig) -> Self {
        let properties: Arc<dyn HttpServerProperties> = Arc::new(InMemoryServerProperties::new());
        Self::spawn(SpdySessionPool::new(config, properties))
    }

    /// Start a session over `io` and make it available under `key`. The
    /// session speaks the pool's default protocol.
    pub async fn connect<S: AsyncIo>(
        &self,
        key: SpdySessionKey,
        io: S,
        is_secure: bool,
    ) -> Result<SessionId> {
        self.connect_with_protocol(key, io, is_secure, None, None)
            .await
    }

    /// Like [`connect`](Self::connect), with the protocol negotiated during
    /// connection setup and the peer address used for IP pooling.
    pub async fn connect_with_protocol<S: AsyncIo>(
        &self,
        key: SpdySessionKey,
        io: S,
        is_secure: bool,
        protocol: Option<NextProto>,
        peer_addr: Option<SocketAddr>,
    ) -> Result<SessionId> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(DriverCommand::Connect {
            key,
            io: Box::new(io),
            is_secure,
            protocol,
            peer_addr,
            response_tx,
        })
        .await?;
        response_rx.await.map_err(|_| response_channel_closed())
    }

    /// Session available for `key`, if any. `resolved` are the addresses the
    /// key's host resolved to, for IP pooling.
    pub async fn find_session(
        &self,
        key: SpdySessionKey,
        resolved: Vec<SocketAddr>,
    ) -> Result<Option<SessionId>> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(DriverCommand::FindSession {
            key,
            resolved,
            response_tx,
        })
        .await?;
        response_rx.await.map_err(|_| response_channel_closed())
    }

    /// Run `request` on `session` and wait for the complete response.
    ///
    /// Dropping the returned future cancels the stream the next time data
    /// arrives for it.
    pub async fn send_request(
        &self,
        session: SessionId,
        request: SpdyRequest,
    ) -> Result<SpdyResponse> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(DriverCommand::SendRequest {
            session,
            request,
            response_tx,
        })
        .await?;
        response_rx.await.map_err(|_| response_channel_closed())?
    }

    /// Close every session without active streams.
    pub async fn close_idle_sessions(&self) -> Result<()> {
        self.send(DriverCommand::CloseIdleSessions).await
    }

    /// Retire all sessions after a network change.
    pub async fn on_ip_address_changed(&self) -> Result<()> {
        self.send(DriverCommand::OnIpAddressChanged).await
    }

    pub async fn info(&self) -> Result<Vec<SessionInfo>> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(DriverCommand::Info { response_tx }).await?;
        response_rx.await.map_err(|_| response_channel_closed())
    }

    async fn send(&self, command: DriverCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| Error::unexpected("driver channel closed"))
    }
}

fn response_channel_closed() -> Error {
    Error::unexpected("response channel closed")
}

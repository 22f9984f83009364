//! [`SpdySocket`] over any tokio byte stream.
//!
//! A reader task and a writer task own the two halves of the stream. The
//! session's `read` and `write` calls hand them one request each and return
//! `Poll::Pending`; the tasks report completions on a channel that the driver
//! feeds back into the pool.

use std::net::SocketAddr;
use std::task::Poll;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::protocol::NextProto;
use crate::socket::SpdySocket;

/// Result of a read or write started through a [`TokioSocket`].
#[derive(Debug)]
pub enum SocketCompletion {
    Read(Result<Bytes>),
    Write(Result<usize>),
}

/// Completion tagged with the token of the socket that produced it.
pub type TaggedCompletion = (u64, SocketCompletion);

pub struct TokioSocket {
    read_tx: Option<mpsc::UnboundedSender<usize>>,
    write_tx: Option<mpsc::UnboundedSender<Bytes>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    peer_addr: Option<SocketAddr>,
    protocol: Option<NextProto>,
    connected: bool,
}

impl TokioSocket {
    /// Split `io` and spawn its reader and writer tasks. Must be called inside
    /// a tokio runtime.
    pub fn new<S>(io: S, token: u64, completions: mpsc::UnboundedSender<TaggedCompletion>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(io);
        let (read_tx, read_rx) = mpsc::unbounded_channel();
        let (write_tx, write_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_task(reader, read_rx, token, completions.clone()));
        let writer = tokio::spawn(write_task(writer, write_rx, token, completions));

        Self {
            read_tx: Some(read_tx),
            write_tx: Some(write_tx),
            reader,
            writer,
            peer_addr: None,
            protocol: None,
            connected: true,
        }
    }

    pub fn with_peer_addr(mut self, peer_addr: SocketAddr) -> Self {
        self.peer_addr = Some(peer_addr);
        self
    }

    /// Protocol agreed on during connection setup (ALPN/NPN).
    pub fn with_protocol(mut self, protocol: NextProto) -> Self {
        self.protocol = Some(protocol);
        self
    }
}

async fn read_task<S: AsyncRead>(
    mut reader: ReadHalf<S>,
    mut requests: mpsc::UnboundedReceiver<usize>,
    token: u64,
    completions: mpsc::UnboundedSender<TaggedCompletion>,
) {
    while let Some(max_len) = requests.recv().await {
        let mut buf = vec![0u8; max_len];
        let result = match reader.read(&mut buf).await {
            Ok(n) => {
                buf.truncate(n);
                Ok(Bytes::from(buf))
            }
            Err(err) => Err(Error::from(err)),
        };
        if completions
            .send((token, SocketCompletion::Read(result)))
            .is_err()
        {
            break;
        }
    }
}

async fn write_task<S: AsyncWrite>(
    mut writer: WriteHalf<S>,
    mut requests: mpsc::UnboundedReceiver<Bytes>,
    token: u64,
    completions: mpsc::UnboundedSender<TaggedCompletion>,
) {
    while let Some(buf) = requests.recv().await {
        let result = write_some(&mut writer, &buf).await;
        if completions
            .send((token, SocketCompletion::Write(result)))
            .is_err()
        {
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn write_some<W: AsyncWrite + Unpin>(writer: &mut W, buf: &[u8]) -> Result<usize> {
    let n = writer.write(buf).await?;
    writer.flush().await?;
    Ok(n)
}

impl SpdySocket for TokioSocket {
    fn read(&mut self, max_len: usize) -> Poll<Result<Bytes>> {
        match &self.read_tx {
            Some(tx) if tx.send(max_len).is_ok() => Poll::Pending,
            _ => Poll::Ready(Err(Error::SocketNotConnected)),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Poll<Result<usize>> {
        match &self.write_tx {
            Some(tx) if tx.send(Bytes::copy_from_slice(buf)).is_ok() => Poll::Pending,
            _ => Poll::Ready(Err(Error::SocketNotConnected)),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected && !self.reader.is_finished() && !self.writer.is_finished()
    }

    fn negotiated_protocol(&self) -> Option<NextProto> {
        self.protocol
    }

    fn peer_addr(&self) -> Result<SocketAddr> {
        self.peer_addr.ok_or(Error::SocketNotConnected)
    }

    fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        self.read_tx = None;
        // The writer finishes what it has queued, then shuts the stream down.
        self.write_tx = None;
        self.reader.abort();
    }
}

impl Drop for TokioSocket {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl std::fmt::Debug for TokioSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioSocket")
            .field("peer_addr", &self.peer_addr)
            .field("protocol", &self.protocol)
            .field("connected", &self.connected)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_and_write_complete_through_channel() {
        let (client, mut server) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut socket = TokioSocket::new(client, 7, tx);

        assert!(socket.write(b"hello").is_pending());
        let (token, completion) = rx.recv().await.unwrap();
        assert_eq!(token, 7);
        assert!(matches!(completion, SocketCompletion::Write(Ok(5))));

        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        assert!(socket.read(16).is_pending());
        server.write_all(b"world").await.unwrap();
        let (_, completion) = rx.recv().await.unwrap();
        match completion {
            SocketCompletion::Read(Ok(data)) => assert_eq!(&data[..], b"world"),
            other => panic!("unexpected completion: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_eof_reads_empty() {
        let (client, server) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut socket = TokioSocket::new(client, 1, tx);
        drop(server);

        assert!(socket.read(16).is_pending());
        let (_, completion) = rx.recv().await.unwrap();
        assert!(matches!(completion, SocketCompletion::Read(Ok(ref data)) if data.is_empty()));
    }

    #[tokio::test]
    async fn test_disconnected_socket_fails_immediately() {
        let (client, _server) = tokio::io::duplex(64);
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut socket = TokioSocket::new(client, 1, tx);
        assert!(socket.peer_addr().is_err());

        socket.disconnect();
        assert!(!socket.is_connected());
        assert_eq!(socket.read(16), Poll::Ready(Err(Error::SocketNotConnected)));
        assert_eq!(socket.write(b"x"), Poll::Ready(Err(Error::SocketNotConnected)));
    }
}

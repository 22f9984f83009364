//! Socket abstraction the session runs over.
//!
//! The session is sans-io: it asks the socket to start a read or a write and
//! either gets the result immediately (`Poll::Ready`) or is told that the
//! completion will be delivered later (`Poll::Pending`) through
//! [`SpdySessionPool::on_read_complete`](crate::SpdySessionPool::on_read_complete)
//! and [`SpdySessionPool::on_write_complete`](crate::SpdySessionPool::on_write_complete).

use std::net::SocketAddr;
use std::task::Poll;

use bytes::Bytes;

use crate::error::Result;
use crate::protocol::NextProto;

/// Byte-stream transport owned by one session.
///
/// At most one read and one write are outstanding at any time. A read that
/// completes with an empty buffer signals an orderly close by the peer.
pub trait SpdySocket: Send {
    /// Start a read of up to `max_len` bytes.
    fn read(&mut self, max_len: usize) -> Poll<Result<Bytes>>;

    /// Start writing `buf`, returning how many bytes were accepted.
    fn write(&mut self, buf: &[u8]) -> Poll<Result<usize>>;

    /// Whether the underlying connection is still usable.
    fn is_connected(&self) -> bool;

    /// Protocol negotiated during connection setup, if any.
    fn negotiated_protocol(&self) -> Option<NextProto>;

    /// Address of the peer.
    fn peer_addr(&self) -> Result<SocketAddr>;

    /// Close the connection. Outstanding operations are abandoned.
    fn disconnect(&mut self);

    /// Whether the transport pool this socket came from has requests waiting
    /// for a free connection.
    fn is_pool_stalled(&self) -> bool {
        false
    }
}

impl<S: SpdySocket + ?Sized> SpdySocket for Box<S> {
    fn read(&mut self, max_len: usize) -> Poll<Result<Bytes>> {
        (**self).read(max_len)
    }

    fn write(&mut self, buf: &[u8]) -> Poll<Result<usize>> {
        (**self).write(buf)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn negotiated_protocol(&self) -> Option<NextProto> {
        (**self).negotiated_protocol()
    }

    fn peer_addr(&self) -> Result<SocketAddr> {
        (**self).peer_addr()
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }

    fn is_pool_stalled(&self) -> bool {
        (**self).is_pool_stalled()
    }
}

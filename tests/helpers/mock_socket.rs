use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::Poll;

use bytes::{Bytes, BytesMut};
use spdy_session::{Error, NextProto, Result, SpdySocket};

/// Scripted socket for driving a session without a network.
///
/// Reads are served from a queue; with nothing queued the read goes pending
/// until the test delivers data. Writes complete synchronously unless async
/// writes are switched on, in which case the test completes them.
#[allow(dead_code)]
pub struct MockSocket {
    state: Arc<Mutex<MockState>>,
}

/// Test-side view of a [`MockSocket`] the session owns.
#[allow(dead_code)]
#[derive(Clone)]
pub struct MockSocketHandle {
    state: Arc<Mutex<MockState>>,
}

#[derive(Debug, Default)]
struct MockState {
    reads: VecDeque<Result<Bytes>>,
    read_pending: bool,
    reads_started: usize,
    written: BytesMut,
    async_writes: bool,
    max_write_size: Option<usize>,
    pending_write: Option<Bytes>,
    write_error: Option<Error>,
    disconnected: bool,
    peer_addr: Option<SocketAddr>,
    protocol: Option<NextProto>,
    pool_stalled: bool,
}

fn lock(state: &Arc<Mutex<MockState>>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap()
}

impl MockSocket {
    #[allow(dead_code)]
    pub fn new(protocol: Option<NextProto>, peer_addr: Option<SocketAddr>) -> (Self, MockSocketHandle) {
        let state = Arc::new(Mutex::new(MockState {
            protocol,
            peer_addr,
            ..Default::default()
        }));
        (
            Self {
                state: Arc::clone(&state),
            },
            MockSocketHandle { state },
        )
    }
}

impl SpdySocket for MockSocket {
    fn read(&mut self, _max_len: usize) -> Poll<Result<Bytes>> {
        let mut state = lock(&self.state);
        if state.disconnected {
            return Poll::Ready(Err(Error::SocketNotConnected));
        }
        state.reads_started += 1;
        match state.reads.pop_front() {
            Some(result) => Poll::Ready(result),
            None => {
                state.read_pending = true;
                Poll::Pending
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> Poll<Result<usize>> {
        let mut state = lock(&self.state);
        if state.disconnected {
            return Poll::Ready(Err(Error::SocketNotConnected));
        }
        if let Some(err) = state.write_error.take() {
            return Poll::Ready(Err(err));
        }
        let n = state.max_write_size.map_or(buf.len(), |max| max.min(buf.len()));
        if state.async_writes {
            state.pending_write = Some(Bytes::copy_from_slice(&buf[..n]));
            return Poll::Pending;
        }
        state.written.extend_from_slice(&buf[..n]);
        Poll::Ready(Ok(n))
    }

    fn is_connected(&self) -> bool {
        !lock(&self.state).disconnected
    }

    fn negotiated_protocol(&self) -> Option<NextProto> {
        lock(&self.state).protocol
    }

    fn peer_addr(&self) -> Result<SocketAddr> {
        lock(&self.state).peer_addr.ok_or(Error::SocketNotConnected)
    }

    fn disconnect(&mut self) {
        lock(&self.state).disconnected = true;
    }

    fn is_pool_stalled(&self) -> bool {
        lock(&self.state).pool_stalled
    }
}

#[allow(dead_code)]
impl MockSocketHandle {
    /// Serve `result` to the next read that is started.
    pub fn queue_read(&self, result: Result<Bytes>) {
        lock(&self.state).reads.push_back(result);
    }

    /// Whether the session is waiting on a read. Clears the flag.
    pub fn take_pending_read(&self) -> bool {
        std::mem::take(&mut lock(&self.state).read_pending)
    }

    pub fn is_read_pending(&self) -> bool {
        lock(&self.state).read_pending
    }

    pub fn reads_started(&self) -> usize {
        lock(&self.state).reads_started
    }

    /// Every byte the session has written so far.
    pub fn written(&self) -> Bytes {
        Bytes::copy_from_slice(&lock(&self.state).written)
    }

    pub fn set_async_writes(&self, async_writes: bool) {
        lock(&self.state).async_writes = async_writes;
    }

    /// Accept at most `max` bytes per write.
    pub fn set_max_write_size(&self, max: Option<usize>) {
        lock(&self.state).max_write_size = max;
    }

    /// Fail the next write with `err`.
    pub fn fail_next_write(&self, err: Error) {
        lock(&self.state).write_error = Some(err);
    }

    /// Finish the pending async write. Returns how many bytes it carried.
    pub fn complete_pending_write(&self) -> Option<usize> {
        let mut state = lock(&self.state);
        let data = state.pending_write.take()?;
        state.written.extend_from_slice(&data);
        Some(data.len())
    }

    pub fn has_pending_write(&self) -> bool {
        lock(&self.state).pending_write.is_some()
    }

    pub fn set_pool_stalled(&self, stalled: bool) {
        lock(&self.state).pool_stalled = stalled;
    }

    pub fn is_disconnected(&self) -> bool {
        lock(&self.state).disconnected
    }
}

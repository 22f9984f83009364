//! Per-priority queue of outbound frames.
//!
//! Frames leave highest priority first and FIFO within a priority. The
//! SYN_STREAM of a stream is queued as a placeholder and built only when it is
//! dequeued, which is when the stream gets its id.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::protocol::{RequestPriority, NUM_PRIORITIES};
use crate::spdy::frame::SpdyFrameType;
use crate::spdy::session::StreamKey;

/// What the session turns into frame bytes when the entry is dequeued.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameProducer {
    /// Fully built frame.
    Frame(Bytes),
    /// SYN_STREAM for the entry's stream, built once the stream has an id.
    SynStream,
}

/// One queued frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub frame_type: SpdyFrameType,
    pub producer: FrameProducer,
    /// Stream the frame belongs to, if any.
    pub stream: Option<StreamKey>,
    /// Session send-window bytes returned if the frame is discarded unsent.
    pub session_credit: usize,
}

#[derive(Debug, Default)]
pub struct SpdyWriteQueue {
    queues: [VecDeque<PendingWrite>; NUM_PRIORITIES],
}

impl SpdyWriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(VecDeque::is_empty)
    }

    pub fn len(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    pub fn enqueue(&mut self, priority: RequestPriority, write: PendingWrite) {
        self.queues[priority.index()].push_back(write);
    }

    /// Next frame to write: highest priority first, FIFO within a priority.
    pub fn dequeue(&mut self) -> Option<PendingWrite> {
        RequestPriority::HIGHEST_FIRST
            .iter()
            .find_map(|p| self.queues[p.index()].pop_front())
    }

    /// Drop every queued frame of `stream`, returning them so that the caller
    /// can refund their session credit.
    pub fn remove_pending_writes_for_stream(&mut self, stream: StreamKey) -> Vec<PendingWrite> {
        self.remove_where(|w| w.stream == Some(stream))
    }

    /// Drop every queued frame belonging to one of the given streams.
    pub fn remove_pending_writes_for_streams(
        &mut self,
        mut is_doomed: impl FnMut(StreamKey) -> bool,
    ) -> Vec<PendingWrite> {
        self.remove_where(|w| w.stream.is_some_and(&mut is_doomed))
    }

    /// Drop everything.
    pub fn clear(&mut self) -> Vec<PendingWrite> {
        self.remove_where(|_| true)
    }

    fn remove_where(&mut self, mut doomed: impl FnMut(&PendingWrite) -> bool) -> Vec<PendingWrite> {
        let mut removed = Vec::new();
        for queue in &mut self.queues {
            let mut kept = VecDeque::with_capacity(queue.len());
            for write in queue.drain(..) {
                if doomed(&write) {
                    removed.push(write);
                } else {
                    kept.push_back(write);
                }
            }
            *queue = kept;
        }
        removed
    }
}

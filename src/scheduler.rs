//! Single-threaded deferred task queue.
//!
//! Sessions never run deferred work inside the call that scheduled it: yielding
//! the read loop, completing queued stream requests and re-arming ping checks
//! are all posted here and run on a later turn of the owner's event loop.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

/// Work a session posts for a later turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTask {
    /// Resume the read loop after yielding.
    PumpReadLoop,
    /// Drive the write loop.
    PumpWriteLoop,
    /// Retry a queued stream request now that capacity may be free.
    CompleteStreamRequest(crate::spdy::StreamRequestId),
    /// Verify that outstanding pings were answered.
    CheckPingStatus { last_check_time: Instant },
}

struct Delayed<T> {
    deadline: Instant,
    seq: u64,
    task: T,
}

impl<T> PartialEq for Delayed<T> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<T> Eq for Delayed<T> {}

impl<T> PartialOrd for Delayed<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Delayed<T> {
    // Reversed: BinaryHeap is a max-heap and we want the earliest deadline on top.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// FIFO queue of ready tasks plus deadline-ordered delayed tasks.
pub struct TaskQueue<T> {
    ready: VecDeque<T>,
    delayed: BinaryHeap<Delayed<T>>,
    next_seq: u64,
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            ready: VecDeque::new(),
            delayed: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    /// Run `task` on the next turn.
    pub fn post(&mut self, task: T) {
        self.ready.push_back(task);
    }

    /// Run `task` once `delay` has passed from `now`.
    pub fn post_delayed(&mut self, now: Instant, delay: Duration, task: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.delayed.push(Delayed {
            deadline: now + delay,
            seq,
            task,
        });
    }

    /// Next task to run at `now`: ready tasks first, then due delayed tasks in
    /// deadline order.
    pub fn pop_ready(&mut self, now: Instant) -> Option<T> {
        if let Some(task) = self.ready.pop_front() {
            return Some(task);
        }
        if self.delayed.peek().is_some_and(|d| d.deadline <= now) {
            return self.delayed.pop().map(|d| d.task);
        }
        None
    }

    /// Whether a task is runnable at `now`.
    pub fn has_ready(&self, now: Instant) -> bool {
        !self.ready.is_empty() || self.delayed.peek().is_some_and(|d| d.deadline <= now)
    }

    /// Number of tasks runnable at `now`.
    pub fn runnable_count(&self, now: Instant) -> usize {
        self.ready.len() + self.delayed.iter().filter(|d| d.deadline <= now).count()
    }

    /// Deadline of the earliest delayed task.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.delayed.peek().map(|d| d.deadline)
    }

    /// Drop every task for which `keep` returns false.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        self.ready.retain(|t| keep(t));
        self.delayed.retain(|d| keep(&d.task));
    }

    pub fn len(&self) -> usize {
        self.ready.len() + self.delayed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty() && self.delayed.is_empty()
    }
}

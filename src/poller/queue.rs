//! Poll scheduling structures: a fixed ring of queries per poll interval and
//! the interval-keyed table that dispatches due queries.

use crate::config::ChannelConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("poll queue overflow")]
    Overflow,

    #[error("poll queue is empty")]
    Empty,

    #[error("queue with poll interval {0} ms is already registered")]
    DuplicateInterval(u64),

    #[error("poll table is empty")]
    EmptyTable,
}

/// A scheduled work unit: which channel to read and when it is due.
#[derive(Debug, Clone)]
pub struct PollQuery {
    pub channel: Arc<ChannelConfig>,
    pub deadline: Instant,
}

/// Successful poll: channel plus its decoded and converted value.
#[derive(Debug, Clone)]
pub struct PollResult {
    pub channel: Arc<ChannelConfig>,
    pub data: String,
}

/// Failed poll: channel plus a diagnostic.
#[derive(Debug, Clone)]
pub struct PollError {
    pub channel: Arc<ChannelConfig>,
    pub message: String,
}

/// Ring buffer of queries sharing one poll interval.
///
/// Capacity equals the initial population; every dispatched query is pushed
/// back immediately, so the ring can never overflow in normal operation.
#[derive(Debug)]
pub struct PollQueue {
    size: usize,
    start: usize,
    end: usize,
    empty: bool,
    buffer: Vec<Option<PollQuery>>,
}

impl PollQueue {
    /// Create an empty queue with the given capacity.
    pub fn with_capacity(size: usize) -> Self {
        let mut buffer = Vec::with_capacity(size);
        buffer.resize_with(size, || None);
        Self {
            size,
            start: 0,
            end: 0,
            empty: true,
            buffer,
        }
    }

    /// Create a queue sized exactly to the given queries.
    pub fn from_queries(queries: Vec<PollQuery>) -> Self {
        let mut queue = Self::with_capacity(queries.len());
        for query in queries {
            // cannot overflow: capacity matches the input
            let _ = queue.push(query);
        }
        queue
    }

    /// Append a query at the tail.
    pub fn push(&mut self, query: PollQuery) -> Result<(), QueueError> {
        if self.size == 0 || (!self.empty && self.start == self.end) {
            return Err(QueueError::Overflow);
        }
        self.buffer[self.end] = Some(query);
        self.end = (self.end + 1) % self.size;
        self.empty = false;
        Ok(())
    }

    /// Remove and return the head query.
    pub fn pop(&mut self) -> Result<PollQuery, QueueError> {
        if self.empty {
            return Err(QueueError::Empty);
        }
        let query = self.buffer[self.start].take().ok_or(QueueError::Empty)?;
        self.start = (self.start + 1) % self.size;
        self.empty = self.start == self.end;
        Ok(query)
    }

    /// Peek at the head query.
    pub fn head(&self) -> Result<&PollQuery, QueueError> {
        if self.empty {
            return Err(QueueError::Empty);
        }
        self.buffer[self.start].as_ref().ok_or(QueueError::Empty)
    }

    /// Whether the head query is due at `now` (inclusive).
    pub fn is_top_pending(&self, now: Instant) -> bool {
        match self.head() {
            Ok(head) => head.deadline <= now,
            Err(_) => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }
}

/// Set of poll queues keyed by interval.
///
/// Keeping one queue per interval avoids sorting and keeps channels with
/// equal intervals in FIFO order.
#[derive(Debug, Default)]
pub struct PollTable {
    queues: HashMap<u64, PollQueue>,
    /// Interval keys in ascending order, so more frequent pollers dispatch
    /// first within a tick.
    intervals: Vec<u64>,
}

impl PollTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a queue for an interval.
    pub fn add_queue(&mut self, queue: PollQueue, interval_ms: u64) -> Result<(), QueueError> {
        if self.queues.contains_key(&interval_ms) {
            return Err(QueueError::DuplicateInterval(interval_ms));
        }
        self.queues.insert(interval_ms, queue);
        self.intervals.push(interval_ms);
        self.intervals.sort_unstable();
        Ok(())
    }

    /// Dispatch every pending query into `out` and requeue it with a new
    /// deadline relative to this tick's `now`. Returns the dispatch count.
    pub async fn poll(&mut self, out: &mpsc::Sender<PollQuery>, now: Instant) -> usize {
        let mut count = 0;
        for &interval in &self.intervals {
            let queue = match self.queues.get_mut(&interval) {
                Some(queue) => queue,
                None => continue,
            };
            while queue.is_top_pending(now) {
                let mut head = match queue.pop() {
                    Ok(head) => head,
                    Err(_) => return count,
                };
                if out.send(head.clone()).await.is_err() {
                    // receivers are gone; shutdown is in progress
                    return count;
                }
                head.deadline = now + Duration::from_millis(interval);
                let _ = queue.push(head);
                count += 1;
            }
        }
        count
    }

    /// Earliest head deadline across all queues.
    pub fn next_poll_time(&self) -> Result<Instant, QueueError> {
        let mut next: Option<Instant> = None;
        for queue in self.queues.values() {
            if let Ok(head) = queue.head() {
                next = Some(match next {
                    Some(t) => t.min(head.deadline),
                    None => head.deadline,
                });
            }
        }
        next.ok_or(QueueError::EmptyTable)
    }
}

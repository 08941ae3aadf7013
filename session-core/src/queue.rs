//! Outbound request queue core.
//!
//! Pure bounded FIFO over [`QueuedRequest`] records:
//! - FIFO ordering for delivery
//! - FIFO eviction (oldest-first drop) when at capacity, so the queue never
//!   grows without bound
//! - Retry accounting with a hard cap per request
//!
//! The durable queue service in session-client wraps this structure with
//! persistence, connectivity observation, and the actual drain loop.

use std::collections::VecDeque;

use session_types::QueuedRequest;

/// Result of enqueueing a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The request was appended.
    Accepted,
    /// The request was appended and the oldest entry was evicted to make room.
    AcceptedEvicted(QueuedRequest),
}

/// Verdict after a delivery failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryVerdict {
    /// Retry budget remains; the request goes back to the front of the queue.
    Retry(QueuedRequest),
    /// Retry budget is spent; the request is dropped and must be reported.
    GiveUp(QueuedRequest),
}

/// Bounded FIFO queue of outbound requests.
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    capacity: usize,
    entries: VecDeque<QueuedRequest>,
}

impl OutboundQueue {
    /// Create an empty queue with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    /// Restore a queue from persisted entries.
    ///
    /// Entries beyond capacity are dropped oldest-first, same as live
    /// eviction.
    pub fn restore(capacity: usize, entries: Vec<QueuedRequest>) -> Self {
        let mut queue = Self::new(capacity);
        for entry in entries {
            queue.push(entry);
        }
        queue
    }

    /// Append a request, evicting the oldest entry when at capacity.
    pub fn push(&mut self, request: QueuedRequest) -> EnqueueOutcome {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(request);
        match evicted {
            Some(old) => EnqueueOutcome::AcceptedEvicted(old),
            None => EnqueueOutcome::Accepted,
        }
    }

    /// Remove and return the next request in FIFO order.
    pub fn pop_front(&mut self) -> Option<QueuedRequest> {
        self.entries.pop_front()
    }

    /// Peek at the next request without removing it.
    pub fn front(&self) -> Option<&QueuedRequest> {
        self.entries.front()
    }

    /// Put a request back at the front of the queue (failed delivery,
    /// retry budget remaining).
    pub fn push_front(&mut self, request: QueuedRequest) {
        self.entries.push_front(request);
    }

    /// Account a delivery failure: increments the retry count and decides
    /// whether the request may be retried.
    ///
    /// The caller is responsible for putting a [`RetryVerdict::Retry`]
    /// request back via [`push_front`](Self::push_front); a
    /// [`RetryVerdict::GiveUp`] request must be reported, never retried.
    pub fn record_failure(&self, mut request: QueuedRequest) -> RetryVerdict {
        request.retry_count = request.retry_count.saturating_add(1);
        if request.is_exhausted() {
            RetryVerdict::GiveUp(request)
        } else {
            RetryVerdict::Retry(request)
        }
    }

    /// Number of queued requests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// All entries in FIFO order, for persistence.
    pub fn snapshot(&self) -> Vec<QueuedRequest> {
        self.entries.iter().cloned().collect()
    }
}

//! Unbounded FIFO buffer between request discovery and the bounded request channel.
//!
//! A single page can yield hundreds of links at once. Analysis tasks push them
//! here without ever blocking, and the scheduler's feeder drains the cache into
//! the request channel at the rate the channel can absorb.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam::queue::SegQueue;

use crate::model::Request;

pub struct RequestCache {
    queue: SegQueue<Request>,
    closed: AtomicBool,
}

impl RequestCache {
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Appends a request. Returns `false` once the cache is closed.
    pub fn put(&self, request: Request) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        self.queue.push(request);
        true
    }

    /// Pops the oldest request; `None` when empty or closed. Never waits.
    pub fn get(&self) -> Option<Request> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn summary(&self) -> CacheSummary {
        CacheSummary {
            closed: self.is_closed(),
            len: self.len(),
        }
    }
}

impl Default for RequestCache {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CacheSummary {
    pub closed: bool,
    pub len: usize,
}

impl fmt::Display for CacheSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.closed { "closed" } else { "running" };
        write!(f, "status: {}, length: {}", status, self.len)
    }
}

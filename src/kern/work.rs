//! Deferred work
//!
//! The refill worker runs as a single deferred work item. A platform
//! provides a [`WorkScheduler`] that queues it; [`ManualScheduler`] only
//! records requests so hosts and tests decide when the item runs.
//!
//! Semantics of one work item:
//! - at most one execution is pending at any time
//! - `schedule_after` on a pending item is a no-op
//! - `schedule_now` on a pending item pulls it forward to "now"

use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

/// Queue for the single refill work item
pub trait WorkScheduler: Send + Sync {
    /// Run the item as soon as possible; returns false if it was already
    /// due immediately
    fn schedule_now(&self) -> bool;

    /// Run the item after `delay_ms`; returns false if already pending
    fn schedule_after(&self, delay_ms: u64) -> bool;
}

/// Scheduler that records the pending request
#[derive(Debug, Default)]
pub struct ManualScheduler {
    /// Delay of the pending request, if any
    pending: Mutex<Option<u64>>,
    requests: AtomicU64,
    coalesced: AtomicU64,
}

impl ManualScheduler {
    pub const fn new() -> Self {
        Self {
            pending: Mutex::new(None),
            requests: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        }
    }

    /// Delay of the pending request
    pub fn pending(&self) -> Option<u64> {
        *self.pending.lock()
    }

    /// Dequeue the pending request; the caller then runs the item
    pub fn take_pending(&self) -> Option<u64> {
        self.pending.lock().take()
    }

    /// Total scheduling calls
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Calls that found the item already pending
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }
}

impl WorkScheduler for ManualScheduler {
    fn schedule_now(&self) -> bool {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let mut pending = self.pending.lock();
        if *pending == Some(0) {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        *pending = Some(0);
        true
    }

    fn schedule_after(&self, delay_ms: u64) -> bool {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let mut pending = self.pending.lock();
        if pending.is_some() {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        *pending = Some(delay_ms);
        true
    }
}

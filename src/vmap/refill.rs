//! Refill worker
//!
//! Single deferred work item that tops the page cache back up to its
//! target. It is armed once at init, re-arms itself after every pass and is
//! pulled forward by the fault path when the cache runs low. Allocation
//! happens here, never in fault context.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU8, Ordering};
use log::{debug, warn};

use crate::kern::work::WorkScheduler;
use crate::vmap::manager::VmapStackManager;
use crate::vmap::page_cache::RefillOutcome;

/// Worker lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Not armed yet
    Idle = 0,
    /// Queued with the scheduler
    Pending = 1,
    /// Executing a pass
    Running = 2,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Pending,
            2 => Self::Running,
            _ => Self::Idle,
        }
    }
}

/// Deferred cache refill
pub struct RefillWorker {
    state: AtomicU8,
    scheduler: Arc<dyn WorkScheduler>,
    interval_ms: u64,
}

impl RefillWorker {
    pub fn new(scheduler: Arc<dyn WorkScheduler>, interval_ms: u64) -> Self {
        Self {
            state: AtomicU8::new(WorkerState::Idle as u8),
            scheduler,
            interval_ms,
        }
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Delay between passes
    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// Arm the first delayed pass
    pub fn start(&self) {
        let _ = self.state.compare_exchange(
            WorkerState::Idle as u8,
            WorkerState::Pending as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.scheduler.schedule_after(self.interval_ms);
    }

    /// Request an immediate pass; callable from fault context
    pub fn wakeup(&self) {
        let _ = self.state.compare_exchange(
            WorkerState::Idle as u8,
            WorkerState::Pending as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.scheduler.schedule_now();
    }

    /// Enter `Running`; fails if a pass is already executing
    fn begin(&self) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                (s != WorkerState::Running as u8).then_some(WorkerState::Running as u8)
            })
            .is_ok()
    }

    /// Leave `Running` and re-arm the next pass
    fn finish(&self) {
        self.state.store(WorkerState::Pending as u8, Ordering::Release);
        self.scheduler.schedule_after(self.interval_ms);
    }
}

impl core::fmt::Debug for RefillWorker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RefillWorker")
            .field("state", &self.state())
            .field("interval_ms", &self.interval_ms)
            .finish()
    }
}

impl VmapStackManager {
    /// Body of the refill work item; worker context, may block.
    pub fn run_refill(&self) -> RefillOutcome {
        if !self.refill.begin() {
            return RefillOutcome::Busy;
        }

        let outcome = self.cache.refill(self.cache.target());
        self.stats.refill_runs.inc();
        match outcome {
            RefillOutcome::Refilled { added } => {
                self.stats.refill_pages.add(added as u64);
                debug!("vmap stack cache refilled with {} pages", added);
            }
            RefillOutcome::Shortfall { added, missing } => {
                self.stats.refill_pages.add(added as u64);
                self.stats.refill_shortfalls.inc();
                warn!(
                    "vmap stack cache refill short by {} pages ({} added)",
                    missing, added
                );
            }
            RefillOutcome::Full | RefillOutcome::Busy => {}
        }

        self.refill.finish();
        outcome
    }
}

//! Host platform
//!
//! Software implementations of every platform service, bundled so a
//! manager can run outside a kernel: a software page table, heap-backed
//! frames, a manually driven scheduler and clock, a task table and a
//! backtrace sink that records what it was given.

use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use crate::arch::FaultContext;
use crate::kern::task::TaskTable;
use crate::kern::timer::ManualClock;
use crate::kern::work::ManualScheduler;
use crate::vmap::manager::{BacktraceSink, LogBacktrace, Platform};
use crate::vmap::page_cache::RefillOutcome;
use crate::vmap::pmap::SoftPmap;
use crate::vmap::vm_page::HeapFrameAllocator;
use crate::vmap::VmapStackManager;

/// Backtrace sink keeping every dump
#[derive(Debug, Default)]
pub struct RecordingBacktrace {
    dumps: Mutex<Vec<(FaultContext, Vec<usize>)>>,
}

impl RecordingBacktrace {
    pub const fn new() -> Self {
        Self {
            dumps: Mutex::new(Vec::new()),
        }
    }

    /// Number of dumps received
    pub fn dumps(&self) -> usize {
        self.dumps.lock().len()
    }

    /// Most recent dump
    pub fn last(&self) -> Option<(FaultContext, Vec<usize>)> {
        self.dumps.lock().last().cloned()
    }
}

impl BacktraceSink for RecordingBacktrace {
    fn dump(&self, ctx: &FaultContext, frames: &[usize]) {
        LogBacktrace.dump(ctx, frames);
        self.dumps.lock().push((*ctx, frames.to_vec()));
    }
}

/// Concrete handles to the host services
#[derive(Debug, Clone)]
pub struct HostPlatform {
    pub pmap: Arc<SoftPmap>,
    pub phys: Arc<HeapFrameAllocator>,
    pub scheduler: Arc<ManualScheduler>,
    pub tasks: Arc<TaskTable>,
    pub clock: Arc<ManualClock>,
    pub backtrace: Arc<RecordingBacktrace>,
}

impl HostPlatform {
    pub fn new() -> Self {
        Self::with_frame_limit(usize::MAX)
    }

    /// Host whose physical allocator stops after `frames` outstanding frames
    pub fn with_frame_limit(frames: usize) -> Self {
        Self {
            pmap: Arc::new(SoftPmap::new()),
            phys: Arc::new(HeapFrameAllocator::with_limit(frames)),
            scheduler: Arc::new(ManualScheduler::new()),
            tasks: Arc::new(TaskTable::new()),
            clock: Arc::new(ManualClock::new(0)),
            backtrace: Arc::new(RecordingBacktrace::new()),
        }
    }

    /// Trait-object view for [`VmapStackManager::new`]
    pub fn platform(&self) -> Platform {
        Platform {
            pmap: self.pmap.clone(),
            phys: self.phys.clone(),
            scheduler: self.scheduler.clone(),
            tasks: self.tasks.clone(),
            clock: self.clock.clone(),
            backtrace: self.backtrace.clone(),
        }
    }

    /// Run the refill item if it is queued
    pub fn run_pending_work(&self, mgr: &VmapStackManager) -> Option<RefillOutcome> {
        self.scheduler.take_pending()?;
        Some(mgr.run_refill())
    }
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::new()
    }
}

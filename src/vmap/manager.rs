//! vmap stack manager
//!
//! One [`VmapStackManager`] owns the arena, the slot bitmap, the page cache
//! and the background workers. Platform services come in through
//! [`Platform`]. The fault path lives in `vm_fault`, stack allocation in
//! `stack`, the workers in `refill` and `shrinker`; all of them are methods
//! on the manager.
//!
//! ## Lock Order
//!
//! The cache lock and the slot bitmap lock are never held together. Neither
//! is held while calling into the page tables or the physical allocator.

use alloc::sync::Arc;
use log::{info, warn};

use crate::arch::{walk_frame_pointers, FaultContext};
use crate::config::VmapConfig;
use crate::error::ConfigError;
use crate::kern::counters::VmapStats;
use crate::kern::task::TaskRegistry;
use crate::kern::timer::{Clock, RateLimit, RateVerdict};
use crate::kern::work::WorkScheduler;
use crate::vmap::arena::Arena;
use crate::vmap::page_cache::{PageCache, RefillOutcome};
use crate::vmap::pmap::PageTableBinder;
use crate::vmap::refill::RefillWorker;
use crate::vmap::shrinker::ReclaimShrinker;
use crate::vmap::slot_bitmap::SlotAllocator;
use crate::vmap::vm_fault::FaultClassifier;
use crate::vmap::vm_page::PhysAllocator;

// ============================================================================
// Platform Services
// ============================================================================

/// Receives stack dumps for near-overflow reports
pub trait BacktraceSink: Send + Sync {
    /// `frames` are return addresses from the frame-pointer chain
    fn dump(&self, ctx: &FaultContext, frames: &[usize]);
}

/// Backtrace sink that writes to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogBacktrace;

impl BacktraceSink for LogBacktrace {
    fn dump(&self, ctx: &FaultContext, frames: &[usize]) {
        warn!(
            "pc {:#x} sp {:#x} fp {:#x} addr {:#x}",
            ctx.program_counter, ctx.stack_pointer, ctx.frame_pointer, ctx.faulting_address
        );
        for (depth, ret) in frames.iter().enumerate() {
            warn!("  #{:<2} {:#x}", depth, ret);
        }
    }
}

/// Services the manager consumes
#[derive(Clone)]
pub struct Platform {
    pub pmap: Arc<dyn PageTableBinder>,
    pub phys: Arc<dyn PhysAllocator>,
    pub scheduler: Arc<dyn WorkScheduler>,
    pub tasks: Arc<dyn TaskRegistry>,
    pub clock: Arc<dyn Clock>,
    pub backtrace: Arc<dyn BacktraceSink>,
}

// ============================================================================
// Manager
// ============================================================================

/// Owner of all vmap stack state
pub struct VmapStackManager {
    pub(crate) config: VmapConfig,
    pub(crate) arena: Arena,
    pub(crate) slots: SlotAllocator,
    pub(crate) cache: PageCache,
    pub(crate) classifier: FaultClassifier,
    pub(crate) refill: RefillWorker,
    pub(crate) shrinker: ReclaimShrinker,
    pub(crate) stats: VmapStats,
    pub(crate) warn_limit: RateLimit,
    pub(crate) platform: Platform,
}

impl VmapStackManager {
    /// Build a manager; nothing is allocated from `platform.phys` yet
    pub fn new(config: VmapConfig, platform: Platform) -> Result<Self, ConfigError> {
        config.validate()?;
        let arena = Arena::from_config(&config);

        Ok(Self {
            arena,
            slots: SlotAllocator::new(config.max_tasks),
            cache: PageCache::new(config.cache_target, platform.phys.clone()),
            classifier: FaultClassifier::new(arena, &config),
            refill: RefillWorker::new(platform.scheduler.clone(), config.refill_interval_ms),
            shrinker: ReclaimShrinker::new(&config),
            stats: VmapStats::new(),
            warn_limit: RateLimit::new(config.warn_interval_ms, config.warn_burst),
            config,
            platform,
        })
    }

    /// Seed the page cache and arm the refill worker
    pub fn init(&self) -> RefillOutcome {
        let outcome = self.cache.prefill();
        if let RefillOutcome::Shortfall { added, missing } = outcome {
            warn!("vmap stack cache seeded with {} pages, {} short", added, missing);
        }
        self.refill.start();

        info!(
            "vmap stacks: {} slots of {} KiB at {:#x}..{:#x}, cache {} pages",
            self.arena.slots(),
            self.arena.stack_size() / 1024,
            self.arena.base(),
            self.arena.end(),
            self.cache.count()
        );
        outcome
    }

    pub fn config(&self) -> &VmapConfig {
        &self.config
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    pub fn slots(&self) -> &SlotAllocator {
        &self.slots
    }

    pub fn stats(&self) -> &VmapStats {
        &self.stats
    }

    pub fn refill_worker(&self) -> &RefillWorker {
        &self.refill
    }

    pub fn shrinker(&self) -> &ReclaimShrinker {
        &self.shrinker
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Pages currently mapped into stack slots
    pub fn vmap_stack_pages(&self) -> u64 {
        self.stats.mapped_pages.get()
    }

    /// `VmapStack: N kB` line for a meminfo-style report
    pub fn meminfo_line(&self) -> heapless::String<64> {
        self.stats.meminfo_line()
    }

    /// Log every counter at info level
    pub fn log_stats(&self) {
        for counter in self.stats.counters() {
            info!("vmap stack {}: {}", counter.name(), counter.get());
        }
    }

    /// Rate-limit gate for fault-path diagnostics
    pub(crate) fn warn_allowed(&self) -> bool {
        match self.warn_limit.check(self.platform.clock.now_ms()) {
            RateVerdict::Allow { suppressed } => {
                if suppressed > 0 {
                    warn!("{} vmap stack messages suppressed", suppressed);
                }
                true
            }
            RateVerdict::Deny => false,
        }
    }

    /// Wake the refill worker when the cache ran down to half its target
    pub(crate) fn note_cache_level(&self, remaining: usize) {
        if remaining <= self.cache.target() / 2 {
            self.refill.wakeup();
        }
    }

    pub(crate) fn dump_stack(&self, ctx: &FaultContext) {
        let pmap = &self.platform.pmap;
        let frames = walk_frame_pointers(ctx.frame_pointer, |addr| pmap.read_word(addr));
        self.platform.backtrace.dump(ctx, &frames);
    }
}

impl core::fmt::Debug for VmapStackManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VmapStackManager")
            .field("arena", &self.arena)
            .field("cache", &self.cache)
            .field("slots_in_use", &self.slots.in_use())
            .finish()
    }
}

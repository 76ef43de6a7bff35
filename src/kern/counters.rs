//! vmap stack counters
//!
//! Every manager owns one [`VmapStats`]. Counters are relaxed atomics; the
//! fault path only ever increments them. `mapped_pages` is the figure the
//! meminfo line reports.
//!
//! ## Counter Categories
//!
//! - **Mapping**: pages currently mapped into stack slots, live stacks
//! - **Fault**: serviced faults, frame-spill pre-maps, cache misses
//! - **Refill**: worker passes, pages added, shortfalls
//! - **Shrink**: passes, pages reclaimed

use core::fmt::Write;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::arch::PAGE_SIZE;

// ============================================================================
// Counter Type
// ============================================================================

/// Named counter (atomically updated)
#[derive(Debug)]
pub struct VmapCounter {
    value: AtomicU64,
    name: &'static str,
}

impl VmapCounter {
    /// Create a new counter
    pub const fn new(name: &'static str) -> Self {
        Self {
            value: AtomicU64::new(0),
            name,
        }
    }

    /// Increment counter by 1
    #[inline]
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment counter by n
    #[inline]
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Decrement counter by 1
    #[inline]
    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    /// Decrement counter by n
    #[inline]
    pub fn sub(&self, n: u64) {
        self.value.fetch_sub(n, Ordering::Relaxed);
    }

    /// Get current value
    #[inline]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Get counter name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Update max if current value is higher
    pub fn update_max(&self, current: u64) {
        self.value.fetch_max(current, Ordering::Relaxed);
    }
}

// ============================================================================
// Subsystem Counters
// ============================================================================

/// Counters of one vmap stack manager
#[derive(Debug)]
pub struct VmapStats {
    /// Pages currently mapped into stack slots
    pub mapped_pages: VmapCounter,
    /// Stacks currently allocated (vmap and fallback)
    pub stacks_live: VmapCounter,
    /// Highest `stacks_live` seen
    pub stacks_peak: VmapCounter,
    /// Stacks that had to use the ordinary allocator
    pub fallbacks: VmapCounter,
    /// Faults serviced with a cached page
    pub faults: VmapCounter,
    /// Faults serviced through the stack-pointer path outside the arena
    pub sp_faults: VmapCounter,
    /// Pages mapped ahead of an exception frame
    pub premaps: VmapCounter,
    /// Faults that found the cache empty
    pub cache_misses: VmapCounter,
    /// Faults where the binder refused the page
    pub bind_failures: VmapCounter,
    /// Faults on the lowest page of a slot
    pub near_overflows: VmapCounter,
    /// Refill worker passes
    pub refill_runs: VmapCounter,
    /// Pages added by the refill worker
    pub refill_pages: VmapCounter,
    /// Refill passes that could not reach the target
    pub refill_shortfalls: VmapCounter,
    /// Shrinker passes that scanned tasks
    pub shrink_passes: VmapCounter,
    /// Pages reclaimed by the shrinker
    pub shrink_pages: VmapCounter,
}

impl VmapStats {
    pub const fn new() -> Self {
        Self {
            mapped_pages: VmapCounter::new("mapped_pages"),
            stacks_live: VmapCounter::new("stacks_live"),
            stacks_peak: VmapCounter::new("stacks_peak"),
            fallbacks: VmapCounter::new("fallbacks"),
            faults: VmapCounter::new("faults"),
            sp_faults: VmapCounter::new("sp_faults"),
            premaps: VmapCounter::new("premaps"),
            cache_misses: VmapCounter::new("cache_misses"),
            bind_failures: VmapCounter::new("bind_failures"),
            near_overflows: VmapCounter::new("near_overflows"),
            refill_runs: VmapCounter::new("refill_runs"),
            refill_pages: VmapCounter::new("refill_pages"),
            refill_shortfalls: VmapCounter::new("refill_shortfalls"),
            shrink_passes: VmapCounter::new("shrink_passes"),
            shrink_pages: VmapCounter::new("shrink_pages"),
        }
    }

    /// Track stack allocation
    pub fn stack_allocated(&self) {
        self.stacks_live.inc();
        self.stacks_peak.update_max(self.stacks_live.get());
    }

    /// Track stack deallocation
    pub fn stack_freed(&self) {
        self.stacks_live.dec();
    }

    /// Take a snapshot of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            mapped_pages: self.mapped_pages.get(),
            stacks_live: self.stacks_live.get(),
            stacks_peak: self.stacks_peak.get(),
            fallbacks: self.fallbacks.get(),
            faults: self.faults.get(),
            sp_faults: self.sp_faults.get(),
            premaps: self.premaps.get(),
            cache_misses: self.cache_misses.get(),
            bind_failures: self.bind_failures.get(),
            near_overflows: self.near_overflows.get(),
            refill_runs: self.refill_runs.get(),
            refill_pages: self.refill_pages.get(),
            refill_shortfalls: self.refill_shortfalls.get(),
            shrink_passes: self.shrink_passes.get(),
            shrink_pages: self.shrink_pages.get(),
        }
    }

    /// Every counter, in report order
    pub fn counters(&self) -> [&VmapCounter; 15] {
        [
            &self.mapped_pages,
            &self.stacks_live,
            &self.stacks_peak,
            &self.fallbacks,
            &self.faults,
            &self.sp_faults,
            &self.premaps,
            &self.cache_misses,
            &self.bind_failures,
            &self.near_overflows,
            &self.refill_runs,
            &self.refill_pages,
            &self.refill_shortfalls,
            &self.shrink_passes,
            &self.shrink_pages,
        ]
    }

    /// Write one `name value` line per counter
    pub fn report(&self, out: &mut dyn Write) -> core::fmt::Result {
        for counter in self.counters() {
            writeln!(out, "{:<18} {}", counter.name(), counter.get())?;
        }
        Ok(())
    }

    /// `VmapStack:` line for a meminfo-style report
    pub fn meminfo_line(&self) -> heapless::String<64> {
        let mut line = heapless::String::new();
        let kib = self.mapped_pages.get() * (PAGE_SIZE as u64 / 1024);
        let _ = write!(line, "VmapStack:      {:>8} kB", kib);
        line
    }
}

/// Point-in-time copy of [`VmapStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub mapped_pages: u64,
    pub stacks_live: u64,
    pub stacks_peak: u64,
    pub fallbacks: u64,
    pub faults: u64,
    pub sp_faults: u64,
    pub premaps: u64,
    pub cache_misses: u64,
    pub bind_failures: u64,
    pub near_overflows: u64,
    pub refill_runs: u64,
    pub refill_pages: u64,
    pub refill_shortfalls: u64,
    pub shrink_passes: u64,
    pub shrink_pages: u64,
}

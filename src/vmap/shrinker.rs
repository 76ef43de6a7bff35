//! Stack shrinker
//!
//! Under memory pressure, pages deep below a sleeping task's saved stack
//! pointer are unlikely to be touched again soon. The shrinker walks every
//! task that is not on a CPU, finds the lowest mapped page of its stack
//! (the floor) and unmaps everything from the floor up to `shrink_threshold`
//! bytes below the saved stack pointer. If the task later grows back into
//! those pages it takes an ordinary stack fault.
//!
//! Passes are separated by a cool-down; a pass within the cool-down window
//! frees nothing.

use core::sync::atomic::{AtomicBool, Ordering};
use log::debug;
use spin::Mutex;

use crate::arch::PAGE_SIZE;
use crate::config::VmapConfig;
use crate::vmap::manager::VmapStackManager;
use crate::vmap::vm_page::trunc_page;

/// Result of a shrink pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShrinkOutcome {
    /// Shrinking is switched off
    Disabled,
    /// Previous pass was too recent
    Cooldown,
    /// Pass ran and freed this many pages
    Freed(usize),
}

impl ShrinkOutcome {
    /// Pages freed, as reported to the memory-pressure registry
    pub fn freed(self) -> usize {
        match self {
            ShrinkOutcome::Freed(n) => n,
            _ => 0,
        }
    }
}

/// Shrinker state
#[derive(Debug)]
pub struct ReclaimShrinker {
    enabled: AtomicBool,
    cooldown_ms: u64,
    threshold: usize,
    /// Time of the last pass that ran
    last_scan: Mutex<Option<u64>>,
}

impl ReclaimShrinker {
    pub fn new(config: &VmapConfig) -> Self {
        Self {
            enabled: AtomicBool::new(config.shrink_enabled),
            cooldown_ms: config.shrink_cooldown_ms,
            threshold: config.shrink_threshold,
            last_scan: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Switch the shrinker on or off at runtime
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Bytes kept mapped below a sleeping task's stack pointer
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Claim the pass at `now`; false within the cool-down window
    fn claim(&self, now: u64) -> bool {
        let mut last = self.last_scan.lock();
        if let Some(prev) = *last {
            if now.saturating_sub(prev) < self.cooldown_ms {
                return false;
            }
        }
        *last = Some(now);
        true
    }
}

impl VmapStackManager {
    /// Pages the shrinker could look at; always cheap and safe
    pub fn shrink_count(&self) -> usize {
        if !self.shrinker.is_enabled() {
            return 0;
        }
        self.stats.mapped_pages.get() as usize
    }

    /// Free up to `nr_to_scan` idle stack pages
    pub fn shrink_scan(&self, nr_to_scan: usize) -> ShrinkOutcome {
        if !self.shrinker.is_enabled() {
            return ShrinkOutcome::Disabled;
        }
        // A zero budget must not start the cool-down
        if nr_to_scan == 0 {
            return ShrinkOutcome::Freed(0);
        }
        if !self.shrinker.claim(self.platform.clock.now_ms()) {
            return ShrinkOutcome::Cooldown;
        }
        self.stats.shrink_passes.inc();

        let threshold = self.shrinker.threshold();
        let mut budget = nr_to_scan;
        let mut freed = 0;

        self.platform.tasks.for_each_task(&mut |task| {
            if budget == 0 || task.running {
                return;
            }
            let sp = task.stack_pointer;
            // Fallback stacks and tasks that never ran have no arena sp
            let Some(slot) = self.arena.slot_of(sp) else {
                return;
            };

            let n = self.shrink_stack(self.arena.slot_base(slot), sp, threshold, budget);
            if n > 0 {
                debug!("reclaimed {} stack pages from task {} ({})", n, task.id, task.name);
            }
            budget -= n;
            freed += n;
        });

        self.stats.shrink_pages.add(freed as u64);
        ShrinkOutcome::Freed(freed)
    }

    /// Unmap `[floor, sp - threshold)` of one stack, at most `budget` pages
    fn shrink_stack(&self, slot_base: usize, sp: usize, threshold: usize, budget: usize) -> usize {
        let pmap = &self.platform.pmap;

        let mut floor = trunc_page(sp);
        while floor > slot_base && pmap.is_mapped(floor - PAGE_SIZE) {
            floor -= PAGE_SIZE;
        }

        if sp - floor <= threshold {
            return 0;
        }
        let limit = trunc_page(sp - threshold);

        let mut freed = 0;
        let mut va = floor;
        while va < limit && freed < budget {
            if let Some(page) = pmap.unbind(va) {
                self.cache.give_back(page, self.cache.target());
                self.stats.mapped_pages.dec();
                freed += 1;
            }
            va += PAGE_SIZE;
        }
        freed
    }
}

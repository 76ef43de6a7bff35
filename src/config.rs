//! vmap stack configuration
//!
//! Defaults follow the arm64 layout the subsystem was tuned for: 16 KiB
//! stacks, 4096 slots and a 32-page cache. Everything else is derived from
//! a [`VmapConfig`] at manager construction.

use crate::arch::PAGE_SIZE;
use crate::error::ConfigError;

// ============================================================================
// Constants
// ============================================================================

/// Default stack size (THREAD_SIZE)
pub const DEFAULT_STACK_SIZE: usize = 4 * PAGE_SIZE;

/// Default number of arena slots
pub const DEFAULT_MAX_TASKS: usize = 4096;

/// Cache target expressed as an allocation order
pub const VMAP_CACHE_PAGE_ORDER: u32 = 5;

/// Default page cache target
pub const DEFAULT_CACHE_TARGET: usize = 1 << VMAP_CACHE_PAGE_ORDER;

/// Delay between refill worker passes (ms)
pub const DEFAULT_REFILL_INTERVAL_MS: u64 = 1000;

/// Minimum time between two shrinker passes (ms)
pub const DEFAULT_SHRINK_COOLDOWN_MS: u64 = 1000;

/// Stack kept mapped below a sleeping task's stack pointer
pub const DEFAULT_SHRINK_THRESHOLD: usize = PAGE_SIZE + 1024;

/// Fault-path warning rate limit window (ms)
pub const DEFAULT_WARN_INTERVAL_MS: u64 = 5000;

/// Fault-path warnings allowed per window
pub const DEFAULT_WARN_BURST: u32 = 10;

/// Default arena base
#[cfg(target_pointer_width = "64")]
pub const DEFAULT_ARENA_BASE: usize = 0xffff_ff80_0000_0000;

#[cfg(not(target_pointer_width = "64"))]
pub const DEFAULT_ARENA_BASE: usize = 0xe000_0000;

// ============================================================================
// Configuration
// ============================================================================

/// Runtime configuration of a vmap stack manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmapConfig {
    /// First address of the arena
    pub arena_base: usize,
    /// Bytes per stack slot
    pub stack_size: usize,
    /// Number of slots in the arena
    pub max_tasks: usize,
    /// Pages the cache is kept topped up to
    pub cache_target: usize,
    /// Delay between refill worker passes (ms)
    pub refill_interval_ms: u64,
    /// Minimum time between shrinker passes (ms)
    pub shrink_cooldown_ms: u64,
    /// Bytes kept mapped below a sleeping task's stack pointer
    pub shrink_threshold: usize,
    /// Whether the shrinker runs at all
    pub shrink_enabled: bool,
    /// Report faults on the lowest page of a slot (stacks span pages)
    pub multi_page_stacks: bool,
    /// Service stack-pointer-relative faults outside the arena
    pub sp_fault_recovery: bool,
    /// Fault-path warning rate limit window (ms)
    pub warn_interval_ms: u64,
    /// Fault-path warnings allowed per window
    pub warn_burst: u32,
}

impl VmapConfig {
    /// Default configuration
    pub const fn new() -> Self {
        Self {
            arena_base: DEFAULT_ARENA_BASE,
            stack_size: DEFAULT_STACK_SIZE,
            max_tasks: DEFAULT_MAX_TASKS,
            cache_target: DEFAULT_CACHE_TARGET,
            refill_interval_ms: DEFAULT_REFILL_INTERVAL_MS,
            shrink_cooldown_ms: DEFAULT_SHRINK_COOLDOWN_MS,
            shrink_threshold: DEFAULT_SHRINK_THRESHOLD,
            shrink_enabled: true,
            multi_page_stacks: DEFAULT_STACK_SIZE > PAGE_SIZE,
            sp_fault_recovery: true,
            warn_interval_ms: DEFAULT_WARN_INTERVAL_MS,
            warn_burst: DEFAULT_WARN_BURST,
        }
    }

    /// Set arena geometry; `multi_page_stacks` follows the stack size
    pub const fn with_arena(mut self, base: usize, stack_size: usize, max_tasks: usize) -> Self {
        self.arena_base = base;
        self.stack_size = stack_size;
        self.max_tasks = max_tasks;
        self.multi_page_stacks = stack_size > PAGE_SIZE;
        self
    }

    /// Set the cache target
    pub const fn with_cache_target(mut self, pages: usize) -> Self {
        self.cache_target = pages;
        self
    }

    /// Set the shrinker cool-down
    pub const fn with_shrink_cooldown(mut self, ms: u64) -> Self {
        self.shrink_cooldown_ms = ms;
        self
    }

    /// Pages per stack slot
    pub const fn pages_per_stack(&self) -> usize {
        self.stack_size / PAGE_SIZE
    }

    /// Arena size in bytes, if it fits
    pub fn arena_size(&self) -> Option<usize> {
        self.max_tasks.checked_mul(self.stack_size)
    }

    /// Check the configuration for consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stack_size < PAGE_SIZE
            || !self.stack_size.is_power_of_two()
            || self.stack_size % PAGE_SIZE != 0
        {
            return Err(ConfigError::BadStackSize(self.stack_size));
        }
        if self.arena_base % self.stack_size != 0 {
            return Err(ConfigError::UnalignedArena(self.arena_base));
        }
        if self.max_tasks == 0 {
            return Err(ConfigError::NoSlots);
        }
        if self.cache_target == 0 {
            return Err(ConfigError::NoCache);
        }
        self.arena_size()
            .and_then(|size| self.arena_base.checked_add(size))
            .ok_or(ConfigError::ArenaOverflow)?;
        Ok(())
    }
}

impl Default for VmapConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = VmapConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.pages_per_stack(), 4);
        assert_eq!(config.cache_target, 32);
        assert!(config.multi_page_stacks);
    }

    #[test]
    fn test_with_arena_tracks_multi_page() {
        let config = VmapConfig::new().with_arena(0x10_0000, PAGE_SIZE, 8);
        assert!(!config.multi_page_stacks);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_rejects_bad_geometry() {
        let config = VmapConfig::new().with_arena(0x10_0000, 3 * PAGE_SIZE, 8);
        assert_eq!(config.validate(), Err(ConfigError::BadStackSize(3 * PAGE_SIZE)));

        let config = VmapConfig::new().with_arena(0x10_1000, 4 * PAGE_SIZE, 8);
        assert_eq!(config.validate(), Err(ConfigError::UnalignedArena(0x10_1000)));

        let config = VmapConfig::new().with_arena(0x10_0000, 4 * PAGE_SIZE, 0);
        assert_eq!(config.validate(), Err(ConfigError::NoSlots));

        let config = VmapConfig::new().with_cache_target(0);
        assert_eq!(config.validate(), Err(ConfigError::NoCache));

        let config = VmapConfig::new().with_arena(usize::MAX - 0xffff, 0x10000, 2);
        assert_eq!(config.validate(), Err(ConfigError::ArenaOverflow));
    }
}

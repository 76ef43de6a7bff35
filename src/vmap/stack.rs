//! Stack lifecycle
//!
//! `allocate_stack` reserves a slot and maps only its top page; the rest of
//! the slot is populated by faults. When every slot is taken the stack
//! comes from the ordinary allocator instead. `free_stack` unmaps whatever
//! the stack grew to and releases the slot.

use log::{error, warn};

use crate::arch::PAGE_SIZE;
use crate::error::{BindError, StackError};
use crate::types::SlotIndex;
use crate::vmap::manager::VmapStackManager;
use crate::vmap::pmap::BindFailure;
use crate::vmap::vm_page::FallbackStack;

/// A stack living in an arena slot
#[derive(Debug, PartialEq, Eq)]
pub struct VmapStack {
    slot: SlotIndex,
    base: usize,
    size: usize,
}

impl VmapStack {
    pub fn slot(&self) -> SlotIndex {
        self.slot
    }
}

/// A task's kernel stack
#[derive(Debug)]
pub enum StackHandle {
    /// Paged on demand inside the arena
    Vmap(VmapStack),
    /// Fully backed ordinary allocation
    Fallback(FallbackStack),
}

impl StackHandle {
    /// Lowest address of the stack
    pub fn base(&self) -> usize {
        match self {
            StackHandle::Vmap(stack) => stack.base,
            StackHandle::Fallback(stack) => stack.base(),
        }
    }

    pub fn size(&self) -> usize {
        match self {
            StackHandle::Vmap(stack) => stack.size,
            StackHandle::Fallback(stack) => stack.size(),
        }
    }

    /// Initial stack pointer
    pub fn top(&self) -> usize {
        self.base() + self.size()
    }

    /// Arena slot, for vmap stacks
    pub fn slot(&self) -> Option<SlotIndex> {
        match self {
            StackHandle::Vmap(stack) => Some(stack.slot),
            StackHandle::Fallback(_) => None,
        }
    }

    pub fn is_vmap(&self) -> bool {
        matches!(self, StackHandle::Vmap(_))
    }
}

impl VmapStackManager {
    /// Allocate a kernel stack for a new task; may block.
    pub fn allocate_stack(&self) -> Result<StackHandle, StackError> {
        let Some(slot) = self.slots.reserve() else {
            return self.allocate_fallback();
        };

        let page = match self.cache.try_take() {
            Some((page, remaining)) => {
                self.note_cache_level(remaining);
                page
            }
            None => match self.platform.phys.alloc_zeroed() {
                Some(page) => page,
                None => {
                    self.slots.release(slot);
                    error!("no page for first page of stack slot {}", slot);
                    return Err(StackError::OutOfMemory);
                }
            },
        };

        let va = self.arena.first_page(slot);
        let bound = match self.platform.pmap.bind(va, page) {
            Err(BindFailure {
                page,
                error: BindError::AlreadyMapped,
            }) => {
                self.reclaim_stale_page(va, slot);
                self.platform.pmap.bind(va, page)
            }
            bound => bound,
        };
        if let Err(BindFailure { page, error }) = bound {
            self.cache.give_back(page, self.cache.target());
            self.slots.release(slot);
            error!("mapping stack page {:#x} failed: {}", va, error);
            return Err(error.into());
        }

        self.stats.mapped_pages.inc();
        self.stats.stack_allocated();
        Ok(StackHandle::Vmap(VmapStack {
            slot,
            base: self.arena.slot_base(slot),
            size: self.arena.stack_size(),
        }))
    }

    /// Drop a mapping a fault left in the slot while it was free
    fn reclaim_stale_page(&self, va: usize, slot: SlotIndex) {
        if let Some(stale) = self.platform.pmap.unbind(va) {
            self.cache.give_back(stale, self.cache.target());
            self.stats.mapped_pages.dec();
            warn!("stale mapping at {:#x} in free stack slot {}", va, slot);
        }
    }

    fn allocate_fallback(&self) -> Result<StackHandle, StackError> {
        warn!(
            "vmap stack arena full ({} slots), using ordinary allocation",
            self.arena.slots()
        );
        let stack = self
            .platform
            .phys
            .alloc_stack(self.arena.stack_size())
            .ok_or(StackError::OutOfMemory)?;
        self.stats.fallbacks.inc();
        self.stats.stack_allocated();
        Ok(StackHandle::Fallback(stack))
    }

    /// Free a stack from [`VmapStackManager::allocate_stack`].
    ///
    /// The caller guarantees no fault on this stack is in flight.
    pub fn free_stack(&self, handle: StackHandle) {
        match handle {
            StackHandle::Fallback(stack) => {
                self.platform.phys.free_stack(stack);
            }
            StackHandle::Vmap(stack) => {
                let mut unmapped = 0;
                for va in self.arena.pages_top_down(stack.slot) {
                    if let Some(page) = self.platform.pmap.unbind(va) {
                        self.cache.give_back(page, self.cache.target());
                        unmapped += 1;
                    }
                }
                self.stats.mapped_pages.sub(unmapped);
                self.slots.release(stack.slot);
            }
        }
        self.stats.stack_freed();
    }

    /// Pages of the stack currently backed by memory
    pub fn mapped_pages(&self, handle: &StackHandle) -> usize {
        match handle {
            StackHandle::Vmap(stack) => self
                .arena
                .pages_top_down(stack.slot)
                .filter(|&va| self.platform.pmap.is_mapped(va))
                .count(),
            StackHandle::Fallback(stack) => stack.size() / PAGE_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vmap::pmap::PageTableBinder;
    use crate::arch::FaultContext;
    use crate::config::VmapConfig;
    use crate::host::HostPlatform;

    const BASE: usize = 0x4000_0000;

    fn setup(slots: usize, cache: usize) -> (HostPlatform, VmapStackManager) {
        let host = HostPlatform::new();
        let config = VmapConfig::new()
            .with_arena(BASE, 4 * PAGE_SIZE, slots)
            .with_cache_target(cache);
        let mgr = VmapStackManager::new(config, host.platform()).unwrap();
        mgr.init();
        (host, mgr)
    }

    #[test]
    fn test_allocate_maps_top_page() {
        let (host, mgr) = setup(4, 8);
        let stack = mgr.allocate_stack().unwrap();

        assert!(stack.is_vmap());
        assert_eq!(stack.slot(), Some(SlotIndex(0)));
        assert_eq!(stack.base(), BASE);
        assert_eq!(stack.top(), BASE + 4 * PAGE_SIZE);
        assert!(host.pmap.is_mapped(stack.top() - PAGE_SIZE));
        assert!(!host.pmap.is_mapped(stack.base()));
        assert_eq!(mgr.mapped_pages(&stack), 1);
        assert_eq!(mgr.vmap_stack_pages(), 1);
        assert_eq!(mgr.cache().count(), 7);
    }

    #[test]
    fn test_free_returns_every_page() {
        let (host, mgr) = setup(4, 8);
        let stack = mgr.allocate_stack().unwrap();
        let base = stack.base();
        mgr.handle_fault(&FaultContext::new(base + 2 * PAGE_SIZE)).unwrap();
        mgr.handle_fault(&FaultContext::new(base + PAGE_SIZE)).unwrap();
        assert_eq!(mgr.mapped_pages(&stack), 3);

        mgr.free_stack(stack);
        assert_eq!(host.pmap.mapped_in(base..base + 4 * PAGE_SIZE), 0);
        assert_eq!(mgr.vmap_stack_pages(), 0);
        assert_eq!(mgr.cache().count(), 8);
        assert_eq!(mgr.slots().in_use(), 0);
        assert_eq!(mgr.stats().stacks_live.get(), 0);
    }

    #[test]
    fn test_free_over_cap_releases_to_allocator() {
        let (host, mgr) = setup(4, 2);
        let stack = mgr.allocate_stack().unwrap();
        let base = stack.base();
        mgr.handle_fault(&FaultContext::new(base + 2 * PAGE_SIZE)).unwrap();
        mgr.run_refill();
        assert_eq!(mgr.cache().count(), 2);

        mgr.free_stack(stack);
        assert_eq!(mgr.cache().count(), 2);
        // Only the cache is still holding frames
        assert_eq!(host.phys.outstanding(), 2);
    }

    #[test]
    fn test_arena_full_falls_back() {
        let (host, mgr) = setup(1, 4);
        let first = mgr.allocate_stack().unwrap();
        let second = mgr.allocate_stack().unwrap();

        assert!(!second.is_vmap());
        assert_eq!(second.slot(), None);
        assert_eq!(second.size(), 4 * PAGE_SIZE);
        assert_eq!(mgr.mapped_pages(&second), 4);
        assert_eq!(mgr.stats().fallbacks.get(), 1);

        let outstanding = host.phys.outstanding();
        mgr.free_stack(second);
        assert_eq!(host.phys.outstanding(), outstanding - 4);
        mgr.free_stack(first);
        assert!(mgr.allocate_stack().unwrap().is_vmap());
    }

    #[test]
    fn test_allocate_without_cache_uses_allocator() {
        let (host, mgr) = setup(4, 4);
        mgr.cache().drain();
        let stack = mgr.allocate_stack().unwrap();
        assert_eq!(mgr.mapped_pages(&stack), 1);
        assert_eq!(host.phys.outstanding(), 1);
    }

    #[test]
    fn test_allocate_failure_releases_slot() {
        let (host, mgr) = setup(4, 4);
        mgr.cache().drain();
        host.phys.set_limit(0);
        assert_eq!(mgr.allocate_stack().unwrap_err(), StackError::OutOfMemory);
        assert_eq!(mgr.slots().in_use(), 0);

        host.phys.set_limit(usize::MAX);
        mgr.run_refill();
        host.pmap.fail_next_binds(1);
        assert_eq!(
            mgr.allocate_stack().unwrap_err(),
            StackError::PageTableBindFailed(BindError::TableAllocFailed)
        );
        assert_eq!(mgr.slots().in_use(), 0);
        assert_eq!(mgr.cache().count(), 4);
        assert_eq!(mgr.vmap_stack_pages(), 0);
    }

    #[test]
    fn test_allocate_over_stale_mapping() {
        let (host, mgr) = setup(4, 8);
        // A late access to a stack that already exited faults in its old
        // top page while the slot is free
        let stale = BASE + 3 * PAGE_SIZE + 0x10;
        assert_eq!(mgr.handle_fault(&FaultContext::new(stale)), Ok(()));
        assert_eq!(mgr.vmap_stack_pages(), 1);
        assert_eq!(mgr.slots().in_use(), 0);

        let stack = mgr.allocate_stack().unwrap();
        assert_eq!(stack.slot(), Some(SlotIndex(0)));
        assert_eq!(mgr.mapped_pages(&stack), 1);
        assert_eq!(mgr.vmap_stack_pages(), 1);

        // Later allocations are unaffected
        let next = mgr.allocate_stack().unwrap();
        assert_eq!(next.slot(), Some(SlotIndex(1)));

        mgr.free_stack(stack);
        mgr.free_stack(next);
        assert_eq!(mgr.vmap_stack_pages(), 0);
        assert_eq!(host.pmap.mapped_count(), 0);
        assert_eq!(host.phys.outstanding(), mgr.cache().count());
    }
}

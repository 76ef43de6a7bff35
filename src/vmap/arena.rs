//! Virtual arena of stack slots
//!
//! Slot `i` spans `[base + i * stack_size, base + (i + 1) * stack_size)`.
//! Stacks grow down, so the page mapped at allocation is the slot's top
//! page and the lowest page is the last one a stack can reach.

use crate::arch::PAGE_SIZE;
use crate::config::VmapConfig;
use crate::types::SlotIndex;

/// Immutable arena geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arena {
    base: usize,
    stack_size: usize,
    slots: usize,
}

impl Arena {
    /// Geometry of a validated configuration
    pub(crate) fn from_config(config: &VmapConfig) -> Self {
        Self {
            base: config.arena_base,
            stack_size: config.stack_size,
            slots: config.max_tasks,
        }
    }

    pub fn base(&self) -> usize {
        self.base
    }

    /// One past the last arena address
    pub fn end(&self) -> usize {
        self.base + self.slots * self.stack_size
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn pages_per_stack(&self) -> usize {
        self.stack_size / PAGE_SIZE
    }

    /// Check if address is inside the arena
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.end()
    }

    /// Slot containing `addr`
    pub fn slot_of(&self, addr: usize) -> Option<SlotIndex> {
        self.contains(addr)
            .then(|| SlotIndex((addr - self.base) / self.stack_size))
    }

    /// Lowest address of a slot
    pub fn slot_base(&self, slot: SlotIndex) -> usize {
        self.base + slot.index() * self.stack_size
    }

    /// Page mapped when the stack is allocated
    pub fn first_page(&self, slot: SlotIndex) -> usize {
        self.slot_base(slot) + self.stack_size - PAGE_SIZE
    }

    /// Whether `page` is the lowest page of its slot
    pub fn is_lowest_page(&self, page: usize) -> bool {
        (page - self.base) % self.stack_size == 0
    }

    /// Pages of a slot from the top down
    pub fn pages_top_down(&self, slot: SlotIndex) -> impl Iterator<Item = usize> {
        let base = self.slot_base(slot);
        (0..self.pages_per_stack())
            .rev()
            .map(move |i| base + i * PAGE_SIZE)
    }
}

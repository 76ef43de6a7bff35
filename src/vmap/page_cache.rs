//! Cache of pre-zeroed pages for the fault path
//!
//! The fault handler cannot allocate, so it takes pages from this cache.
//! Every page in the list is zeroed. The list lock is a spin lock that is
//! never held across allocation or zeroing; the refill worker allocates
//! outside it and only pushes under it.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use spin::Mutex;

use crate::vmap::vm_page::{Page, PhysAllocator};

/// Result of a refill pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefillOutcome {
    /// Cache was already at target
    Full,
    /// Cache reached target after adding pages
    Refilled { added: usize },
    /// Physical allocation failed before reaching target
    Shortfall { added: usize, missing: usize },
    /// Another refill pass is running
    Busy,
}

/// Bounded free list of zeroed pages
pub struct PageCache {
    pages: Mutex<VecDeque<Page>>,
    phys: Arc<dyn PhysAllocator>,
    target: usize,
}

impl PageCache {
    /// Empty cache that refills to `target` pages
    pub fn new(target: usize, phys: Arc<dyn PhysAllocator>) -> Self {
        Self {
            // Pushes up to the target never reallocate
            pages: Mutex::new(VecDeque::with_capacity(target)),
            phys,
            target,
        }
    }

    /// Configured target (and give-back cap)
    pub fn target(&self) -> usize {
        self.target
    }

    /// Pages currently cached
    pub fn count(&self) -> usize {
        self.pages.lock().len()
    }

    /// Take one page and report how many remain; never blocks on memory
    pub fn try_take(&self) -> Option<(Page, usize)> {
        let mut pages = self.pages.lock();
        let page = pages.pop_front()?;
        Some((page, pages.len()))
    }

    /// Return a page; pages beyond `cap` go back to the physical allocator.
    ///
    /// Returns whether the page was cached.
    pub fn give_back(&self, mut page: Page, cap: usize) -> bool {
        let cap = cap.min(self.target);
        // Cheap pre-check so a full cache does not pay for zeroing
        if self.count() >= cap {
            self.phys.free(page);
            return false;
        }

        page.zero();
        let mut pages = self.pages.lock();
        if pages.len() < cap {
            pages.push_back(page);
            return true;
        }
        drop(pages);
        self.phys.free(page);
        false
    }

    /// Allocate pages until the cache holds `target`.
    ///
    /// May block in the physical allocator; worker context only.
    pub fn refill(&self, target: usize) -> RefillOutcome {
        let target = target.min(self.target);
        let mut added = 0;

        loop {
            let count = self.count();
            if count >= target {
                break;
            }

            let Some(mut page) = self.phys.alloc_zeroed() else {
                return RefillOutcome::Shortfall {
                    added,
                    missing: target - count,
                };
            };
            if !page.is_zeroed() {
                page.zero();
            }

            let mut pages = self.pages.lock();
            if pages.len() >= target {
                // A concurrent give_back filled the gap
                drop(pages);
                self.phys.free(page);
                break;
            }
            pages.push_back(page);
            added += 1;
        }

        if added == 0 {
            RefillOutcome::Full
        } else {
            RefillOutcome::Refilled { added }
        }
    }

    /// Seed the cache to its target at init
    pub fn prefill(&self) -> RefillOutcome {
        self.refill(self.target)
    }

    /// Release every cached page to the physical allocator
    pub fn drain(&self) -> usize {
        let drained = core::mem::take(&mut *self.pages.lock());
        let n = drained.len();
        for page in drained {
            self.phys.free(page);
        }
        n
    }
}

impl core::fmt::Debug for PageCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PageCache")
            .field("count", &self.count())
            .field("target", &self.target)
            .finish()
    }
}

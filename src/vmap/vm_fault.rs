//! VM Fault - on-demand stack page faults
//!
//! A kernel stack grows into an unmapped page of its slot; the resulting
//! translation fault ends up in [`VmapStackManager::handle_fault`]. The
//! handler runs in exception context: it may not sleep or allocate, so the
//! page comes from the pre-zeroed cache and the cache is topped up later by
//! the refill worker.
//!
//! ## Fault Dispositions
//!
//! - **InArena**: the address is inside the stack arena
//! - **StackGrowthOutsideArena**: the exception frame about to be pushed
//!   below the interrupted stack pointer lands on an unmapped page outside
//!   the arena
//! - **Unhandled**: anything else; the caller takes its usual path
//!
//! After servicing an in-arena fault the handler also maps the page an
//! exception frame would spill onto, so returning from the exception does
//! not immediately fault again.

use log::{debug, error, trace, warn};

use crate::arch::{FaultContext, FRAME_SIZE, PAGE_SIZE};
use crate::config::VmapConfig;
use crate::error::{BindError, FaultError};
use crate::types::SlotIndex;
use crate::vmap::arena::Arena;
use crate::vmap::manager::VmapStackManager;
use crate::vmap::pmap::{BindFailure, PageTableBinder};
use crate::vmap::vm_page::trunc_page;

// ============================================================================
// Classification
// ============================================================================

/// What a translation fault means to the stack manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Fault inside a stack slot
    InArena {
        slot: SlotIndex,
        /// Page-aligned faulting address
        page: usize,
        /// Lowest page of the slot hit with the page above it unmapped
        near_overflow: bool,
    },
    /// Exception frame spill outside the arena
    StackGrowthOutsideArena { page: usize },
    /// Not a stack fault
    Unhandled,
}

/// Pure decision over a fault context and the current page tables
#[derive(Debug, Clone, Copy)]
pub struct FaultClassifier {
    arena: Arena,
    multi_page_stacks: bool,
    sp_fault_recovery: bool,
}

impl FaultClassifier {
    pub fn new(arena: Arena, config: &VmapConfig) -> Self {
        Self {
            arena,
            multi_page_stacks: config.multi_page_stacks,
            sp_fault_recovery: config.sp_fault_recovery,
        }
    }

    pub fn classify(&self, ctx: &FaultContext, pmap: &dyn PageTableBinder) -> Disposition {
        let addr = ctx.faulting_address;
        let page = trunc_page(addr);

        if let Some(slot) = self.arena.slot_of(addr) {
            let near_overflow = self.multi_page_stacks
                && self.arena.is_lowest_page(page)
                && !pmap.is_mapped(page + PAGE_SIZE);
            return Disposition::InArena {
                slot,
                page,
                near_overflow,
            };
        }

        if self.sp_fault_recovery {
            if let Some(spill) = frame_spill_page(ctx.stack_pointer) {
                if spill == page && !pmap.is_mapped(spill) {
                    return Disposition::StackGrowthOutsideArena { page };
                }
            }
        }

        Disposition::Unhandled
    }
}

/// Page an exception frame pushed at `sp` would spill onto, if it crosses
/// out of `sp`'s page
fn frame_spill_page(sp: usize) -> Option<usize> {
    if sp == 0 {
        return None;
    }
    let spill = trunc_page(sp.checked_sub(FRAME_SIZE)?);
    (spill != trunc_page(sp)).then_some(spill)
}

// ============================================================================
// Fault Handler
// ============================================================================

impl VmapStackManager {
    /// Resolve a kernel translation fault.
    ///
    /// Exception context: never sleeps or allocates. `Err(NotOurs)` means
    /// the fault is for the caller's regular handling; any other error is
    /// an unresolvable stack fault.
    pub fn handle_fault(&self, ctx: &FaultContext) -> Result<(), FaultError> {
        let addr = ctx.faulting_address;
        let pmap = self.platform.pmap.as_ref();

        match self.classifier.classify(ctx, pmap) {
            Disposition::InArena {
                slot,
                page,
                near_overflow,
            } => {
                if near_overflow {
                    self.report_near_overflow(ctx, slot);
                }
                // Another CPU mapped it first
                if pmap.is_mapped(page) {
                    trace!("fault at {:#x} already resolved", addr);
                    return Ok(());
                }

                self.service_page(page, addr)?;
                self.stats.faults.inc();
                trace!("mapped stack page {:#x} in slot {}", page, slot);

                self.premap_frame_spill(ctx);
                Ok(())
            }
            Disposition::StackGrowthOutsideArena { page } => {
                self.service_page(page, addr)?;
                self.stats.sp_faults.inc();
                debug!("mapped frame spill page {:#x} below sp {:#x}", page, ctx.stack_pointer);
                Ok(())
            }
            Disposition::Unhandled => {
                self.premap_frame_spill(ctx);
                Err(FaultError::NotOurs { addr })
            }
        }
    }

    /// Map one cached page at `page`
    fn service_page(&self, page: usize, addr: usize) -> Result<(), FaultError> {
        let Some((frame, remaining)) = self.cache.try_take() else {
            self.stats.cache_misses.inc();
            self.refill.wakeup();
            if self.warn_allowed() {
                error!("no cached page for stack fault at {:#x}", addr);
            }
            return Err(FaultError::OutOfCacheMemory { addr });
        };

        match self.platform.pmap.bind(page, frame) {
            Ok(()) => {}
            Err(BindFailure {
                page: frame,
                error: BindError::AlreadyMapped,
            }) => {
                // Lost a race to another CPU; its mapping serves this fault
                self.cache.give_back(frame, self.cache.target());
                return Ok(());
            }
            Err(BindFailure { page: frame, error }) => {
                self.stats.bind_failures.inc();
                self.cache.give_back(frame, self.cache.target());
                if self.warn_allowed() {
                    error!("mapping stack page {:#x} failed: {}", page, error);
                }
                return Err(FaultError::PageTableBindFailed {
                    addr,
                    source: error,
                });
            }
        }

        self.stats.mapped_pages.inc();
        self.note_cache_level(remaining);
        Ok(())
    }

    /// Map the page below `sp` that an exception frame would spill onto
    fn premap_frame_spill(&self, ctx: &FaultContext) {
        let sp = ctx.stack_pointer;
        let Some(slot) = self.arena.slot_of(sp) else {
            return;
        };
        let Some(spill) = frame_spill_page(sp) else {
            return;
        };
        // Never reach into the slot below
        if self.arena.slot_of(spill) != Some(slot) || self.platform.pmap.is_mapped(spill) {
            return;
        }

        match self.service_page(spill, spill) {
            Ok(()) => {
                self.stats.premaps.inc();
                trace!("pre-mapped frame spill page {:#x} for sp {:#x}", spill, sp);
            }
            Err(err) => {
                if self.warn_allowed() {
                    warn!("pre-mapping below sp {:#x} failed: {}", sp, err);
                }
            }
        }
    }

    fn report_near_overflow(&self, ctx: &FaultContext, slot: SlotIndex) {
        self.stats.near_overflows.inc();
        if !self.warn_allowed() {
            return;
        }
        warn!(
            "stack in slot {} about to overflow: addr {:#x} sp {:#x} pc {:#x}",
            slot, ctx.faulting_address, ctx.stack_pointer, ctx.program_counter
        );
        self.dump_stack(ctx);
    }
}

//! Property-based tests for vmap_stack
//!
//! Random operation sequences against the slot bitmap, the page cache, the
//! fault classifier and whole stack lifecycles. The lifecycle property
//! checks frame conservation after every step: each frame the physical
//! allocator handed out is either cached or mapped.


use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;
use proptest_strategies::*;
use vmap_stack::arch::{FaultContext, PAGE_SIZE};
use vmap_stack::host::HostPlatform;
use vmap_stack::kern::TaskStackInfo;
use vmap_stack::types::{SlotIndex, TaskId};
use vmap_stack::vmap::{
    Disposition, FaultClassifier, HeapFrameAllocator, PageCache, PageTableBinder, PhysAllocator,
    SlotAllocator, SoftPmap, StackHandle,
};
use vmap_stack::{FaultError, VmapConfig, VmapStackManager};

// ════════════════════════════════════════════════════════════
// Slot Bitmap Properties
// ════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// The allocator behaves like a lowest-free-first set
    #[test]
    fn slot_allocator_matches_model(slots in slot_count(), ops in slot_ops()) {
        let alloc = SlotAllocator::new(slots);
        let mut model = BTreeSet::new();

        for op in ops {
            match op {
                SlotOp::Reserve => {
                    let expected = (0..slots).find(|i| !model.contains(i));
                    let got = alloc.reserve().map(|s| s.0);
                    prop_assert_eq!(got, expected);
                    if let Some(slot) = got {
                        model.insert(slot);
                    }
                }
                SlotOp::Release(n) => {
                    if model.is_empty() {
                        continue;
                    }
                    let slot = *model.iter().nth(n % model.len()).unwrap();
                    alloc.release(SlotIndex(slot));
                    model.remove(&slot);
                }
            }
            prop_assert_eq!(alloc.in_use(), model.len());
            prop_assert!(alloc.next_free_hint() <= slots);
        }

        for slot in 0..slots {
            prop_assert_eq!(alloc.is_reserved(SlotIndex(slot)), model.contains(&slot));
        }
    }
}

// ════════════════════════════════════════════════════════════
// Page Cache Properties
// ════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Cached pages are zeroed, the count never exceeds the target, and no
    /// frame is lost between the cache, the caller and the allocator
    #[test]
    fn page_cache_conserves_frames(
        target in 1usize..32,
        steps in prop::collection::vec((any::<bool>(), 0usize..40), 0..100),
    ) {
        let phys = Arc::new(HeapFrameAllocator::new());
        let cache = PageCache::new(target, phys.clone());
        cache.prefill();
        let mut held = Vec::new();

        for (take, cap) in steps {
            if take {
                if let Some((page, remaining)) = cache.try_take() {
                    prop_assert!(page.is_zeroed());
                    prop_assert_eq!(remaining, cache.count());
                    held.push(page);
                }
            } else if let Some(mut page) = held.pop() {
                page.as_bytes_mut()[17] = 0xa5;
                cache.give_back(page, cap);
            } else {
                cache.refill(cap);
            }

            prop_assert!(cache.count() <= target);
            prop_assert_eq!(phys.outstanding(), cache.count() + held.len());
        }

        while let Some((page, _)) = cache.try_take() {
            prop_assert!(page.is_zeroed());
            phys.free(page);
        }
    }
}

// ════════════════════════════════════════════════════════════
// Fault Classification Properties
// ════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Addresses outside the arena never classify as stack faults
    #[test]
    fn classifier_never_claims_outside_arena(
        base in arena_base(),
        pages in stack_pages(),
        slots in slot_count(),
        addr in any::<usize>(),
        sp in any::<usize>(),
    ) {
        let config = VmapConfig::new().with_arena(base, pages * PAGE_SIZE, slots);
        let host = HostPlatform::new();
        let mgr = VmapStackManager::new(config, host.platform()).unwrap();
        let classifier = FaultClassifier::new(*mgr.arena(), mgr.config());
        let pmap = SoftPmap::new();

        let ctx = FaultContext::new(addr).with_stack_pointer(sp);
        let in_arena = addr >= base && addr < base + slots * pages * PAGE_SIZE;
        match classifier.classify(&ctx, &pmap) {
            Disposition::InArena { slot, page, .. } => {
                prop_assert!(in_arena);
                prop_assert_eq!(slot.0, (addr - base) / (pages * PAGE_SIZE));
                prop_assert_eq!(page, addr & !(PAGE_SIZE - 1));
            }
            Disposition::StackGrowthOutsideArena { page } => {
                prop_assert!(!in_arena);
                prop_assert_eq!(page, addr & !(PAGE_SIZE - 1));
            }
            Disposition::Unhandled => prop_assert!(!in_arena),
        }
    }
}

// ════════════════════════════════════════════════════════════
// Page Table Properties
// ════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Bind, unbind and rebind hand the same frame around
    #[test]
    fn bind_unbind_rebind(page_no in 1usize..0x10_0000, word in any::<usize>()) {
        let phys = HeapFrameAllocator::new();
        let pmap = SoftPmap::new();
        let va = page_no * PAGE_SIZE;

        let page = phys.alloc_zeroed().unwrap();
        let frame = page.phys_addr();
        prop_assert!(pmap.bind(va, page).is_ok());
        prop_assert_eq!(pmap.extract(va), Some(frame));
        prop_assert!(pmap.write_word(va + 8, word));

        let again = phys.alloc_zeroed().unwrap();
        let rejected = pmap.bind(va, again).unwrap_err();
        phys.free(rejected.page);

        let page = pmap.unbind(va).unwrap();
        prop_assert_eq!(page.phys_addr(), frame);
        prop_assert!(!pmap.is_mapped(va));
        prop_assert_eq!(pmap.read_word(va + 8), None);

        prop_assert!(pmap.bind(va, page).is_ok());
        prop_assert_eq!(pmap.read_word(va + 8), Some(word));
        phys.free(pmap.unbind(va).unwrap());
        prop_assert_eq!(phys.outstanding(), 0);
    }
}

// ════════════════════════════════════════════════════════════
// Lifecycle Properties
// ════════════════════════════════════════════════════════════

const SLOTS: usize = 8;
const PAGES: usize = 8;
const BASE: usize = 0x4000_0000;

struct Live {
    task: TaskId,
    stack: StackHandle,
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Forks, faults, sleeps, reclaim and exits never leak or lose a frame
    #[test]
    fn lifecycle_conserves_frames(ops in stack_ops()) {
        let host = HostPlatform::new();
        let config = VmapConfig::new()
            .with_arena(BASE, PAGES * PAGE_SIZE, SLOTS)
            .with_cache_target(12)
            .with_shrink_cooldown(0);
        let mgr = VmapStackManager::new(config, host.platform()).unwrap();
        mgr.init();
        let mut live: Vec<Live> = Vec::new();

        for op in ops {
            match op {
                StackOp::Fork => {
                    if live.len() == SLOTS {
                        continue;
                    }
                    let stack = mgr.allocate_stack().unwrap();
                    prop_assert!(stack.is_vmap());
                    let task = TaskId::new();
                    host.tasks.insert(TaskStackInfo::new(task, "prop"));
                    live.push(Live { task, stack });
                }
                StackOp::Grow { stack, depth } => {
                    if live.is_empty() {
                        continue;
                    }
                    let top = live[stack % live.len()].stack.top();
                    for d in 1..=depth.min(PAGES - 1) {
                        let addr = top - (d + 1) * PAGE_SIZE + 0x80;
                        match mgr.handle_fault(&FaultContext::new(addr)) {
                            Ok(()) | Err(FaultError::OutOfCacheMemory { .. }) => {}
                            Err(err) => prop_assert!(false, "fault error: {}", err),
                        }
                    }
                }
                StackOp::Sleep { stack, depth } => {
                    if live.is_empty() {
                        continue;
                    }
                    let entry = &live[stack % live.len()];
                    let sp = entry.stack.top() - depth * PAGE_SIZE - 0x40;
                    host.tasks.switch_out(entry.task, sp);
                }
                StackOp::Exit(n) => {
                    if live.is_empty() {
                        continue;
                    }
                    let entry = live.swap_remove(n % live.len());
                    host.tasks.remove(entry.task);
                    mgr.free_stack(entry.stack);
                }
                StackOp::Refill => {
                    mgr.run_refill();
                }
                StackOp::Shrink(nr) => {
                    let freed = mgr.shrink_scan(nr).freed();
                    prop_assert!(freed <= nr);
                }
            }

            let mapped = host.pmap.mapped_count();
            prop_assert_eq!(mgr.vmap_stack_pages() as usize, mapped);
            prop_assert_eq!(host.phys.outstanding(), mgr.cache().count() + mapped);
            prop_assert!(mgr.cache().count() <= 12);
            prop_assert_eq!(mgr.slots().in_use(), live.len());
            for entry in &live {
                prop_assert!(host.pmap.is_mapped(entry.stack.top() - PAGE_SIZE));
            }
        }

        for entry in live.drain(..) {
            mgr.free_stack(entry.stack);
        }
        prop_assert_eq!(host.pmap.mapped_count(), 0);
        prop_assert_eq!(host.phys.outstanding(), mgr.cache().count());
    }
}

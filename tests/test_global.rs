//! Global entry points
//!
//! The global manager is process-wide, so the whole sequence lives in one
//! test: behavior before installation, installation, and use afterwards.

use vmap_stack::arch::{FaultContext, PAGE_SIZE};
use vmap_stack::global;
use vmap_stack::host::HostPlatform;
use vmap_stack::{ConfigError, FaultError, StackError, VmapConfig};

const BASE: usize = 0x5000_0000;

#[test]
fn global_manager_lifecycle() {
    // ════════════════════════════════════════════════════════════
    // Before init
    // ════════════════════════════════════════════════════════════

    assert!(global::manager().is_none());
    let addr = BASE + 0x1234;
    assert_eq!(
        global::handle_vmap_fault(&FaultContext::new(addr)),
        Err(FaultError::NotOurs { addr })
    );
    assert!(matches!(global::stack_alloc(), Err(StackError::NotInitialized)));
    assert_eq!(global::vmap_stack_pages(), 0);

    // ════════════════════════════════════════════════════════════
    // Init
    // ════════════════════════════════════════════════════════════

    let host = HostPlatform::new();
    let bad = VmapConfig::new().with_arena(BASE + PAGE_SIZE, 4 * PAGE_SIZE, 4);
    assert_eq!(
        global::init(bad, host.platform()).err(),
        Some(ConfigError::UnalignedArena(BASE + PAGE_SIZE))
    );
    assert!(global::manager().is_none());

    let config = VmapConfig::new()
        .with_arena(BASE, 4 * PAGE_SIZE, 4)
        .with_cache_target(8);
    let mgr = global::init(config, host.platform()).expect("first init");
    assert_eq!(mgr.cache().count(), 8);
    assert_eq!(
        global::init(config, host.platform()).err(),
        Some(ConfigError::AlreadyInitialized)
    );

    // ════════════════════════════════════════════════════════════
    // Use
    // ════════════════════════════════════════════════════════════

    let stack = global::stack_alloc().expect("stack");
    assert_eq!(stack.base(), BASE);
    assert_eq!(global::vmap_stack_pages(), 1);

    let fault = stack.top() - 2 * PAGE_SIZE + 0x10;
    assert_eq!(global::handle_vmap_fault(&FaultContext::new(fault)), Ok(()));
    assert_eq!(global::vmap_stack_pages(), 2);

    global::stack_free(stack);
    assert_eq!(global::vmap_stack_pages(), 0);
    assert_eq!(host.phys.outstanding(), mgr.cache().count());
}

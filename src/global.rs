//! Process-wide vmap stack manager
//!
//! Kernels that want the classic global entry points install one manager at
//! boot; the free functions below forward to it. Everything works before
//! installation too: faults are "not ours" and stack allocation fails.

use spin::Once;

use crate::arch::FaultContext;
use crate::config::VmapConfig;
use crate::error::{ConfigError, FaultError, StackError};
use crate::vmap::{Platform, StackHandle, VmapStackManager};

static MANAGER: Once<VmapStackManager> = Once::new();

/// Build, install and initialize the global manager
pub fn init(config: VmapConfig, platform: Platform) -> Result<&'static VmapStackManager, ConfigError> {
    if MANAGER.is_completed() {
        return Err(ConfigError::AlreadyInitialized);
    }
    let manager = VmapStackManager::new(config, platform)?;

    let mut installed = false;
    let manager = MANAGER.call_once(|| {
        installed = true;
        manager
    });
    if !installed {
        return Err(ConfigError::AlreadyInitialized);
    }

    manager.init();
    Ok(manager)
}

/// The installed manager
pub fn manager() -> Option<&'static VmapStackManager> {
    MANAGER.get()
}

/// Translation fault entry point
pub fn handle_vmap_fault(ctx: &FaultContext) -> Result<(), FaultError> {
    match manager() {
        Some(manager) => manager.handle_fault(ctx),
        None => Err(FaultError::NotOurs {
            addr: ctx.faulting_address,
        }),
    }
}

/// Allocate a kernel stack for a new task
pub fn stack_alloc() -> Result<StackHandle, StackError> {
    manager()
        .ok_or(StackError::NotInitialized)?
        .allocate_stack()
}

/// Free a kernel stack
pub fn stack_free(handle: StackHandle) {
    if let Some(manager) = manager() {
        manager.free_stack(handle);
    }
}

/// Pages currently mapped into stack slots
pub fn vmap_stack_pages() -> u64 {
    manager().map_or(0, |m| m.vmap_stack_pages())
}

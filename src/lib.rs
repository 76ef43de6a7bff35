//! vmap_stack - on-demand paged kernel stacks
//!
//! Kernel stacks live in a reserved virtual arena split into fixed-size
//! slots. A new stack gets a slot and a single mapped page; every further
//! page is mapped from a cache of pre-zeroed pages when the stack grows into
//! it and the resulting translation fault reaches [`VmapStackManager::handle_fault`].
//!
//! ## Components
//!
//! - [`vmap::PageCache`]: zeroed pages kept ready for the fault path
//! - [`vmap::SlotAllocator`]: bitmap over the arena's stack slots
//! - [`vmap::PageTableBinder`]: install/remove one page-table entry
//! - [`vmap::FaultClassifier`]: decides whether a fault is ours
//! - [`vmap::RefillWorker`]: background top-up of the cache
//! - [`vmap::ReclaimShrinker`]: gives back pages of idle stacks under pressure
//! - [`VmapStackManager`]: ties everything together; stack alloc/free
//!
//! Platform services (page tables, physical pages, deferred work, task list,
//! clock) are traits; [`host`] provides software implementations.

#![no_std]
// Kernel-appropriate clippy configuration
#![allow(clippy::new_without_default)]

extern crate alloc;

#[cfg(test)]
extern crate std;

// Core types
pub mod types;

pub mod arch;
pub mod config;
pub mod console;
pub mod error;
pub mod global;
pub mod host;
pub mod kern;
pub mod vmap;

pub use config::VmapConfig;
pub use error::{BindError, ConfigError, FaultError, StackError};
pub use vmap::{Platform, StackHandle, VmapStackManager};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Subsystem name used in log lines
pub const NAME: &str = "vmap_stack";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(NAME, "vmap_stack");
        assert!(!VERSION.is_empty());
    }
}

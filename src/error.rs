//! Error types for the vmap stack subsystem
//!
//! Fault-context errors ([`FaultError`]) are never retried internally; the
//! caller falls through to its default "cannot resolve fault" handling.
//! Background conditions (refill shortfall, shrink cool-down) are reported
//! as outcomes, not errors.

use thiserror::Error;

/// Failure of the page-table binding primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BindError {
    /// A valid entry already exists at the address
    #[error("address already mapped")]
    AlreadyMapped,
    /// An intermediate table could not be allocated
    #[error("page table allocation failed")]
    TableAllocFailed,
    /// The address is not page aligned
    #[error("address not page aligned")]
    Unaligned,
}

/// Result of handling a translation fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FaultError {
    /// Address is neither in the arena nor a recoverable stack-growth fault
    #[error("fault at {addr:#x} is not a vmap stack fault")]
    NotOurs { addr: usize },
    /// The page cache was empty; the fault cannot be serviced
    #[error("no cached page to service fault at {addr:#x}")]
    OutOfCacheMemory { addr: usize },
    /// The architecture primitive refused the mapping
    #[error("mapping page at {addr:#x} failed: {source}")]
    PageTableBindFailed { addr: usize, source: BindError },
}

impl FaultError {
    /// Whether the fault belongs to this subsystem and could not be resolved
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FaultError::NotOurs { .. })
    }
}

/// Stack allocation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StackError {
    /// Neither the cache nor the physical allocator produced a page
    #[error("out of memory allocating stack")]
    OutOfMemory,
    /// The first page of the slot could not be mapped
    #[error("mapping first stack page failed: {0}")]
    PageTableBindFailed(#[from] BindError),
    /// No manager has been installed
    #[error("vmap stack manager not initialized")]
    NotInitialized,
}

/// Configuration rejected by [`crate::VmapConfig::validate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Stack size must be a power-of-two multiple of the page size
    #[error("stack size {0:#x} is not a power-of-two multiple of the page size")]
    BadStackSize(usize),
    /// Arena base must be aligned to the stack size
    #[error("arena base {0:#x} is not aligned to the stack size")]
    UnalignedArena(usize),
    /// At least one slot is required
    #[error("arena has no slots")]
    NoSlots,
    /// The cache must hold at least one page
    #[error("page cache target is zero")]
    NoCache,
    /// Arena end does not fit the address space
    #[error("arena overflows the address space")]
    ArenaOverflow,
    /// The manager was already initialized
    #[error("vmap stack manager already initialized")]
    AlreadyInitialized,
}

//! vmap subsystem - on-demand paged kernel stacks
//!
//! ## Key Components
//!
//! - `arena`: slot geometry of the reserved stack range
//! - `slot_bitmap`: which slots hold a live stack
//! - `vm_page`: owned physical pages and the physical allocator
//! - `page_cache`: pre-zeroed pages for the fault path
//! - `pmap`: page-table binding
//! - `vm_fault`: fault classification and handling
//! - `refill`: background cache top-up
//! - `shrinker`: memory-pressure reclaim of idle stack pages
//! - `stack`: stack allocation and release
//! - `manager`: the object tying it all together

pub mod arena;
pub mod manager;
pub mod page_cache;
pub mod pmap;
pub mod refill;
pub mod shrinker;
pub mod slot_bitmap;
pub mod stack;
pub mod vm_fault;
pub mod vm_page;

pub use arena::Arena;
pub use manager::{BacktraceSink, LogBacktrace, Platform, VmapStackManager};
pub use page_cache::{PageCache, RefillOutcome};
pub use pmap::{BindFailure, PageTableBinder, SoftPmap};
pub use refill::{RefillWorker, WorkerState};
pub use shrinker::{ReclaimShrinker, ShrinkOutcome};
pub use slot_bitmap::{Bitset, SlotAllocator};
pub use stack::{StackHandle, VmapStack};
pub use vm_fault::{Disposition, FaultClassifier};
pub use vm_page::{trunc_page, FallbackStack, HeapFrameAllocator, Page, PhysAllocator};

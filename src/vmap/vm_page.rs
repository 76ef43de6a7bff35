//! Physical pages backing vmap stacks
//!
//! A [`Page`] is an owned, page-aligned frame. It is not `Clone`: the value
//! moves from the physical allocator to the page cache, into a page-table
//! entry and back, so exactly one owner exists at a time.

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::boxed::Box;
use core::fmt;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::arch::PAGE_SIZE;

// ============================================================================
// Address Helpers
// ============================================================================

/// Round an address down to its page
#[inline]
pub const fn trunc_page(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

/// Whether an address is page aligned
#[inline]
pub const fn page_aligned(addr: usize) -> bool {
    addr & (PAGE_SIZE - 1) == 0
}

// ============================================================================
// Page
// ============================================================================

#[repr(C, align(4096))]
struct PageFrame([u8; PAGE_SIZE]);

/// One owned physical page
pub struct Page {
    frame: Box<PageFrame>,
}

impl Page {
    /// Allocate a zero-filled page; `None` when the heap is exhausted
    pub fn try_new_zeroed() -> Option<Self> {
        let layout = Layout::new::<PageFrame>();
        // SAFETY: layout has non-zero size
        let ptr = unsafe { alloc_zeroed(layout) } as *mut PageFrame;
        if ptr.is_null() {
            return None;
        }
        // SAFETY: ptr came from the global allocator with PageFrame's layout
        // and all-zero bytes are a valid PageFrame.
        Some(Self {
            frame: unsafe { Box::from_raw(ptr) },
        })
    }

    /// Address of the frame (stands in for the physical address)
    pub fn phys_addr(&self) -> usize {
        self.frame.0.as_ptr() as usize
    }

    /// Fill with zeros
    pub fn zero(&mut self) {
        self.frame.0.fill(0);
    }

    /// Check if every byte is zero
    pub fn is_zeroed(&self) -> bool {
        self.frame.0.iter().all(|&b| b == 0)
    }

    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.frame.0
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.frame.0
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("phys", &format_args!("{:#x}", self.phys_addr()))
            .finish()
    }
}

// ============================================================================
// Fallback Stack
// ============================================================================

/// Stack from the ordinary allocator, used when the arena is full
pub struct FallbackStack {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the allocation is exclusively owned by this value.
unsafe impl Send for FallbackStack {}
unsafe impl Sync for FallbackStack {}

impl FallbackStack {
    /// Allocate a zeroed stack of `size` bytes aligned to `size`
    pub fn try_new(size: usize) -> Option<Self> {
        let layout = Layout::from_size_align(size, size.max(PAGE_SIZE)).ok()?;
        if layout.size() == 0 {
            return None;
        }
        // SAFETY: layout has non-zero size
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })?;
        Some(Self { ptr, layout })
    }

    /// Lowest address of the stack
    pub fn base(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Stack size in bytes
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    /// Initial stack pointer (one past the top)
    pub fn top(&self) -> usize {
        self.base() + self.size()
    }
}

impl Drop for FallbackStack {
    fn drop(&mut self) {
        // SAFETY: allocated in try_new with this layout
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl fmt::Debug for FallbackStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackStack")
            .field("base", &format_args!("{:#x}", self.base()))
            .field("size", &self.size())
            .finish()
    }
}

// ============================================================================
// Physical Allocator
// ============================================================================

/// Source of physical pages and ordinary stacks.
///
/// `free` must not block: the fault path and the shrinker's task walk hand
/// surplus pages back through it. The allocating methods may block and are
/// never called from fault context.
pub trait PhysAllocator: Send + Sync {
    /// One zeroed page
    fn alloc_zeroed(&self) -> Option<Page>;

    /// Return a page; callable from fault context
    fn free(&self, page: Page);

    /// A zeroed stack of `size` bytes outside the arena
    fn alloc_stack(&self, size: usize) -> Option<FallbackStack>;

    /// Return a stack from [`PhysAllocator::alloc_stack`]
    fn free_stack(&self, stack: FallbackStack);
}

/// Global-allocator backed frames with an optional frame limit
#[derive(Debug)]
pub struct HeapFrameAllocator {
    /// Frames that may be outstanding at once
    limit: AtomicUsize,
    /// Frames currently handed out (fallback stacks count per page)
    outstanding: AtomicUsize,
    allocs: AtomicUsize,
    frees: AtomicUsize,
}

impl HeapFrameAllocator {
    pub const fn new() -> Self {
        Self::with_limit(usize::MAX)
    }

    /// Allocator that refuses to hand out more than `frames` at once
    pub const fn with_limit(frames: usize) -> Self {
        Self {
            limit: AtomicUsize::new(frames),
            outstanding: AtomicUsize::new(0),
            allocs: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
        }
    }

    /// Change the frame limit
    pub fn set_limit(&self, frames: usize) {
        self.limit.store(frames, Ordering::Relaxed);
    }

    /// Frames currently handed out
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Successful page allocations
    pub fn allocs(&self) -> usize {
        self.allocs.load(Ordering::Relaxed)
    }

    /// Pages returned
    pub fn frees(&self) -> usize {
        self.frees.load(Ordering::Relaxed)
    }

    fn charge(&self, frames: usize) -> bool {
        let limit = self.limit.load(Ordering::Relaxed);
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                cur.checked_add(frames).filter(|&n| n <= limit)
            })
            .is_ok()
    }

    fn uncharge(&self, frames: usize) {
        self.outstanding.fetch_sub(frames, Ordering::AcqRel);
    }
}

impl Default for HeapFrameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysAllocator for HeapFrameAllocator {
    fn alloc_zeroed(&self) -> Option<Page> {
        if !self.charge(1) {
            return None;
        }
        match Page::try_new_zeroed() {
            Some(page) => {
                self.allocs.fetch_add(1, Ordering::Relaxed);
                Some(page)
            }
            None => {
                self.uncharge(1);
                None
            }
        }
    }

    fn free(&self, page: Page) {
        drop(page);
        self.frees.fetch_add(1, Ordering::Relaxed);
        self.uncharge(1);
    }

    fn alloc_stack(&self, size: usize) -> Option<FallbackStack> {
        let frames = size.div_ceil(PAGE_SIZE);
        if !self.charge(frames) {
            return None;
        }
        let stack = FallbackStack::try_new(size);
        if stack.is_none() {
            self.uncharge(frames);
        }
        stack
    }

    fn free_stack(&self, stack: FallbackStack) {
        let frames = stack.size().div_ceil(PAGE_SIZE);
        drop(stack);
        self.uncharge(frames);
    }
}

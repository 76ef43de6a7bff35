//! Physical Map (pmap) - page-table binding for stack pages
//!
//! The manager only ever needs four things from the page tables: install one
//! page at one kernel virtual address, remove it again, ask whether an
//! address is mapped, and read a word through the mapping for diagnostics.
//! Installing and removing must not sleep or allocate on the caller's
//! behalf beyond intermediate tables; they are called from fault context.
//!
//! [`SoftPmap`] is a software page table: an ordered map from page address
//! to the owned [`Page`], used on hosts and in tests.

use alloc::collections::BTreeMap;
use core::ops::Range;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use spin::Mutex;

use crate::error::BindError;
use crate::vmap::vm_page::{page_aligned, trunc_page, Page};

/// A rejected bind; the page goes back to the caller
#[derive(Debug)]
pub struct BindFailure {
    pub page: Page,
    pub error: BindError,
}

/// Install/remove single kernel page mappings
pub trait PageTableBinder: Send + Sync {
    /// Map `page` at the page-aligned address `va`
    fn bind(&self, va: usize, page: Page) -> Result<(), BindFailure>;

    /// Remove the mapping at `va`, invalidate the translation and hand back
    /// the page
    fn unbind(&self, va: usize) -> Option<Page>;

    /// Whether `va` has a valid translation
    fn is_mapped(&self, va: usize) -> bool;

    /// Physical address `va` translates to
    fn extract(&self, va: usize) -> Option<usize>;

    /// Read one word through the mapping; `None` if unmapped
    fn read_word(&self, va: usize) -> Option<usize>;
}

// ============================================================================
// Software Page Table
// ============================================================================

/// Software page table
#[derive(Debug, Default)]
pub struct SoftPmap {
    entries: Mutex<BTreeMap<usize, Page>>,
    /// Number of upcoming binds to reject with `TableAllocFailed`
    fail_binds: AtomicUsize,
    invalidations: AtomicU64,
}

impl SoftPmap {
    pub const fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            fail_binds: AtomicUsize::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Make the next `n` binds fail as if a table allocation failed
    pub fn fail_next_binds(&self, n: usize) {
        self.fail_binds.store(n, Ordering::Relaxed);
    }

    /// Total mapped pages
    pub fn mapped_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Mapped pages inside `range`
    pub fn mapped_in(&self, range: Range<usize>) -> usize {
        self.entries.lock().range(range).count()
    }

    /// TLB invalidations performed by `unbind`
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Write bytes through the mapping; false if any page is unmapped
    pub fn write_bytes(&self, va: usize, data: &[u8]) -> bool {
        let mut entries = self.entries.lock();
        for (i, &byte) in data.iter().enumerate() {
            let addr = va + i;
            let Some(page) = entries.get_mut(&trunc_page(addr)) else {
                return false;
            };
            page.as_bytes_mut()[addr - trunc_page(addr)] = byte;
        }
        true
    }

    /// Write one word through the mapping
    pub fn write_word(&self, va: usize, value: usize) -> bool {
        self.write_bytes(va, &value.to_ne_bytes())
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_binds
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl PageTableBinder for SoftPmap {
    fn bind(&self, va: usize, page: Page) -> Result<(), BindFailure> {
        if !page_aligned(va) {
            return Err(BindFailure {
                page,
                error: BindError::Unaligned,
            });
        }
        if self.take_injected_failure() {
            return Err(BindFailure {
                page,
                error: BindError::TableAllocFailed,
            });
        }

        let mut entries = self.entries.lock();
        if entries.contains_key(&va) {
            return Err(BindFailure {
                page,
                error: BindError::AlreadyMapped,
            });
        }
        entries.insert(va, page);
        Ok(())
    }

    fn unbind(&self, va: usize) -> Option<Page> {
        let page = self.entries.lock().remove(&trunc_page(va))?;
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        Some(page)
    }

    fn is_mapped(&self, va: usize) -> bool {
        self.entries.lock().contains_key(&trunc_page(va))
    }

    fn extract(&self, va: usize) -> Option<usize> {
        let base = trunc_page(va);
        self.entries
            .lock()
            .get(&base)
            .map(|page| page.phys_addr() + (va - base))
    }

    fn read_word(&self, va: usize) -> Option<usize> {
        const WORD: usize = core::mem::size_of::<usize>();
        let base = trunc_page(va);
        let offset = va - base;
        if offset + WORD > crate::arch::PAGE_SIZE {
            return None;
        }
        let entries = self.entries.lock();
        let bytes = entries.get(&base)?.as_bytes();
        let mut word = [0u8; WORD];
        word.copy_from_slice(&bytes[offset..offset + WORD]);
        Some(usize::from_ne_bytes(word))
    }
}

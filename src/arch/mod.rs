//! Architecture adapters for vmap_stack
//!
//! The fault handler itself is architecture-agnostic: it only sees a
//! [`FaultContext`]. Each architecture module describes its exception frame
//! and converts it into that context. Both adapters are plain data and are
//! compiled on every target so they can be exercised from host tests.

pub mod aarch64;
pub mod x86_64;

use heapless::Vec as FixedVec;

/// Page size for current architecture
pub const PAGE_SIZE: usize = 4096;

/// Page shift (log2 of PAGE_SIZE)
pub const PAGE_SHIFT: usize = 12;

/// Bytes the CPU/entry code pushes below the interrupted stack pointer
/// when it takes an exception.
#[cfg(target_arch = "aarch64")]
pub const FRAME_SIZE: usize = core::mem::size_of::<aarch64::PtRegs>();

#[cfg(target_arch = "x86_64")]
pub const FRAME_SIZE: usize = core::mem::size_of::<x86_64::ExceptionFrame>();

#[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
pub const FRAME_SIZE: usize = 256;

/// Maximum frames reported by [`walk_frame_pointers`]
pub const MAX_BACKTRACE_DEPTH: usize = 16;

// ============================================================================
// Fault Context
// ============================================================================

/// Register snapshot of a translation fault, produced by an arch adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FaultContext {
    /// Faulting virtual address (FAR_EL1 / CR2)
    pub faulting_address: usize,
    /// Stack pointer of the interrupted context
    pub stack_pointer: usize,
    /// Frame pointer of the interrupted context
    pub frame_pointer: usize,
    /// Program counter of the faulting instruction
    pub program_counter: usize,
    /// Raw fault syndrome (ESR_EL1 / page-fault error code)
    pub syndrome: u64,
}

impl FaultContext {
    /// Context carrying only a faulting address
    pub const fn new(faulting_address: usize) -> Self {
        Self {
            faulting_address,
            stack_pointer: 0,
            frame_pointer: 0,
            program_counter: 0,
            syndrome: 0,
        }
    }

    /// Set the interrupted stack pointer
    pub const fn with_stack_pointer(mut self, sp: usize) -> Self {
        self.stack_pointer = sp;
        self
    }

    /// Set the interrupted frame pointer
    pub const fn with_frame_pointer(mut self, fp: usize) -> Self {
        self.frame_pointer = fp;
        self
    }

    /// Set the faulting program counter
    pub const fn with_program_counter(mut self, pc: usize) -> Self {
        self.program_counter = pc;
        self
    }

    /// Set the raw syndrome
    pub const fn with_syndrome(mut self, syndrome: u64) -> Self {
        self.syndrome = syndrome;
        self
    }
}

// ============================================================================
// Frame Pointer Walk
// ============================================================================

/// Walk a frame-pointer chain and collect return addresses.
///
/// Both supported ABIs store a frame record as `[fp] = caller fp`,
/// `[fp + word] = return address`. `read_word` returns `None` for an
/// unreadable address, which ends the walk. The chain must move strictly
/// upward; anything else is treated as corruption.
pub fn walk_frame_pointers<F>(fp: usize, read_word: F) -> FixedVec<usize, MAX_BACKTRACE_DEPTH>
where
    F: Fn(usize) -> Option<usize>,
{
    let word = core::mem::size_of::<usize>();
    let mut frames = FixedVec::new();
    let mut fp = fp;

    while fp != 0 && fp % word == 0 {
        let Some(next) = read_word(fp) else { break };
        let Some(ret) = fp.checked_add(word).and_then(&read_word) else {
            break;
        };
        if ret == 0 || frames.push(ret).is_err() {
            break;
        }
        if next <= fp {
            break;
        }
        fp = next;
    }

    frames
}

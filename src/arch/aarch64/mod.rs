//! AArch64 exception frame adapter
//!
//! Translation faults at EL1 report the address in FAR_EL1 and the cause in
//! ESR_EL1. The entry code saves a `PtRegs` frame below the interrupted
//! stack pointer before calling into the fault handler.

use bit_field::BitField;

use super::FaultContext;

/// ESR_EL1 exception class: data abort taken without a change in EL
pub const ESR_ELX_EC_DABT_CUR: u64 = 0x25;

/// Exception class field of ESR_EL1
const ESR_ELX_EC: core::ops::Range<usize> = 26..32;

/// Data fault status code field of ESR_EL1
const ESR_ELX_FSC: core::ops::Range<usize> = 0..6;

/// Translation fault, any level (DFSC 0b0001xx)
pub const ESR_ELX_FSC_FAULT: u64 = 0x04;

/// Register frame saved by the EL1 exception entry
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct PtRegs {
    /// General purpose registers x0..x30 (x29 = fp, x30 = lr)
    pub regs: [u64; 31],
    /// Interrupted stack pointer
    pub sp: u64,
    /// Faulting program counter (ELR_EL1)
    pub pc: u64,
    /// Saved processor state (SPSR_EL1)
    pub pstate: u64,
    pub orig_x0: u64,
    pub syscallno: u64,
    pub orig_addr_limit: u64,
    pub unused: u64,
    /// Frame record linking the exception into the unwinder
    pub stackframe: [u64; 2],
}

impl PtRegs {
    /// Frame pointer (x29)
    pub fn fp(&self) -> u64 {
        self.regs[29]
    }
}

/// Whether an ESR_EL1 value describes a kernel translation fault
pub fn is_kernel_translation_fault(esr: u64) -> bool {
    esr.get_bits(ESR_ELX_EC) == ESR_ELX_EC_DABT_CUR
        && esr.get_bits(ESR_ELX_FSC) & !0x3 == ESR_ELX_FSC_FAULT
}

/// Build a fault context from FAR_EL1, ESR_EL1 and the saved frame
pub fn fault_context(far: u64, esr: u64, regs: &PtRegs) -> FaultContext {
    FaultContext::new(far as usize)
        .with_stack_pointer(regs.sp as usize)
        .with_frame_pointer(regs.fp() as usize)
        .with_program_counter(regs.pc as usize)
        .with_syndrome(esr)
}

//! x86_64 exception frame adapter
//!
//! ## Page Faults (Vector 14)
//!
//! When a page fault occurs:
//! - CR2 contains the faulting linear address
//! - Error code contains fault information:
//!   - Bit 0 (P): Page present (0 = not present, 1 = protection violation)
//!   - Bit 1 (W/R): Write access (0 = read, 1 = write)
//!   - Bit 2 (U/S): User mode (0 = supervisor, 1 = user)

use bit_field::BitField;

use super::FaultContext;

/// Page-fault error code: protection violation on a present page
pub const PF_PRESENT: u64 = 1 << 0;
/// Page-fault error code: write access
pub const PF_WRITE: u64 = 1 << 1;
/// Page-fault error code: fault raised from user mode
pub const PF_USER: u64 = 1 << 2;

/// CPU exception frame pushed by interrupt handler
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ExceptionFrame {
    // Pushed by our handler stub
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,

    // Exception vector number (pushed by our stub)
    pub vector: u64,

    // Error code (pushed by CPU for some exceptions, 0 otherwise)
    pub error_code: u64,

    // Pushed by CPU
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

/// Whether an error code describes a kernel not-present fault
pub fn is_kernel_not_present(error_code: u64) -> bool {
    !error_code.get_bit(0) && !error_code.get_bit(2)
}

/// Build a fault context from CR2 and the pushed frame
pub fn fault_context(cr2: u64, frame: &ExceptionFrame) -> FaultContext {
    FaultContext::new(cr2 as usize)
        .with_stack_pointer(frame.rsp as usize)
        .with_frame_pointer(frame.rbp as usize)
        .with_program_counter(frame.rip as usize)
        .with_syndrome(frame.error_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        assert_eq!(core::mem::size_of::<ExceptionFrame>(), 22 * 8);
    }

    #[test]
    fn test_fault_context_from_frame() {
        let frame = ExceptionFrame {
            rsp: 0xffff_c900_0000_7ff0,
            rbp: 0xffff_c900_0000_7ff8,
            rip: 0xffff_ffff_8100_0000,
            error_code: PF_WRITE,
            vector: 14,
            ..Default::default()
        };
        let ctx = fault_context(0xffff_c900_0000_6ff8, &frame);

        assert_eq!(ctx.faulting_address, 0xffff_c900_0000_6ff8);
        assert_eq!(ctx.stack_pointer, 0xffff_c900_0000_7ff0);
        assert_eq!(ctx.frame_pointer, 0xffff_c900_0000_7ff8);
        assert!(is_kernel_not_present(ctx.syndrome));
        assert!(!is_kernel_not_present(PF_PRESENT | PF_WRITE));
        assert!(!is_kernel_not_present(PF_USER));
    }
}

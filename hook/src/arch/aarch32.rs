//! AArch32 (ARM mode) absolute-jump emission.
//!
//! ```text
//! LDR  PC, [PC, #-4]  ; PC reads as this instruction + 8, so the literal
//! .word target        ; immediately after is what gets loaded
//! ```
//!
//! Thumb and Thumb-2 prologues are not supported; callers hook ARM-mode
//! functions only.

/// Bytes displaced from a hooked function's prologue.
pub const PROLOGUE_LEN: usize = 8;

/// Bytes occupied by one absolute jump.
pub const JUMP_LEN: usize = 8;

/// Full 32-bit address space; anything representable is in range.
pub const MAX_TARGET_ADDR: usize = u32::MAX as usize;

/// Lowest plausible mapped address for a code page.
pub const MIN_TARGET_ADDR: usize = 0x1000;

const LDR_PC_PC_M4: u32 = 0xE51F_F004;

/// Write an absolute jump to `target` at `buf`. Literal first, branch word
/// last, so a racing reader never pairs the new load with a stale literal.
///
/// # Safety
/// `buf` must point to at least `JUMP_LEN` writable bytes, 4-byte aligned.
pub unsafe fn write_absolute_jump(buf: *mut u8, target: usize) {
    debug_assert_eq!(buf as usize % 4, 0);

    (buf.add(4) as *mut u32).write_unaligned(target as u32);
    (buf as *mut u32).write_unaligned(LDR_PC_PC_M4);
}

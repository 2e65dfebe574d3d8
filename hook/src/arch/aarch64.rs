//! AArch64 absolute-jump emission.
//!
//! The redirect sequence is position-independent and has no PC-range limit:
//!
//! ```text
//! LDR  X16, #8        ; load the literal that follows
//! BR   X16
//! .quad target
//! ```
//!
//! X16 (IP0) is the intra-procedure-call scratch register; the procedure call
//! standard permits clobbering it at function entry.

/// Bytes displaced from a hooked function's prologue.
pub const PROLOGUE_LEN: usize = 16;

/// Bytes occupied by one absolute jump (same shape as the prologue patch).
pub const JUMP_LEN: usize = 16;

/// Targets at or above this are rejected. Reflects the platform's user-space
/// ceiling; a heuristic, not an architectural limit.
pub const MAX_TARGET_ADDR: usize = 0x7fff_ffff_0000_0000;

/// Lowest plausible mapped address for a code page.
pub const MIN_TARGET_ADDR: usize = 0x1000;

const LDR_X16_LIT8: u32 = 0x5800_0050;
const BR_X16: u32 = 0xD61F_0200;

/// `NOP`
pub const NOP: u32 = 0xD503_201F;
/// `RET`
pub const RET: u32 = 0xD65F_03C0;

/// `ADD X0, X0, #imm` (imm12, no shift). Used to synthesize test stubs.
pub const fn add_x0_imm(imm: u32) -> u32 {
    0x9100_0000 | ((imm & 0x0fff) << 10)
}

/// Write an absolute jump to `target` at `buf`.
///
/// The 64-bit literal is stored before the branch and load words so a thread
/// racing into a partially written patch can never pair the new load with a
/// stale literal.
///
/// # Safety
/// `buf` must point to at least `JUMP_LEN` writable bytes, 4-byte aligned.
pub unsafe fn write_absolute_jump(buf: *mut u8, target: usize) {
    debug_assert_eq!(buf as usize % 4, 0);

    (buf.add(8) as *mut u64).write_unaligned(target as u64);
    (buf.add(4) as *mut u32).write_unaligned(BR_X16);
    (buf as *mut u32).write_unaligned(LDR_X16_LIT8);
}

/// Errors surfaced by the patching layer.
///
/// Symbol resolution and lifecycle errors live in the agent crate; this enum
/// only covers what can go wrong while rewriting code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookError {
    /// An active hook already exists for this target address.
    AlreadyHooked,
    /// No active hook exists for this target address.
    NotHooked,
    /// Target address failed the bounds sanity check.
    InvalidAddress,
    /// mprotect, prologue copy, or cache maintenance failed mid-operation.
    PatchFailed,
    /// The allocator could not obtain an executable page.
    TrampolineExhausted,
}

impl core::fmt::Display for HookError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            HookError::AlreadyHooked => "target is already hooked",
            HookError::NotHooked => "target is not hooked",
            HookError::InvalidAddress => "target address out of range",
            HookError::PatchFailed => "failed to patch target memory",
            HookError::TrampolineExhausted => "no executable page available for trampoline",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for HookError {}

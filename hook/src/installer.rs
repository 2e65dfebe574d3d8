//! Inline hook installer.
//!
//! Splices an absolute jump into a function prologue and synthesizes a
//! trampoline that runs the displaced bytes, then jumps back to the rest of
//! the function. The displaced prologue is copied verbatim; no relocation of
//! PC-relative instructions is attempted, so callers must only hook functions
//! whose first `PROLOGUE_LEN` bytes are position-independent (register saves,
//! stack adjust: the typical prologue).

use std::collections::HashMap;
use std::sync::Mutex;

use log::{debug, warn};

use crate::arch::native::{
    write_absolute_jump, JUMP_LEN, MAX_TARGET_ADDR, MIN_TARGET_ADDR, PROLOGUE_LEN,
};
use crate::mem;
use crate::trampoline::{Trampoline, TrampolinePool};
use crate::types::HookError;

struct HookRecord {
    replacement: usize,
    saved: [u8; PROLOGUE_LEN],
    trampoline: Trampoline,
}

struct Inner {
    entries: HashMap<usize, HookRecord>,
    pool: TrampolinePool,
}

/// Architecture-specific patcher. One record per hooked target address.
///
/// Install and uninstall for the *same* target must be serialized by the
/// caller; operations on disjoint targets may run concurrently and serialize
/// here on the internal lock.
pub struct Installer {
    inner: Mutex<Inner>,
}

impl Default for Installer {
    fn default() -> Self {
        Self::new()
    }
}

impl Installer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                pool: TrampolinePool::new(),
            }),
        }
    }

    fn validate_target(target: usize) -> Result<(), HookError> {
        if target < MIN_TARGET_ADDR || target >= MAX_TARGET_ADDR || target % 4 != 0 {
            return Err(HookError::InvalidAddress);
        }
        Ok(())
    }

    /// Hook `target` so calls land in `replacement`. Returns the trampoline
    /// address: calling it behaves like the unhooked original.
    ///
    /// # Safety
    /// `target` must be the entry of a function with a position-independent
    /// `PROLOGUE_LEN`-byte prologue, and `replacement` must be ABI-compatible
    /// with it.
    pub unsafe fn install(&self, target: usize, replacement: usize) -> Result<usize, HookError> {
        Self::validate_target(target)?;
        if replacement == 0 {
            return Err(HookError::InvalidAddress);
        }

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.entries.contains_key(&target) {
            return Err(HookError::AlreadyHooked);
        }

        let mut saved = [0u8; PROLOGUE_LEN];
        core::ptr::copy_nonoverlapping(target as *const u8, saved.as_mut_ptr(), PROLOGUE_LEN);

        // Trampoline: displaced prologue, then an absolute jump to the rest
        // of the original function.
        let tramp = inner.pool.alloc()?;
        core::ptr::copy_nonoverlapping(saved.as_ptr(), tramp.base, PROLOGUE_LEN);
        write_absolute_jump(tramp.base.add(PROLOGUE_LEN), target + PROLOGUE_LEN);
        mem::flush_icache(tramp.base as usize, PROLOGUE_LEN + JUMP_LEN);

        // Splice the redirect into the live prologue. The closure body is a
        // safe context of its own, so the raw write needs its own block.
        if let Err(e) = mem::patch_code(target, PROLOGUE_LEN, |p| unsafe {
            write_absolute_jump(p, replacement);
        }) {
            // Nothing references the trampoline yet.
            inner.pool.recycle(tramp);
            return Err(e);
        }

        debug!(
            "hooked {:#x} -> {:#x}, trampoline at {:p}",
            target, replacement, tramp.base
        );

        inner.entries.insert(
            target,
            HookRecord {
                replacement,
                saved,
                trampoline: tramp,
            },
        );
        Ok(tramp.base as usize)
    }

    /// Restore the original prologue at `target`.
    ///
    /// The trampoline page is retained (not reused) until `release_trampolines`:
    /// another thread may still be executing inside it.
    ///
    /// # Safety
    /// The caller must guarantee no thread can race a concurrent uninstall of
    /// the same target, per the manager's locking contract.
    pub unsafe fn uninstall(&self, target: usize) -> Result<(), HookError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let record = inner.entries.remove(&target).ok_or(HookError::NotHooked)?;

        if let Err(e) = mem::patch_code(target, PROLOGUE_LEN, |p| unsafe {
            core::ptr::copy_nonoverlapping(record.saved.as_ptr(), p, PROLOGUE_LEN);
        }) {
            warn!("failed to restore prologue at {:#x}: {}", target, e);
            // Hook bytes are still live; keep the record so teardown retries.
            inner.entries.insert(target, record);
            return Err(e);
        }

        debug!(
            "unhooked {:#x} (was -> {:#x}); trampoline {:p} retained until teardown",
            target, record.replacement, record.trampoline.base
        );
        Ok(())
    }

    pub fn is_installed(&self, target: usize) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .contains_key(&target)
    }

    pub fn active_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    /// Unmap every trampoline page.
    ///
    /// # Safety
    /// All hooks must already be uninstalled and the caller must guarantee no
    /// thread can still be executing inside any trampoline.
    pub unsafe fn release_trampolines(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        debug_assert!(inner.entries.is_empty());
        inner.pool.release_all();
    }
}

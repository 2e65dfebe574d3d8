//! vspace-hook: inline function interception for the vspace engine.
//!
//! Layers, leaves first: page protection and cache maintenance (`mem`),
//! the executable page pool (`trampoline`), per-ISA jump emission (`arch`),
//! and the installer that ties them together (`installer`).

pub mod arch;
pub mod installer;
pub mod mem;
pub mod trampoline;
pub mod types;

pub use installer::Installer;
pub use types::HookError;

/// Displaced-prologue length for the build target.
pub use arch::native::PROLOGUE_LEN;

/// Process-global lock for tests that modify executable code.
///
/// Tests that patch mapped pages must hold this lock so concurrent patching
/// never leaves a test observing another test's half-written code.
#[cfg(test)]
pub(crate) fn lock_hook_tests() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}

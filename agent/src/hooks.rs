//! Hook management façade.
//!
//! Resolves symbol names through the registry, delegates patching to the
//! installer, and keeps the by-symbol index of active hooks. That index is
//! the single source of truth for teardown: it grows on every successful
//! install and is trimmed only on successful uninstall.

use std::sync::Arc;

use log::{info, warn};
use vspace_hook::{HookError, Installer};

use crate::error::{EngineError, Result};
use crate::resolver::LibraryRegistry;

/// One live redirection, indexed by the name it was installed under.
#[derive(Debug, Clone)]
pub struct ActiveHook {
    pub symbol: String,
    pub target: usize,
    pub trampoline: usize,
}

pub struct HookManager {
    installer: Arc<Installer>,
    active: Vec<ActiveHook>,
}

impl HookManager {
    pub fn new(installer: Arc<Installer>) -> Self {
        Self {
            installer,
            active: Vec::new(),
        }
    }

    fn position(&self, symbol: &str) -> Option<usize> {
        self.active.iter().position(|h| h.symbol == symbol)
    }

    /// Resolve `symbol` and splice in `replacement`. Returns the backup
    /// (trampoline) address.
    ///
    /// # Safety
    /// `replacement` must be ABI-compatible with the resolved function, whose
    /// prologue must be position-independent.
    pub unsafe fn install_by_name(
        &mut self,
        resolver: &mut LibraryRegistry,
        symbol: &str,
        replacement: usize,
    ) -> Result<usize> {
        if self.position(symbol).is_some() {
            return Err(EngineError::Hook(HookError::AlreadyHooked));
        }

        let target = resolver
            .resolve_any(symbol)
            .ok_or_else(|| EngineError::SymbolNotFound(symbol.to_string()))?;

        let trampoline = self.installer.install(target, replacement)?;
        info!("hooked {symbol} at {target:#x}, backup {trampoline:#x}");

        self.active.push(ActiveHook {
            symbol: symbol.to_string(),
            target,
            trampoline,
        });
        Ok(trampoline)
    }

    /// Remove the hook installed under `symbol`.
    ///
    /// # Safety
    /// The caller must ensure no thread is mid-flight in the replacement; see
    /// the quiescence contract on `Installer::uninstall`.
    pub unsafe fn uninstall_by_name(&mut self, symbol: &str) -> Result<()> {
        let idx = self
            .position(symbol)
            .ok_or(EngineError::Hook(HookError::NotHooked))?;

        self.installer.uninstall(self.active[idx].target)?;
        let hook = self.active.remove(idx);
        info!("unhooked {} at {:#x}", hook.symbol, hook.target);
        Ok(())
    }

    /// Uninstall every active hook in reverse insertion order. Individual
    /// failures are logged; the failing entries stay on the list.
    ///
    /// # Safety
    /// Same quiescence contract as `uninstall_by_name`, for every hook.
    pub unsafe fn uninstall_all(&mut self) {
        let mut kept = Vec::new();
        while let Some(hook) = self.active.pop() {
            if let Err(e) = self.installer.uninstall(hook.target) {
                warn!("failed to unhook {}: {e}", hook.symbol);
                kept.push(hook);
            }
        }
        kept.reverse();
        self.active = kept;
    }

    pub fn list_hooks(&self) -> &[ActiveHook] {
        &self.active
    }

    pub fn backup_of(&self, symbol: &str) -> Option<usize> {
        self.position(symbol).map(|i| self.active[i].trampoline)
    }
}

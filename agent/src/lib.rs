//! vspace-agent: the in-process interception engine.
//!
//! Compiled as a cdylib and loaded into the host process; the host runtime
//! drives it through the C ABI in [`bridge`]. One process-wide [`Engine`]
//! owns the installer, the library registry, the hook manager and the binder
//! monitor, with every lifecycle and mutation operation serialized by a
//! single lock. Replacement bodies on the interception hot path never take
//! that lock.

pub mod binder_monitor;
pub mod bridge;
pub mod elf;
pub mod error;
pub mod hooks;
pub mod resolver;

pub use error::{EngineError, Result};
pub use resolver::SymbolRecord;

use std::sync::{Arc, Mutex, OnceLock};

use log::{debug, info, warn};
use vspace_hook::Installer;
use vspace_policy::TransactionFilter;

use crate::binder_monitor::BinderMonitor;
use crate::hooks::HookManager;
use crate::resolver::LibraryRegistry;

/// System libraries opened at initialization. Per group, the first name the
/// linker accepts wins; later names cover hosts where the canonical soname
/// differs.
const SYSTEM_LIBRARIES: [&[&str]; 3] = [
    &["libc.so", "libc.so.6"],
    &["libdl.so", "libdl.so.2"],
    &["libbinder.so"],
];

struct EngineState {
    installer: Arc<Installer>,
    resolver: LibraryRegistry,
    manager: HookManager,
    monitor: BinderMonitor,
}

/// Process-wide coordinator. `UNINITIALIZED -> INITIALIZED -> UNINITIALIZED`;
/// every operation other than `initialize` and `teardown` is rejected with
/// `NotInitialized` outside the initialized state.
pub struct Engine {
    state: Mutex<Option<EngineState>>,
}

/// Lock shared by every test in this crate that touches process-global state
/// (the engine singleton, the policy table, the captured syscall backups).
#[cfg(test)]
pub(crate) fn lock_engine_tests() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}

impl Engine {
    pub fn obtain() -> &'static Engine {
        static INSTANCE: OnceLock<Engine> = OnceLock::new();
        INSTANCE.get_or_init(|| Engine {
            state: Mutex::new(None),
        })
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut EngineState) -> Result<T>) -> Result<T> {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_mut() {
            Some(state) => f(state),
            None => Err(EngineError::NotInitialized),
        }
    }

    /// Arm the engine. Idempotent: a second call on an initialized engine is
    /// a no-op.
    pub fn initialize(&self) -> Result<()> {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_some() {
            debug!("engine already initialized");
            return Ok(());
        }

        let installer = Arc::new(Installer::new());
        let mut resolver = LibraryRegistry::new();
        for group in SYSTEM_LIBRARIES {
            let opened = group.iter().any(|name| match resolver.open(name) {
                Ok(()) => true,
                Err(e) => {
                    debug!("could not open {name}: {e}");
                    false
                }
            });
            if !opened {
                warn!("no candidate of {group:?} could be opened; relying on default scope");
            }
        }

        let manager = HookManager::new(installer.clone());
        *guard = Some(EngineState {
            installer,
            resolver,
            manager,
            monitor: BinderMonitor::new(),
        });
        info!("engine initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Disarm everything and return to the pre-init state. Double teardown is
    /// a no-op.
    ///
    /// Callers are responsible for quiescence: no thread may still be inside
    /// a replacement or trampoline when this runs.
    pub fn teardown(&self) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let Some(mut state) = guard.take() else {
            debug!("teardown on uninitialized engine");
            return;
        };

        unsafe {
            state.manager.uninstall_all();
            state.monitor.detach();
            state.resolver.unload_all();
            binder_monitor::reset_policy();

            if state.installer.active_count() == 0 {
                state.installer.release_trampolines();
            } else {
                warn!(
                    "{} hooks could not be uninstalled; leaving trampoline pages mapped",
                    state.installer.active_count()
                );
            }
        }
        info!("engine torn down");
    }

    /// Resolve `symbol` and redirect it to `replacement`, returning the
    /// backup address.
    ///
    /// `replacement` must be ABI-compatible with the resolved function, and
    /// the target's prologue must be position-independent; violating either
    /// is undefined behavior once the hooked function is called.
    pub fn install_hook(&self, symbol: &str, replacement: usize) -> Result<usize> {
        self.with_state(|s| unsafe {
            s.manager.install_by_name(&mut s.resolver, symbol, replacement)
        })
    }

    /// Remove the hook installed under `symbol`. Callers ensure quiescence.
    pub fn uninstall_hook(&self, symbol: &str) -> Result<()> {
        self.with_state(|s| unsafe { s.manager.uninstall_by_name(symbol) })
    }

    /// Symbols of currently active hooks, in install order.
    pub fn active_hooks(&self) -> Result<Vec<String>> {
        self.with_state(|s| Ok(s.manager.list_hooks().iter().map(|h| h.symbol.clone()).collect()))
    }

    /// Library-scoped lookup when `library` is given, global otherwise.
    pub fn find_symbol(&self, library: Option<&str>, symbol: &str) -> Result<usize> {
        self.with_state(|s| {
            let addr = match library {
                Some(lib) => s.resolver.resolve(lib, symbol),
                None => s.resolver.resolve_any(symbol),
            };
            addr.ok_or_else(|| EngineError::SymbolNotFound(symbol.to_string()))
        })
    }

    pub fn load_library(&self, path: &str) -> Result<()> {
        self.with_state(|s| s.resolver.open(path))
    }

    pub fn unload_library(&self, path: &str) -> Result<()> {
        self.with_state(|s| s.resolver.close(path))
    }

    /// Seed the resolver's cache with a known address.
    pub fn register_symbol(&self, record: SymbolRecord) -> Result<()> {
        self.with_state(|s| {
            s.resolver.register_symbol(record);
            Ok(())
        })
    }

    /// Arm the binder interceptor.
    pub fn hook_ipc(&self) -> Result<()> {
        self.with_state(|s| unsafe { s.monitor.install(&mut s.manager, &mut s.resolver) })
    }

    /// Disarm the binder interceptor. A no-op when it is not armed.
    pub fn unhook_ipc(&self) -> Result<()> {
        self.with_state(|s| {
            unsafe { s.monitor.remove(&mut s.manager) };
            Ok(())
        })
    }

    pub fn ipc_hooked(&self) -> Result<bool> {
        self.with_state(|s| Ok(s.monitor.is_hooked()))
    }

    pub fn set_ipc_filter(&self, service: &str, allow: bool) -> Result<()> {
        self.with_state(|_| {
            binder_monitor::policy()
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .set_service(service, allow);
            Ok(())
        })
    }

    pub fn set_ipc_predicate(&self, service: &str, filter: TransactionFilter) -> Result<()> {
        self.with_state(|_| {
            binder_monitor::policy()
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .set_filter(service, filter);
            Ok(())
        })
    }

    pub fn remove_ipc_filter(&self, service: &str) -> Result<bool> {
        self.with_state(|_| {
            let mut store = binder_monitor::policy()
                .write()
                .unwrap_or_else(|e| e.into_inner());
            let removed = store.remove_service(service) | store.remove_filter(service);
            Ok(removed)
        })
    }

    /// Restore the policy table to its default seed.
    pub fn clear_ipc_filters(&self) -> Result<()> {
        self.with_state(|_| {
            binder_monitor::reset_policy();
            Ok(())
        })
    }
}

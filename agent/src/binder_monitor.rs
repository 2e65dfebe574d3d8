//! Binder IPC interception.
//!
//! Hooks the three syscalls driving the binder character device (`ioctl`,
//! `write`, `read`) through the hook manager. The captured backups live in
//! process-global atomics because the replacement bodies run on arbitrary
//! threads of the host process and never take the coordinator lock; policy is
//! reached through its own `RwLock` with short read sections.
//!
//! A buffer counts as tentative IPC when its leading word carries one of the
//! driver's object tags, when the fd resolves to a binder device node, or
//! when a service-name candidate is present in the payload. Tentative
//! outbound traffic is parsed and gated by policy; rejected transactions are
//! answered with `-1` and never reach the original syscall. Unparseable
//! buffers are forwarded without a policy check.

use core::cell::Cell;
use core::ffi::c_void;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{OnceLock, RwLock};

use log::{debug, info, warn};
use vspace_binder::{device, ioctl, transaction};
use vspace_policy::{PolicyStore, Verdict};

use crate::error::Result;
use crate::hooks::HookManager;
use crate::resolver::LibraryRegistry;

static ORIG_IOCTL: AtomicUsize = AtomicUsize::new(0);
static ORIG_WRITE: AtomicUsize = AtomicUsize::new(0);
static ORIG_READ: AtomicUsize = AtomicUsize::new(0);

type IoctlFn = unsafe extern "C" fn(libc::c_int, libc::c_ulong, *mut c_void) -> libc::c_int;
type WriteFn = unsafe extern "C" fn(libc::c_int, *const c_void, libc::size_t) -> libc::ssize_t;
type ReadFn = unsafe extern "C" fn(libc::c_int, *mut c_void, libc::size_t) -> libc::ssize_t;

// Re-entrancy guard. The replacement bodies log, and the logger itself calls
// `write`; without the guard every log line would recurse into the hook.
thread_local! {
    static IN_HOOK: Cell<bool> = const { Cell::new(false) };
}

fn in_hook() -> bool {
    IN_HOOK.with(|h| h.get())
}

/// RAII guard marking the current thread as inside a replacement body.
/// Nesting-safe: inner guards restore the outer (already-set) state.
struct ReentryGuard(bool);

impl ReentryGuard {
    fn enter() -> Self {
        let was = in_hook();
        IN_HOOK.with(|h| h.set(true));
        Self(was)
    }
}

impl Drop for ReentryGuard {
    fn drop(&mut self) {
        let was = self.0;
        IN_HOOK.with(|h| h.set(was));
    }
}

static POLICY: OnceLock<RwLock<PolicyStore>> = OnceLock::new();

/// The process-wide service policy consulted by the replacement bodies.
pub fn policy() -> &'static RwLock<PolicyStore> {
    POLICY.get_or_init(|| RwLock::new(PolicyStore::with_defaults()))
}

/// Restore the policy table to its default seed.
pub fn reset_policy() {
    policy().write().unwrap_or_else(|e| e.into_inner()).clear();
}

/// Gate one outbound buffer.
fn outbound_verdict(fd: libc::c_int, buf: &[u8]) -> Verdict {
    let tentative = transaction::is_tagged(buf) || device::is_binder_fd(fd);
    match transaction::parse(buf) {
        Ok(tx) => {
            if !tentative && tx.service.is_empty() {
                return Verdict::Admit;
            }
            let verdict = policy()
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .evaluate(&tx);
            if verdict == Verdict::Reject {
                debug!(
                    "rejecting outbound transaction: service={} code={:#x}",
                    tx.service, tx.code
                );
            }
            verdict
        }
        // Too short to carry opcode and flags: forward without a policy check.
        Err(_) => Verdict::Admit,
    }
}

/// Gate one inbound (already read) buffer. Only tag-matched replies are
/// considered; suppressing a reply consumes it, so the gate stays narrow.
fn inbound_verdict(buf: &[u8]) -> Verdict {
    if !transaction::is_tagged(buf) {
        return Verdict::Admit;
    }
    match transaction::parse(buf) {
        Ok(tx) => policy()
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .evaluate(&tx),
        Err(_) => Verdict::Admit,
    }
}

pub unsafe extern "C" fn hooked_ioctl(
    fd: libc::c_int,
    request: libc::c_ulong,
    arg: *mut c_void,
) -> libc::c_int {
    let orig = ORIG_IOCTL.load(Ordering::Acquire);
    if orig == 0 {
        return -1;
    }
    let orig: IoctlFn = core::mem::transmute(orig);

    if !in_hook() && request == ioctl::BINDER_WRITE_READ {
        let _g = ReentryGuard::enter();
        // Transaction exchange. Classified and passed through; the exchange
        // block's embedded buffers are gated on the byte-oriented path.
        debug!(
            "binder ioctl exchange: fd={fd} binder_device={}",
            device::is_binder_fd(fd)
        );
    }

    orig(fd, request, arg)
}

pub unsafe extern "C" fn hooked_write(
    fd: libc::c_int,
    buf: *const c_void,
    count: libc::size_t,
) -> libc::ssize_t {
    let orig = ORIG_WRITE.load(Ordering::Acquire);
    if orig == 0 {
        return -1;
    }
    let orig: WriteFn = core::mem::transmute(orig);

    if in_hook() || buf.is_null() || count < transaction::MIN_TRANSACTION_LEN {
        return orig(fd, buf, count);
    }

    let _g = ReentryGuard::enter();
    let bytes = core::slice::from_raw_parts(buf as *const u8, count);
    if outbound_verdict(fd, bytes) == Verdict::Reject {
        return -1;
    }

    orig(fd, buf, count)
}

pub unsafe extern "C" fn hooked_read(
    fd: libc::c_int,
    buf: *mut c_void,
    count: libc::size_t,
) -> libc::ssize_t {
    let orig = ORIG_READ.load(Ordering::Acquire);
    if orig == 0 {
        return -1;
    }
    let orig: ReadFn = core::mem::transmute(orig);

    let result = orig(fd, buf, count);
    if in_hook() || result <= 0 || buf.is_null() {
        return result;
    }

    let _g = ReentryGuard::enter();
    let bytes = core::slice::from_raw_parts(buf as *const u8, result as usize);
    if inbound_verdict(bytes) == Verdict::Reject {
        return -1;
    }

    result
}

/// Installs and owns the three syscall hooks.
pub struct BinderMonitor {
    installed: bool,
}

impl Default for BinderMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl BinderMonitor {
    pub fn new() -> Self {
        Self { installed: false }
    }

    pub fn is_hooked(&self) -> bool {
        self.installed
    }

    /// Hook `ioctl`, `write` and `read`, storing each backup before the next
    /// install so a partially armed monitor never runs without its originals.
    ///
    /// # Safety
    /// Callers must hold the coordinator lock; the libc targets must have
    /// position-independent prologues on this platform.
    pub unsafe fn install(
        &mut self,
        manager: &mut HookManager,
        resolver: &mut LibraryRegistry,
    ) -> Result<()> {
        if self.installed {
            debug!("binder hooks already installed");
            return Ok(());
        }

        let backup = manager.install_by_name(resolver, "ioctl", hooked_ioctl as usize)?;
        ORIG_IOCTL.store(backup, Ordering::Release);

        let backup = match manager.install_by_name(resolver, "write", hooked_write as usize) {
            Ok(b) => b,
            Err(e) => {
                self.rollback(manager, &["ioctl"]);
                return Err(e);
            }
        };
        ORIG_WRITE.store(backup, Ordering::Release);

        let backup = match manager.install_by_name(resolver, "read", hooked_read as usize) {
            Ok(b) => b,
            Err(e) => {
                self.rollback(manager, &["ioctl", "write"]);
                return Err(e);
            }
        };
        ORIG_READ.store(backup, Ordering::Release);

        self.installed = true;
        info!("binder hooks installed");
        Ok(())
    }

    unsafe fn rollback(&self, manager: &mut HookManager, symbols: &[&str]) {
        for symbol in symbols {
            if let Err(e) = manager.uninstall_by_name(symbol) {
                warn!("rollback failed for {symbol}: {e}");
            }
        }
        ORIG_IOCTL.store(0, Ordering::Release);
        ORIG_WRITE.store(0, Ordering::Release);
        ORIG_READ.store(0, Ordering::Release);
    }

    /// Unhook all three syscalls.
    ///
    /// # Safety
    /// Same contract as `install`.
    pub unsafe fn remove(&mut self, manager: &mut HookManager) {
        if !self.installed {
            return;
        }
        for symbol in ["read", "write", "ioctl"] {
            if let Err(e) = manager.uninstall_by_name(symbol) {
                warn!("failed to unhook {symbol}: {e}");
            }
        }
        self.detach();
        info!("binder hooks removed");
    }

    /// Drop the captured backups without touching the manager. Used by
    /// teardown after `uninstall_all` has already restored the prologues.
    pub fn detach(&mut self) {
        ORIG_IOCTL.store(0, Ordering::Release);
        ORIG_WRITE.store(0, Ordering::Release);
        ORIG_READ.store(0, Ordering::Release);
        self.installed = false;
    }
}

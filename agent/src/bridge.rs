//! C-ABI surface for the host-language bridge.
//!
//! Every export returns a success bit (`1`/`0`) or an address (`0` on
//! failure) and never unwinds across the FFI boundary. The host context
//! handle is accepted opaquely; nothing in the engine dereferences it.

use core::ffi::{c_char, c_int, c_void};
use std::ffi::CStr;

use log::{error, warn};

use crate::Engine;

const OK: c_int = 1;
const FAIL: c_int = 0;

unsafe fn cstr<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

/// Initialize the engine. Idempotent; returns the success bit.
#[unsafe(no_mangle)]
pub extern "C" fn vspace_initialize(_host_context: *mut c_void) -> c_int {
    let _ = env_logger::try_init();
    match Engine::obtain().initialize() {
        Ok(()) => OK,
        Err(e) => {
            error!("engine initialization failed: {e}");
            FAIL
        }
    }
}

/// Tear the engine down. Safe to call repeatedly.
#[unsafe(no_mangle)]
pub extern "C" fn vspace_cleanup() {
    Engine::obtain().teardown();
}

/// Hook `symbol`, writing the backup address through `backup_out` when the
/// slot is non-null.
#[unsafe(no_mangle)]
pub extern "C" fn vspace_install_hook(
    symbol: *const c_char,
    replacement: u64,
    backup_out: *mut u64,
) -> c_int {
    let Some(symbol) = (unsafe { cstr(symbol) }) else {
        return FAIL;
    };
    match Engine::obtain().install_hook(symbol, replacement as usize) {
        Ok(backup) => {
            if !backup_out.is_null() {
                unsafe { backup_out.write(backup as u64) };
            }
            OK
        }
        Err(e) => {
            warn!("install_hook({symbol}) failed: {e}");
            FAIL
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn vspace_uninstall_hook(symbol: *const c_char) -> c_int {
    let Some(symbol) = (unsafe { cstr(symbol) }) else {
        return FAIL;
    };
    match Engine::obtain().uninstall_hook(symbol) {
        Ok(()) => OK,
        Err(e) => {
            warn!("uninstall_hook({symbol}) failed: {e}");
            FAIL
        }
    }
}

/// Resolve `symbol`, scoped to `library` when non-null. Returns 0 when the
/// resolver exhausts all paths.
#[unsafe(no_mangle)]
pub extern "C" fn vspace_find_symbol(library: *const c_char, symbol: *const c_char) -> u64 {
    let Some(symbol) = (unsafe { cstr(symbol) }) else {
        return 0;
    };
    let library = unsafe { cstr(library) };
    match Engine::obtain().find_symbol(library, symbol) {
        Ok(addr) => addr as u64,
        Err(_) => 0,
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn vspace_load_library(path: *const c_char) -> c_int {
    let Some(path) = (unsafe { cstr(path) }) else {
        return FAIL;
    };
    match Engine::obtain().load_library(path) {
        Ok(()) => OK,
        Err(e) => {
            warn!("load_library({path}) failed: {e}");
            FAIL
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn vspace_hook_ipc() -> c_int {
    match Engine::obtain().hook_ipc() {
        Ok(()) => OK,
        Err(e) => {
            warn!("hook_ipc failed: {e}");
            FAIL
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn vspace_unhook_ipc() {
    if let Err(e) = Engine::obtain().unhook_ipc() {
        warn!("unhook_ipc failed: {e}");
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn vspace_set_ipc_filter(service: *const c_char, allow: c_int) -> c_int {
    let Some(service) = (unsafe { cstr(service) }) else {
        return FAIL;
    };
    match Engine::obtain().set_ipc_filter(service, allow != 0) {
        Ok(()) => OK,
        Err(e) => {
            warn!("set_ipc_filter({service}) failed: {e}");
            FAIL
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn vspace_clear_ipc_filters() -> c_int {
    match Engine::obtain().clear_ipc_filters() {
        Ok(()) => OK,
        Err(_) => FAIL,
    }
}

// The operations below are delegated to external collaborators; the memory
// helpers wrap the syscalls directly and the virtual-process pair only
// reports that delegation.

#[unsafe(no_mangle)]
pub extern "C" fn vspace_create_virtual_process(package: *const c_char, user_id: c_int) -> c_int {
    let package = unsafe { cstr(package) }.unwrap_or("<invalid>");
    warn!("create_virtual_process({package}, {user_id}): handled by the host runtime");
    FAIL
}

#[unsafe(no_mangle)]
pub extern "C" fn vspace_kill_virtual_process(pid: c_int) -> c_int {
    warn!("kill_virtual_process({pid}): handled by the host runtime");
    FAIL
}

#[unsafe(no_mangle)]
pub extern "C" fn vspace_protect_memory(addr: u64, size: u64, prot: c_int) -> c_int {
    if addr == 0 || size == 0 {
        return FAIL;
    }
    let rc = unsafe { libc::mprotect(addr as *mut c_void, size as usize, prot) };
    if rc == 0 {
        OK
    } else {
        FAIL
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn vspace_allocate_memory(size: u64) -> u64 {
    if size == 0 {
        return 0;
    }
    let ptr = unsafe {
        libc::mmap(
            core::ptr::null_mut(),
            size as usize,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        0
    } else {
        ptr as u64
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn vspace_free_memory(addr: u64, size: u64) -> c_int {
    if addr == 0 || size == 0 {
        return FAIL;
    }
    let rc = unsafe { libc::munmap(addr as *mut c_void, size as usize) };
    if rc == 0 {
        OK
    } else {
        FAIL
    }
}

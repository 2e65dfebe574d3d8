//! End-to-end engine tests.
//!
//! Hook targets are synthesized into fresh executable pages and registered in
//! the resolver cache under stub names, so the full resolve-install-teardown
//! path runs without patching a live libc function. Byte-level assertions run
//! on every host; tests that execute patched code are gated to AArch64.

use std::sync::{Mutex, MutexGuard, OnceLock};

use vspace_agent::{Engine, EngineError, SymbolRecord};
use vspace_hook::{HookError, PROLOGUE_LEN};

// One engine per test binary; serialize everything that touches it.
fn lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// Map an RX page pre-filled with a deterministic pattern, standing in for a
/// hookable function.
fn map_patterned_region(seed: u8) -> usize {
    unsafe {
        let p = libc::mmap(
            core::ptr::null_mut(),
            page_size(),
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        );
        assert_ne!(p, libc::MAP_FAILED, "mmap failed");
        let base = p as *mut u8;
        for i in 0..64 {
            base.add(i).write(seed.wrapping_add(i as u8).wrapping_mul(13));
        }
        libc::mprotect(p, page_size(), libc::PROT_READ | libc::PROT_EXEC);
        p as usize
    }
}

fn read_bytes(addr: usize, len: usize) -> Vec<u8> {
    unsafe { core::slice::from_raw_parts(addr as *const u8, len).to_vec() }
}

fn register_stub(engine: &Engine, name: &str, address: usize) {
    engine
        .register_symbol(SymbolRecord {
            name: name.to_string(),
            address,
            library: String::new(),
            is_function: true,
        })
        .expect("register stub symbol");
}

const REPLACEMENT_A: usize = 0x4000_1000;
const REPLACEMENT_B: usize = 0x4000_2000;

#[test]
fn operations_require_initialization() {
    let _l = lock();
    let engine = Engine::obtain();
    engine.teardown();

    assert!(matches!(
        engine.install_hook("anything", REPLACEMENT_A),
        Err(EngineError::NotInitialized)
    ));
    assert!(matches!(
        engine.find_symbol(None, "malloc"),
        Err(EngineError::NotInitialized)
    ));
    assert!(matches!(engine.hook_ipc(), Err(EngineError::NotInitialized)));
    assert!(matches!(
        engine.set_ipc_filter("isms", true),
        Err(EngineError::NotInitialized)
    ));

    // Teardown on an uninitialized engine stays a no-op.
    engine.teardown();
}

#[test]
fn install_by_name_round_trips_target_bytes() {
    let _l = lock();
    let engine = Engine::obtain();
    engine.initialize().expect("initialize");

    let target = map_patterned_region(0x11);
    let before = read_bytes(target, 64);
    register_stub(engine, "stub_pattern", target);

    let backup = engine
        .install_hook("stub_pattern", REPLACEMENT_A)
        .expect("install");

    // The backup's head carries the displaced prologue.
    assert_eq!(read_bytes(backup, PROLOGUE_LEN), before[..PROLOGUE_LEN]);
    // The target's head changed.
    assert_ne!(read_bytes(target, PROLOGUE_LEN), before[..PROLOGUE_LEN]);
    assert_eq!(engine.active_hooks().unwrap(), vec!["stub_pattern"]);

    engine.uninstall_hook("stub_pattern").expect("uninstall");
    assert_eq!(read_bytes(target, 64), before, "round-trip identity");
    assert!(engine.active_hooks().unwrap().is_empty());

    engine.teardown();
}

#[test]
fn duplicate_install_is_rejected_until_uninstalled() {
    let _l = lock();
    let engine = Engine::obtain();
    engine.initialize().expect("initialize");

    let target = map_patterned_region(0x22);
    register_stub(engine, "stub_dup", target);

    engine
        .install_hook("stub_dup", REPLACEMENT_A)
        .expect("first install");
    assert!(matches!(
        engine.install_hook("stub_dup", REPLACEMENT_B),
        Err(EngineError::Hook(HookError::AlreadyHooked))
    ));

    engine.uninstall_hook("stub_dup").expect("uninstall");
    engine
        .install_hook("stub_dup", REPLACEMENT_B)
        .expect("reinstall with the second replacement");
    engine.uninstall_hook("stub_dup").expect("cleanup");

    engine.teardown();
}

#[test]
fn unknown_symbol_and_unknown_hook_errors() {
    let _l = lock();
    let engine = Engine::obtain();
    engine.initialize().expect("initialize");

    assert!(matches!(
        engine.install_hook("vspace_engine_no_such_symbol", REPLACEMENT_A),
        Err(EngineError::SymbolNotFound(_))
    ));
    assert!(matches!(
        engine.uninstall_hook("never_installed"),
        Err(EngineError::Hook(HookError::NotHooked))
    ));

    engine.teardown();
}

#[test]
fn teardown_restores_every_hooked_prologue() {
    let _l = lock();
    let engine = Engine::obtain();
    engine.initialize().expect("initialize");

    // Three plain hooks plus the binder monitor's three syscall hooks, all
    // against registered stand-ins.
    let names = ["stub_a", "stub_b", "stub_c", "ioctl", "write", "read"];
    let mut regions = Vec::new();
    for (i, name) in names.iter().enumerate() {
        let target = map_patterned_region(0x40 + i as u8);
        register_stub(engine, name, target);
        regions.push((target, read_bytes(target, 64)));
    }

    for name in &names[..3] {
        engine.install_hook(name, REPLACEMENT_A).expect("install stub hook");
    }
    engine.hook_ipc().expect("arm binder monitor");
    assert!(engine.ipc_hooked().unwrap());
    assert_eq!(engine.active_hooks().unwrap().len(), 6);

    engine.teardown();

    for (i, (target, before)) in regions.iter().enumerate() {
        assert_eq!(
            &read_bytes(*target, 64),
            before,
            "region {} must be byte-identical after teardown",
            names[i]
        );
    }

    // The engine is back in the uninitialized state.
    assert!(matches!(
        engine.install_hook("stub_a", REPLACEMENT_A),
        Err(EngineError::NotInitialized)
    ));
    assert!(matches!(
        engine.find_symbol(None, "malloc"),
        Err(EngineError::NotInitialized)
    ));
}

#[test]
fn ipc_hooks_arm_and_disarm_against_standins() {
    let _l = lock();
    let engine = Engine::obtain();
    engine.initialize().expect("initialize");

    for (i, name) in ["ioctl", "write", "read"].iter().enumerate() {
        let target = map_patterned_region(0x70 + i as u8);
        register_stub(engine, name, target);
    }

    engine.hook_ipc().expect("arm");
    // Re-arming is a no-op, not a duplicate install.
    engine.hook_ipc().expect("re-arm");
    assert!(engine.ipc_hooked().unwrap());

    engine.unhook_ipc().expect("disarm");
    assert!(!engine.ipc_hooked().unwrap());
    assert!(engine.active_hooks().unwrap().is_empty());
    // Disarming again stays quiet.
    engine.unhook_ipc().expect("double disarm");

    engine.teardown();
}

#[test]
fn policy_mutation_requires_initialized_engine() {
    let _l = lock();
    let engine = Engine::obtain();
    engine.initialize().expect("initialize");

    engine.set_ipc_filter("custom.service", false).expect("set filter");
    assert!(engine.remove_ipc_filter("custom.service").expect("remove"));
    assert!(!engine.remove_ipc_filter("custom.service").expect("already gone"));
    engine.clear_ipc_filters().expect("clear");

    engine.teardown();
    assert!(matches!(
        engine.clear_ipc_filters(),
        Err(EngineError::NotInitialized)
    ));
}

#[cfg(target_arch = "aarch64")]
mod exec {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use vspace_hook::arch::native as arch;

    /// Synthesize `f(x) = x + c` into a fresh executable page.
    fn make_add_const(c: u32) -> extern "C" fn(i64) -> i64 {
        unsafe {
            let p = libc::mmap(
                core::ptr::null_mut(),
                page_size(),
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            assert_ne!(p, libc::MAP_FAILED);
            let code = p as *mut u32;
            code.write(arch::add_x0_imm(c));
            code.add(1).write(arch::RET);
            for i in 2..8 {
                code.add(i).write(arch::NOP);
            }
            libc::mprotect(p, page_size(), libc::PROT_READ | libc::PROT_EXEC);
            vspace_hook::mem::flush_icache(p as usize, 32);
            core::mem::transmute(p)
        }
    }

    static BACKUP: AtomicUsize = AtomicUsize::new(0);

    extern "C" fn plus_ten_via_backup(x: i64) -> i64 {
        let orig: extern "C" fn(i64) -> i64 =
            unsafe { core::mem::transmute(BACKUP.load(Ordering::Acquire)) };
        orig(x) + 10
    }

    #[test]
    fn replacement_calls_through_the_backup() {
        let _l = lock();
        let engine = Engine::obtain();
        engine.initialize().expect("initialize");

        let f = make_add_const(1);
        assert_eq!(f(5), 6);
        register_stub(engine, "stub_add_one", f as usize);

        let backup = engine
            .install_hook("stub_add_one", plus_ten_via_backup as usize)
            .expect("install");
        BACKUP.store(backup, Ordering::Release);

        assert_eq!(f(5), 16, "replacement runs the original then adds 10");

        engine.uninstall_hook("stub_add_one").expect("uninstall");
        assert_eq!(f(5), 6, "original behavior restored");

        engine.teardown();
    }
}

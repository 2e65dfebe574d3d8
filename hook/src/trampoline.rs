//! Executable page pool for trampolines.
//!
//! Each trampoline gets its own anonymous one-page RWX mapping. Pages are
//! tracked for the pool's lifetime and only unmapped by `release_all()`
//! during coordinator teardown: a thread may still be executing inside a
//! trampoline when its hook is uninstalled, so retirement is deferred until
//! the caller has guaranteed quiescence.

use crate::types::HookError;

/// One trampoline region: a page-aligned RWX mapping.
#[derive(Debug, Clone, Copy)]
pub struct Trampoline {
    pub base: *mut u8,
    pub len: usize,
}

unsafe impl Send for Trampoline {}
unsafe impl Sync for Trampoline {}

#[derive(Debug, Default)]
pub struct TrampolinePool {
    pages: Vec<Trampoline>,
    /// Pages recycled by a rolled-back install. Never populated by uninstall:
    /// an uninstalled trampoline may still have a caller inside it.
    free: Vec<Trampoline>,
}

impl TrampolinePool {
    pub fn new() -> Self {
        Self {
            pages: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Allocate an RWX page, distinct from every live trampoline. Reuses a
    /// recycled page when one is available.
    pub fn alloc(&mut self) -> Result<Trampoline, HookError> {
        if let Some(t) = self.free.pop() {
            return Ok(t);
        }
        let len = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize };
        let ptr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(HookError::TrampolineExhausted);
        }

        let tramp = Trampoline {
            base: ptr as *mut u8,
            len,
        };
        self.pages.push(tramp);
        log::debug!("trampoline page allocated at {:p}", tramp.base);
        Ok(tramp)
    }

    /// Return a page whose contents never became reachable (a rolled-back
    /// install). Safe to hand out again immediately.
    pub fn recycle(&mut self, tramp: Trampoline) {
        self.free.push(tramp);
    }

    pub fn live_count(&self) -> usize {
        self.pages.len()
    }

    /// Unmap every page. Callers must ensure no thread can still be executing
    /// inside any trampoline.
    ///
    /// # Safety
    /// See above; unmapping a page under a running thread is fatal.
    pub unsafe fn release_all(&mut self) {
        self.free.clear();
        for t in self.pages.drain(..) {
            libc::munmap(t.base as *mut libc::c_void, t.len);
        }
    }
}

//! Page protection and instruction-cache maintenance.
//!
//! Every operation here aligns the requested range out to full pages before
//! touching it, so callers can pass exact instruction ranges.

use crate::types::HookError;

#[inline]
fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// Expand `[addr, addr+len)` to the covering page range.
fn covering_pages(addr: usize, len: usize) -> (usize, usize) {
    let page_sz = page_size();
    let start = addr & !(page_sz - 1);
    let end = (addr.saturating_add(len).saturating_add(page_sz - 1)) & !(page_sz - 1);
    (start, (end - start).max(page_sz))
}

fn protect(addr: usize, len: usize, prot: libc::c_int) -> Result<(), HookError> {
    let (start, map_len) = covering_pages(addr, len);
    let rc = unsafe { libc::mprotect(start as *mut libc::c_void, map_len, prot) };
    if rc != 0 {
        return Err(HookError::PatchFailed);
    }
    Ok(())
}

/// Make the pages covering `[addr, addr+len)` readable, writable and executable.
pub fn make_rwx(addr: usize, len: usize) -> Result<(), HookError> {
    protect(addr, len, libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC)
}

/// Restore the pages covering `[addr, addr+len)` to read + execute.
pub fn make_rx(addr: usize, len: usize) -> Result<(), HookError> {
    protect(addr, len, libc::PROT_READ | libc::PROT_EXEC)
}

/// Synchronize caches after writing instructions to `[addr, addr+len)`.
///
/// On ARM the data and instruction caches are not coherent: the data cache is
/// cleaned to the point of unification, then the instruction cache is
/// invalidated, so any CPU executing after this call observes the new bytes.
///
/// # Safety
/// `addr` must point to at least `len` bytes of mapped memory.
pub unsafe fn flush_icache(addr: usize, len: usize) {
    #[cfg(any(target_arch = "aarch64", target_arch = "arm"))]
    {
        extern "C" {
            fn __clear_cache(beg: *mut libc::c_void, end: *mut libc::c_void);
        }
        __clear_cache(addr as *mut libc::c_void, (addr + len) as *mut libc::c_void);
    }

    // Coherent I-cache elsewhere; nothing to do.
    #[cfg(not(any(target_arch = "aarch64", target_arch = "arm")))]
    {
        let _ = (addr, len);
    }
}

/// Patch `len` bytes of mapped (typically executable) memory at `addr`.
///
/// Flips the covering pages to RWX, runs `apply` with a pointer to `addr`,
/// restores R+X, then flushes the *entire* covering page range. Flushing the
/// whole range keeps other functions on the same page coherent when they were
/// patched earlier through a separate call.
///
/// # Safety
/// `addr` must point to `len` bytes of mapped memory and `apply` must write
/// only within that range. Note that `apply` is an ordinary closure and
/// therefore a safe context; a body doing raw-pointer writes needs its own
/// `unsafe` block.
pub unsafe fn patch_code(
    addr: usize,
    len: usize,
    apply: impl FnOnce(*mut u8),
) -> Result<(), HookError> {
    if len == 0 {
        return Ok(());
    }

    make_rwx(addr, len)?;
    apply(addr as *mut u8);
    make_rx(addr, len)?;

    let (start, map_len) = covering_pages(addr, len);
    flush_icache(start, map_len);
    Ok(())
}

//! Binder control-command encodings.
//!
//! The driver is operated through `ioctl` on its character device; commands
//! use the kernel's `_IOC` packing. Only `BINDER_WRITE_READ` is acted on by
//! the interceptor; the rest are listed so classification can name what it
//! passes through.

use core::mem::size_of;

const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = 8;
const IOC_SIZESHIFT: u32 = 16;
const IOC_DIRSHIFT: u32 = 30;

const IOC_WRITE: libc::c_ulong = 1;
const IOC_READ: libc::c_ulong = 2;

const fn ioc(dir: libc::c_ulong, ty: u8, nr: u8, size: usize) -> libc::c_ulong {
    (dir << IOC_DIRSHIFT)
        | ((size as libc::c_ulong) << IOC_SIZESHIFT)
        | ((ty as libc::c_ulong) << IOC_TYPESHIFT)
        | ((nr as libc::c_ulong) << IOC_NRSHIFT)
}

pub const fn iow(ty: u8, nr: u8, size: usize) -> libc::c_ulong {
    ioc(IOC_WRITE, ty, nr, size)
}

pub const fn iowr(ty: u8, nr: u8, size: usize) -> libc::c_ulong {
    ioc(IOC_READ | IOC_WRITE, ty, nr, size)
}

/// Kernel exchange block passed with `BINDER_WRITE_READ`. Field widths track
/// the target's pointer size, which is what the command encoding hashes over.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BinderWriteRead {
    pub write_size: libc::c_ulong,
    pub write_consumed: libc::c_ulong,
    pub write_buffer: libc::c_ulong,
    pub read_size: libc::c_ulong,
    pub read_consumed: libc::c_ulong,
    pub read_buffer: libc::c_ulong,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BinderVersion {
    pub protocol_version: libc::c_int,
}

/// `_IOWR('b', 1, struct binder_write_read)`: a transaction exchange.
pub const BINDER_WRITE_READ: libc::c_ulong = iowr(b'b', 1, size_of::<BinderWriteRead>());
/// `_IOW('b', 3, u64)`
pub const BINDER_SET_IDLE_TIMEOUT: libc::c_ulong = iow(b'b', 3, size_of::<u64>());
/// `_IOW('b', 5, u32)`
pub const BINDER_SET_MAX_THREADS: libc::c_ulong = iow(b'b', 5, size_of::<u32>());
/// `_IOW('b', 6, i32)`
pub const BINDER_SET_IDLE_PRIORITY: libc::c_ulong = iow(b'b', 6, size_of::<i32>());
/// `_IOW('b', 7, i32)`
pub const BINDER_SET_CONTEXT_MGR: libc::c_ulong = iow(b'b', 7, size_of::<i32>());
/// `_IOW('b', 8, i32)`
pub const BINDER_THREAD_EXIT: libc::c_ulong = iow(b'b', 8, size_of::<i32>());
/// `_IOWR('b', 9, struct binder_version)`
pub const BINDER_VERSION: libc::c_ulong = iowr(b'b', 9, size_of::<BinderVersion>());

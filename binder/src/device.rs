//! Binder device identification.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;

/// Does `fd` refer to a binder character device?
///
/// Resolves `/proc/self/fd/<n>` and matches the link target against the
/// `"binder"` substring, which covers `/dev/binder`, `/dev/hwbinder` and
/// `/dev/vndbinder`.
pub fn is_binder_fd(fd: libc::c_int) -> bool {
    if fd < 0 {
        return false;
    }
    let link = format!("/proc/self/fd/{fd}");
    match std::fs::read_link(&link) {
        Ok(target) => os_contains(target.as_os_str(), b"binder"),
        Err(_) => false,
    }
}

fn os_contains(haystack: &OsStr, needle: &[u8]) -> bool {
    haystack
        .as_bytes()
        .windows(needle.len())
        .any(|w| w == needle)
}

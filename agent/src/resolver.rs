//! Library registry and symbol cache.
//!
//! Maintains the set of shared objects opened for hooking and lazily caches
//! resolved symbols. All lookups go through the dynamic linker; the registry
//! only adds canonical-path bookkeeping and caching on top. Mutation happens
//! under the coordinator lock.

use std::collections::HashMap;
use std::ffi::{CStr, CString};

use log::{debug, info, warn};

use crate::elf::{self, ElfClass};
use crate::error::{EngineError, Result};

/// One cached resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRecord {
    pub name: String,
    pub address: usize,
    /// Owning library path; empty when only the global lookup saw it.
    pub library: String,
    pub is_function: bool,
}

struct LoadedLibrary {
    path: String,
    handle: *mut libc::c_void,
    class: Option<ElfClass>,
    /// name -> address; the registry key plus this name form the effective
    /// `path::symbol` cache key.
    symbols: HashMap<String, usize>,
}

/// Registry of opened libraries, iterated in registration order.
pub struct LibraryRegistry {
    libraries: Vec<LoadedLibrary>,
    /// Bare-name cache for global lookups.
    global: HashMap<String, SymbolRecord>,
}

// Handles are process-global dlopen results; any thread may use them.
unsafe impl Send for LibraryRegistry {}

impl Default for LibraryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LibraryRegistry {
    pub fn new() -> Self {
        Self {
            libraries: Vec::new(),
            global: HashMap::new(),
        }
    }

    fn find(&self, path: &str) -> Option<usize> {
        self.libraries.iter().position(|l| l.path == path)
    }

    /// Open a shared library with lazy binding and local scope, and register
    /// it under `path`. Re-opening a registered path is a no-op.
    pub fn open(&mut self, path: &str) -> Result<()> {
        if self.find(path).is_some() {
            debug!("library already registered: {path}");
            return Ok(());
        }

        // Verify the image when the path names a readable file; bare sonames
        // are left to the linker's search path.
        let class = match std::fs::File::open(path) {
            Ok(_) => Some(elf::verify(path)?),
            Err(_) => None,
        };

        let c_path = CString::new(path).map_err(|_| EngineError::LibraryOpen {
            path: path.to_string(),
            reason: "path contains NUL".to_string(),
        })?;

        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_LAZY | libc::RTLD_LOCAL) };
        if handle.is_null() {
            return Err(EngineError::LibraryOpen {
                path: path.to_string(),
                reason: dlerror_string(),
            });
        }

        info!("library registered: {path} (class {class:?})");
        self.libraries.push(LoadedLibrary {
            path: path.to_string(),
            handle,
            class,
            symbols: HashMap::new(),
        });
        Ok(())
    }

    /// Close and unregister `path`.
    pub fn close(&mut self, path: &str) -> Result<()> {
        let idx = self
            .find(path)
            .ok_or_else(|| EngineError::LibraryNotLoaded(path.to_string()))?;
        let lib = self.libraries.remove(idx);
        unsafe { libc::dlclose(lib.handle) };
        debug!("library closed: {path}");
        Ok(())
    }

    /// Library-scoped lookup: per-library cache first, then the linker.
    pub fn resolve(&mut self, path: &str, name: &str) -> Option<usize> {
        let idx = self.find(path)?;
        let lib = &mut self.libraries[idx];

        if let Some(&addr) = lib.symbols.get(name) {
            return Some(addr);
        }

        let addr = dlsym_in(lib.handle, name)?;
        lib.symbols.insert(name.to_string(), addr);
        debug!("resolved {path}::{name} at {addr:#x}");
        Some(addr)
    }

    /// Global lookup: bare-name cache, then each registered library in
    /// registration order, then the linker's default search.
    pub fn resolve_any(&mut self, name: &str) -> Option<usize> {
        if let Some(record) = self.global.get(name) {
            return Some(record.address);
        }

        for i in 0..self.libraries.len() {
            let path = self.libraries[i].path.clone();
            if let Some(addr) = self.resolve(&path, name) {
                self.global.insert(
                    name.to_string(),
                    SymbolRecord {
                        name: name.to_string(),
                        address: addr,
                        library: path,
                        is_function: true,
                    },
                );
                return Some(addr);
            }
        }

        let addr = dlsym_default(name)?;
        let library = library_of(addr).unwrap_or_default();
        debug!("resolved {name} at {addr:#x} via default scope ({library})");
        self.global.insert(
            name.to_string(),
            SymbolRecord {
                name: name.to_string(),
                address: addr,
                library,
                is_function: true,
            },
        );
        Some(addr)
    }

    /// Cached record for a globally resolved symbol, if any.
    pub fn symbol_info(&self, name: &str) -> Option<&SymbolRecord> {
        self.global.get(name)
    }

    /// Seed the global cache with a known address, bypassing the linker.
    pub fn register_symbol(&mut self, record: SymbolRecord) {
        self.global.insert(record.name.clone(), record);
    }

    pub fn list_loaded(&self) -> Vec<String> {
        self.libraries.iter().map(|l| l.path.clone()).collect()
    }

    pub fn class_of(&self, path: &str) -> Option<ElfClass> {
        self.find(path).and_then(|i| self.libraries[i].class)
    }

    /// Harvest shared-library paths from `/proc/self/maps` and open each.
    /// Returns how many new libraries were registered.
    pub fn scan_process_maps(&mut self) -> Result<usize> {
        let maps = std::fs::read_to_string("/proc/self/maps").map_err(|e| {
            EngineError::LibraryOpen {
                path: "/proc/self/maps".to_string(),
                reason: e.to_string(),
            }
        })?;

        let mut paths: Vec<&str> = maps
            .lines()
            .filter_map(|line| line.split_whitespace().nth(5))
            .filter(|p| p.starts_with('/') && p.contains(".so"))
            .collect();
        paths.sort_unstable();
        paths.dedup();

        let mut opened = 0;
        for path in paths {
            if self.find(path).is_some() {
                continue;
            }
            match self.open(path) {
                Ok(()) => opened += 1,
                Err(e) => warn!("skipping {path}: {e}"),
            }
        }
        info!("maps scan registered {opened} libraries");
        Ok(opened)
    }

    /// Reverse lookup through the linker: the symbol and library covering
    /// `address`.
    pub fn name_of(&self, address: usize) -> Option<(String, String)> {
        unsafe {
            let mut info: libc::Dl_info = core::mem::zeroed();
            if libc::dladdr(address as *const libc::c_void, &mut info) == 0 {
                return None;
            }
            if info.dli_sname.is_null() || info.dli_fname.is_null() {
                return None;
            }
            let symbol = CStr::from_ptr(info.dli_sname).to_string_lossy().into_owned();
            let library = CStr::from_ptr(info.dli_fname).to_string_lossy().into_owned();
            Some((symbol, library))
        }
    }

    /// Drop every cached resolution. Registered libraries stay open.
    pub fn clear_cache(&mut self) {
        self.global.clear();
        for lib in &mut self.libraries {
            lib.symbols.clear();
        }
        debug!("symbol cache cleared");
    }

    /// Close every registered library.
    pub fn unload_all(&mut self) {
        for lib in self.libraries.drain(..).rev() {
            unsafe { libc::dlclose(lib.handle) };
        }
        self.global.clear();
    }
}

fn dlerror_string() -> String {
    unsafe {
        let err = libc::dlerror();
        if err.is_null() {
            "unknown dlopen failure".to_string()
        } else {
            CStr::from_ptr(err).to_string_lossy().into_owned()
        }
    }
}

fn dlsym_in(handle: *mut libc::c_void, name: &str) -> Option<usize> {
    let c_name = CString::new(name).ok()?;
    let addr = unsafe { libc::dlsym(handle, c_name.as_ptr()) };
    (!addr.is_null()).then_some(addr as usize)
}

fn dlsym_default(name: &str) -> Option<usize> {
    let c_name = CString::new(name).ok()?;
    let addr = unsafe { libc::dlsym(libc::RTLD_DEFAULT, c_name.as_ptr()) };
    (!addr.is_null()).then_some(addr as usize)
}

fn library_of(address: usize) -> Option<String> {
    unsafe {
        let mut info: libc::Dl_info = core::mem::zeroed();
        if libc::dladdr(address as *const libc::c_void, &mut info) == 0 || info.dli_fname.is_null()
        {
            return None;
        }
        Some(CStr::from_ptr(info.dli_fname).to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Path of the loaded C library, from the process's own map.
    fn libc_path() -> Option<String> {
        let maps = std::fs::read_to_string("/proc/self/maps").ok()?;
        maps.lines()
            .filter_map(|line| line.split_whitespace().nth(5))
            .find(|p| p.starts_with('/') && p.contains("libc.so"))
            .map(|p| p.to_string())
    }

    #[test]
    fn resolve_any_falls_back_to_default_scope() {
        let mut reg = LibraryRegistry::new();
        let addr = reg.resolve_any("malloc").expect("malloc resolves");
        assert_ne!(addr, 0);

        let record = reg.symbol_info("malloc").expect("cached after lookup");
        assert_eq!(record.address, addr);
        assert!(record.is_function);
    }

    #[test]
    fn resolve_is_cache_coherent_until_cleared() {
        let mut reg = LibraryRegistry::new();
        let first = reg.resolve_any("free").expect("free resolves");
        let second = reg.resolve_any("free").expect("free resolves again");
        assert_eq!(first, second);

        reg.clear_cache();
        assert!(reg.symbol_info("free").is_none());
        let third = reg.resolve_any("free").expect("free after clear");
        assert_eq!(first, third);
    }

    #[test]
    fn open_resolve_close_against_loaded_libc() {
        let Some(path) = libc_path() else {
            eprintln!("no libc path in maps, skipping");
            return;
        };

        let mut reg = LibraryRegistry::new();
        reg.open(&path).expect("open libc");
        // Re-open is a no-op, not a duplicate.
        reg.open(&path).expect("reopen");
        assert_eq!(reg.list_loaded(), vec![path.clone()]);

        #[cfg(target_pointer_width = "64")]
        assert_eq!(reg.class_of(&path), Some(crate::elf::ElfClass::Elf64));

        let addr = reg.resolve(&path, "malloc").expect("scoped resolve");
        assert_eq!(reg.resolve(&path, "malloc"), Some(addr), "cache hit");

        // Library-scoped resolution should short-circuit resolve_any too.
        assert_eq!(reg.resolve_any("malloc"), Some(addr));

        reg.close(&path).expect("close");
        assert!(reg.list_loaded().is_empty());
        assert!(matches!(
            reg.close(&path),
            Err(EngineError::LibraryNotLoaded(_))
        ));
    }

    #[test]
    fn resolve_missing_symbol_returns_none() {
        let mut reg = LibraryRegistry::new();
        assert_eq!(reg.resolve_any("vspace_definitely_not_a_symbol_xyz"), None);
        assert_eq!(reg.resolve("not-registered.so", "malloc"), None);
    }

    #[test]
    fn open_rejects_non_elf_file() {
        let path = "/tmp/vspace_resolver_not_elf";
        std::fs::write(path, b"#!/bin/sh\necho hi\n").expect("write");
        let mut reg = LibraryRegistry::new();
        let err = reg.open(path).expect_err("must reject");
        std::fs::remove_file(path).ok();
        assert!(matches!(err, EngineError::BadElf { .. }));
    }

    #[test]
    fn open_reports_linker_error_for_missing_library() {
        let mut reg = LibraryRegistry::new();
        let err = reg
            .open("/tmp/vspace_no_such_lib.so.9")
            .expect_err("must fail");
        match err {
            EngineError::LibraryOpen { path, .. } => {
                assert_eq!(path, "/tmp/vspace_no_such_lib.so.9")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn scan_process_maps_registers_loaded_objects() {
        let mut reg = LibraryRegistry::new();
        reg.scan_process_maps().expect("scan");
        let loaded = reg.list_loaded();
        assert!(
            loaded.iter().any(|p| p.contains(".so")),
            "expected shared objects from maps, got {loaded:?}"
        );
        // Second scan finds nothing new.
        assert_eq!(reg.scan_process_maps().expect("rescan"), 0);
        reg.unload_all();
    }

    #[test]
    fn name_of_round_trips_a_linker_symbol() {
        let mut reg = LibraryRegistry::new();
        let addr = reg.resolve_any("malloc").expect("malloc");
        let Some((symbol, library)) = reg.name_of(addr) else {
            eprintln!("dladdr returned no symbol, skipping");
            return;
        };
        assert_eq!(symbol, "malloc");
        assert!(!library.is_empty());
    }

    #[test]
    fn registered_symbol_bypasses_linker() {
        let mut reg = LibraryRegistry::new();
        reg.register_symbol(SymbolRecord {
            name: "vspace_fake_entry".to_string(),
            address: 0x1234_5678,
            library: String::new(),
            is_function: true,
        });
        assert_eq!(reg.resolve_any("vspace_fake_entry"), Some(0x1234_5678));
    }
}
